use display_hotkeys::display::{Mode, Orientation, ScalingMode};
use display_hotkeys::error::PersistenceError;
use display_hotkeys::settings_store::{
    DisplayField, DisplaySettings, JsonSettingsStore, SettingsStore, SlotField, SlotSettings,
};
use std::fs;
use tempfile::tempdir;

#[test]
fn values_survive_a_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("DisplayHotKeys").join("settings.json");

    let store = JsonSettingsStore::open(&path).unwrap();
    store
        .put_display(
            "D1",
            DisplaySettings {
                slot_count: 2,
                orientation: Orientation::Rotated180,
                slots: vec![SlotSettings::default(), SlotSettings::default()],
            },
        )
        .unwrap();
    store
        .set_slot_field("D1", 1, SlotField::Mode(Mode::new(1280, 720, 60, 32)))
        .unwrap();
    store
        .set_slot_field("D1", 1, SlotField::ScalingMode(ScalingMode::Stretched))
        .unwrap();
    store.set_slot_field("D1", 1, SlotField::Keys(vec![162, 164, 49])).unwrap();
    store.set_display_field("D1", DisplayField::SlotCount(1)).unwrap();
    let mut app = store.application();
    app.run_on_startup = true;
    store.set_application(app).unwrap();
    drop(store);

    let reopened = JsonSettingsStore::open(&path).unwrap();
    let display = reopened.display("D1").unwrap();
    assert_eq!(display.slot_count, 1);
    assert_eq!(display.orientation, Orientation::Rotated180);
    let slot = reopened.slot("D1", 1).unwrap();
    assert_eq!(slot.mode, Some(Mode::new(1280, 720, 60, 32)));
    assert_eq!(slot.scaling_mode, ScalingMode::Stretched);
    assert_eq!(slot.keys, vec![162, 164, 49]);
    assert!(reopened.application().run_on_startup);
}

#[test]
fn hand_written_combo_strings_load_as_codes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(
        &path,
        r#"{
            "displays": {
                "D1": {
                    "slot_count": 3,
                    "slots": [
                        { "keys": "Ctrl+Alt+1" },
                        { "keys": [162, 50] },
                        { "keys": "Ctrl+Bogus" }
                    ]
                }
            }
        }"#,
    )
    .unwrap();

    let store = JsonSettingsStore::open(&path).unwrap();
    assert_eq!(store.slot("D1", 0).unwrap().keys, vec![162, 164, 49]);
    assert_eq!(store.slot("D1", 1).unwrap().keys, vec![162, 50]);
    assert!(store.slot("D1", 2).unwrap().keys.is_empty());
    assert!(!dir.path().join("settings.corrupt").exists());

    store.set_display_field("D1", DisplayField::SlotCount(2)).unwrap();
    let written = fs::read_to_string(&path).unwrap();
    assert!(!written.contains("Ctrl"));
}

#[test]
fn corrupt_file_is_moved_aside() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, "{ not json").unwrap();

    let store = JsonSettingsStore::open(&path).unwrap();
    assert!(store.display_ids().is_empty());
    assert!(dir.path().join("settings.corrupt").exists());
    assert!(!path.exists());
}

#[test]
fn partial_file_takes_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, r#"{"displays":{"D1":{"slots":[{"keys":[65]}]}}}"#).unwrap();

    let store = JsonSettingsStore::open(&path).unwrap();
    let display = store.display("D1").unwrap();
    assert_eq!(display.slot_count, 1);
    assert_eq!(display.orientation, Orientation::Normal);
    assert_eq!(display.slots[0].dpi_scale, 100);
    assert_eq!(display.slots[0].orientation, Orientation::Inherit);
    assert_eq!(store.application().max_slots, 12);
}

#[test]
fn write_failure_is_reported() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, "x").unwrap();
    let store = JsonSettingsStore::open(blocker.join("settings.json")).unwrap();

    let err = store
        .set_display_field("D1", DisplayField::Orientation(Orientation::Rotated90))
        .unwrap_err();
    assert!(matches!(err, PersistenceError::WriteFailed { .. }));
    assert_eq!(store.display("D1").unwrap().orientation, Orientation::Rotated90);
}

#[test]
fn forget_display_removes_the_entry() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = JsonSettingsStore::open(&path).unwrap();
    store.put_display("D1", DisplaySettings::default()).unwrap();

    assert!(store.forget_display("D1").unwrap());
    assert!(!store.forget_display("D1").unwrap());
    assert!(JsonSettingsStore::open(&path).unwrap().display("D1").is_none());
}
