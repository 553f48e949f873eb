use display_hotkeys::display::{Mode, Orientation, SimulatedDisplayBackend, TopologyAdapter};
use display_hotkeys::error::PersistenceError;
use display_hotkeys::hotkey::vk;
use display_hotkeys::hotkey_engine::HotkeyEngine;
use display_hotkeys::settings_store::{JsonSettingsStore, MemorySettingsStore, SettingsStore};
use display_hotkeys::ProfileModel;
use std::sync::Arc;
use tempfile::tempdir;

fn full_hd() -> Mode {
    Mode::new(1920, 1080, 60, 32)
}

fn hd() -> Mode {
    Mode::new(1280, 720, 60, 32)
}

fn two_displays() -> Arc<SimulatedDisplayBackend> {
    Arc::new(
        SimulatedDisplayBackend::new()
            .with_display("D1", vec![full_hd(), hd()])
            .with_display("D2", vec![full_hd()]),
    )
}

fn load(backend: &Arc<SimulatedDisplayBackend>, store: Arc<dyn SettingsStore>) -> ProfileModel {
    ProfileModel::load(
        TopologyAdapter::new(backend.clone()),
        store,
        Arc::new(HotkeyEngine::new()),
    )
}

#[test]
fn rebuild_exposes_exactly_the_connected_displays() {
    let backend = two_displays();
    let model = load(&backend, Arc::new(MemorySettingsStore::new()));
    assert_eq!(model.display_ids(), vec!["D1".to_string(), "D2".to_string()]);

    backend.connect("D3", vec![hd()]);
    let diff = model.rebuild();
    assert_eq!(diff.added, vec!["D3".to_string()]);
    assert!(diff.removed.is_empty());
    assert_eq!(model.display_ids(), vec!["D1", "D2", "D3"]);

    backend.disconnect("D2");
    let diff = model.rebuild();
    assert_eq!(diff.removed, vec!["D2".to_string()]);
    assert_eq!(model.display_ids(), diff.display_ids);
    assert_eq!(model.display_ids(), vec!["D1", "D3"]);
}

#[test]
fn surviving_display_keeps_its_bindings() {
    let backend = two_displays();
    let model = load(&backend, Arc::new(MemorySettingsStore::new()));
    model.bind_hotkey(1, 0, &[vk::LEFT_CONTROL, vk::LEFT_ALT, 0x32]).unwrap();

    backend.disconnect("D1");
    model.rebuild();

    let index = model.index_of("D2").unwrap();
    assert_eq!(model.slot(index, 0).unwrap().hotkey_label, "Ctrl + Alt + 2");
    let bindings = model.engine().bindings();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].display_id, "D2");
    assert_eq!(bindings[0].display_index, index);
}

#[test]
fn reconnected_display_is_restored_from_the_store() {
    let backend = two_displays();
    let store = Arc::new(MemorySettingsStore::new());
    let model = load(&backend, store.clone());
    model.set_slot_mode(0, 0, hd()).unwrap();
    model.set_slot_scale(0, 0, 125).unwrap();
    model.bind_hotkey(0, 0, &[vk::LEFT_CONTROL, vk::LEFT_ALT, 0x31]).unwrap();

    backend.disconnect("D1");
    model.rebuild();
    assert_eq!(model.index_of("D1"), None);
    assert!(model.engine().bindings().iter().all(|b| b.display_id != "D1"));
    assert!(store.display("D1").is_some(), "stored entry must survive a disconnect");

    backend.connect("D1", vec![full_hd(), hd()]);
    let diff = model.rebuild();
    assert_eq!(diff.added, vec!["D1".to_string()]);

    let index = model.index_of("D1").unwrap();
    let slot = model.slot(index, 0).unwrap();
    assert_eq!(slot.mode, hd());
    assert_eq!(slot.dpi_scale, 125);
    assert_eq!(slot.keys, vec![vk::LEFT_CONTROL, vk::LEFT_ALT, 0x31]);
    assert!(model
        .engine()
        .bindings()
        .iter()
        .any(|b| b.display_id == "D1" && b.slot_index == 0));
}

#[test]
fn stored_entry_is_sanitized_on_load() {
    let backend = two_displays();
    let store = Arc::new(MemorySettingsStore::new());
    {
        let model = load(&backend, store.clone());
        model.add_slot(0).unwrap();
    }
    let mut stored = store.display("D1").unwrap();
    stored.orientation = Orientation::Inherit;
    stored.slots[1].dpi_scale = 110;
    stored.slots[1].keys = vec![255, 0x41, 0x41];
    store.put_display("D1", stored).unwrap();

    let model = load(&backend, store.clone());
    let view = model.display(0).unwrap();
    assert_eq!(view.orientation, Orientation::Normal);
    assert_eq!(view.slots[1].dpi_scale, 100);
    assert_eq!(view.slots[1].keys, vec![0x41]);
    assert_eq!(store.slot("D1", 1).unwrap().keys, vec![0x41]);
}

#[test]
fn failed_write_keeps_the_change_and_reports_it() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not_a_folder");
    std::fs::write(&blocker, "x").unwrap();
    let store = Arc::new(JsonSettingsStore::open(blocker.join("settings.json")).unwrap());

    let backend = two_displays();
    let model = load(&backend, store);
    assert!(matches!(
        model.persistence_status(),
        Some(PersistenceError::WriteFailed { .. })
    ));

    model.set_slot_scale(0, 0, 150).unwrap();
    assert_eq!(model.slot(0, 0).unwrap().dpi_scale, 150);
    assert!(model.persistence_status().is_some());
}

#[test]
fn next_successful_write_persists_the_earlier_failed_change() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not_a_folder");
    std::fs::write(&blocker, "x").unwrap();
    let path = blocker.join("settings.json");
    let store = Arc::new(JsonSettingsStore::open(&path).unwrap());

    let backend = two_displays();
    let model = load(&backend, store);
    model.set_slot_scale(0, 0, 150).unwrap();
    assert!(model.persistence_status().is_some());

    std::fs::remove_file(&blocker).unwrap();
    model.set_dark_mode(true);
    assert_eq!(model.persistence_status(), None);

    let reopened = JsonSettingsStore::open(&path).unwrap();
    assert_eq!(reopened.slot("D1", 0).unwrap().dpi_scale, 150);
    assert!(reopened.application().dark_mode);
    assert_eq!(reopened.display_ids(), vec!["D1".to_string(), "D2".to_string()]);
}
