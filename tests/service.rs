use display_hotkeys::display::{DisplayBackend, Mode, SimulatedDisplayBackend, TopologyAdapter};
use display_hotkeys::hotkey::vk;
use display_hotkeys::hotkey_engine::HotkeyEngine;
use display_hotkeys::key_source::{KeyEvent, SimulatedKeyHandle, SimulatedKeySource};
use display_hotkeys::settings_store::MemorySettingsStore;
use display_hotkeys::{EventSink, HotkeyService, ProfileModel, ServiceEvent};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const ONE: u32 = 0x31;
const TWO: u32 = 0x32;

#[derive(Default)]
struct RecordingSink {
    events: Arc<Mutex<Vec<ServiceEvent>>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<ServiceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn wait_for(&self, pred: impl Fn(&ServiceEvent) -> bool) -> Option<ServiceEvent> {
        for _ in 0..200 {
            if let Some(event) = self.events().into_iter().find(|e| pred(e)) {
                return Some(event);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }
}

impl EventSink for RecordingSink {
    fn dispatch(&self, event: ServiceEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

struct Fixture {
    backend: Arc<SimulatedDisplayBackend>,
    sink: Arc<RecordingSink>,
    keys: SimulatedKeyHandle,
    service: HotkeyService,
}

fn fixture() -> Fixture {
    let backend = Arc::new(SimulatedDisplayBackend::new().with_display(
        "D1",
        vec![Mode::new(1920, 1080, 60, 32), Mode::new(1280, 720, 60, 32)],
    ));
    let profile = Arc::new(ProfileModel::load(
        TopologyAdapter::new(backend.clone()),
        Arc::new(MemorySettingsStore::new()),
        Arc::new(HotkeyEngine::new()),
    ));
    let (source, keys) = SimulatedKeySource::new();
    let sink = Arc::new(RecordingSink::default());
    let service = HotkeyService::new(
        profile,
        Box::new(source),
        sink.clone(),
        Duration::from_millis(20),
    );
    Fixture {
        backend,
        sink,
        keys,
        service,
    }
}

#[test]
fn start_stop_idempotent() {
    let mut f = fixture();
    f.service.start().unwrap();
    f.service.start().unwrap();
    assert!(f.service.is_running());
    assert_eq!(f.keys.install_count(), 1);

    f.service.stop();
    f.service.stop();
    assert!(!f.service.is_running());
    assert_eq!(f.keys.uninstall_count(), 1);
    assert!(!f.keys.press(ONE));
}

#[test]
fn pressed_combo_applies_the_slot() {
    let mut f = fixture();
    let profile = f.service.profile().clone();
    profile.add_slot(0).unwrap();
    profile.set_slot_mode(0, 1, Mode::new(1280, 720, 60, 32)).unwrap();
    profile.bind_hotkey(0, 1, &[vk::LEFT_CONTROL, vk::LEFT_ALT, TWO]).unwrap();
    f.service.start().unwrap();

    assert!(f.keys.tap_combo(&[vk::LEFT_CONTROL, vk::LEFT_ALT, TWO]));
    let event = f
        .sink
        .wait_for(|e| matches!(e, ServiceEvent::SlotActivated { .. }))
        .expect("slot was not activated");
    let ServiceEvent::SlotActivated {
        display_id,
        slot_index,
        result,
    } = event
    else {
        unreachable!();
    };
    assert_eq!(display_id, "D1");
    assert_eq!(slot_index, 1);
    assert!(result.is_ok());
    assert_eq!(f.backend.current_mode("D1").unwrap(), Mode::new(1280, 720, 60, 32));
    f.service.stop();
}

#[test]
fn holding_modifiers_does_not_repeat_activation() {
    let f = fixture();
    let profile = f.service.profile().clone();
    profile.bind_hotkey(0, 0, &[vk::LEFT_CONTROL, vk::LEFT_ALT, ONE]).unwrap();

    for event in [
        KeyEvent::Down(vk::LEFT_CONTROL),
        KeyEvent::Down(vk::LEFT_ALT),
        KeyEvent::Down(ONE),
        KeyEvent::Up(ONE),
        KeyEvent::Down(ONE),
        KeyEvent::Up(ONE),
    ] {
        f.service.process_key(event);
    }
    let activations = f
        .sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, ServiceEvent::SlotActivated { .. }))
        .count();
    assert_eq!(activations, 1);
    assert_eq!(profile.last_activation(0).unwrap().slot_index, 0);
}

#[test]
fn capture_binds_the_recorded_combo() {
    let mut f = fixture();
    f.service.start().unwrap();
    f.service.begin_capture(0, 0).unwrap();

    assert!(f.keys.tap_combo(&[vk::LEFT_CONTROL, vk::LEFT_SHIFT, TWO]));
    let event = f
        .sink
        .wait_for(|e| matches!(e, ServiceEvent::HotkeyCaptured { .. }))
        .expect("capture did not finish");
    assert_eq!(
        event,
        ServiceEvent::HotkeyCaptured {
            display_id: "D1".into(),
            slot_index: 0,
            keys: vec![vk::LEFT_CONTROL, vk::LEFT_SHIFT, TWO],
        }
    );
    assert!(f
        .sink
        .events()
        .iter()
        .all(|e| !matches!(e, ServiceEvent::SlotActivated { .. })));

    assert!(f.keys.tap_combo(&[vk::LEFT_CONTROL, vk::LEFT_SHIFT, TWO]));
    assert!(f
        .sink
        .wait_for(|e| matches!(e, ServiceEvent::SlotActivated { .. }))
        .is_some());
    f.service.stop();
}

#[test]
fn idle_capture_is_cancelled_on_tick() {
    let f = fixture();
    f.service.profile().bind_hotkey(0, 0, &[vk::LEFT_CONTROL, ONE]).unwrap();
    f.service.begin_capture(0, 0).unwrap();
    assert!(f.service.begin_capture(0, 0).is_err());
    assert!(f.service.begin_capture(5, 0).is_err());

    f.service.tick(Instant::now() + Duration::from_secs(3));
    assert_eq!(
        f.sink.events(),
        vec![ServiceEvent::HotkeyCaptureCancelled {
            display_id: "D1".into(),
            slot_index: 0,
        }]
    );
    assert_eq!(f.service.profile().slot(0, 0).unwrap().keys, vec![vk::LEFT_CONTROL, ONE]);
}

#[test]
fn new_display_triggers_a_rebuild() {
    let mut f = fixture();
    f.service.start().unwrap();
    f.backend.connect("D2", vec![Mode::new(2560, 1440, 144, 32)]);

    let event = f
        .sink
        .wait_for(|e| matches!(e, ServiceEvent::TopologyChanged { .. }))
        .expect("topology change was not reported");
    assert_eq!(
        event,
        ServiceEvent::TopologyChanged {
            display_ids: vec!["D1".into(), "D2".into()],
            added: vec!["D2".into()],
            removed: vec![],
        }
    );
    assert_eq!(f.service.profile().display_count(), 2);
    f.service.stop();
}

#[test]
fn manual_refresh_rebuilds_while_polling_is_suspended() {
    let f = fixture();
    f.service.suspend_polling();
    f.backend.connect("D2", vec![Mode::new(2560, 1440, 144, 32)]);
    f.service.refresh_topology();
    assert_eq!(f.service.profile().display_ids(), vec!["D1", "D2"]);
    assert!(f
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, ServiceEvent::TopologyChanged { added, .. } if added == &["D2"])));
    f.service.resume_polling();
}
