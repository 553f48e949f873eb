use crate::error::{ConfigurationConflict, EngineError};
use crate::hotkey::{is_valid_key_code, ComboTransition, HotKey, MAX_HOTKEY_KEYS};
use crate::key_source::KeyEvent;
use crate::profile::Display;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// A capture with no keys pressed for this long is abandoned.
pub const CAPTURE_IDLE_TIMEOUT: Duration = Duration::from_millis(2500);

/// A registered slot combo. The `HotKey` is shared with the profile tree.
#[derive(Debug, Clone)]
pub struct Binding {
    pub display_index: usize,
    pub display_id: String,
    pub slot_index: usize,
    pub hotkey: Arc<HotKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    /// A slot combo fired.
    Activate {
        display_index: usize,
        display_id: String,
        slot_index: usize,
    },
    /// A shadowed combo was pressed; only the first slot of the group fired.
    Conflict(ConfigurationConflict),
    /// Capture ended. `keys` is empty when it was cancelled.
    CaptureFinished(CaptureResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub display_index: usize,
    pub display_id: String,
    pub slot_index: usize,
    pub keys: Vec<u32>,
}

#[derive(Debug, Default)]
struct Dispatch {
    /// Ordered by `(display_index, slot_index)`.
    bindings: Vec<Binding>,
    by_code: HashMap<u32, Vec<usize>>,
    /// Binding index -> conflict group for bindings that never fire.
    shadowed: HashMap<usize, ConfigurationConflict>,
}

#[derive(Debug)]
struct Capture {
    display_index: usize,
    display_id: String,
    slot_index: usize,
    keys: Vec<u32>,
    last_input: Instant,
}

impl Capture {
    fn finish(self) -> CaptureResult {
        CaptureResult {
            display_index: self.display_index,
            display_id: self.display_id,
            slot_index: self.slot_index,
            keys: self.keys,
        }
    }
}

/// Turns raw key events into slot activations.
///
/// The dispatch table is only written by [`sync_bindings`](Self::sync_bindings),
/// which the profile model calls while it holds its tree lock. Key handling
/// takes read access only and never touches the profile tree.
#[derive(Debug, Default)]
pub struct HotkeyEngine {
    dispatch: RwLock<Dispatch>,
    capture: Mutex<Option<Capture>>,
}

impl HotkeyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn capture_lock(&self) -> MutexGuard<'_, Option<Capture>> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the dispatch table with the bound hotkeys of all active slots.
    ///
    /// Combos that dropped out of the table have their latch cleared. Groups
    /// of identical combos are returned; within a group only the lowest
    /// `(display, slot)` stays armed.
    pub fn sync_bindings(&self, displays: &[Display]) -> Vec<ConfigurationConflict> {
        let mut bindings = Vec::new();
        for (display_index, display) in displays.iter().enumerate() {
            for (slot_index, slot) in display.active_slots().iter().enumerate() {
                if slot.hotkey.is_bound() {
                    bindings.push(Binding {
                        display_index,
                        display_id: display.id.clone(),
                        slot_index,
                        hotkey: Arc::clone(&slot.hotkey),
                    });
                }
            }
        }

        let mut by_code: HashMap<u32, Vec<usize>> = HashMap::new();
        let mut groups: BTreeMap<BTreeSet<u32>, Vec<usize>> = BTreeMap::new();
        for (index, binding) in bindings.iter().enumerate() {
            let keys = binding.hotkey.key_set();
            for code in &keys {
                by_code.entry(*code).or_default().push(index);
            }
            groups.entry(keys).or_default().push(index);
        }

        let mut shadowed = HashMap::new();
        let mut conflicts = Vec::new();
        for (keys, members) in groups {
            if members.len() < 2 {
                continue;
            }
            let conflict = ConfigurationConflict {
                keys: keys.into_iter().collect(),
                slots: members
                    .iter()
                    .map(|i| (bindings[*i].display_id.clone(), bindings[*i].slot_index))
                    .collect(),
            };
            tracing::warn!(%conflict, "identical hotkeys bound to several slots");
            for index in members.iter().skip(1) {
                shadowed.insert(*index, conflict.clone());
            }
            conflicts.push(conflict);
        }

        let mut dispatch = self.dispatch.write().unwrap_or_else(PoisonError::into_inner);
        let kept: HashSet<*const HotKey> = bindings.iter().map(|b| Arc::as_ptr(&b.hotkey)).collect();
        for old in dispatch.bindings.iter() {
            if !kept.contains(&Arc::as_ptr(&old.hotkey)) {
                old.hotkey.release_all();
            }
        }
        tracing::debug!(bindings = bindings.len(), "hotkey bindings synced");
        *dispatch = Dispatch {
            bindings,
            by_code,
            shadowed,
        };
        conflicts
    }

    /// Registered bindings in firing priority order.
    pub fn bindings(&self) -> Vec<Binding> {
        self.dispatch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bindings
            .clone()
    }

    /// Feed one key event. Signals come back in firing order.
    pub fn handle_key(&self, event: KeyEvent) -> Vec<EngineSignal> {
        let (code, down) = match event {
            KeyEvent::Down(code) => (code, true),
            KeyEvent::Up(code) => (code, false),
        };

        let mut capture = self.capture_lock();
        let capturing = capture.is_some();
        let mut signals = Vec::new();

        if let Some(active) = capture.as_mut() {
            if is_valid_key_code(code) {
                active.last_input = Instant::now();
                if down {
                    if active.keys.len() < MAX_HOTKEY_KEYS && !active.keys.contains(&code) {
                        active.keys.push(code);
                    }
                } else if active.keys.contains(&code) {
                    if let Some(done) = capture.take() {
                        tracing::debug!(keys = ?done.keys, "hotkey capture finished");
                        signals.push(EngineSignal::CaptureFinished(done.finish()));
                    }
                }
            }
        }
        drop(capture);

        let dispatch = self.dispatch.read().unwrap_or_else(PoisonError::into_inner);
        let Some(indices) = dispatch.by_code.get(&code) else {
            return signals;
        };
        for &index in indices {
            let binding = &dispatch.bindings[index];
            if binding.hotkey.set_key_pressed(code, down) != ComboTransition::Fired {
                continue;
            }
            if capturing {
                continue;
            }
            if let Some(conflict) = dispatch.shadowed.get(&index) {
                tracing::warn!(
                    display = %binding.display_id,
                    slot = binding.slot_index,
                    "shadowed hotkey pressed"
                );
                signals.push(EngineSignal::Conflict(conflict.clone()));
                continue;
            }
            tracing::debug!(
                display = %binding.display_id,
                slot = binding.slot_index,
                hotkey = %binding.hotkey,
                "hotkey fired"
            );
            signals.push(EngineSignal::Activate {
                display_index: binding.display_index,
                display_id: binding.display_id.clone(),
                slot_index: binding.slot_index,
            });
        }
        signals
    }

    /// Start recording a new combo for a slot. Activations are suppressed
    /// until the capture ends.
    pub fn begin_capture(
        &self,
        display_index: usize,
        display_id: &str,
        slot_index: usize,
    ) -> Result<(), EngineError> {
        let mut capture = self.capture_lock();
        if capture.is_some() {
            return Err(EngineError::CaptureInProgress);
        }
        tracing::debug!(display = display_id, slot = slot_index, "hotkey capture started");
        *capture = Some(Capture {
            display_index,
            display_id: display_id.to_string(),
            slot_index,
            keys: Vec::new(),
            last_input: Instant::now(),
        });
        Ok(())
    }

    pub fn cancel_capture(&self) -> bool {
        self.capture_lock().take().is_some()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_lock().is_some()
    }

    /// Abandon a capture that has seen no keys for [`CAPTURE_IDLE_TIMEOUT`].
    pub fn expire_capture(&self, now: Instant) -> Option<EngineSignal> {
        let mut capture = self.capture_lock();
        let idle = capture.as_ref().is_some_and(|c| {
            c.keys.is_empty() && now.saturating_duration_since(c.last_input) >= CAPTURE_IDLE_TIMEOUT
        });
        if !idle {
            return None;
        }
        let expired = capture.take()?;
        tracing::debug!(display = %expired.display_id, slot = expired.slot_index, "hotkey capture timed out");
        Some(EngineSignal::CaptureFinished(expired.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{Mode, Orientation};
    use crate::profile::Slot;

    fn display(id: &str, combos: &[&[u32]]) -> Display {
        let mut display = Display::new(id, Orientation::Normal);
        for keys in combos {
            let mut slot = Slot::new(Mode::new(1920, 1080, 60, 32));
            slot.hotkey = Arc::new(HotKey::new(keys.iter().copied()));
            display.slots.push(slot);
        }
        display.active_slot_count = display.slots.len();
        display
    }

    fn press(engine: &HotkeyEngine, codes: &[u32]) -> Vec<EngineSignal> {
        codes
            .iter()
            .flat_map(|c| engine.handle_key(KeyEvent::Down(*c)))
            .collect()
    }

    #[test]
    fn only_active_bound_slots_are_registered() {
        let engine = HotkeyEngine::new();
        let mut d = display("D1", &[&[65], &[], &[66]]);
        d.active_slot_count = 2;
        engine.sync_bindings(&[d]);
        let bindings = engine.bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].slot_index, 0);
    }

    #[test]
    fn identical_combos_fire_lowest_slot_and_report() {
        let engine = HotkeyEngine::new();
        let displays = [display("D1", &[&[162, 49]]), display("D2", &[&[49, 162]])];
        let conflicts = engine.sync_bindings(&displays);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].slots,
            vec![("D1".to_string(), 0), ("D2".to_string(), 0)]
        );

        let signals = press(&engine, &[162, 49]);
        assert_eq!(
            signals,
            vec![
                EngineSignal::Activate {
                    display_index: 0,
                    display_id: "D1".into(),
                    slot_index: 0
                },
                EngineSignal::Conflict(conflicts[0].clone()),
            ]
        );
    }

    #[test]
    fn capture_suppresses_activation_and_ends_on_release() {
        let engine = HotkeyEngine::new();
        engine.sync_bindings(&[display("D1", &[&[162, 49]])]);
        engine.begin_capture(0, "D1", 0).unwrap();
        assert_eq!(engine.begin_capture(0, "D1", 0), Err(EngineError::CaptureInProgress));

        assert!(press(&engine, &[162, 49, 255, 50, 51]).is_empty());
        let signals = engine.handle_key(KeyEvent::Up(49));
        assert_eq!(
            signals,
            vec![EngineSignal::CaptureFinished(CaptureResult {
                display_index: 0,
                display_id: "D1".into(),
                slot_index: 0,
                keys: vec![162, 49, 50],
            })]
        );
        assert!(!engine.is_capturing());
    }

    #[test]
    fn idle_capture_expires_only_without_keys() {
        let engine = HotkeyEngine::new();
        engine.begin_capture(0, "D1", 0).unwrap();
        assert!(engine.expire_capture(Instant::now()).is_none());
        let later = Instant::now() + CAPTURE_IDLE_TIMEOUT;
        match engine.expire_capture(later) {
            Some(EngineSignal::CaptureFinished(result)) => assert!(result.keys.is_empty()),
            other => panic!("unexpected {other:?}"),
        }

        engine.begin_capture(0, "D1", 0).unwrap();
        engine.handle_key(KeyEvent::Down(65));
        assert!(engine
            .expire_capture(Instant::now() + CAPTURE_IDLE_TIMEOUT * 2)
            .is_none());
    }

    #[test]
    fn deregistered_combo_loses_latch() {
        let engine = HotkeyEngine::new();
        let d = display("D1", &[&[65]]);
        let hotkey = Arc::clone(&d.slots[0].hotkey);
        engine.sync_bindings(std::slice::from_ref(&d));
        press(&engine, &[65]);
        assert!(hotkey.is_held_down());
        engine.sync_bindings(&[]);
        assert!(!hotkey.is_held_down());
        assert!(press(&engine, &[65]).is_empty());
    }
}
