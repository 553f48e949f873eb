//! The per-display slot tree and every mutation on it.
//!
//! One mutex guards the whole tree. Each mutation validates, updates memory,
//! writes the changed field through to the settings store and, when the set
//! of armed combos may have changed, re-syncs the hotkey engine before the
//! lock is released.

use crate::display::{
    is_valid_dpi_scale, ApplyExecutor, ApplyOutcome, ApplyRequest, Mode, Orientation,
    ScalingMode, TopologyAdapter, DEFAULT_DPI_SCALE,
};
use crate::error::{ApplyError, ConfigurationConflict, PersistenceError, ProfileError};
use crate::hotkey::{is_valid_key_code, HotKey, MAX_HOTKEY_KEYS};
use crate::hotkey_engine::{CaptureResult, HotkeyEngine};
use crate::settings::Settings;
use crate::settings_store::{DisplayField, DisplaySettings, SettingsStore, SlotField, SlotSettings};
use crate::settings_validator::{capture_conflict, sanitize_display, BoundCombo};
use crate::startup::StartupEntry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct Slot {
    /// Native terms.
    pub mode: Mode,
    pub dpi_scale: u32,
    pub orientation: Orientation,
    pub scaling_mode: ScalingMode,
    pub hotkey: Arc<HotKey>,
}

impl Slot {
    /// Default slot: given mode, 100 %, inherit, unbound.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            dpi_scale: DEFAULT_DPI_SCALE,
            orientation: Orientation::Inherit,
            scaling_mode: ScalingMode::default(),
            hotkey: Arc::new(HotKey::unbound()),
        }
    }

    fn from_settings(stored: &SlotSettings, fallback: Mode) -> Self {
        Self {
            mode: stored.mode.unwrap_or(fallback),
            dpi_scale: stored.dpi_scale,
            orientation: stored.orientation,
            scaling_mode: stored.scaling_mode,
            hotkey: Arc::new(HotKey::new(stored.keys.iter().copied())),
        }
    }

    fn to_settings(&self) -> SlotSettings {
        SlotSettings {
            mode: Some(self.mode),
            dpi_scale: self.dpi_scale,
            orientation: self.orientation,
            scaling_mode: self.scaling_mode,
            keys: self.hotkey.codes(),
        }
    }

    fn view(&self) -> SlotView {
        SlotView {
            mode: self.mode,
            dpi_scale: self.dpi_scale,
            orientation: self.orientation,
            scaling_mode: self.scaling_mode,
            keys: self.hotkey.codes(),
            hotkey_label: self.hotkey.label(),
        }
    }
}

/// Outcome of the most recent activation on a display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationStatus {
    pub slot_index: usize,
    pub result: Result<(), ApplyError>,
}

#[derive(Debug)]
pub struct Display {
    pub id: String,
    pub active_slot_count: usize,
    /// Never `Inherit`.
    pub orientation: Orientation,
    pub slots: Vec<Slot>,
    /// Snapshot from the last topology read, for pickers and validation.
    pub supported_modes: Vec<Mode>,
    pub last_activation: Option<ActivationStatus>,
}

impl Display {
    pub fn new(id: &str, orientation: Orientation) -> Self {
        Self {
            id: id.to_string(),
            active_slot_count: 0,
            orientation,
            slots: Vec::new(),
            supported_modes: Vec::new(),
            last_activation: None,
        }
    }

    pub fn active_slots(&self) -> &[Slot] {
        &self.slots[..self.active_slot_count.min(self.slots.len())]
    }

    fn to_settings(&self) -> DisplaySettings {
        DisplaySettings {
            slot_count: self.active_slot_count,
            orientation: self.orientation,
            slots: self.slots.iter().map(Slot::to_settings).collect(),
        }
    }

    fn view(&self) -> DisplayView {
        DisplayView {
            id: self.id.clone(),
            active_slot_count: self.active_slot_count,
            orientation: self.orientation,
            slots: self.slots.iter().map(Slot::view).collect(),
            supported_modes: self.supported_modes.clone(),
            last_activation: self.last_activation.clone(),
        }
    }
}

/// Read-only copy of a slot for collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub mode: Mode,
    pub dpi_scale: u32,
    pub orientation: Orientation,
    pub scaling_mode: ScalingMode,
    pub keys: Vec<u32>,
    pub hotkey_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayView {
    pub id: String,
    pub active_slot_count: usize,
    pub orientation: Orientation,
    pub slots: Vec<SlotView>,
    pub supported_modes: Vec<Mode>,
    pub last_activation: Option<ActivationStatus>,
}

/// What a rebuild changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    pub display_ids: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub conflicts: Vec<ConfigurationConflict>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Bound {
        display_id: String,
        slot_index: usize,
        keys: Vec<u32>,
    },
    /// Nothing was pressed; the previous binding stays.
    Cancelled,
    Rejected {
        display_id: String,
        slot_index: usize,
        conflicting_display: String,
        conflicting_slot: usize,
    },
}

pub struct ProfileModel {
    displays: Mutex<Vec<Display>>,
    topology: TopologyAdapter,
    store: Arc<dyn SettingsStore>,
    engine: Arc<HotkeyEngine>,
    max_slots: usize,
    startup: Option<StartupEntry>,
    persistence: Mutex<Option<PersistenceError>>,
    conflicts: Mutex<Vec<ConfigurationConflict>>,
}

impl ProfileModel {
    /// Build the tree from the connected displays and the stored settings.
    pub fn load(
        topology: TopologyAdapter,
        store: Arc<dyn SettingsStore>,
        engine: Arc<HotkeyEngine>,
    ) -> Self {
        let mut application = store.application();
        application.sanitize();
        let model = Self {
            displays: Mutex::new(Vec::new()),
            topology,
            store,
            engine,
            max_slots: application.max_slots,
            startup: None,
            persistence: Mutex::new(None),
            conflicts: Mutex::new(Vec::new()),
        };
        let diff = model.rebuild();
        tracing::info!(displays = ?diff.display_ids, "profile loaded");
        model
    }

    /// Attach the Startup folder launcher driven by `run_on_startup`.
    pub fn with_startup_entry(mut self, entry: StartupEntry) -> Self {
        self.startup = Some(entry);
        self
    }

    pub fn engine(&self) -> &Arc<HotkeyEngine> {
        &self.engine
    }

    pub fn topology(&self) -> &TopologyAdapter {
        &self.topology
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Display>> {
        self.displays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sync_engine(&self, displays: &[Display]) -> Vec<ConfigurationConflict> {
        let conflicts = self.engine.sync_bindings(displays);
        *self.conflicts.lock().unwrap_or_else(PoisonError::into_inner) = conflicts.clone();
        conflicts
    }

    /// Record the outcome of a write-through. The model keeps the new value
    /// either way.
    fn persisted(&self, result: Result<(), PersistenceError>) {
        let mut status = self.persistence.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(()) => *status = None,
            Err(err) => {
                tracing::warn!(%err, "settings change kept in memory only");
                *status = Some(err);
            }
        }
    }

    // ----- reconciliation -----

    /// Reconcile the tree with the connected displays.
    ///
    /// Surviving displays keep their slots untouched. New displays are
    /// restored from the store or seeded with one default slot. Vanished
    /// displays are dropped from memory; their stored entries stay.
    pub fn rebuild(&self) -> TopologyDiff {
        let ids = self.topology.list_display_ids();
        let mut displays = self.lock();
        let mut previous = std::mem::take(&mut *displays);
        let mut diff = TopologyDiff::default();

        for id in &ids {
            if let Some(pos) = previous.iter().position(|d| &d.id == id) {
                let mut display = previous.remove(pos);
                if let Ok(modes) = self.topology.list_modes(id) {
                    display.supported_modes = modes;
                }
                displays.push(display);
                continue;
            }
            match self.restore_display(id) {
                Ok(display) => {
                    diff.added.push(id.clone());
                    displays.push(display);
                }
                Err(err) => tracing::warn!(display = %id, %err, "display vanished during rebuild"),
            }
        }

        diff.removed = previous.into_iter().map(|d| d.id).collect();
        diff.display_ids = displays.iter().map(|d| d.id.clone()).collect();
        diff.conflicts = self.sync_engine(&displays);
        if !diff.added.is_empty() || !diff.removed.is_empty() {
            tracing::info!(added = ?diff.added, removed = ?diff.removed, "display topology changed");
        }
        diff
    }

    fn restore_display(&self, id: &str) -> Result<Display, ApplyError> {
        let supported_modes = self.topology.list_modes(id)?;
        let current = self.topology.current_mode(id)?;

        let Some(mut stored) = self.store.display(id) else {
            let orientation = self.topology.current_orientation(id)?;
            let mut display = Display::new(id, orientation);
            display.slots.push(Slot::new(current));
            display.active_slot_count = 1;
            display.supported_modes = supported_modes;
            tracing::info!(display = id, mode = %current, "new display, seeding default slot");
            self.persisted(self.store.put_display(id, display.to_settings()));
            return Ok(display);
        };

        if sanitize_display(id, &mut stored, self.max_slots) {
            self.persisted(self.store.put_display(id, stored.clone()));
        }
        let mut display = Display::new(id, stored.orientation);
        display.slots = stored
            .slots
            .iter()
            .map(|s| Slot::from_settings(s, current))
            .collect();
        while display.slots.len() < stored.slot_count {
            display.slots.push(Slot::new(current));
        }
        display.active_slot_count = stored.slot_count;
        display.supported_modes = supported_modes;
        Ok(display)
    }

    // ----- reads -----

    pub fn display_ids(&self) -> Vec<String> {
        self.lock().iter().map(|d| d.id.clone()).collect()
    }

    pub fn display_count(&self) -> usize {
        self.lock().len()
    }

    pub fn index_of(&self, display_id: &str) -> Option<usize> {
        self.lock().iter().position(|d| d.id == display_id)
    }

    pub fn displays(&self) -> Vec<DisplayView> {
        self.lock().iter().map(Display::view).collect()
    }

    pub fn display(&self, display: usize) -> Option<DisplayView> {
        self.lock().get(display).map(Display::view)
    }

    pub fn slot(&self, display: usize, slot: usize) -> Option<SlotView> {
        self.lock().get(display)?.slots.get(slot).map(Slot::view)
    }

    pub fn active_slot_count(&self, display: usize) -> Option<usize> {
        self.lock().get(display).map(|d| d.active_slot_count)
    }

    pub fn last_activation(&self, display: usize) -> Option<ActivationStatus> {
        self.lock().get(display)?.last_activation.clone()
    }

    /// Last write-through failure, cleared by the next successful write.
    pub fn persistence_status(&self) -> Option<PersistenceError> {
        self.persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Identical-combo groups found by the last engine sync.
    pub fn conflicts(&self) -> Vec<ConfigurationConflict> {
        self.conflicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ----- structural mutations -----

    /// Add an active slot seeded from the display's current mode. It goes
    /// right after the active slots, so inactive slots stay inactive and
    /// shift up by one. Returns the new slot index.
    pub fn add_slot(&self, display: usize) -> Result<usize, ProfileError> {
        let mut displays = self.lock();
        let d = displays
            .get_mut(display)
            .ok_or(ProfileError::DisplayIndex(display))?;
        if d.slots.len() >= self.max_slots {
            return Err(ProfileError::SlotLimitReached(self.max_slots));
        }
        let mode = match self.topology.current_mode(&d.id) {
            Ok(mode) => mode,
            Err(err) => d
                .slots
                .first()
                .map(|s| s.mode)
                .or_else(|| d.supported_modes.first().copied())
                .ok_or(ProfileError::Topology(err))?,
        };
        let index = d.active_slot_count.min(d.slots.len());
        d.slots.insert(index, Slot::new(mode));
        d.active_slot_count = index + 1;
        let record = d.to_settings();
        let id = d.id.clone();
        self.persisted(self.store.put_display(&id, record));
        self.sync_engine(&displays);
        Ok(index)
    }

    pub fn remove_slot(&self, display: usize, slot: usize) -> Result<(), ProfileError> {
        let mut displays = self.lock();
        let d = displays
            .get_mut(display)
            .ok_or(ProfileError::DisplayIndex(display))?;
        if slot >= d.slots.len() {
            return Err(ProfileError::SlotIndex { display, slot });
        }
        d.slots.remove(slot);
        if slot < d.active_slot_count {
            d.active_slot_count -= 1;
        }
        let id = d.id.clone();
        let count = d.active_slot_count;
        self.persisted(self.store.remove_slot(&id, slot));
        self.persisted(self.store.set_display_field(&id, DisplayField::SlotCount(count)));
        self.sync_engine(&displays);
        Ok(())
    }

    pub fn set_active_slot_count(&self, display: usize, count: usize) -> Result<(), ProfileError> {
        let mut displays = self.lock();
        let d = displays
            .get_mut(display)
            .ok_or(ProfileError::DisplayIndex(display))?;
        if count > d.slots.len() || count > self.max_slots {
            return Err(ProfileError::ActiveCount {
                requested: count,
                available: d.slots.len().min(self.max_slots),
            });
        }
        d.active_slot_count = count;
        let id = d.id.clone();
        self.persisted(self.store.set_display_field(&id, DisplayField::SlotCount(count)));
        self.sync_engine(&displays);
        Ok(())
    }

    pub fn set_display_orientation(
        &self,
        display: usize,
        orientation: Orientation,
    ) -> Result<(), ProfileError> {
        if !orientation.is_concrete() {
            return Err(ProfileError::InheritDisplayOrientation);
        }
        let mut displays = self.lock();
        let d = displays
            .get_mut(display)
            .ok_or(ProfileError::DisplayIndex(display))?;
        d.orientation = orientation;
        let id = d.id.clone();
        self.persisted(
            self.store
                .set_display_field(&id, DisplayField::Orientation(orientation)),
        );
        Ok(())
    }

    // ----- slot fields -----

    fn with_slot<T>(
        &self,
        display: usize,
        slot: usize,
        f: impl FnOnce(&mut Display, usize) -> Result<T, ProfileError>,
    ) -> Result<T, ProfileError> {
        let mut displays = self.lock();
        let d = displays
            .get_mut(display)
            .ok_or(ProfileError::DisplayIndex(display))?;
        if slot >= d.slots.len() {
            return Err(ProfileError::SlotIndex { display, slot });
        }
        f(d, slot)
    }

    /// Select a mode for a slot. It must be one the display currently lists.
    pub fn set_slot_mode(&self, display: usize, slot: usize, mode: Mode) -> Result<(), ProfileError> {
        self.with_slot(display, slot, |d, slot| {
            let modes = self.topology.list_modes(&d.id)?;
            d.supported_modes = modes;
            if !d.supported_modes.contains(&mode) {
                return Err(ProfileError::ModeUnsupported {
                    display_id: d.id.clone(),
                    mode,
                });
            }
            d.slots[slot].mode = mode;
            self.persisted(self.store.set_slot_field(&d.id, slot, SlotField::Mode(mode)));
            Ok(())
        })
    }

    pub fn set_slot_scale(&self, display: usize, slot: usize, dpi_scale: u32) -> Result<(), ProfileError> {
        if !is_valid_dpi_scale(dpi_scale) {
            return Err(ProfileError::InvalidScale(dpi_scale));
        }
        self.with_slot(display, slot, |d, slot| {
            d.slots[slot].dpi_scale = dpi_scale;
            self.persisted(
                self.store
                    .set_slot_field(&d.id, slot, SlotField::DpiScale(dpi_scale)),
            );
            Ok(())
        })
    }

    pub fn set_slot_orientation(
        &self,
        display: usize,
        slot: usize,
        orientation: Orientation,
    ) -> Result<(), ProfileError> {
        self.with_slot(display, slot, |d, slot| {
            d.slots[slot].orientation = orientation;
            self.persisted(
                self.store
                    .set_slot_field(&d.id, slot, SlotField::Orientation(orientation)),
            );
            Ok(())
        })
    }

    pub fn set_slot_scaling_mode(
        &self,
        display: usize,
        slot: usize,
        scaling_mode: ScalingMode,
    ) -> Result<(), ProfileError> {
        self.with_slot(display, slot, |d, slot| {
            d.slots[slot].scaling_mode = scaling_mode;
            self.persisted(
                self.store
                    .set_slot_field(&d.id, slot, SlotField::ScalingMode(scaling_mode)),
            );
            Ok(())
        })
    }

    // ----- hotkeys -----

    /// Bind a slot to a key combo. An empty list unbinds it. The old combo is
    /// out of the engine's dispatch table when this returns.
    pub fn bind_hotkey(&self, display: usize, slot: usize, keys: &[u32]) -> Result<(), ProfileError> {
        let codes = normalize_keys(keys)?;
        let mut displays = self.lock();
        self.bind_locked(&mut displays, display, slot, codes)
    }

    fn bind_locked(
        &self,
        displays: &mut [Display],
        display: usize,
        slot: usize,
        codes: Vec<u32>,
    ) -> Result<(), ProfileError> {
        let d = displays
            .get_mut(display)
            .ok_or(ProfileError::DisplayIndex(display))?;
        if slot >= d.slots.len() {
            return Err(ProfileError::SlotIndex { display, slot });
        }
        d.slots[slot].hotkey = Arc::new(HotKey::new(codes.iter().copied()));
        let id = d.id.clone();
        tracing::debug!(display = %id, slot, keys = ?codes, "hotkey bound");
        self.persisted(self.store.set_slot_field(&id, slot, SlotField::Keys(codes)));
        self.sync_engine(displays);
        Ok(())
    }

    pub fn clear_hotkey(&self, display: usize, slot: usize) -> Result<(), ProfileError> {
        self.bind_hotkey(display, slot, &[])
    }

    /// Unbind every slot of a display.
    pub fn clear_all_hotkeys(&self, display: usize) -> Result<(), ProfileError> {
        let mut displays = self.lock();
        let d = displays
            .get_mut(display)
            .ok_or(ProfileError::DisplayIndex(display))?;
        let id = d.id.clone();
        for (index, slot) in d.slots.iter_mut().enumerate() {
            if slot.hotkey.is_bound() {
                slot.hotkey = Arc::new(HotKey::unbound());
                self.persisted(self.store.set_slot_field(&id, index, SlotField::Keys(Vec::new())));
            }
        }
        self.sync_engine(&displays);
        Ok(())
    }

    /// Validate a finished capture against the other bound slots and bind it.
    /// The display is resolved by id, so a rebuild since the capture started
    /// cannot redirect the combo to another display.
    pub fn commit_capture(&self, capture: &CaptureResult) -> Result<CaptureOutcome, ProfileError> {
        if capture.keys.is_empty() {
            return Ok(CaptureOutcome::Cancelled);
        }
        let codes = normalize_keys(&capture.keys)?;

        let mut displays = self.lock();
        let display = displays
            .iter()
            .position(|d| d.id == capture.display_id)
            .ok_or_else(|| ProfileError::Topology(ApplyError::DisplayNotFound(capture.display_id.clone())))?;

        let mut bound = Vec::new();
        for (display_index, d) in displays.iter().enumerate() {
            for (slot_index, slot) in d.slots.iter().enumerate() {
                bound.push(BoundCombo {
                    display_index,
                    slot_index,
                    keys: slot.hotkey.key_set(),
                });
            }
        }

        let candidate = codes.iter().copied().collect();
        if let Some((other_display, other_slot)) =
            capture_conflict(&candidate, display, capture.slot_index, &bound)
        {
            let conflicting_display = displays
                .get(other_display)
                .map(|d| d.id.clone())
                .unwrap_or_default();
            tracing::info!(
                display = %capture.display_id,
                slot = capture.slot_index,
                conflicting_display = %conflicting_display,
                conflicting_slot = other_slot,
                "captured hotkey rejected"
            );
            return Ok(CaptureOutcome::Rejected {
                display_id: capture.display_id.clone(),
                slot_index: capture.slot_index,
                conflicting_display,
                conflicting_slot: other_slot,
            });
        }

        self.bind_locked(&mut displays, display, capture.slot_index, codes)?;
        Ok(CaptureOutcome::Bound {
            display_id: capture.display_id.clone(),
            slot_index: capture.slot_index,
            keys: capture.keys.clone(),
        })
    }

    // ----- activation -----

    /// Snapshot everything needed to apply a slot. `None` when the display is
    /// gone or the slot is no longer active.
    pub fn activation_request(&self, display_id: &str, slot: usize) -> Option<ApplyRequest> {
        let displays = self.lock();
        let d = displays.iter().find(|d| d.id == display_id)?;
        let s = d.active_slots().get(slot)?;
        Some(ApplyRequest {
            display_id: d.id.clone(),
            mode: s.mode,
            orientation: s.orientation.resolve(d.orientation),
            scaling_mode: s.scaling_mode,
            dpi_scale: s.dpi_scale,
        })
    }

    /// Apply a slot and record the result on its display. The tree lock is
    /// not held while the OS call runs.
    pub fn activate(
        &self,
        executor: &ApplyExecutor,
        display_id: &str,
        slot: usize,
    ) -> Result<ApplyOutcome, ApplyError> {
        let request = self
            .activation_request(display_id, slot)
            .ok_or_else(|| ApplyError::DisplayNotFound(display_id.to_string()))?;
        let result = executor.apply(&request);
        self.record_activation(display_id, slot, result.clone().map(|_| ()));
        result
    }

    pub fn record_activation(&self, display_id: &str, slot: usize, result: Result<(), ApplyError>) {
        let mut displays = self.lock();
        if let Some(d) = displays.iter_mut().find(|d| d.id == display_id) {
            d.last_activation = Some(ActivationStatus {
                slot_index: slot,
                result,
            });
        }
    }

    // ----- application flags -----

    pub fn application(&self) -> Settings {
        self.store.application()
    }

    fn update_application(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self.store.application();
        f(&mut settings);
        self.persisted(self.store.set_application(settings));
    }

    pub fn set_dark_mode(&self, enabled: bool) {
        self.update_application(|s| s.dark_mode = enabled);
    }

    pub fn set_minimize_to_tray(&self, enabled: bool) {
        self.update_application(|s| s.minimize_to_tray = enabled);
    }

    /// Store the flag and create or remove the Startup folder launcher.
    pub fn set_run_on_startup(&self, enabled: bool) -> anyhow::Result<()> {
        self.update_application(|s| s.run_on_startup = enabled);
        match &self.startup {
            Some(entry) => entry.sync(enabled),
            None => Ok(()),
        }
    }
}

/// Validate key codes, drop repeats and enforce the combo size limit.
fn normalize_keys(keys: &[u32]) -> Result<Vec<u32>, ProfileError> {
    let mut codes: Vec<u32> = Vec::with_capacity(keys.len());
    for &code in keys {
        if !is_valid_key_code(code) {
            return Err(ProfileError::InvalidKeyCode(code));
        }
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    if codes.len() > MAX_HOTKEY_KEYS {
        return Err(ProfileError::TooManyKeys {
            max: MAX_HOTKEY_KEYS,
            got: codes.len(),
        });
    }
    Ok(codes)
}
