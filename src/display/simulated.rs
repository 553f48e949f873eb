use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::display::{normalize_modes, DisplayBackend, DisplayChange, Mode, Orientation, ScalingMode};
use crate::error::{ApplyStage, BackendError};

/// `DISP_CHANGE_BADMODE`, reported for modes the display does not list.
const BAD_MODE: i32 = -2;
const SCALE_FAILED: i32 = 87;

#[derive(Debug, Clone)]
struct SimulatedDisplay {
    id: String,
    modes: Vec<Mode>,
    /// Native terms, like everything the backend reports.
    mode: Mode,
    orientation: Orientation,
    scaling_mode: ScalingMode,
    dpi_scale: u32,
}

#[derive(Debug, Default)]
struct SimulatedState {
    displays: Vec<SimulatedDisplay>,
    count_override: Option<usize>,
    fail_stage: Option<ApplyStage>,
    applied: Vec<(String, DisplayChange)>,
}

/// In-memory display backend for tests and headless runs.
///
/// Displays can be connected and disconnected at runtime and a stage can be
/// told to fail, so topology and apply paths can be driven without hardware.
#[derive(Debug, Default)]
pub struct SimulatedDisplayBackend {
    state: Mutex<SimulatedState>,
}

impl SimulatedDisplayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`connect`](Self::connect).
    pub fn with_display(self, id: &str, modes: Vec<Mode>) -> Self {
        self.connect(id, modes);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a display. Its current mode is the first of the sorted list.
    /// Reconnecting a known id replaces its mode list.
    pub fn connect(&self, id: &str, modes: Vec<Mode>) {
        let modes = normalize_modes(modes);
        let mode = modes.first().copied().unwrap_or(Mode::new(0, 0, 0, 0));
        let mut state = self.lock();
        state.displays.retain(|d| d.id != id);
        state.displays.push(SimulatedDisplay {
            id: id.to_string(),
            modes,
            mode,
            orientation: Orientation::Normal,
            scaling_mode: ScalingMode::default(),
            dpi_scale: 100,
        });
    }

    pub fn disconnect(&self, id: &str) {
        self.lock().displays.retain(|d| d.id != id);
    }

    /// Make `connected_count` report a fixed value, e.g. 0 while displays sleep.
    pub fn override_connected_count(&self, count: Option<usize>) {
        self.lock().count_override = count;
    }

    pub fn fail_stage(&self, stage: Option<ApplyStage>) {
        self.lock().fail_stage = stage;
    }

    pub fn set_orientation(&self, id: &str, orientation: Orientation) {
        if let Some(display) = self.lock().displays.iter_mut().find(|d| d.id == id) {
            display.orientation = orientation;
        }
    }

    /// Every change that reached the backend, in order.
    pub fn applied(&self) -> Vec<(String, DisplayChange)> {
        self.lock().applied.clone()
    }

    pub fn scale_of(&self, id: &str) -> Option<(ScalingMode, u32)> {
        self.lock()
            .displays
            .iter()
            .find(|d| d.id == id)
            .map(|d| (d.scaling_mode, d.dpi_scale))
    }

    fn with_display_mut<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut SimulatedDisplay) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut state = self.lock();
        let display = state
            .displays
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        f(display)
    }
}

impl DisplayBackend for SimulatedDisplayBackend {
    fn display_ids(&self) -> Vec<String> {
        self.lock().displays.iter().map(|d| d.id.clone()).collect()
    }

    fn modes(&self, id: &str) -> Result<Vec<Mode>, BackendError> {
        self.with_display_mut(id, |d| Ok(d.modes.clone()))
    }

    fn current_mode(&self, id: &str) -> Result<Mode, BackendError> {
        self.with_display_mut(id, |d| Ok(d.mode))
    }

    fn current_orientation(&self, id: &str) -> Result<Orientation, BackendError> {
        self.with_display_mut(id, |d| Ok(d.orientation))
    }

    fn connected_count(&self) -> usize {
        let state = self.lock();
        state.count_override.unwrap_or(state.displays.len())
    }

    fn set_mode(
        &self,
        id: &str,
        mode: &Mode,
        orientation: Orientation,
    ) -> Result<(), BackendError> {
        if self.lock().fail_stage == Some(ApplyStage::Mode) {
            return Err(BackendError::Os {
                call: "set_mode",
                code: BAD_MODE,
            });
        }
        self.with_display_mut(id, |d| {
            let orientation = orientation.resolve(d.orientation);
            let native = if orientation.is_quarter_turn() {
                mode.invert()
            } else {
                *mode
            };
            if !d.modes.contains(&native) {
                return Err(BackendError::Os {
                    call: "set_mode",
                    code: BAD_MODE,
                });
            }
            d.mode = native;
            d.orientation = orientation;
            Ok(())
        })
    }

    fn set_scale(
        &self,
        id: &str,
        scaling_mode: ScalingMode,
        dpi_scale: u32,
    ) -> Result<(), BackendError> {
        if self.lock().fail_stage == Some(ApplyStage::Scale) {
            return Err(BackendError::Os {
                call: "set_scale",
                code: SCALE_FAILED,
            });
        }
        self.with_display_mut(id, |d| {
            d.scaling_mode = scaling_mode;
            d.dpi_scale = dpi_scale;
            Ok(())
        })
    }

    fn set_display(&self, id: &str, change: &DisplayChange) -> Result<(), BackendError> {
        self.lock().applied.push((id.to_string(), *change));
        self.set_mode(id, &change.mode, change.orientation)
            .map_err(|err| err.at(ApplyStage::Mode))?;
        self.set_scale(id, change.scaling_mode, change.dpi_scale)
            .map_err(|err| err.at(ApplyStage::Scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes() -> Vec<Mode> {
        vec![Mode::new(1920, 1080, 60, 32), Mode::new(1280, 720, 60, 32)]
    }

    #[test]
    fn reports_connected_displays_in_connect_order() {
        let backend = SimulatedDisplayBackend::new()
            .with_display("D1", modes())
            .with_display("D2", modes());
        assert_eq!(backend.display_ids(), vec!["D1", "D2"]);
        backend.disconnect("D1");
        assert_eq!(backend.display_ids(), vec!["D2"]);
        assert_eq!(backend.connected_count(), 1);
        backend.override_connected_count(Some(0));
        assert_eq!(backend.connected_count(), 0);
    }

    #[test]
    fn rotated_mode_is_stored_native() {
        let backend = SimulatedDisplayBackend::new().with_display("D1", modes());
        let change = DisplayChange {
            mode: Mode::new(720, 1280, 60, 32),
            orientation: Orientation::Rotated90,
            scaling_mode: ScalingMode::Centered,
            dpi_scale: 150,
        };
        backend.set_display("D1", &change).unwrap();
        assert_eq!(backend.current_mode("D1").unwrap(), Mode::new(1280, 720, 60, 32));
        assert_eq!(backend.current_orientation("D1").unwrap(), Orientation::Rotated90);
        assert_eq!(backend.scale_of("D1"), Some((ScalingMode::Centered, 150)));
    }

    #[test]
    fn scale_failure_is_tagged() {
        let backend = SimulatedDisplayBackend::new().with_display("D1", modes());
        backend.fail_stage(Some(ApplyStage::Scale));
        let change = DisplayChange {
            mode: Mode::new(1280, 720, 60, 32),
            orientation: Orientation::Normal,
            scaling_mode: ScalingMode::default(),
            dpi_scale: 125,
        };
        let err = backend.set_display("D1", &change).unwrap_err();
        assert!(matches!(
            err,
            BackendError::Stage {
                stage: ApplyStage::Scale,
                ..
            }
        ));
        assert_eq!(backend.current_mode("D1").unwrap(), Mode::new(1280, 720, 60, 32));
    }
}
