use crate::display::{Mode, Orientation, ScalingMode};
use crate::error::{ApplyStage, BackendError};

/// Everything submitted to the OS for one slot activation.
///
/// `mode` is what the OS receives: already inverted when `orientation` is a
/// quarter turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayChange {
    pub mode: Mode,
    pub orientation: Orientation,
    pub scaling_mode: ScalingMode,
    pub dpi_scale: u32,
}

/// Host display configuration API.
///
/// Ids are stable opaque strings. Modes are reported in native terms even
/// when the display is currently rotated.
pub trait DisplayBackend: Send + Sync {
    fn display_ids(&self) -> Vec<String>;
    fn modes(&self, id: &str) -> Result<Vec<Mode>, BackendError>;
    fn current_mode(&self, id: &str) -> Result<Mode, BackendError>;
    fn current_orientation(&self, id: &str) -> Result<Orientation, BackendError>;

    fn connected_count(&self) -> usize {
        self.display_ids().len()
    }

    /// Submit resolution, refresh rate, depth and rotation. `mode` is in
    /// submitted (possibly inverted) terms.
    fn set_mode(&self, id: &str, mode: &Mode, orientation: Orientation)
        -> Result<(), BackendError>;

    fn set_scale(&self, id: &str, scaling_mode: ScalingMode, dpi_scale: u32)
        -> Result<(), BackendError>;

    /// Apply a full change. The default submits the mode first and then the
    /// scaling; errors are tagged with the failing stage.
    fn set_display(&self, id: &str, change: &DisplayChange) -> Result<(), BackendError> {
        self.set_mode(id, &change.mode, change.orientation)
            .map_err(|err| err.at(ApplyStage::Mode))?;
        self.set_scale(id, change.scaling_mode, change.dpi_scale)
            .map_err(|err| err.at(ApplyStage::Scale))
    }
}
