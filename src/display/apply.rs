use crate::display::{DisplayChange, Mode, Orientation, ScalingMode, TopologyAdapter};
use crate::error::{ApplyError, ApplyStage, BackendError};

/// One slot activation, with the slot orientation already resolved against
/// its display where possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    pub display_id: String,
    /// Native terms.
    pub mode: Mode,
    pub orientation: Orientation,
    pub scaling_mode: ScalingMode,
    pub dpi_scale: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub display_id: String,
    /// What the OS was asked to do.
    pub submitted: DisplayChange,
}

/// Validates a request against the live mode list and submits it.
///
/// There is no rollback: if the scale stage fails after the mode stage was
/// accepted the error says so through `partially_applied`.
#[derive(Clone)]
pub struct ApplyExecutor {
    topology: TopologyAdapter,
}

impl ApplyExecutor {
    pub fn new(topology: TopologyAdapter) -> Self {
        Self { topology }
    }

    pub fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome, ApplyError> {
        let id = request.display_id.as_str();
        let supported = self.topology.list_modes(id)?;
        if !supported.contains(&request.mode) {
            return Err(ApplyError::ModeUnsupported {
                display_id: id.to_string(),
                mode: request.mode,
            });
        }

        let orientation = match request.orientation {
            Orientation::Inherit => self.topology.current_orientation(id)?,
            concrete => concrete,
        };
        let mode = if orientation.is_quarter_turn() {
            request.mode.invert()
        } else {
            request.mode
        };
        let change = DisplayChange {
            mode,
            orientation,
            scaling_mode: request.scaling_mode,
            dpi_scale: request.dpi_scale,
        };

        tracing::info!(display = id, mode = %mode, ?orientation, dpi = change.dpi_scale, "applying display settings");
        self.topology
            .backend()
            .set_display(id, &change)
            .map_err(|err| classify(id, err))?;

        Ok(ApplyOutcome {
            display_id: id.to_string(),
            submitted: change,
        })
    }
}

fn classify(id: &str, err: BackendError) -> ApplyError {
    tracing::warn!(display = id, %err, "display apply failed");
    let (stage, source) = match err {
        BackendError::Stage { stage, source } => (stage, *source),
        other => (ApplyStage::Mode, other),
    };
    match (stage, source) {
        (ApplyStage::Mode, BackendError::NotFound(_)) => ApplyError::DisplayNotFound(id.to_string()),
        (stage, source) => ApplyError::ApplyFailed {
            display_id: id.to_string(),
            stage,
            partially_applied: stage == ApplyStage::Scale,
            reason: source.to_string(),
        },
    }
}
