use std::path::PathBuf;

use thiserror::Error;

use crate::display::Mode;

/// Which half of an apply was being submitted when the backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    /// Resolution, refresh rate, colour depth and orientation.
    Mode,
    /// Scaling mode and DPI scale.
    Scale,
}

impl std::fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyStage::Mode => f.write_str("mode"),
            ApplyStage::Scale => f.write_str("scale"),
        }
    }
}

/// Failures reported by a [`DisplayBackend`](crate::display::DisplayBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("display {0} is not connected")]
    NotFound(String),
    #[error("{call} failed with code {code}")]
    Os { call: &'static str, code: i32 },
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: ApplyStage,
        #[source]
        source: Box<BackendError>,
    },
}

/// Result of activating a slot. Cloned into events and display status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("display {0} is not connected")]
    DisplayNotFound(String),
    #[error("display {display_id} does not support {mode}")]
    ModeUnsupported { display_id: String, mode: Mode },
    #[error("applying {stage} to display {display_id} failed (partially applied: {partially_applied}): {reason}")]
    ApplyFailed {
        display_id: String,
        stage: ApplyStage,
        partially_applied: bool,
        reason: String,
    },
}

/// Rejected Profile Model mutations. The model is unchanged when one of these
/// is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("no display at index {0}")]
    DisplayIndex(usize),
    #[error("display {display} has no slot {slot}")]
    SlotIndex { display: usize, slot: usize },
    #[error("active slot count {requested} exceeds {available} slots")]
    ActiveCount { requested: usize, available: usize },
    #[error("{0}% is not a supported DPI scale")]
    InvalidScale(u32),
    #[error("display orientation must be a concrete rotation")]
    InheritDisplayOrientation,
    #[error("display {display_id} does not support {mode}")]
    ModeUnsupported { display_id: String, mode: Mode },
    #[error("display already has the maximum of {0} slots")]
    SlotLimitReached(usize),
    #[error("a hotkey may hold at most {max} keys, got {got}")]
    TooManyKeys { max: usize, got: usize },
    #[error("invalid key code {0}")]
    InvalidKeyCode(u32),
    #[error("topology query failed: {0}")]
    Topology(#[from] ApplyError),
}

/// A write-through to the settings file did not reach the disk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("failed to write settings to {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("a hotkey capture is already in progress")]
    CaptureInProgress,
    #[error("no display at index {0}")]
    UnknownDisplay(usize),
}

/// Two or more registered slots share an identical key set. Only the first
/// slot fires; the rest are shadowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationConflict {
    pub keys: Vec<u32>,
    /// `(display_id, slot_index)` pairs, the firing slot first.
    pub slots: Vec<(String, usize)>,
}

impl std::fmt::Display for ConfigurationConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self
            .slots
            .iter()
            .map(|(id, slot)| format!("{id}#{slot}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "keys {:?} are bound to several slots: {slots}", self.keys)
    }
}

impl BackendError {
    /// Tag an error with the stage it happened in. Already tagged errors keep
    /// their original stage.
    pub fn at(self, stage: ApplyStage) -> Self {
        match self {
            tagged @ BackendError::Stage { .. } => tagged,
            other => BackendError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}
