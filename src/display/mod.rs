//! Display modes, orientations and the backend seam used to drive real
//! monitors.

pub mod apply;
pub mod backend;
pub mod simulated;
pub mod topology;
#[cfg(windows)]
pub mod win32;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use apply::{ApplyExecutor, ApplyOutcome, ApplyRequest};
pub use backend::{DisplayBackend, DisplayChange};
pub use simulated::SimulatedDisplayBackend;
pub use topology::TopologyAdapter;

/// DPI scale percentages a slot may select, in the order the OS exposes them.
pub const DPI_SCALES: [u32; 9] = [100, 125, 150, 175, 200, 225, 250, 300, 350];

pub const DEFAULT_DPI_SCALE: u32 = 100;

pub fn is_valid_dpi_scale(scale: u32) -> bool {
    DPI_SCALES.contains(&scale)
}

/// A display mode in native (unrotated) terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
    pub color_depth: u32,
}

impl Mode {
    pub fn new(width: u32, height: u32, refresh_rate: u32, color_depth: u32) -> Self {
        Self {
            width,
            height,
            refresh_rate,
            color_depth,
        }
    }

    /// Swap width and height. Used to submit a native mode to a display that
    /// is rotated by a quarter turn.
    pub fn invert(&self) -> Self {
        Self {
            width: self.height,
            height: self.width,
            ..*self
        }
    }

    fn sort_key(&self) -> (u32, u32, u32, u32) {
        (self.width, self.height, self.color_depth, self.refresh_rate)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}Hz {}bpp",
            self.width, self.height, self.refresh_rate, self.color_depth
        )
    }
}

/// De-duplicate and sort modes descending by width, height, depth, refresh.
pub fn normalize_modes(mut modes: Vec<Mode>) -> Vec<Mode> {
    modes.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    modes.dedup();
    modes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Use the display's own orientation. Never valid at display level.
    #[default]
    Inherit,
    Normal,
    Rotated90,
    Rotated180,
    Rotated270,
}

impl Orientation {
    /// Map the OS rotation index (0..=3, quarter turns) to an orientation.
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Orientation::Normal),
            1 => Some(Orientation::Rotated90),
            2 => Some(Orientation::Rotated180),
            3 => Some(Orientation::Rotated270),
            _ => None,
        }
    }

    /// OS rotation index, `None` for [`Orientation::Inherit`].
    pub fn index(self) -> Option<u32> {
        match self {
            Orientation::Inherit => None,
            Orientation::Normal => Some(0),
            Orientation::Rotated90 => Some(1),
            Orientation::Rotated180 => Some(2),
            Orientation::Rotated270 => Some(3),
        }
    }

    pub fn is_concrete(self) -> bool {
        self != Orientation::Inherit
    }

    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Orientation::Rotated90 | Orientation::Rotated270)
    }

    /// Resolve `Inherit` against the owning display's orientation.
    pub fn resolve(self, display: Orientation) -> Orientation {
        match self {
            Orientation::Inherit if display.is_concrete() => display,
            Orientation::Inherit => Orientation::Normal,
            concrete => concrete,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Orientation::Inherit => "Inherit",
            Orientation::Normal => "Landscape",
            Orientation::Rotated90 => "Portrait",
            Orientation::Rotated180 => "Landscape (flipped)",
            Orientation::Rotated270 => "Portrait (flipped)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    #[default]
    PreserveAspectRatio,
    Stretched,
    Centered,
}

impl ScalingMode {
    pub fn label(self) -> &'static str {
        match self {
            ScalingMode::PreserveAspectRatio => "Preserve aspect ratio",
            ScalingMode::Stretched => "Stretched",
            ScalingMode::Centered => "Centered",
        }
    }
}
