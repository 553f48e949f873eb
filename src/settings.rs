use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Upper bound for `max_slots`; a display never holds more slots than this.
pub const MAX_SLOTS: usize = 12;

const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Application level flags, stored in the `application` section of the
/// settings file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// When enabled the application initialises the logger at debug level.
    /// Defaults to `false` when the field is missing in the settings file.
    #[serde(default)]
    pub debug_logging: bool,
    /// Optional file that receives a copy of the log output.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Interval between connected-display checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Slots a single display may hold. Clamped to `1..=MAX_SLOTS`.
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,
    #[serde(default)]
    pub dark_mode: bool,
    #[serde(default)]
    pub minimize_to_tray: bool,
    /// Keep a launcher in the user's Startup folder.
    #[serde(default)]
    pub run_on_startup: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_slots() -> usize {
    MAX_SLOTS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            log_file: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_slots: default_max_slots(),
            dark_mode: false,
            minimize_to_tray: false,
            run_on_startup: false,
        }
    }
}

impl Settings {
    /// Clamp values a hand-edited file may have pushed out of range.
    pub fn sanitize(&mut self) {
        if self.max_slots == 0 || self.max_slots > MAX_SLOTS {
            tracing::warn!(max_slots = self.max_slots, "max_slots out of range; clamping");
            self.max_slots = self.max_slots.clamp(1, MAX_SLOTS);
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            tracing::warn!(
                poll_interval_ms = self.poll_interval_ms,
                "poll interval too short; clamping"
            );
            self.poll_interval_ms = MIN_POLL_INTERVAL_MS;
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"dark_mode": true}"#).unwrap();
        assert!(settings.dark_mode);
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.max_slots, MAX_SLOTS);
        assert!(!settings.run_on_startup);
    }

    #[test]
    fn sanitize_clamps_ranges() {
        let mut settings = Settings {
            max_slots: 40,
            poll_interval_ms: 5,
            ..Settings::default()
        };
        settings.sanitize();
        assert_eq!(settings.max_slots, MAX_SLOTS);
        assert_eq!(settings.poll_interval_ms, MIN_POLL_INTERVAL_MS);

        settings.max_slots = 0;
        settings.sanitize();
        assert_eq!(settings.max_slots, 1);
    }
}
