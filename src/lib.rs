pub mod display;
pub mod error;
pub mod hotkey;
pub mod hotkey_engine;
pub mod key_source;
pub mod logging;
pub mod poller;
pub mod profile;
pub mod service;
pub mod settings;
pub mod settings_store;
pub mod settings_validator;
pub mod startup;

pub use error::{ApplyError, ApplyStage, BackendError, ConfigurationConflict, ProfileError};
pub use profile::ProfileModel;
pub use service::{EventSink, HotkeyService, ServiceEvent};
