use std::sync::Arc;

use crate::display::{normalize_modes, DisplayBackend, Mode, Orientation};
use crate::error::{ApplyError, BackendError};

/// Thin read-only view of the connected displays.
///
/// Nothing is cached: each call goes to the backend, so callers always see
/// the live topology.
#[derive(Clone)]
pub struct TopologyAdapter {
    backend: Arc<dyn DisplayBackend>,
}

impl TopologyAdapter {
    pub fn new(backend: Arc<dyn DisplayBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn DisplayBackend> {
        &self.backend
    }

    pub fn list_display_ids(&self) -> Vec<String> {
        self.backend.display_ids()
    }

    pub fn count_connected(&self) -> usize {
        self.backend.connected_count()
    }

    /// Supported modes, native terms, sorted descending and de-duplicated.
    pub fn list_modes(&self, id: &str) -> Result<Vec<Mode>, ApplyError> {
        self.backend
            .modes(id)
            .map(normalize_modes)
            .map_err(|err| not_found(id, err))
    }

    pub fn current_mode(&self, id: &str) -> Result<Mode, ApplyError> {
        self.backend
            .current_mode(id)
            .map_err(|err| not_found(id, err))
    }

    pub fn current_orientation(&self, id: &str) -> Result<Orientation, ApplyError> {
        match self.backend.current_orientation(id) {
            Ok(Orientation::Inherit) => Ok(Orientation::Normal),
            Ok(orientation) => Ok(orientation),
            Err(err) => Err(not_found(id, err)),
        }
    }
}

fn not_found(id: &str, err: BackendError) -> ApplyError {
    tracing::debug!(display = id, %err, "display query failed");
    ApplyError::DisplayNotFound(id.to_string())
}
