//! Application state for the API server.

use quarry_coordinator::{Coordinator, CoordinatorConfig, EnvSettings, SessionRegistry};
use std::sync::Arc;

/// Shared application state for the API server.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,

    /// Sessions keyed by client-chosen or generated id
    pub sessions: SessionRegistry,

    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        let sessions = SessionRegistry::with_default_database(coordinator.default_database());
        Self {
            coordinator: Arc::new(coordinator),
            sessions,
            start_time: std::time::Instant::now(),
        }
    }

    /// Build the coordinator from configuration and environment.
    pub fn from_config(
        config: &CoordinatorConfig,
        env: &EnvSettings,
    ) -> quarry_common::Result<Self> {
        Ok(Self::new(Coordinator::from_config(config, env)?))
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
