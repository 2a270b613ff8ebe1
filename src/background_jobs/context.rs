use crate::event_store::EventStore;
use crate::ingestion::EventSource;
use crate::popularity::{DEFAULT_DECAY_FACTOR, DEFAULT_NORMALIZE_WINDOW_DAYS};
use crate::server_store::ServerStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tunables handed to every job, sourced from the config file.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub future_days_max: i64,
    pub decay_factor: f64,
    pub normalize_window_days: i64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            future_days_max: crate::ingestion::DEFAULT_FUTURE_DAYS_MAX,
            decay_factor: DEFAULT_DECAY_FACTOR,
            normalize_window_days: DEFAULT_NORMALIZE_WINDOW_DAYS,
        }
    }
}

/// Context provided to jobs during execution.
///
/// Contains references to shared resources and a cancellation token
/// for graceful shutdown handling.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Access to the event and popularity database.
    pub event_store: Arc<dyn EventStore>,

    /// Access to server-side state (job history, schedules).
    pub server_store: Arc<dyn ServerStore>,

    /// Upstream event listing source.
    pub event_source: Arc<dyn EventSource>,

    pub settings: JobSettings,
}

impl JobContext {
    /// Create a new job context with the given dependencies.
    pub fn new(
        cancellation_token: CancellationToken,
        event_store: Arc<dyn EventStore>,
        server_store: Arc<dyn ServerStore>,
        event_source: Arc<dyn EventSource>,
        settings: JobSettings,
    ) -> Self {
        Self {
            cancellation_token,
            event_store,
            server_store,
            event_source,
            settings,
        }
    }

    /// Check if cancellation has been requested.
    ///
    /// Jobs should periodically check this during long-running operations
    /// and return early with `JobError::Cancelled` if true.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
