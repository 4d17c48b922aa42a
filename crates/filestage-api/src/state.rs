use std::sync::Arc;

use filestage_core::engine::ObjectStore;
use filestage_core::JobService;

/// Shared application state handed to every handler. Deliberately thin: the
/// engine's worker pool and sweeper are owned by the caller of
/// [`crate::server::run`] so they can be drained on shutdown, not by this
/// struct. Handlers only ever need the façade and a store handle for the
/// health check.
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobService,
    pub store: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(jobs: JobService, store: Arc<dyn ObjectStore>) -> Self {
        Self { jobs, store }
    }
}
