use crate::acquisition::{AcquisitionOrchestrator, SharedCache};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// The job state machine the sweeps act through.
    pub orchestrator: Arc<AcquisitionOrchestrator>,

    /// Shared cache holding reputation, search results and dedup markers.
    pub cache: Arc<dyn SharedCache>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        orchestrator: Arc<AcquisitionOrchestrator>,
        cache: Arc<dyn SharedCache>,
    ) -> Self {
        Self {
            cancellation_token,
            orchestrator,
            cache,
        }
    }

    /// Same context with a different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
