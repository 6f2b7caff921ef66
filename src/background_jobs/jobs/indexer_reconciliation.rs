//! Indexer reconciliation background job.
//!
//! Completes processing jobs whose album the indexer already imported, for
//! completion webhooks that never arrived.

use crate::acquisition::AcquisitionError;
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

pub struct IndexerReconciliationJob {
    interval: Duration,
}

impl IndexerReconciliationJob {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
        }
    }
}

#[async_trait]
impl BackgroundJob for IndexerReconciliationJob {
    fn id(&self) -> &'static str {
        "indexer_reconciliation"
    }

    fn name(&self) -> &'static str {
        "Indexer Reconciliation"
    }

    fn description(&self) -> &'static str {
        "Complete jobs whose album the indexer already has"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        match ctx.orchestrator.reconcile_with_indexer().await {
            Ok(0) => debug!("Reconciliation found nothing to complete"),
            Ok(completed) => info!("Reconciliation completed {} jobs", completed),
            Err(AcquisitionError::NotConfigured(_)) => {
                debug!("Indexer not configured, skipping reconciliation")
            }
            Err(e) => return Err(JobError::ExecutionFailed(e.to_string())),
        }
        Ok(())
    }
}
