//! Cache pruning background job.
//!
//! Drops expired entries from the shared cache so reputation records and
//! search results that nobody reads again do not pile up.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

pub struct CachePruneJob {
    interval: Duration,
}

impl CachePruneJob {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
        }
    }
}

#[async_trait]
impl BackgroundJob for CachePruneJob {
    fn id(&self) -> &'static str {
        "cache_prune"
    }

    fn name(&self) -> &'static str {
        "Cache Prune"
    }

    fn description(&self) -> &'static str {
        "Drop expired entries from the shared cache"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let pruned = ctx
            .cache
            .prune_expired()
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        if pruned > 0 {
            info!("Pruned {} expired cache entries", pruned);
        } else {
            debug!("No expired cache entries");
        }
        Ok(())
    }
}
