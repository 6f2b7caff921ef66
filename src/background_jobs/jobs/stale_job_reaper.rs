//! Stale job reaper background job.
//!
//! Escalates download jobs that stopped making progress: never started,
//! never got a download source, or stuck downloading.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct StaleJobReaperJob {
    interval: Duration,
}

impl StaleJobReaperJob {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
        }
    }
}

#[async_trait]
impl BackgroundJob for StaleJobReaperJob {
    fn id(&self) -> &'static str {
        "stale_job_reaper"
    }

    fn name(&self) -> &'static str {
        "Stale Job Reaper"
    }

    fn description(&self) -> &'static str {
        "Fail or fall back download jobs that stopped making progress"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = ctx
            .orchestrator
            .mark_stale_jobs_as_failed()
            .await
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        debug!("Stale job sweep finished: {:?}", report);
        Ok(())
    }
}
