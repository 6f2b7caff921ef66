//! Outbound notifications about job outcomes.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::models::{BatchSummary, DownloadJob};

/// Delivers user-facing notifications. Fire-and-forget: callers log failures
/// and carry on.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn download_complete(&self, job: &DownloadJob) -> Result<()>;

    async fn download_failed(&self, job: &DownloadJob, reason: &str) -> Result<()>;

    async fn batch_complete(&self, summary: &BatchSummary) -> Result<()>;
}

/// Owner of a batch (discovery run, playlist import) that wants to know when
/// all of its jobs are done.
#[async_trait]
pub trait BatchCompletionNotifier: Send + Sync {
    async fn on_batch_complete(&self, summary: &BatchSummary);
}

/// Sink that only writes notifications to the log.
#[derive(Debug, Default)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn download_complete(&self, job: &DownloadJob) -> Result<()> {
        info!(
            job_id = %job.id,
            user_id = job.user_id.as_deref().unwrap_or("-"),
            "Download complete: {}",
            job.subject
        );
        Ok(())
    }

    async fn download_failed(&self, job: &DownloadJob, reason: &str) -> Result<()> {
        info!(
            job_id = %job.id,
            user_id = job.user_id.as_deref().unwrap_or("-"),
            "Download failed: {} ({})",
            job.subject,
            reason
        );
        Ok(())
    }

    async fn batch_complete(&self, summary: &BatchSummary) -> Result<()> {
        info!(
            batch_id = %summary.batch_id,
            "Batch complete: {}/{} completed, {} failed, {} exhausted, {} cancelled",
            summary.completed,
            summary.total,
            summary.failed,
            summary.exhausted,
            summary.cancelled
        );
        Ok(())
    }
}

#[async_trait]
impl BatchCompletionNotifier for LoggingNotificationSink {
    async fn on_batch_complete(&self, summary: &BatchSummary) {
        info!(batch_id = %summary.batch_id, "Batch owner notified");
    }
}
