//! Acquisition orchestrator: the download job state machine.
//!
//! Jobs are created and mutated only here. Provider webhooks, the stale job
//! reaper and the reconciliation sweep all advance jobs through this type;
//! correctness rests on status checks and idempotent matching rather than on
//! locks.

mod correlation;
mod exact_import;
mod fallback;
mod sweeps;
mod webhooks;

pub use correlation::is_transient_import_failure;
pub use exact_import::ExactImportTrack;
pub use sweeps::StaleSweepReport;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::cache::SharedCache;
use super::error::{AcquisitionError, AcquisitionResult};
use super::indexer::IndexerClient;
use super::job_store::JobStore;
use super::metadata::MetadataLookup;
use super::models::{AcquisitionSource, BatchSummary, DownloadJob, JobKind, JobStatus};
use super::notifier::{BatchCompletionNotifier, NotificationSink};
use super::p2p::P2pEngine;
use crate::config::{OrchestratorSettings, ReaperSettings};

/// How long a batch completion marker is kept to avoid notifying twice.
const BATCH_MARKER_TTL: Duration = Duration::from_secs(24 * 3600);

fn completed_duplicate(duplicates: &[DownloadJob]) -> Option<&DownloadJob> {
    duplicates.iter().find(|d| d.status == JobStatus::Completed)
}

/// Request to create a new download job.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub artist_name: String,
    pub album_title: String,
    pub kind: JobKind,
    /// External album identifier
    pub target_id: Option<String>,
    /// External artist identifier
    pub artist_id: Option<String>,
    pub user_id: Option<String>,
    pub batch_id: Option<String>,
}

impl JobRequest {
    pub fn new(artist_name: &str, album_title: &str) -> Self {
        Self {
            artist_name: artist_name.to_string(),
            album_title: album_title.to_string(),
            ..Default::default()
        }
    }
}

pub struct AcquisitionOrchestrator {
    store: Arc<dyn JobStore>,
    indexer: Option<Arc<IndexerClient>>,
    p2p: Option<Arc<P2pEngine>>,
    metadata: Option<Arc<dyn MetadataLookup>>,
    /// Short-TTL store used to deduplicate repeated events
    dedup: Arc<dyn SharedCache>,
    notifications: Arc<dyn NotificationSink>,
    batch_notifier: Option<Arc<dyn BatchCompletionNotifier>>,
    settings: OrchestratorSettings,
    reaper: ReaperSettings,
}

impl AcquisitionOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        dedup: Arc<dyn SharedCache>,
        notifications: Arc<dyn NotificationSink>,
        settings: OrchestratorSettings,
        reaper: ReaperSettings,
    ) -> Self {
        Self {
            store,
            indexer: None,
            p2p: None,
            metadata: None,
            dedup,
            notifications,
            batch_notifier: None,
            settings,
            reaper,
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<IndexerClient>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_p2p(mut self, p2p: Arc<P2pEngine>) -> Self {
        self.p2p = Some(p2p);
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataLookup>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_batch_notifier(mut self, notifier: Arc<dyn BatchCompletionNotifier>) -> Self {
        self.batch_notifier = Some(notifier);
        self
    }

    fn indexer(&self) -> AcquisitionResult<&IndexerClient> {
        self.indexer
            .as_deref()
            .ok_or_else(|| AcquisitionError::NotConfigured("indexer".to_string()))
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    // =========================================================================
    // Job CRUD
    // =========================================================================

    /// Persist a new pending job.
    pub fn create_job(&self, request: JobRequest) -> AcquisitionResult<DownloadJob> {
        let job = DownloadJob::new(&request.artist_name, &request.album_title, request.kind)
            .with_target_id(request.target_id)
            .with_artist_id(request.artist_id)
            .with_user(request.user_id)
            .with_batch(request.batch_id);
        self.store.create_job(&job)?;
        info!(job_id = %job.id, "Created download job for {}", job.subject);
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> AcquisitionResult<DownloadJob> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| AcquisitionError::JobNotFound(job_id.to_string()))
    }

    /// Cancel an active job. Cancelling a terminal job leaves it unchanged.
    pub async fn cancel_job(&self, job_id: &str) -> AcquisitionResult<DownloadJob> {
        let mut job = self.get_job(job_id)?;
        if !job.is_active() {
            debug!(
                "Job {} is already {}, not cancelling",
                job_id,
                job.status.as_str()
            );
            return Ok(job);
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Self::now());
        self.store.update_job(&job)?;
        info!(job_id = %job.id, "Cancelled download job {}", job.subject);

        if let Some(batch_id) = job.batch_id.clone() {
            self.check_batch_completion(&batch_id).await;
        }
        Ok(job)
    }

    // =========================================================================
    // Terminal transitions
    // =========================================================================

    /// Other jobs for the same logical album, newest first.
    fn find_duplicates(&self, job: &DownloadJob) -> AcquisitionResult<Vec<DownloadJob>> {
        let Some(key) = job.logical_key() else {
            return Ok(Vec::new());
        };
        let id = job.id.clone();
        Ok(self.store.find_matching(JobStatus::ALL, &move |other: &DownloadJob| {
            other.id != id && other.logical_key().as_deref() == Some(key.as_str())
        })?)
    }

    /// Mark a job completed, together with its active duplicates.
    async fn complete_job(
        &self,
        mut job: DownloadJob,
        source: AcquisitionSource,
    ) -> AcquisitionResult<DownloadJob> {
        let now = Self::now();
        let duplicates = self.find_duplicates(&job)?;

        job.status = JobStatus::Completed;
        job.error = None;
        job.completed_at = Some(now);
        job.metadata.source = Some(source);
        job.metadata.clear_progress();

        let mut updated = vec![job.clone()];
        for mut duplicate in duplicates.into_iter().filter(DownloadJob::is_active) {
            debug!(
                "Completing duplicate job {} along with {}",
                duplicate.id, job.id
            );
            duplicate.status = JobStatus::Completed;
            duplicate.error = None;
            duplicate.completed_at = Some(now);
            duplicate.metadata.source = Some(source);
            updated.push(duplicate);
        }
        self.store.update_many(&updated)?;
        info!(job_id = %job.id, "Download job completed: {}", job.subject);

        if let Err(e) = self.notifications.download_complete(&job).await {
            warn!("Failed to send completion notification for {}: {}", job.id, e);
        }
        self.check_batches_of(&updated).await;
        Ok(job)
    }

    /// Terminal failure for a logical album.
    ///
    /// A job whose duplicate already completed is completed instead. Otherwise
    /// the job and its active duplicates fail together and one failure
    /// notification goes out for the album.
    pub async fn mark_job_exhausted(
        &self,
        mut job: DownloadJob,
        reason: &str,
    ) -> AcquisitionResult<DownloadJob> {
        let duplicates = self.find_duplicates(&job)?;
        if let Some(done) = completed_duplicate(&duplicates) {
            info!(
                "Job {} has a completed duplicate {}, completing instead of failing",
                job.id, done.id
            );
            let source = done.metadata.source.unwrap_or(AcquisitionSource::Indexer);
            return self.complete_job(job, source).await;
        }

        let now = Self::now();
        let already_notified = job.metadata.notification_sent
            || duplicates.iter().any(|d| d.metadata.notification_sent);

        job.status = JobStatus::Failed;
        job.error = Some(reason.to_string());
        job.completed_at = Some(now);
        job.metadata.notification_sent = true;

        let mut updated = vec![job.clone()];
        for mut duplicate in duplicates.into_iter().filter(DownloadJob::is_active) {
            debug!("Failing duplicate job {} along with {}", duplicate.id, job.id);
            duplicate.status = JobStatus::Failed;
            duplicate.error = Some(reason.to_string());
            duplicate.completed_at = Some(now);
            duplicate.metadata.notification_sent = true;
            updated.push(duplicate);
        }
        self.store.update_many(&updated)?;
        warn!(job_id = %job.id, "Download job failed: {} ({})", job.subject, reason);

        if !already_notified {
            if let Err(e) = self.notifications.download_failed(&job, reason).await {
                warn!("Failed to send failure notification for {}: {}", job.id, e);
            }
        }
        self.check_batches_of(&updated).await;
        Ok(job)
    }

    // =========================================================================
    // Batches
    // =========================================================================

    async fn check_batches_of(&self, jobs: &[DownloadJob]) {
        let batches: BTreeSet<&str> = jobs.iter().filter_map(|j| j.batch_id.as_deref()).collect();
        for batch_id in batches {
            self.check_batch_completion(batch_id).await;
        }
    }

    /// Notify the batch owner once every job of the batch is terminal.
    pub async fn check_batch_completion(&self, batch_id: &str) {
        let jobs = match self.store.find_by_batch(batch_id) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Failed to load batch {}: {:#}", batch_id, e);
                return;
            }
        };
        if jobs.is_empty() || jobs.iter().any(DownloadJob::is_active) {
            return;
        }

        let marker = format!("batch:complete:{}", batch_id);
        match self.dedup.set_if_absent(&marker, "1", BATCH_MARKER_TTL).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Batch {} completion already reported", batch_id);
                return;
            }
            Err(e) => warn!("Batch marker for {} unavailable: {}", batch_id, e),
        }

        let summary = BatchSummary::from_jobs(batch_id, &jobs);
        info!(
            batch_id,
            "Batch complete: {} of {} jobs completed",
            summary.completed,
            summary.total
        );
        if let Some(notifier) = &self.batch_notifier {
            notifier.on_batch_complete(&summary).await;
        }
        if let Err(e) = self.notifications.batch_complete(&summary).await {
            warn!("Failed to send batch notification for {}: {}", batch_id, e);
        }
    }
}
