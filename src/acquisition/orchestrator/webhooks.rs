//! Provider webhook handlers.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::correlation::{event_artist_and_album, is_transient_import_failure, EventMatch};
use super::AcquisitionOrchestrator;
use crate::acquisition::error::AcquisitionResult;
use crate::acquisition::models::{AcquisitionSource, DownloadJob, JobKind, JobStatus, ProviderEvent};

impl AcquisitionOrchestrator {
    /// Create a job for a download nobody asked this service for, so later
    /// events for the same provider ref have something to attach to.
    fn synthesize_tracking_job(&self, event: &ProviderEvent) -> AcquisitionResult<Option<DownloadJob>> {
        let Some(provider_ref) = event.download_id.clone() else {
            return Ok(None);
        };
        let Some((artist, album)) = event_artist_and_album(event) else {
            debug!("Untracked download {} names no album, ignoring", provider_ref);
            return Ok(None);
        };

        let user_id = self.most_recent_user_for(&artist)?;
        let now = Self::now();
        let mut job = DownloadJob::new(&artist, &album, JobKind::Library)
            .with_target_id(event.album_foreign_id.clone())
            .with_user(user_id);
        job.status = JobStatus::Processing;
        job.provider_ref = Some(provider_ref);
        job.provider_album_id = event.provider_album_id.clone();
        job.metadata.provider_foreign_album_id = event.album_foreign_id.clone();
        job.metadata.source = Some(AcquisitionSource::Indexer);
        job.started_at = Some(now);
        self.store.create_job(&job)?;
        info!(
            job_id = %job.id,
            "Tracking download {} started outside this service: {}",
            job.provider_ref.as_deref().unwrap_or_default(),
            job.subject
        );
        Ok(Some(job))
    }

    /// The provider sent a release to its download client.
    pub async fn on_download_grabbed(
        &self,
        event: &ProviderEvent,
    ) -> AcquisitionResult<Option<DownloadJob>> {
        let mut job = match self.match_event(event)? {
            EventMatch::Job(job) => job,
            EventMatch::Known => return Ok(None),
            EventMatch::Unmatched => return self.synthesize_tracking_job(event),
        };

        if job.provider_ref.is_some() && job.provider_ref == event.download_id {
            debug!("Grab for job {} already recorded", job.id);
            return Ok(Some(job));
        }

        if let Some(provider_ref) = &event.download_id {
            if let Some(replaced) = job.provider_ref.replace(provider_ref.clone()) {
                info!(
                    job_id = %job.id,
                    "Download {} replaces {} for {}",
                    provider_ref,
                    replaced,
                    job.subject
                );
                job.metadata.retire_provider_ref(replaced);
            }
        }
        if job.provider_album_id.is_none() {
            job.provider_album_id = event.provider_album_id.clone();
        }
        if job.metadata.provider_foreign_album_id.is_none() {
            job.metadata.provider_foreign_album_id = event.album_foreign_id.clone();
        }
        job.status = JobStatus::Processing;
        let now = Self::now();
        job.started_at = Some(job.started_at.unwrap_or(now));
        job.metadata.mark_activity(now);
        self.store.update_job(&job)?;
        info!(
            job_id = %job.id,
            "Download {} grabbed for {}",
            job.provider_ref.as_deref().unwrap_or("-"),
            job.subject
        );
        Ok(Some(job))
    }

    /// The provider imported the album.
    pub async fn on_download_complete(
        &self,
        event: &ProviderEvent,
    ) -> AcquisitionResult<Option<DownloadJob>> {
        let job = match self.match_event(event)? {
            EventMatch::Job(job) => job,
            EventMatch::Known => return Ok(None),
            EventMatch::Unmatched => match self.synthesize_tracking_job(event)? {
                Some(job) => job,
                None => {
                    warn!("Completion event matched no job: {:?}", event);
                    return Ok(None);
                }
            },
        };
        Ok(Some(self.complete_job(job, AcquisitionSource::Indexer).await?))
    }

    /// The provider downloaded a release but could not import it.
    ///
    /// Transient failures blocklist the release and let the provider search
    /// again. Terminal ones escalate right away.
    pub async fn on_import_failed(
        &self,
        event: &ProviderEvent,
        reason: &str,
    ) -> AcquisitionResult<Option<DownloadJob>> {
        if let Some(provider_ref) = event.download_id.as_deref() {
            let key = format!("import_failed:{}", provider_ref);
            let window = Duration::from_secs(self.settings.import_failure_dedup_secs);
            match self.dedup.set_if_absent(&key, reason, window).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Ignoring repeated import failure for {}", provider_ref);
                    return Ok(None);
                }
                Err(e) => warn!("Import failure dedup unavailable: {}", e),
            }
        }

        let mut job = match self.match_event(event)? {
            EventMatch::Job(job) => job,
            EventMatch::Known | EventMatch::Unmatched => {
                debug!("Import failure matched no active job: {:?}", event);
                return Ok(None);
            }
        };

        // The event names the download that failed; the job may already be
        // on another one.
        let failed_ref = event
            .download_id
            .clone()
            .or_else(|| job.provider_ref.clone());
        if failed_ref.is_some() && job.provider_ref == failed_ref {
            job.provider_ref = None;
        }
        job.metadata.failure_count += 1;
        if let Some(failed_ref) = &failed_ref {
            job.metadata.retire_provider_ref(failed_ref.clone());
        }
        // The provider searches again; the no-source window restarts now.
        job.metadata.mark_activity(Self::now());
        self.store.update_job(&job)?;

        let transient = is_transient_import_failure(reason);
        warn!(
            job_id = %job.id,
            "Import failed for {} (failure {}, transient: {}): {}",
            job.subject,
            job.metadata.failure_count,
            transient,
            reason
        );

        if let (Some(indexer), Some(failed_ref)) = (self.indexer.as_deref(), &failed_ref) {
            // A job still holding a live download needs no new search.
            let search_again = transient && job.provider_ref.is_none();
            indexer.blocklist_and_remove(failed_ref, search_again).await;
        }

        if transient {
            return Ok(Some(job));
        }
        Ok(Some(self.escalate(job, reason).await?))
    }
}
