//! Periodic sweeps: the stale job reaper and indexer reconciliation.

use tracing::{debug, info, warn};

use super::AcquisitionOrchestrator;
use crate::acquisition::error::{AcquisitionError, AcquisitionResult};
use crate::acquisition::matching::parse_subject;
use crate::acquisition::models::{AcquisitionSource, DownloadJob, JobStatus};

/// What a reaper sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleSweepReport {
    /// Jobs failed or moved to a fallback
    pub escalated: usize,
    /// Stale jobs completed because a duplicate already finished
    pub completed: usize,
    /// Jobs given more time because their download is still progressing
    pub extended: usize,
}

impl AcquisitionOrchestrator {
    /// Fail or escalate jobs that stopped moving.
    ///
    /// Pending jobs that were never started, processing jobs that never got a
    /// download and processing jobs whose download stalled each have their own
    /// timeout. Downloads that are still shrinking get their window extended.
    pub async fn mark_stale_jobs_as_failed(&self) -> AcquisitionResult<StaleSweepReport> {
        let now = Self::now();
        let mut report = StaleSweepReport::default();

        for job in self.store.find_by_status(&[JobStatus::Pending])? {
            if now - job.created_at > self.reaper.pending_timeout_secs as i64 {
                self.reap(job, "never started", &mut report).await?;
            }
        }

        for mut job in self.store.find_by_status(&[JobStatus::Processing])? {
            let idle = now - job.last_activity_at();
            match job.provider_ref.clone() {
                None => {
                    if idle > self.reaper.no_source_timeout_secs as i64 {
                        self.reap(job, "no download source", &mut report).await?;
                    }
                }
                Some(provider_ref) => {
                    if idle <= self.reaper.download_timeout_secs as i64 {
                        continue;
                    }
                    if self.still_progressing(&mut job, &provider_ref, now).await {
                        self.store.update_job(&job)?;
                        report.extended += 1;
                        continue;
                    }
                    self.reap(job, "download stalled", &mut report).await?;
                }
            }
        }

        if report != StaleSweepReport::default() {
            info!(
                "Stale job sweep: {} escalated, {} completed, {} extended",
                report.escalated, report.completed, report.extended
            );
        }
        Ok(report)
    }

    /// Whether the remaining size shrank since the last sweep. Progress is
    /// recorded on the job.
    async fn still_progressing(&self, job: &mut DownloadJob, provider_ref: &str, now: i64) -> bool {
        let Some(indexer) = self.indexer.as_deref() else {
            return false;
        };
        let Some(record) = indexer.download_progress(provider_ref).await else {
            return false;
        };
        let size_left = record.sizeleft.max(0.0) as u64;
        let previous = job
            .metadata
            .last_size_left()
            .unwrap_or(record.size.max(0.0) as u64);
        if size_left < previous {
            debug!(
                "Download {} still progressing ({} -> {} bytes left)",
                provider_ref, previous, size_left
            );
            job.metadata.record_progress(size_left, now);
            true
        } else {
            false
        }
    }

    async fn reap(
        &self,
        job: DownloadJob,
        cause: &str,
        report: &mut StaleSweepReport,
    ) -> AcquisitionResult<()> {
        // Earlier escalations in this sweep may have settled duplicates.
        let Some(mut current) = self.store.get_job(&job.id)? else {
            return Ok(());
        };
        if !current.is_active() {
            return Ok(());
        }
        current.metadata = job.metadata;
        let mut job = current;

        let reason = format!("{} ({})", AcquisitionError::StaleTimeout(job.subject.clone()), cause);
        warn!(job_id = %job.id, "{}", reason);

        if let Some(provider_ref) = job.provider_ref.take() {
            if let Some(indexer) = self.indexer.as_deref() {
                indexer.blocklist_and_remove(&provider_ref, false).await;
            }
            job.metadata.retire_provider_ref(provider_ref);
        }
        job.metadata.clear_progress();

        let updated = self.escalate(job, &reason).await?;
        if updated.status == JobStatus::Completed {
            report.completed += 1;
        } else {
            report.escalated += 1;
        }
        Ok(())
    }

    /// Complete processing jobs whose album the indexer already has, for
    /// when the completion webhook got lost.
    pub async fn reconcile_with_indexer(&self) -> AcquisitionResult<usize> {
        let indexer = self.indexer()?;
        let mut completed = 0;

        for job in self.store.find_by_status(&[JobStatus::Processing])? {
            let foreign_id = job
                .metadata
                .provider_foreign_album_id
                .as_deref()
                .or(job.target_id.as_deref());
            let artist = job.metadata.artist_name.as_deref();
            let album = job.metadata.album_title.as_deref();

            let mut available = indexer.is_album_available(foreign_id, artist, album).await;
            if !available {
                if let Some((subject_artist, subject_album)) = parse_subject(&job.subject) {
                    if (Some(subject_artist.as_str()), Some(subject_album.as_str())) != (artist, album) {
                        available = indexer
                            .is_album_available(None, Some(&subject_artist), Some(&subject_album))
                            .await;
                    }
                }
            }
            if !available {
                continue;
            }

            // A webhook may have settled the job in the meantime.
            let Some(current) = self.store.get_job(&job.id)? else {
                continue;
            };
            if current.status != JobStatus::Processing {
                continue;
            }
            info!(job_id = %job.id, "Reconciled {} as available in the indexer", job.subject);
            self.complete_job(current, AcquisitionSource::Indexer).await?;
            completed += 1;
        }

        if completed > 0 {
            info!("Reconciliation completed {} jobs", completed);
        }
        Ok(completed)
    }
}
