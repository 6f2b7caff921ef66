//! Playlist-style imports of exact tracks straight from the P2P network.

use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use super::AcquisitionOrchestrator;
use crate::acquisition::error::{AcquisitionError, AcquisitionResult};
use crate::acquisition::models::{AcquisitionSource, BatchSummary, DownloadJob, JobKind, JobStatus};
use crate::acquisition::p2p::TrackRequest;

/// Overflow key holding where an imported track was written.
const LOCAL_PATH_KEY: &str = "localPath";

/// One track of a playlist import.
#[derive(Debug, Clone, Default)]
pub struct ExactImportTrack {
    pub artist: String,
    pub title: String,
    pub playlist: Option<String>,
    pub user_id: Option<String>,
    pub expected_size: Option<u64>,
}

impl AcquisitionOrchestrator {
    /// Import tracks through the P2P batch pipeline, bypassing the indexer.
    /// Every track gets its own job in `batch_id`.
    pub async fn start_exact_import(
        &self,
        batch_id: &str,
        tracks: Vec<ExactImportTrack>,
        dest_dir: &Path,
    ) -> AcquisitionResult<BatchSummary> {
        let p2p = self
            .p2p
            .as_deref()
            .ok_or_else(|| AcquisitionError::NotConfigured("P2P network".to_string()))?;

        let now = Self::now();
        let mut jobs = Vec::with_capacity(tracks.len());
        let mut requests = Vec::with_capacity(tracks.len());
        for track in tracks {
            let kind = JobKind::ExactImport {
                playlist: track.playlist.clone(),
                track_title: Some(track.title.clone()),
            };
            let mut job = DownloadJob::new(&track.artist, &track.title, kind)
                .with_user(track.user_id.clone())
                .with_batch(Some(batch_id.to_string()));
            job.status = JobStatus::Processing;
            job.attempts = 1;
            job.started_at = Some(now);
            self.store.create_job(&job)?;

            let mut request = TrackRequest::new(&track.artist, &track.title).with_job(&job.id);
            request.expected_size = track.expected_size;
            requests.push(request);
            jobs.push(job);
        }
        info!(batch_id, "Starting exact import of {} tracks", jobs.len());

        let results = p2p.run_batch(&requests, dest_dir).await;

        let finished_at = Self::now();
        let mut settled = Vec::with_capacity(jobs.len());
        for (job, result) in jobs.into_iter().zip(results) {
            // The job may have been cancelled while its track was in flight.
            let Some(mut job) = self.store.get_job(&job.id)? else {
                continue;
            };
            if !job.is_active() {
                settled.push(job);
                continue;
            }
            job.completed_at = Some(finished_at);
            match result {
                Ok(track) => {
                    job.status = JobStatus::Completed;
                    job.metadata.source = Some(AcquisitionSource::P2p);
                    job.metadata.extra.insert(
                        LOCAL_PATH_KEY.to_string(),
                        Value::from(track.path.to_string_lossy().into_owned()),
                    );
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                }
            }
            settled.push(job);
        }
        self.store.update_many(&settled)?;

        for job in &settled {
            let outcome = match job.status {
                JobStatus::Completed => self.notifications.download_complete(job).await,
                JobStatus::Failed => {
                    let reason = job.error.as_deref().unwrap_or_default();
                    self.notifications.download_failed(job, reason).await
                }
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                warn!("Failed to send notification for {}: {}", job.id, e);
            }
        }

        self.check_batch_completion(batch_id).await;
        Ok(BatchSummary::from_jobs(
            batch_id,
            &self.store.find_by_batch(batch_id)?,
        ))
    }
}
