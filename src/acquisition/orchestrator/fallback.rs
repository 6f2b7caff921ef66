//! Starting jobs on the indexer provider, and what happens when an album
//! cannot be acquired: same-artist fallback or terminal failure.

use tracing::{debug, info, warn};

use super::{completed_duplicate, AcquisitionOrchestrator};
use crate::acquisition::error::{AcquisitionError, AcquisitionResult};
use crate::acquisition::indexer::{AddAlbumOutcome, AlbumRequest};
use crate::acquisition::matching::{normalize_name, titles_match_strictly};
use crate::acquisition::models::{DownloadJob, JobKind, JobStatus};

enum StartOutcome {
    /// The job is processing, or ended in a terminal state
    Settled(DownloadJob),
    /// The job was exhausted and this successor should be started next
    Successor(DownloadJob),
}

impl AcquisitionOrchestrator {
    /// Resolve the artist's external id and hand the album to the indexer.
    ///
    /// When the album cannot be found, library jobs move on to another album
    /// of the same artist. Successors are started in turn, up to the
    /// configured chain length. Returns the last job touched.
    pub async fn start_download(
        &self,
        job_id: &str,
        artist_name: &str,
        album_title: &str,
        album_id: Option<&str>,
        user_id: Option<&str>,
        is_discovery: bool,
    ) -> AcquisitionResult<DownloadJob> {
        let mut job = self.get_job(job_id)?;
        job.metadata.artist_name = Some(artist_name.to_string());
        job.metadata.album_title = Some(album_title.to_string());
        job.subject = format!("{} - {}", artist_name, album_title);
        if let Some(album_id) = album_id {
            job.target_id = Some(album_id.to_string());
        }
        if let Some(user_id) = user_id {
            job.user_id = Some(user_id.to_string());
        }
        if is_discovery && job.metadata.kind == JobKind::Library {
            job.metadata.kind = JobKind::Discovery { similar_to: None };
        }
        self.start_job(job).await
    }

    pub(super) async fn start_job(&self, job: DownloadJob) -> AcquisitionResult<DownloadJob> {
        let mut current = job;
        loop {
            match self.start_single(current).await? {
                StartOutcome::Settled(job) => return Ok(job),
                StartOutcome::Successor(next) => {
                    info!(
                        job_id = %next.id,
                        "Starting fallback job {} (after {})",
                        next.subject,
                        next.metadata.origin_of_job_id.as_deref().unwrap_or("-")
                    );
                    current = next;
                }
            }
        }
    }

    async fn start_single(&self, mut job: DownloadJob) -> AcquisitionResult<StartOutcome> {
        let indexer = self.indexer()?;
        if !job.is_active() {
            debug!("Job {} is {}, not starting", job.id, job.status.as_str());
            return Ok(StartOutcome::Settled(job));
        }
        let Some((artist_name, album_title)) = job.artist_and_album() else {
            return Err(AcquisitionError::NotFound(format!(
                "job {} has no artist and album",
                job.id
            )));
        };

        if job.artist_id.is_none() {
            job.artist_id = self.resolve_artist_id(&artist_name).await;
        }
        let is_discovery = matches!(job.metadata.kind, JobKind::Discovery { .. });
        let request = AlbumRequest {
            artist_name: &artist_name,
            album_title: &album_title,
            artist_id: job.artist_id.as_deref(),
            album_id: job.target_id.as_deref(),
            is_discovery,
        };

        let reason = match indexer.add_album(&request).await {
            Ok(AddAlbumOutcome::Added(album)) => {
                job.provider_album_id = Some(album.provider_album_id.to_string());
                job.metadata.provider_foreign_album_id = Some(album.foreign_album_id);
                if job.artist_id.is_none() {
                    job.artist_id = Some(album.artist_foreign_id);
                }
                job.attempts += 1;
                job.status = JobStatus::Processing;
                job.started_at = Some(Self::now());
                job.error = None;
                self.store.update_job(&job)?;
                info!(job_id = %job.id, "Indexer accepted {}", job.subject);
                return Ok(StartOutcome::Settled(job));
            }
            Ok(AddAlbumOutcome::Unavailable) => {
                self.store.update_job(&job)?;
                return Err(AcquisitionError::ProviderUnavailable(
                    "indexer did not answer".to_string(),
                ));
            }
            Ok(AddAlbumOutcome::NotFound) => format!("Album not found: {}", job.subject),
            Err(AcquisitionError::NoCandidates(subject)) => {
                format!("No releases available for {}", subject)
            }
            Err(e) => return Err(e),
        };

        job.attempts += 1;
        if let Some(successor) = self.try_next_album_from_artist(&job, &reason).await? {
            return Ok(StartOutcome::Successor(successor));
        }
        Ok(StartOutcome::Settled(
            self.mark_job_exhausted(job, &reason).await?,
        ))
    }

    /// External artist id from the metadata source, kept only when the
    /// returned name agrees with the requested one.
    async fn resolve_artist_id(&self, artist_name: &str) -> Option<String> {
        let metadata = self.metadata.as_ref()?;
        let records = match metadata.search_artist(artist_name).await {
            Ok(records) => records,
            Err(e) => {
                debug!("Artist lookup for {} failed: {:#}", artist_name, e);
                return None;
            }
        };
        let best = records.into_iter().next()?;
        if normalize_name(&best.name) != normalize_name(artist_name) {
            debug!(
                "Discarding artist id {}: '{}' does not match '{}'",
                best.id, best.name, artist_name
            );
            return None;
        }
        Some(best.id)
    }

    /// Number of exhausted ancestors of a job.
    fn chain_depth(&self, job: &DownloadJob) -> AcquisitionResult<u32> {
        let mut depth = 0;
        let mut origin = job.metadata.origin_of_job_id.clone();
        while let Some(id) = origin {
            depth += 1;
            if depth > self.settings.max_fallback_chain {
                break;
            }
            origin = self
                .store
                .get_job(&id)?
                .and_then(|parent| parent.metadata.origin_of_job_id);
        }
        Ok(depth)
    }

    /// Mark the job exhausted and create a pending successor for another
    /// album of the same artist. Only library jobs fall back; discovery and
    /// exact-import jobs never do.
    pub async fn try_next_album_from_artist(
        &self,
        job: &DownloadJob,
        reason: &str,
    ) -> AcquisitionResult<Option<DownloadJob>> {
        if !job.metadata.kind.allows_artist_fallback() {
            return Ok(None);
        }
        let Some(indexer) = self.indexer.as_deref() else {
            return Ok(None);
        };
        if self.chain_depth(job)? >= self.settings.max_fallback_chain {
            info!(
                "Fallback chain for {} reached {} jobs, giving up",
                job.subject, self.settings.max_fallback_chain
            );
            return Ok(None);
        }
        let Some((artist_name, _)) = job.artist_and_album() else {
            return Ok(None);
        };

        let wanted_artist = normalize_name(&artist_name);
        let attempted = self
            .store
            .find_matching(JobStatus::ALL, &move |other: &DownloadJob| {
                other
                    .artist_and_album()
                    .is_some_and(|(artist, _)| normalize_name(&artist) == wanted_artist)
            })?;
        let already_tried = |foreign_id: &str, title: &str| {
            attempted.iter().any(|other| {
                other.target_id.as_deref() == Some(foreign_id)
                    || other.metadata.provider_foreign_album_id.as_deref() == Some(foreign_id)
                    || other
                        .artist_and_album()
                        .is_some_and(|(_, album)| titles_match_strictly(&album, title))
            })
        };

        let mut candidates: Vec<_> = indexer
            .artist_catalog(job.artist_id.as_deref(), &artist_name)
            .await
            .into_iter()
            .filter(|album| !album.has_files())
            .filter(|album| !already_tried(&album.foreign_album_id, &album.title))
            .collect();
        // Studio albums first, catalog order otherwise.
        candidates.sort_by_key(|album| !album.is_studio_album());
        let Some(next) = candidates.into_iter().next() else {
            debug!("No untried albums left for {}", artist_name);
            return Ok(None);
        };

        let now = Self::now();
        let mut exhausted = job.clone();
        exhausted.status = JobStatus::Exhausted;
        exhausted.error = Some(reason.to_string());
        exhausted.completed_at = Some(now);
        exhausted.provider_ref = None;

        let mut successor = DownloadJob::new(&artist_name, &next.title, job.metadata.kind.clone())
            .with_target_id(Some(next.foreign_album_id.clone()))
            .with_artist_id(job.artist_id.clone())
            .with_user(job.user_id.clone())
            .with_batch(job.batch_id.clone());
        successor.metadata.origin_of_job_id = Some(job.id.clone());

        self.store.update_job(&exhausted)?;
        self.store.create_job(&successor)?;
        info!(
            job_id = %job.id,
            "Exhausted {}, trying {} next ({})",
            job.subject, next.title, reason
        );
        Ok(Some(successor))
    }

    /// Give up on the job's current album: fall back to another album when
    /// allowed, fail terminally otherwise. Returns the job in its new state.
    pub(super) async fn escalate(
        &self,
        job: DownloadJob,
        reason: &str,
    ) -> AcquisitionResult<DownloadJob> {
        if completed_duplicate(&self.find_duplicates(&job)?).is_some() {
            // Completes through the duplicate check.
            return self.mark_job_exhausted(job, reason).await;
        }
        let Some(successor) = self.try_next_album_from_artist(&job, reason).await? else {
            return self.mark_job_exhausted(job, reason).await;
        };
        let successor_id = successor.id.clone();
        if let Err(e) = self.start_job(successor).await {
            warn!("Failed to start fallback job {}: {}", successor_id, e);
        }
        self.get_job(&job.id)
    }
}
