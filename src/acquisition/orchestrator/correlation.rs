//! Matching provider events to download jobs.
//!
//! The provider only knows its own identifiers, so events are matched through
//! a cascade going from the most specific identifier to lenient text matching.
//! Every strategy yields at most one active job.

use tracing::debug;

use super::AcquisitionOrchestrator;
use crate::acquisition::error::AcquisitionResult;
use crate::acquisition::matching::{canonical_key, loosely_contains, normalize_name, parse_subject};
use crate::acquisition::models::{DownloadJob, JobStatus, ProviderEvent};

/// Import failure reasons that no other release of the same album can fix.
const TERMINAL_IMPORT_MARKERS: &[&str] = &[
    "album not found",
    "artist not found",
    "unknown album",
    "unknown artist",
    "no matching album",
    "album is not monitored",
    "artist is not monitored",
];

/// Whether another release may import where this one failed.
pub fn is_transient_import_failure(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    !TERMINAL_IMPORT_MARKERS
        .iter()
        .any(|marker| reason.contains(marker))
}

/// Result of matching an event.
pub(super) enum EventMatch {
    Job(DownloadJob),
    /// A non-active job already tracks the provider ref; the event is late
    Known,
    Unmatched,
}

/// Artist and album named by an event, from its fields or else from the
/// release title.
pub(super) fn event_artist_and_album(event: &ProviderEvent) -> Option<(String, String)> {
    match (&event.artist_name, &event.album_title) {
        (Some(artist), Some(album)) if !artist.trim().is_empty() && !album.trim().is_empty() => {
            Some((artist.clone(), album.clone()))
        }
        _ => event.release_title.as_deref().and_then(parse_subject),
    }
}

impl AcquisitionOrchestrator {
    fn first_active(jobs: Vec<DownloadJob>) -> Option<DownloadJob> {
        jobs.into_iter().find(DownloadJob::is_active)
    }

    pub(super) fn match_event(&self, event: &ProviderEvent) -> AcquisitionResult<EventMatch> {
        if let Some(provider_ref) = event.download_id.as_deref() {
            let holders = self.store.find_by_provider_ref(provider_ref)?;
            if let Some(job) = holders.iter().find(|j| j.is_active()) {
                debug!("Event for {} matched job {} by provider ref", provider_ref, job.id);
                return Ok(EventMatch::Job(job.clone()));
            }
            if !holders.is_empty() {
                return Ok(EventMatch::Known);
            }
            let wanted = provider_ref.to_string();
            let retired = self
                .store
                .find_matching(JobStatus::ALL, &move |job: &DownloadJob| {
                    job.metadata.previous_provider_refs.contains(&wanted)
                })?;
            if !retired.is_empty() {
                debug!("Event for retired download {}", provider_ref);
                return Ok(EventMatch::Known);
            }
        }

        if let Some((strategy, job)) = self.cascade(event)? {
            debug!("Event matched job {} by {}", job.id, strategy);
            return Ok(EventMatch::Job(job));
        }

        if let Some(job) = self.settled_match(event)? {
            debug!(
                "Event for {} job {} ignored",
                job.status.as_str(),
                job.id
            );
            return Ok(EventMatch::Known);
        }
        Ok(EventMatch::Unmatched)
    }

    /// A terminal job for the event's album. Events reaching a cancelled,
    /// failed, exhausted or completed album never revive it or spawn a
    /// tracking job.
    fn settled_match(&self, event: &ProviderEvent) -> AcquisitionResult<Option<DownloadJob>> {
        if let Some(foreign_id) = event.album_foreign_id.as_deref() {
            let settled = self
                .store
                .find_by_target_id(foreign_id)?
                .into_iter()
                .find(|job| job.status.is_terminal());
            if settled.is_some() {
                return Ok(settled);
            }
        }

        let Some((artist, album)) = event_artist_and_album(event) else {
            return Ok(None);
        };
        let key = canonical_key(&artist, &album);
        let settled = self
            .store
            .find_matching(JobStatus::TERMINAL, &move |job: &DownloadJob| {
                job.logical_key().as_deref() == Some(key.as_str())
            })?;
        Ok(settled.into_iter().next())
    }

    fn cascade(&self, event: &ProviderEvent) -> AcquisitionResult<Option<(&'static str, DownloadJob)>> {
        if let Some(foreign_id) = event.album_foreign_id.as_deref() {
            if let Some(job) = Self::first_active(self.store.find_by_target_id(foreign_id)?) {
                return Ok(Some(("target id", job)));
            }

            let wanted = foreign_id.to_string();
            let by_secondary = self
                .store
                .find_matching(JobStatus::ACTIVE, &move |job: &DownloadJob| {
                    job.metadata.provider_foreign_album_id.as_deref() == Some(wanted.as_str())
                })?;
            if let Some(job) = by_secondary.into_iter().next() {
                return Ok(Some(("secondary album id", job)));
            }
        }

        if let Some(album_id) = event.provider_album_id.as_deref() {
            if let Some(job) = Self::first_active(self.store.find_by_provider_album_id(album_id)?) {
                return Ok(Some(("provider album id", job)));
            }
        }

        let names = event_artist_and_album(event);
        if let Some((artist, album)) = &names {
            let key = canonical_key(artist, album);
            let by_name = self
                .store
                .find_matching(JobStatus::ACTIVE, &move |job: &DownloadJob| {
                    job.logical_key().as_deref() == Some(key.as_str())
                })?;
            if let Some(job) = by_name.into_iter().next() {
                return Ok(Some(("canonical name", job)));
            }

            let artist = normalize_name(artist);
            let album = normalize_name(album);
            let by_subject = self
                .store
                .find_matching(JobStatus::ACTIVE, &move |job: &DownloadJob| {
                    let subject = normalize_name(&job.subject);
                    !album.is_empty() && subject.contains(&album) && subject.contains(&artist)
                })?;
            if let Some(job) = by_subject.into_iter().next() {
                return Ok(Some(("subject", job)));
            }
        }

        let needles: Vec<String> = [
            event.album_title.clone(),
            event.release_title.clone(),
            names.map(|(_, album)| album),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect();
        if needles.is_empty() {
            return Ok(None);
        }
        let lenient = self
            .store
            .find_matching(JobStatus::ACTIVE, &move |job: &DownloadJob| {
                let album = job.metadata.album_title.as_deref().unwrap_or_default();
                needles.iter().any(|needle| {
                    loosely_contains(&job.subject, needle)
                        || (!album.is_empty() && loosely_contains(album, needle))
                })
            })?;
        Ok(lenient.into_iter().next().map(|job| ("lenient scan", job)))
    }

    /// User of the most recent job for the same artist, if any.
    pub(super) fn most_recent_user_for(&self, artist: &str) -> AcquisitionResult<Option<String>> {
        let wanted = normalize_name(artist);
        let jobs = self
            .store
            .find_matching(JobStatus::ALL, &move |job: &DownloadJob| {
                job.user_id.is_some()
                    && job
                        .artist_and_album()
                        .is_some_and(|(artist, _)| normalize_name(&artist) == wanted)
            })?;
        Ok(jobs.into_iter().next().and_then(|job| job.user_id))
    }
}
