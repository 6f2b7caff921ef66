//! Acquisition logic on top of the indexer provider API.
//!
//! Transport failures are caught here, logged, and turned into empty results,
//! so callers only see outcomes. The one exception is a strict album search
//! that finds no release at all, reported as `NoCandidates`.

use super::api::IndexerApi;
use super::types::*;
use crate::acquisition::error::{AcquisitionError, AcquisitionResult};
use crate::acquisition::matching::{normalize_name, titles_match_strictly};
use crate::acquisition::metadata::MetadataLookup;
use crate::acquisition::retry::{retry_until, RetrySchedule};
use crate::config::IndexerSettings;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Album the caller wants the provider to acquire.
#[derive(Debug, Clone, Copy)]
pub struct AlbumRequest<'a> {
    pub artist_name: &'a str,
    pub album_title: &'a str,
    /// External artist identifier, if resolved
    pub artist_id: Option<&'a str>,
    /// External album identifier, if known
    pub album_id: Option<&'a str>,
    pub is_discovery: bool,
}

/// Album accepted by the provider and sent to its download client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedAlbum {
    pub provider_album_id: i64,
    pub foreign_album_id: String,
    pub title: String,
    pub artist_provider_id: i64,
    pub artist_foreign_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddAlbumOutcome {
    Added(IndexedAlbum),
    /// Artist or album unknown to the provider
    NotFound,
    /// The provider could not be reached
    Unavailable,
}

enum AlbumSearch {
    Added(IndexedAlbum),
    NotFound,
    NoReleases,
}

pub struct IndexerClient {
    api: Arc<dyn IndexerApi>,
    metadata: Arc<dyn MetadataLookup>,
    settings: IndexerSettings,
    discovery_tag: OnceCell<i64>,
    shutdown: CancellationToken,
}

impl IndexerClient {
    pub fn new(
        api: Arc<dyn IndexerApi>,
        metadata: Arc<dyn MetadataLookup>,
        settings: IndexerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            metadata,
            settings,
            discovery_tag: OnceCell::new(),
            shutdown,
        }
    }

    fn poll_schedule(&self) -> RetrySchedule {
        RetrySchedule::fixed(
            self.settings.album_poll_attempts.max(1),
            Duration::from_secs(self.settings.album_poll_delay_secs),
        )
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    // =========================================================================
    // Artists
    // =========================================================================

    /// Find the provider's record for an artist.
    ///
    /// With an external id only an exact id match is accepted; when the
    /// provider lookup is degraded a minimal record is synthesized from the
    /// metadata source. Without an id, candidates are scored by name.
    pub async fn search_artist(
        &self,
        name: &str,
        external_id: Option<&str>,
    ) -> Option<ArtistResource> {
        match external_id {
            Some(id) => {
                match self.api.lookup_artist(&format!("lidarr:{}", id)).await {
                    Ok(results) => {
                        if let Some(artist) =
                            results.into_iter().find(|a| a.foreign_artist_id == id)
                        {
                            return Some(artist);
                        }
                        debug!("Indexer lookup for artist {} returned no exact match", id);
                    }
                    Err(e) => warn!("Indexer artist lookup for {} failed: {:#}", id, e),
                }
                self.synthesize_artist(id).await
            }
            None => match self.api.lookup_artist(name).await {
                Ok(candidates) => best_scored_artist(name, candidates),
                Err(e) => {
                    warn!("Indexer artist search for '{}' failed: {:#}", name, e);
                    None
                }
            },
        }
    }

    async fn synthesize_artist(&self, external_id: &str) -> Option<ArtistResource> {
        match self.metadata.lookup_artist(external_id).await {
            Ok(Some(record)) => Some(ArtistResource {
                artist_name: record.name,
                foreign_artist_id: external_id.to_string(),
                artist_type: record.artist_type,
                quality_profile_id: Some(self.settings.quality_profile_id),
                metadata_profile_id: Some(self.settings.metadata_profile_id),
                root_folder_path: Some(self.settings.root_folder.clone()),
                ..Default::default()
            }),
            Ok(None) => {
                warn!("Metadata source does not know artist {}", external_id);
                None
            }
            Err(e) => {
                warn!("Metadata lookup for artist {} failed: {:#}", external_id, e);
                None
            }
        }
    }

    /// Make sure the artist exists and is monitored on the provider.
    pub async fn add_artist(
        &self,
        name: &str,
        external_id: Option<&str>,
        is_discovery: bool,
    ) -> Option<ArtistResource> {
        match self.add_artist_inner(name, external_id, is_discovery).await {
            Ok(artist) => artist,
            Err(e) => {
                warn!("Failed to add artist '{}' to indexer: {:#}", name, e);
                None
            }
        }
    }

    async fn add_artist_inner(
        &self,
        name: &str,
        external_id: Option<&str>,
        is_discovery: bool,
    ) -> Result<Option<ArtistResource>> {
        let chosen = match external_id {
            Some(id) => {
                let mut candidates = self
                    .api
                    .lookup_artist(&format!("lidarr:{}", id))
                    .await
                    .unwrap_or_default();
                for artist in self.api.lookup_artist(name).await.unwrap_or_default() {
                    if !candidates
                        .iter()
                        .any(|c| c.foreign_artist_id == artist.foreign_artist_id)
                    {
                        candidates.push(artist);
                    }
                }
                match select_artist_for_add(id, &candidates) {
                    Some(artist) => Some(artist),
                    None => self.synthesize_artist(id).await,
                }
            }
            None => best_scored_artist(name, self.api.lookup_artist(name).await?),
        };
        let Some(chosen) = chosen else {
            return Ok(None);
        };
        self.ensure_artist_added(chosen, is_discovery).await.map(Some)
    }

    async fn ensure_artist_added(
        &self,
        artist: ArtistResource,
        is_discovery: bool,
    ) -> Result<ArtistResource> {
        let tag = if is_discovery {
            self.discovery_tag_id().await
        } else {
            None
        };

        let existing = self
            .api
            .list_artists()
            .await?
            .into_iter()
            .find(|a| a.foreign_artist_id == artist.foreign_artist_id);

        if let Some(mut existing) = existing {
            let mut changed = !existing.monitored;
            existing.monitored = true;
            if let Some(tag) = tag {
                if !existing.tags.contains(&tag) {
                    existing.tags.push(tag);
                    changed = true;
                }
            }
            if !changed {
                return Ok(existing);
            }
            debug!("Updating existing indexer artist {}", existing.artist_name);
            return self.api.update_artist(&existing).await;
        }

        let root_folder = self.ensure_root_folder().await?;
        let new_artist = ArtistResource {
            id: None,
            monitored: true,
            quality_profile_id: Some(self.settings.quality_profile_id),
            metadata_profile_id: Some(self.settings.metadata_profile_id),
            root_folder_path: Some(root_folder),
            tags: tag.into_iter().collect(),
            add_options: Some(AddArtistOptions {
                monitor: "none".to_string(),
                search_for_missing_albums: false,
            }),
            ..artist
        };
        info!(
            "Adding artist {} ({}) to indexer",
            new_artist.artist_name, new_artist.foreign_artist_id
        );
        self.api.add_artist(&new_artist).await
    }

    async fn ensure_root_folder(&self) -> Result<String> {
        let folders = self.api.root_folders().await?;
        let wanted = self.settings.root_folder.trim_end_matches('/');
        if folders
            .iter()
            .any(|f| f.path.trim_end_matches('/') == wanted)
        {
            return Ok(self.settings.root_folder.clone());
        }

        match self.api.add_root_folder(&self.settings.root_folder).await {
            Ok(folder) => Ok(folder.path),
            Err(e) => {
                warn!(
                    "Could not create root folder {}: {:#}, using the first existing one",
                    self.settings.root_folder, e
                );
                folders
                    .into_iter()
                    .next()
                    .map(|f| f.path)
                    .context("Indexer has no root folder")
            }
        }
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// Id of the discovery tag, created on first use and cached afterwards.
    pub async fn discovery_tag_id(&self) -> Option<i64> {
        let label = &self.settings.discovery_tag;
        let result = self
            .discovery_tag
            .get_or_try_init(|| async {
                let existing = self
                    .api
                    .tags()
                    .await?
                    .into_iter()
                    .find(|t| t.label.eq_ignore_ascii_case(label));
                let tag_id = match existing {
                    Some(tag) => tag.id,
                    None => self.api.create_tag(label).await?.id,
                };
                Ok::<i64, anyhow::Error>(tag_id)
            })
            .await;
        match result {
            Ok(id) => Some(*id),
            Err(e) => {
                warn!("Failed to get or create tag '{}': {:#}", label, e);
                None
            }
        }
    }

    // =========================================================================
    // Albums
    // =========================================================================

    /// Add the artist, locate the album in the provider's catalog and grab
    /// its best release.
    pub async fn add_album(&self, request: &AlbumRequest<'_>) -> AcquisitionResult<AddAlbumOutcome> {
        match self.try_add_album(request).await {
            Ok(AlbumSearch::Added(album)) => Ok(AddAlbumOutcome::Added(album)),
            Ok(AlbumSearch::NotFound) => Ok(AddAlbumOutcome::NotFound),
            Ok(AlbumSearch::NoReleases) => Err(AcquisitionError::NoCandidates(format!(
                "{} - {}",
                request.artist_name, request.album_title
            ))),
            Err(e) => {
                warn!(
                    "Indexer unavailable while adding {} - {}: {:#}",
                    request.artist_name, request.album_title, e
                );
                Ok(AddAlbumOutcome::Unavailable)
            }
        }
    }

    async fn try_add_album(&self, request: &AlbumRequest<'_>) -> Result<AlbumSearch> {
        let Some(artist) = self
            .add_artist_inner(request.artist_name, request.artist_id, request.is_discovery)
            .await?
        else {
            return Ok(AlbumSearch::NotFound);
        };
        let artist_id = artist.id.context("Indexer returned an artist without id")?;

        let refreshed = AtomicBool::new(false);
        let transport_failed = AtomicBool::new(false);
        let found = retry_until(&self.poll_schedule(), &self.shutdown, |_| {
            let refreshed = &refreshed;
            let transport_failed = &transport_failed;
            async move {
                match self.find_album(artist_id, request).await {
                    Ok(Some(album)) => Some(album),
                    Ok(None) => {
                        transport_failed.store(false, Ordering::SeqCst);
                        if !refreshed.swap(true, Ordering::SeqCst) {
                            self.refresh_artist(artist_id).await;
                        }
                        None
                    }
                    Err(e) => {
                        debug!("Polling albums of artist {} failed: {:#}", artist_id, e);
                        transport_failed.store(true, Ordering::SeqCst);
                        None
                    }
                }
            }
        })
        .await;

        let Some(mut album) = found else {
            if transport_failed.load(Ordering::SeqCst) {
                anyhow::bail!("Indexer stopped answering while polling for the album");
            }
            info!(
                "Album {} - {} not found in indexer catalog",
                request.artist_name, request.album_title
            );
            return Ok(AlbumSearch::NotFound);
        };

        if !album.monitored {
            album.monitored = true;
            album = self.api.update_album(&album).await?;
        }

        let mut releases = self.sorted_releases(album.id).await?;
        if releases.is_empty() {
            debug!("No releases known for album {}, refreshing artist", album.id);
            self.refresh_artist(artist_id).await;
            self.pause(Duration::from_secs(self.settings.refresh_wait_secs))
                .await;
            releases = self.sorted_releases(album.id).await?;
        }

        if !releases.iter().any(|r| r.approved)
            && self.settings.allow_any_release_escalation
            && !album.any_release_ok
        {
            info!(
                "No acceptable release for {} - {}, accepting any release",
                request.artist_name, album.title
            );
            album.any_release_ok = true;
            album = self.api.update_album(&album).await?;
            releases = self.sorted_releases(album.id).await?;
        }

        let Some(best) = releases.into_iter().find(|r| r.approved) else {
            return Ok(AlbumSearch::NoReleases);
        };
        self.api.grab_release(&best).await?;
        info!("Grabbed release '{}' for album {}", best.title, album.title);

        Ok(AlbumSearch::Added(IndexedAlbum {
            provider_album_id: album.id,
            foreign_album_id: album.foreign_album_id,
            title: album.title,
            artist_provider_id: artist_id,
            artist_foreign_id: artist.foreign_artist_id,
        }))
    }

    async fn find_album(
        &self,
        artist_id: i64,
        request: &AlbumRequest<'_>,
    ) -> Result<Option<AlbumResource>> {
        let albums = self.api.list_albums(artist_id).await?;
        if let Some(album_id) = request.album_id {
            if let Some(album) = albums.iter().find(|a| a.foreign_album_id == album_id) {
                return Ok(Some(album.clone()));
            }
        }
        Ok(albums
            .into_iter()
            .find(|a| titles_match_strictly(&a.title, request.album_title)))
    }

    async fn refresh_artist(&self, artist_id: i64) {
        if let Err(e) = self
            .api
            .run_command(&CommandRequest::RefreshArtist { artist_id })
            .await
        {
            warn!("Failed to refresh artist {}: {:#}", artist_id, e);
        }
    }

    // =========================================================================
    // Releases and queue
    // =========================================================================

    async fn sorted_releases(&self, album_id: i64) -> Result<Vec<ReleaseResource>> {
        let mut releases = self.api.list_releases(album_id).await?;
        // Stable: ties keep the provider's order.
        releases.sort_by(|a, b| {
            b.approved
                .cmp(&a.approved)
                .then_with(|| b.peers().cmp(&a.peers()))
        });
        Ok(releases)
    }

    /// Releases of an album, approved first, then by peer count.
    pub async fn releases_for_album(&self, album_id: i64) -> Vec<ReleaseResource> {
        self.sorted_releases(album_id).await.unwrap_or_else(|e| {
            warn!("Failed to list releases for album {}: {:#}", album_id, e);
            Vec::new()
        })
    }

    pub async fn grab_release(&self, release: &ReleaseResource) -> bool {
        match self.api.grab_release(release).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to grab release '{}': {:#}", release.title, e);
                false
            }
        }
    }

    /// Remove a download from the provider's queue and blocklist it. With
    /// `search_again` the provider is asked to look for another release.
    pub async fn blocklist_and_remove(&self, provider_ref: &str, search_again: bool) -> bool {
        let record = match self.download_progress_inner(provider_ref).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("Download {} is no longer queued, nothing to blocklist", provider_ref);
                return false;
            }
            Err(e) => {
                warn!("Failed to read indexer queue: {:#}", e);
                return false;
            }
        };

        if let Err(e) = self.api.remove_queue_item(record.id, true, true).await {
            warn!("Failed to blocklist download {}: {:#}", provider_ref, e);
            return false;
        }
        info!(
            "Blocklisted download {} (search again: {})",
            provider_ref, search_again
        );

        if search_again {
            if let Some(album_id) = record.album_id {
                let command = CommandRequest::AlbumSearch {
                    album_ids: vec![album_id],
                };
                if let Err(e) = self.api.run_command(&command).await {
                    warn!("Failed to trigger search for album {}: {:#}", album_id, e);
                }
            }
        }
        true
    }

    async fn download_progress_inner(&self, provider_ref: &str) -> Result<Option<QueueRecord>> {
        Ok(self
            .api
            .list_queue()
            .await?
            .into_iter()
            .find(|r| r.download_id.as_deref() == Some(provider_ref)))
    }

    /// Queue record of a download, if the provider still tracks it.
    pub async fn download_progress(&self, provider_ref: &str) -> Option<QueueRecord> {
        self.download_progress_inner(provider_ref)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to read indexer queue: {:#}", e);
                None
            })
    }

    // =========================================================================
    // Catalog queries
    // =========================================================================

    async fn find_known_artist(
        &self,
        artist_foreign_id: Option<&str>,
        artist_name: &str,
    ) -> Result<Option<ArtistResource>> {
        let artists = self.api.list_artists().await?;
        if let Some(id) = artist_foreign_id {
            if let Some(artist) = artists.iter().find(|a| a.foreign_artist_id == id) {
                return Ok(Some(artist.clone()));
            }
        }
        let wanted = normalize_name(artist_name);
        Ok(artists
            .into_iter()
            .find(|a| normalize_name(&a.artist_name) == wanted))
    }

    async fn artist_catalog_inner(
        &self,
        artist_foreign_id: Option<&str>,
        artist_name: &str,
    ) -> Result<Vec<AlbumResource>> {
        match self.find_known_artist(artist_foreign_id, artist_name).await? {
            Some(artist) => {
                let id = artist.id.context("Known artist without id")?;
                self.api.list_albums(id).await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Albums of an artist as known to the provider.
    pub async fn artist_catalog(
        &self,
        artist_foreign_id: Option<&str>,
        artist_name: &str,
    ) -> Vec<AlbumResource> {
        self.artist_catalog_inner(artist_foreign_id, artist_name)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to list catalog of {}: {:#}", artist_name, e);
                Vec::new()
            })
    }

    /// Whether the provider already has files for the album, looked up by
    /// external id first, then by artist and title.
    pub async fn is_album_available(
        &self,
        foreign_album_id: Option<&str>,
        artist_name: Option<&str>,
        album_title: Option<&str>,
    ) -> bool {
        if let Some(id) = foreign_album_id {
            match self.api.albums_by_foreign_id(id).await {
                Ok(albums) if albums.iter().any(AlbumResource::has_files) => return true,
                Ok(_) => {}
                Err(e) => warn!("Failed to look up album {}: {:#}", id, e),
            }
        }

        let (Some(artist_name), Some(album_title)) = (artist_name, album_title) else {
            return false;
        };
        self.artist_catalog(None, artist_name)
            .await
            .iter()
            .any(|a| a.has_files() && titles_match_strictly(&a.title, album_title))
    }
}

// =============================================================================
// Artist selection
// =============================================================================

/// Score an artist candidate against the searched name.
pub fn score_artist(query: &str, artist: &ArtistResource) -> i32 {
    let mut score = 0;
    if artist.is_type("Person") || artist.is_type("Group") {
        score += 50;
    }
    score += 10 * artist.album_count() as i32;

    let wanted = normalize_name(query);
    let name = normalize_name(&artist.artist_name);
    if !wanted.is_empty() && name == wanted {
        score += 500;
    } else if !wanted.is_empty() && !name.is_empty() && (name.contains(&wanted) || wanted.contains(&name)) {
        score += 250;
    }

    let votes = artist.ratings.as_ref().map_or(0, |r| r.votes);
    score += (votes / 10).min(20) as i32;

    if name.contains("various artists") || name.contains("compilation") {
        score -= 1000;
    }
    score
}

/// Highest scoring candidate, the first one on ties.
pub fn best_scored_artist(query: &str, candidates: Vec<ArtistResource>) -> Option<ArtistResource> {
    let mut best: Option<(i32, ArtistResource)> = None;
    for candidate in candidates {
        let score = score_artist(query, &candidate);
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, artist)| artist)
}

/// Exact id match, except that a "Group" with no albums gives way to a
/// same-name "Person" or "Artist" that has some.
pub fn select_artist_for_add(
    external_id: &str,
    candidates: &[ArtistResource],
) -> Option<ArtistResource> {
    let exact = candidates
        .iter()
        .find(|a| a.foreign_artist_id == external_id)?;

    if exact.is_type("Group") && exact.album_count() == 0 {
        let name = normalize_name(&exact.artist_name);
        let replacement = candidates
            .iter()
            .filter(|a| a.foreign_artist_id != external_id)
            .filter(|a| a.is_type("Person") || a.is_type("Artist"))
            .filter(|a| a.album_count() > 0 && normalize_name(&a.artist_name) == name)
            .max_by_key(|a| a.album_count());
        if let Some(person) = replacement {
            info!(
                "Using {} ({}) instead of empty group {}",
                person.artist_name, person.foreign_artist_id, external_id
            );
            return Some(person.clone());
        }
    }
    Some(exact.clone())
}
