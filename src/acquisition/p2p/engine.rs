//! P2P acquisition engine.
//!
//! Keeps a single lazily opened network session, searches through the shared
//! rate limiter, ranks what peers offer and downloads the best candidates with
//! per-attempt timeouts. Batch imports pipeline searches into an independent
//! download pool.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::network::{ByteStream, P2pNetwork};
use super::query::query_variants;
use super::ranking::{
    apply_reputation, extension, rank_candidates, QualityTier, RankingTarget, TrackMatch,
};
use crate::acquisition::cache::SharedCache;
use crate::acquisition::error::{AcquisitionError, AcquisitionResult};
use crate::acquisition::matching::{canonical_key, key_words, normalize_name};
use crate::acquisition::rate_limiter::SearchRateLimiter;
use crate::acquisition::reputation::ReputationTracker;
use crate::config::P2pSettings;

/// A single track to find and download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    /// Job the track belongs to, for logging
    pub job_id: Option<String>,
    pub artist: String,
    pub title: String,
    /// Size reported by the metadata source, when known
    pub expected_size: Option<u64>,
}

impl TrackRequest {
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            job_id: None,
            artist: artist.to_string(),
            title: title.to_string(),
            expected_size: None,
        }
    }

    pub fn with_job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    /// Local name "Artist - Title.ext". Remote names like "01 - Intro.flac"
    /// are shared by many tracks.
    fn file_name_for(&self, remote_path: &str) -> String {
        match extension(remote_path) {
            Some(ext) => local_file_name(&format!("{}.{}", self.label(), ext)),
            None => local_file_name(&self.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedTrack {
    pub path: PathBuf,
    pub peer: String,
    pub size: u64,
    pub quality: QualityTier,
}

#[derive(Debug, Default)]
struct ConnectionState {
    connected: bool,
    last_attempt_at: Option<Instant>,
    consecutive_failures: u32,
}

/// Why a single download attempt failed.
enum AttemptError {
    /// The peer could not be reached or the file could not be written
    /// locally; not held against the peer
    NotAttributed(anyhow::Error),
    /// The peer stalled mid-transfer, hit the ceiling or broke the stream
    Peer(String),
    /// The file arrived but is unusable
    Invalid(String),
}

pub struct P2pEngine {
    network: Arc<dyn P2pNetwork>,
    limiter: Arc<SearchRateLimiter>,
    reputation: Arc<ReputationTracker>,
    cache: Arc<dyn SharedCache>,
    settings: P2pSettings,
    connection: Mutex<ConnectionState>,
    search_slots: Semaphore,
    download_slots: Semaphore,
    /// Destination paths of transfers in flight
    claimed_paths: std::sync::Mutex<HashSet<PathBuf>>,
    cancel: CancellationToken,
}

/// Holds a destination path for one transfer until it is dropped.
struct PathClaim<'a> {
    claimed: &'a std::sync::Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for PathClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut claimed) = self.claimed.lock() {
            claimed.remove(&self.path);
        }
    }
}

impl P2pEngine {
    pub fn new(
        network: Arc<dyn P2pNetwork>,
        limiter: Arc<SearchRateLimiter>,
        reputation: Arc<ReputationTracker>,
        cache: Arc<dyn SharedCache>,
        settings: P2pSettings,
        cancel: CancellationToken,
    ) -> Self {
        let search_slots = Semaphore::new(settings.search_concurrency.max(1));
        let download_slots = Semaphore::new(settings.download_concurrency.max(1));
        Self {
            network,
            limiter,
            reputation,
            cache,
            settings,
            connection: Mutex::new(ConnectionState::default()),
            search_slots,
            download_slots,
            claimed_paths: std::sync::Mutex::new(HashSet::new()),
            cancel,
        }
    }

    fn claim_path(&self, dest_dir: &Path, file_name: &str) -> PathClaim<'_> {
        let mut claimed = self.claimed_paths.lock().unwrap();
        let path = claim_free_path(&mut claimed, dest_dir, file_name);
        PathClaim {
            claimed: &self.claimed_paths,
            path,
        }
    }

    pub fn reputation(&self) -> &ReputationTracker {
        &self.reputation
    }

    pub fn download_dir(&self) -> &Path {
        &self.settings.download_dir
    }

    async fn ensure_connected(&self) -> AcquisitionResult<()> {
        let mut state = self.connection.lock().await;
        if state.connected {
            return Ok(());
        }

        let cooldown = Duration::from_secs(self.settings.reconnect_cooldown_secs);
        if let Some(last) = state.last_attempt_at {
            if last.elapsed() < cooldown {
                return Err(AcquisitionError::ProviderUnavailable(
                    "P2P reconnect cooling down".to_string(),
                ));
            }
        }

        state.last_attempt_at = Some(Instant::now());
        let username = self.settings.username.as_deref().unwrap_or_default();
        let password = self.settings.password.as_deref().unwrap_or_default();
        match self.network.connect(username, password).await {
            Ok(()) => {
                info!("Connected to P2P network");
                state.connected = true;
                state.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect to P2P network: {}", e);
                Err(AcquisitionError::ProviderUnavailable(e.to_string()))
            }
        }
    }

    /// Track search health; a run of bad searches usually means a dead session.
    async fn record_search_outcome(&self, produced_results: bool) {
        let mut state = self.connection.lock().await;
        if produced_results {
            state.consecutive_failures = 0;
            return;
        }
        state.consecutive_failures += 1;
        if state.connected && state.consecutive_failures >= self.settings.max_consecutive_failures
        {
            warn!(
                "{} consecutive P2P searches failed, resetting the connection",
                state.consecutive_failures
            );
            if let Err(e) = self.network.disconnect().await {
                debug!("P2P disconnect failed: {}", e);
            }
            state.connected = false;
            state.consecutive_failures = 0;
        }
    }

    fn search_cache_key(request: &TrackRequest) -> String {
        format!("p2p:search:{}", canonical_key(&request.artist, &request.title))
    }

    /// Cached matches are only trusted when the file name still carries every
    /// key word of the requested title.
    async fn cached_matches(&self, request: &TrackRequest) -> Option<Vec<TrackMatch>> {
        let raw = match self.cache.get(&Self::search_cache_key(request)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read P2P search cache: {}", e);
                return None;
            }
        };
        let cached: Vec<TrackMatch> = serde_json::from_str(&raw).ok()?;
        let words = key_words(&request.title);
        let trusted: Vec<TrackMatch> = cached
            .into_iter()
            .filter(|m| {
                let name = normalize_name(m.file_name());
                let name_words: Vec<&str> = name.split_whitespace().collect();
                !words.is_empty() && words.iter().all(|w| name_words.contains(&w.as_str()))
            })
            .collect();
        if trusted.is_empty() {
            None
        } else {
            Some(trusted)
        }
    }

    async fn store_matches(&self, request: &TrackRequest, matches: &[TrackMatch]) {
        let raw = match serde_json::to_string(matches) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode P2P search results: {}", e);
                return;
            }
        };
        let ttl = Duration::from_secs(self.settings.search_cache_ttl_secs);
        if let Err(e) = self
            .cache
            .set(&Self::search_cache_key(request), &raw, Some(ttl))
            .await
        {
            warn!("Failed to cache P2P search results: {}", e);
        }
    }

    /// Ranked candidates for a track, best first. Empty when nothing usable
    /// was found.
    pub async fn search_track(&self, request: &TrackRequest) -> AcquisitionResult<Vec<TrackMatch>> {
        if let Some(cached) = self.cached_matches(request).await {
            let ranked = apply_reputation(cached, &self.reputation).await;
            if !ranked.is_empty() {
                debug!("Using cached P2P matches for {}", request.label());
                return Ok(ranked);
            }
        }

        self.ensure_connected().await?;

        let target = RankingTarget {
            artist: &request.artist,
            title: &request.title,
            expected_size: request.expected_size,
            min_file_size: self.settings.min_file_size_bytes,
            size_tolerance: self.settings.size_tolerance,
        };
        let search_timeout = Duration::from_secs(self.settings.search_timeout_secs);

        for query in query_variants(&request.artist, &request.title) {
            self.limiter.acquire_cancellable(&self.cancel).await?;

            let responses = match self.network.search(&query, search_timeout).await {
                Ok(responses) => responses,
                Err(e) => {
                    warn!("P2P search '{}' failed: {}", query, e);
                    self.record_search_outcome(false).await;
                    continue;
                }
            };
            self.record_search_outcome(!responses.is_empty()).await;
            if responses.is_empty() {
                debug!("P2P search '{}' returned nothing", query);
                continue;
            }

            let ranked = rank_candidates(
                &responses,
                &target,
                self.settings.min_score,
                self.settings.max_candidates,
            );
            if ranked.is_empty() {
                debug!(
                    "P2P search '{}' returned {} responses, none usable",
                    query,
                    responses.len()
                );
                continue;
            }
            self.store_matches(request, &ranked).await;

            let ranked = apply_reputation(ranked, &self.reputation).await;
            if !ranked.is_empty() {
                info!(
                    "P2P search '{}' found {} candidates for {}",
                    query,
                    ranked.len(),
                    request.label()
                );
                return Ok(ranked);
            }
        }

        Ok(Vec::new())
    }

    /// Try candidates in order, at most one attempt per peer, until one
    /// download succeeds or the attempt budget runs out.
    pub async fn download_track(
        &self,
        request: &TrackRequest,
        candidates: &[TrackMatch],
        dest_dir: &Path,
    ) -> AcquisitionResult<DownloadedTrack> {
        let mut tried_peers = HashSet::new();
        let mut attempts = 0;
        let mut last_invalid: Option<String> = None;

        for candidate in candidates {
            if attempts >= self.settings.max_download_attempts || self.cancel.is_cancelled() {
                break;
            }
            if !tried_peers.insert(candidate.peer.as_str()) {
                continue;
            }
            attempts += 1;

            match self.download_candidate(request, candidate, dest_dir).await {
                Ok(track) => {
                    self.reputation.record_success(&candidate.peer).await;
                    info!(
                        "Downloaded {} from {} ({} bytes)",
                        request.label(),
                        candidate.peer,
                        track.size
                    );
                    return Ok(track);
                }
                Err(AttemptError::NotAttributed(e)) => {
                    warn!(
                        "Could not start transfer of {} from {}: {}",
                        candidate.path, candidate.peer, e
                    );
                }
                Err(AttemptError::Peer(reason)) => {
                    warn!(
                        "Transfer of {} from {} failed: {}",
                        candidate.path, candidate.peer, reason
                    );
                    self.reputation.record_failure(&candidate.peer).await;
                }
                Err(AttemptError::Invalid(reason)) => {
                    warn!(
                        "Rejected {} from {}: {}",
                        candidate.path, candidate.peer, reason
                    );
                    self.reputation.record_failure(&candidate.peer).await;
                    last_invalid = Some(reason);
                }
            }
        }

        match last_invalid {
            Some(reason) => Err(AcquisitionError::ValidationFailure(format!(
                "{}: {}",
                request.label(),
                reason
            ))),
            None => Err(AcquisitionError::NoCandidates(request.label())),
        }
    }

    async fn download_candidate(
        &self,
        request: &TrackRequest,
        candidate: &TrackMatch,
        dest_dir: &Path,
    ) -> Result<DownloadedTrack, AttemptError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| AttemptError::NotAttributed(e.into()))?;

        let claim = self.claim_path(dest_dir, &request.file_name_for(&candidate.path));
        let final_path = claim.path.clone();
        let mut part_name = final_path.clone().into_os_string();
        part_name.push(".part");
        let part_path = PathBuf::from(part_name);

        let connect_timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let stream = match timeout(
            connect_timeout,
            self.network.download(&candidate.peer, &candidate.path),
        )
        .await
        {
            Err(_) => {
                return Err(AttemptError::NotAttributed(anyhow::anyhow!(
                    "peer did not answer within {}s",
                    connect_timeout.as_secs()
                )))
            }
            Ok(Err(e)) => return Err(AttemptError::NotAttributed(e)),
            Ok(Ok(stream)) => stream,
        };

        let ceiling = Duration::from_secs(self.settings.download_ceiling_secs);
        let written = tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(AttemptError::NotAttributed(anyhow::anyhow!("download cancelled")))
            }
            result = timeout(ceiling, self.write_stream(stream, &part_path)) => match result {
                Err(_) => Err(AttemptError::Peer(format!(
                    "exceeded {}s download ceiling",
                    ceiling.as_secs()
                ))),
                Ok(result) => result,
            },
        };

        let size = match written {
            Ok(size) => size,
            Err(e) => {
                remove_partial(&part_path).await;
                return Err(e);
            }
        };

        if size < self.settings.min_file_size_bytes {
            remove_partial(&part_path).await;
            return Err(AttemptError::Invalid(format!(
                "file too small ({} bytes)",
                size
            )));
        }

        let expected = request.expected_size.unwrap_or(candidate.size);
        if expected > 0 {
            let mismatch = (size as f64 - expected as f64).abs() / expected as f64;
            if mismatch > self.settings.size_tolerance {
                warn!(
                    "Size of {} differs from the expected {} bytes by {:.0}%",
                    final_path.display(),
                    expected,
                    mismatch * 100.0
                );
            }
        }

        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            remove_partial(&part_path).await;
            return Err(AttemptError::NotAttributed(e.into()));
        }

        Ok(DownloadedTrack {
            path: final_path,
            peer: candidate.peer.clone(),
            size,
            quality: candidate.quality,
        })
    }

    async fn write_stream(
        &self,
        mut stream: ByteStream,
        part_path: &Path,
    ) -> Result<u64, AttemptError> {
        let mut file = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| AttemptError::NotAttributed(e.into()))?;
        let inactivity = Duration::from_secs(self.settings.inactivity_timeout_secs);
        let mut written = 0u64;

        loop {
            match timeout(inactivity, stream.next()).await {
                Err(_) => {
                    return Err(AttemptError::Peer(format!(
                        "no data for {}s",
                        inactivity.as_secs()
                    )))
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(AttemptError::Peer(format!("stream error: {}", e))),
                Ok(Some(Ok(chunk))) => {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| AttemptError::NotAttributed(e.into()))?;
                    written += chunk.len() as u64;
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| AttemptError::NotAttributed(e.into()))?;
        Ok(written)
    }

    /// Search and download one track.
    pub async fn acquire_track(
        &self,
        request: &TrackRequest,
        dest_dir: &Path,
    ) -> AcquisitionResult<DownloadedTrack> {
        let candidates = self.search_track(request).await?;
        if candidates.is_empty() {
            return Err(AcquisitionError::NoCandidates(request.label()));
        }
        self.download_track(request, &candidates, dest_dir).await
    }

    /// Acquire many tracks. Searches and downloads run in separate bounded
    /// pools; a track moves to the download pool as soon as its search is
    /// done. Results come back in request order.
    pub async fn run_batch(
        &self,
        requests: &[TrackRequest],
        dest_dir: &Path,
    ) -> Vec<AcquisitionResult<DownloadedTrack>> {
        info!("Starting P2P batch of {} tracks", requests.len());
        let results = join_all(
            requests
                .iter()
                .map(|request| self.pipeline_track(request, dest_dir)),
        )
        .await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        info!(
            "P2P batch finished: {}/{} tracks downloaded",
            succeeded,
            requests.len()
        );
        results
    }

    async fn pipeline_track(
        &self,
        request: &TrackRequest,
        dest_dir: &Path,
    ) -> AcquisitionResult<DownloadedTrack> {
        let candidates = {
            let _permit = self.search_slots.acquire().await.map_err(|_| {
                AcquisitionError::ProviderUnavailable("P2P search pool closed".to_string())
            })?;
            self.search_track(request).await?
        };
        if candidates.is_empty() {
            return Err(AcquisitionError::NoCandidates(request.label()));
        }

        let _permit = self.download_slots.acquire().await.map_err(|_| {
            AcquisitionError::ProviderUnavailable("P2P download pool closed".to_string())
        })?;
        self.download_track(request, &candidates, dest_dir).await
    }
}

/// Claim `file_name` in `dest_dir`, numbering it "name (2).ext" and up while
/// another transfer holds the same path.
fn claim_free_path(claimed: &mut HashSet<PathBuf>, dest_dir: &Path, file_name: &str) -> PathBuf {
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };
    let mut path = dest_dir.join(file_name);
    let mut n = 2;
    while !claimed.insert(path.clone()) {
        let numbered = match ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        path = dest_dir.join(numbered);
        n += 1;
    }
    path
}

/// Peer file names may carry characters that are not valid locally.
fn local_file_name(remote: &str) -> String {
    let name: String = remote
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let name = name.trim().trim_start_matches('.').to_string();
    if name.is_empty() {
        "track".to_string()
    } else {
        name
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial file {}: {}", path.display(), e);
        }
    }
}
