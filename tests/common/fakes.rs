//! In-memory stand-ins for the indexer provider, the P2P network, the
//! metadata source and the notification channels.

#![allow(dead_code)]

use album_acquirer::acquisition::indexer::{
    AlbumResource, ArtistResource, CommandRequest, IndexerApi, QueueRecord, ReleaseResource,
    RootFolderResource, TagResource,
};
use album_acquirer::acquisition::p2p::{ByteStream, P2pNetwork, SearchResponse};
use album_acquirer::acquisition::{
    ArtistRecord, BatchCompletionNotifier, BatchSummary, DownloadJob, MetadataLookup,
    NotificationSink,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Indexer provider
// =============================================================================

#[derive(Default)]
struct IndexerState {
    unavailable: bool,
    lookups: HashMap<String, Vec<ArtistResource>>,
    artists: Vec<ArtistResource>,
    /// Albums keyed by foreign artist id
    albums: HashMap<String, Vec<AlbumResource>>,
    releases: HashMap<i64, Vec<ReleaseResource>>,
    queue: Vec<QueueRecord>,
    grabbed: Vec<String>,
    removed: Vec<(i64, bool, bool)>,
    commands: Vec<CommandRequest>,
    root_folders: Vec<RootFolderResource>,
    tags: Vec<TagResource>,
    next_id: i64,
}

impl IndexerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        1000 + self.next_id
    }
}

#[derive(Default)]
pub struct FakeIndexerApi {
    state: Mutex<IndexerState>,
}

impl FakeIndexerApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Results returned for a lookup term (a name or `lidarr:{id}`).
    pub fn add_lookup(&self, term: &str, results: Vec<ArtistResource>) {
        self.state
            .lock()
            .unwrap()
            .lookups
            .insert(term.to_string(), results);
    }

    /// Register an artist as already added to the provider. Returns its id.
    pub fn add_known_artist(&self, mut artist: ArtistResource) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        artist.id = Some(id);
        artist.monitored = true;
        state.artists.push(artist);
        id
    }

    pub fn set_albums(&self, foreign_artist_id: &str, albums: Vec<AlbumResource>) {
        self.state
            .lock()
            .unwrap()
            .albums
            .insert(foreign_artist_id.to_string(), albums);
    }

    pub fn set_releases(&self, album_id: i64, releases: Vec<ReleaseResource>) {
        self.state.lock().unwrap().releases.insert(album_id, releases);
    }

    pub fn add_queue_record(&self, record: QueueRecord) {
        self.state.lock().unwrap().queue.push(record);
    }

    pub fn artists(&self) -> Vec<ArtistResource> {
        self.state.lock().unwrap().artists.clone()
    }

    pub fn grabbed(&self) -> Vec<String> {
        self.state.lock().unwrap().grabbed.clone()
    }

    pub fn removed(&self) -> Vec<(i64, bool, bool)> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn commands(&self) -> Vec<CommandRequest> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn tags(&self) -> Vec<TagResource> {
        self.state.lock().unwrap().tags.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.state.lock().unwrap().unavailable {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl IndexerApi for FakeIndexerApi {
    async fn lookup_artist(&self, term: &str) -> Result<Vec<ArtistResource>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .lookups
            .get(term)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_artists(&self) -> Result<Vec<ArtistResource>> {
        self.check_available()?;
        Ok(self.state.lock().unwrap().artists.clone())
    }

    async fn add_artist(&self, artist: &ArtistResource) -> Result<ArtistResource> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        let mut added = artist.clone();
        added.id = Some(state.next_id());
        added.add_options = None;
        state.artists.push(added.clone());
        Ok(added)
    }

    async fn update_artist(&self, artist: &ArtistResource) -> Result<ArtistResource> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.artists.iter_mut().find(|a| a.id == artist.id) {
            *existing = artist.clone();
        }
        Ok(artist.clone())
    }

    async fn list_albums(&self, artist_id: i64) -> Result<Vec<AlbumResource>> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        let Some(artist) = state.artists.iter().find(|a| a.id == Some(artist_id)) else {
            return Ok(Vec::new());
        };
        Ok(state
            .albums
            .get(&artist.foreign_artist_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn albums_by_foreign_id(&self, foreign_album_id: &str) -> Result<Vec<AlbumResource>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .albums
            .values()
            .flatten()
            .filter(|a| a.foreign_album_id == foreign_album_id)
            .cloned()
            .collect())
    }

    async fn update_album(&self, album: &AlbumResource) -> Result<AlbumResource> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        for existing in state.albums.values_mut().flatten() {
            if existing.id == album.id {
                *existing = album.clone();
            }
        }
        Ok(album.clone())
    }

    async fn list_releases(&self, album_id: i64) -> Result<Vec<ReleaseResource>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .releases
            .get(&album_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn grab_release(&self, release: &ReleaseResource) -> Result<()> {
        self.check_available()?;
        self.state
            .lock()
            .unwrap()
            .grabbed
            .push(release.guid.clone());
        Ok(())
    }

    async fn list_queue(&self) -> Result<Vec<QueueRecord>> {
        self.check_available()?;
        Ok(self.state.lock().unwrap().queue.clone())
    }

    async fn remove_queue_item(
        &self,
        id: i64,
        blocklist: bool,
        skip_redownload: bool,
    ) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        state.queue.retain(|r| r.id != id);
        state.removed.push((id, blocklist, skip_redownload));
        Ok(())
    }

    async fn run_command(&self, command: &CommandRequest) -> Result<()> {
        self.check_available()?;
        self.state.lock().unwrap().commands.push(command.clone());
        Ok(())
    }

    async fn root_folders(&self) -> Result<Vec<RootFolderResource>> {
        self.check_available()?;
        Ok(self.state.lock().unwrap().root_folders.clone())
    }

    async fn add_root_folder(&self, path: &str) -> Result<RootFolderResource> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        let folder = RootFolderResource {
            id: Some(state.next_id()),
            path: path.to_string(),
        };
        state.root_folders.push(folder.clone());
        Ok(folder)
    }

    async fn tags(&self) -> Result<Vec<TagResource>> {
        self.check_available()?;
        Ok(self.state.lock().unwrap().tags.clone())
    }

    async fn create_tag(&self, label: &str) -> Result<TagResource> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        let tag = TagResource {
            id: state.next_id(),
            label: label.to_string(),
        };
        state.tags.push(tag.clone());
        Ok(tag)
    }
}

// =============================================================================
// Metadata source
// =============================================================================

/// Returns every configured record for any search.
#[derive(Default)]
pub struct FakeMetadata {
    records: Mutex<Vec<ArtistRecord>>,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_artist(&self, id: &str, name: &str, artist_type: &str) {
        self.records.lock().unwrap().push(ArtistRecord {
            id: id.to_string(),
            name: name.to_string(),
            artist_type: Some(artist_type.to_string()),
            score: Some(100),
        });
    }
}

#[async_trait]
impl MetadataLookup for FakeMetadata {
    async fn search_artist(&self, _name: &str) -> Result<Vec<ArtistRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn lookup_artist(&self, id: &str) -> Result<Option<ArtistRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }
}

// =============================================================================
// P2P network
// =============================================================================

/// How a peer answers a transfer request.
#[derive(Debug, Clone)]
pub enum PeerBehavior {
    Serve(Vec<u8>),
    Refuse,
    /// Accepts the transfer, then never sends a byte
    Stall,
    /// Sends the first chunk, then drops the connection
    BreakMidway(Vec<u8>),
    /// Never answers the transfer request
    Unreachable,
}

/// Counts calls in flight and remembers the highest count seen.
#[derive(Default)]
pub struct Gauge {
    active: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(active, Ordering::SeqCst);
        GaugeGuard(self.clone())
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

struct GaugeGuard(Arc<Gauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct NetworkState {
    responses: Vec<SearchResponse>,
    peers: HashMap<String, PeerBehavior>,
    searches: Vec<String>,
    downloads: Vec<(String, String)>,
    /// "searched:<query>" once a search answers, "download:<peer>" when a
    /// transfer is requested.
    events: Vec<String>,
    search_delay: Option<Duration>,
    connects: usize,
    disconnects: usize,
}

/// Answers every search with the same responses.
#[derive(Default)]
pub struct FakeP2pNetwork {
    state: Mutex<NetworkState>,
    search_gauge: Arc<Gauge>,
    download_gauge: Arc<Gauge>,
}

impl FakeP2pNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_responses(&self, responses: Vec<SearchResponse>) {
        self.state.lock().unwrap().responses = responses;
    }

    pub fn set_peer(&self, peer: &str, behavior: PeerBehavior) {
        self.state
            .lock()
            .unwrap()
            .peers
            .insert(peer.to_string(), behavior);
    }

    /// Every search takes `delay` before answering.
    pub fn set_search_delay(&self, delay: Duration) {
        self.state.lock().unwrap().search_delay = Some(delay);
    }

    pub fn searches(&self) -> Vec<String> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    /// Most searches ever in flight at once.
    pub fn max_concurrent_searches(&self) -> usize {
        self.search_gauge.max()
    }

    /// Most transfers ever open at once.
    pub fn max_concurrent_downloads(&self) -> usize {
        self.download_gauge.max()
    }

    /// Peers asked for a transfer, in order.
    pub fn download_peers(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .downloads
            .iter()
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }
}

#[async_trait]
impl P2pNetwork for FakeP2pNetwork {
    async fn connect(&self, _username: &str, _password: &str) -> Result<()> {
        self.state.lock().unwrap().connects += 1;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.lock().unwrap().disconnects += 1;
        Ok(())
    }

    async fn search(&self, query: &str, _timeout: Duration) -> Result<Vec<SearchResponse>> {
        let _busy = self.search_gauge.enter();
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.searches.push(query.to_string());
            state.search_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("searched:{}", query));
        Ok(state.responses.clone())
    }

    async fn download(&self, peer: &str, path: &str) -> Result<ByteStream> {
        let busy = self.download_gauge.enter();
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.downloads.push((peer.to_string(), path.to_string()));
            state.events.push(format!("download:{}", peer));
            state.peers.get(peer).cloned()
        };
        let stream: ByteStream = match behavior {
            Some(PeerBehavior::Serve(data)) => {
                let chunks: Vec<Result<Bytes>> = data
                    .chunks(64 * 1024)
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                    .collect();
                futures::stream::iter(chunks).boxed()
            }
            Some(PeerBehavior::Stall) => futures::stream::pending().boxed(),
            Some(PeerBehavior::BreakMidway(data)) => {
                let first = data.iter().take(64 * 1024).copied().collect::<Vec<u8>>();
                let chunks: Vec<Result<Bytes>> = vec![
                    Ok(Bytes::from(first)),
                    Err(anyhow::anyhow!("connection reset by peer")),
                ];
                futures::stream::iter(chunks).boxed()
            }
            Some(PeerBehavior::Unreachable) => return futures::future::pending().await,
            Some(PeerBehavior::Refuse) | None => bail!("peer {} refused the transfer", peer),
        };
        // The transfer counts as open until the engine drops the stream.
        Ok(stream
            .map(move |item| {
                let _held = &busy;
                item
            })
            .boxed())
    }
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Default)]
pub struct RecordingNotificationSink {
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<(String, String)>>,
    batches: Mutex<Vec<BatchSummary>>,
}

impl RecordingNotificationSink {
    /// Ids of jobs reported complete.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    /// Ids of jobs reported failed, with the reason.
    pub fn failed(&self) -> Vec<(String, String)> {
        self.failed.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<BatchSummary> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn download_complete(&self, job: &DownloadJob) -> Result<()> {
        self.completed.lock().unwrap().push(job.id.clone());
        Ok(())
    }

    async fn download_failed(&self, job: &DownloadJob, reason: &str) -> Result<()> {
        self.failed
            .lock()
            .unwrap()
            .push((job.id.clone(), reason.to_string()));
        Ok(())
    }

    async fn batch_complete(&self, summary: &BatchSummary) -> Result<()> {
        self.batches.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBatchNotifier {
    summaries: Mutex<Vec<BatchSummary>>,
}

impl RecordingBatchNotifier {
    pub fn summaries(&self) -> Vec<BatchSummary> {
        self.summaries.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchCompletionNotifier for RecordingBatchNotifier {
    async fn on_batch_complete(&self, summary: &BatchSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }
}
