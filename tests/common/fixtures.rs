//! Test harness and resource builders.

#![allow(dead_code)]

use super::fakes::{
    FakeIndexerApi, FakeMetadata, FakeP2pNetwork, RecordingBatchNotifier,
    RecordingNotificationSink,
};
use album_acquirer::acquisition::indexer::{
    AlbumResource, AlbumStatistics, ArtistResource, ArtistStatistics, IndexerClient, QueueRecord,
    ReleaseResource,
};
use album_acquirer::acquisition::p2p::{P2pEngine, SearchResponse, SharedFile};
use album_acquirer::acquisition::{
    AcquisitionOrchestrator, DownloadJob, InMemoryCache, JobStatus, JobStore, ReputationTracker,
    SearchRateLimiter, SqliteJobStore,
};
use album_acquirer::config::{
    IndexerSettings, OrchestratorSettings, P2pSettings, RateLimitSettings, ReaperSettings,
    ReputationSettings,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Indexer settings without polling delays.
pub fn test_indexer_settings() -> IndexerSettings {
    IndexerSettings {
        base_url: Some("http://indexer.test".to_string()),
        api_key: Some("test-key".to_string()),
        album_poll_attempts: 1,
        album_poll_delay_secs: 0,
        refresh_wait_secs: 0,
        ..Default::default()
    }
}

/// P2P settings with short timeouts and files from 64 KiB up.
pub fn p2p_settings(download_dir: &Path) -> P2pSettings {
    P2pSettings {
        gateway_url: Some("http://gateway.test".to_string()),
        download_dir: download_dir.to_path_buf(),
        connect_timeout_secs: 5,
        inactivity_timeout_secs: 1,
        download_ceiling_secs: 30,
        min_file_size_bytes: 64 * 1024,
        reconnect_cooldown_secs: 0,
        max_consecutive_failures: 2,
        ..Default::default()
    }
}

pub struct TestHarness {
    pub store: Arc<SqliteJobStore>,
    pub cache: Arc<InMemoryCache>,
    pub notifications: Arc<RecordingNotificationSink>,
    pub batch_notifier: Arc<RecordingBatchNotifier>,
    pub indexer_api: Arc<FakeIndexerApi>,
    pub metadata: Arc<FakeMetadata>,
    pub network: Arc<FakeP2pNetwork>,
    pub engine: Arc<P2pEngine>,
    pub orchestrator: AcquisitionOrchestrator,
    pub download_dir: TempDir,
}

impl TestHarness {
    /// Orchestrator with the fake indexer attached.
    pub fn with_indexer() -> Self {
        Self::build(true, false, OrchestratorSettings::default(), ReaperSettings::default())
    }

    /// Orchestrator with the fake P2P network attached.
    pub fn with_p2p() -> Self {
        Self::build(false, true, OrchestratorSettings::default(), ReaperSettings::default())
    }

    /// Orchestrator without any provider.
    pub fn without_providers() -> Self {
        Self::build(false, false, OrchestratorSettings::default(), ReaperSettings::default())
    }

    /// Orchestrator with the fake P2P network and adjusted engine settings.
    pub fn with_p2p_settings(tweak: impl FnOnce(&mut P2pSettings)) -> Self {
        Self::build_with_p2p(
            false,
            true,
            OrchestratorSettings::default(),
            ReaperSettings::default(),
            tweak,
        )
    }

    pub fn build(
        indexer: bool,
        p2p: bool,
        settings: OrchestratorSettings,
        reaper: ReaperSettings,
    ) -> Self {
        Self::build_with_p2p(indexer, p2p, settings, reaper, |_| {})
    }

    pub fn build_with_p2p(
        indexer: bool,
        p2p: bool,
        settings: OrchestratorSettings,
        reaper: ReaperSettings,
        tweak: impl FnOnce(&mut P2pSettings),
    ) -> Self {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let cache = Arc::new(InMemoryCache::new());
        let notifications = Arc::new(RecordingNotificationSink::default());
        let batch_notifier = Arc::new(RecordingBatchNotifier::default());
        let indexer_api = Arc::new(FakeIndexerApi::new());
        let metadata = Arc::new(FakeMetadata::new());
        let network = Arc::new(FakeP2pNetwork::new());
        let download_dir = TempDir::new().unwrap();
        let mut engine_settings = p2p_settings(download_dir.path());
        tweak(&mut engine_settings);

        let engine = Arc::new(P2pEngine::new(
            network.clone(),
            Arc::new(SearchRateLimiter::new(&RateLimitSettings {
                max_searches: 1000,
                window_secs: 220,
            })),
            Arc::new(ReputationTracker::new(
                cache.clone(),
                ReputationSettings::default(),
            )),
            cache.clone(),
            engine_settings,
            CancellationToken::new(),
        ));

        let mut orchestrator = AcquisitionOrchestrator::new(
            store.clone(),
            cache.clone(),
            notifications.clone(),
            settings,
            reaper,
        )
        .with_metadata(metadata.clone())
        .with_batch_notifier(batch_notifier.clone());

        if indexer {
            let client = IndexerClient::new(
                indexer_api.clone(),
                metadata.clone(),
                test_indexer_settings(),
                CancellationToken::new(),
            );
            orchestrator = orchestrator.with_indexer(Arc::new(client));
        }
        if p2p {
            orchestrator = orchestrator.with_p2p(engine.clone());
        }

        Self {
            store,
            cache,
            notifications,
            batch_notifier,
            indexer_api,
            metadata,
            network,
            engine,
            orchestrator,
            download_dir,
        }
    }

    /// Store a job exactly as given, bypassing the orchestrator.
    pub fn insert_job(&self, job: &DownloadJob) {
        self.store.create_job(job).unwrap();
    }

    pub fn job(&self, id: &str) -> DownloadJob {
        self.store.get_job(id).unwrap().expect("job exists")
    }

    /// Every stored job, newest first.
    pub fn jobs(&self) -> Vec<DownloadJob> {
        self.store.find_by_status(JobStatus::ALL).unwrap()
    }

    /// Register `artist` with the fake indexer, both as lookup result and as
    /// an already added artist owning `albums`.
    pub fn seed_artist(&self, artist: ArtistResource, albums: Vec<AlbumResource>) -> i64 {
        self.indexer_api
            .add_lookup(&artist.artist_name, vec![artist.clone()]);
        self.indexer_api.add_lookup(
            &format!("lidarr:{}", artist.foreign_artist_id),
            vec![artist.clone()],
        );
        self.indexer_api
            .set_albums(&artist.foreign_artist_id, albums);
        self.indexer_api.add_known_artist(artist)
    }
}

// =============================================================================
// Resource builders
// =============================================================================

pub fn artist(name: &str, foreign_id: &str, artist_type: &str, album_count: u32) -> ArtistResource {
    ArtistResource {
        artist_name: name.to_string(),
        foreign_artist_id: foreign_id.to_string(),
        artist_type: Some(artist_type.to_string()),
        statistics: Some(ArtistStatistics {
            album_count,
            track_file_count: 0,
        }),
        ..Default::default()
    }
}

/// A monitored studio album without files.
pub fn album(id: i64, title: &str, foreign_id: &str) -> AlbumResource {
    AlbumResource {
        id,
        title: title.to_string(),
        foreign_album_id: foreign_id.to_string(),
        album_type: Some("Album".to_string()),
        monitored: true,
        statistics: Some(AlbumStatistics::default()),
        ..Default::default()
    }
}

/// A studio album the indexer already has files for.
pub fn album_with_files(id: i64, title: &str, foreign_id: &str, track_files: u32) -> AlbumResource {
    AlbumResource {
        statistics: Some(AlbumStatistics {
            track_file_count: track_files,
            track_count: track_files,
            size_on_disk: track_files as u64 * 30_000_000,
        }),
        ..album(id, title, foreign_id)
    }
}

pub fn approved_release(guid: &str, title: &str) -> ReleaseResource {
    ReleaseResource {
        guid: guid.to_string(),
        title: title.to_string(),
        indexer_id: 1,
        approved: true,
        seeders: Some(12),
        leechers: Some(1),
        size: 300_000_000,
        rejections: Vec::new(),
    }
}

pub fn queue_record(
    id: i64,
    download_id: &str,
    album_id: i64,
    size: f64,
    sizeleft: f64,
) -> QueueRecord {
    QueueRecord {
        id,
        download_id: Some(download_id.to_string()),
        album_id: Some(album_id),
        size,
        sizeleft,
        status: Some("downloading".to_string()),
        ..Default::default()
    }
}

/// A peer with a free slot and a fast link sharing `files` (path, size).
pub fn search_response(peer: &str, files: &[(&str, u64)]) -> SearchResponse {
    SearchResponse {
        peer: peer.to_string(),
        has_free_slot: true,
        upload_speed: 2 * 1024 * 1024,
        files: files
            .iter()
            .map(|(path, size)| SharedFile {
                filename: path.to_string(),
                size: *size,
                bit_rate: Some(320),
            })
            .collect(),
    }
}

/// Deterministic file content of the given length.
pub fn audio_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
