//! Data models for album acquisition.
//!
//! Defines download jobs, their statuses and kind-specific metadata, and the
//! provider event and batch summary types the orchestrator works with.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::matching::{canonical_key, parse_subject};

/// Overflow key holding the remaining size reported at the last reaper sweep.
pub const LAST_SIZE_LEFT_KEY: &str = "lastSizeLeft";
/// Overflow key holding the unix time at which download progress was last seen.
pub const LAST_PROGRESS_AT_KEY: &str = "lastProgressAt";

/// Status of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed, // terminal
    Failed,    // terminal
    Exhausted, // terminal, may have a successor
    Cancelled, // terminal
}

impl JobStatus {
    pub const ACTIVE: &'static [JobStatus] = &[JobStatus::Pending, JobStatus::Processing];
    pub const TERMINAL: &'static [JobStatus] = &[
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Exhausted,
        JobStatus::Cancelled,
    ];
    pub const ALL: &'static [JobStatus] = &[
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Exhausted,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Exhausted => "exhausted",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "exhausted" => Some(JobStatus::Exhausted),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Returns true if the job can still be advanced by provider events.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// What kind of acquisition a job represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Album explicitly requested for the library.
    #[default]
    Library,
    /// Album picked by a discovery run. Never falls back to other albums.
    Discovery { similar_to: Option<String> },
    /// Playlist-style import of exact tracks through the P2P network.
    ExactImport {
        playlist: Option<String>,
        track_title: Option<String>,
    },
}

impl JobKind {
    /// Whether an exhausted job of this kind may try another album by the
    /// same artist.
    pub fn allows_artist_fallback(&self) -> bool {
        matches!(self, JobKind::Library)
    }
}

/// Which provider ended up delivering the album.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionSource {
    Indexer,
    P2p,
}

/// Job metadata: the job kind, typed common fields and a forward-compatible
/// overflow map for soft fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobMetadata {
    pub kind: JobKind,
    /// Artist display name as requested
    pub artist_name: Option<String>,
    /// Album display name as requested
    pub album_title: Option<String>,
    /// Secondary album identifier reported by the indexer provider
    pub provider_foreign_album_id: Option<String>,
    /// Number of import failures seen so far
    pub failure_count: u32,
    /// Provider refs the job no longer follows: failed, stalled or replaced
    pub previous_provider_refs: Vec<String>,
    pub source: Option<AcquisitionSource>,
    /// Set once the failure notification for this logical album went out
    pub notification_sent: bool,
    /// Job this one succeeded after its candidates were exhausted
    pub origin_of_job_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobMetadata {
    pub fn last_size_left(&self) -> Option<u64> {
        self.extra.get(LAST_SIZE_LEFT_KEY).and_then(Value::as_u64)
    }

    pub fn last_progress_at(&self) -> Option<i64> {
        self.extra.get(LAST_PROGRESS_AT_KEY).and_then(Value::as_i64)
    }

    pub fn record_progress(&mut self, size_left: u64, at: i64) {
        self.extra
            .insert(LAST_SIZE_LEFT_KEY.to_string(), Value::from(size_left));
        self.extra
            .insert(LAST_PROGRESS_AT_KEY.to_string(), Value::from(at));
    }

    /// Restart the inactivity window without a size reading.
    pub fn mark_activity(&mut self, at: i64) {
        self.extra.remove(LAST_SIZE_LEFT_KEY);
        self.extra
            .insert(LAST_PROGRESS_AT_KEY.to_string(), Value::from(at));
    }

    /// Remember a provider ref so late events for it are recognized.
    pub fn retire_provider_ref(&mut self, provider_ref: String) {
        if !self.previous_provider_refs.contains(&provider_ref) {
            self.previous_provider_refs.push(provider_ref);
        }
    }

    pub fn clear_progress(&mut self) {
        self.extra.remove(LAST_SIZE_LEFT_KEY);
        self.extra.remove(LAST_PROGRESS_AT_KEY);
    }
}

/// A logical album acquisition tracked from request to a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: String,
    /// Opaque id used to correlate provider webhooks
    pub correlation_id: String,
    pub status: JobStatus,
    /// Display string "Artist - Album"
    pub subject: String,
    /// External album identifier
    pub target_id: Option<String>,
    /// External artist identifier
    pub artist_id: Option<String>,
    pub user_id: Option<String>,
    /// The provider's download handle, set once the provider grabbed a release
    pub provider_ref: Option<String>,
    /// Album id inside the indexer provider
    pub provider_album_id: Option<String>,
    pub attempts: u32,
    pub batch_id: Option<String>,
    pub error: Option<String>,
    pub metadata: JobMetadata,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl DownloadJob {
    /// Create a new pending job with fresh ids.
    pub fn new(artist_name: &str, album_title: &str, kind: JobKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            subject: format!("{} - {}", artist_name, album_title),
            target_id: None,
            artist_id: None,
            user_id: None,
            provider_ref: None,
            provider_album_id: None,
            attempts: 0,
            batch_id: None,
            error: None,
            metadata: JobMetadata {
                kind,
                artist_name: Some(artist_name.to_string()),
                album_title: Some(album_title.to_string()),
                ..Default::default()
            },
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_target_id(mut self, target_id: Option<String>) -> Self {
        self.target_id = target_id;
        self
    }

    pub fn with_artist_id(mut self, artist_id: Option<String>) -> Self {
        self.artist_id = artist_id;
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_batch(mut self, batch_id: Option<String>) -> Self {
        self.batch_id = batch_id;
        self
    }

    /// Artist and album names, from metadata or else parsed from the subject.
    pub fn artist_and_album(&self) -> Option<(String, String)> {
        match (&self.metadata.artist_name, &self.metadata.album_title) {
            (Some(artist), Some(album)) => Some((artist.clone(), album.clone())),
            _ => parse_subject(&self.subject),
        }
    }

    /// Normalized artist+album key shared by duplicate jobs.
    pub fn logical_key(&self) -> Option<String> {
        self.artist_and_album()
            .map(|(artist, album)| canonical_key(&artist, &album))
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Most recent moment the job showed life: start or last recorded progress.
    pub fn last_activity_at(&self) -> i64 {
        let started = self.started_at.unwrap_or(self.created_at);
        self.metadata
            .last_progress_at()
            .map_or(started, |progress| progress.max(started))
    }
}

/// Download event reported by the indexer provider's webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// The provider's download handle
    pub download_id: Option<String>,
    /// External album identifier of the grabbed album
    pub album_foreign_id: Option<String>,
    /// Album id inside the provider
    pub provider_album_id: Option<String>,
    pub artist_name: Option<String>,
    pub album_title: Option<String>,
    /// Release title as shown by the download client
    pub release_title: Option<String>,
}

/// Counts of a batch's jobs once every one of them is terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub exhausted: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn from_jobs(batch_id: &str, jobs: &[DownloadJob]) -> Self {
        let mut summary = BatchSummary {
            batch_id: batch_id.to_string(),
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Exhausted => summary.exhausted += 1,
                JobStatus::Cancelled => summary.cancelled += 1,
                JobStatus::Pending | JobStatus::Processing => {}
            }
        }
        summary
    }
}
