//! Album acquisition core.
//!
//! Coordinates an indexer-backed download manager and a P2P network to
//! acquire albums, tracking each request through a persistent job.

pub mod indexer;
pub mod p2p;

mod cache;
mod error;
mod job_store;
mod matching;
mod metadata;
mod models;
mod notifier;
mod orchestrator;
mod rate_limiter;
mod reputation;
mod retry;
mod schema;

pub use cache::{InMemoryCache, SharedCache};
pub use error::{AcquisitionError, AcquisitionResult};
pub use job_store::{JobStore, SqliteJobStore};
pub use matching::{
    canonical_key, key_words, loosely_contains, normalize_album_title, normalize_name,
    parse_subject, strip_diacritics, titles_match_strictly,
};
pub use metadata::{ArtistRecord, MetadataLookup, MusicBrainzClient};
pub use models::*;
pub use notifier::{BatchCompletionNotifier, LoggingNotificationSink, NotificationSink};
pub use orchestrator::{
    is_transient_import_failure, AcquisitionOrchestrator, ExactImportTrack, JobRequest,
    StaleSweepReport,
};
pub use rate_limiter::{RateBudget, SearchRateLimiter};
pub use reputation::{PeerReputation, ReputationTracker, ReputationVerdict};
pub use retry::{retry_until, RetrySchedule};
pub use schema::JOB_STORE_VERSIONED_SCHEMAS;
