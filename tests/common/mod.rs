//! Common test infrastructure
//!
//! Fake providers and a harness wiring them into an orchestrator backed by an
//! in-memory job store. Tests should only import from this module.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestHarness;
//!
//! #[tokio::test]
//! async fn test_create_job() {
//!     let harness = TestHarness::with_indexer();
//!     let job = harness.orchestrator.create_job(JobRequest::new("Broods", "Evergreen")).unwrap();
//!     assert_eq!(job.status, JobStatus::Pending);
//! }
//! ```

mod constants;
mod fakes;
mod fixtures;

#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fakes::{
    FakeIndexerApi, FakeMetadata, FakeP2pNetwork, PeerBehavior, RecordingBatchNotifier,
    RecordingNotificationSink,
};
#[allow(unused_imports)]
pub use fixtures::{
    album, album_with_files, approved_release, artist, audio_bytes, p2p_settings, queue_record, search_response,
    test_indexer_settings, TestHarness,
};
