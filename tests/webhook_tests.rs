//! Tests for provider webhook handling: grabs, completions and import
//! failures, and how events are matched to jobs.

mod common;

use album_acquirer::acquisition::indexer::CommandRequest;
use album_acquirer::acquisition::{
    AcquisitionSource, DownloadJob, JobKind, JobRequest, JobStatus, ProviderEvent,
};
use common::*;

fn event(download_id: &str, artist: &str, album: &str) -> ProviderEvent {
    ProviderEvent {
        download_id: Some(download_id.to_string()),
        artist_name: Some(artist.to_string()),
        album_title: Some(album.to_string()),
        ..Default::default()
    }
}

fn processing_job(artist: &str, album: &str, provider_ref: Option<&str>) -> DownloadJob {
    let mut job = DownloadJob::new(artist, album, JobKind::Library);
    job.status = JobStatus::Processing;
    job.provider_ref = provider_ref.map(str::to_string);
    job.started_at = Some(job.created_at);
    job
}

// ============================================================================
// Grab events
// ============================================================================

#[tokio::test]
async fn test_duplicate_grab_is_idempotent() {
    let harness = TestHarness::with_indexer();
    let job = harness
        .orchestrator
        .create_job(JobRequest {
            target_id: Some(EVERGREEN_ID.to_string()),
            ..JobRequest::new(BROODS_NAME, "Evergreen")
        })
        .unwrap();

    let grab = ProviderEvent {
        album_foreign_id: Some(EVERGREEN_ID.to_string()),
        provider_album_id: Some("42".to_string()),
        ..event("dl-1", BROODS_NAME, "Evergreen")
    };
    let first = harness
        .orchestrator
        .on_download_grabbed(&grab)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, job.id);
    assert_eq!(first.status, JobStatus::Processing);
    assert_eq!(first.provider_ref.as_deref(), Some("dl-1"));
    assert_eq!(first.provider_album_id.as_deref(), Some("42"));
    assert!(first.started_at.is_some());

    let second = harness
        .orchestrator
        .on_download_grabbed(&grab)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.started_at, first.started_at);
    assert_eq!(harness.job(&job.id), first);
    assert_eq!(harness.jobs().len(), 1);
}

#[tokio::test]
async fn test_grab_for_untracked_download_creates_tracking_job() {
    let harness = TestHarness::with_indexer();
    let earlier = harness
        .orchestrator
        .create_job(JobRequest {
            user_id: Some(TEST_USER.to_string()),
            ..JobRequest::new(BROODS_NAME, "Evergreen")
        })
        .unwrap();
    harness
        .orchestrator
        .cancel_job(&earlier.id)
        .await
        .unwrap();

    let tracked = harness
        .orchestrator
        .on_download_grabbed(&event("dl-9", "broods", "Conscious"))
        .await
        .unwrap()
        .unwrap();

    assert_ne!(tracked.id, earlier.id);
    assert_eq!(tracked.status, JobStatus::Processing);
    assert_eq!(tracked.provider_ref.as_deref(), Some("dl-9"));
    assert_eq!(tracked.user_id.as_deref(), Some(TEST_USER));
    assert_eq!(tracked.subject, "broods - Conscious");
    assert_eq!(harness.jobs().len(), 2);
}

#[tokio::test]
async fn test_event_without_album_is_not_tracked() {
    let harness = TestHarness::with_indexer();
    let result = harness
        .orchestrator
        .on_download_grabbed(&ProviderEvent {
            download_id: Some("dl-1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(harness.jobs().is_empty());
}

#[tokio::test]
async fn test_grab_with_new_download_retires_the_old_one() {
    let harness = TestHarness::with_indexer();
    let mut job = processing_job(BROODS_NAME, "Evergreen", Some("dl-1"));
    job.target_id = Some(EVERGREEN_ID.to_string());
    harness.insert_job(&job);

    let regrab = ProviderEvent {
        album_foreign_id: Some(EVERGREEN_ID.to_string()),
        ..event("dl-2", BROODS_NAME, "Evergreen")
    };
    let updated = harness
        .orchestrator
        .on_download_grabbed(&regrab)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.id, job.id);
    assert_eq!(updated.provider_ref.as_deref(), Some("dl-2"));
    assert_eq!(updated.metadata.previous_provider_refs, vec!["dl-1".to_string()]);

    // The replaced download finishing later does not complete the job.
    let late = harness
        .orchestrator
        .on_download_complete(&ProviderEvent {
            album_foreign_id: Some(EVERGREEN_ID.to_string()),
            ..event("dl-1", BROODS_NAME, "Evergreen")
        })
        .await
        .unwrap();
    assert!(late.is_none());
    assert_eq!(harness.job(&job.id).status, JobStatus::Processing);
    assert!(harness.notifications.completed().is_empty());
}

#[tokio::test]
async fn test_grab_matches_by_provider_album_id() {
    let harness = TestHarness::with_indexer();
    let mut job = processing_job(BROODS_NAME, "Evergreen", None);
    job.provider_album_id = Some("42".to_string());
    harness.insert_job(&job);
    harness.insert_job(&processing_job(BROODS_NAME, "Conscious", None));

    let grabbed = harness
        .orchestrator
        .on_download_grabbed(&ProviderEvent {
            download_id: Some("dl-1".to_string()),
            provider_album_id: Some("42".to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grabbed.id, job.id);
    assert_eq!(grabbed.provider_ref.as_deref(), Some("dl-1"));
    assert_eq!(harness.jobs().len(), 2);
}

#[tokio::test]
async fn test_grab_for_failed_album_is_ignored() {
    let harness = TestHarness::with_indexer();
    let mut job = processing_job(BROODS_NAME, "Conscious", None);
    job.status = JobStatus::Failed;
    harness.insert_job(&job);

    let result = harness
        .orchestrator
        .on_download_grabbed(&event("dl-4", BROODS_NAME, "Conscious"))
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(harness.jobs().len(), 1);
    assert_eq!(harness.job(&job.id).status, JobStatus::Failed);
}

// ============================================================================
// Completion events
// ============================================================================

#[tokio::test]
async fn test_completion_matches_by_canonical_name_and_completes_duplicates() {
    let harness = TestHarness::with_indexer();
    let plain = harness
        .orchestrator
        .create_job(JobRequest::new(BROODS_NAME, "Evergreen"))
        .unwrap();
    let deluxe = harness
        .orchestrator
        .create_job(JobRequest {
            user_id: Some(OTHER_USER.to_string()),
            ..JobRequest::new("BROODS", "Evergreen (Deluxe Edition)")
        })
        .unwrap();

    let completed = harness
        .orchestrator
        .on_download_complete(&event("dl-5", "Broods", "Evergreen"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.metadata.source, Some(AcquisitionSource::Indexer));

    for id in [&plain.id, &deluxe.id] {
        let job = harness.job(id);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }
    assert_eq!(harness.notifications.completed(), vec![completed.id]);
    assert_eq!(harness.jobs().len(), 2);
}

#[tokio::test]
async fn test_completion_matches_by_secondary_album_id() {
    let harness = TestHarness::with_indexer();
    let mut job = processing_job(SABBATH_NAME, "Master of Reality", None);
    job.metadata.provider_foreign_album_id = Some("mor-release-group".to_string());
    harness.insert_job(&job);

    let completion = ProviderEvent {
        download_id: Some("dl-7".to_string()),
        album_foreign_id: Some("mor-release-group".to_string()),
        release_title: Some("Black Sabbath - Master of Reality (2009 Remaster) [FLAC]".to_string()),
        ..Default::default()
    };
    let completed = harness
        .orchestrator
        .on_download_complete(&completion)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.id, job.id);
    assert_eq!(completed.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_late_event_for_retired_download_is_ignored() {
    let harness = TestHarness::with_indexer();
    let mut job = processing_job(BROODS_NAME, "Evergreen", None);
    job.metadata.previous_provider_refs = vec!["dl-old".to_string()];
    harness.insert_job(&job);

    let result = harness
        .orchestrator
        .on_download_complete(&event("dl-old", BROODS_NAME, "Evergreen"))
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(harness.job(&job.id).status, JobStatus::Processing);
    assert_eq!(harness.jobs().len(), 1);
}

#[tokio::test]
async fn test_event_for_settled_job_is_ignored() {
    let harness = TestHarness::with_indexer();
    let mut job = processing_job(BROODS_NAME, "Evergreen", Some("dl-1"));
    job.status = JobStatus::Completed;
    harness.insert_job(&job);

    let result = harness
        .orchestrator
        .on_download_grabbed(&event("dl-1", BROODS_NAME, "Evergreen"))
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(harness.jobs().len(), 1);
}

#[tokio::test]
async fn test_completion_matches_by_subject() {
    let harness = TestHarness::with_indexer();
    let job = processing_job(BROODS_NAME, "Evergreen Sessions", None);
    harness.insert_job(&job);

    let completed = harness
        .orchestrator
        .on_download_complete(&event("dl-3", BROODS_NAME, "Evergreen"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.id, job.id);
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(harness.jobs().len(), 1);
}

#[tokio::test]
async fn test_completion_matches_by_album_title_alone() {
    let harness = TestHarness::with_indexer();
    let job = processing_job(BROODS_NAME, "Evergreen", None);
    harness.insert_job(&job);

    let completed = harness
        .orchestrator
        .on_download_complete(&ProviderEvent {
            download_id: Some("dl-3".to_string()),
            album_title: Some("Evergreen".to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.id, job.id);
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(harness.jobs().len(), 1);
}

#[tokio::test]
async fn test_late_completion_for_cancelled_job_is_ignored() {
    let harness = TestHarness::with_indexer();
    let mut job = processing_job(BROODS_NAME, "Evergreen", None);
    job.target_id = Some(EVERGREEN_ID.to_string());
    harness.insert_job(&job);
    harness.orchestrator.cancel_job(&job.id).await.unwrap();

    let result = harness
        .orchestrator
        .on_download_complete(&ProviderEvent {
            album_foreign_id: Some(EVERGREEN_ID.to_string()),
            ..event("dl-late", BROODS_NAME, "Evergreen")
        })
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(harness.jobs().len(), 1);
    assert_eq!(harness.job(&job.id).status, JobStatus::Cancelled);
    assert!(harness.notifications.completed().is_empty());
}

// ============================================================================
// Import failures
// ============================================================================

#[tokio::test]
async fn test_transient_import_failure_blocklists_and_searches_again() {
    let harness = TestHarness::with_indexer();
    harness
        .indexer_api
        .add_queue_record(queue_record(11, "dl-1", 42, 100.0, 0.0));
    let job = processing_job(BROODS_NAME, "Evergreen", Some("dl-1"));
    harness.insert_job(&job);

    let updated = harness
        .orchestrator
        .on_import_failed(&event("dl-1", BROODS_NAME, "Evergreen"), "Has missing tracks")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.status, JobStatus::Processing);
    assert_eq!(updated.provider_ref, None);
    assert_eq!(updated.metadata.previous_provider_refs, vec!["dl-1".to_string()]);
    assert_eq!(updated.metadata.failure_count, 1);
    assert_eq!(harness.indexer_api.removed(), vec![(11, true, true)]);
    assert_eq!(
        harness.indexer_api.commands(),
        vec![CommandRequest::AlbumSearch {
            album_ids: vec![42]
        }]
    );
    assert!(harness.notifications.failed().is_empty());
}

#[tokio::test]
async fn test_import_failure_of_replaced_download_keeps_current_one() {
    let harness = TestHarness::with_indexer();
    harness
        .indexer_api
        .add_queue_record(queue_record(7, "dl-good", 42, 100.0, 50.0));
    harness
        .indexer_api
        .add_queue_record(queue_record(8, "dl-other", 42, 100.0, 0.0));
    let mut job = processing_job(BROODS_NAME, "Evergreen", Some("dl-good"));
    job.target_id = Some(EVERGREEN_ID.to_string());
    harness.insert_job(&job);

    let updated = harness
        .orchestrator
        .on_import_failed(
            &ProviderEvent {
                album_foreign_id: Some(EVERGREEN_ID.to_string()),
                ..event("dl-other", BROODS_NAME, "Evergreen")
            },
            "Has missing tracks",
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.status, JobStatus::Processing);
    assert_eq!(updated.provider_ref.as_deref(), Some("dl-good"));
    assert_eq!(updated.metadata.previous_provider_refs, vec!["dl-other".to_string()]);
    assert_eq!(harness.indexer_api.removed(), vec![(8, true, true)]);
    assert!(harness.indexer_api.commands().is_empty());
}

#[tokio::test]
async fn test_repeated_import_failure_is_deduplicated() {
    let harness = TestHarness::with_indexer();
    harness
        .indexer_api
        .add_queue_record(queue_record(11, "dl-1", 42, 100.0, 0.0));
    let job = processing_job(BROODS_NAME, "Evergreen", Some("dl-1"));
    harness.insert_job(&job);

    let failure = event("dl-1", BROODS_NAME, "Evergreen");
    assert!(harness
        .orchestrator
        .on_import_failed(&failure, "Has missing tracks")
        .await
        .unwrap()
        .is_some());
    assert!(harness
        .orchestrator
        .on_import_failed(&failure, "Has missing tracks")
        .await
        .unwrap()
        .is_none());

    assert_eq!(harness.job(&job.id).metadata.failure_count, 1);
    assert_eq!(harness.indexer_api.removed().len(), 1);
}

#[tokio::test]
async fn test_terminal_import_failure_fails_discovery_job() {
    let harness = TestHarness::with_indexer();
    let mut job = processing_job(BROODS_NAME, "Evergreen", Some("dl-2"));
    job.metadata.kind = JobKind::Discovery {
        similar_to: Some("Chvrches".to_string()),
    };
    harness.insert_job(&job);

    let failed = harness
        .orchestrator
        .on_import_failed(
            &event("dl-2", BROODS_NAME, "Evergreen"),
            "Album not found in library",
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("Album not found in library"));
    assert_eq!(harness.notifications.failed().len(), 1);
    assert_eq!(harness.jobs().len(), 1);
}

#[tokio::test]
async fn test_terminal_import_failure_falls_back_to_another_album() {
    let harness = TestHarness::with_indexer();
    harness.seed_artist(
        artist(BROODS_NAME, BROODS_ID, "Group", 3),
        vec![
            album(1, "Evergreen", EVERGREEN_ID),
            album(2, "Conscious", CONSCIOUS_ID),
        ],
    );
    harness
        .indexer_api
        .set_releases(2, vec![approved_release("guid-conscious", "Broods - Conscious")]);

    let mut job = processing_job(BROODS_NAME, "Evergreen", Some("dl-3"));
    job.target_id = Some(EVERGREEN_ID.to_string());
    job.artist_id = Some(BROODS_ID.to_string());
    job.user_id = Some(TEST_USER.to_string());
    harness.insert_job(&job);

    let exhausted = harness
        .orchestrator
        .on_import_failed(&event("dl-3", BROODS_NAME, "Evergreen"), "Unknown album")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exhausted.id, job.id);
    assert_eq!(exhausted.status, JobStatus::Exhausted);

    let successor = harness
        .jobs()
        .into_iter()
        .find(|j| j.metadata.origin_of_job_id.as_deref() == Some(job.id.as_str()))
        .expect("successor job");
    assert_eq!(successor.subject, "Broods - Conscious");
    assert_eq!(successor.status, JobStatus::Processing);
    assert_eq!(successor.user_id.as_deref(), Some(TEST_USER));
    assert_eq!(successor.target_id.as_deref(), Some(CONSCIOUS_ID));
    assert_eq!(harness.indexer_api.grabbed(), vec!["guid-conscious".to_string()]);
    assert!(harness.notifications.failed().is_empty());
}
