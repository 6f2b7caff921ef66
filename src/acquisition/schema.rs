//! Database schema for acquisition_jobs.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Download Jobs Table - Version 0
// =============================================================================

const DOWNLOAD_JOBS_TABLE_V0: Table = Table {
    name: "download_jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("correlation_id", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("subject", &SqlType::Text, non_null = true),
        sqlite_column!("target_id", &SqlType::Text),
        sqlite_column!("artist_id", &SqlType::Text),
        sqlite_column!("user_id", &SqlType::Text),
        sqlite_column!("provider_ref", &SqlType::Text),
        sqlite_column!("provider_album_id", &SqlType::Text),
        sqlite_column!(
            "attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("batch_id", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
        sqlite_column!(
            "metadata",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'{}'")
        ),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_jobs_status", "status, created_at"),
        ("idx_jobs_target", "target_id"),
        ("idx_jobs_provider_ref", "provider_ref"),
        ("idx_jobs_provider_album", "provider_album_id"),
        ("idx_jobs_batch", "batch_id"),
        ("idx_jobs_correlation", "correlation_id"),
    ],
};

pub const JOB_STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[DOWNLOAD_JOBS_TABLE_V0],
    migration: None,
}];
