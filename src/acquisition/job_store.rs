//! Download job storage and persistence.
//!
//! Provides SQLite-backed storage for download jobs. Jobs are never deleted.

use super::models::{DownloadJob, JobMetadata, JobStatus};
use super::schema::JOB_STORE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Trait for download job storage operations.
///
/// Every finder returns jobs newest first.
pub trait JobStore: Send + Sync {
    // === Creation and updates ===

    /// Persist a new job.
    fn create_job(&self, job: &DownloadJob) -> Result<()>;

    /// Overwrite a job with its new state.
    fn update_job(&self, job: &DownloadJob) -> Result<()>;

    /// Overwrite several jobs in a single transaction.
    fn update_many(&self, jobs: &[DownloadJob]) -> Result<()>;

    // === Lookups ===

    fn get_job(&self, id: &str) -> Result<Option<DownloadJob>>;

    fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<DownloadJob>>;

    fn find_by_target_id(&self, target_id: &str) -> Result<Vec<DownloadJob>>;

    fn find_by_provider_ref(&self, provider_ref: &str) -> Result<Vec<DownloadJob>>;

    fn find_by_provider_album_id(&self, provider_album_id: &str) -> Result<Vec<DownloadJob>>;

    fn find_by_batch(&self, batch_id: &str) -> Result<Vec<DownloadJob>>;

    /// Jobs in one of `statuses` for which `predicate` holds.
    fn find_matching(
        &self,
        statuses: &[JobStatus],
        predicate: &(dyn Fn(&DownloadJob) -> bool + Send + Sync),
    ) -> Result<Vec<DownloadJob>>;
}

/// SQLite-backed implementation of JobStore.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

const JOB_COLUMNS: &str = "id, correlation_id, status, subject, target_id, artist_id, user_id, \
     provider_ref, provider_album_id, attempts, batch_id, error, metadata, \
     created_at, started_at, completed_at";

const ORDER_NEWEST_FIRST: &str = "ORDER BY created_at DESC, rowid DESC";

impl SqliteJobStore {
    /// Open or create a job store at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open(&db_path)?
        } else {
            let conn = Connection::open(&db_path)?;
            JOB_STORE_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new job database at {:?}", db_path.as_ref());
            conn
        };

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Job database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = JOB_STORE_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Job database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        JOB_STORE_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, used by tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        JOB_STORE_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteJobStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = JOB_STORE_VERSIONED_SCHEMAS.len() - 1;
        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating job database from version {} to {}",
            current_version, target_version
        );
        for schema in JOB_STORE_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                migration_fn(conn)?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;
        Ok(())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<DownloadJob> {
        let status_str: String = row.get("status")?;
        let status = JobStatus::from_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown job status '{}'", status_str).into(),
            )
        })?;
        let metadata_json: String = row.get("metadata")?;
        let metadata: JobMetadata = serde_json::from_str(&metadata_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, Box::new(e)))?;

        Ok(DownloadJob {
            id: row.get("id")?,
            correlation_id: row.get("correlation_id")?,
            status,
            subject: row.get("subject")?,
            target_id: row.get("target_id")?,
            artist_id: row.get("artist_id")?,
            user_id: row.get("user_id")?,
            provider_ref: row.get("provider_ref")?,
            provider_album_id: row.get("provider_album_id")?,
            attempts: row.get("attempts")?,
            batch_id: row.get("batch_id")?,
            error: row.get("error")?,
            metadata,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn update_with(conn: &Connection, job: &DownloadJob) -> Result<()> {
        let metadata = serde_json::to_string(&job.metadata)?;
        let updated = conn.execute(
            r#"UPDATE download_jobs SET
                correlation_id = ?2, status = ?3, subject = ?4, target_id = ?5,
                artist_id = ?6, user_id = ?7, provider_ref = ?8, provider_album_id = ?9,
                attempts = ?10, batch_id = ?11, error = ?12, metadata = ?13,
                created_at = ?14, started_at = ?15, completed_at = ?16
            WHERE id = ?1"#,
            params![
                job.id,
                job.correlation_id,
                job.status.as_str(),
                job.subject,
                job.target_id,
                job.artist_id,
                job.user_id,
                job.provider_ref,
                job.provider_album_id,
                job.attempts,
                job.batch_id,
                job.error,
                metadata,
                job.created_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        if updated == 0 {
            bail!("Job {} does not exist", job.id);
        }
        Ok(())
    }

    fn query_jobs(
        &self,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<DownloadJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM download_jobs WHERE {} {}",
            JOB_COLUMNS, where_clause, ORDER_NEWEST_FIRST
        ))?;
        let jobs = stmt
            .query_map(params, Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }
}

impl JobStore for SqliteJobStore {
    fn create_job(&self, job: &DownloadJob) -> Result<()> {
        let metadata = serde_json::to_string(&job.metadata)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO download_jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.correlation_id,
                job.status.as_str(),
                job.subject,
                job.target_id,
                job.artist_id,
                job.user_id,
                job.provider_ref,
                job.provider_album_id,
                job.attempts,
                job.batch_id,
                job.error,
                metadata,
                job.created_at,
                job.started_at,
                job.completed_at,
            ],
        )
        .with_context(|| format!("Failed to insert job {}", job.id))?;
        Ok(())
    }

    fn update_job(&self, job: &DownloadJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::update_with(&conn, job)
    }

    fn update_many(&self, jobs: &[DownloadJob]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for job in jobs {
            Self::update_with(&tx, job)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<DownloadJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {} FROM download_jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<DownloadJob>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let values: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
        self.query_jobs(
            &format!("status IN ({})", placeholders),
            rusqlite::params_from_iter(values),
        )
    }

    fn find_by_target_id(&self, target_id: &str) -> Result<Vec<DownloadJob>> {
        self.query_jobs("target_id = ?1", params![target_id])
    }

    fn find_by_provider_ref(&self, provider_ref: &str) -> Result<Vec<DownloadJob>> {
        self.query_jobs("provider_ref = ?1", params![provider_ref])
    }

    fn find_by_provider_album_id(&self, provider_album_id: &str) -> Result<Vec<DownloadJob>> {
        self.query_jobs("provider_album_id = ?1", params![provider_album_id])
    }

    fn find_by_batch(&self, batch_id: &str) -> Result<Vec<DownloadJob>> {
        self.query_jobs("batch_id = ?1", params![batch_id])
    }

    fn find_matching(
        &self,
        statuses: &[JobStatus],
        predicate: &(dyn Fn(&DownloadJob) -> bool + Send + Sync),
    ) -> Result<Vec<DownloadJob>> {
        Ok(self
            .find_by_status(statuses)?
            .into_iter()
            .filter(|job| predicate(job))
            .collect())
    }
}
