//! Small helpers for declaring and validating versioned SQLite schemas.

mod versioned_schema;

pub use versioned_schema::{Column, SqlType, Table, VersionedSchema};

/// Offset added to every schema version stored in `PRAGMA user_version`.
pub const BASE_DB_VERSION: usize = 100;
