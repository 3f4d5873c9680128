//! `MigrationRecord` - Represents entries in the `coffer_migrations` state table

use crate::executor::StoreError;
use crate::store::postgres::{column, parse_timestamp};
use chrono::{DateTime, Utc};

/// A row of the `coffer_migrations` state table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Migration version (timestamp: YYYYMMDDHHMMSS)
    pub version: i64,

    pub name: String,

    /// `SHA-256` checksum of the migration's generated SQL
    pub checksum: String,

    pub applied_at: DateTime<Utc>,

    /// Execution time in milliseconds (`None` if not recorded)
    pub execution_time_ms: Option<i64>,
}

impl MigrationRecord {
    /// Decode a state-table row; `applied_at` is selected as RFC 3339 text.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a column is missing or the timestamp does not parse.
    pub fn from_row(row: &may_postgres::Row) -> Result<Self, StoreError> {
        let applied_at: String = column(row, "applied_at")?;
        Ok(Self {
            version: column(row, "version")?,
            name: column(row, "name")?,
            checksum: column(row, "checksum")?,
            applied_at: parse_timestamp(&applied_at)?,
            execution_time_ms: column(row, "execution_time_ms")?,
        })
    }
}
