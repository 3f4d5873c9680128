//! Migration state table management

use super::MigrationRecord;
use crate::executor::{StoreError, StoreExecutor};
use crate::query::records::utc_text;

pub const STATE_TABLE: &str = "coffer_migrations";

/// Create the `coffer_migrations` table if it does not exist yet.
///
/// # Errors
///
/// Returns `StoreError` if the DDL fails.
pub fn initialize_state_table(executor: &dyn StoreExecutor) -> Result<(), StoreError> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {STATE_TABLE} (
            version BIGINT PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            checksum VARCHAR(64) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            execution_time_ms BIGINT
        )"
    );
    executor.execute(&sql, &[])?;
    Ok(())
}

/// Applied migrations, oldest first.
///
/// # Errors
///
/// Returns `StoreError` if the query fails or a row does not decode.
pub fn applied_migrations(executor: &dyn StoreExecutor) -> Result<Vec<MigrationRecord>, StoreError> {
    let sql = format!(
        "SELECT version, name, checksum, {applied_at} AS applied_at, execution_time_ms \
         FROM {STATE_TABLE} ORDER BY version ASC",
        applied_at = utc_text(STATE_TABLE, "applied_at")
    );
    executor
        .query_all(&sql, &[])?
        .iter()
        .map(MigrationRecord::from_row)
        .collect()
}

/// # Errors
///
/// Returns `StoreError` if the lookup fails.
pub fn is_applied(executor: &dyn StoreExecutor, version: i64) -> Result<bool, StoreError> {
    let sql = format!("SELECT version FROM {STATE_TABLE} WHERE version = $1");
    Ok(executor.query_opt(&sql, &[&version])?.is_some())
}

/// # Errors
///
/// Returns `StoreError` if the insert fails.
pub fn record_applied(
    executor: &dyn StoreExecutor,
    version: i64,
    name: &str,
    checksum: &str,
    execution_time_ms: i64,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {STATE_TABLE} (version, name, checksum, execution_time_ms) \
         VALUES ($1, $2, $3, $4)"
    );
    executor.execute(&sql, &[&version, &name, &checksum, &execution_time_ms])?;
    Ok(())
}

/// # Errors
///
/// Returns `StoreError` if the delete fails.
pub fn remove_applied(executor: &dyn StoreExecutor, version: i64) -> Result<(), StoreError> {
    let sql = format!("DELETE FROM {STATE_TABLE} WHERE version = $1");
    executor.execute(&sql, &[&version])?;
    Ok(())
}
