//! Migration trait definition

use super::schema_manager::SchemaManager;
use crate::executor::StoreError;

/// A single versioned schema change.
///
/// Migrations are compiled into the binary and listed in
/// [`schema::all`](crate::migration::schema::all). Both directions run inside one
/// transaction together with the state-table bookkeeping.
pub trait Migration: Send + Sync {
    /// Human-readable identifier
    fn name(&self) -> &str;

    /// Version (timestamp: YYYYMMDDHHMMSS)
    fn version(&self) -> i64;

    /// Apply the migration
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a statement fails.
    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError>;

    /// Undo the migration
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a statement fails.
    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError>;
}
