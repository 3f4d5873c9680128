//! Migrator - Core migration execution engine

use super::state_table::{
    applied_migrations, initialize_state_table, is_applied, record_applied, remove_applied,
};
use super::{
    calculate_checksum, schema, Migration, MigrationError, MigrationRecord, MigrationStatus,
    PendingMigration, SchemaManager,
};
use crate::executor::{PgExecutor, StoreExecutor};
use crate::transaction::run_in_transaction;
use may_postgres::Client;
use std::collections::HashSet;
use std::time::Instant;

/// Key for `pg_advisory_xact_lock`; serialises concurrent migrators.
const LOCK_KEY: i64 = 0x636f_6666_6572;

/// Orchestrates validation, execution and state tracking of the compiled-in migrations.
pub struct Migrator {
    migrations: Vec<Box<dyn Migration>>,
}

impl Migrator {
    /// # Errors
    ///
    /// `DuplicateVersion` if two migrations share a version.
    pub fn new(mut migrations: Vec<Box<dyn Migration>>) -> Result<Self, MigrationError> {
        migrations.sort_by_key(|m| m.version());
        if let Some(pair) = migrations.windows(2).find(|w| w[0].version() == w[1].version()) {
            return Err(MigrationError::DuplicateVersion(pair[0].version()));
        }
        Ok(Self { migrations })
    }

    /// The schema shipped with this crate.
    ///
    /// # Errors
    ///
    /// `DuplicateVersion` if the embedded list is inconsistent.
    pub fn embedded() -> Result<Self, MigrationError> {
        Self::new(schema::all())
    }

    pub fn migrations(&self) -> &[Box<dyn Migration>] {
        &self.migrations
    }

    /// Compare the state table with the compiled-in migrations.
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` if an applied migration changed, `UnknownApplied` if the
    /// database is ahead of this build, `Database` for driver failures.
    pub fn status(&self, executor: &dyn StoreExecutor) -> Result<MigrationStatus, MigrationError> {
        initialize_state_table(executor)?;
        let applied = applied_migrations(executor)?;
        self.plan(applied)
    }

    /// Same checks as [`Migrator::status`], discarding the result.
    ///
    /// # Errors
    ///
    /// As for [`Migrator::status`].
    pub fn validate(&self, executor: &dyn StoreExecutor) -> Result<(), MigrationError> {
        self.status(executor).map(|_| ())
    }

    fn plan(&self, applied: Vec<MigrationRecord>) -> Result<MigrationStatus, MigrationError> {
        let known: HashSet<i64> = self.migrations.iter().map(|m| m.version()).collect();
        if let Some(record) = applied.iter().find(|r| !known.contains(&r.version)) {
            return Err(MigrationError::UnknownApplied {
                version: record.version,
                name: record.name.clone(),
            });
        }

        let mut applied_records = Vec::new();
        let mut pending = Vec::new();
        for migration in &self.migrations {
            let checksum = calculate_checksum(migration.as_ref())?;
            match applied.iter().find(|r| r.version == migration.version()) {
                Some(record) if record.checksum != checksum => {
                    return Err(MigrationError::ChecksumMismatch {
                        version: record.version,
                        name: record.name.clone(),
                        stored: record.checksum.clone(),
                        current: checksum,
                    });
                }
                Some(record) => applied_records.push(record.clone()),
                None => pending.push(PendingMigration {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    checksum,
                }),
            }
        }
        Ok(MigrationStatus::new(applied_records, pending))
    }

    fn find(&self, version: i64) -> Option<&dyn Migration> {
        self.migrations
            .iter()
            .find(|m| m.version() == version)
            .map(|m| m.as_ref())
    }

    /// Apply pending migrations in version order, each in its own transaction.
    ///
    /// Returns the number applied. A migration another process applied in the meantime
    /// is skipped.
    ///
    /// # Errors
    ///
    /// Validation errors from [`Migrator::status`], or `ExecutionFailed` for the first
    /// migration that fails; earlier migrations stay applied.
    pub fn up(&self, client: &Client, steps: Option<usize>) -> Result<usize, MigrationError> {
        let status = self.status(&PgExecutor::new(client.clone()))?;
        let steps = steps.unwrap_or(status.pending_count);
        let mut applied = 0;

        for pending in status.pending.iter().take(steps) {
            let Some(migration) = self.find(pending.version) else {
                continue;
            };
            let ran = run_in_transaction(client, |tx| {
                tx.execute("SELECT pg_advisory_xact_lock($1)", &[&LOCK_KEY])?;
                if is_applied(tx, pending.version)? {
                    return Ok::<_, MigrationError>(false);
                }
                let start = Instant::now();
                migration
                    .up(&SchemaManager::new(tx))
                    .map_err(|e| MigrationError::ExecutionFailed {
                        version: pending.version,
                        name: pending.name.clone(),
                        error: e.to_string(),
                    })?;
                let elapsed = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
                record_applied(tx, pending.version, &pending.name, &pending.checksum, elapsed)?;
                Ok(true)
            })?;

            if ran {
                log::info!("applied migration {} {}", pending.version, pending.name);
                applied += 1;
            } else {
                log::info!("migration {} already applied by another process", pending.version);
            }
        }
        Ok(applied)
    }

    /// Roll back the newest `steps` applied migrations.
    ///
    /// # Errors
    ///
    /// Validation errors from [`Migrator::status`], or `ExecutionFailed` if a `down`
    /// fails; that migration stays applied.
    pub fn down(&self, client: &Client, steps: usize) -> Result<usize, MigrationError> {
        let status = self.status(&PgExecutor::new(client.clone()))?;
        let mut applied = status.applied;
        applied.sort_by_key(|m| std::cmp::Reverse(m.version));
        let mut rolled_back = 0;

        for record in applied.iter().take(steps) {
            let Some(migration) = self.find(record.version) else {
                continue;
            };
            run_in_transaction(client, |tx| {
                tx.execute("SELECT pg_advisory_xact_lock($1)", &[&LOCK_KEY])?;
                if !is_applied(tx, record.version)? {
                    return Ok::<_, MigrationError>(());
                }
                migration
                    .down(&SchemaManager::new(tx))
                    .map_err(|e| MigrationError::ExecutionFailed {
                        version: record.version,
                        name: record.name.clone(),
                        error: e.to_string(),
                    })?;
                remove_applied(tx, record.version)?;
                Ok(())
            })?;
            log::info!("rolled back migration {} {}", record.version, record.name);
            rolled_back += 1;
        }
        Ok(rolled_back)
    }
}
