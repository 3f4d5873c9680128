//! Checksums of embedded migrations

use super::{Migration, SchemaManager};
use crate::executor::StoreError;
use sha2::{Digest, Sha256};

/// SHA-256 over the SQL a migration generates in both directions.
///
/// Editing a migration after it has been applied changes its checksum, which the
/// migrator then refuses to run past.
///
/// # Errors
///
/// Returns `StoreError` if the migration fails while recording.
pub fn calculate_checksum(migration: &dyn Migration) -> Result<String, StoreError> {
    let up = SchemaManager::recording();
    migration.up(&up)?;
    let down = SchemaManager::recording();
    migration.down(&down)?;

    let mut hasher = Sha256::new();
    for statement in up.recorded().iter().chain(down.recorded().iter()) {
        hasher.update(statement.as_bytes());
        hasher.update(b";\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::schema;

    #[test]
    fn test_checksums_are_stable_and_distinct() {
        let migrations = schema::all();
        let first: Vec<String> = migrations
            .iter()
            .map(|m| calculate_checksum(m.as_ref()).expect("checksum"))
            .collect();
        let second: Vec<String> = migrations
            .iter()
            .map(|m| calculate_checksum(m.as_ref()).expect("checksum"))
            .collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|c| c.len() == 64));

        let mut unique = first.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), first.len());
    }
}
