//! Migration-specific error types

use crate::executor::StoreError;

/// Migration-specific errors
#[derive(Debug)]
pub enum MigrationError {
    /// Database execution error
    Database(StoreError),
    /// Checksum mismatch
    ChecksumMismatch {
        version: i64,
        name: String,
        stored: String,
        current: String,
    },
    /// Migration failed during execution
    ExecutionFailed {
        version: i64,
        name: String,
        error: String,
    },
    /// Two migrations share a version
    DuplicateVersion(i64),
    /// Applied migration unknown to this build
    UnknownApplied { version: i64, name: String },
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Database(e) => write!(f, "Database error: {e}"),
            MigrationError::ChecksumMismatch {
                version,
                name,
                stored,
                current,
            } => {
                write!(
                    f,
                    "Migration '{name}' (version {version}) has been modified after being applied.\n\
                     Stored checksum: {stored}\n\
                     Current checksum: {current}"
                )
            }
            MigrationError::ExecutionFailed { version, name, error } => {
                write!(
                    f,
                    "Migration '{name}' (version {version}) failed during execution: {error}"
                )
            }
            MigrationError::DuplicateVersion(version) => {
                write!(f, "More than one migration declares version {version}")
            }
            MigrationError::UnknownApplied { version, name } => {
                write!(
                    f,
                    "Applied migration '{name}' (version {version}) is not part of this build.\n\
                     Suggestion: deploy a binary that contains it before migrating"
                )
            }
        }
    }
}

impl std::error::Error for MigrationError {}

impl From<StoreError> for MigrationError {
    fn from(error: StoreError) -> Self {
        MigrationError::Database(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_message_names_migration() {
        let err = MigrationError::ChecksumMismatch {
            version: 20240101000100,
            name: "create_users".to_string(),
            stored: "aaa".to_string(),
            current: "bbb".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("create_users"));
        assert!(message.contains("20240101000100"));
        assert!(message.contains("Stored checksum: aaa"));
    }

    #[test]
    fn test_store_error_converts() {
        let err: MigrationError = StoreError::QueryError("boom".to_string()).into();
        assert!(matches!(err, MigrationError::Database(_)));
    }
}
