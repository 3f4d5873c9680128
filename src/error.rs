//! Workflow failure taxonomy.

use crate::executor::StoreError;
use serde_json::json;
use thiserror::Error;

/// Why a workflow operation did not happen.
///
/// Validation and authorization failures are produced before any mutation.
/// `StorageFailure` from inside a transaction means the transaction was rolled back.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),
}

impl WorkflowError {
    pub fn not_found(message: impl Into<String>) -> Self {
        WorkflowError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        WorkflowError::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        WorkflowError::Conflict(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        WorkflowError::InvalidInput(message.into())
    }

    /// HTTP-equivalent status class.
    pub fn status_code(&self) -> u16 {
        match self {
            WorkflowError::NotFound(_) => 404,
            WorkflowError::Forbidden(_) => 403,
            WorkflowError::Conflict(_) => 409,
            WorkflowError::InvalidInput(_) => 400,
            WorkflowError::StorageFailure(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::Forbidden(_) => "forbidden",
            WorkflowError::Conflict(_) => "conflict",
            WorkflowError::InvalidInput(_) => "invalid_input",
            WorkflowError::StorageFailure(_) => "storage_failure",
        }
    }

    /// Structured error body for API responses.
    ///
    /// Storage details stay in the logs; callers only see a generic message.
    pub fn to_payload(&self) -> serde_json::Value {
        let message = match self {
            WorkflowError::StorageFailure(_) => {
                "An internal error occurred while processing your request.".to_string()
            }
            other => other.to_string(),
        };
        json!({
            "error": message,
            "kind": self.kind(),
            "status": self.status_code(),
        })
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
