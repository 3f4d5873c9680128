//! Statement execution over `may_postgres`.
//!
//! [`StoreExecutor`] is the seam between the PostgreSQL record store and the driver: a
//! plain client ([`PgExecutor`]) and an open [`Transaction`](crate::transaction::Transaction)
//! both implement it, so the same statements run inside or outside a transaction.

use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError, Row};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Record store error type
#[derive(Debug)]
pub enum StoreError {
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// Query execution error
    QueryError(String),
    /// Row decoding error (unexpected column type or value)
    ParseError(String),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::PostgresError(e) => write!(f, "PostgreSQL error: {e}"),
            StoreError::QueryError(s) => write!(f, "Query error: {s}"),
            StoreError::ParseError(s) => write!(f, "Parse error: {s}"),
            StoreError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<PostgresError> for StoreError {
    fn from(err: PostgresError) -> Self {
        StoreError::PostgresError(err)
    }
}

/// Trait for executing statements against PostgreSQL
pub trait StoreExecutor {
    /// Execute a statement and return the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the statement fails.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError>;

    /// Execute a query that must return exactly one row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails or does not return exactly one row.
    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, StoreError>;

    /// Execute a query and return all rows.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError>;

    /// Execute a query and return the first row, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    fn query_opt(&self, query: &str, params: &[&dyn ToSql]) -> Result<Option<Row>, StoreError> {
        Ok(self.query_all(query, params)?.into_iter().next())
    }
}

/// Run a driver call with the query span, duration histogram and error counter applied.
pub(crate) fn instrumented<T>(
    query: &str,
    call: impl FnOnce() -> Result<T, PostgresError>,
) -> Result<T, StoreError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::execute_query_span(query).entered();
    #[cfg(not(feature = "tracing"))]
    let _ = query;

    let start = Instant::now();
    let result = call().map_err(|e| {
        #[cfg(feature = "metrics")]
        METRICS.record_query_error();
        log::debug!("statement failed: {e}");
        StoreError::PostgresError(e)
    });

    let duration = start.elapsed();
    #[cfg(feature = "metrics")]
    METRICS.record_query_duration(duration);
    #[cfg(not(feature = "metrics"))]
    let _ = duration;

    result
}

/// `StoreExecutor` backed directly by a `may_postgres::Client`
#[derive(Clone)]
pub struct PgExecutor {
    client: Client,
}

impl PgExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Check that the connection still answers `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the `SELECT 1` fails.
    pub fn check_health(&self) -> Result<bool, StoreError> {
        let row = self.query_one("SELECT 1", &[])?;
        let value: i32 = row
            .try_get(0)
            .map_err(|e| StoreError::ParseError(format!("health check: {e}")))?;
        Ok(value == 1)
    }
}

impl StoreExecutor for PgExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        instrumented(query, || self.client.execute(query, params))
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, StoreError> {
        instrumented(query, || self.client.query_one(query, params))
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError> {
        instrumented(query, || self.client.query(query, params))
    }
}
