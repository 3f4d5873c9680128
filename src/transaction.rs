//! Transactions over a `may_postgres` client.
//!
//! Bulk approval and each migration step run through [`run_in_transaction`]: the record
//! update and its signature rows (or the DDL and its state-table row) commit together or
//! not at all. An open [`Transaction`] implements [`StoreExecutor`], so statements are
//! issued against it exactly as against a plain client.
//!
//! Everything runs at PostgreSQL's default READ COMMITTED level; approval relies on the
//! guarded `UPDATE ... WHERE <pre-approval>` rather than on stronger isolation.

use crate::executor::{instrumented, StoreError, StoreExecutor};
use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError, Row};
use std::fmt;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Which step of a transaction's lifecycle failed.
#[derive(Debug)]
pub enum TransactionError {
    Begin(PostgresError),
    Commit(PostgresError),
    Rollback(PostgresError),
    /// Statement issued after commit or rollback
    Closed,
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Begin(e) => write!(f, "could not begin transaction: {e}"),
            TransactionError::Commit(e) => write!(f, "could not commit transaction: {e}"),
            TransactionError::Rollback(e) => write!(f, "could not roll back transaction: {e}"),
            TransactionError::Closed => {
                write!(f, "transaction has already been committed or rolled back")
            }
        }
    }
}

impl std::error::Error for TransactionError {}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Begin(e)
            | TransactionError::Commit(e)
            | TransactionError::Rollback(e) => StoreError::PostgresError(e),
            TransactionError::Closed => StoreError::Other(err.to_string()),
        }
    }
}

/// An open transaction holding one client.
///
/// Dropping it while open issues a best-effort `ROLLBACK`.
pub struct Transaction {
    client: Client,
    closed: bool,
}

impl Transaction {
    /// # Errors
    ///
    /// `TransactionError::Begin` if `BEGIN` fails.
    pub fn begin(client: Client) -> Result<Self, TransactionError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        client
            .execute("BEGIN", &[])
            .map_err(TransactionError::Begin)?;
        Ok(Self {
            client,
            closed: false,
        })
    }

    /// # Errors
    ///
    /// `Closed` if already finished, `Commit` if PostgreSQL refuses the commit.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.finish("COMMIT").map_err(|e| match e {
            Some(e) => TransactionError::Commit(e),
            None => TransactionError::Closed,
        })
    }

    /// # Errors
    ///
    /// `Closed` if already finished, `Rollback` if the statement fails.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        self.finish("ROLLBACK").map_err(|e| match e {
            Some(e) => TransactionError::Rollback(e),
            None => TransactionError::Closed,
        })
    }

    /// `Err(None)` when the transaction was already closed.
    fn finish(&mut self, statement: &str) -> Result<(), Option<PostgresError>> {
        if self.closed {
            return Err(None);
        }
        #[cfg(feature = "tracing")]
        let _span = if statement == "COMMIT" {
            tracing_helpers::commit_transaction_span().entered()
        } else {
            tracing_helpers::rollback_transaction_span().entered()
        };

        self.closed = true;
        self.client.execute(statement, &[]).map(|_| ()).map_err(Some)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(TransactionError::Closed.into());
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("transaction dropped while open; rolling back");
            let _ = self.client.execute("ROLLBACK", &[]);
        }
    }
}

impl StoreExecutor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        self.ensure_open()?;
        instrumented(query, || self.client.execute(query, params))
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, StoreError> {
        self.ensure_open()?;
        instrumented(query, || self.client.query_one(query, params))
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError> {
        self.ensure_open()?;
        instrumented(query, || self.client.query(query, params))
    }
}

/// Run `work` inside a transaction: commit on `Ok`, roll back on `Err`.
///
/// A failed rollback is logged; the closure's error is the one returned.
///
/// # Errors
///
/// Returns the closure's error, or a `StoreError` if `BEGIN`/`COMMIT` fails.
pub fn run_in_transaction<T, E, F>(client: &Client, work: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&Transaction) -> Result<T, E>,
{
    run_tracked(client, work, || {})
}

/// As [`run_in_transaction`], calling `on_broken` when `BEGIN`, `COMMIT` or `ROLLBACK`
/// fails. The session state of `client` is unknown after that.
pub(crate) fn run_tracked<T, E, F, B>(client: &Client, work: F, on_broken: B) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&Transaction) -> Result<T, E>,
    B: FnOnce(),
{
    let tx = match Transaction::begin(client.clone()) {
        Ok(tx) => tx,
        Err(e) => {
            on_broken();
            return Err(E::from(StoreError::from(e)));
        }
    };
    match work(&tx) {
        Ok(value) => match tx.commit() {
            Ok(()) => Ok(value),
            Err(e) => {
                on_broken();
                Err(E::from(StoreError::from(e)))
            }
        },
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                log::error!("{rollback_err}");
                on_broken();
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_maps_to_store_error() {
        let store_err: StoreError = TransactionError::Closed.into();
        assert!(matches!(store_err, StoreError::Other(_)));
        assert!(store_err.to_string().contains("already been committed"));
    }
}
