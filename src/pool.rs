//! Connection slots for the PostgreSQL record store.
//!
//! A `may_postgres` client pipelines statements from every coroutine holding a clone of
//! it, so a transaction on a shared client would absorb unrelated statements. Store
//! operations therefore check out a connection exclusively and hand it back on drop.
//!
//! At most `max_connections` connections are checked out at once, counted by a `may`
//! semaphore. When none is free, [`ConnectionPool::acquire`] parks the calling coroutine
//! (not its worker thread) for up to `pool_timeout`. Idle clients wait in a crossbeam
//! queue that is only ever read without blocking.

use crate::config::DatabaseConfig;
use crate::connection::{connect, redacted, validate_connection_string, ConnectionError};
use crate::executor::{PgExecutor, StoreError};
use crate::transaction::{run_tracked, Transaction};
use crossbeam_channel::{bounded, Receiver, Sender};
use may::sync::Semphore;
use may_postgres::Client;
use std::cell::Cell;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

enum Source {
    Url(String),
    Shared(Client),
}

pub struct ConnectionPool {
    source: Source,
    idle_tx: Sender<Client>,
    idle_rx: Receiver<Client>,
    slots: Semphore,
    opened: AtomicUsize,
    timeout: Duration,
}

impl ConnectionPool {
    /// One connection is opened eagerly so a bad URL fails here.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the URL is malformed or the first connection fails.
    pub fn new(
        url: impl Into<String>,
        max_connections: usize,
        timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let url = url.into();
        validate_connection_string(&url)?;
        let max_connections = max_connections.max(1);
        let (idle_tx, idle_rx) = bounded(max_connections);
        let first = connect(&url)?;
        log::info!(
            "connection pool for {} ready (max {max_connections})",
            redacted(&url)
        );
        let opened = usize::from(idle_tx.try_send(first).is_ok());
        Ok(Self {
            source: Source::Url(url),
            idle_tx,
            idle_rx,
            slots: Semphore::new(max_connections),
            opened: AtomicUsize::new(opened),
            timeout,
        })
    }

    /// # Errors
    ///
    /// As for [`ConnectionPool::new`].
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        Self::new(
            config.url.clone(),
            config.max_connections,
            Duration::from_secs(config.pool_timeout_seconds),
        )
    }

    /// Every checkout shares `client`. Only suitable when a single coroutine uses the
    /// store, such as the migration CLI and tests.
    pub fn shared(client: Client) -> Self {
        let (idle_tx, idle_rx) = bounded(0);
        Self {
            source: Source::Shared(client),
            idle_tx,
            idle_rx,
            slots: Semphore::new(1),
            opened: AtomicUsize::new(1),
            timeout: Duration::ZERO,
        }
    }

    /// # Errors
    ///
    /// `StoreError::Other` if no connection frees up within the timeout, or the
    /// driver error if a new connection cannot be opened.
    pub fn acquire(&self) -> Result<PooledConnection<'_>, StoreError> {
        let client = match &self.source {
            Source::Shared(client) => client.clone(),
            Source::Url(url) => {
                self.claim_slot()?;
                match self.idle_rx.try_recv() {
                    Ok(client) => client,
                    Err(_) => self.open(url)?,
                }
            }
        };
        Ok(PooledConnection {
            pool: self,
            executor: PgExecutor::new(client),
            broken: Cell::new(false),
        })
    }

    /// Open connections, idle or checked out.
    pub fn size(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.idle_rx.len()
    }

    fn claim_slot(&self) -> Result<(), StoreError> {
        if self.slots.try_wait() {
            return Ok(());
        }
        log::debug!(
            "connection pool exhausted ({} open, {} idle), waiting up to {:?}",
            self.size(),
            self.idle_count(),
            self.timeout
        );
        if self.slots.wait_timeout(self.timeout) {
            Ok(())
        } else {
            Err(StoreError::Other(format!(
                "no database connection available within {:?}",
                self.timeout
            )))
        }
    }

    /// Called with a claimed slot; gives the slot back if the connect fails.
    fn open(&self, url: &str) -> Result<Client, StoreError> {
        let client = connect(url).map_err(|e| {
            self.slots.post();
            match e {
                ConnectionError::PostgresError(e) => StoreError::PostgresError(e),
                other => StoreError::Other(other.to_string()),
            }
        })?;
        self.opened.fetch_add(1, Ordering::AcqRel);
        Ok(client)
    }

    fn release(&self, client: Client, broken: bool) {
        if let Source::Shared(_) = self.source {
            return;
        }
        if broken {
            log::warn!("discarding database connection after a failed transaction");
            self.opened.fetch_sub(1, Ordering::AcqRel);
        } else if self.idle_tx.try_send(client).is_err() {
            self.opened.fetch_sub(1, Ordering::AcqRel);
        }
        self.slots.post();
    }
}

/// A checked-out connection; returned to the pool when dropped.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    executor: PgExecutor,
    broken: Cell<bool>,
}

impl PooledConnection<'_> {
    /// Run `work` in a transaction on this connection: commit on `Ok`, roll back on
    /// `Err`. If `BEGIN`, `COMMIT` or `ROLLBACK` fails the connection is closed on drop
    /// instead of going back to the pool.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a `StoreError` if `BEGIN`/`COMMIT` fails.
    pub fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Transaction) -> Result<T, E>,
    {
        run_tracked(self.executor.client(), work, || self.broken.set(true))
    }

    /// Whether this connection will be discarded rather than reused.
    pub fn is_broken(&self) -> bool {
        self.broken.get()
    }
}

impl Deref for PooledConnection<'_> {
    type Target = PgExecutor;

    fn deref(&self) -> &PgExecutor {
        &self.executor
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        self.pool
            .release(self.executor.client().clone(), self.broken.get());
    }
}
