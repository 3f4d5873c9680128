//! # Coffer
//!
//! Approval-workflow engine for a membership organisation's financial back office.
//!
//! Members submit contributions, investments, loan requests and withdrawals. Every record
//! starts pre-approval; while it stays there its owner may edit or delete it. Privileged
//! staff approve records in bulk, and for investments, loans and withdrawals each
//! approval writes a signature row naming who signed and when. Once approved a record
//! is frozen.
//!
//! The engine ([`Engine`], [`RecordWorkflow`]) is storage-agnostic: it talks to a
//! [`RecordStore`], implemented over PostgreSQL by [`PgRecordStore`] (using
//! `may_postgres`) and in memory by [`MemoryStore`]. The schema is managed by the
//! [`migration`] module.

pub mod approval_ids;
pub mod config;
pub mod connection;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod identity;
pub mod metrics;
pub mod migration;
pub mod pool;
pub mod query;
pub mod record;
pub mod store;
pub mod transaction;
pub mod workflow;

pub use approval_ids::ApprovalIds;
pub use config::AppConfig;
pub use connection::{connect, ConnectionError};
pub use error::{WorkflowError, WorkflowResult};
pub use evidence::{EvidenceStore, EvidenceUpload, LocalEvidenceStore};
pub use executor::{PgExecutor, StoreError, StoreExecutor};
pub use identity::{ActorContext, IdentityProvider, Role};
pub use pool::{ConnectionPool, PooledConnection};
pub use record::{
    ApprovalOutcome, ApprovalState, DashboardTotals, FinancialRecord, LoanStatus, NewUser,
    RecordDraft, RecordKind, SignatureEntry, User, ValidationPolicy,
};
pub use store::{MemoryStore, PgRecordStore, RecordStore, Visibility};
pub use transaction::{run_in_transaction, Transaction, TransactionError};
pub use workflow::{Engine, RecordWorkflow};
