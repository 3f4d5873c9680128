//! Schema migrations.
//!
//! Migrations are compiled in (see [`schema`]) and tracked in the `coffer_migrations`
//! state table with a SHA-256 checksum of the SQL each one generates. The
//! `coffer-migrate` binary drives [`Migrator`]; the server refuses to start if
//! [`Migrator::validate`] fails.
//!
//! ```rust,no_run
//! use coffer::migration::{Migration, SchemaManager};
//! use coffer::StoreError;
//! use sea_query::{ColumnDef, Table};
//!
//! pub struct CreateAuditLog;
//!
//! impl Migration for CreateAuditLog {
//!     fn name(&self) -> &str {
//!         "create_audit_log"
//!     }
//!
//!     fn version(&self) -> i64 {
//!         20240301120000
//!     }
//!
//!     fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
//!         manager.create_table(
//!             Table::create()
//!                 .table("audit_log")
//!                 .col(ColumnDef::new("id").big_integer().not_null().auto_increment().primary_key())
//!                 .to_owned(),
//!         )
//!     }
//!
//!     fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
//!         manager.drop_table(Table::drop().table("audit_log").to_owned())
//!     }
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod migration;
pub mod migrator;
pub mod record;
pub mod schema;
pub mod schema_manager;
pub mod state_table;
pub mod status;

pub use checksum::calculate_checksum;
pub use error::MigrationError;
pub use migration::Migration;
pub use migrator::Migrator;
pub use record::MigrationRecord;
pub use schema_manager::SchemaManager;
pub use status::{MigrationStatus, PendingMigration};
