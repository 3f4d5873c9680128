//! Record store contract.
//!
//! [`RecordStore`] is the one seam between the workflow engine and persistence. Every
//! state-changing method is guarded by the pre-approval predicate inside the store, so
//! the engine's precondition checks are never the only line of defence against races.

pub mod memory;
pub mod postgres;

use crate::executor::StoreError;
use crate::identity::ActorContext;
use crate::record::{
    FinancialRecord, NewRecord, NewUser, RecordDescriptor, RecordUpdate, SignatureEntry, User,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub use memory::MemoryStore;
pub use postgres::PgRecordStore;

/// Which records a listing may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    All,
    Owner(i64),
}

impl Visibility {
    /// Privileged actors see every record; everyone else sees their own.
    pub fn for_actor(actor: &ActorContext) -> Self {
        if actor.is_privileged() {
            Visibility::All
        } else {
            Visibility::Owner(actor.user_id)
        }
    }

    pub fn admits(self, owner_id: i64) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Owner(id) => id == owner_id,
        }
    }
}

pub trait RecordStore {
    /// # Errors
    ///
    /// Returns `StoreError` if the insert fails (e.g. duplicate username).
    fn insert_user(&self, user: &NewUser) -> Result<User, StoreError>;

    /// # Errors
    ///
    /// Returns `StoreError` if the lookup fails.
    fn find_user(&self, user_id: i64) -> Result<Option<User>, StoreError>;

    /// # Errors
    ///
    /// Returns `StoreError` if the count fails.
    fn count_users(&self) -> Result<u64, StoreError>;

    /// Records of one kind under `visibility`, primary date descending then id descending.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    fn list(
        &self,
        descriptor: &RecordDescriptor,
        visibility: Visibility,
    ) -> Result<Vec<FinancialRecord>, StoreError>;

    /// One record regardless of owner.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    fn load(&self, descriptor: &RecordDescriptor, id: i64)
        -> Result<Option<FinancialRecord>, StoreError>;

    /// # Errors
    ///
    /// Returns `StoreError` if the insert fails.
    fn insert(
        &self,
        descriptor: &RecordDescriptor,
        record: &NewRecord,
    ) -> Result<FinancialRecord, StoreError>;

    /// Overwrite a record's mutable fields if it is still pre-approval.
    ///
    /// Returns `None` when the record is missing or no longer pre-approval.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the update fails.
    fn update_pending(
        &self,
        descriptor: &RecordDescriptor,
        id: i64,
        update: &RecordUpdate,
    ) -> Result<Option<FinancialRecord>, StoreError>;

    /// Delete a record if it is still pre-approval. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the delete fails.
    fn delete_pending(&self, descriptor: &RecordDescriptor, id: i64) -> Result<bool, StoreError>;

    /// Approve every pre-approval record among `ids` and sign each one, atomically.
    ///
    /// Already-approved and unknown ids are skipped. Returns the transitioned ids in
    /// ascending order; on error nothing has changed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if any step fails; the whole batch is rolled back.
    fn approve_pending(
        &self,
        descriptor: &RecordDescriptor,
        ids: &[i64],
        signatory_id: i64,
        signed_at: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError>;

    /// Signature audit rows, most recent first. Empty for kinds without a signature table.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    fn signatures(&self, descriptor: &RecordDescriptor) -> Result<Vec<SignatureEntry>, StoreError>;

    /// # Errors
    ///
    /// Returns `StoreError` if the count fails.
    fn count_pending(
        &self,
        descriptor: &RecordDescriptor,
        visibility: Visibility,
    ) -> Result<u64, StoreError>;

    /// # Errors
    ///
    /// Returns `StoreError` if the aggregate fails.
    fn sum_amount(
        &self,
        descriptor: &RecordDescriptor,
        visibility: Visibility,
    ) -> Result<Decimal, StoreError>;
}
