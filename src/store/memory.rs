//! In-process record store.
//!
//! Same contract as the PostgreSQL store. Batch approval works on a copy of the state
//! and swaps it in only when every step succeeded, so an injected failure leaves the
//! store untouched.

use crate::executor::StoreError;
use crate::record::{
    ApprovalState, FinancialRecord, LoanStatus, NewRecord, NewUser, OwnerSummary, RecordDescriptor,
    RecordDetails, RecordFields, RecordKind, RecordUpdate, SignatureEntry, User,
};
use crate::store::{RecordStore, Visibility};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredSignature {
    id: i64,
    record_id: i64,
    signatory_id: i64,
    signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<i64, User>,
    records: HashMap<RecordKind, BTreeMap<i64, FinancialRecord>>,
    signatures: HashMap<RecordKind, Vec<StoredSignature>>,
    sequences: HashMap<&'static str, i64>,
}

impl MemoryState {
    fn next_id(&mut self, table: &'static str) -> i64 {
        let next = self.sequences.entry(table).or_insert(0);
        *next += 1;
        *next
    }

    fn owner(&self, user_id: i64) -> Option<OwnerSummary> {
        self.users.get(&user_id).map(|user| OwnerSummary {
            member_id: user.member_id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        })
    }

    fn with_owner(&self, record: &FinancialRecord) -> FinancialRecord {
        let mut record = record.clone();
        record.owner = self.owner(record.user_id);
        record
    }

    fn display_name(&self, user_id: i64) -> String {
        self.owner(user_id)
            .map(|owner| owner.display_name())
            .unwrap_or_default()
    }
}

/// Record store held in memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_signatures: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every signature insert fail, forcing batch approvals to roll back.
    pub fn fail_signature_inserts(&self, fail: bool) {
        self.fail_signatures.store(fail, Ordering::SeqCst);
    }

    /// Make record inserts and updates fail.
    pub fn fail_record_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Activate or deactivate an account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Other` for an unknown user.
    pub fn set_active(&self, user_id: i64, is_active: bool) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::Other(format!("no user {user_id}")))?;
        user.is_active = is_active;
        Ok(())
    }

    /// Number of signature rows stored for a kind.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store lock is poisoned.
    pub fn signature_count(&self, kind: RecordKind) -> Result<usize, StoreError> {
        Ok(self.lock()?.signatures.get(&kind).map_or(0, Vec::len))
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".to_string()))
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Other("injected record write failure".to_string()));
        }
        Ok(())
    }
}

fn details_for(fields: &RecordFields, created_by: Option<i64>) -> RecordDetails {
    match fields {
        RecordFields::Contribution {
            contribution_type,
            period,
            ..
        } => RecordDetails::Contribution {
            contribution_type: contribution_type.clone(),
            period: period.clone(),
            created_by,
        },
        RecordFields::Investment { .. } => RecordDetails::Investment,
        RecordFields::Loan {
            interest_rate,
            repayment_period,
            ..
        } => RecordDetails::Loan {
            interest_rate: *interest_rate,
            repayment_period: *repayment_period,
            approved_at: None,
        },
        RecordFields::Withdrawal { .. } => RecordDetails::Withdrawal,
    }
}

fn approved_state(kind: RecordKind) -> ApprovalState {
    match kind {
        RecordKind::Loan => ApprovalState::Loan(LoanStatus::Approved),
        _ => ApprovalState::Flag(true),
    }
}

fn pending_state(kind: RecordKind) -> ApprovalState {
    match kind {
        RecordKind::Loan => ApprovalState::Loan(LoanStatus::Pending),
        _ => ApprovalState::Flag(false),
    }
}

impl RecordStore for MemoryStore {
    fn insert_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut state = self.lock()?;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::QueryError(format!(
                "duplicate username '{}'",
                user.username
            )));
        }
        let id = state.next_id("users");
        let stored = User {
            id,
            member_id: user.member_id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
            is_active: true,
            is_staff: user.is_staff,
            avatar: None,
            date_joined: Utc::now(),
        };
        state.users.insert(id, stored.clone());
        Ok(stored)
    }

    fn find_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    fn count_users(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.users.len() as u64)
    }

    fn list(
        &self,
        descriptor: &RecordDescriptor,
        visibility: Visibility,
    ) -> Result<Vec<FinancialRecord>, StoreError> {
        let state = self.lock()?;
        let mut records: Vec<FinancialRecord> = state
            .records
            .get(&descriptor.kind)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|record| visibility.admits(record.user_id))
            .map(|record| state.with_owner(record))
            .collect();

        let by_submission = descriptor.date_column.is_none();
        records.sort_by(|a, b| {
            let primary = if by_submission {
                b.created_at.cmp(&a.created_at)
            } else {
                b.record_date.cmp(&a.record_date)
            };
            primary.then(b.id.cmp(&a.id))
        });
        Ok(records)
    }

    fn load(
        &self,
        descriptor: &RecordDescriptor,
        id: i64,
    ) -> Result<Option<FinancialRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .records
            .get(&descriptor.kind)
            .and_then(|records| records.get(&id))
            .map(|record| state.with_owner(record)))
    }

    fn insert(
        &self,
        descriptor: &RecordDescriptor,
        record: &NewRecord,
    ) -> Result<FinancialRecord, StoreError> {
        self.check_writes()?;
        let mut state = self.lock()?;
        if !state.users.contains_key(&record.owner_id) {
            return Err(StoreError::QueryError(format!(
                "foreign key violation: no user {}",
                record.owner_id
            )));
        }

        let kind = descriptor.kind;
        let approval = if record.approved && kind == RecordKind::Contribution {
            ApprovalState::Flag(true)
        } else {
            pending_state(kind)
        };
        let id = state.next_id(descriptor.table);
        let stored = FinancialRecord {
            id,
            kind,
            user_id: record.owner_id,
            amount: record.fields.amount(),
            record_date: record.fields.record_date(),
            note: record.fields.note().map(str::to_string),
            evidence: record.evidence.clone(),
            approval,
            created_at: Utc::now(),
            details: details_for(&record.fields, Some(record.created_by)),
            owner: None,
        };
        state
            .records
            .entry(kind)
            .or_default()
            .insert(id, stored.clone());
        Ok(state.with_owner(&stored))
    }

    fn update_pending(
        &self,
        descriptor: &RecordDescriptor,
        id: i64,
        update: &RecordUpdate,
    ) -> Result<Option<FinancialRecord>, StoreError> {
        self.check_writes()?;
        let mut state = self.lock()?;
        let Some(record) = state
            .records
            .get_mut(&descriptor.kind)
            .and_then(|records| records.get_mut(&id))
        else {
            return Ok(None);
        };
        if !record.is_pre_approval() {
            return Ok(None);
        }

        let created_by = match &record.details {
            RecordDetails::Contribution { created_by, .. } => *created_by,
            _ => Some(record.user_id),
        };
        record.amount = update.fields.amount();
        record.record_date = update.fields.record_date();
        record.note = update.fields.note().map(str::to_string);
        record.details = details_for(&update.fields, created_by);
        if let Some(evidence) = &update.evidence {
            record.evidence = Some(evidence.clone());
        }
        if update.approve && descriptor.kind == RecordKind::Contribution {
            record.approval = ApprovalState::Flag(true);
        }

        let updated = record.clone();
        Ok(Some(state.with_owner(&updated)))
    }

    fn delete_pending(&self, descriptor: &RecordDescriptor, id: i64) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let Some(records) = state.records.get_mut(&descriptor.kind) else {
            return Ok(false);
        };
        let removable = records
            .get(&id)
            .is_some_and(FinancialRecord::is_pre_approval);
        if removable {
            records.remove(&id);
        }
        Ok(removable)
    }

    fn approve_pending(
        &self,
        descriptor: &RecordDescriptor,
        ids: &[i64],
        signatory_id: i64,
        signed_at: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        let kind = descriptor.kind;

        let mut approved = Vec::new();
        if let Some(records) = next.records.get_mut(&kind) {
            for id in ids {
                if let Some(record) = records.get_mut(id) {
                    if record.is_pre_approval() {
                        record.approval = approved_state(kind);
                        if let RecordDetails::Loan { approved_at, .. } = &mut record.details {
                            *approved_at = Some(signed_at);
                        }
                        approved.push(*id);
                    }
                }
            }
        }
        approved.sort_unstable();
        approved.dedup();

        if descriptor.has_signatures() && !approved.is_empty() {
            if self.fail_signatures.load(Ordering::SeqCst) {
                return Err(StoreError::Other("injected signature insert failure".to_string()));
            }
            for record_id in &approved {
                let id = next.next_id("signatures");
                next.signatures.entry(kind).or_default().push(StoredSignature {
                    id,
                    record_id: *record_id,
                    signatory_id,
                    signed_at,
                });
            }
        }

        *state = next;
        Ok(approved)
    }

    fn signatures(&self, descriptor: &RecordDescriptor) -> Result<Vec<SignatureEntry>, StoreError> {
        let state = self.lock()?;
        let kind = descriptor.kind;
        let records = state.records.get(&kind);
        let mut entries: Vec<SignatureEntry> = state
            .signatures
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|signature| {
                let record = records?.get(&signature.record_id)?;
                let (interest_rate, repayment_period) = match &record.details {
                    RecordDetails::Loan {
                        interest_rate,
                        repayment_period,
                        ..
                    } => (Some(*interest_rate), Some(*repayment_period)),
                    _ => (None, None),
                };
                Some(SignatureEntry {
                    id: signature.id,
                    kind,
                    record_id: record.id,
                    amount: record.amount,
                    record_date: record.record_date,
                    note: record.note.clone(),
                    interest_rate,
                    repayment_period,
                    signatory_id: signature.signatory_id,
                    signatory_name: state.display_name(signature.signatory_id),
                    requester_id: record.user_id,
                    requester_name: state.display_name(record.user_id),
                    signed_at: signature.signed_at,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.signed_at.cmp(&a.signed_at).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    fn count_pending(
        &self,
        descriptor: &RecordDescriptor,
        visibility: Visibility,
    ) -> Result<u64, StoreError> {
        let state = self.lock()?;
        Ok(state
            .records
            .get(&descriptor.kind)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|record| visibility.admits(record.user_id) && record.is_pre_approval())
            .count() as u64)
    }

    fn sum_amount(
        &self,
        descriptor: &RecordDescriptor,
        visibility: Visibility,
    ) -> Result<Decimal, StoreError> {
        let state = self.lock()?;
        Ok(state
            .records
            .get(&descriptor.kind)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|record| visibility.admits(record.user_id))
            .map(|record| record.amount)
            .sum())
    }
}
