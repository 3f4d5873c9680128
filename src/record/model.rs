//! Stored shapes of users, financial records and signatures.

use crate::identity::{ActorContext, Role};
use crate::record::descriptor::RecordKind;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Repaid,
}

impl LoanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Repaid => "repaid",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LoanStatus::Pending),
            "approved" => Ok(LoanStatus::Approved),
            "rejected" => Ok(LoanStatus::Rejected),
            "repaid" => Ok(LoanStatus::Repaid),
            other => Err(format!("unknown loan status '{other}'")),
        }
    }
}

/// Approval indicator of a record: the boolean flag or the loan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Flag(bool),
    Loan(LoanStatus),
}

impl ApprovalState {
    /// Still editable, deletable and approvable.
    pub fn is_pre_approval(self) -> bool {
        matches!(self, ApprovalState::Flag(false) | ApprovalState::Loan(LoanStatus::Pending))
    }

    pub fn label(self) -> &'static str {
        match self {
            ApprovalState::Flag(true) => "approved",
            ApprovalState::Flag(false) => "pending",
            ApprovalState::Loan(status) => status.as_str(),
        }
    }
}

impl Serialize for ApprovalState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Owner columns joined into listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OwnerSummary {
    pub member_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
}

impl OwnerSummary {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Per-kind columns beyond the common shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordDetails {
    Contribution {
        contribution_type: String,
        period: Option<String>,
        /// `None` once the submitting user has been deleted.
        created_by: Option<i64>,
    },
    Investment,
    Loan {
        interest_rate: Decimal,
        repayment_period: i32,
        approved_at: Option<DateTime<Utc>>,
    },
    Withdrawal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialRecord {
    pub id: i64,
    pub kind: RecordKind,
    pub user_id: i64,
    pub amount: Decimal,
    /// `None` for loans, which have no user-supplied date.
    pub record_date: Option<NaiveDate>,
    pub note: Option<String>,
    pub evidence: Option<String>,
    pub approval: ApprovalState,
    pub created_at: DateTime<Utc>,
    pub details: RecordDetails,
    pub owner: Option<OwnerSummary>,
}

impl FinancialRecord {
    pub fn is_pre_approval(&self) -> bool {
        self.approval.is_pre_approval()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub member_id: Option<String>,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    pub is_staff: bool,
    pub avatar: Option<String>,
    pub date_joined: DateTime<Utc>,
}

impl User {
    pub fn actor(&self) -> ActorContext {
        ActorContext::new(self.id, self.role).with_staff(self.is_staff)
    }
}

/// Account row used when seeding a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub member_id: Option<String>,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_staff: bool,
}

impl NewUser {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        let username = username.into();
        Self {
            member_id: None,
            email: format!("{username}@example.org"),
            username,
            first_name: String::new(),
            last_name: String::new(),
            role,
            is_staff: false,
        }
    }

    pub fn named(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }

    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }
}

/// One row of the signature audit listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureEntry {
    pub id: i64,
    pub kind: RecordKind,
    pub record_id: i64,
    pub amount: Decimal,
    pub record_date: Option<NaiveDate>,
    pub note: Option<String>,
    pub interest_rate: Option<Decimal>,
    pub repayment_period: Option<i32>,
    pub signatory_id: i64,
    pub signatory_name: String,
    pub requester_id: i64,
    pub requester_name: String,
    pub signed_at: DateTime<Utc>,
}

/// Result of one bulk approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    pub kind: RecordKind,
    /// Distinct ids submitted after filtering.
    pub requested: usize,
    /// Ids actually transitioned, ascending.
    pub approved_ids: Vec<i64>,
    pub signed_at: DateTime<Utc>,
}

impl ApprovalOutcome {
    pub fn approved(&self) -> usize {
        self.approved_ids.len()
    }

    pub fn message(&self) -> String {
        format!(
            "{} of {} {} approved.",
            self.approved(),
            self.requested,
            self.kind.plural()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardTotals {
    /// Omitted for members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_users: Option<u64>,
    pub total_contributions: Decimal,
    pub pending_contributions: u64,
}
