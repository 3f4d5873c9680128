//! Static descriptions of the four financial record types.
//!
//! The workflow engine is written once against [`RecordDescriptor`]; the per-type
//! differences (date column, boolean flag vs. loan status, presence of a signature
//! table) live here as data.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Contribution,
    Investment,
    Loan,
    Withdrawal,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Contribution,
        RecordKind::Investment,
        RecordKind::Loan,
        RecordKind::Withdrawal,
    ];

    pub fn descriptor(self) -> &'static RecordDescriptor {
        match self {
            RecordKind::Contribution => &CONTRIBUTIONS,
            RecordKind::Investment => &INVESTMENTS,
            RecordKind::Loan => &LOANS,
            RecordKind::Withdrawal => &WITHDRAWALS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Contribution => "contribution",
            RecordKind::Investment => "investment",
            RecordKind::Loan => "loan",
            RecordKind::Withdrawal => "withdrawal",
        }
    }

    /// Collection name, also the table name and URL segment.
    pub fn plural(self) -> &'static str {
        self.descriptor().table
    }

    pub fn from_plural(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.plural() == segment)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a record type stores its approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalShape {
    /// Boolean column, `false` until approved.
    Flag { column: &'static str },
    /// Loan status column (`pending` until approved) plus an approval timestamp.
    Status {
        column: &'static str,
        approved_at_column: &'static str,
    },
}

/// Append-only audit table written on approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureTable {
    pub table: &'static str,
    pub record_column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDescriptor {
    pub kind: RecordKind,
    pub table: &'static str,
    /// Column listings are ordered by (descending).
    pub order_column: &'static str,
    /// User-supplied date, absent for loans (ordered by submission time).
    pub date_column: Option<&'static str>,
    /// Free-text column (`description` or `reason`).
    pub note_column: &'static str,
    pub approval: ApprovalShape,
    pub signatures: Option<SignatureTable>,
    /// Sub-directory of the media root for evidence uploads.
    pub evidence_folder: &'static str,
}

impl RecordDescriptor {
    pub fn has_signatures(&self) -> bool {
        self.signatures.is_some()
    }

    pub fn uses_status(&self) -> bool {
        matches!(self.approval, ApprovalShape::Status { .. })
    }
}

pub static CONTRIBUTIONS: RecordDescriptor = RecordDescriptor {
    kind: RecordKind::Contribution,
    table: "contributions",
    order_column: "contribution_date",
    date_column: Some("contribution_date"),
    note_column: "description",
    approval: ApprovalShape::Flag { column: "approved" },
    signatures: None,
    evidence_folder: "contributions",
};

pub static INVESTMENTS: RecordDescriptor = RecordDescriptor {
    kind: RecordKind::Investment,
    table: "investments",
    order_column: "investment_date",
    date_column: Some("investment_date"),
    note_column: "description",
    approval: ApprovalShape::Flag { column: "approved" },
    signatures: Some(SignatureTable {
        table: "investment_signatures",
        record_column: "investment_id",
    }),
    evidence_folder: "investments",
};

pub static LOANS: RecordDescriptor = RecordDescriptor {
    kind: RecordKind::Loan,
    table: "loans",
    order_column: "created_at",
    date_column: None,
    note_column: "reason",
    approval: ApprovalShape::Status {
        column: "status",
        approved_at_column: "approved_at",
    },
    signatures: Some(SignatureTable {
        table: "loan_signatures",
        record_column: "loan_id",
    }),
    evidence_folder: "loans",
};

pub static WITHDRAWALS: RecordDescriptor = RecordDescriptor {
    kind: RecordKind::Withdrawal,
    table: "withdrawals",
    order_column: "withdrawal_date",
    date_column: Some("withdrawal_date"),
    note_column: "reason",
    approval: ApprovalShape::Flag { column: "approved" },
    signatures: Some(SignatureTable {
        table: "withdrawal_signatures",
        record_column: "withdrawal_id",
    }),
    evidence_folder: "withdrawals",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_contributions_lack_signatures() {
        for kind in RecordKind::ALL {
            assert_eq!(
                kind.descriptor().has_signatures(),
                kind != RecordKind::Contribution,
                "{kind}"
            );
        }
    }

    #[test]
    fn test_only_loans_use_status() {
        assert!(RecordKind::Loan.descriptor().uses_status());
        assert!(!RecordKind::Withdrawal.descriptor().uses_status());
    }

    #[test]
    fn test_plural_round_trip() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::from_plural(kind.plural()), Some(kind));
        }
        assert_eq!(RecordKind::from_plural("pets"), None);
    }

    #[test]
    fn test_descriptor_kind_matches() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.descriptor().kind, kind);
        }
    }
}
