//! Financial record types: descriptors, stored models and submitted drafts.

pub mod descriptor;
pub mod draft;
pub mod model;

pub use descriptor::{ApprovalShape, RecordDescriptor, RecordKind, SignatureTable};
pub use draft::{NewRecord, RecordDraft, RecordFields, RecordUpdate, ValidationPolicy};
pub use model::{
    ApprovalOutcome, ApprovalState, DashboardTotals, FinancialRecord, LoanStatus, NewUser,
    OwnerSummary, RecordDetails, SignatureEntry, User,
};
