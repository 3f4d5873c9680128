//! Submitted record fields and their validation.

use crate::config::ValidationConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::record::descriptor::RecordKind;
use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Untrusted create/edit input. Which fields are required depends on the kind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecordDraft {
    pub amount: Option<Decimal>,
    /// Contribution, investment or withdrawal date.
    pub date: Option<NaiveDate>,
    /// `description` or `reason`.
    #[serde(alias = "description", alias = "reason")]
    pub note: Option<String>,
    #[serde(rename = "type")]
    pub contribution_type: Option<String>,
    pub period: Option<String>,
    pub interest_rate: Option<Decimal>,
    pub repayment_period: Option<i32>,
    /// Target member for staff submissions (contributions only).
    pub on_behalf_of: Option<i64>,
    /// Inline approval request; honoured for privileged actors on contributions.
    pub approved: Option<bool>,
}

/// Validated, typed fields of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFields {
    Contribution {
        amount: Decimal,
        contribution_type: String,
        contribution_date: NaiveDate,
        period: Option<String>,
        description: Option<String>,
    },
    Investment {
        amount: Decimal,
        investment_date: NaiveDate,
        description: Option<String>,
    },
    Loan {
        amount: Decimal,
        interest_rate: Decimal,
        repayment_period: i32,
        reason: Option<String>,
    },
    Withdrawal {
        amount: Decimal,
        withdrawal_date: NaiveDate,
        reason: Option<String>,
    },
}

impl RecordFields {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordFields::Contribution { .. } => RecordKind::Contribution,
            RecordFields::Investment { .. } => RecordKind::Investment,
            RecordFields::Loan { .. } => RecordKind::Loan,
            RecordFields::Withdrawal { .. } => RecordKind::Withdrawal,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            RecordFields::Contribution { amount, .. }
            | RecordFields::Investment { amount, .. }
            | RecordFields::Loan { amount, .. }
            | RecordFields::Withdrawal { amount, .. } => *amount,
        }
    }

    pub fn record_date(&self) -> Option<NaiveDate> {
        match self {
            RecordFields::Contribution {
                contribution_date, ..
            } => Some(*contribution_date),
            RecordFields::Investment {
                investment_date, ..
            } => Some(*investment_date),
            RecordFields::Withdrawal {
                withdrawal_date, ..
            } => Some(*withdrawal_date),
            RecordFields::Loan { .. } => None,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            RecordFields::Contribution { description, .. }
            | RecordFields::Investment { description, .. } => description.as_deref(),
            RecordFields::Loan { reason, .. } | RecordFields::Withdrawal { reason, .. } => {
                reason.as_deref()
            }
        }
    }
}

/// A record ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub owner_id: i64,
    pub created_by: i64,
    pub fields: RecordFields,
    pub evidence: Option<String>,
    /// Contributions only: approved at creation.
    pub approved: bool,
}

/// Replacement values for a pre-approval record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub fields: RecordFields,
    /// `None` keeps the stored reference.
    pub evidence: Option<String>,
    /// Contributions only: approve while editing.
    pub approve: bool,
}

const EARLIEST_DATE: (i32, u32, u32) = (1900, 1, 1);

/// Bounds for submitted records.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    max_amount: Decimal,
    max_future_days: i64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for ValidationPolicy {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            max_amount: config.max_amount,
            max_future_days: config.max_future_days,
        }
    }
}

impl ValidationPolicy {
    /// Validate `draft` as a record of `kind`, relative to today's date.
    ///
    /// # Errors
    ///
    /// `InvalidInput` naming the first offending field.
    pub fn validate(&self, kind: RecordKind, draft: &RecordDraft) -> WorkflowResult<RecordFields> {
        self.validate_on(kind, draft, Utc::now().date_naive())
    }

    /// Validate against an explicit `today`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` naming the first offending field.
    pub fn validate_on(
        &self,
        kind: RecordKind,
        draft: &RecordDraft,
        today: NaiveDate,
    ) -> WorkflowResult<RecordFields> {
        let amount = self.amount(draft.amount)?;
        let note = clean_text(draft.note.as_deref());

        let fields = match kind {
            RecordKind::Contribution => {
                let contribution_type = clean_text(draft.contribution_type.as_deref())
                    .ok_or_else(|| WorkflowError::invalid("Contribution type is required."))?;
                RecordFields::Contribution {
                    amount,
                    contribution_type,
                    contribution_date: self.date(draft.date, today)?,
                    period: clean_text(draft.period.as_deref()),
                    description: note,
                }
            }
            RecordKind::Investment => RecordFields::Investment {
                amount,
                investment_date: self.date(draft.date, today)?,
                description: note,
            },
            RecordKind::Loan => RecordFields::Loan {
                amount,
                interest_rate: interest_rate(draft.interest_rate)?,
                repayment_period: repayment_period(draft.repayment_period)?,
                reason: note,
            },
            RecordKind::Withdrawal => RecordFields::Withdrawal {
                amount,
                withdrawal_date: self.date(draft.date, today)?,
                reason: note,
            },
        };
        Ok(fields)
    }

    fn amount(&self, amount: Option<Decimal>) -> WorkflowResult<Decimal> {
        let amount = amount.ok_or_else(|| WorkflowError::invalid("Amount is required."))?;
        if amount <= Decimal::ZERO {
            return Err(WorkflowError::invalid("Amount must be greater than zero."));
        }
        if amount.normalize().scale() > 2 {
            return Err(WorkflowError::invalid(
                "Amount must have at most two decimal places.",
            ));
        }
        if amount > self.max_amount {
            return Err(WorkflowError::invalid(format!(
                "Amount must not exceed {}.",
                self.max_amount
            )));
        }
        Ok(amount)
    }

    fn date(&self, date: Option<NaiveDate>, today: NaiveDate) -> WorkflowResult<NaiveDate> {
        let date = date.ok_or_else(|| WorkflowError::invalid("Date is required."))?;
        let (year, month, day) = EARLIEST_DATE;
        if NaiveDate::from_ymd_opt(year, month, day).is_some_and(|earliest| date < earliest) {
            return Err(WorkflowError::invalid(format!("Date {date} is not plausible.")));
        }
        let window = Days::new(self.max_future_days.max(0).unsigned_abs());
        let latest = today.checked_add_days(window).unwrap_or(NaiveDate::MAX);
        if date > latest {
            return Err(WorkflowError::invalid(format!(
                "Date {date} is too far in the future."
            )));
        }
        Ok(date)
    }
}

fn interest_rate(rate: Option<Decimal>) -> WorkflowResult<Decimal> {
    let rate = rate.ok_or_else(|| WorkflowError::invalid("Interest rate is required."))?;
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(WorkflowError::invalid(
            "Interest rate must be between 0 and 100.",
        ));
    }
    if rate.normalize().scale() > 2 {
        return Err(WorkflowError::invalid(
            "Interest rate must have at most two decimal places.",
        ));
    }
    Ok(rate)
}

fn repayment_period(months: Option<i32>) -> WorkflowResult<i32> {
    let months =
        months.ok_or_else(|| WorkflowError::invalid("Repayment period is required."))?;
    if !(1..=600).contains(&months) {
        return Err(WorkflowError::invalid(
            "Repayment period must be between 1 and 600 months.",
        ));
    }
    Ok(months)
}

fn clean_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
