//! PostgreSQL record store over `may_postgres`.
//!
//! Decimals, dates and timestamps cross the driver as text: parameters are bound as
//! strings and cast in SQL (`$n::text::numeric`), and selected columns are rendered to
//! text by the statements in [`crate::query::records`].

use crate::executor::{StoreError, StoreExecutor};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::identity::Role;
use crate::query::records::{self, utc_text};
use crate::query::value_conversion::with_converted_params;
use crate::record::{
    ApprovalShape, ApprovalState, FinancialRecord, LoanStatus, NewRecord, NewUser, OwnerSummary,
    RecordDescriptor, RecordDetails, RecordFields, RecordKind, RecordUpdate, SignatureEntry, User,
};
use crate::store::{RecordStore, Visibility};
use chrono::{DateTime, NaiveDate, Utc};
use may_postgres::types::FromSql;
use may_postgres::{Client, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// Record store over a [`ConnectionPool`]; every operation holds one connection.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: Arc<ConnectionPool>,
}

impl PgRecordStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Store over a single shared client.
    pub fn with_client(client: Client) -> Self {
        Self::new(ConnectionPool::shared(client))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection<'_>, StoreError> {
        self.pool.acquire()
    }

    fn select_rows(&self, (sql, values): (String, sea_query::Values)) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn()?;
        with_converted_params(&values, |params| conn.query_all(&sql, params))
    }
}

pub(crate) fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, StoreError> {
    row.try_get(name)
        .map_err(|e| StoreError::ParseError(format!("column '{name}': {e}")))
}

fn parse_decimal(text: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(text).map_err(|e| StoreError::ParseError(format!("decimal '{text}': {e}")))
}

fn parse_date(text: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| StoreError::ParseError(format!("date '{text}': {e}")))
}

pub(crate) fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::ParseError(format!("timestamp '{text}': {e}")))
}

fn optional<T>(
    text: Option<String>,
    parse: impl Fn(&str) -> Result<T, StoreError>,
) -> Result<Option<T>, StoreError> {
    text.as_deref().map(parse).transpose()
}

fn record_from_row(descriptor: &RecordDescriptor, row: &Row) -> Result<FinancialRecord, StoreError> {
    let kind = descriptor.kind;
    let user_id: i64 = column(row, "user_id")?;
    let amount: String = column(row, "amount")?;
    let created_at: String = column(row, "created_at")?;
    let record_date = match descriptor.date_column {
        Some(_) => Some(parse_date(&column::<String>(row, "record_date")?)?),
        None => None,
    };

    let (approval, approved_at) = match descriptor.approval {
        ApprovalShape::Flag { .. } => (ApprovalState::Flag(column(row, "approved")?), None),
        ApprovalShape::Status { .. } => {
            let status: String = column(row, "status")?;
            let status = LoanStatus::from_str(&status).map_err(StoreError::ParseError)?;
            let approved_at = optional(column(row, "approved_at")?, parse_timestamp)?;
            (ApprovalState::Loan(status), approved_at)
        }
    };

    let details = match kind {
        RecordKind::Contribution => RecordDetails::Contribution {
            contribution_type: column(row, "contribution_type")?,
            period: column(row, "period")?,
            created_by: column::<Option<i64>>(row, "created_by")?,
        },
        RecordKind::Investment => RecordDetails::Investment,
        RecordKind::Loan => RecordDetails::Loan {
            interest_rate: parse_decimal(&column::<String>(row, "interest_rate")?)?,
            repayment_period: column(row, "repayment_period")?,
            approved_at,
        },
        RecordKind::Withdrawal => RecordDetails::Withdrawal,
    };

    Ok(FinancialRecord {
        id: column(row, "id")?,
        kind,
        user_id,
        amount: parse_decimal(&amount)?,
        record_date,
        note: column(row, "note")?,
        evidence: column(row, "evidence")?,
        approval,
        created_at: parse_timestamp(&created_at)?,
        details,
        owner: Some(OwnerSummary {
            member_id: column(row, "owner_member_id")?,
            first_name: column(row, "owner_first_name")?,
            last_name: column(row, "owner_last_name")?,
        }),
    })
}

fn signature_from_row(
    descriptor: &RecordDescriptor,
    row: &Row,
) -> Result<SignatureEntry, StoreError> {
    let full_name = |first: &str, last: &str| -> Result<String, StoreError> {
        let first: String = column(row, first)?;
        let last: String = column(row, last)?;
        Ok(format!("{first} {last}").trim().to_string())
    };
    let amount: String = column(row, "amount")?;
    let signed_at: String = column(row, "signed_at")?;
    let record_date = match descriptor.date_column {
        Some(_) => Some(parse_date(&column::<String>(row, "record_date")?)?),
        None => None,
    };
    let (interest_rate, repayment_period) = if descriptor.kind == RecordKind::Loan {
        (
            Some(parse_decimal(&column::<String>(row, "interest_rate")?)?),
            Some(column(row, "repayment_period")?),
        )
    } else {
        (None, None)
    };

    Ok(SignatureEntry {
        id: column(row, "id")?,
        kind: descriptor.kind,
        record_id: column(row, "record_id")?,
        amount: parse_decimal(&amount)?,
        record_date,
        note: column(row, "note")?,
        interest_rate,
        repayment_period,
        signatory_id: column(row, "signatory_id")?,
        signatory_name: full_name("signatory_first_name", "signatory_last_name")?,
        requester_id: column(row, "requester_id")?,
        requester_name: full_name("requester_first_name", "requester_last_name")?,
        signed_at: parse_timestamp(&signed_at)?,
    })
}

fn user_from_row(row: &Row) -> Result<User, StoreError> {
    let role: String = column(row, "role")?;
    let date_joined: String = column(row, "date_joined")?;
    Ok(User {
        id: column(row, "id")?,
        member_id: column(row, "member_id")?,
        username: column(row, "username")?,
        email: column(row, "email")?,
        first_name: column(row, "first_name")?,
        last_name: column(row, "last_name")?,
        role: Role::from_str(&role).map_err(|e| StoreError::ParseError(e.to_string()))?,
        is_active: column(row, "is_active")?,
        is_staff: column(row, "is_staff")?,
        avatar: column(row, "avatar")?,
        date_joined: parse_timestamp(&date_joined)?,
    })
}

fn insert_sql(descriptor: &RecordDescriptor) -> &'static str {
    match descriptor.kind {
        RecordKind::Contribution => {
            "INSERT INTO contributions \
             (user_id, created_by, amount, type, contribution_date, period, description, evidence, approved) \
             VALUES ($1, $2, $3::text::numeric, $4, $5::text::date, $6, $7, $8, $9) RETURNING id"
        }
        RecordKind::Investment => {
            "INSERT INTO investments (user_id, amount, investment_date, description, evidence) \
             VALUES ($1, $2::text::numeric, $3::text::date, $4, $5) RETURNING id"
        }
        RecordKind::Loan => {
            "INSERT INTO loans (user_id, amount, interest_rate, repayment_period, reason, evidence) \
             VALUES ($1, $2::text::numeric, $3::text::numeric, $4, $5, $6) RETURNING id"
        }
        RecordKind::Withdrawal => {
            "INSERT INTO withdrawals (user_id, amount, withdrawal_date, reason, evidence) \
             VALUES ($1, $2::text::numeric, $3::text::date, $4, $5) RETURNING id"
        }
    }
}

fn update_sql(descriptor: &RecordDescriptor) -> String {
    let pending = records::pending_predicate(descriptor, descriptor.table);
    let assignments = match descriptor.kind {
        RecordKind::Contribution => {
            "amount = $2::text::numeric, type = $3, contribution_date = $4::text::date, \
             period = $5, description = $6, evidence = COALESCE($7, evidence), \
             approved = approved OR $8"
        }
        RecordKind::Investment => {
            "amount = $2::text::numeric, investment_date = $3::text::date, description = $4, \
             evidence = COALESCE($5, evidence)"
        }
        RecordKind::Loan => {
            "amount = $2::text::numeric, interest_rate = $3::text::numeric, \
             repayment_period = $4, reason = $5, evidence = COALESCE($6, evidence)"
        }
        RecordKind::Withdrawal => {
            "amount = $2::text::numeric, withdrawal_date = $3::text::date, reason = $4, \
             evidence = COALESCE($5, evidence)"
        }
    };
    format!(
        "UPDATE {table} SET {assignments} WHERE id = $1 AND {pending} RETURNING id",
        table = descriptor.table
    )
}

fn approve_sql(descriptor: &RecordDescriptor) -> String {
    let table = descriptor.table;
    let pending = records::pending_predicate(descriptor, table);
    match descriptor.approval {
        ApprovalShape::Flag { column } => format!(
            "UPDATE {table} SET {column} = TRUE WHERE id = ANY($1) AND {pending} RETURNING id"
        ),
        ApprovalShape::Status {
            column,
            approved_at_column,
        } => format!(
            "UPDATE {table} SET {column} = 'approved', {approved_at_column} = $2::text::timestamptz \
             WHERE id = ANY($1) AND {pending} RETURNING id"
        ),
    }
}

impl RecordStore for PgRecordStore {
    fn insert_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let role = user.role.as_str();
        let row = self.conn()?.query_one(
            "INSERT INTO users (member_id, username, email, first_name, last_name, role, is_staff) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
            &[
                &user.member_id,
                &user.username,
                &user.email,
                &user.first_name,
                &user.last_name,
                &role,
                &user.is_staff,
            ],
        )?;
        let id: i64 = column(&row, "id")?;
        self.find_user(id)?
            .ok_or_else(|| StoreError::Other(format!("user {id} vanished after insert")))
    }

    fn find_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT id, member_id, username, email, first_name, last_name, role, is_active, \
             is_staff, avatar, {date_joined} AS date_joined FROM users WHERE id = $1",
            date_joined = utc_text("users", "date_joined")
        );
        self.conn()?
            .query_opt(&sql, &[&user_id])?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    fn count_users(&self) -> Result<u64, StoreError> {
        let row = self.conn()?.query_one("SELECT COUNT(*) AS total FROM users", &[])?;
        let total: i64 = column(&row, "total")?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    fn list(
        &self,
        descriptor: &RecordDescriptor,
        visibility: Visibility,
    ) -> Result<Vec<FinancialRecord>, StoreError> {
        self.select_rows(records::select_records(descriptor, visibility, None))?
            .iter()
            .map(|row| record_from_row(descriptor, row))
            .collect()
    }

    fn load(
        &self,
        descriptor: &RecordDescriptor,
        id: i64,
    ) -> Result<Option<FinancialRecord>, StoreError> {
        self.select_rows(records::select_records(descriptor, Visibility::All, Some(id)))?
            .first()
            .map(|row| record_from_row(descriptor, row))
            .transpose()
    }

    fn insert(
        &self,
        descriptor: &RecordDescriptor,
        record: &NewRecord,
    ) -> Result<FinancialRecord, StoreError> {
        let sql = insert_sql(descriptor);
        let amount = record.fields.amount().to_string();
        let date = record.fields.record_date().map(|d| d.to_string());
        let row = match &record.fields {
            RecordFields::Contribution {
                contribution_type,
                period,
                description,
                ..
            } => self.conn()?.query_one(
                sql,
                &[
                    &record.owner_id,
                    &record.created_by,
                    &amount,
                    contribution_type,
                    &date,
                    period,
                    description,
                    &record.evidence,
                    &record.approved,
                ],
            )?,
            RecordFields::Investment { description, .. } => self.conn()?.query_one(
                sql,
                &[&record.owner_id, &amount, &date, description, &record.evidence],
            )?,
            RecordFields::Loan {
                interest_rate,
                repayment_period,
                reason,
                ..
            } => {
                let interest_rate = interest_rate.to_string();
                self.conn()?.query_one(
                    sql,
                    &[
                        &record.owner_id,
                        &amount,
                        &interest_rate,
                        repayment_period,
                        reason,
                        &record.evidence,
                    ],
                )?
            }
            RecordFields::Withdrawal { reason, .. } => self.conn()?.query_one(
                sql,
                &[&record.owner_id, &amount, &date, reason, &record.evidence],
            )?,
        };
        let id: i64 = column(&row, "id")?;
        log::debug!("inserted {} {id}", descriptor.kind);
        self.load(descriptor, id)?
            .ok_or_else(|| StoreError::Other(format!("{} {id} vanished after insert", descriptor.kind)))
    }

    fn update_pending(
        &self,
        descriptor: &RecordDescriptor,
        id: i64,
        update: &RecordUpdate,
    ) -> Result<Option<FinancialRecord>, StoreError> {
        let sql = update_sql(descriptor);
        let amount = update.fields.amount().to_string();
        let date = update.fields.record_date().map(|d| d.to_string());
        let row = match &update.fields {
            RecordFields::Contribution {
                contribution_type,
                period,
                description,
                ..
            } => self.conn()?.query_opt(
                &sql,
                &[
                    &id,
                    &amount,
                    contribution_type,
                    &date,
                    period,
                    description,
                    &update.evidence,
                    &update.approve,
                ],
            )?,
            RecordFields::Investment { description, .. } => self.conn()?.query_opt(
                &sql,
                &[&id, &amount, &date, description, &update.evidence],
            )?,
            RecordFields::Loan {
                interest_rate,
                repayment_period,
                reason,
                ..
            } => {
                let interest_rate = interest_rate.to_string();
                self.conn()?.query_opt(
                    &sql,
                    &[
                        &id,
                        &amount,
                        &interest_rate,
                        repayment_period,
                        reason,
                        &update.evidence,
                    ],
                )?
            }
            RecordFields::Withdrawal { reason, .. } => self.conn()?.query_opt(
                &sql,
                &[&id, &amount, &date, reason, &update.evidence],
            )?,
        };
        match row {
            Some(_) => self.load(descriptor, id),
            None => Ok(None),
        }
    }

    fn delete_pending(&self, descriptor: &RecordDescriptor, id: i64) -> Result<bool, StoreError> {
        let sql = format!(
            "DELETE FROM {table} WHERE id = $1 AND {pending}",
            table = descriptor.table,
            pending = records::pending_predicate(descriptor, descriptor.table)
        );
        Ok(self.conn()?.execute(&sql, &[&id])? > 0)
    }

    fn approve_pending(
        &self,
        descriptor: &RecordDescriptor,
        ids: &[i64],
        signatory_id: i64,
        signed_at: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError> {
        let requested: Vec<i64> = ids.to_vec();
        let signed_at_text = signed_at.to_rfc3339();
        let approve = approve_sql(descriptor);

        let conn = self.conn()?;
        conn.transaction(|tx| {
            let rows = if descriptor.uses_status() {
                tx.query_all(&approve, &[&requested, &signed_at_text])?
            } else {
                tx.query_all(&approve, &[&requested])?
            };
            let mut approved = rows
                .iter()
                .map(|row| column::<i64>(row, "id"))
                .collect::<Result<Vec<i64>, StoreError>>()?;
            approved.sort_unstable();

            if let Some(signatures) = descriptor.signatures {
                if !approved.is_empty() {
                    let sql = format!(
                        "INSERT INTO {table} ({record_column}, signatory_id, signed_at) \
                         SELECT unnest($1::bigint[]), $2::bigint, $3::text::timestamptz",
                        table = signatures.table,
                        record_column = signatures.record_column
                    );
                    let inserted = tx.execute(&sql, &[&approved, &signatory_id, &signed_at_text])?;
                    if inserted != approved.len() as u64 {
                        return Err(StoreError::QueryError(format!(
                            "expected {} signature rows, inserted {inserted}",
                            approved.len()
                        )));
                    }
                }
            }
            Ok(approved)
        })
    }

    fn signatures(&self, descriptor: &RecordDescriptor) -> Result<Vec<SignatureEntry>, StoreError> {
        let Some(signatures) = descriptor.signatures else {
            return Ok(Vec::new());
        };
        let sql = records::select_signatures(descriptor, &signatures);
        self.conn()?
            .query_all(&sql, &[])?
            .iter()
            .map(|row| signature_from_row(descriptor, row))
            .collect()
    }

    fn count_pending(
        &self,
        descriptor: &RecordDescriptor,
        visibility: Visibility,
    ) -> Result<u64, StoreError> {
        let rows = self.select_rows(records::count_pending(descriptor, visibility))?;
        let total: i64 = match rows.first() {
            Some(row) => column(row, "total")?,
            None => 0,
        };
        Ok(u64::try_from(total).unwrap_or_default())
    }

    fn sum_amount(
        &self,
        descriptor: &RecordDescriptor,
        visibility: Visibility,
    ) -> Result<Decimal, StoreError> {
        let rows = self.select_rows(records::sum_amount(descriptor, visibility))?;
        match rows.first() {
            Some(row) => parse_decimal(&column::<String>(row, "total")?),
            None => Ok(Decimal::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::descriptor::{CONTRIBUTIONS, INVESTMENTS, LOANS, WITHDRAWALS};

    #[test]
    fn test_approve_sql_is_conditional() {
        let sql = approve_sql(&WITHDRAWALS);
        assert!(sql.contains("id = ANY($1)"));
        assert!(sql.contains("withdrawals.approved = FALSE"));
        assert!(sql.ends_with("RETURNING id"));

        let sql = approve_sql(&LOANS);
        assert!(sql.contains("status = 'approved'"));
        assert!(sql.contains("approved_at = $2::text::timestamptz"));
        assert!(sql.contains("loans.status = 'pending'"));
    }

    #[test]
    fn test_update_sql_guards_pre_approval() {
        for descriptor in [&CONTRIBUTIONS, &INVESTMENTS, &LOANS, &WITHDRAWALS] {
            let sql = update_sql(descriptor);
            assert!(sql.contains("WHERE id = $1 AND"), "{sql}");
            assert!(sql.contains("COALESCE("), "{sql}");
        }
        assert!(!update_sql(&WITHDRAWALS).contains("approved = approved OR"));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_decimal("500.00").expect("decimal"), Decimal::new(50000, 2));
        assert!(parse_decimal("five").is_err());
        assert_eq!(
            parse_date("2024-03-09").expect("date"),
            NaiveDate::from_ymd_opt(2024, 3, 9).expect("date")
        );
        let ts = parse_timestamp("2024-03-09T10:15:00.123456Z").expect("timestamp");
        assert_eq!(ts.timestamp(), 1_709_979_300);
    }
}
