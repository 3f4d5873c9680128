//! SELECT statements for record listings, counts and the signature audit.
//!
//! Dates, timestamps and NUMERIC columns are rendered to text in SQL (ISO dates, RFC 3339
//! UTC timestamps, plain decimals) and parsed on the Rust side.

use crate::record::{ApprovalShape, RecordDescriptor, RecordKind, SignatureTable};
use crate::store::Visibility;
use sea_query::{Expr, ExprTrait, JoinType, Order, PostgresQueryBuilder, Query, Values};

/// Alias of the record table in every statement.
pub const RECORD: &str = "r";
/// Alias of the owning user.
pub const OWNER: &str = "o";
const SIGNATURE: &str = "s";
const SIGNATORY: &str = "sg";
const REQUESTER: &str = "rq";

/// Table-qualified equality used as a join condition.
pub fn join_condition(from_table: &str, from_column: &str, to_table: &str, to_column: &str) -> Expr {
    Expr::cust(format!("{from_table}.{from_column} = {to_table}.{to_column}"))
}

/// `timestamptz` column rendered as an RFC 3339 UTC string.
pub fn utc_text(table: &str, column: &str) -> String {
    format!(
        "to_char({table}.{column} AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS.US\"Z\"')"
    )
}

fn date_text(table: &str, column: &str) -> String {
    format!("to_char({table}.{column}, 'YYYY-MM-DD')")
}

fn numeric_text(table: &str, column: &str) -> String {
    format!("{table}.{column}::text")
}

/// SQL predicate that holds while a record is still pre-approval.
pub fn pending_predicate(descriptor: &RecordDescriptor, table: &str) -> String {
    match descriptor.approval {
        ApprovalShape::Flag { column } => format!("{table}.{column} = FALSE"),
        ApprovalShape::Status { column, .. } => format!("{table}.{column} = 'pending'"),
    }
}

/// Selected expressions and their output names for one record row.
fn record_columns(descriptor: &RecordDescriptor) -> Vec<(String, &'static str)> {
    let mut columns = vec![
        (format!("{RECORD}.id"), "id"),
        (format!("{RECORD}.user_id"), "user_id"),
        (numeric_text(RECORD, "amount"), "amount"),
        (format!("{RECORD}.{}", descriptor.note_column), "note"),
        (format!("{RECORD}.evidence"), "evidence"),
        (utc_text(RECORD, "created_at"), "created_at"),
    ];
    if let Some(date_column) = descriptor.date_column {
        columns.push((date_text(RECORD, date_column), "record_date"));
    }
    match descriptor.approval {
        ApprovalShape::Flag { column } => columns.push((format!("{RECORD}.{column}"), "approved")),
        ApprovalShape::Status {
            column,
            approved_at_column,
        } => {
            columns.push((format!("{RECORD}.{column}"), "status"));
            columns.push((utc_text(RECORD, approved_at_column), "approved_at"));
        }
    }
    match descriptor.kind {
        RecordKind::Contribution => {
            columns.push((format!("{RECORD}.type"), "contribution_type"));
            columns.push((format!("{RECORD}.period"), "period"));
            columns.push((format!("{RECORD}.created_by"), "created_by"));
        }
        RecordKind::Loan => {
            columns.push((numeric_text(RECORD, "interest_rate"), "interest_rate"));
            columns.push((format!("{RECORD}.repayment_period"), "repayment_period"));
        }
        RecordKind::Investment | RecordKind::Withdrawal => {}
    }
    columns.push((format!("{OWNER}.member_id"), "owner_member_id"));
    columns.push((format!("{OWNER}.first_name"), "owner_first_name"));
    columns.push((format!("{OWNER}.last_name"), "owner_last_name"));
    columns
}

/// Records of one kind joined with their owner, newest first.
///
/// `id` narrows the result to a single record.
pub fn select_records(
    descriptor: &RecordDescriptor,
    visibility: Visibility,
    id: Option<i64>,
) -> (String, Values) {
    let mut query = Query::select();
    for (expr, alias) in record_columns(descriptor) {
        query.expr_as(Expr::cust(expr), alias);
    }
    query.from_as(descriptor.table, RECORD).join_as(
        JoinType::InnerJoin,
        "users",
        OWNER,
        join_condition(RECORD, "user_id", OWNER, "id"),
    );

    if let Visibility::Owner(owner_id) = visibility {
        query.and_where(Expr::col((RECORD, "user_id")).eq(owner_id));
    }
    if let Some(id) = id {
        query.and_where(Expr::col((RECORD, "id")).eq(id));
    }

    query
        .order_by((RECORD, descriptor.order_column), Order::Desc)
        .order_by((RECORD, "id"), Order::Desc);
    query.build(PostgresQueryBuilder)
}

/// Number of pre-approval records visible under `visibility`.
pub fn count_pending(descriptor: &RecordDescriptor, visibility: Visibility) -> (String, Values) {
    let mut query = Query::select();
    query
        .expr_as(Expr::cust("COUNT(*)"), "total")
        .from_as(descriptor.table, RECORD)
        .and_where(Expr::cust(pending_predicate(descriptor, RECORD)));
    if let Visibility::Owner(owner_id) = visibility {
        query.and_where(Expr::col((RECORD, "user_id")).eq(owner_id));
    }
    query.build(PostgresQueryBuilder)
}

/// Sum of `amount` across visible records, as text (`0` when none).
pub fn sum_amount(descriptor: &RecordDescriptor, visibility: Visibility) -> (String, Values) {
    let mut query = Query::select();
    query
        .expr_as(
            Expr::cust(format!("COALESCE(SUM({RECORD}.amount), 0)::text")),
            "total",
        )
        .from_as(descriptor.table, RECORD);
    if let Visibility::Owner(owner_id) = visibility {
        query.and_where(Expr::col((RECORD, "user_id")).eq(owner_id));
    }
    query.build(PostgresQueryBuilder)
}

/// Signature rows joined with the signed record, its signatory and its requester,
/// most recent signature first.
pub fn select_signatures(descriptor: &RecordDescriptor, signatures: &SignatureTable) -> String {
    let mut columns = vec![
        (format!("{SIGNATURE}.id"), "id"),
        (format!("{SIGNATURE}.{}", signatures.record_column), "record_id"),
        (format!("{SIGNATURE}.signatory_id"), "signatory_id"),
        (utc_text(SIGNATURE, "signed_at"), "signed_at"),
        (numeric_text(RECORD, "amount"), "amount"),
        (format!("{RECORD}.{}", descriptor.note_column), "note"),
        (format!("{RECORD}.user_id"), "requester_id"),
        (format!("{SIGNATORY}.first_name"), "signatory_first_name"),
        (format!("{SIGNATORY}.last_name"), "signatory_last_name"),
        (format!("{REQUESTER}.first_name"), "requester_first_name"),
        (format!("{REQUESTER}.last_name"), "requester_last_name"),
    ];
    if let Some(date_column) = descriptor.date_column {
        columns.push((date_text(RECORD, date_column), "record_date"));
    }
    if descriptor.kind == RecordKind::Loan {
        columns.push((numeric_text(RECORD, "interest_rate"), "interest_rate"));
        columns.push((format!("{RECORD}.repayment_period"), "repayment_period"));
    }

    let mut query = Query::select();
    for (expr, alias) in columns {
        query.expr_as(Expr::cust(expr), alias);
    }
    query
        .from_as(signatures.table, SIGNATURE)
        .join_as(
            JoinType::InnerJoin,
            descriptor.table,
            RECORD,
            join_condition(SIGNATURE, signatures.record_column, RECORD, "id"),
        )
        .join_as(
            JoinType::InnerJoin,
            "users",
            SIGNATORY,
            join_condition(SIGNATURE, "signatory_id", SIGNATORY, "id"),
        )
        .join_as(
            JoinType::InnerJoin,
            "users",
            REQUESTER,
            join_condition(RECORD, "user_id", REQUESTER, "id"),
        )
        .order_by((SIGNATURE, "signed_at"), Order::Desc)
        .order_by((SIGNATURE, "id"), Order::Desc);
    let (sql, _) = query.build(PostgresQueryBuilder);
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::descriptor::{CONTRIBUTIONS, LOANS, WITHDRAWALS};

    #[test]
    fn test_member_listing_filters_by_owner() {
        let (sql, values) = select_records(&WITHDRAWALS, Visibility::Owner(42), None);
        assert!(sql.contains("\"withdrawals\""), "{sql}");
        assert!(sql.contains("\"user_id\""), "{sql}");
        assert!(sql.contains("DESC"), "{sql}");
        assert_eq!(values.iter().count(), 1);
    }

    #[test]
    fn test_privileged_listing_has_no_owner_filter() {
        let (sql, values) = select_records(&WITHDRAWALS, Visibility::All, None);
        assert!(!sql.contains("WHERE"), "{sql}");
        assert_eq!(values.iter().count(), 0);
    }

    #[test]
    fn test_loan_listing_orders_by_submission_time() {
        let (sql, _) = select_records(&LOANS, Visibility::All, Some(3));
        assert!(sql.contains("\"created_at\" DESC"), "{sql}");
        assert!(sql.contains("r.status"), "{sql}");
        assert!(sql.contains("interest_rate"), "{sql}");
    }

    #[test]
    fn test_contribution_columns() {
        let (sql, _) = select_records(&CONTRIBUTIONS, Visibility::All, None);
        assert!(sql.contains("r.type"), "{sql}");
        assert!(sql.contains("r.created_by"), "{sql}");
        assert!(sql.contains("r.approved"), "{sql}");
    }

    #[test]
    fn test_pending_predicates() {
        assert_eq!(pending_predicate(&WITHDRAWALS, "r"), "r.approved = FALSE");
        assert_eq!(pending_predicate(&LOANS, "loans"), "loans.status = 'pending'");
    }

    #[test]
    fn test_signature_audit_joins_both_users() {
        let signatures = LOANS.signatures.expect("loan signatures");
        let sql = select_signatures(&LOANS, &signatures);
        assert!(sql.contains("\"loan_signatures\""), "{sql}");
        assert!(sql.contains("s.loan_id = r.id"), "{sql}");
        assert!(sql.contains("s.signatory_id = sg.id"), "{sql}");
        assert!(sql.contains("r.user_id = rq.id"), "{sql}");
        assert!(sql.contains("\"signed_at\" DESC"), "{sql}");
    }
}
