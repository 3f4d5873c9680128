//! The embedded schema: users, the four record tables and their signature tables.

use super::{Migration, SchemaManager};
use crate::executor::StoreError;
use crate::record::RecordKind;
use sea_query::{
    ColumnDef, Expr, ForeignKey, ForeignKeyAction, Index, Table, TableCreateStatement,
};

/// Every embedded migration, oldest first.
pub fn all() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateUsers),
        Box::new(CreateRecordTables),
        Box::new(CreateSignatureTables),
    ]
}

fn id_column() -> ColumnDef {
    ColumnDef::new("id")
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

fn created_at_column() -> ColumnDef {
    ColumnDef::new("created_at")
        .timestamp_with_time_zone()
        .not_null()
        .default(Expr::current_timestamp())
        .to_owned()
}

fn owner_table(table: &str) -> TableCreateStatement {
    Table::create()
        .table(table.to_string())
        .if_not_exists()
        .col(id_column())
        .col(ColumnDef::new("user_id").big_integer().not_null())
        .col(ColumnDef::new("amount").decimal_len(12, 2).not_null())
        .foreign_key(
            ForeignKey::create()
                .name(format!("fk_{table}_user"))
                .from(table.to_string(), "user_id")
                .to("users", "id")
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_owned()
}

fn drop_tables(manager: &SchemaManager<'_>, tables: &[&str]) -> Result<(), StoreError> {
    for table in tables {
        manager.drop_table(Table::drop().table(table.to_string()).if_exists().to_owned())?;
    }
    Ok(())
}

pub struct CreateUsers;

impl Migration for CreateUsers {
    fn name(&self) -> &str {
        "create_users"
    }

    fn version(&self) -> i64 {
        20240101000100
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.create_table(
            Table::create()
                .table("users")
                .if_not_exists()
                .col(id_column())
                .col(ColumnDef::new("member_id").string_len(50).null().unique_key())
                .col(ColumnDef::new("username").string_len(150).not_null().unique_key())
                .col(ColumnDef::new("email").string_len(254).not_null())
                .col(ColumnDef::new("first_name").string_len(150).not_null().default(""))
                .col(ColumnDef::new("last_name").string_len(150).not_null().default(""))
                .col(ColumnDef::new("role").string_len(20).not_null().default("member"))
                .col(ColumnDef::new("is_active").boolean().not_null().default(true))
                .col(ColumnDef::new("is_staff").boolean().not_null().default(false))
                .col(ColumnDef::new("avatar").string_len(255).null())
                .col(
                    ColumnDef::new("date_joined")
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .to_owned(),
        )?;
        manager.execute(
            "ALTER TABLE users ADD CONSTRAINT users_role_check \
             CHECK (role IN ('member', 'admin', 'super_admin'))",
        )
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        drop_tables(manager, &["users"])
    }
}

pub struct CreateRecordTables;

impl Migration for CreateRecordTables {
    fn name(&self) -> &str {
        "create_record_tables"
    }

    fn version(&self) -> i64 {
        20240101000200
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.create_table(
            owner_table("contributions")
                .col(ColumnDef::new("created_by").big_integer().null())
                .col(ColumnDef::new("type").string_len(50).not_null())
                .col(ColumnDef::new("contribution_date").date().not_null())
                .col(ColumnDef::new("period").string_len(50).null())
                .col(ColumnDef::new("description").text().null())
                .col(ColumnDef::new("evidence").string_len(255).null())
                .col(ColumnDef::new("approved").boolean().not_null().default(false))
                .col(created_at_column())
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_contributions_created_by")
                        .from("contributions", "created_by")
                        .to("users", "id")
                        .on_delete(ForeignKeyAction::SetNull),
                )
                .to_owned(),
        )?;
        manager.create_table(
            owner_table("investments")
                .col(ColumnDef::new("investment_date").date().not_null())
                .col(ColumnDef::new("description").text().null())
                .col(ColumnDef::new("evidence").string_len(255).null())
                .col(ColumnDef::new("approved").boolean().not_null().default(false))
                .col(created_at_column())
                .to_owned(),
        )?;
        manager.create_table(
            owner_table("loans")
                .col(ColumnDef::new("interest_rate").decimal_len(5, 2).not_null())
                .col(ColumnDef::new("repayment_period").integer().not_null())
                .col(ColumnDef::new("reason").text().null())
                .col(ColumnDef::new("evidence").string_len(255).null())
                .col(ColumnDef::new("status").string_len(20).not_null().default("pending"))
                .col(ColumnDef::new("approved_at").timestamp_with_time_zone().null())
                .col(created_at_column())
                .to_owned(),
        )?;
        manager.execute(
            "ALTER TABLE loans ADD CONSTRAINT loans_status_check \
             CHECK (status IN ('pending', 'approved', 'rejected', 'repaid'))",
        )?;
        manager.create_table(
            owner_table("withdrawals")
                .col(ColumnDef::new("withdrawal_date").date().not_null())
                .col(ColumnDef::new("reason").text().null())
                .col(ColumnDef::new("evidence").string_len(255).null())
                .col(ColumnDef::new("approved").boolean().not_null().default(false))
                .col(created_at_column())
                .to_owned(),
        )?;

        for kind in RecordKind::ALL {
            let table = kind.plural();
            manager.execute(&format!(
                "ALTER TABLE {table} ADD CONSTRAINT {table}_amount_positive CHECK (amount > 0)"
            ))?;
            manager.create_index(
                Index::create()
                    .name(format!("idx_{table}_user_id"))
                    .table(table.to_string())
                    .col(Expr::col("user_id"))
                    .to_owned(),
            )?;
        }
        Ok(())
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        drop_tables(manager, &["withdrawals", "loans", "investments", "contributions"])
    }
}

pub struct CreateSignatureTables;

impl Migration for CreateSignatureTables {
    fn name(&self) -> &str {
        "create_signature_tables"
    }

    fn version(&self) -> i64 {
        20240101000300
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        for kind in RecordKind::ALL {
            let descriptor = kind.descriptor();
            let Some(signatures) = descriptor.signatures else {
                continue;
            };
            let (table, record_column) = (signatures.table, signatures.record_column);
            manager.create_table(
                Table::create()
                    .table(table.to_string())
                    .if_not_exists()
                    .col(id_column())
                    .col(ColumnDef::new(record_column.to_string()).big_integer().not_null())
                    .col(ColumnDef::new("signatory_id").big_integer().not_null())
                    .col(ColumnDef::new("signed_at").timestamp_with_time_zone().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name(format!("fk_{table}_record"))
                            .from(table.to_string(), record_column.to_string())
                            .to(descriptor.table.to_string(), "id")
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name(format!("fk_{table}_signatory"))
                            .from(table.to_string(), "signatory_id")
                            .to("users", "id")
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )?;
            manager.create_index(
                Index::create()
                    .name(format!("idx_{table}_{record_column}"))
                    .table(table.to_string())
                    .col(Expr::col(record_column.to_string()))
                    .to_owned(),
            )?;
        }
        Ok(())
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        drop_tables(
            manager,
            &["withdrawal_signatures", "loan_signatures", "investment_signatures"],
        )
    }
}
