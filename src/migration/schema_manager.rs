//! SchemaManager - schema operations available to migrations

use crate::executor::{StoreError, StoreExecutor};
use sea_query::{IndexCreateStatement, PostgresQueryBuilder, TableCreateStatement, TableDropStatement};
use std::cell::RefCell;

enum Target<'a> {
    Execute(&'a dyn StoreExecutor),
    Record(RefCell<Vec<String>>),
}

/// Runs DDL built with sea-query against an executor.
///
/// A recording manager executes nothing and keeps the generated SQL instead; the
/// migrator checksums a migration from that output.
pub struct SchemaManager<'a> {
    target: Target<'a>,
}

impl<'a> SchemaManager<'a> {
    pub fn new(executor: &'a dyn StoreExecutor) -> Self {
        Self {
            target: Target::Execute(executor),
        }
    }

    pub fn recording() -> SchemaManager<'static> {
        SchemaManager {
            target: Target::Record(RefCell::new(Vec::new())),
        }
    }

    /// Statements captured so far; empty for an executing manager.
    pub fn recorded(&self) -> Vec<String> {
        match &self.target {
            Target::Execute(_) => Vec::new(),
            Target::Record(statements) => statements.borrow().clone(),
        }
    }

    /// Create a table
    ///
    /// # Example
    /// ```rust,no_run
    /// use sea_query::{ColumnDef, Table};
    /// # fn run(manager: &coffer::migration::SchemaManager<'_>) -> Result<(), coffer::StoreError> {
    /// let table = Table::create()
    ///     .table("users")
    ///     .col(ColumnDef::new("id").big_integer().not_null().auto_increment().primary_key())
    ///     .to_owned();
    /// manager.create_table(table)
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the statement fails.
    pub fn create_table(&self, table: TableCreateStatement) -> Result<(), StoreError> {
        self.execute(&table.build(PostgresQueryBuilder))
    }

    /// # Errors
    ///
    /// Returns `StoreError` if the statement fails.
    pub fn drop_table(&self, table: TableDropStatement) -> Result<(), StoreError> {
        self.execute(&table.build(PostgresQueryBuilder))
    }

    /// # Errors
    ///
    /// Returns `StoreError` if the statement fails.
    pub fn create_index(&self, index: IndexCreateStatement) -> Result<(), StoreError> {
        self.execute(&index.build(PostgresQueryBuilder))
    }

    /// Raw DDL for what sea-query does not model (check constraints).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the statement fails.
    pub fn execute(&self, sql: &str) -> Result<(), StoreError> {
        match &self.target {
            Target::Execute(executor) => executor.execute(sql, &[]).map(|_| ()),
            Target::Record(statements) => {
                statements.borrow_mut().push(sql.to_string());
                Ok(())
            }
        }
    }
}
