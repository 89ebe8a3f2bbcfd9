//! Relational store collaborator
//!
//! The engine never talks to a database directly. It hands a physical table
//! name (or a join statement over physical tables) plus a [`Query`] to a
//! [`ShardStore`] and gets records back.
//!
//! Stores report a missing physical table as [`StoreError::TableNotFound`]
//! and a missing column as [`StoreError::ColumnNotFound`]; fan-out treats
//! those as "shard absent" and moves on.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{Record, Value};
use crate::query::sql::quote_ident;
use crate::query::Query;

/// Store-level error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    #[error("Column not found: {detail}")]
    ColumnNotFound { detail: String },

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn is_missing_table(&self) -> bool {
        matches!(self, StoreError::TableNotFound { .. })
    }

    pub fn is_missing_column(&self) -> bool {
        matches!(self, StoreError::ColumnNotFound { .. })
    }

    /// Classify a driver message that carries no structured error code.
    ///
    /// Recognises the wording MySQL, PostgreSQL and SQLite use for missing
    /// tables, missing columns and duplicate tables; everything else is an
    /// execution error.
    pub fn classify(target: &str, message: &str) -> StoreError {
        let lower = message.to_lowercase();
        if lower.contains("doesn't exist")
            || lower.contains("does not exist")
            || lower.contains("unknown table")
            || lower.contains("no such table")
            || (lower.contains("table") && lower.contains("not found"))
        {
            if lower.contains("column") {
                return StoreError::ColumnNotFound {
                    detail: message.to_string(),
                };
            }
            return StoreError::TableNotFound {
                table: target.to_string(),
            };
        }
        if lower.contains("unknown column") || lower.contains("no such column") {
            return StoreError::ColumnNotFound {
                detail: message.to_string(),
            };
        }
        if lower.contains("already exists") {
            return StoreError::TableExists(target.to_string());
        }
        StoreError::Execution(message.to_string())
    }
}

// ============================================================================
// Join statements
// ============================================================================

/// Physical table with an optional alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
        }
    }

    pub fn aliased(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: Some(alias.into()),
        }
    }

    /// Name columns of this table are qualified with
    pub fn scope_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub fn to_sql(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} AS {}", quote_ident(&self.table), quote_ident(alias)),
            None => quote_ident(&self.table),
        }
    }
}

/// Join type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

/// One `JOIN table ON condition` step
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: String,
}

/// A FROM clause over physical tables
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStatement {
    pub from: TableRef,
    pub joins: Vec<JoinClause>,
}

impl JoinStatement {
    pub fn new(from: TableRef) -> Self {
        Self {
            from,
            joins: Vec::new(),
        }
    }

    pub fn join(mut self, kind: JoinKind, table: TableRef, on: impl Into<String>) -> Self {
        self.joins.push(JoinClause {
            kind,
            table,
            on: on.into(),
        });
        self
    }

    /// Every physical table the statement touches
    pub fn tables(&self) -> impl Iterator<Item = &TableRef> {
        std::iter::once(&self.from).chain(self.joins.iter().map(|j| &j.table))
    }

    /// Rendered FROM clause body
    pub fn from_sql(&self) -> String {
        let mut sql = self.from.to_sql();
        for join in &self.joins {
            sql.push_str(&format!(" {} {} ON {}", join.kind.as_sql(), join.table.to_sql(), join.on));
        }
        sql
    }

    pub fn select_sql(&self, query: &Query) -> (String, Vec<Value>) {
        query.select_sql(&self.from_sql())
    }

    pub fn count_sql(&self, query: &Query) -> (String, Vec<Value>) {
        query.count_sql(&self.from_sql())
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Operations the engine needs from the relational store
pub trait ShardStore: Send + Sync {
    /// Run a filtered query against one physical table
    fn query(&self, table: &str, query: &Query) -> StoreResult<Vec<Record>>;

    /// Count rows of one physical table matching the filter
    fn count(&self, table: &str, query: &Query) -> StoreResult<u64>;

    /// Run a joined query
    fn join(&self, statement: &JoinStatement, query: &Query) -> StoreResult<Vec<Record>>;

    /// Count rows of a joined query
    fn count_join(&self, statement: &JoinStatement, query: &Query) -> StoreResult<u64>;

    /// Insert one row into one physical table
    fn insert(&self, table: &str, record: &Record) -> StoreResult<()>;
}

impl<S: ShardStore + ?Sized> ShardStore for std::sync::Arc<S> {
    fn query(&self, table: &str, query: &Query) -> StoreResult<Vec<Record>> {
        (**self).query(table, query)
    }

    fn count(&self, table: &str, query: &Query) -> StoreResult<u64> {
        (**self).count(table, query)
    }

    fn join(&self, statement: &JoinStatement, query: &Query) -> StoreResult<Vec<Record>> {
        (**self).join(statement, query)
    }

    fn count_join(&self, statement: &JoinStatement, query: &Query) -> StoreResult<u64> {
        (**self).count_join(statement, query)
    }

    fn insert(&self, table: &str, record: &Record) -> StoreResult<()> {
        (**self).insert(table, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert!(StoreError::classify("t_1", "Table 'db.t_1' doesn't exist").is_missing_table());
        assert!(StoreError::classify("t_1", "relation \"t_1\" does not exist").is_missing_table());
        assert!(StoreError::classify("t_1", "no such table: t_1").is_missing_table());
        assert!(StoreError::classify("t_1", "Unknown table 't_1'").is_missing_table());
        assert!(StoreError::classify("t_1", "no such column: o.x").is_missing_column());
        assert!(StoreError::classify("t_1", "Unknown column 'x' in 'on clause'").is_missing_column());
        assert!(StoreError::classify("t_1", "column \"x\" does not exist").is_missing_column());
        assert_eq!(
            StoreError::classify("t_1", "table t_1 already exists"),
            StoreError::TableExists("t_1".into())
        );
        assert!(matches!(
            StoreError::classify("t_1", "database is locked"),
            StoreError::Execution(_)
        ));
    }

    #[test]
    fn test_join_statement_sql() {
        let stmt = JoinStatement::new(TableRef::aliased("orders_1", "o"))
            .join(JoinKind::Left, TableRef::aliased("users_0", "u"), "o.user_id = u.id");
        assert_eq!(
            stmt.from_sql(),
            "\"orders_1\" AS \"o\" LEFT JOIN \"users_0\" AS \"u\" ON o.user_id = u.id"
        );
        let (sql, _) = stmt.count_sql(&Query::new());
        assert_eq!(sql, format!("SELECT COUNT(*) FROM {}", stmt.from_sql()));
        assert_eq!(stmt.tables().count(), 2);
    }
}
