//! SQLite store adapter
//!
//! Renders each request to parameterised SQL and runs it on a single
//! connection. SQLite reports failures as text only, so errors go through
//! [`StoreError::classify`].

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use super::{JoinStatement, ShardStore, StoreError, StoreResult};
use crate::data::{Record, Value};
use crate::migrate::TableCreator;
use crate::query::sql::quote_ident;
use crate::query::Query;

/// [`ShardStore`] over one SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Borrowed [`Value`] bound as a statement parameter
struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        let out = match self.0 {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Sql::Integer(i64::from(*b))),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Float32(f) => ToSqlOutput::Owned(Sql::Real(f64::from(*f))),
            Value::Float64(f) => ToSqlOutput::Owned(Sql::Real(*f)),
            Value::Timestamp(_) | Value::Date(_) => ToSqlOutput::Owned(Sql::Text(self.0.to_string_value())),
            other => match other.as_integer().map(i64::try_from) {
                Some(Ok(n)) => ToSqlOutput::Owned(Sql::Integer(n)),
                _ => ToSqlOutput::Owned(Sql::Text(other.to_string_value())),
            },
        };
        Ok(out)
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int64(n),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Binary(b.to_vec()),
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StoreError::Execution(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Execution(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run raw SQL (one or more statements)
    pub fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.conn
            .lock()
            .execute_batch(sql)
            .map_err(|e| StoreError::classify("", &e.to_string()))
    }

    fn fetch(&self, target: &str, sql: &str, params: &[Value]) -> StoreResult<Vec<Record>> {
        log::trace!("{}", sql);
        let conn = self.conn.lock();
        let classify = |e: rusqlite::Error| StoreError::classify(target, &e.to_string());

        let mut stmt = conn.prepare(sql).map_err(classify)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(Param)))
            .map_err(classify)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let mut record = Record::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(classify)?;
                // duplicate names from joins keep the first non-null value
                record.merge_column(name, from_sql(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn fetch_count(&self, target: &str, sql: &str, params: &[Value]) -> StoreResult<u64> {
        log::trace!("{}", sql);
        let conn = self.conn.lock();
        let n: i64 = conn
            .query_row(sql, params_from_iter(params.iter().map(Param)), |row| row.get(0))
            .map_err(|e| StoreError::classify(target, &e.to_string()))?;
        Ok(n.max(0) as u64)
    }
}

fn join_target(statement: &JoinStatement) -> String {
    statement
        .tables()
        .map(|t| t.table.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

impl ShardStore for SqliteStore {
    fn query(&self, table: &str, query: &Query) -> StoreResult<Vec<Record>> {
        let (sql, params) = query.select_sql(&quote_ident(table));
        self.fetch(table, &sql, &params)
    }

    fn count(&self, table: &str, query: &Query) -> StoreResult<u64> {
        let (sql, params) = query.count_sql(&quote_ident(table));
        self.fetch_count(table, &sql, &params)
    }

    fn join(&self, statement: &JoinStatement, query: &Query) -> StoreResult<Vec<Record>> {
        let (sql, params) = statement.select_sql(query);
        self.fetch(&join_target(statement), &sql, &params)
    }

    fn count_join(&self, statement: &JoinStatement, query: &Query) -> StoreResult<u64> {
        let (sql, params) = statement.count_sql(&query.for_count());
        self.fetch_count(&join_target(statement), &sql, &params)
    }

    fn insert(&self, table: &str, record: &Record) -> StoreResult<()> {
        if record.is_empty() {
            return Err(StoreError::Execution(format!("empty insert into {}", table)));
        }
        let columns: Vec<String> = record.column_names().map(quote_ident).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders
        );
        let values: Vec<&Value> = record.iter().map(|(_, v)| v).collect();
        self.conn
            .lock()
            .execute(&sql, params_from_iter(values.into_iter().map(Param)))
            .map_err(|e| StoreError::classify(table, &e.to_string()))?;
        Ok(())
    }
}

impl TableCreator for SqliteStore {
    fn create_table(&self, table: &str, ddl: &str) -> StoreResult<()> {
        self.conn
            .lock()
            .execute_batch(ddl)
            .map_err(|e| StoreError::classify(table, &e.to_string()))
    }

    fn table_exists(&self, table: &str) -> StoreResult<bool> {
        let found: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::classify(table, &e.to_string()))?;
        Ok(found.is_some())
    }
}
