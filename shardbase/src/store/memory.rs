//! In-memory store
//!
//! Holds physical tables as row vectors behind a `parking_lot::RwLock`.
//! Joins are nested loops over equality ON conditions (`a.x = b.y`, joined
//! with `AND`), which is all the sharded join paths generate.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use super::{JoinKind, JoinStatement, ShardStore, StoreError, StoreResult};
use crate::data::{Record, Value};
use crate::migrate::TableCreator;
use crate::query::sql::split_alias;
use crate::query::Query;

static AND_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+and\s+").unwrap());

static EQ_COND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\(?\s*(\w+)\.(\w+)\s*=\s*(\w+)\.(\w+)\s*\)?\s*$").unwrap()
});

#[derive(Debug, Default, Clone)]
struct MemoryTable {
    /// Known columns, from DDL or from inserted rows
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl MemoryTable {
    fn note_columns(&mut self, record: &Record) {
        for name in record.column_names() {
            if !self.columns.iter().any(|c| c == name) {
                self.columns.push(name.to_string());
            }
        }
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c == name)
    }
}

/// Thread-safe in-memory [`ShardStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

/// Parsed `left.col = right.col`
#[derive(Debug)]
struct EqCondition {
    left: (String, String),
    right: (String, String),
}

/// One joined row: per participant, its row or `None` when null-extended
type Combo<'a> = Vec<Option<&'a Record>>;

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table; no-op if it exists
    pub fn add_table(&self, name: &str) {
        self.tables.write().entry(name.to_string()).or_default();
    }

    /// Create an empty table with declared columns
    pub fn add_table_with_columns(&self, name: &str, columns: &[&str]) {
        let mut tables = self.tables.write();
        let table = tables.entry(name.to_string()).or_default();
        for c in columns {
            if !table.columns.iter().any(|k| k == c) {
                table.columns.push(c.to_string());
            }
        }
    }

    /// Create a table (if needed) and append rows
    pub fn load(&self, name: &str, rows: Vec<Record>) {
        let mut tables = self.tables.write();
        let table = tables.entry(name.to_string()).or_default();
        for row in rows {
            table.note_columns(&row);
            table.rows.push(row);
        }
    }

    pub fn drop_table(&self, name: &str) -> bool {
        self.tables.write().remove(name).is_some()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Physical table names, sorted
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, name: &str) -> Option<Vec<Record>> {
        self.tables.read().get(name).map(|t| t.rows.clone())
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.tables.read().get(name).map_or(0, |t| t.rows.len())
    }

    fn project(query: &Query, scope: &Record, default: Record) -> Record {
        if query.columns.is_empty() {
            return default;
        }
        let mut out = Record::with_capacity(query.columns.len());
        for item in &query.columns {
            let (source, alias) = split_alias(item);
            if source == "*" {
                for (name, value) in default.iter() {
                    out.insert(name, value.clone());
                }
                continue;
            }
            let short = source.rsplit('.').next().unwrap_or(source);
            let value = scope
                .get(source)
                .or_else(|| scope.get(short))
                .cloned()
                .unwrap_or(Value::Null);
            out.insert(alias.unwrap_or(short), value);
        }
        out
    }

    fn parse_conditions(on: &str) -> StoreResult<Vec<EqCondition>> {
        AND_SPLIT
            .split(on.trim())
            .map(|part| {
                let caps = EQ_COND.captures(part).ok_or_else(|| {
                    StoreError::Execution(format!("Unsupported join condition: {}", part.trim()))
                })?;
                Ok(EqCondition {
                    left: (caps[1].to_string(), caps[2].to_string()),
                    right: (caps[3].to_string(), caps[4].to_string()),
                })
            })
            .collect()
    }

    /// Run the join and produce `(scope, unqualified)` pairs
    fn join_rows(
        tables: &HashMap<String, MemoryTable>,
        statement: &JoinStatement,
        query: &Query,
    ) -> StoreResult<Vec<(Record, Record)>> {
        let participants: Vec<(&str, &MemoryTable)> = statement
            .tables()
            .map(|t| {
                tables
                    .get(&t.table)
                    .map(|mt| (t.scope_name(), mt))
                    .ok_or_else(|| StoreError::TableNotFound {
                        table: t.table.clone(),
                    })
            })
            .collect::<StoreResult<_>>()?;

        let mut conditions = Vec::with_capacity(statement.joins.len());
        for (step, clause) in statement.joins.iter().enumerate() {
            let conds = Self::parse_conditions(&clause.on)?;
            for cond in &conds {
                for (scope, col) in [&cond.left, &cond.right] {
                    let known = participants[..step + 2]
                        .iter()
                        .find(|(name, _)| *name == scope.as_str());
                    match known {
                        Some((_, table)) if table.has_column(col) => {}
                        _ => {
                            return Err(StoreError::ColumnNotFound {
                                detail: format!("{}.{} in join condition", scope, col),
                            })
                        }
                    }
                }
            }
            conditions.push(conds);
        }

        let mut combos: Vec<Combo<'_>> = participants[0].1.rows.iter().map(|r| vec![Some(r)]).collect();
        for (step, clause) in statement.joins.iter().enumerate() {
            let right = participants[step + 1].1;
            let conds = &conditions[step];
            let names = &participants[..step + 2];
            let holds = |combo: &Combo<'_>, candidate: Option<&Record>| {
                conds.iter().all(|c| {
                    let l = lookup(names, combo, candidate, &c.left);
                    let r = lookup(names, combo, candidate, &c.right);
                    match (l, r) {
                        (Some(l), Some(r)) => !l.is_null() && l.loose_eq(r),
                        _ => false,
                    }
                })
            };

            let mut next = Vec::new();
            match clause.kind {
                JoinKind::Inner | JoinKind::Left => {
                    for combo in &combos {
                        let mut matched = false;
                        for row in &right.rows {
                            if holds(combo, Some(row)) {
                                let mut joined = combo.clone();
                                joined.push(Some(row));
                                next.push(joined);
                                matched = true;
                            }
                        }
                        if !matched && clause.kind == JoinKind::Left {
                            let mut joined = combo.clone();
                            joined.push(None);
                            next.push(joined);
                        }
                    }
                }
                JoinKind::Right => {
                    for row in &right.rows {
                        let mut matched = false;
                        for combo in &combos {
                            if holds(combo, Some(row)) {
                                let mut joined = combo.clone();
                                joined.push(Some(row));
                                next.push(joined);
                                matched = true;
                            }
                        }
                        if !matched {
                            let mut joined: Combo<'_> = vec![None; step + 1];
                            joined.push(Some(row));
                            next.push(joined);
                        }
                    }
                }
            }
            combos = next;
        }

        let mut out = Vec::new();
        for combo in combos {
            let mut scope = Record::new();
            let mut flat = Record::new();
            for ((name, table), row) in participants.iter().zip(&combo) {
                match row {
                    Some(row) => {
                        for (col, value) in row.iter() {
                            scope.insert(format!("{}.{}", name, col), value.clone());
                            flat.merge_column(col, value.clone());
                        }
                    }
                    None => {
                        for col in &table.columns {
                            scope.insert(format!("{}.{}", name, col), Value::Null);
                            flat.merge_column(col, Value::Null);
                        }
                    }
                }
            }
            for (col, value) in flat.iter() {
                scope.merge_column(col, value.clone());
            }
            if query.filter.matches(&scope) {
                out.push((scope, flat));
            }
        }
        Ok(out)
    }
}

fn lookup<'a>(
    names: &[(&str, &MemoryTable)],
    combo: &[Option<&'a Record>],
    candidate: Option<&'a Record>,
    (scope, col): &(String, String),
) -> Option<&'a Value> {
    let idx = names.iter().position(|(name, _)| *name == scope.as_str())?;
    let row = if idx < combo.len() { combo[idx] } else { candidate };
    row.and_then(|r| r.get(col))
}

impl ShardStore for MemoryStore {
    fn query(&self, table: &str, query: &Query) -> StoreResult<Vec<Record>> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StoreError::TableNotFound {
            table: table.to_string(),
        })?;
        let mut rows: Vec<Record> = t
            .rows
            .iter()
            .filter(|r| query.filter.matches(r))
            .cloned()
            .collect();
        query.sort(&mut rows);
        Ok(query
            .page(rows)
            .into_iter()
            .map(|r| Self::project(query, &r, r.clone()))
            .collect())
    }

    fn count(&self, table: &str, query: &Query) -> StoreResult<u64> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StoreError::TableNotFound {
            table: table.to_string(),
        })?;
        Ok(t.rows.iter().filter(|r| query.filter.matches(r)).count() as u64)
    }

    fn join(&self, statement: &JoinStatement, query: &Query) -> StoreResult<Vec<Record>> {
        let tables = self.tables.read();
        let mut rows = Self::join_rows(&tables, statement, query)?;
        query.sort_with(&mut rows, |(scope, _)| scope);
        Ok(query
            .page(rows)
            .into_iter()
            .map(|(scope, flat)| Self::project(query, &scope, flat))
            .collect())
    }

    fn count_join(&self, statement: &JoinStatement, query: &Query) -> StoreResult<u64> {
        let tables = self.tables.read();
        Ok(Self::join_rows(&tables, statement, &query.for_count())?.len() as u64)
    }

    fn insert(&self, table: &str, record: &Record) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| StoreError::TableNotFound {
            table: table.to_string(),
        })?;
        t.note_columns(record);
        t.rows.push(record.clone());
        Ok(())
    }
}

impl TableCreator for MemoryStore {
    fn create_table(&self, table: &str, ddl: &str) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(table) {
            if ddl.to_uppercase().contains("IF NOT EXISTS") {
                return Ok(());
            }
            return Err(StoreError::TableExists(table.to_string()));
        }
        tables.insert(
            table.to_string(),
            MemoryTable {
                columns: ddl_columns(ddl),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn table_exists(&self, table: &str) -> StoreResult<bool> {
        Ok(self.has_table(table))
    }
}

/// Column names declared in a `CREATE TABLE` body
fn ddl_columns(ddl: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (ddl.find('('), ddl.rfind(')')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    let body = &ddl[open + 1..close];

    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut current = String::new();
    for c in body.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                current.push(c);
            }
            _ if quoted => current.push(c),
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);

    const CONSTRAINTS: &[&str] = &["PRIMARY", "UNIQUE", "KEY", "CONSTRAINT", "INDEX", "FOREIGN", "CHECK"];
    items
        .iter()
        .filter_map(|item| item.split_whitespace().next())
        .filter(|first| !CONSTRAINTS.contains(&first.to_uppercase().as_str()))
        .map(|first| first.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']').to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use crate::store::TableRef;

    fn store() -> MemoryStore {
        let s = MemoryStore::new();
        s.load(
            "users_0",
            vec![
                Record::new().with("id", 1i64).with("name", "ann"),
                Record::new().with("id", 2i64).with("name", "bob"),
            ],
        );
        s.load(
            "orders_0",
            vec![
                Record::new().with("id", 10i64).with("user_id", 1i64).with("amount", 5i64),
                Record::new().with("id", 11i64).with("user_id", 1i64).with("amount", 7i64),
                Record::new().with("id", 12i64).with("user_id", 3i64).with("amount", 9i64),
            ],
        );
        s
    }

    #[test]
    fn test_query_and_count() {
        let s = store();
        let q = Query::new().where_eq("user_id", 1i64).order_by_desc("amount");
        let rows = s.query("orders_0", &q).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("amount"), Some(&Value::Int64(7)));
        assert_eq!(s.count("orders_0", &q).unwrap(), 2);

        let err = s.query("orders_9", &q).unwrap_err();
        assert!(err.is_missing_table());
    }

    #[test]
    fn test_projection_with_alias() {
        let s = store();
        let rows = s
            .query("users_0", &Query::new().select(["name AS user_name"]).where_eq("id", 2i64))
            .unwrap();
        assert_eq!(rows, vec![Record::new().with("user_name", "bob")]);
    }

    #[test]
    fn test_inner_join() {
        let s = store();
        let stmt = JoinStatement::new(TableRef::aliased("orders_0", "o"))
            .join(JoinKind::Inner, TableRef::aliased("users_0", "u"), "o.user_id = u.id");
        let rows = s
            .join(&stmt, &Query::new().select(["o.id AS order_id", "u.name"]).order_by("o.id"))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("order_id"), Some(&Value::Int64(10)));
        assert_eq!(rows[1].get("name"), Some(&Value::from("ann")));
        assert_eq!(s.count_join(&stmt, &Query::new()).unwrap(), 2);
    }

    #[test]
    fn test_left_and_right_join() {
        let s = store();
        let left = JoinStatement::new(TableRef::aliased("orders_0", "o"))
            .join(JoinKind::Left, TableRef::aliased("users_0", "u"), "o.user_id = u.id");
        let rows = s.join(&left, &Query::new().filter(Filter::IsNull { field: "u.name".into() })).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("user_id"), Some(&Value::Int64(3)));

        let right = JoinStatement::new(TableRef::aliased("orders_0", "o"))
            .join(JoinKind::Right, TableRef::aliased("users_0", "u"), "o.user_id = u.id");
        assert_eq!(s.count_join(&right, &Query::new()).unwrap(), 3);
    }

    #[test]
    fn test_join_missing_table_and_column() {
        let s = store();
        let missing = JoinStatement::new(TableRef::aliased("orders_0", "o"))
            .join(JoinKind::Inner, TableRef::aliased("users_7", "u"), "o.user_id = u.id");
        assert!(s.join(&missing, &Query::new()).unwrap_err().is_missing_table());

        let bad_col = JoinStatement::new(TableRef::aliased("orders_0", "o"))
            .join(JoinKind::Inner, TableRef::aliased("users_0", "u"), "o.customer = u.id");
        assert!(s.join(&bad_col, &Query::new()).unwrap_err().is_missing_column());
    }

    #[test]
    fn test_create_table_from_ddl() {
        let s = MemoryStore::new();
        s.create_table(
            "orders_1",
            "CREATE TABLE \"orders_1\" (\"id\" BIGINT NOT NULL, \"note\" TEXT DEFAULT 'a,b', PRIMARY KEY (\"id\"))",
        )
        .unwrap();
        assert!(s.table_exists("orders_1").unwrap());
        assert!(matches!(
            s.create_table("orders_1", "CREATE TABLE orders_1 (id BIGINT)"),
            Err(StoreError::TableExists(_))
        ));
        assert!(s.create_table("orders_1", "CREATE TABLE IF NOT EXISTS orders_1 (id BIGINT)").is_ok());
        assert_eq!(ddl_columns("CREATE TABLE t (id BIGINT, amount DECIMAL(10,2), KEY idx (id))"), vec!["id", "amount"]);
    }

    #[test]
    fn test_insert_requires_table() {
        let s = MemoryStore::new();
        assert!(s.insert("t_0", &Record::new().with("id", 1i64)).unwrap_err().is_missing_table());
        s.add_table("t_0");
        s.insert("t_0", &Record::new().with("id", 1i64)).unwrap();
        assert_eq!(s.row_count("t_0"), 1);
    }
}
