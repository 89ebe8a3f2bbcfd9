//! Query filter and per-shard query description

use std::cmp::Ordering;

use crate::data::{Record, Value};
use super::sql::{quote_ident, render_column};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "<>",
            CompareOp::LessThan => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterEqual => ">=",
        }
    }
}

/// A filter condition
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Always true
    True,
    /// Always false
    False,
    /// Compare field to value
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// LIKE pattern match
    Like {
        field: String,
        pattern: String,
    },
    /// IN list
    In {
        field: String,
        values: Vec<Value>,
    },
    /// IS NULL
    IsNull {
        field: String,
    },
    /// AND combination
    And(Vec<Filter>),
    /// OR combination
    Or(Vec<Filter>),
    /// NOT
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::True
    }
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Compare {
            field: field.into(),
            op: CompareOp::Equal,
            value: value.into(),
        }
    }

    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Conjunction that drops `True` operands
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::True, f) | (f, Filter::True) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    /// Check if a record matches this filter.
    ///
    /// Comparisons against missing or null fields are false, as in SQL.
    pub fn matches(&self, row: &Record) -> bool {
        match self {
            Filter::True => true,
            Filter::False => false,
            Filter::Compare { field, op, value } => match row.get(field) {
                Some(row_value) => Self::compare_values(row_value, *op, value),
                None => false,
            },
            Filter::Like { field, pattern } => match row.get(field) {
                Some(Value::String(s)) => like_match(s, pattern),
                _ => false,
            },
            Filter::In { field, values } => match row.get(field) {
                Some(row_value) => values.iter().any(|v| row_value.loose_eq(v)),
                None => false,
            },
            Filter::IsNull { field } => row.get(field).map_or(true, Value::is_null),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
            Filter::Not(filter) => !filter.matches(row),
        }
    }

    fn compare_values(left: &Value, op: CompareOp, right: &Value) -> bool {
        if left.is_null() || right.is_null() {
            return false;
        }
        match left.compare(right) {
            Some(ord) => match op {
                CompareOp::Equal => ord == Ordering::Equal,
                CompareOp::NotEqual => ord != Ordering::Equal,
                CompareOp::LessThan => ord == Ordering::Less,
                CompareOp::LessEqual => ord != Ordering::Greater,
                CompareOp::GreaterThan => ord == Ordering::Greater,
                CompareOp::GreaterEqual => ord != Ordering::Less,
            },
            None => op == CompareOp::NotEqual,
        }
    }

    /// Render as a parameterised SQL condition, appending bound values to `params`
    pub fn to_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            Filter::True => "1 = 1".to_string(),
            Filter::False => "1 = 0".to_string(),
            Filter::Compare { field, op, value } => {
                params.push(value.clone());
                format!("{} {} ?", quote_ident(field), op.as_sql())
            }
            Filter::Like { field, pattern } => {
                params.push(Value::String(pattern.clone()));
                format!("{} LIKE ?", quote_ident(field))
            }
            Filter::In { field, values } => {
                if values.is_empty() {
                    return "1 = 0".to_string();
                }
                params.extend(values.iter().cloned());
                let marks = vec!["?"; values.len()].join(", ");
                format!("{} IN ({})", quote_ident(field), marks)
            }
            Filter::IsNull { field } => format!("{} IS NULL", quote_ident(field)),
            Filter::And(filters) => join_sql(filters, " AND ", params),
            Filter::Or(filters) => join_sql(filters, " OR ", params),
            Filter::Not(filter) => format!("NOT ({})", filter.to_sql(params)),
        }
    }
}

fn join_sql(filters: &[Filter], sep: &str, params: &mut Vec<Value>) -> String {
    if filters.is_empty() {
        return "1 = 1".to_string();
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|f| format!("({})", f.to_sql(params)))
        .collect();
    parts.join(sep)
}

/// SQL LIKE pattern matching
pub fn like_match(s: &str, pattern: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    match regex::Regex::new(&re) {
        Ok(re) => re.is_match(s),
        Err(_) => s == pattern,
    }
}

// ============================================================================
// Query
// ============================================================================

/// ORDER BY item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// What to run against one shard: filter, projection, ordering, paging
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub columns: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// AND another condition onto the filter
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(filter);
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::equals(field, value))
    }

    pub fn where_op(self, field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.filter(Filter::compare(field, op, value))
    }

    pub fn where_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(Filter::In {
            field: field.into(),
            values,
        })
    }

    pub fn where_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filter(Filter::Like {
            field: field.into(),
            pattern: pattern.into(),
        })
    }

    /// Projection; `"t.col AS alias"` renames
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Drop LIMIT and OFFSET; the paginator slices the merged rows itself
    pub fn without_paging(mut self) -> Query {
        self.limit = None;
        self.offset = None;
        self
    }

    /// Same filter without ordering or paging, for counting
    pub fn for_count(&self) -> Query {
        Query {
            filter: self.filter.clone(),
            ..Query::default()
        }
    }

    // ========================================================================
    // SQL rendering
    // ========================================================================

    /// `SELECT ... FROM <from> WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
    ///
    /// `from` is an already rendered FROM clause body.
    pub fn select_sql(&self, from: &str) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| render_column(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", projection, from);
        self.push_where(&mut sql, &mut params);
        if !self.order_by.is_empty() {
            let items: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    format!(
                        "{}{}",
                        quote_ident(&o.column),
                        if o.descending { " DESC" } else { "" }
                    )
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
        (sql, params)
    }

    /// `SELECT COUNT(*) FROM <from> WHERE ...`
    pub fn count_sql(&self, from: &str) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*) FROM {}", from);
        self.push_where(&mut sql, &mut params);
        (sql, params)
    }

    fn push_where(&self, sql: &mut String, params: &mut Vec<Value>) {
        if self.filter != Filter::True {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter.to_sql(params));
        }
    }

    // ========================================================================
    // In-memory evaluation
    // ========================================================================

    /// Sort rows by the ORDER BY list; nulls sort last
    pub fn sort(&self, rows: &mut [Record]) {
        self.sort_with(rows, |r| r);
    }

    /// Sort arbitrary items by the record `scope` returns for each
    pub fn sort_with<T, F>(&self, rows: &mut [T], scope: F)
    where
        F: Fn(&T) -> &Record,
    {
        if self.order_by.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            let (a, b) = (scope(a), scope(b));
            for o in &self.order_by {
                let cmp = compare_for_sort(a.get(&o.column), b.get(&o.column));
                let cmp = if o.descending { cmp.reverse() } else { cmp };
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            Ordering::Equal
        });
    }

    /// Apply OFFSET / LIMIT
    pub fn page<T>(&self, rows: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0) as usize;
        let iter = rows.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit as usize).collect(),
            None => iter.collect(),
        }
    }
}

fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(av), Some(bv)) => av.compare(bv).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Record {
        Record::new()
            .with("id", 5i64)
            .with("name", "alice")
            .with("score", 9.5f64)
            .with("note", Value::Null)
    }

    #[test]
    fn test_filter_matches() {
        let r = row();
        assert!(Filter::equals("id", 5i32).matches(&r));
        assert!(Filter::compare("score", CompareOp::GreaterThan, 9i64).matches(&r));
        assert!(!Filter::equals("missing", 1i64).matches(&r));
        assert!(!Filter::equals("note", Value::Null).matches(&r));
        assert!(Filter::IsNull { field: "note".into() }.matches(&r));
        assert!(Filter::In { field: "id".into(), values: vec![Value::Int64(1), Value::UInt8(5)] }.matches(&r));
        assert!(Filter::Not(Box::new(Filter::False)).matches(&r));
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("alice", "a%"));
        assert!(like_match("alice", "_lice"));
        assert!(!like_match("alice", "b%"));
        assert!(like_match("a.b", "a.b"));
        assert!(!like_match("axb", "a.b"));
    }

    #[test]
    fn test_and_flattens() {
        let f = Filter::True.and(Filter::equals("a", 1i64)).and(Filter::equals("b", 2i64));
        assert!(matches!(f, Filter::And(ref v) if v.len() == 2));
    }

    #[test]
    fn test_select_sql() {
        let q = Query::new()
            .where_eq("o.user_id", 7i64)
            .where_like("u.name", "a%")
            .select(["o.id", "u.name AS user_name"])
            .order_by_desc("o.id")
            .limit(10)
            .offset(20);
        let (sql, params) = q.select_sql("\"orders_1\" AS \"o\"");
        assert_eq!(
            sql,
            "SELECT \"o\".\"id\", \"u\".\"name\" AS \"user_name\" FROM \"orders_1\" AS \"o\" \
             WHERE (\"o\".\"user_id\" = ?) AND (\"u\".\"name\" LIKE ?) \
             ORDER BY \"o\".\"id\" DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(params, vec![Value::Int64(7), Value::from("a%")]);

        let (count, params) = q.count_sql("\"orders_1\"");
        assert!(count.starts_with("SELECT COUNT(*) FROM \"orders_1\" WHERE"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_sort_and_page() {
        let mut rows = vec![
            Record::new().with("k", 2i64),
            Record::new().with("k", Value::Null),
            Record::new().with("k", 1i64),
            Record::new().with("k", 3i64),
        ];
        let q = Query::new().order_by("k").offset(1).limit(2);
        q.sort(&mut rows);
        let page = q.page(rows);
        let keys: Vec<_> = page.iter().map(|r| r.get("k").cloned().unwrap()).collect();
        assert_eq!(keys, vec![Value::Int64(2), Value::Int64(3)]);
    }

    #[test]
    fn test_without_paging() {
        let q = Query::new().where_eq("k", 1i64).order_by("k").offset(5).limit(2).without_paging();
        assert_eq!((q.limit, q.offset), (None, None));
        assert_eq!(q.order_by.len(), 1);
        assert_eq!(q.filter, Query::new().where_eq("k", 1i64).filter);
    }
}
