//! Cross-shard joins
//!
//! ```text
//!   orders_0 ─┐            ┌─ users_0
//!   orders_1 ─┤  tuples    ├─ users_1        one JOIN per tuple,
//!   orders_2 ─┼──────────▶ ├─ users_2   ──▶  rows appended, then
//!   orders_3 ─┘  (4 × 4)   └─ users_3        deduplicated
//! ```
//!
//! The brute-force paths visit every combination of shard tables, so most
//! tuples return nothing and matching tuples may repeat logical rows. When
//! the routing key is known, [`cross_table_multi_join_optimized`] resolves
//! one table per participant and runs a single statement instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::{Captures, Regex};

use super::dedup::{deduplicate, default_dedup_fields};
use super::Query;
use crate::data::{Record, Value};
use crate::sharding::{shard_tables, ShardingStrategy, TimeRange};
use crate::store::{JoinKind, JoinStatement, ShardStore, StoreError, TableRef};
use crate::{Result, ShardError};

// ============================================================================
// Configuration
// ============================================================================

/// One participant of a multi-way join
#[derive(Clone)]
pub struct JoinInfo {
    pub strategy: Arc<dyn ShardingStrategy>,
    pub kind: JoinKind,
    /// ON condition written against logical table names
    pub on: String,
    pub alias: Option<String>,
}

impl JoinInfo {
    /// The FROM side of a join; kind and condition are unused
    pub fn main(strategy: Arc<dyn ShardingStrategy>) -> Self {
        Self {
            strategy,
            kind: JoinKind::Inner,
            on: String::new(),
            alias: None,
        }
    }

    pub fn new(strategy: Arc<dyn ShardingStrategy>, kind: JoinKind, on: impl Into<String>) -> Self {
        Self {
            strategy,
            kind,
            on: on.into(),
            alias: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn base_table(&self) -> &str {
        self.strategy.base_table_name()
    }

    /// Alias the physical table gets in the statement (logical name by default)
    pub fn scope_name(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.base_table())
    }
}

impl fmt::Debug for JoinInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinInfo")
            .field("table", &self.base_table())
            .field("strategy", &self.strategy.name())
            .field("kind", &self.kind)
            .field("on", &self.on)
            .field("alias", &self.alias)
            .finish()
    }
}

/// Main table, joined tables, per-table time windows and dedup groups
#[derive(Debug, Clone)]
pub struct MultiJoinConfig {
    pub main: JoinInfo,
    pub joins: Vec<JoinInfo>,
    /// Time window per logical table name
    pub time_ranges: HashMap<String, TimeRange>,
    /// Dedup field groups, most specific first; empty means the defaults
    pub dedup_fields: Vec<Vec<String>>,
}

impl MultiJoinConfig {
    pub fn new(main: JoinInfo) -> Self {
        Self {
            main,
            joins: Vec::new(),
            time_ranges: HashMap::new(),
            dedup_fields: Vec::new(),
        }
    }

    pub fn join(mut self, info: JoinInfo) -> Self {
        self.joins.push(info);
        self
    }

    pub fn time_range(mut self, base: impl Into<String>, range: TimeRange) -> Self {
        self.time_ranges.insert(base.into(), range);
        self
    }

    pub fn dedup_fields<I, G, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dedup_fields = groups
            .into_iter()
            .map(|g| g.into_iter().map(Into::into).collect())
            .collect();
        self
    }

    /// Main table first, then joins in order
    pub fn participants(&self) -> impl Iterator<Item = &JoinInfo> {
        std::iter::once(&self.main).chain(self.joins.iter())
    }

    fn effective_dedup_fields(&self) -> Vec<Vec<String>> {
        if self.dedup_fields.is_empty() {
            default_dedup_fields()
        } else {
            self.dedup_fields.clone()
        }
    }

    /// `(logical name, alias)` for every participant
    fn alias_map(&self) -> Vec<(String, String)> {
        self.participants()
            .map(|p| (p.base_table().to_string(), p.scope_name().to_string()))
            .collect()
    }

    /// ON conditions with logical prefixes replaced by aliases
    fn rewritten_conditions(&self) -> Vec<String> {
        let aliases = self.alias_map();
        self.joins
            .iter()
            .map(|j| rewrite_on_condition(&j.on, &aliases))
            .collect()
    }

    /// Apply one window to every time-sharded participant
    fn with_window(&self, start: &Value, end: &Value) -> Result<MultiJoinConfig> {
        let mut config = self.clone();
        for p in self.participants() {
            if let Some(time) = p.strategy.as_time() {
                let range = time.parse_time_range(start, end)?;
                config.time_ranges.insert(p.base_table().to_string(), range);
            }
        }
        Ok(config)
    }
}

/// Known routing key values for the optimized join
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinKeys(Vec<(String, Value)>);

impl JoinKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((field.into(), value.into()));
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key for a strategy: the one named like its shard key, else the first
    /// non-null value
    fn value_for(&self, strategy: &dyn ShardingStrategy) -> Option<&Value> {
        strategy
            .shard_key()
            .and_then(|k| self.get(k))
            .filter(|v| !v.is_null())
            .or_else(|| self.0.iter().map(|(_, v)| v).find(|v| !v.is_null()))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for JoinKeys {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        JoinKeys(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Every tuple picking one table from each list, first list outermost
pub fn table_combinations(lists: &[Vec<String>]) -> Vec<Vec<String>> {
    fn walk(lists: &[Vec<String>], current: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        match lists.split_first() {
            None => out.push(current.clone()),
            Some((head, rest)) => {
                for table in head {
                    current.push(table.clone());
                    walk(rest, current, out);
                    current.pop();
                }
            }
        }
    }

    if lists.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    walk(lists, &mut Vec::with_capacity(lists.len()), &mut out);
    out
}

/// Replace `base.` prefixes with `alias.` for each `(base, alias)` pair.
///
/// Only whole identifiers are replaced: `users.id` is rewritten for base
/// `users`, `power_users.id` and `x.users.id` are not.
pub fn rewrite_on_condition(on: &str, aliases: &[(String, String)]) -> String {
    let renames: Vec<&(String, String)> = aliases.iter().filter(|(b, a)| b != a).collect();
    if renames.is_empty() {
        return on.to_string();
    }
    let alternation = renames
        .iter()
        .map(|(b, _)| regex::escape(b))
        .collect::<Vec<_>>()
        .join("|");
    let re = match Regex::new(&format!(r"(^|[^\w.])({})\.", alternation)) {
        Ok(re) => re,
        Err(e) => {
            log::warn!("cannot rewrite join condition {:?}: {}", on, e);
            return on.to_string();
        }
    };
    re.replace_all(on, |caps: &Captures<'_>| {
        let base = &caps[2];
        let alias = renames
            .iter()
            .find(|(b, _)| b == base)
            .map_or(base, |(_, a)| a.as_str());
        format!("{}{}.", &caps[1], alias)
    })
    .into_owned()
}

fn skippable(err: &StoreError) -> bool {
    err.is_missing_table() || err.is_missing_column()
}

fn tuple_label(tables: &[String]) -> String {
    tables.join(" × ")
}

/// `a × b × c` over the physical tables of a statement
pub(crate) fn statement_label(statement: &JoinStatement) -> String {
    statement.tables().map(|t| t.table.as_str()).collect::<Vec<_>>().join(" × ")
}

// ============================================================================
// Pairwise join
// ============================================================================

/// Join every shard of `left` with every shard of `right`.
///
/// Tables appear under their physical names and `on` is used verbatim, so
/// it must be written against physical names; tuples it does not fit are
/// skipped along with missing shards. Prefer [`cross_table_multi_join`],
/// which aliases tables to their logical names.
pub fn cross_table_join<F>(
    store: &dyn ShardStore,
    left: &dyn ShardingStrategy,
    right: &dyn ShardingStrategy,
    kind: JoinKind,
    on: &str,
    build: F,
) -> Result<Vec<Record>>
where
    F: Fn(Query) -> Query,
{
    let left_tables = non_empty(left, shard_tables(left, None))?;
    let right_tables = non_empty(right, shard_tables(right, None))?;
    let query = build(Query::new());

    let mut results = Vec::new();
    for l in &left_tables {
        for r in &right_tables {
            let statement = JoinStatement::new(TableRef::new(l.as_str())).join(kind, TableRef::new(r.as_str()), on);
            match store.join(&statement, &query) {
                Ok(rows) => results.extend(rows),
                Err(e) if skippable(&e) => log::debug!("skipping {} × {}: {}", l, r, e),
                Err(e) => return Err(ShardError::store(format!("{} × {}", l, r), e)),
            }
        }
    }
    Ok(results)
}

fn non_empty(strategy: &dyn ShardingStrategy, tables: Vec<String>) -> Result<Vec<String>> {
    if tables.is_empty() {
        Err(ShardError::NoTables(strategy.base_table_name().to_string()))
    } else {
        Ok(tables)
    }
}

// ============================================================================
// Multi-way join
// ============================================================================

/// Raw rows of every shard tuple, before deduplication
fn multi_join_rows<F>(store: &dyn ShardStore, config: &MultiJoinConfig, build: &F) -> Result<Vec<Record>>
where
    F: Fn(Query) -> Query,
{
    let lists = config
        .participants()
        .map(|p| {
            let strategy = p.strategy.as_ref();
            non_empty(strategy, shard_tables(strategy, config.time_ranges.get(p.base_table())))
        })
        .collect::<Result<Vec<_>>>()?;
    let conditions = config.rewritten_conditions();
    let query = build(Query::new());

    let tuples = table_combinations(&lists);
    log::debug!("multi-join over {} shard tuples", tuples.len());

    let mut results = Vec::new();
    for tuple in &tuples {
        let statement = aliased_statement(config, tuple, &conditions);
        match store.join(&statement, &query) {
            Ok(rows) => results.extend(rows),
            Err(e) if skippable(&e) => log::debug!("skipping {}: {}", tuple_label(tuple), e),
            Err(e) => return Err(ShardError::store(tuple_label(tuple), e)),
        }
    }
    Ok(results)
}

/// Statement for one tuple, every table aliased to its scope name
fn aliased_statement(config: &MultiJoinConfig, tables: &[String], conditions: &[String]) -> JoinStatement {
    let mut statement = JoinStatement::new(TableRef::aliased(tables[0].as_str(), config.main.scope_name()));
    for ((info, table), on) in config.joins.iter().zip(&tables[1..]).zip(conditions) {
        statement = statement.join(info.kind, TableRef::aliased(table.as_str(), info.scope_name()), on.as_str());
    }
    statement
}

/// Join every shard tuple and deduplicate the merged rows
pub fn cross_table_multi_join<F>(store: &dyn ShardStore, config: &MultiJoinConfig, build: F) -> Result<Vec<Record>>
where
    F: Fn(Query) -> Query,
{
    let rows = multi_join_rows(store, config, &build)?;
    Ok(deduplicate(rows, &config.effective_dedup_fields()))
}

/// Number of rows [`cross_table_multi_join`] returns
pub fn cross_table_multi_join_count<F>(store: &dyn ShardStore, config: &MultiJoinConfig, build: F) -> Result<u64>
where
    F: Fn(Query) -> Query,
{
    Ok(cross_table_multi_join(store, config, build)?.len() as u64)
}

/// [`cross_table_multi_join`] with `[start, end]` applied to every
/// time-sharded participant
pub fn cross_table_multi_join_with_time_range<F>(
    store: &dyn ShardStore,
    config: &MultiJoinConfig,
    build: F,
    start: &Value,
    end: &Value,
) -> Result<Vec<Record>>
where
    F: Fn(Query) -> Query,
{
    cross_table_multi_join(store, &config.with_window(start, end)?, build)
}

pub fn cross_table_multi_join_count_with_time_range<F>(
    store: &dyn ShardStore,
    config: &MultiJoinConfig,
    build: F,
    start: &Value,
    end: &Value,
) -> Result<u64>
where
    F: Fn(Query) -> Query,
{
    cross_table_multi_join_count(store, &config.with_window(start, end)?, build)
}

// ============================================================================
// Key-aware join
// ============================================================================

/// Resolve one physical table per participant from known key values
pub(crate) fn resolved_statement(config: &MultiJoinConfig, keys: &JoinKeys) -> Result<JoinStatement> {
    let tables = config
        .participants()
        .map(|p| {
            let value = keys.value_for(p.strategy.as_ref()).ok_or_else(|| ShardError::Unresolved {
                table: p.base_table().to_string(),
                reason: "no usable join key".to_string(),
            })?;
            p.strategy.try_table_name(p.base_table(), value)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(aliased_statement(config, &tables, &config.rewritten_conditions()))
}

/// Join the single shard tuple the keys resolve to.
///
/// Nothing is skipped or deduplicated: a missing table is an error.
pub fn cross_table_multi_join_optimized<F>(
    store: &dyn ShardStore,
    config: &MultiJoinConfig,
    keys: &JoinKeys,
    build: F,
) -> Result<Vec<Record>>
where
    F: Fn(Query) -> Query,
{
    let statement = resolved_statement(config, keys)?;
    let label = statement_label(&statement);
    log::debug!("optimized join on {}", label);
    store
        .join(&statement, &build(Query::new()))
        .map_err(|e| ShardError::store(label, e))
}
