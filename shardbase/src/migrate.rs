//! Physical shard table creation
//!
//! A DDL template is written once against the logical table name and
//! rewritten for every physical shard. Stores that can execute DDL
//! implement [`TableCreator`].

use std::sync::Arc;

use regex::Regex;

use crate::data::Value;
use crate::sharding::{shard_tables, ShardingStrategy, TimeRange};
use crate::store::StoreResult;
use crate::{Result, ShardError};

/// Store capability to create physical tables
pub trait TableCreator {
    /// Execute a `CREATE TABLE` statement for `table`
    fn create_table(&self, table: &str, ddl: &str) -> StoreResult<()>;

    fn table_exists(&self, table: &str) -> StoreResult<bool>;
}

impl<C: TableCreator + ?Sized> TableCreator for Arc<C> {
    fn create_table(&self, table: &str, ddl: &str) -> StoreResult<()> {
        (**self).create_table(table, ddl)
    }

    fn table_exists(&self, table: &str) -> StoreResult<bool> {
        (**self).table_exists(table)
    }
}

/// Options for [`create_all_tables`]
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Leave existing tables alone instead of failing
    pub skip_if_exists: bool,
    /// Buckets to create for time strategies; defaults to the last year
    pub window: Option<TimeRange>,
}

impl MigrateOptions {
    pub fn skip_existing() -> Self {
        Self {
            skip_if_exists: true,
            window: None,
        }
    }

    pub fn window(mut self, window: TimeRange) -> Self {
        self.window = Some(window);
        self
    }
}

/// Rewrite whole-word occurrences of `base` in `template` to `table`
pub fn shard_ddl(template: &str, base: &str, table: &str) -> String {
    match Regex::new(&format!(r"\b{}\b", regex::escape(base))) {
        Ok(re) => re.replace_all(template, regex::NoExpand(table)).into_owned(),
        Err(_) => template.replace(base, table),
    }
}

/// `(table, ddl)` for every shard table of `strategy`
pub fn generate_shard_ddl(
    strategy: &dyn ShardingStrategy,
    template: &str,
    window: Option<&TimeRange>,
) -> Vec<(String, String)> {
    let base = strategy.base_table_name();
    shard_tables(strategy, window)
        .into_iter()
        .map(|table| {
            let ddl = shard_ddl(template, base, &table);
            (table, ddl)
        })
        .collect()
}

/// Turn `CREATE TABLE` into `CREATE TABLE IF NOT EXISTS`
pub fn ensure_if_not_exists(ddl: &str) -> String {
    let trimmed = ddl.trim();
    let upper = trimmed.to_uppercase();
    if upper.contains("IF NOT EXISTS") || !upper.starts_with("CREATE TABLE") {
        return trimmed.to_string();
    }
    format!("CREATE TABLE IF NOT EXISTS{}", &trimmed["CREATE TABLE".len()..])
}

/// Create every shard table of `strategy`, returning how many were created
pub fn create_all_tables<C>(
    creator: &C,
    strategy: &dyn ShardingStrategy,
    template: &str,
    options: &MigrateOptions,
) -> Result<usize>
where
    C: TableCreator + ?Sized,
{
    let statements = generate_shard_ddl(strategy, template, options.window.as_ref());
    if statements.is_empty() {
        return Err(ShardError::NoTables(strategy.base_table_name().to_string()));
    }

    let mut created = 0;
    for (table, ddl) in statements {
        if options.skip_if_exists && creator.table_exists(&table).map_err(|e| ShardError::store(table.as_str(), e))? {
            log::debug!("table {} exists, skipping", table);
            continue;
        }
        let ddl = if options.skip_if_exists { ensure_if_not_exists(&ddl) } else { ddl };
        match creator.create_table(&table, &ddl) {
            Ok(()) => created += 1,
            Err(crate::store::StoreError::TableExists(_)) if options.skip_if_exists => {}
            Err(e) => return Err(ShardError::store(table.as_str(), e)),
        }
    }
    log::info!("created {} shard tables for {}", created, strategy.base_table_name());
    Ok(created)
}

/// Create `table` from the logical template unless it exists.
///
/// Returns whether the table was created.
pub fn ensure_table_named<C>(creator: &C, base: &str, table: &str, template: &str) -> Result<bool>
where
    C: TableCreator + ?Sized,
{
    if creator.table_exists(table).map_err(|e| ShardError::store(table, e))? {
        return Ok(false);
    }
    let ddl = ensure_if_not_exists(&shard_ddl(template, base, table));
    creator
        .create_table(table, &ddl)
        .map_err(|e| ShardError::store(table, e))?;
    log::info!("created shard table {}", table);
    Ok(true)
}

/// Make sure the shard table for `value` exists and return its name
pub fn ensure_table<C>(
    creator: &C,
    strategy: &dyn ShardingStrategy,
    value: &Value,
    template: &str,
) -> Result<String>
where
    C: TableCreator + ?Sized,
{
    let base = strategy.base_table_name();
    let table = strategy.try_table_name(base, value)?;
    ensure_table_named(creator, base, &table, template)?;
    Ok(table)
}
