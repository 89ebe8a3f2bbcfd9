//! Shard Router - Registry of strategies and entry point for routed I/O
//!
//! Handles:
//! - Write routing (record → one physical table), with optional auto-create
//! - Point reads on one physical table
//! - Fan-out reads, counts and pages over every shard of a table
//! - Multi-way joins using registered defaults

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use super::strategy::{table_name_for, ShardingStrategy};
use super::time::TimeRange;
use crate::config::{RouterConfig, ShardingManifest};
use crate::data::{Record, Value};
use crate::field::FieldSource;
use crate::migrate::{create_all_tables, ensure_table_named, MigrateOptions, TableCreator};
use crate::query::scan::{count_tables, query_tables};
use crate::query::{cross_table_multi_join, normalize, paginate_slice, MultiJoinConfig, Paginator, Query};
use crate::store::ShardStore;
use crate::{Result, ShardError};

// ============================================================================
// Routing Decision
// ============================================================================

/// Physical tables an operation touches
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    /// One resolved table
    SingleTable { table: String },
    /// Every table the strategy enumerates
    AllTables { tables: Vec<String> },
    /// Time buckets covering a window
    TimeWindow { tables: Vec<String>, window: TimeRange },
}

impl RoutingDecision {
    pub fn tables(&self) -> Vec<String> {
        match self {
            RoutingDecision::SingleTable { table } => vec![table.clone()],
            RoutingDecision::AllTables { tables } | RoutingDecision::TimeWindow { tables, .. } => {
                tables.clone()
            }
        }
    }

    pub fn is_single_table(&self) -> bool {
        matches!(self, RoutingDecision::SingleTable { .. })
    }

    pub fn is_scatter_gather(&self) -> bool {
        !self.is_single_table()
    }
}

// ============================================================================
// Shard Router
// ============================================================================

/// Routes writes and reads of logical tables to their physical shards
///
/// One strategy per logical table. Strategies may be registered at any
/// time; lookups take a read lock only.
pub struct ShardRouter<S: ShardStore> {
    store: Arc<S>,
    /// Logical table → strategy
    strategies: RwLock<HashMap<String, Arc<dyn ShardingStrategy>>>,
    /// Logical table → CREATE TABLE template
    templates: RwLock<HashMap<String, String>>,
    config: RouterConfig,
}

impl<S: ShardStore> ShardRouter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, RouterConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: RouterConfig) -> Self {
        Self {
            store,
            strategies: RwLock::new(HashMap::new()),
            templates: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Router with every table of a manifest registered.
    ///
    /// Tables that declare a schema also get a DDL template.
    pub fn from_manifest(store: Arc<S>, manifest: &ShardingManifest) -> Result<Self> {
        let router = Self::with_config(store, manifest.router.clone());
        for spec in &manifest.tables {
            router.register_strategy(spec.build()?);
            if let Some(schema) = spec.schema() {
                router.register_template(spec.table(), schema.create_sql(spec.table(), false));
            }
        }
        Ok(router)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register a strategy under its base table, replacing any previous one
    pub fn register_strategy(&self, strategy: Arc<dyn ShardingStrategy>) {
        let base = strategy.base_table_name().to_string();
        log::debug!("registered {} strategy for {}", strategy.name(), base);
        self.strategies.write().insert(base, strategy);
    }

    /// DDL template written against the logical table name
    pub fn register_template(&self, base: &str, ddl: impl Into<String>) {
        self.templates.write().insert(base.to_string(), ddl.into());
    }

    pub fn strategy(&self, base: &str) -> Result<Arc<dyn ShardingStrategy>> {
        self.strategies
            .read()
            .get(base)
            .cloned()
            .ok_or_else(|| ShardError::StrategyNotFound(base.to_string()))
    }

    /// Registered logical tables, sorted
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Physical table a record belongs in
    pub fn route_write(&self, base: &str, record: &dyn FieldSource) -> Result<RoutingDecision> {
        let strategy = self.strategy(base)?;
        let table = table_name_for(strategy.as_ref(), record)?;
        Ok(RoutingDecision::SingleTable { table })
    }

    /// Physical table for a known key value
    pub fn resolve_table(&self, base: &str, value: &Value) -> Result<String> {
        let strategy = self.strategy(base)?;
        strategy.try_table_name(base, value)
    }

    /// Tables an unbounded read fans out over
    pub fn route_scan(&self, base: &str) -> Result<RoutingDecision> {
        let strategy = self.strategy(base)?;
        Ok(match strategy.as_time() {
            Some(time) => {
                let window = self.config.lookback_window();
                RoutingDecision::TimeWindow {
                    tables: time.table_names_in_range(base, &window.start, &window.end),
                    window,
                }
            }
            None => RoutingDecision::AllTables {
                tables: strategy.all_table_names(base),
            },
        })
    }

    /// Tables covering `[start, end]`; non-time strategies scan everything
    pub fn route_scan_window(&self, base: &str, start: &Value, end: &Value) -> Result<RoutingDecision> {
        let strategy = self.strategy(base)?;
        Ok(match strategy.as_time() {
            Some(time) => {
                let window = time.parse_time_range(start, end)?;
                RoutingDecision::TimeWindow {
                    tables: time.table_names_in_range(base, &window.start, &window.end),
                    window,
                }
            }
            None => RoutingDecision::AllTables {
                tables: strategy.all_table_names(base),
            },
        })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert into the record's shard, returning the physical table
    pub fn insert(&self, base: &str, record: &Record) -> Result<String> {
        let table = self.write_target(base, record)?;
        self.store
            .insert(&table, record)
            .map_err(|e| ShardError::store(table.as_str(), e))?;
        Ok(table)
    }

    /// Insert any serializable value
    pub fn insert_serialize<T: Serialize>(&self, base: &str, value: &T) -> Result<String> {
        self.insert(base, &Record::from_serialize(value)?)
    }

    fn write_target(&self, base: &str, record: &Record) -> Result<String> {
        match self.route_write(base, record)? {
            RoutingDecision::SingleTable { table } => Ok(table),
            other => Err(ShardError::Unresolved {
                table: base.to_string(),
                reason: format!("write routed to {} tables", other.tables().len()),
            }),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Query the single shard a key value maps to.
    ///
    /// A shard that does not exist yet holds no rows.
    pub fn find<F>(&self, base: &str, value: &Value, build: F) -> Result<Vec<Record>>
    where
        F: Fn(Query) -> Query,
    {
        let table = self.resolve_table(base, value)?;
        match self.store.query(&table, &build(Query::new())) {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_missing_table() => {
                log::debug!("shard {} not created yet", table);
                Ok(Vec::new())
            }
            Err(e) => Err(ShardError::store(table, e)),
        }
    }

    /// Query every shard of a table
    pub fn find_all<F>(&self, base: &str, build: F) -> Result<Vec<Record>>
    where
        F: Fn(Query) -> Query,
    {
        let tables = self.route_scan(base)?.tables();
        query_tables(self.store.as_ref(), base, &tables, &build)
    }

    pub fn count_all<F>(&self, base: &str, build: F) -> Result<u64>
    where
        F: Fn(Query) -> Query,
    {
        let tables = self.route_scan(base)?.tables();
        count_tables(self.store.as_ref(), base, &tables, &build)
    }

    /// One page over every shard of a table
    pub fn paginate<F>(&self, base: &str, page: i64, page_size: i64, build: F) -> Result<Paginator<Record>>
    where
        F: Fn(Query) -> Query,
    {
        let (page, page_size) = normalize(page, self.config.page_size(page_size));
        let tables = self.route_scan(base)?.tables();
        let total = count_tables(self.store.as_ref(), base, &tables, &build)?;
        let rows = query_tables(self.store.as_ref(), base, &tables, &|q: Query| build(q).without_paging())?;
        Ok(Paginator::new(page, page_size, total, paginate_slice(rows, page, page_size)))
    }

    // ========================================================================
    // Joins
    // ========================================================================

    /// Fill in router defaults: dedup groups and lookback windows
    fn join_config(&self, config: &MultiJoinConfig) -> MultiJoinConfig {
        let mut config = config.clone();
        if config.dedup_fields.is_empty() {
            config.dedup_fields = self.config.dedup_fields.clone();
        }
        let window = self.config.lookback_window();
        let time_tables: Vec<String> = config
            .participants()
            .filter(|p| p.strategy.as_time().is_some())
            .map(|p| p.base_table().to_string())
            .collect();
        for base in time_tables {
            config.time_ranges.entry(base).or_insert_with(|| window.clone());
        }
        config
    }

    pub fn multi_join<F>(&self, config: &MultiJoinConfig, build: F) -> Result<Vec<Record>>
    where
        F: Fn(Query) -> Query,
    {
        cross_table_multi_join(self.store.as_ref(), &self.join_config(config), build)
    }

    pub fn multi_join_paginate<F>(
        &self,
        config: &MultiJoinConfig,
        page: i64,
        page_size: i64,
        build: F,
    ) -> Result<Paginator<Record>>
    where
        F: Fn(Query) -> Query,
    {
        let rows = self.multi_join(config, |q: Query| build(q).without_paging())?;
        Ok(Paginator::from_rows(rows, page, self.config.page_size(page_size)))
    }
}

impl<S: ShardStore + TableCreator> ShardRouter<S> {
    /// Insert, creating the target shard from the registered template first
    pub fn insert_with_create(&self, base: &str, record: &Record) -> Result<String> {
        let table = self.write_target(base, record)?;
        let template = self.templates.read().get(base).cloned();
        match template {
            Some(ddl) => {
                ensure_table_named(self.store.as_ref(), base, &table, &ddl)?;
            }
            None => log::warn!("no DDL template for {}, inserting without create", base),
        }
        self.store
            .insert(&table, record)
            .map_err(|e| ShardError::store(table.as_str(), e))?;
        Ok(table)
    }

    /// Create every shard of a table from its registered template
    pub fn create_all(&self, base: &str, options: &MigrateOptions) -> Result<usize> {
        let strategy = self.strategy(base)?;
        let ddl = self
            .templates
            .read()
            .get(base)
            .cloned()
            .ok_or_else(|| ShardError::Config(format!("no DDL template for {}", base)))?;
        let mut options = options.clone();
        if options.window.is_none() && strategy.as_time().is_some() {
            options.window = Some(self.config.lookback_window());
        }
        create_all_tables(self.store.as_ref(), strategy.as_ref(), &ddl, &options)
    }
}

// ============================================================================
// Tests
// ============================================================================
