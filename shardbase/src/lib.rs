//! ShardBase Table Sharding Engine
//!
//! Routes rows of one logical table to many physically named shard tables
//! and runs queries, counts, joins and paginated reads across them as if a
//! single logical table existed.

pub mod config;
pub mod data;
pub mod field;
pub mod migrate;
pub mod query;
pub mod sharding;
pub mod store;

// Re-export main types
pub use config::{RouterConfig, ShardingManifest};
pub use data::{ColumnDef, DataType, Record, TableSchema, Value};
pub use field::{FieldMap, FieldSource, Mapped};
pub use query::{
    cross_table_count, cross_table_join, cross_table_multi_join, cross_table_paginate,
    cross_table_query, deduplicate, Filter, JoinInfo, JoinKeys, MultiJoinConfig, Paginator, Query,
};
pub use sharding::{
    CustomStrategy, HashStrategy, ModuloStrategy, RangeStrategy, RoutingDecision, ShardRouter,
    ShardingStrategy, StrategySpec, TimeEncoding, TimeGranularity, TimeRange, TimeStrategy,
};
pub use store::{JoinKind, MemoryStore, ShardStore, StoreError};

/// Sharding engine error type
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("No sharding strategy registered for table: {0}")]
    StrategyNotFound(String),

    #[error("No tables found for {0}")]
    NoTables(String),

    #[error("Cannot resolve shard for {table}: {reason}")]
    Unresolved { table: String, reason: String },

    #[error("Cannot convert value to time: {value}")]
    TimeConversion { value: String },

    #[error("Store error on {target}: {source}")]
    Store {
        target: String,
        #[source]
        source: StoreError,
    },

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ShardError {
    /// Wrap a store error with the table or statement it came from
    pub fn store(target: impl Into<String>, source: StoreError) -> Self {
        ShardError::Store {
            target: target.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShardError>;
