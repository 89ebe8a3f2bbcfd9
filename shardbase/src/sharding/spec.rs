//! Declarative strategy descriptions
//!
//! ```json
//! {"kind": "hash",   "table": "orders", "key": "user_id", "tables": 4}
//! {"kind": "time",   "table": "logs",   "key": "created_at", "granularity": "day"}
//! {"kind": "range",  "table": "users",  "key": "id", "range_size": 10000, "tables": 8}
//! {"kind": "modulo", "table": "events", "key": "id", "modulo": 16}
//! ```

use std::sync::Arc;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use super::{
    HashStrategy, ModuloStrategy, RangeStrategy, ShardingStrategy, TimeEncoding, TimeGranularity,
    TimeStrategy,
};
use crate::data::TableSchema;
use crate::{Result, ShardError};

/// Serializable description of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySpec {
    Hash {
        table: String,
        key: String,
        tables: i64,
        #[serde(default)]
        schema: Option<TableSchema>,
    },
    Time {
        table: String,
        key: String,
        granularity: TimeGranularity,
        #[serde(default)]
        encoding: TimeEncoding,
        /// Offset east of UTC in seconds
        #[serde(default)]
        utc_offset_secs: i32,
        #[serde(default)]
        schema: Option<TableSchema>,
    },
    Range {
        table: String,
        key: String,
        range_size: i64,
        tables: i64,
        #[serde(default)]
        schema: Option<TableSchema>,
    },
    Modulo {
        table: String,
        key: String,
        modulo: i64,
        #[serde(default)]
        schema: Option<TableSchema>,
    },
}

impl StrategySpec {
    /// Base table this spec shards
    pub fn table(&self) -> &str {
        match self {
            StrategySpec::Hash { table, .. }
            | StrategySpec::Time { table, .. }
            | StrategySpec::Range { table, .. }
            | StrategySpec::Modulo { table, .. } => table,
        }
    }

    /// Declared column layout, if any
    pub fn schema(&self) -> Option<&TableSchema> {
        match self {
            StrategySpec::Hash { schema, .. }
            | StrategySpec::Time { schema, .. }
            | StrategySpec::Range { schema, .. }
            | StrategySpec::Modulo { schema, .. } => schema.as_ref(),
        }
    }

    /// Construct the strategy
    pub fn build(&self) -> Result<Arc<dyn ShardingStrategy>> {
        let strategy: Arc<dyn ShardingStrategy> = match self {
            StrategySpec::Hash { table, key, tables, .. } => {
                Arc::new(HashStrategy::new(table.as_str(), key.as_str(), *tables))
            }
            StrategySpec::Time {
                table,
                key,
                granularity,
                encoding,
                utc_offset_secs,
                ..
            } => {
                let offset = FixedOffset::east_opt(*utc_offset_secs).ok_or_else(|| {
                    ShardError::Config(format!("Invalid UTC offset: {}s", utc_offset_secs))
                })?;
                Arc::new(
                    TimeStrategy::new(table.as_str(), key.as_str(), *granularity)
                        .with_encoding(*encoding)
                        .with_offset(offset),
                )
            }
            StrategySpec::Range {
                table,
                key,
                range_size,
                tables,
                ..
            } => Arc::new(RangeStrategy::new(table.as_str(), key.as_str(), *range_size, *tables)),
            StrategySpec::Modulo { table, key, modulo, .. } => {
                Arc::new(ModuloStrategy::new(table.as_str(), key.as_str(), *modulo))
            }
        };
        Ok(strategy)
    }

    /// Parse a single spec from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ShardError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;

    #[test]
    fn test_build_each_kind() {
        let hash = StrategySpec::from_json(r#"{"kind":"hash","table":"orders","key":"user_id","tables":4}"#)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(hash.name(), "hash");
        assert_eq!(hash.all_table_names("orders").len(), 4);

        let time = StrategySpec::from_json(
            r#"{"kind":"time","table":"logs","key":"ts","granularity":"day","utc_offset_secs":3600}"#,
        )
        .unwrap()
        .build()
        .unwrap();
        assert!(time.as_time().is_some());
        assert_eq!(time.table_name("logs", &Value::from("2024-03-15 23:30:00")), "logs_20240315");

        let range = StrategySpec::from_json(
            r#"{"kind":"range","table":"users","key":"id","range_size":100,"tables":3}"#,
        )
        .unwrap()
        .build()
        .unwrap();
        assert_eq!(range.table_name("users", &Value::Int64(150)), "users_1");

        let modulo = StrategySpec::from_json(r#"{"kind":"modulo","table":"ev","key":"id","modulo":5}"#)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(modulo.shard_key(), Some("id"));
    }

    #[test]
    fn test_zero_counts_from_json_are_coerced() {
        let texts = [
            r#"{"kind":"hash","table":"t","key":"id","tables":0}"#,
            r#"{"kind":"range","table":"t","key":"id","range_size":0,"tables":0}"#,
            r#"{"kind":"modulo","table":"t","key":"id","modulo":0}"#,
        ];
        for text in texts {
            let strategy = StrategySpec::from_json(text).unwrap().build().unwrap();
            let tables = strategy.all_table_names("t");
            assert_eq!(tables, vec!["t_0"], "{}", text);
            for key in [Value::Int64(0), Value::Int64(-7), Value::Int64(123_456), Value::from("abc")] {
                assert!(tables.contains(&strategy.table_name("t", &key)), "{} {:?}", text, key);
            }
        }
    }

    #[test]
    fn test_invalid_specs() {
        assert!(StrategySpec::from_json(r#"{"kind":"geo","table":"x","key":"y"}"#).is_err());
        let bad_offset = StrategySpec::Time {
            table: "t".into(),
            key: "k".into(),
            granularity: TimeGranularity::Day,
            encoding: TimeEncoding::Auto,
            utc_offset_secs: 90_000,
            schema: None,
        };
        assert!(matches!(bad_offset.build(), Err(ShardError::Config(_))));
    }
}
