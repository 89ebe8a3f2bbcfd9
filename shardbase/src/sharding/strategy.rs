//! Sharding Strategy - Determines which physical table holds a row
//!
//! Every strategy is bound to one logical base table and derives physical
//! table names as `base + "_" + suffix`.

use std::hash::Hasher;

use fnv::FnvHasher;

use super::time::{TimeRange, TimeStrategy};
use crate::data::Value;
use crate::field::FieldSource;
use crate::{Result, ShardError};

// ============================================================================
// Strategy Trait
// ============================================================================

/// Trait for sharding strategy implementations
pub trait ShardingStrategy: Send + Sync {
    /// Name of this strategy ("hash", "time", ...)
    fn name(&self) -> &str;

    /// Logical table this strategy shards
    fn base_table_name(&self) -> &str;

    /// Field the shard key is read from, if the strategy has one
    fn shard_key(&self) -> Option<&str>;

    /// Physical table for a key value. Never fails.
    fn table_name(&self, base: &str, value: &Value) -> String;

    /// Physical table for a key value, failing where `table_name` would
    /// have to guess
    fn try_table_name(&self, base: &str, value: &Value) -> Result<String> {
        Ok(self.table_name(base, value))
    }

    /// Every physical table the strategy can enumerate without a window
    fn all_table_names(&self, base: &str) -> Vec<String>;

    /// Extract the shard-key value from a record
    fn sharding_value(&self, record: &dyn FieldSource) -> Result<Value> {
        match self.shard_key() {
            Some(field) => record.field_value(field),
            None => Err(ShardError::FieldNotFound(String::new())),
        }
    }

    /// Downcast to the time strategy, which supports window enumeration
    fn as_time(&self) -> Option<&TimeStrategy> {
        None
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Physical tables to fan out over.
///
/// Time strategies enumerate `window`, or the default lookback when no
/// window is given; other strategies enumerate everything they know.
pub fn shard_tables(strategy: &dyn ShardingStrategy, window: Option<&TimeRange>) -> Vec<String> {
    let base = strategy.base_table_name();
    match strategy.as_time() {
        Some(time) => {
            let window = window.cloned().unwrap_or_else(TimeRange::default_lookback);
            time.table_names_in_range(base, &window.start, &window.end)
        }
        None => strategy.all_table_names(base),
    }
}

/// Route a record to its physical table (strict)
pub fn table_name_for(strategy: &dyn ShardingStrategy, record: &dyn FieldSource) -> Result<String> {
    let value = strategy.sharding_value(record)?;
    strategy.try_table_name(strategy.base_table_name(), &value)
}

/// `base_idx`
pub fn indexed_table_name(base: &str, idx: u64) -> String {
    format!("{}_{}", base, idx)
}

/// FNV-1a 64 of the canonical string form, reduced mod `count`
pub fn hash_index(value: &Value, count: u64) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(value.to_string_value().as_bytes());
    hasher.finish() % count.max(1)
}
