//! Range and modulo sharding over integer keys
//!
//! Both fall back to hash placement (with their own table count) when the
//! key is not an integer.

use super::strategy::{hash_index, indexed_table_name, ShardingStrategy};
use crate::data::Value;

/// Rows per table when none is configured
pub const DEFAULT_RANGE_SIZE: i64 = 10_000;

// ============================================================================
// Range Strategy
// ============================================================================

/// Fixed-width range sharding
///
/// `0..size` lives in `base_0`, `size..2*size` in `base_1`, and so on. Keys
/// past the last table stay in the last table; negative keys land in the
/// first.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeStrategy {
    base_table: String,
    shard_key: String,
    range_size: i64,
    table_count: u64,
}

impl RangeStrategy {
    pub fn new(
        base_table: impl Into<String>,
        shard_key: impl Into<String>,
        range_size: i64,
        table_count: i64,
    ) -> Self {
        Self {
            base_table: base_table.into(),
            shard_key: shard_key.into(),
            range_size: if range_size <= 0 { DEFAULT_RANGE_SIZE } else { range_size },
            table_count: table_count.max(1) as u64,
        }
    }

    pub fn range_size(&self) -> i64 {
        self.range_size
    }

    pub fn table_count(&self) -> u64 {
        self.table_count
    }

    /// Table index for a key
    pub fn index_of(&self, value: &Value) -> u64 {
        match value.as_integer() {
            Some(v) => {
                let bucket = v.div_euclid(self.range_size as i128);
                bucket.clamp(0, self.table_count as i128 - 1) as u64
            }
            None => hash_index(value, self.table_count),
        }
    }
}

impl ShardingStrategy for RangeStrategy {
    fn name(&self) -> &str {
        "range"
    }

    fn base_table_name(&self) -> &str {
        &self.base_table
    }

    fn shard_key(&self) -> Option<&str> {
        Some(&self.shard_key)
    }

    fn table_name(&self, base: &str, value: &Value) -> String {
        indexed_table_name(base, self.index_of(value))
    }

    fn all_table_names(&self, base: &str) -> Vec<String> {
        (0..self.table_count).map(|i| indexed_table_name(base, i)).collect()
    }
}

// ============================================================================
// Modulo Strategy
// ============================================================================

/// `key mod m` sharding; negative keys use the non-negative remainder
#[derive(Debug, Clone, PartialEq)]
pub struct ModuloStrategy {
    base_table: String,
    shard_key: String,
    modulo: u64,
}

impl ModuloStrategy {
    pub fn new(base_table: impl Into<String>, shard_key: impl Into<String>, modulo: i64) -> Self {
        Self {
            base_table: base_table.into(),
            shard_key: shard_key.into(),
            modulo: modulo.max(1) as u64,
        }
    }

    pub fn modulo(&self) -> u64 {
        self.modulo
    }

    pub fn index_of(&self, value: &Value) -> u64 {
        match value.as_integer() {
            Some(v) => v.rem_euclid(self.modulo as i128) as u64,
            None => hash_index(value, self.modulo),
        }
    }
}

impl ShardingStrategy for ModuloStrategy {
    fn name(&self) -> &str {
        "modulo"
    }

    fn base_table_name(&self) -> &str {
        &self.base_table
    }

    fn shard_key(&self) -> Option<&str> {
        Some(&self.shard_key)
    }

    fn table_name(&self, base: &str, value: &Value) -> String {
        indexed_table_name(base, self.index_of(value))
    }

    fn all_table_names(&self, base: &str) -> Vec<String> {
        (0..self.modulo).map(|i| indexed_table_name(base, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::HashStrategy;
    use proptest::prelude::*;

    #[test]
    fn test_range_buckets() {
        let s = RangeStrategy::new("users", "id", 10_000, 4);
        assert_eq!(s.table_name("users", &Value::Int64(0)), "users_0");
        assert_eq!(s.table_name("users", &Value::Int64(9_999)), "users_0");
        assert_eq!(s.table_name("users", &Value::Int64(10_000)), "users_1");
        assert_eq!(s.table_name("users", &Value::Int64(39_999)), "users_3");
        assert_eq!(s.table_name("users", &Value::Int64(1_000_000)), "users_3");
        assert_eq!(s.table_name("users", &Value::Int64(-5)), "users_0");
        assert_eq!(s.table_name("users", &Value::UInt64(u64::MAX)), "users_3");
    }

    #[test]
    fn test_range_defaults() {
        let s = RangeStrategy::new("users", "id", 0, 0);
        assert_eq!(s.range_size(), DEFAULT_RANGE_SIZE);
        assert_eq!(s.all_table_names("users"), vec!["users_0"]);
    }

    #[test]
    fn test_modulo() {
        let s = ModuloStrategy::new("orders", "id", 4);
        assert_eq!(s.table_name("orders", &Value::Int64(10)), "orders_2");
        assert_eq!(s.table_name("orders", &Value::Int64(-1)), "orders_3");
        assert_eq!(s.table_name("orders", &Value::UInt8(4)), "orders_0");
        assert_eq!(ModuloStrategy::new("o", "id", -2).modulo(), 1);
    }

    #[test]
    fn test_non_integer_falls_back_to_hash() {
        let hash = HashStrategy::new("orders", "id", 4);
        let key = Value::from("abc");
        let modulo = ModuloStrategy::new("orders", "id", 4);
        let range = RangeStrategy::new("orders", "id", 100, 4);
        assert_eq!(modulo.table_name("orders", &key), hash.table_name("orders", &key));
        assert_eq!(range.table_name("orders", &key), hash.table_name("orders", &key));
    }

    proptest! {
        #[test]
        fn prop_indices_in_bounds(v in any::<i64>(), size in -5i64..50_000, n in -3i64..32) {
            let range = RangeStrategy::new("t", "k", size, n);
            prop_assert!(range.index_of(&Value::Int64(v)) < range.table_count());

            let modulo = ModuloStrategy::new("t", "k", n);
            let idx = modulo.index_of(&Value::Int64(v));
            prop_assert!(idx < modulo.modulo());
            prop_assert!(modulo.all_table_names("t").contains(&modulo.table_name("t", &Value::Int64(v))));
        }
    }
}
