//! Hash sharding

use super::strategy::{hash_index, indexed_table_name, ShardingStrategy};
use crate::data::Value;

/// Hash-based sharding for uniform distribution
///
/// The key's canonical text is hashed with FNV-1a 64 and reduced modulo the
/// shard count, so `123` and `"123"` land on the same table.
///
/// Properties:
/// - Uniform distribution
/// - Stable across processes and platforms
/// - Range queries must scatter to all shards
#[derive(Debug, Clone, PartialEq)]
pub struct HashStrategy {
    base_table: String,
    shard_key: String,
    table_count: u64,
}

impl HashStrategy {
    /// Create a hash strategy; a count of zero or less becomes one
    pub fn new(base_table: impl Into<String>, shard_key: impl Into<String>, table_count: i64) -> Self {
        Self {
            base_table: base_table.into(),
            shard_key: shard_key.into(),
            table_count: table_count.max(1) as u64,
        }
    }

    pub fn table_count(&self) -> u64 {
        self.table_count
    }
}

impl ShardingStrategy for HashStrategy {
    fn name(&self) -> &str {
        "hash"
    }

    fn base_table_name(&self) -> &str {
        &self.base_table
    }

    fn shard_key(&self) -> Option<&str> {
        Some(&self.shard_key)
    }

    fn table_name(&self, base: &str, value: &Value) -> String {
        indexed_table_name(base, hash_index(value, self.table_count))
    }

    fn all_table_names(&self, base: &str) -> Vec<String> {
        (0..self.table_count).map(|i| indexed_table_name(base, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use crate::sharding::table_name_for;
    use proptest::prelude::*;

    #[test]
    fn test_hash_uniform() {
        let s = HashStrategy::new("users", "user_id", 4);
        let mut counts = [0u32; 4];
        for i in 0..10000i64 {
            let table = s.table_name("users", &Value::Int64(i));
            let idx: usize = table.trim_start_matches("users_").parse().unwrap();
            counts[idx] += 1;
        }
        for &c in &counts {
            assert!(c > 1500 && c < 3500, "Unbalanced distribution: {:?}", counts);
        }
    }

    #[test]
    fn test_hash_text_and_integer_agree() {
        let s = HashStrategy::new("users", "user_id", 8);
        assert_eq!(
            s.table_name("users", &Value::Int64(123)),
            s.table_name("users", &Value::from("123"))
        );
        assert_eq!(
            s.table_name("users", &Value::UInt32(123)),
            s.table_name("users", &Value::Int8(123))
        );
    }

    #[test]
    fn test_hash_count_coerced() {
        let s = HashStrategy::new("users", "user_id", 0);
        assert_eq!(s.all_table_names("users"), vec!["users_0"]);
        assert_eq!(s.table_name("users", &Value::Int64(99)), "users_0");

        let s = HashStrategy::new("users", "user_id", -3);
        assert_eq!(s.table_count(), 1);
    }

    #[test]
    fn test_hash_enumeration() {
        let s = HashStrategy::new("orders", "user_id", 3);
        assert_eq!(s.all_table_names("orders"), vec!["orders_0", "orders_1", "orders_2"]);
    }

    #[test]
    fn test_route_record() {
        let s = HashStrategy::new("orders", "user_id", 4);
        let r = Record::new().with("user_id", 17i64);
        assert_eq!(table_name_for(&s, &r).unwrap(), s.table_name("orders", &Value::Int64(17)));

        let missing = Record::new().with("order_id", 1i64);
        assert!(table_name_for(&s, &missing).is_err());
    }

    proptest! {
        #[test]
        fn prop_hash_in_range_and_deterministic(v in any::<i64>(), n in 1i64..64) {
            let s = HashStrategy::new("t", "k", n);
            let a = s.table_name("t", &Value::Int64(v));
            let b = s.table_name("t", &Value::Int64(v));
            prop_assert_eq!(&a, &b);
            prop_assert!(s.all_table_names("t").contains(&a));
            prop_assert_eq!(a, s.table_name("t", &Value::String(v.to_string())));
        }
    }
}
