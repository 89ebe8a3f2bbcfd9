//! Cross-shard query and count
//!
//! The same filtered query runs against every shard table in turn. Rows are
//! appended table by table; ordering requested by the query holds within
//! each shard's contribution only.

use serde::de::DeserializeOwned;

use super::Query;
use crate::data::{Record, Value};
use crate::sharding::{shard_tables, ShardingStrategy};
use crate::store::{ShardStore, StoreError};
use crate::{Result, ShardError};

/// Run `build(Query::new())` against every shard table of `strategy`
pub fn cross_table_query<F>(
    store: &dyn ShardStore,
    strategy: &dyn ShardingStrategy,
    build: F,
) -> Result<Vec<Record>>
where
    F: Fn(Query) -> Query,
{
    let tables = shard_tables(strategy, None);
    query_tables(store, strategy.base_table_name(), &tables, &build)
}

/// Like [`cross_table_query`], restricted to the time window `[start, end]`.
///
/// Strategies without time buckets ignore the window and scan every table.
pub fn cross_table_query_with_range<F>(
    store: &dyn ShardStore,
    strategy: &dyn ShardingStrategy,
    build: F,
    start: &Value,
    end: &Value,
) -> Result<Vec<Record>>
where
    F: Fn(Query) -> Query,
{
    let tables = window_tables(strategy, start, end)?;
    query_tables(store, strategy.base_table_name(), &tables, &build)
}

/// [`cross_table_query`] with rows converted into `T`
pub fn cross_table_query_as<T, F>(
    store: &dyn ShardStore,
    strategy: &dyn ShardingStrategy,
    build: F,
) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    F: Fn(Query) -> Query,
{
    cross_table_query(store, strategy, build)?
        .into_iter()
        .map(Record::into_typed)
        .collect()
}

/// Sum of per-shard counts. No deduplication.
pub fn cross_table_count<F>(
    store: &dyn ShardStore,
    strategy: &dyn ShardingStrategy,
    build: F,
) -> Result<u64>
where
    F: Fn(Query) -> Query,
{
    let tables = shard_tables(strategy, None);
    count_tables(store, strategy.base_table_name(), &tables, &build)
}

pub fn cross_table_count_with_range<F>(
    store: &dyn ShardStore,
    strategy: &dyn ShardingStrategy,
    build: F,
    start: &Value,
    end: &Value,
) -> Result<u64>
where
    F: Fn(Query) -> Query,
{
    let tables = window_tables(strategy, start, end)?;
    count_tables(store, strategy.base_table_name(), &tables, &build)
}

fn window_tables(strategy: &dyn ShardingStrategy, start: &Value, end: &Value) -> Result<Vec<String>> {
    let base = strategy.base_table_name();
    match strategy.as_time() {
        Some(time) => time.table_names_in_value_range(base, start, end),
        None => Ok(strategy.all_table_names(base)),
    }
}

/// Missing shard tables are expected (not yet created for a key range)
fn skippable(err: &StoreError) -> bool {
    err.is_missing_table()
}

pub(crate) fn query_tables<F>(
    store: &dyn ShardStore,
    base: &str,
    tables: &[String],
    build: &F,
) -> Result<Vec<Record>>
where
    F: Fn(Query) -> Query,
{
    if tables.is_empty() {
        return Err(ShardError::NoTables(base.to_string()));
    }
    let query = build(Query::new());
    let mut results = Vec::new();
    for table in tables {
        match store.query(table, &query) {
            Ok(rows) => {
                log::debug!("{}: {} rows", table, rows.len());
                results.extend(rows);
            }
            Err(e) if skippable(&e) => log::debug!("skipping missing shard {}", table),
            Err(e) => return Err(ShardError::store(table.as_str(), e)),
        }
    }
    Ok(results)
}

pub(crate) fn count_tables<F>(
    store: &dyn ShardStore,
    base: &str,
    tables: &[String],
    build: &F,
) -> Result<u64>
where
    F: Fn(Query) -> Query,
{
    if tables.is_empty() {
        return Err(ShardError::NoTables(base.to_string()));
    }
    let query = build(Query::new()).for_count();
    let mut total = 0u64;
    for table in tables {
        match store.count(table, &query) {
            Ok(n) => total += n,
            Err(e) if skippable(&e) => log::debug!("skipping missing shard {}", table),
            Err(e) => return Err(ShardError::store(table.as_str(), e)),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CompareOp;
    use crate::sharding::{HashStrategy, TimeGranularity, TimeStrategy};
    use crate::store::{JoinStatement, MemoryStore, StoreResult};
    use chrono::{TimeZone, Utc};

    fn user(id: i64, name: &str) -> Record {
        Record::new().with("user_id", id).with("name", name)
    }

    fn seeded() -> (MemoryStore, HashStrategy) {
        let strategy = HashStrategy::new("users", "user_id", 4);
        let store = MemoryStore::new();
        for t in strategy.all_table_names("users") {
            store.add_table(&t);
        }
        for id in 1..=20 {
            let table = strategy.table_name("users", &Value::Int64(id));
            store.insert(&table, &user(id, &format!("u{}", id))).unwrap();
        }
        (store, strategy)
    }

    #[test]
    fn test_query_all_shards() {
        let (store, strategy) = seeded();
        let rows = cross_table_query(&store, &strategy, |q| q).unwrap();
        assert_eq!(rows.len(), 20);

        let rows = cross_table_query(&store, &strategy, |q| q.where_eq("user_id", 7i64)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("u7")));
    }

    #[test]
    fn test_count_sums_shards() {
        let (store, strategy) = seeded();
        let n = cross_table_count(&store, &strategy, |q| {
            q.where_op("user_id", CompareOp::LessEqual, 10i64).limit(1)
        })
        .unwrap();
        assert_eq!(n, 10);
    }

    #[test]
    fn test_ordering_is_per_shard() {
        let (store, strategy) = seeded();
        let rows = cross_table_query(&store, &strategy, |q| q.order_by("user_id")).unwrap();
        // each shard's run is ascending
        let mut offset = 0;
        for table in strategy.all_table_names("users") {
            let n = store.row_count(&table);
            let run: Vec<i64> = rows[offset..offset + n]
                .iter()
                .filter_map(|r| r.get("user_id").and_then(Value::as_i64))
                .collect();
            assert!(run.windows(2).all(|w| w[0] <= w[1]));
            offset += n;
        }
        assert_eq!(offset, rows.len());
    }

    #[test]
    fn test_missing_shard_skipped() {
        let (store, strategy) = seeded();
        let missing = store.row_count("users_2") as u64;
        store.drop_table("users_2");
        let rows = cross_table_query(&store, &strategy, |q| q).unwrap();
        assert_eq!(rows.len() as u64, 20 - missing);
        assert_eq!(cross_table_count(&store, &strategy, |q| q).unwrap(), 20 - missing);
    }

    struct FailingStore;

    impl ShardStore for FailingStore {
        fn query(&self, _: &str, _: &Query) -> StoreResult<Vec<Record>> {
            Err(StoreError::Execution("connection reset".into()))
        }
        fn count(&self, _: &str, _: &Query) -> StoreResult<u64> {
            Err(StoreError::Execution("connection reset".into()))
        }
        fn join(&self, _: &JoinStatement, _: &Query) -> StoreResult<Vec<Record>> {
            Err(StoreError::Execution("connection reset".into()))
        }
        fn count_join(&self, _: &JoinStatement, _: &Query) -> StoreResult<u64> {
            Err(StoreError::Execution("connection reset".into()))
        }
        fn insert(&self, _: &str, _: &Record) -> StoreResult<()> {
            Err(StoreError::Execution("connection reset".into()))
        }
    }

    #[test]
    fn test_other_errors_abort() {
        let strategy = HashStrategy::new("users", "user_id", 2);
        let err = cross_table_query(&FailingStore, &strategy, |q| q).unwrap_err();
        match err {
            ShardError::Store { target, source } => {
                assert_eq!(target, "users_0");
                assert_eq!(source, StoreError::Execution("connection reset".into()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cross_table_count(&FailingStore, &strategy, |q| q).is_err());
    }

    #[test]
    fn test_time_window_query() {
        let strategy = TimeStrategy::new("logs", "created_at", TimeGranularity::Month);
        let store = MemoryStore::new();
        for (month, n) in [(1u32, 2usize), (2, 3), (3, 1), (4, 5)] {
            let at = Utc.with_ymd_and_hms(2024, month, 10, 0, 0, 0).unwrap();
            let table = strategy.table_name_at("logs", &at);
            store.load(&table, (0..n).map(|i| Record::new().with("seq", i as i64).with("created_at", at)).collect());
        }

        let rows = cross_table_query_with_range(
            &store,
            &strategy,
            |q| q,
            &Value::from("2024-01-01"),
            &Value::from("2024-03-31 23:59:59"),
        )
        .unwrap();
        assert_eq!(rows.len(), 6);

        let n = cross_table_count_with_range(
            &store,
            &strategy,
            |q| q,
            &Value::from("2024-04-30"),
            &Value::from("2024-02-01"),
        )
        .unwrap();
        assert_eq!(n, 9);

        assert!(matches!(
            cross_table_query_with_range(&store, &strategy, |q| q, &Value::from("soon"), &Value::from("later")),
            Err(ShardError::TimeConversion { .. })
        ));
    }

    #[test]
    fn test_query_as_typed() {
        #[derive(serde::Deserialize)]
        struct User {
            user_id: i64,
            name: String,
        }
        let (store, strategy) = seeded();
        let users: Vec<User> = cross_table_query_as(&store, &strategy, |q| q.where_eq("user_id", 3i64)).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, 3);
        assert_eq!(users[0].name, "u3");
    }
}
