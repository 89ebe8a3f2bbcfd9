//! Paginated cross-shard reads
//!
//! The standard paths materialize every matching row (deduplicated for
//! joins), take the total from that, then slice one page in memory. The
//! key-aware path pushes OFFSET/LIMIT into its single statement.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::join::{cross_table_multi_join, resolved_statement, statement_label, JoinKeys, MultiJoinConfig};
use super::scan::{cross_table_count, cross_table_count_with_range, cross_table_query, cross_table_query_with_range};
use super::Query;
use crate::data::{Record, Value};
use crate::sharding::ShardingStrategy;
use crate::store::ShardStore;
use crate::{Result, ShardError};

pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paginator<T> {
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
    pub total_pages: u64,
    pub data: Vec<T>,
}

impl<T> Paginator<T> {
    /// Build a page; `page` and `page_size` must already be normalized
    pub fn new(page: u64, page_size: u64, total: u64, data: Vec<T>) -> Self {
        Self {
            page,
            page_size,
            total,
            total_pages: total.div_ceil(page_size.max(1)),
            data,
        }
    }

    /// Slice page `page` out of fully materialized rows
    pub fn from_rows(rows: Vec<T>, page: i64, page_size: i64) -> Self {
        let (page, page_size) = normalize(page, page_size);
        let total = rows.len() as u64;
        Self::new(page, page_size, total, paginate_slice(rows, page, page_size))
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Paginator<Record> {
    /// Convert the page's rows into caller types
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Paginator<T>> {
        let data = self
            .data
            .into_iter()
            .map(Record::into_typed)
            .collect::<Result<Vec<T>>>()?;
        Ok(Paginator {
            page: self.page,
            page_size: self.page_size,
            total: self.total,
            total_pages: self.total_pages,
            data,
        })
    }
}

/// Clamp a requested page: page < 1 becomes 1, size < 1 becomes the default
pub fn normalize(page: i64, page_size: i64) -> (u64, u64) {
    let page = if page < 1 { 1 } else { page as u64 };
    let page_size = if page_size < 1 { DEFAULT_PAGE_SIZE } else { page_size as u64 };
    (page, page_size)
}

fn page_offset(page: u64, page_size: u64) -> u64 {
    (page - 1).saturating_mul(page_size)
}

/// Rows `[offset, offset + size)`; empty when out of range
pub fn paginate_slice<T>(rows: Vec<T>, page: u64, page_size: u64) -> Vec<T> {
    let offset = page_offset(page.max(1), page_size);
    if offset >= rows.len() as u64 {
        return Vec::new();
    }
    rows.into_iter()
        .skip(offset as usize)
        .take(page_size as usize)
        .collect()
}

// ============================================================================
// Single-table fan-out
// ============================================================================

/// Page over every shard of `strategy`
pub fn cross_table_paginate<F>(
    store: &dyn ShardStore,
    strategy: &dyn ShardingStrategy,
    page: i64,
    page_size: i64,
    build: F,
) -> Result<Paginator<Record>>
where
    F: Fn(Query) -> Query,
{
    let (page, page_size) = normalize(page, page_size);
    let total = cross_table_count(store, strategy, &build)?;
    let rows = cross_table_query(store, strategy, |q: Query| build(q).without_paging())?;
    Ok(Paginator::new(page, page_size, total, paginate_slice(rows, page, page_size)))
}

/// Page over the shards covering `[start, end]`
pub fn cross_table_paginate_with_range<F>(
    store: &dyn ShardStore,
    strategy: &dyn ShardingStrategy,
    page: i64,
    page_size: i64,
    build: F,
    start: &Value,
    end: &Value,
) -> Result<Paginator<Record>>
where
    F: Fn(Query) -> Query,
{
    let (page, page_size) = normalize(page, page_size);
    let total = cross_table_count_with_range(store, strategy, &build, start, end)?;
    let rows = cross_table_query_with_range(store, strategy, |q: Query| build(q).without_paging(), start, end)?;
    Ok(Paginator::new(page, page_size, total, paginate_slice(rows, page, page_size)))
}

// ============================================================================
// Joins
// ============================================================================

/// Page over the deduplicated multi-join result
pub fn cross_table_multi_join_paginate<F>(
    store: &dyn ShardStore,
    config: &MultiJoinConfig,
    page: i64,
    page_size: i64,
    build: F,
) -> Result<Paginator<Record>>
where
    F: Fn(Query) -> Query,
{
    let rows = cross_table_multi_join(store, config, |q: Query| build(q).without_paging())?;
    Ok(Paginator::from_rows(rows, page, page_size))
}

pub fn cross_table_multi_join_paginate_with_time_range<F>(
    store: &dyn ShardStore,
    config: &MultiJoinConfig,
    page: i64,
    page_size: i64,
    build: F,
    start: &Value,
    end: &Value,
) -> Result<Paginator<Record>>
where
    F: Fn(Query) -> Query,
{
    let rows = super::join::cross_table_multi_join_with_time_range(
        store,
        config,
        |q: Query| build(q).without_paging(),
        start,
        end,
    )?;
    Ok(Paginator::from_rows(rows, page, page_size))
}

/// Page over the single shard tuple `keys` resolve to.
///
/// The total comes from a COUNT over the same statement and the page is
/// fetched with OFFSET/LIMIT. Rows are not deduplicated.
pub fn cross_table_multi_join_paginate_optimized<F>(
    store: &dyn ShardStore,
    config: &MultiJoinConfig,
    keys: &JoinKeys,
    page: i64,
    page_size: i64,
    build: F,
) -> Result<Paginator<Record>>
where
    F: Fn(Query) -> Query,
{
    let (page, page_size) = normalize(page, page_size);
    let statement = resolved_statement(config, keys)?;
    let label = statement_label(&statement);

    let query = build(Query::new());
    let total = store
        .count_join(&statement, &query.for_count())
        .map_err(|e| ShardError::store(label.as_str(), e))?;
    let offset = page_offset(page, page_size);
    if offset >= total {
        return Ok(Paginator::new(page, page_size, total, Vec::new()));
    }
    let data = store
        .join(&statement, &query.offset(offset).limit(page_size))
        .map_err(|e| ShardError::store(label.as_str(), e))?;
    Ok(Paginator::new(page, page_size, total, data))
}
