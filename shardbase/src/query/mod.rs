//! Cross-shard query engine
//!
//! Fans a logical query, count, join or page out over physical shard
//! tables through a [`ShardStore`](crate::store::ShardStore) and merges
//! the results. Fan-out is sequential on the caller's thread.

pub mod dedup;
mod filter;
pub mod join;
pub mod paginate;
pub mod scan;
pub mod sql;


pub use dedup::{deduplicate, default_dedup_fields, result_key};
pub use filter::{like_match, CompareOp, Filter, OrderBy, Query};
pub use join::{
    cross_table_join, cross_table_multi_join, cross_table_multi_join_count,
    cross_table_multi_join_count_with_time_range, cross_table_multi_join_optimized,
    cross_table_multi_join_with_time_range, rewrite_on_condition, table_combinations, JoinInfo,
    JoinKeys, MultiJoinConfig,
};
pub use paginate::{
    cross_table_multi_join_paginate, cross_table_multi_join_paginate_optimized,
    cross_table_multi_join_paginate_with_time_range, cross_table_paginate,
    cross_table_paginate_with_range, normalize, paginate_slice, Paginator, DEFAULT_PAGE_SIZE,
};
pub use scan::{
    cross_table_count, cross_table_count_with_range, cross_table_query, cross_table_query_as,
    cross_table_query_with_range,
};
