//! Table Sharding Framework
//!
//! Maps one logical table onto many physically named shard tables and routes
//! writes and scans to them.
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    ShardRouter                            │
//! │  - Registry: base table → strategy                       │
//! │  - Write routing (record → physical table)               │
//! │  - Scan routing (strategy enumeration / time window)     │
//! ├──────────────────────────────────────────────────────────┤
//! │  ShardingStrategy                                        │
//! │  - Hash   (FNV-1a of the key text, mod N)                │
//! │  - Time   (calendar bucket suffix: YYYY .. YYYYMMDDHHmm) │
//! │  - Range  (fixed-width integer buckets)                  │
//! │  - Modulo (integer key mod N)                            │
//! │  - Custom (caller supplied closures)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │  StrategySpec                                            │
//! │  - Declarative (JSON) description → built strategy       │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod custom;
pub mod hash;
pub mod range;
pub mod router;
pub mod spec;
pub mod strategy;
pub mod time;

pub use custom::{CustomStrategy, CustomStrategyBuilder};
pub use hash::HashStrategy;
pub use range::{ModuloStrategy, RangeStrategy};
pub use router::{RoutingDecision, ShardRouter};
pub use spec::StrategySpec;
pub use strategy::{shard_tables, table_name_for, ShardingStrategy};
pub use time::{TimeEncoding, TimeGranularity, TimeRange, TimeStrategy};
