//! Router configuration and JSON sharding manifests
//!
//! ```json
//! {
//!   "router": {"lookback_months": 6, "default_page_size": 20},
//!   "tables": [
//!     {"kind": "hash", "table": "orders", "key": "user_id", "tables": 4},
//!     {"kind": "time", "table": "logs", "key": "created_at", "granularity": "month"}
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::query::default_dedup_fields;
use crate::sharding::{ShardingStrategy, StrategySpec, TimeRange};
use crate::{Result, ShardError};

/// Engine-wide defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Time window scanned when a time-sharded read names none
    pub lookback_months: u32,
    /// Page size used when a caller passes one below 1
    pub default_page_size: u64,
    /// Dedup field groups for joins, most specific first
    pub dedup_fields: Vec<Vec<String>>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            lookback_months: crate::sharding::time::DEFAULT_LOOKBACK_MONTHS,
            default_page_size: crate::query::DEFAULT_PAGE_SIZE,
            dedup_fields: default_dedup_fields(),
        }
    }
}

impl RouterConfig {
    /// Window ending now and reaching back `lookback_months`
    pub fn lookback_window(&self) -> TimeRange {
        TimeRange::lookback(self.lookback_months)
    }

    /// Page size to use for a caller-supplied value
    pub fn page_size(&self, requested: i64) -> i64 {
        if requested < 1 {
            self.default_page_size.max(1) as i64
        } else {
            requested
        }
    }
}

/// Router settings plus the strategies of every sharded table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardingManifest {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub tables: Vec<StrategySpec>,
}

impl ShardingManifest {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let manifest: ShardingManifest =
            serde_json::from_str(text).map_err(|e| ShardError::Config(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ShardError::Config(e.to_string()))
    }

    /// Spec for one logical table
    pub fn table(&self, base: &str) -> Option<&StrategySpec> {
        self.tables.iter().find(|t| t.table() == base)
    }

    /// Build every strategy
    pub fn build_strategies(&self) -> Result<Vec<Arc<dyn ShardingStrategy>>> {
        self.tables.iter().map(StrategySpec::build).collect()
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for spec in &self.tables {
            if spec.table().is_empty() {
                return Err(ShardError::Config("table name must not be empty".into()));
            }
            if !seen.insert(spec.table()) {
                return Err(ShardError::Config(format!("duplicate table: {}", spec.table())));
            }
        }
        Ok(())
    }
}
