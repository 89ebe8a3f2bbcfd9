//! Caller-defined sharding

use std::fmt;
use std::sync::Arc;

use super::strategy::ShardingStrategy;
use crate::data::Value;
use crate::field::FieldSource;
use crate::{Result, ShardError};

pub type NameFn = Arc<dyn Fn(&str, &Value) -> String + Send + Sync>;
pub type ValueFn = Arc<dyn Fn(&dyn FieldSource) -> Result<Value> + Send + Sync>;
pub type EnumerateFn = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Strategy whose naming, key extraction and enumeration are closures.
///
/// Key extraction defaults to reading the configured key field and
/// enumeration defaults to the base table alone.
#[derive(Clone)]
pub struct CustomStrategy {
    base_table: String,
    shard_key: Option<String>,
    name_fn: NameFn,
    value_fn: Option<ValueFn>,
    enumerate_fn: Option<EnumerateFn>,
}

impl CustomStrategy {
    /// Strategy with only a naming function
    pub fn new<F>(base_table: impl Into<String>, shard_key: impl Into<String>, name_fn: F) -> Self
    where
        F: Fn(&str, &Value) -> String + Send + Sync + 'static,
    {
        Self::builder(base_table, name_fn).shard_key(shard_key).build()
    }

    pub fn builder<F>(base_table: impl Into<String>, name_fn: F) -> CustomStrategyBuilder
    where
        F: Fn(&str, &Value) -> String + Send + Sync + 'static,
    {
        CustomStrategyBuilder {
            inner: CustomStrategy {
                base_table: base_table.into(),
                shard_key: None,
                name_fn: Arc::new(name_fn),
                value_fn: None,
                enumerate_fn: None,
            },
        }
    }
}

impl fmt::Debug for CustomStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomStrategy")
            .field("base_table", &self.base_table)
            .field("shard_key", &self.shard_key)
            .field("custom_value", &self.value_fn.is_some())
            .field("custom_enumeration", &self.enumerate_fn.is_some())
            .finish()
    }
}

/// Builder for [`CustomStrategy`]
pub struct CustomStrategyBuilder {
    inner: CustomStrategy,
}

impl CustomStrategyBuilder {
    pub fn shard_key(mut self, key: impl Into<String>) -> Self {
        self.inner.shard_key = Some(key.into());
        self
    }

    /// Replace default key extraction
    pub fn value_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn FieldSource) -> Result<Value> + Send + Sync + 'static,
    {
        self.inner.value_fn = Some(Arc::new(f));
        self
    }

    /// Replace default enumeration
    pub fn enumerate_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.inner.enumerate_fn = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> CustomStrategy {
        self.inner
    }
}

impl ShardingStrategy for CustomStrategy {
    fn name(&self) -> &str {
        "custom"
    }

    fn base_table_name(&self) -> &str {
        &self.base_table
    }

    fn shard_key(&self) -> Option<&str> {
        self.shard_key.as_deref()
    }

    fn table_name(&self, base: &str, value: &Value) -> String {
        (self.name_fn)(base, value)
    }

    fn all_table_names(&self, base: &str) -> Vec<String> {
        match &self.enumerate_fn {
            Some(f) => f(base),
            None => vec![base.to_string()],
        }
    }

    fn sharding_value(&self, record: &dyn FieldSource) -> Result<Value> {
        if let Some(f) = &self.value_fn {
            return f(record);
        }
        match &self.shard_key {
            Some(key) => record.field_value(key),
            None => Err(ShardError::FieldNotFound(format!(
                "no shard key configured for {}",
                self.base_table
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use crate::sharding::table_name_for;

    fn by_region(base: &str, v: &Value) -> String {
        format!("{}_{}", base, v.to_string_value().to_lowercase())
    }

    #[test]
    fn test_defaults() {
        let s = CustomStrategy::new("users", "region", by_region);
        assert_eq!(s.table_name("users", &Value::from("EU")), "users_eu");
        assert_eq!(s.all_table_names("users"), vec!["users"]);

        let r = Record::new().with("region", "US");
        assert_eq!(table_name_for(&s, &r).unwrap(), "users_us");
    }

    #[test]
    fn test_custom_value_and_enumeration() {
        let s = CustomStrategy::builder("users", by_region)
            .value_fn(|r| {
                let country = r.field_value("country")?;
                Ok(Value::from(if country.as_str() == Some("DE") { "eu" } else { "us" }))
            })
            .enumerate_fn(|base| vec![format!("{}_eu", base), format!("{}_us", base)])
            .build();

        let r = Record::new().with("country", "DE");
        assert_eq!(s.sharding_value(&r).unwrap(), Value::from("eu"));
        assert_eq!(table_name_for(&s, &r).unwrap(), "users_eu");
        assert_eq!(s.all_table_names("users"), vec!["users_eu", "users_us"]);
    }

    #[test]
    fn test_no_key_configured() {
        let s = CustomStrategy::builder("users", by_region).build();
        let err = s.sharding_value(&Record::new().with("region", "x")).unwrap_err();
        assert!(matches!(err, ShardError::FieldNotFound(_)));
    }
}
