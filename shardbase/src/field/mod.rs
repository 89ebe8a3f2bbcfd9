//! Field access for shard-key extraction
//!
//! Strategies never look inside caller types directly. They ask a
//! [`FieldSource`] for a named field, and the source resolves the name in
//! four passes:
//!
//! 1. exact field name
//! 2. declared column name (the name the field has in the database)
//! 3. declared external name (the name the field has on the wire)
//! 4. case-insensitive match against the field name in snake_case,
//!    or against the field name itself
//!
//! Caller types opt in by implementing [`Mapped`] with a [`FieldMap`] built
//! once per type:
//!
//! ```ignore
//! impl Mapped for Order {
//!     fn field_map() -> &'static FieldMap<Self> {
//!         static MAP: Lazy<FieldMap<Order>> = Lazy::new(|| {
//!             FieldMap::new()
//!                 .field("OrderID", |o: &Order| o.id.into())
//!                 .column("order_id")
//!                 .field("UserID", |o: &Order| o.user_id.into())
//!                 .external("uid")
//!         });
//!         &MAP
//!     }
//! }
//! ```

use crate::data::{Record, Value};
use crate::{Result, ShardError};

/// Anything a shard key can be read from
pub trait FieldSource {
    /// Look up a field by name, failing with [`ShardError::FieldNotFound`]
    fn field_value(&self, name: &str) -> Result<Value>;
}

/// One declared field of a record type
pub struct FieldDef<T> {
    pub name: String,
    pub column: Option<String>,
    pub external: Option<String>,
    pub get: fn(&T) -> Value,
}

/// Declared field table for a record type
pub struct FieldMap<T> {
    fields: Vec<FieldDef<T>>,
}

impl<T> Default for FieldMap<T> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<T> FieldMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field with its accessor
    pub fn field(mut self, name: impl Into<String>, get: fn(&T) -> Value) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            column: None,
            external: None,
            get,
        });
        self
    }

    /// Attach a column name to the most recently declared field
    pub fn column(mut self, column: impl Into<String>) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.column = Some(column.into());
        }
        self
    }

    /// Attach an external (serialized) name to the most recently declared field
    pub fn external(mut self, external: impl Into<String>) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.external = Some(external.into());
        }
        self
    }

    pub fn fields(&self) -> &[FieldDef<T>] {
        &self.fields
    }

    /// Resolve `name` against `record`
    pub fn resolve(&self, record: &T, name: &str) -> Result<Value> {
        let found = self
            .fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|f| f.column.as_deref() == Some(name))
            })
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|f| f.external.as_deref() == Some(name))
            })
            .or_else(|| {
                self.fields.iter().find(|f| {
                    to_snake_case(&f.name).eq_ignore_ascii_case(name)
                        || f.name.eq_ignore_ascii_case(name)
                })
            });

        match found {
            Some(def) => Ok((def.get)(record)),
            None => Err(ShardError::FieldNotFound(name.to_string())),
        }
    }
}

/// Record types with a declared field map
pub trait Mapped: Sized + 'static {
    fn field_map() -> &'static FieldMap<Self>;
}

impl<T: Mapped> FieldSource for T {
    fn field_value(&self, name: &str) -> Result<Value> {
        T::field_map().resolve(self, name)
    }
}

impl FieldSource for Record {
    fn field_value(&self, name: &str) -> Result<Value> {
        if let Some(v) = self.get(name) {
            return Ok(v.clone());
        }
        let snake = to_snake_case(name);
        self.iter()
            .find(|(col, _)| {
                col.eq_ignore_ascii_case(&snake)
                    || to_snake_case(col).eq_ignore_ascii_case(name)
                    || col.eq_ignore_ascii_case(name)
            })
            .map(|(_, v)| v.clone())
            .ok_or_else(|| ShardError::FieldNotFound(name.to_string()))
    }
}

/// Convert an identifier to snake_case.
///
/// Runs of capitals are kept together as one word, so `UserID` becomes
/// `user_id` and `HTTPServer` becomes `http_server`.
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = if i > 0 { chars.get(i - 1) } else { None };
            let next = chars.get(i + 1);
            let boundary = match prev {
                None => false,
                Some(p) if *p == '_' => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.map_or(false, |n| n.is_lowercase()),
                Some(_) => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
