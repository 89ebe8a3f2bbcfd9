//! Data types shared by strategies, stores and the query engine
//!
//! - [`Value`]: a shard-key or cell value of any primitive/temporal type
//! - [`Record`]: the universal row representation used during fan-out
//! - [`ColumnDef`] / [`TableSchema`]: declared table layout used to render shard DDL

mod column;
mod record;
mod value;

pub use column::{ColumnDef, TableSchema};
pub use record::Record;
pub use value::Value;

use serde::{Deserialize, Serialize};

/// Logical column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int64,
    Float64,
    String,
    Binary,
    Timestamp,
    Date,
}

impl DataType {
    /// SQL type name used when rendering DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOLEAN",
            DataType::Int64 => "BIGINT",
            DataType::Float64 => "DOUBLE",
            DataType::String => "TEXT",
            DataType::Binary => "BLOB",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Date => "DATE",
        }
    }
}
