//! Column definitions and table schemas used to render shard DDL

use super::{DataType, Value};
use crate::query::sql::{quote_ident, render_literal};
use serde::{Deserialize, Serialize};

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Whether the column can contain null values
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Whether this column is (part of) the primary key
    #[serde(default)]
    pub primary_key: bool,
    /// Default value (optional)
    #[serde(default)]
    pub default_value: Option<Value>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Create a new column definition
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            default_value: None,
        }
    }

    /// Set nullable flag
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark as primary key (implies NOT NULL)
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Set default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.data_type.sql_type());
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&render_literal(default));
        }
        sql
    }
}

/// Declared layout of a logical table; every shard shares it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append
    pub fn column(mut self, def: ColumnDef) -> Self {
        self.columns.push(def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Render a `CREATE TABLE` statement for the given physical table
    pub fn create_sql(&self, table: &str, if_not_exists: bool) -> String {
        let mut defs: Vec<String> = self.columns.iter().map(ColumnDef::to_sql).collect();
        let pk: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| quote_ident(&c.name))
            .collect();
        if !pk.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }
        format!(
            "CREATE TABLE {}{} ({})",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            quote_ident(table),
            defs.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_def() {
        let col = ColumnDef::new("name", DataType::String).nullable(false);

        assert_eq!(col.name, "name");
        assert_eq!(col.data_type, DataType::String);
        assert!(!col.nullable);
        assert!(!col.primary_key);
    }

    #[test]
    fn test_create_sql() {
        let schema = TableSchema::new()
            .column(ColumnDef::new("id", DataType::Int64).primary_key())
            .column(ColumnDef::new("status", DataType::String).with_default(Value::from("new")))
            .column(ColumnDef::new("created_at", DataType::Timestamp));

        let sql = schema.create_sql("orders_3", true);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"orders_3\" (\"id\" BIGINT NOT NULL, \
             \"status\" TEXT DEFAULT 'new', \"created_at\" TIMESTAMP, PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_schema_from_json() {
        let schema: TableSchema = serde_json::from_str(
            r#"{"columns":[{"name":"id","data_type":"int64","primary_key":true},
                           {"name":"note","data_type":"string"}]}"#,
        )
        .unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert!(schema.get("note").unwrap().nullable);
        assert!(schema.get("id").unwrap().primary_key);
    }
}
