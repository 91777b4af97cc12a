//! Column, schema and table descriptors exchanged between nodes

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::types::Value;
use crate::error::{FederationError, FederationResult};
use crate::tables::naming::{TableName, TableType};

/// Column data types understood by every node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DType {
    Int,
    Str,
    Float,
    Json,
    Binary,
}

impl DType {
    /// Declared SQLite column type
    pub fn sql_type(&self) -> &'static str {
        match self {
            DType::Int => "INT",
            DType::Str => "TEXT",
            DType::Float => "REAL",
            DType::Json => "JSON_TEXT",
            DType::Binary => "BLOB",
        }
    }

    /// Maps a declared column type read back from the database
    pub fn from_sql_type(declared: &str) -> Option<Self> {
        let upper = declared.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        match base {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" => Some(DType::Int),
            "TEXT" | "VARCHAR" | "CHAR" | "CLOB" => Some(DType::Str),
            "REAL" | "FLOAT" | "DOUBLE" => Some(DType::Float),
            "JSON_TEXT" | "JSON" => Some(DType::Json),
            "BLOB" => Some(DType::Binary),
            _ => None,
        }
    }

    /// Maps a CDE `sql_type` (`int`, `real`, `text`) to a column type
    pub fn from_cde_sql_type(sql_type: &str) -> Option<Self> {
        match sql_type.to_ascii_lowercase().as_str() {
            "int" | "integer" => Some(DType::Int),
            "real" | "float" => Some(DType::Float),
            "text" => Some(DType::Str),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Int => "INT",
            DType::Str => "STR",
            DType::Float => "FLOAT",
            DType::Json => "JSON",
            DType::Binary => "BINARY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: DType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Ordered list of columns; order drives positional SQL generation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Re-orders the columns to follow `order`
    ///
    /// Fails with `BadUserInput` if a requested column is missing.
    pub fn reordered(&self, order: &[String]) -> FederationResult<Self> {
        let columns = order
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .find(|c| &c.name == name)
                    .cloned()
                    .ok_or_else(|| {
                        FederationError::bad_user_input(format!(
                            "Column '{}' does not exist",
                            name
                        ))
                    })
            })
            .collect::<FederationResult<Vec<_>>>()?;
        Ok(Self { columns })
    }
}

/// A table known to a node: its parsed name, its schema and (through the name) its type
///
/// The type is derived from the name, so the two can never disagree. A wire
/// payload that carries a `type` conflicting with the name is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: TableName,
    pub schema: TableSchema,
}

#[derive(Serialize, Deserialize)]
struct TableInfoWire {
    name: String,
    schema: TableSchema,
    #[serde(rename = "type")]
    table_type: TableType,
}

impl TableInfo {
    pub fn new(name: TableName, schema: TableSchema) -> Self {
        Self { name, schema }
    }

    pub fn table_type(&self) -> TableType {
        self.name.table_type()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.name.node_id()
    }

    pub fn context_id(&self) -> &str {
        self.name.context_id()
    }

    pub fn command_id(&self) -> &str {
        self.name.command_id()
    }

    pub fn result_id(&self) -> &str {
        self.name.result_id()
    }

    pub fn name_without_node_id(&self) -> String {
        self.name.without_node_id()
    }
}

impl Serialize for TableInfo {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TableInfoWire {
            name: self.name.to_string(),
            schema: self.schema.clone(),
            table_type: self.table_type(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TableInfo {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = TableInfoWire::deserialize(deserializer)?;
        let name = TableName::parse(&wire.name).map_err(serde::de::Error::custom)?;
        if name.table_type() != wire.table_type {
            return Err(serde::de::Error::custom(format!(
                "table '{}' is declared as {} but its name says {}",
                wire.name,
                wire.table_type,
                name.table_type()
            )));
        }
        Ok(Self {
            name,
            schema: wire.schema,
        })
    }
}

/// Rows of a table together with the schema they follow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub name: String,
    pub schema: TableSchema,
    pub rows: Vec<Vec<Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(cols: &[(&str, DType)]) -> TableSchema {
        TableSchema::new(cols.iter().map(|(n, t)| ColumnInfo::new(*n, *t)).collect())
    }

    #[test]
    fn sql_types_map_back() {
        for dtype in [DType::Int, DType::Str, DType::Float, DType::Json, DType::Binary] {
            assert_eq!(DType::from_sql_type(dtype.sql_type()), Some(dtype));
        }
        assert_eq!(DType::from_sql_type("varchar(50)"), Some(DType::Str));
        assert_eq!(DType::from_sql_type(""), None);
    }

    #[test]
    fn schema_equality_is_structural_and_ordered() {
        let a = schema(&[("a", DType::Int), ("b", DType::Str)]);
        let b = schema(&[("a", DType::Int), ("b", DType::Str)]);
        let c = schema(&[("b", DType::Str), ("a", DType::Int)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn reorder_follows_requested_columns() {
        let physical = schema(&[("a", DType::Int), ("b", DType::Str), ("c", DType::Float)]);
        let wanted = physical
            .reordered(&["c".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(wanted.column_names(), vec!["c", "a"]);

        let err = physical.reordered(&["z".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "BadUserInput");
    }

    #[test]
    fn table_info_wire_format_carries_type() {
        let info = TableInfo::new(
            TableName::parse("view_localnode1_ctx_cmd_res").unwrap(),
            schema(&[("x", DType::Float)]),
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "VIEW");
        assert_eq!(json["name"], "view_localnode1_ctx_cmd_res");
        assert_eq!(json["schema"]["columns"][0]["dtype"], "FLOAT");

        let back: TableInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
        assert_eq!(back.name_without_node_id(), "view_ctx_cmd_res");
    }

    #[test]
    fn table_info_rejects_type_that_disagrees_with_name() {
        let json = serde_json::json!({
            "name": "view_localnode1_ctx_cmd_res",
            "schema": {"columns": []},
            "type": "MERGE"
        });
        assert!(serde_json::from_value::<TableInfo>(json).is_err());
    }
}
