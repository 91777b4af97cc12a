//! UDF argument DTOs
//!
//! The arguments handed to (and returned from) the UDF code generator. Each
//! argument is a closed variant discriminated by an explicit `type` tag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{FederationError, FederationResult};
use crate::guard::{is_valid_literal_value, is_valid_table_schema};
use crate::smpc::SmpcTablesInfo;
use crate::tables::schema::TableInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum WorkerUdfArgument {
    #[serde(rename = "LITERAL")]
    Literal(JsonValue),
    #[serde(rename = "TABLE")]
    Table(TableInfo),
    #[serde(rename = "SMPC")]
    Smpc(SmpcTablesInfo),
}

impl WorkerUdfArgument {
    pub fn tag(&self) -> &'static str {
        match self {
            WorkerUdfArgument::Literal(_) => "LITERAL",
            WorkerUdfArgument::Table(_) => "TABLE",
            WorkerUdfArgument::Smpc(_) => "SMPC",
        }
    }

    /// Every table this argument refers to
    pub fn tables(&self) -> Vec<&TableInfo> {
        match self {
            WorkerUdfArgument::Literal(_) => Vec::new(),
            WorkerUdfArgument::Table(table) => vec![table],
            WorkerUdfArgument::Smpc(smpc) => smpc.tables().into_iter().map(|(_, t)| t).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerUdfPosArguments {
    pub args: Vec<WorkerUdfArgument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerUdfKeyArguments {
    pub args: BTreeMap<String, WorkerUdfArgument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerUdfResults {
    pub results: Vec<WorkerUdfArgument>,
}

/// Rejects literals that could break out of generated SQL and tables with unsafe column names
pub fn validate_udf_arguments<'a>(
    args: impl IntoIterator<Item = (&'a str, &'a WorkerUdfArgument)>,
) -> FederationResult<()> {
    for (name, arg) in args {
        if let WorkerUdfArgument::Literal(value) = arg {
            if !is_valid_literal_value(value) {
                return Err(FederationError::invalid_parameter(name, value.to_string()));
            }
        }
        for table in arg.tables() {
            if !is_valid_table_schema(&table.schema) {
                return Err(FederationError::invalid_parameter(
                    name,
                    table.name.to_string(),
                ));
            }
        }
    }
    Ok(())
}

impl WorkerUdfPosArguments {
    pub fn validate(&self) -> FederationResult<()> {
        let names: Vec<String> = (0..self.args.len()).map(|i| format!("arg{}", i)).collect();
        validate_udf_arguments(names.iter().map(String::as_str).zip(self.args.iter()))
    }
}

impl WorkerUdfKeyArguments {
    pub fn validate(&self) -> FederationResult<()> {
        validate_udf_arguments(self.args.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::naming::TableName;
    use crate::tables::schema::{ColumnInfo, DType, TableSchema};
    use serde_json::json;

    fn table(name: &str, column: &str) -> TableInfo {
        TableInfo::new(
            TableName::parse(name).unwrap(),
            TableSchema::new(vec![ColumnInfo::new(column, DType::Float)]),
        )
    }

    #[test]
    fn variants_carry_explicit_type_tag() {
        let args = WorkerUdfPosArguments {
            args: vec![
                WorkerUdfArgument::Literal(json!(5)),
                WorkerUdfArgument::Table(table("view_localnode1_ctx_cmd_res", "x")),
            ],
        };
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["args"][0]["type"], "LITERAL");
        assert_eq!(json["args"][0]["value"], 5);
        assert_eq!(json["args"][1]["type"], "TABLE");
        assert_eq!(json["args"][1]["value"]["type"], "VIEW");

        let back: WorkerUdfPosArguments = serde_json::from_value(json).unwrap();
        assert_eq!(back, args);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let raw = json!({"type": "PANDAS", "value": 1});
        assert!(serde_json::from_value::<WorkerUdfArgument>(raw).is_err());
    }

    #[test]
    fn smpc_argument_exposes_its_tables() {
        let arg = WorkerUdfArgument::Smpc(SmpcTablesInfo {
            template: table("normal_globalnode_ctx_cmd_a", "t"),
            sum_op: Some(table("normal_globalnode_ctx_cmd_b", "s")),
            min_op: None,
            max_op: None,
        });
        assert_eq!(arg.tag(), "SMPC");
        assert_eq!(arg.tables().len(), 2);
    }

    #[test]
    fn validation_rejects_injected_literals() {
        let mut args = WorkerUdfKeyArguments::default();
        args.args
            .insert("alpha".into(), WorkerUdfArgument::Literal(json!({"k": [1, 2]})));
        assert!(args.validate().is_ok());

        args.args
            .insert("beta".into(), WorkerUdfArgument::Literal(json!(["x; DROP TABLE t"])));
        let err = args.validate().unwrap_err();
        assert_eq!(err.kind(), "InvalidSQLParameter");
        assert!(err.to_string().contains("beta"));
    }

    #[test]
    fn validation_rejects_unsafe_table_columns() {
        let args = WorkerUdfPosArguments {
            args: vec![WorkerUdfArgument::Table(table(
                "view_localnode1_ctx_cmd_res",
                "Bad Column",
            ))],
        };
        assert_eq!(args.validate().unwrap_err().kind(), "InvalidSQLParameter");
    }
}
