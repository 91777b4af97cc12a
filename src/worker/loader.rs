//! Primary data loading
//!
//! A data model's primary data table has a `row_id` column followed by one column
//! per CDE. CSV files are mapped onto it by header name; absent columns and empty
//! cells load as NULL.

use crate::engine::types::Value;
use crate::error::{FederationError, FederationResult};
use crate::guard::is_lowercase_identifier;
use crate::registry::data_model::DataModelMetadata;
use crate::tables::schema::{ColumnInfo, DType, TableSchema};

pub const ROW_ID: &str = "row_id";
pub const DATASET_COLUMN: &str = "dataset";

/// Column layout of the primary data table for `metadata`
pub fn primary_data_schema(metadata: &DataModelMetadata) -> FederationResult<TableSchema> {
    let mut columns = vec![ColumnInfo::new(ROW_ID, DType::Int)];

    for (code, cde) in metadata.flatten_variables() {
        if code == ROW_ID {
            continue;
        }
        if !is_lowercase_identifier(&code) {
            return Err(FederationError::invalid_parameter("cde", code));
        }
        let dtype = DType::from_cde_sql_type(&cde.sql_type).ok_or_else(|| {
            FederationError::bad_user_input(format!(
                "CDE '{}' of '{}' has unsupported sql_type '{}'",
                code,
                metadata.data_model(),
                cde.sql_type
            ))
        })?;
        columns.push(ColumnInfo::new(code, dtype));
    }

    if !columns.iter().any(|c| c.name == DATASET_COLUMN) {
        columns.push(ColumnInfo::new(DATASET_COLUMN, DType::Str));
    }
    Ok(TableSchema::new(columns))
}

fn parse_cell(raw: &str, dtype: DType, column: &str) -> FederationResult<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Null);
    }

    let invalid = || {
        FederationError::bad_user_input(format!(
            "Value '{}' of column '{}' is not a valid {}",
            raw, column, dtype
        ))
    };
    match dtype {
        DType::Int => raw
            .parse::<i64>()
            .or_else(|_| {
                raw.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
                    .ok_or(())
            })
            .map(Value::Int)
            .map_err(|_| invalid()),
        DType::Float => raw.parse::<f64>().map(Value::Float).map_err(|_| invalid()),
        DType::Json => serde_json::from_str(raw)
            .map(Value::Json)
            .map_err(|_| invalid()),
        DType::Str | DType::Binary => Ok(Value::Text(raw.to_string())),
    }
}

/// Parses CSV text into rows laid out as `schema`, numbering rows from `first_row_id`
pub fn parse_csv(
    raw: &str,
    schema: &TableSchema,
    first_row_id: i64,
) -> FederationResult<Vec<Vec<Value>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(raw.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| FederationError::bad_user_input(format!("Unreadable CSV header: {}", e)))?
        .clone();

    // Position of each schema column in the CSV record
    let mut positions: Vec<Option<usize>> = vec![None; schema.columns.len()];
    for (index, header) in headers.iter().enumerate() {
        let column = schema
            .columns
            .iter()
            .position(|c| c.name == header)
            .filter(|&p| schema.columns[p].name != ROW_ID)
            .ok_or_else(|| {
                FederationError::bad_user_input(format!(
                    "CSV column '{}' is not part of the data model",
                    header
                ))
            })?;
        positions[column] = Some(index);
    }

    let mut rows = Vec::new();
    for (offset, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| FederationError::bad_user_input(format!("Unreadable CSV row: {}", e)))?;

        let mut row = Vec::with_capacity(schema.columns.len());
        for (column, position) in schema.columns.iter().zip(&positions) {
            let value = if column.name == ROW_ID {
                Value::Int(first_row_id + offset as i64)
            } else {
                match position.and_then(|p| record.get(p)) {
                    Some(cell) => parse_cell(cell, column.dtype, &column.name)?,
                    None => Value::Null,
                }
            };
            row.push(value);
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::data_model::parse_data_model_metadata;

    const METADATA: &str = r#"{
        "code": "demo", "version": "0.1", "label": "Demo",
        "variables": [
            {"code": "dataset", "label": "Dataset", "sql_type": "text", "isCategorical": true,
             "enumerations": [{"code": "d1", "label": "D1"}]}
        ],
        "groups": [{"code": "g", "label": "G", "variables": [
            {"code": "x", "label": "X", "sql_type": "real", "isCategorical": false},
            {"code": "y", "label": "Y", "sql_type": "int", "isCategorical": false}
        ]}]
    }"#;

    #[test]
    fn schema_starts_with_row_id() {
        let schema = primary_data_schema(&parse_data_model_metadata(METADATA).unwrap()).unwrap();
        assert_eq!(schema.column_names(), vec!["row_id", "dataset", "x", "y"]);
        assert_eq!(schema.columns[2].dtype, DType::Float);
        assert_eq!(schema.columns[3].dtype, DType::Int);
    }

    #[test]
    fn dataset_column_is_added_when_missing() {
        let mut metadata = parse_data_model_metadata(METADATA).unwrap();
        metadata.variables.clear();
        let schema = primary_data_schema(&metadata).unwrap();
        assert_eq!(schema.column_names(), vec!["row_id", "x", "y", "dataset"]);
    }

    #[test]
    fn unsafe_cde_code_is_rejected() {
        let mut metadata = parse_data_model_metadata(METADATA).unwrap();
        metadata.variables[0].code = "data set".into();
        assert_eq!(
            primary_data_schema(&metadata).unwrap_err().kind(),
            "InvalidSQLParameter"
        );
    }

    #[test]
    fn csv_rows_follow_schema_order() {
        let schema = primary_data_schema(&parse_data_model_metadata(METADATA).unwrap()).unwrap();
        let raw = "y,x,dataset\n3,1.5,d1\n,2.0,d1\n4.0,,d1\n";
        let rows = parse_csv(raw, &schema, 10).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            vec![
                Value::Int(10),
                Value::Text("d1".into()),
                Value::Float(1.5),
                Value::Int(3)
            ]
        );
        assert_eq!(rows[1][3], Value::Null);
        assert_eq!(rows[2][0], Value::Int(12));
        assert_eq!(rows[2][2], Value::Null);
        assert_eq!(rows[2][3], Value::Int(4));
    }

    #[test]
    fn unknown_csv_column_is_rejected() {
        let schema = primary_data_schema(&parse_data_model_metadata(METADATA).unwrap()).unwrap();
        let err = parse_csv("dataset,z\nd1,1\n", &schema, 0).unwrap_err();
        assert_eq!(err.kind(), "BadUserInput");
    }

    #[test]
    fn malformed_number_is_rejected() {
        let schema = primary_data_schema(&parse_data_model_metadata(METADATA).unwrap()).unwrap();
        let err = parse_csv("dataset,y\nd1,abc\n", &schema, 0).unwrap_err();
        assert!(err.to_string().contains("abc"));
    }
}
