//! SMPC coordination
//!
//! Secure aggregation may only start once every local node contributed the
//! same template. This module does not aggregate anything itself; it gates.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::types::Value;
use crate::error::{FederationError, FederationResult};
use crate::tables::manager::TableManager;
use crate::tables::schema::TableInfo;

/// Which aggregation a table instance feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmpcRole {
    Template,
    SumOp,
    MinOp,
    MaxOp,
}

impl SmpcRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmpcRole::Template => "template",
            SmpcRole::SumOp => "sum_op",
            SmpcRole::MinOp => "min_op",
            SmpcRole::MaxOp => "max_op",
        }
    }
}

/// The tables one SMPC operation instance is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmpcTablesInfo {
    pub template: TableInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_op: Option<TableInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_op: Option<TableInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_op: Option<TableInfo>,
}

impl SmpcTablesInfo {
    /// Present tables keyed by role, template first
    pub fn tables(&self) -> Vec<(SmpcRole, &TableInfo)> {
        let mut tables = vec![(SmpcRole::Template, &self.template)];
        let ops = [
            (SmpcRole::SumOp, &self.sum_op),
            (SmpcRole::MinOp, &self.min_op),
            (SmpcRole::MaxOp, &self.max_op),
        ];
        for (role, table) in ops {
            if let Some(table) = table {
                tables.push((role, table));
            }
        }
        tables
    }

    /// The aggregations this instance requests
    pub fn operations(&self) -> Vec<SmpcRole> {
        self.tables()
            .into_iter()
            .map(|(role, _)| role)
            .filter(|role| *role != SmpcRole::Template)
            .collect()
    }
}

/// Checks that every contributed template equals the first one
pub fn validate_templates_match(templates: &[Value]) -> FederationResult<()> {
    let Some((first, rest)) = templates.split_first() else {
        return Err(FederationError::bad_user_input(
            "No SMPC templates were contributed",
        ));
    };

    if let Some(other) = rest.iter().find(|t| *t != first) {
        return Err(FederationError::SmpcTemplatesMismatch {
            first: render(first),
            other: render(other),
        });
    }
    Ok(())
}

/// Reads the first column of `table_name` and validates the templates in it
pub async fn validate_smpc_templates_match(
    tables: &TableManager,
    table_name: &str,
) -> FederationResult<()> {
    let data = tables.get_table_data(table_name).await?;
    let templates: Vec<Value> = data
        .rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .collect();

    match validate_templates_match(&templates) {
        Ok(()) => {
            info!(table = %table_name, templates = templates.len(), "SMPC templates match");
            Ok(())
        }
        Err(e) => {
            warn!(table = %table_name, error = %e, "SMPC template validation failed");
            Err(e)
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
