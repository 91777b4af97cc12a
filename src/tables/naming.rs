//! Table identity
//!
//! A table's name is the single source of truth for who owns it: it encodes the
//! table type, the owning node, the context (algorithm run), the command (step)
//! and a unique result id:
//!
//! ```text
//! {type}_{node_id}_{context_id}_{command_id}_{result_id}
//! {type}_{context_id}_{command_id}_{result_id}
//! ```
//!
//! Every component is a non-empty run of `[a-z0-9]`, so splitting on `_` is
//! unambiguous. [`TableName::parse`] is the only place names are taken apart.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FederationError, FederationResult};

/// Kind of relation a table name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableType {
    Normal,
    View,
    Merge,
    Remote,
}

impl TableType {
    /// Dependency order used when dropping a context: dependents first
    pub const CLEANUP_ORDER: [TableType; 4] = [
        TableType::Merge,
        TableType::Remote,
        TableType::View,
        TableType::Normal,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            TableType::Normal => "normal",
            TableType::View => "view",
            TableType::Merge => "merge",
            TableType::Remote => "remote",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "normal" => Some(TableType::Normal),
            "view" => Some(TableType::View),
            "merge" => Some(TableType::Merge),
            "remote" => Some(TableType::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableType::Normal => "NORMAL",
            TableType::View => "VIEW",
            TableType::Merge => "MERGE",
            TableType::Remote => "REMOTE",
        };
        f.write_str(name)
    }
}

/// Parsed form of a node-side table name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    table_type: TableType,
    node_id: Option<String>,
    context_id: String,
    command_id: String,
    result_id: String,
}

impl TableName {
    /// Allocates a fresh name with a random result id
    pub fn generate(
        table_type: TableType,
        node_id: &str,
        context_id: &str,
        command_id: &str,
    ) -> FederationResult<Self> {
        let result_id = Uuid::new_v4().simple().to_string();
        Self::from_parts(
            table_type,
            Some(node_id),
            context_id,
            command_id,
            &result_id,
        )
    }

    pub fn from_parts(
        table_type: TableType,
        node_id: Option<&str>,
        context_id: &str,
        command_id: &str,
        result_id: &str,
    ) -> FederationResult<Self> {
        let name = Self {
            table_type,
            node_id: node_id.map(str::to_string),
            context_id: context_id.to_string(),
            command_id: command_id.to_string(),
            result_id: result_id.to_string(),
        };
        let rendered = name.to_string();
        for (label, value) in name.components() {
            check_component(&rendered, label, value)?;
        }
        Ok(name)
    }

    /// Parses a table name, rejecting anything that is not in canonical form
    pub fn parse(name: &str) -> FederationResult<Self> {
        let parts: Vec<&str> = name.split('_').collect();
        let (prefix, node_id, rest) = match parts.as_slice() {
            [prefix, node, ctx, cmd, res] => (*prefix, Some(*node), [*ctx, *cmd, *res]),
            [prefix, ctx, cmd, res] => (*prefix, None, [*ctx, *cmd, *res]),
            _ => {
                return Err(FederationError::invalid_table_name(
                    name,
                    format!("expected 4 or 5 '_' separated parts, found {}", parts.len()),
                ))
            }
        };

        let table_type = TableType::from_prefix(prefix).ok_or_else(|| {
            FederationError::invalid_table_name(name, format!("unknown table type '{}'", prefix))
        })?;

        let [context_id, command_id, result_id] = rest;
        Self::from_parts(table_type, node_id, context_id, command_id, result_id)
    }

    /// Same identity, different relation type (used for remote tables on the global node)
    pub fn with_type(&self, table_type: TableType) -> Self {
        Self {
            table_type,
            ..self.clone()
        }
    }

    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    pub fn result_id(&self) -> &str {
        &self.result_id
    }

    /// The 4-field form, as exchanged with consumers that do not track owners
    pub fn without_node_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.table_type.prefix(),
            self.context_id,
            self.command_id,
            self.result_id
        )
    }

    fn components(&self) -> Vec<(&'static str, &str)> {
        let mut components = Vec::with_capacity(4);
        if let Some(node_id) = &self.node_id {
            components.push(("node_id", node_id.as_str()));
        }
        components.push(("context_id", self.context_id.as_str()));
        components.push(("command_id", self.command_id.as_str()));
        components.push(("result_id", self.result_id.as_str()));
        components
    }
}

fn check_component(name: &str, label: &str, value: &str) -> FederationResult<()> {
    if value.is_empty() {
        return Err(FederationError::invalid_table_name(
            name,
            format!("{} is empty", label),
        ));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err(FederationError::invalid_table_name(
            name,
            format!("{} '{}' must contain only [a-z0-9]", label, value),
        ));
    }
    Ok(())
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(
                f,
                "{}_{}_{}_{}_{}",
                self.table_type.prefix(),
                node_id,
                self.context_id,
                self.command_id,
                self.result_id
            ),
            None => f.write_str(&self.without_node_id()),
        }
    }
}

impl FromStr for TableName {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TableName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TableName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_part_names_roundtrip() {
        let raw = "view_localnode1_ctx42_cmd7_0a1b2c";
        let name = TableName::parse(raw).unwrap();
        assert_eq!(name.table_type(), TableType::View);
        assert_eq!(name.node_id(), Some("localnode1"));
        assert_eq!(name.context_id(), "ctx42");
        assert_eq!(name.command_id(), "cmd7");
        assert_eq!(name.result_id(), "0a1b2c");
        assert_eq!(name.to_string(), raw);
        assert_eq!(name.without_node_id(), "view_ctx42_cmd7_0a1b2c");
    }

    #[test]
    fn four_part_names_roundtrip() {
        let raw = "merge_ctx1_cmd2_res3";
        let name: TableName = raw.parse().unwrap();
        assert_eq!(name.table_type(), TableType::Merge);
        assert_eq!(name.node_id(), None);
        assert_eq!(name.to_string(), raw);
    }

    #[test]
    fn generated_names_parse_back() {
        let name = TableName::generate(TableType::Normal, "globalnode", "abc", "1").unwrap();
        let parsed = TableName::parse(&name.to_string()).unwrap();
        assert_eq!(parsed, name);
        assert_eq!(parsed.result_id().len(), 32);
    }

    #[test]
    fn malformed_names_are_rejected() {
        for raw in [
            "view_ctx_cmd",
            "table_ctx_cmd_res",
            "view_Node_ctx_cmd_res",
            "view_node_ctx_cmd_",
            "view_node_ctx_cmd_res_extra",
            "view_node_c-x_cmd_res",
            "\"dementia:0.1\".primary_data",
        ] {
            let err = TableName::parse(raw).unwrap_err();
            assert_eq!(err.kind(), "InvalidTableName", "accepted {}", raw);
        }
    }

    #[test]
    fn with_type_keeps_identity() {
        let view = TableName::parse("view_localnode1_ctx_cmd_res").unwrap();
        let remote = view.with_type(TableType::Remote);
        assert_eq!(remote.to_string(), "remote_localnode1_ctx_cmd_res");
        assert_eq!(remote.context_id(), view.context_id());
    }

    #[test]
    fn serde_uses_plain_string() {
        let name = TableName::parse("normal_n1_ctx_cmd_res").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"normal_n1_ctx_cmd_res\"");
        assert!(serde_json::from_str::<TableName>("\"bogus\"").is_err());
    }

    #[test]
    fn table_type_display_and_prefix() {
        assert_eq!(TableType::Merge.to_string(), "MERGE");
        assert_eq!(TableType::Merge.prefix(), "merge");
        assert_eq!(
            serde_json::to_string(&TableType::Remote).unwrap(),
            "\"REMOTE\""
        );
    }
}
