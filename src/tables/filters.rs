//! Filter trees and their compilation to SQL
//!
//! Filters arrive as JSON trees in the query-builder format: a node is either a
//! rule `{id, field, type, input, operator, value}` or a group
//! `{condition: "AND" | "OR", rules: [...]}`. Field names must already have passed
//! the identifier guard; values are rendered as SQL literals here.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{FederationError, FederationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    And,
    Or,
}

impl Condition {
    fn keyword(&self) -> &'static str {
        match self {
            Condition::And => "AND",
            Condition::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: String,
    pub field: String,
    #[serde(rename = "type", default)]
    pub value_type: String,
    #[serde(default)]
    pub input: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group {
        condition: Condition,
        rules: Vec<FilterNode>,
    },
    Rule(FilterRule),
}

impl FilterNode {
    /// Every column name referenced by the tree (`id` and `field` of each rule)
    pub fn referenced_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterNode::Group { rules, .. } => {
                for rule in rules {
                    rule.collect_names(out);
                }
            }
            FilterNode::Rule(rule) => {
                out.push(rule.id.as_str());
                out.push(rule.field.as_str());
            }
        }
    }
}

/// Compiles a filter tree into a SQL boolean expression
///
/// Every column name goes through `quote_ident`; values become literals.
pub fn build_filter_clause(
    node: &FilterNode,
    quote_ident: &dyn Fn(&str) -> String,
) -> FederationResult<String> {
    match node {
        FilterNode::Group { condition, rules } => {
            if rules.is_empty() {
                return Err(FederationError::bad_user_input(
                    "Filter group must contain at least one rule",
                ));
            }
            let parts = rules
                .iter()
                .map(|rule| build_filter_clause(rule, quote_ident))
                .collect::<FederationResult<Vec<_>>>()?;
            Ok(format!(
                "({})",
                parts.join(&format!(" {} ", condition.keyword()))
            ))
        }
        FilterNode::Rule(rule) => build_rule(rule, quote_ident),
    }
}

fn build_rule(
    rule: &FilterRule,
    quote_ident: &dyn Fn(&str) -> String,
) -> FederationResult<String> {
    let column = quote_ident(&rule.field);
    let clause = match rule.operator {
        FilterOperator::Equal => format!("{} = {}", column, scalar(rule)?),
        FilterOperator::NotEqual => format!("{} <> {}", column, scalar(rule)?),
        FilterOperator::Less => format!("{} < {}", column, scalar(rule)?),
        FilterOperator::Greater => format!("{} > {}", column, scalar(rule)?),
        FilterOperator::LessOrEqual => format!("{} <= {}", column, scalar(rule)?),
        FilterOperator::GreaterOrEqual => format!("{} >= {}", column, scalar(rule)?),
        FilterOperator::Between | FilterOperator::NotBetween => {
            let bounds = list(rule)?;
            let [low, high] = bounds.as_slice() else {
                return Err(FederationError::bad_user_input(format!(
                    "Filter on '{}' needs exactly two bounds",
                    rule.field
                )));
            };
            let keyword = if rule.operator == FilterOperator::Between {
                "BETWEEN"
            } else {
                "NOT BETWEEN"
            };
            format!("{} {} {} AND {}", column, keyword, low, high)
        }
        FilterOperator::IsNull => format!("{} IS NULL", column),
        FilterOperator::IsNotNull => format!("{} IS NOT NULL", column),
        FilterOperator::In | FilterOperator::NotIn => {
            let values = list(rule)?;
            if values.is_empty() {
                return Err(FederationError::bad_user_input(format!(
                    "Filter on '{}' needs at least one value",
                    rule.field
                )));
            }
            let keyword = if rule.operator == FilterOperator::In {
                "IN"
            } else {
                "NOT IN"
            };
            format!("{} {} ({})", column, keyword, values.join(", "))
        }
    };
    Ok(clause)
}

fn scalar(rule: &FilterRule) -> FederationResult<String> {
    sql_literal(&rule.value).ok_or_else(|| {
        FederationError::bad_user_input(format!(
            "Filter on '{}' has an unsupported value: {}",
            rule.field, rule.value
        ))
    })
}

fn list(rule: &FilterRule) -> FederationResult<Vec<String>> {
    let JsonValue::Array(items) = &rule.value else {
        return Err(FederationError::bad_user_input(format!(
            "Filter on '{}' expects a list value",
            rule.field
        )));
    };
    items
        .iter()
        .map(|item| {
            sql_literal(item).ok_or_else(|| {
                FederationError::bad_user_input(format!(
                    "Filter on '{}' has an unsupported value: {}",
                    rule.field, item
                ))
            })
        })
        .collect()
}

/// Renders a JSON scalar as a SQL literal; strings use `'` doubling
pub fn sql_literal(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => Some("NULL".to_string()),
        JsonValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: JsonValue) -> FilterNode {
        serde_json::from_value(value).unwrap()
    }

    fn compile(node: &FilterNode) -> FederationResult<String> {
        build_filter_clause(node, &|name: &str| format!("\"{}\"", name))
    }

    #[test]
    fn nested_groups_compile() {
        let filter = parse(json!({
            "condition": "AND",
            "rules": [
                {
                    "condition": "OR",
                    "rules": [
                        {"id": "col1", "field": "col1", "type": "int", "input": "number",
                         "operator": "equal", "value": 3},
                        {"id": "col3", "field": "col3", "type": "string", "input": "text",
                         "operator": "not_equal", "value": "it's"}
                    ]
                },
                {"id": "col2", "field": "col2", "type": "double", "input": "number",
                 "operator": "between", "value": [0.1, 0.25]}
            ],
            "valid": true
        }));

        assert_eq!(
            compile(&filter).unwrap(),
            r#"(("col1" = 3 OR "col3" <> 'it''s') AND "col2" BETWEEN 0.1 AND 0.25)"#
        );
    }

    #[test]
    fn every_operator_renders() {
        let cases = [
            ("less", json!(1), r#""x" < 1"#),
            ("greater", json!(1), r#""x" > 1"#),
            ("less_or_equal", json!(1), r#""x" <= 1"#),
            ("greater_or_equal", json!(1), r#""x" >= 1"#),
            ("not_between", json!([1, 2]), r#""x" NOT BETWEEN 1 AND 2"#),
            ("is_null", JsonValue::Null, r#""x" IS NULL"#),
            ("is_not_null", JsonValue::Null, r#""x" IS NOT NULL"#),
            ("in", json!(["a", "b"]), r#""x" IN ('a', 'b')"#),
            ("not_in", json!([1, 2, 3]), r#""x" NOT IN (1, 2, 3)"#),
        ];
        for (op, value, expected) in cases {
            let rule = parse(json!({
                "id": "x", "field": "x", "type": "int", "input": "number",
                "operator": op, "value": value
            }));
            assert_eq!(compile(&rule).unwrap(), expected, "{}", op);
        }
    }

    #[test]
    fn keyword_columns_are_quoted() {
        let rule = parse(json!({
            "id": "group", "field": "group", "type": "string", "input": "text",
            "operator": "equal", "value": "a"
        }));
        assert_eq!(compile(&rule).unwrap(), r#""group" = 'a'"#);
    }

    #[test]
    fn malformed_values_are_user_errors() {
        let between = parse(json!({
            "id": "x", "field": "x", "type": "int", "input": "number",
            "operator": "between", "value": [1]
        }));
        assert_eq!(compile(&between).unwrap_err().kind(), "BadUserInput");

        let nested = parse(json!({
            "id": "x", "field": "x", "type": "int", "input": "number",
            "operator": "equal", "value": {"a": 1}
        }));
        assert_eq!(compile(&nested).unwrap_err().kind(), "BadUserInput");

        let empty = FilterNode::Group {
            condition: Condition::Or,
            rules: vec![],
        };
        assert!(compile(&empty).is_err());
    }

    #[test]
    fn referenced_names_walks_the_tree() {
        let filter = parse(json!({
            "condition": "OR",
            "rules": [
                {"id": "a", "field": "a", "type": "int", "input": "number",
                 "operator": "is_null"},
                {"condition": "AND", "rules": [
                    {"id": "b", "field": "b", "type": "int", "input": "number",
                     "operator": "is_not_null"}
                ]}
            ]
        }));
        assert_eq!(filter.referenced_names(), vec!["a", "a", "b", "b"]);
    }
}
