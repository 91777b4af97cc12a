// SPDX-License-Identifier: Apache-2.0

//! SQL injection guard
//!
//! Every operation that interpolates caller-supplied strings into SQL declares,
//! once, which [`Check`] applies to each of its parameters. The declaration is
//! verified against the operation's parameter list when the guard is attached,
//! so a forgotten or misspelled parameter fails at construction time. At call
//! time [`SqlInjectionGuard::check`] rejects any argument its predicate refuses
//! with `InvalidSQLParameter`, before anything reaches the database.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::error::{FederationError, FederationResult};
use crate::tables::filters::FilterNode;
use crate::tables::schema::TableSchema;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid regex"));

static DATAMODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*:[a-z0-9_]+(\.[a-z0-9_]+)?$").expect("valid regex")
});

static PRIMARY_DATA_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^"(?P<dm>[^"]+)"\.(?:(?P<bare>[a-z_][a-z0-9_]*)|"(?P<quoted>[A-Za-z0-9_]+)")$"#)
        .expect("valid regex")
});

static SOCKET_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3}):(\d{1,5})$").expect("valid regex")
});

pub fn is_lowercase_identifier(value: &str) -> bool {
    IDENTIFIER.is_match(value)
}

pub fn is_list_of_identifiers<S: AsRef<str>>(values: &[S]) -> bool {
    values.iter().all(|v| is_lowercase_identifier(v.as_ref()))
}

/// `name:major.minor`, e.g. `dementia:0.1`
pub fn is_datamodel(value: &str) -> bool {
    DATAMODEL.is_match(value)
}

/// A bare identifier, or `"<datamodel>".<identifier>` / `"<datamodel>"."<Name>"`
pub fn is_primary_data_table(value: &str) -> bool {
    if is_lowercase_identifier(value) {
        return true;
    }
    PRIMARY_DATA_TABLE
        .captures(value)
        .and_then(|caps| caps.name("dm"))
        .map(|dm| is_datamodel(dm.as_str()))
        .unwrap_or(false)
}

/// `A.B.C.D:port` with octets 0-255 and a non-zero port, no surrounding whitespace
pub fn is_socket_address(value: &str) -> bool {
    let Some(caps) = SOCKET_ADDRESS.captures(value) else {
        return false;
    };
    let octets_ok = (1..=4).all(|i| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .map(|octet| octet <= 255)
            .unwrap_or(false)
    });
    let port_ok = caps
        .get(5)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(|port| (1..=65535).contains(&port))
        .unwrap_or(false);
    octets_ok && port_ok
}

pub fn is_valid_filter(filter: &FilterNode) -> bool {
    filter
        .referenced_names()
        .into_iter()
        .all(is_lowercase_identifier)
}

/// Rejects any string containing `}` or `;`, looking inside lists and mappings
pub fn is_valid_literal_value(value: &JsonValue) -> bool {
    match value {
        JsonValue::String(s) => is_safe_literal_str(s),
        JsonValue::Array(items) => items.iter().all(is_valid_literal_value),
        JsonValue::Object(map) => map
            .iter()
            .all(|(k, v)| is_safe_literal_str(k) && is_valid_literal_value(v)),
        JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) => true,
    }
}

fn is_safe_literal_str(s: &str) -> bool {
    !s.contains('}') && !s.contains(';')
}

pub fn is_valid_table_schema(schema: &TableSchema) -> bool {
    schema
        .columns
        .iter()
        .all(|c| is_lowercase_identifier(&c.name))
}

/// Named predicate applied to one guarded parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Identifier,
    ListOfIdentifiers,
    Datamodel,
    PrimaryDataTable,
    SocketAddress,
    Filter,
    LiteralValue,
    TableSchema,
}

/// A call-time argument handed to the guard
#[derive(Debug, Clone, Copy)]
pub enum GuardArg<'a> {
    Str(&'a str),
    List(&'a [String]),
    Filter(Option<&'a FilterNode>),
    Literal(&'a JsonValue),
    Schema(&'a TableSchema),
    Flag(bool),
}

impl GuardArg<'_> {
    fn render(&self) -> String {
        match self {
            GuardArg::Str(s) => (*s).to_string(),
            GuardArg::List(items) => format!("[{}]", items.join(", ")),
            GuardArg::Filter(Some(f)) => serde_json::to_string(f).unwrap_or_default(),
            GuardArg::Filter(None) => "null".to_string(),
            GuardArg::Literal(v) => v.to_string(),
            GuardArg::Schema(s) => format!("[{}]", s.column_names().join(", ")),
            GuardArg::Flag(b) => b.to_string(),
        }
    }
}

impl Check {
    pub fn accepts(&self, arg: &GuardArg<'_>) -> bool {
        match (self, arg) {
            (Check::Identifier, GuardArg::Str(s)) => is_lowercase_identifier(s),
            (Check::ListOfIdentifiers, GuardArg::List(items)) => is_list_of_identifiers(items),
            (Check::Datamodel, GuardArg::Str(s)) => is_datamodel(s),
            (Check::PrimaryDataTable, GuardArg::Str(s)) => is_primary_data_table(s),
            (Check::SocketAddress, GuardArg::Str(s)) => is_socket_address(s),
            (Check::Filter, GuardArg::Filter(f)) => f.map(is_valid_filter).unwrap_or(true),
            (Check::LiteralValue, GuardArg::Literal(v)) => is_valid_literal_value(v),
            (Check::LiteralValue, GuardArg::Str(s)) => is_safe_literal_str(s),
            (Check::LiteralValue, GuardArg::List(items)) => {
                items.iter().all(|s| is_safe_literal_str(s))
            }
            (Check::TableSchema, GuardArg::Schema(s)) => is_valid_table_schema(s),
            _ => false,
        }
    }
}

/// Mis-declared guard, reported when the guard is attached
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardSetupError {
    #[error("Operation '{operation}' has no validator declared for parameter '{parameter}'")]
    MissingValidator {
        operation: &'static str,
        parameter: &'static str,
    },

    #[error("Operation '{operation}' declares a validator for unknown parameter '{parameter}'")]
    UnknownParameter {
        operation: &'static str,
        parameter: &'static str,
    },
}

/// Validator table for one operation
#[derive(Debug, Clone)]
pub struct SqlInjectionGuard {
    operation: &'static str,
    validators: HashMap<&'static str, Option<Check>>,
}

impl SqlInjectionGuard {
    /// Binds `validators` to an operation taking `params`
    ///
    /// The keys of `validators` must match `params` exactly. A `None` validator
    /// marks a parameter that carries no injection risk (e.g. a boolean flag).
    pub fn attach(
        operation: &'static str,
        params: &[&'static str],
        validators: &[(&'static str, Option<Check>)],
    ) -> Result<Self, GuardSetupError> {
        for param in params {
            if !validators.iter().any(|(name, _)| name == param) {
                return Err(GuardSetupError::MissingValidator {
                    operation,
                    parameter: param,
                });
            }
        }
        for (name, _) in validators {
            if !params.contains(name) {
                return Err(GuardSetupError::UnknownParameter {
                    operation,
                    parameter: name,
                });
            }
        }

        Ok(Self {
            operation,
            validators: validators.iter().copied().collect(),
        })
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Validates call-time arguments, failing on the first rejected one
    pub fn check(&self, args: &[(&str, GuardArg<'_>)]) -> FederationResult<()> {
        for (name, arg) in args {
            match self.validators.get(name) {
                Some(None) => {}
                Some(Some(check)) => {
                    if !check.accepts(arg) {
                        tracing::warn!(
                            operation = self.operation,
                            parameter = %name,
                            "Rejected SQL parameter"
                        );
                        return Err(FederationError::invalid_parameter(*name, arg.render()));
                    }
                }
                None => {
                    return Err(FederationError::invalid_parameter(
                        *name,
                        format!("undeclared parameter of '{}'", self.operation),
                    ))
                }
            }
        }
        Ok(())
    }
}
