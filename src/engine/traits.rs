//! NodeDatabase trait definition
//!
//! This is the narrow `execute / fetch` seam between the table lifecycle
//! manager and the physical database a worker node owns. SQL handed to it is
//! assumed to have already passed the injection guard.

use async_trait::async_trait;

use crate::engine::error::EngineResult;
use crate::engine::types::{ColumnMeta, QueryResult, Relation, Value};

/// Core trait for the database attached to one worker node
#[async_trait]
pub trait NodeDatabase: Send + Sync {
    /// Returns the unique identifier for this driver (e.g., "sqlite")
    fn driver_id(&self) -> &'static str;

    /// Executes a statement that returns no rows
    async fn execute(&self, sql: &str) -> EngineResult<QueryResult>;

    /// Executes a statement with positional parameters bound in order
    async fn execute_with_params(&self, sql: &str, params: &[Value]) -> EngineResult<QueryResult>;

    /// Executes a query and returns all of its rows
    async fn fetch(&self, sql: &str) -> EngineResult<QueryResult>;

    /// Lists every table and view, including temporary ones
    async fn list_relations(&self) -> EngineResult<Vec<Relation>>;

    /// Returns the column names and declared types of a table or view, in order
    ///
    /// An unknown relation yields an empty list rather than an error.
    async fn describe(&self, relation: &str) -> EngineResult<Vec<ColumnMeta>>;

    /// Makes another database file reachable under `alias`
    ///
    /// Attaching an alias that is already attached is a no-op.
    async fn attach(&self, alias: &str, path: &str) -> EngineResult<()>;

    /// Quotes an identifier for this dialect
    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Formats a string literal for this dialect
    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }
}
