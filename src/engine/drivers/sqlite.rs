// SPDX-License-Identifier: Apache-2.0

//! SQLite Driver
//!
//! Implements the NodeDatabase trait for SQLite databases using SQLx.
//!
//! ## SQLite Specifics
//!
//! - SQLite is a file-based database, so the configured path is the database file
//! - Supports `:memory:` for in-memory databases
//! - Uses WAL mode so a global node can read a local node's file while it is written
//! - Single namespace per file (no schema switching); qualified names are flattened
//!   before they reach the driver
//!
//! ## Connection Handling
//!
//! A node owns exactly one shared connection. The pool is pinned to a single
//! connection that never expires, which also keeps in-memory databases, TEMP
//! views and ATTACHed databases alive for the lifetime of the node.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row, TypeInfo};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::NodeDatabase;
use crate::engine::types::{ColumnMeta, QueryResult, Relation, RelationKind, Row as QRow, Value};

const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const BUSY_TIMEOUT_SECS: u64 = 30;

/// SQLite driver bound to one database file (or `:memory:`)
pub struct SqliteDatabase {
    pool: SqlitePool,
    db_path: String,
    attached: Mutex<HashSet<String>>,
}

impl SqliteDatabase {
    /// Opens the database with the default acquire timeout
    pub async fn connect(path: &str) -> EngineResult<Self> {
        Self::connect_with_timeout(path, DEFAULT_ACQUIRE_TIMEOUT_SECS).await
    }

    #[instrument(skip_all, fields(path = %path))]
    pub async fn connect_with_timeout(path: &str, acquire_timeout_secs: u64) -> EngineResult<Self> {
        Self::validate_path(path)?;
        let opts = Self::build_connect_options(path)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
            .connect_with(opts)
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(EngineError::from_sqlx)?;

        debug!("SQLite database opened");
        Ok(Self {
            pool,
            db_path: path.to_string(),
            attached: Mutex::new(HashSet::new()),
        })
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Closes the shared connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn build_connect_options(path: &str) -> EngineResult<SqliteConnectOptions> {
        let conn_str = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}", path)
        };

        let opts = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| EngineError::connection_failed(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS));

        if path == ":memory:" {
            Ok(opts)
        } else {
            Ok(opts.journal_mode(SqliteJournalMode::Wal))
        }
    }

    /// Validates the SQLite database path
    fn validate_path(path: &str) -> EngineResult<()> {
        let path = path.trim();

        if path == ":memory:" {
            return Ok(());
        }

        if path.is_empty() {
            return Err(EngineError::connection_failed(
                "SQLite path cannot be empty.".to_string(),
            ));
        }

        if path.contains("://") {
            return Err(EngineError::connection_failed(format!(
                "Invalid SQLite path format: {}",
                path
            )));
        }

        Ok(())
    }

    /// Helper to bind a Value to a SQLite query
    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
            Value::Json(j) => query.bind(j.to_string()),
        }
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(sqlite_row: &SqliteRow) -> QRow {
        let values: Vec<Value> = sqlite_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(sqlite_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a SqliteRow at the given index
    ///
    /// SQLite has dynamic typing, so we try multiple types in order of likelihood
    fn extract_value(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }

        Value::Null
    }

    /// Gets column info from a SqliteRow
    fn get_column_info(row: &SqliteRow) -> Vec<ColumnMeta> {
        row.columns()
            .iter()
            .map(|col| ColumnMeta {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl NodeDatabase for SqliteDatabase {
    fn driver_id(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self), level = "debug")]
    async fn execute(&self, sql: &str) -> EngineResult<QueryResult> {
        self.execute_with_params(sql, &[]).await
    }

    async fn execute_with_params(&self, sql: &str, params: &[Value]) -> EngineResult<QueryResult> {
        let start = Instant::now();

        let mut query = sqlx::query(sql);
        for param in params {
            query = Self::bind_param(query, param);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(EngineError::from_sqlx)?;

        let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
        Ok(QueryResult::with_affected_rows(
            result.rows_affected(),
            execution_time_ms,
        ))
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch(&self, sql: &str) -> EngineResult<QueryResult> {
        let start = Instant::now();

        let sqlite_rows: Vec<SqliteRow> = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::from_sqlx)?;

        let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;

        let columns = sqlite_rows
            .first()
            .map(Self::get_column_info)
            .unwrap_or_default();
        let rows: Vec<QRow> = sqlite_rows.iter().map(Self::convert_row).collect();

        Ok(QueryResult {
            columns,
            rows,
            affected_rows: None,
            execution_time_ms,
        })
    }

    async fn list_relations(&self) -> EngineResult<Vec<Relation>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT name, type, 0 FROM sqlite_master
            WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
            UNION ALL
            SELECT name, type, 1 FROM sqlite_temp_master
            WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
            ORDER BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::from_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|(name, obj_type, temporary)| Relation {
                name,
                kind: if obj_type == "view" {
                    RelationKind::View
                } else {
                    RelationKind::Table
                },
                temporary: temporary != 0,
            })
            .collect())
    }

    async fn describe(&self, relation: &str) -> EngineResult<Vec<ColumnMeta>> {
        let sql = format!("PRAGMA table_info({})", self.quote_ident(relation));
        let rows: Vec<SqliteRow> = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(EngineError::from_sqlx)?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("name").map_err(EngineError::from_sqlx)?;
                let data_type: String = row.try_get("type").map_err(EngineError::from_sqlx)?;
                Ok(ColumnMeta { name, data_type })
            })
            .collect()
    }

    #[instrument(skip(self, path), fields(alias = %alias))]
    async fn attach(&self, alias: &str, path: &str) -> EngineResult<()> {
        let mut attached = self.attached.lock().await;
        if attached.contains(alias) {
            return Ok(());
        }

        let sql = format!("ATTACH DATABASE ? AS {}", self.quote_ident(alias));
        sqlx::query(&sql)
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(EngineError::from_sqlx)?;

        attached.insert(alias.to_string());
        debug!("Attached remote database");
        Ok(())
    }
}
