// SPDX-License-Identifier: Apache-2.0

//! Table Lifecycle Manager
//!
//! Creates, reads and removes the NORMAL, VIEW, MERGE and REMOTE tables of one
//! worker node. Every operation runs its arguments through the operation's
//! [`SqlInjectionGuard`] before any SQL is built.
//!
//! ## Storage mapping
//!
//! - NORMAL: a real table
//! - VIEW: a real view over a NORMAL or primary data table
//! - MERGE: a TEMP view concatenating its members with `UNION ALL`
//! - REMOTE: a TEMP view over a table of another node's database, attached
//!   under an alias derived from that node's db socket address
//!
//! TEMP objects live on the node's single shared connection, which the
//! database facade keeps open for the life of the node.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::engine::error::EngineError;
use crate::engine::traits::NodeDatabase;
use crate::engine::types::{RelationKind, Value};
use crate::error::{FederationError, FederationResult};
use crate::guard::{Check, GuardArg, GuardSetupError, SqlInjectionGuard};
use crate::tables::filters::{build_filter_clause, FilterNode};
use crate::tables::naming::{TableName, TableType};
use crate::tables::schema::{ColumnInfo, DType, TableData, TableInfo, TableSchema};

struct Guards {
    create_table: SqlInjectionGuard,
    insert_data: SqlInjectionGuard,
    create_view: SqlInjectionGuard,
    create_remote_table: SqlInjectionGuard,
    create_merge_table: SqlInjectionGuard,
    get_tables: SqlInjectionGuard,
    read_table: SqlInjectionGuard,
}

impl Guards {
    fn new() -> Result<Self, GuardSetupError> {
        Ok(Self {
            create_table: SqlInjectionGuard::attach(
                "create_table",
                &["context_id", "command_id", "schema"],
                &[
                    ("context_id", Some(Check::Identifier)),
                    ("command_id", Some(Check::Identifier)),
                    ("schema", Some(Check::TableSchema)),
                ],
            )?,
            insert_data: SqlInjectionGuard::attach(
                "insert_data_to_table",
                &["table_name", "rows"],
                &[("table_name", Some(Check::PrimaryDataTable)), ("rows", None)],
            )?,
            create_view: SqlInjectionGuard::attach(
                "create_view",
                &["view_name", "table_name", "columns", "filters", "check_min_rows"],
                &[
                    ("view_name", Some(Check::Identifier)),
                    ("table_name", Some(Check::PrimaryDataTable)),
                    ("columns", Some(Check::ListOfIdentifiers)),
                    ("filters", Some(Check::Filter)),
                    ("check_min_rows", None),
                ],
            )?,
            create_remote_table: SqlInjectionGuard::attach(
                "create_remote_table",
                &["table_name", "schema", "db_socket_address"],
                &[
                    ("table_name", Some(Check::Identifier)),
                    ("schema", Some(Check::TableSchema)),
                    ("db_socket_address", Some(Check::SocketAddress)),
                ],
            )?,
            create_merge_table: SqlInjectionGuard::attach(
                "create_merge_table",
                &["context_id", "command_id", "table_names"],
                &[
                    ("context_id", Some(Check::Identifier)),
                    ("command_id", Some(Check::Identifier)),
                    ("table_names", Some(Check::ListOfIdentifiers)),
                ],
            )?,
            get_tables: SqlInjectionGuard::attach(
                "get_tables",
                &["table_type", "context_id"],
                &[("table_type", None), ("context_id", Some(Check::Identifier))],
            )?,
            read_table: SqlInjectionGuard::attach(
                "read_table",
                &["table_name"],
                &[("table_name", Some(Check::PrimaryDataTable))],
            )?,
        })
    }
}

/// Manages the tables of one worker node's database
pub struct TableManager {
    db: Arc<dyn NodeDatabase>,
    node_id: String,
    minimum_row_count: u64,
    remote_databases: HashMap<String, String>,
    guards: Guards,
}

impl TableManager {
    pub fn new(
        db: Arc<dyn NodeDatabase>,
        node_id: impl Into<String>,
        minimum_row_count: u64,
    ) -> Result<Self, GuardSetupError> {
        Ok(Self {
            db,
            node_id: node_id.into(),
            minimum_row_count,
            remote_databases: HashMap::new(),
            guards: Guards::new()?,
        })
    }

    /// Registers where the database behind each db socket address can be opened
    pub fn with_remote_databases(mut self, remote_databases: HashMap<String, String>) -> Self {
        self.remote_databases = remote_databases;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn minimum_row_count(&self) -> u64 {
        self.minimum_row_count
    }

    pub fn database(&self) -> &Arc<dyn NodeDatabase> {
        &self.db
    }

    #[instrument(skip(self, schema), fields(node_id = %self.node_id))]
    pub async fn create_table(
        &self,
        context_id: &str,
        command_id: &str,
        schema: &TableSchema,
    ) -> FederationResult<TableInfo> {
        self.guards.create_table.check(&[
            ("context_id", GuardArg::Str(context_id)),
            ("command_id", GuardArg::Str(command_id)),
            ("schema", GuardArg::Schema(schema)),
        ])?;

        let name = TableName::generate(TableType::Normal, &self.node_id, context_id, command_id)?;
        let columns = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", self.db.quote_ident(&c.name), c.dtype.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TABLE {} ({})",
            self.db.quote_ident(&name.to_string()),
            columns
        );
        self.db.execute(&sql).await?;

        info!(table = %name, "Created table");
        Ok(TableInfo::new(name, schema.clone()))
    }

    /// Inserts rows positionally, binding every value as a parameter
    pub async fn insert_data_to_table(
        &self,
        table_name: &str,
        rows: &[Vec<Value>],
    ) -> FederationResult<u64> {
        self.guards
            .insert_data
            .check(&[("table_name", GuardArg::Str(table_name))])?;

        let relation = flatten_primary_data_table(table_name);
        let mut inserted = 0;
        for row in rows {
            if row.is_empty() {
                continue;
            }
            let placeholders = vec!["?"; row.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} VALUES ({})",
                self.db.quote_ident(&relation),
                placeholders
            );
            let result = self.db.execute_with_params(&sql, row).await?;
            inserted += result.affected_rows.unwrap_or(0);
        }

        debug!(table = %table_name, rows = inserted, "Inserted rows");
        Ok(inserted)
    }

    /// Creates a filtered projection of `table_name`
    ///
    /// With `check_min_rows`, a view holding fewer rows than the node's minimum row
    /// count is dropped again and `InsufficientDataError` is returned.
    #[instrument(skip(self, columns, filters), fields(node_id = %self.node_id, view = %view_name))]
    pub async fn create_view(
        &self,
        view_name: &TableName,
        table_name: &str,
        columns: &[String],
        filters: Option<&FilterNode>,
        check_min_rows: bool,
    ) -> FederationResult<TableInfo> {
        let view = view_name.to_string();
        self.guards.create_view.check(&[
            ("view_name", GuardArg::Str(&view)),
            ("table_name", GuardArg::Str(table_name)),
            ("columns", GuardArg::List(columns)),
            ("filters", GuardArg::Filter(filters)),
            ("check_min_rows", GuardArg::Flag(check_min_rows)),
        ])?;

        if view_name.table_type() != TableType::View {
            return Err(FederationError::invalid_table_name(
                view,
                "view names must carry the 'view' type",
            ));
        }
        if columns.is_empty() {
            return Err(FederationError::bad_user_input(
                "A view needs at least one column",
            ));
        }

        let mut seen = BTreeSet::new();
        if let Some(duplicate) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(FederationError::bad_user_input(format!(
                "Column '{}' is requested more than once",
                duplicate
            )));
        }

        let source = flatten_primary_data_table(table_name);
        let projection = columns
            .iter()
            .map(|c| self.db.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut query = format!(
            "SELECT {} FROM {}",
            projection,
            self.db.quote_ident(&source)
        );
        if let Some(filter) = filters {
            query.push_str(" WHERE ");
            query.push_str(&build_filter_clause(filter, &|name: &str| {
                self.db.quote_ident(name)
            })?);
        }

        let sql = format!("CREATE VIEW {} AS {}", self.db.quote_ident(&view), query);
        self.db.execute(&sql).await?;

        // No view may outlive a failed creation
        match self
            .checked_view_schema(&view, &query, columns, check_min_rows)
            .await
        {
            Ok(schema) => {
                info!("Created view");
                Ok(TableInfo::new(view_name.clone(), schema))
            }
            Err(e) => {
                if let Err(drop_err) = self.drop_relation(&view, RelationKind::View).await {
                    warn!(error = %drop_err, "Failed to drop rejected view");
                }
                Err(e)
            }
        }
    }

    /// Applies the row floor to a freshly created view and reads its schema back
    async fn checked_view_schema(
        &self,
        view: &str,
        query: &str,
        columns: &[String],
        check_min_rows: bool,
    ) -> FederationResult<TableSchema> {
        if check_min_rows {
            let count = self.count_rows(view).await?;
            if count < self.minimum_row_count {
                warn!(
                    rows = count,
                    minimum = self.minimum_row_count,
                    "Rejected view below the minimum row count"
                );
                return Err(FederationError::InsufficientDataError {
                    message: format!(
                        "The following query returned {} rows, fewer than the minimum row count of {}: {}",
                        count, self.minimum_row_count, query
                    ),
                });
            }
        }

        self.read_schema(view).await?.reordered(columns)
    }

    /// Exposes another node's table on this node without copying rows
    #[instrument(skip(self, table_info), fields(node_id = %self.node_id, table = %table_info.name))]
    pub async fn create_remote_table(
        &self,
        table_info: &TableInfo,
        db_socket_address: &str,
    ) -> FederationResult<TableInfo> {
        let source = table_info.name.to_string();
        self.guards.create_remote_table.check(&[
            ("table_name", GuardArg::Str(&source)),
            ("schema", GuardArg::Schema(&table_info.schema)),
            ("db_socket_address", GuardArg::Str(db_socket_address)),
        ])?;

        let path = self.remote_databases.get(db_socket_address).ok_or_else(|| {
            EngineError::connection_failed(format!(
                "No database is registered for {}",
                db_socket_address
            ))
        })?;
        let alias = remote_alias(db_socket_address);
        self.db.attach(&alias, path).await?;

        let remote_name = table_info.name.with_type(TableType::Remote);
        let columns = table_info
            .schema
            .columns
            .iter()
            .map(|c| self.db.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TEMP VIEW {} AS SELECT {} FROM {}.{}",
            self.db.quote_ident(&remote_name.to_string()),
            columns,
            self.db.quote_ident(&alias),
            self.db.quote_ident(&source)
        );
        self.db.execute(&sql).await?;

        info!(remote = %remote_name, db = %db_socket_address, "Created remote table");
        Ok(TableInfo::new(remote_name, table_info.schema.clone()))
    }

    /// Creates a MERGE table over tables sharing one schema and one type
    #[instrument(skip(self, table_names), fields(node_id = %self.node_id))]
    pub async fn create_merge_table(
        &self,
        context_id: &str,
        command_id: &str,
        table_names: &[String],
    ) -> FederationResult<TableInfo> {
        self.guards.create_merge_table.check(&[
            ("context_id", GuardArg::Str(context_id)),
            ("command_id", GuardArg::Str(command_id)),
            ("table_names", GuardArg::List(table_names)),
        ])?;

        let schema = self.validate_tables_can_be_merged(table_names).await?;

        let name = TableName::generate(TableType::Merge, &self.node_id, context_id, command_id)?;
        let columns = schema
            .columns
            .iter()
            .map(|c| self.db.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let union = table_names
            .iter()
            .map(|t| format!("SELECT {} FROM {}", columns, self.db.quote_ident(t)))
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        let sql = format!(
            "CREATE TEMP VIEW {} AS {}",
            self.db.quote_ident(&name.to_string()),
            union
        );
        self.db.execute(&sql).await?;

        info!(table = %name, members = table_names.len(), "Created merge table");
        Ok(TableInfo::new(name, schema))
    }

    /// Checks existence, then a single table type, then a single schema
    async fn validate_tables_can_be_merged(
        &self,
        table_names: &[String],
    ) -> FederationResult<TableSchema> {
        if table_names.is_empty() {
            return Err(FederationError::bad_user_input(
                "A merge table needs at least one member table",
            ));
        }

        let existing: BTreeSet<String> = self
            .db
            .list_relations()
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        let missing: Vec<String> = table_names
            .iter()
            .filter(|t| !existing.contains(*t))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(FederationError::TablesNotFound { tables: missing });
        }

        let types: BTreeSet<TableType> = table_names
            .iter()
            .map(|t| TableName::parse(t).map(|n| n.table_type()))
            .collect::<FederationResult<_>>()?;
        if types.len() > 1 {
            return Err(FederationError::IncompatibleTableTypes {
                types: types.iter().map(ToString::to_string).collect(),
            });
        }

        let mut schemas = Vec::with_capacity(table_names.len());
        for table in table_names {
            schemas.push(self.read_schema(table).await?);
        }
        let first = &schemas[0];
        if schemas.iter().any(|s| s != first) {
            return Err(FederationError::IncompatibleSchemasMergeException {
                tables: table_names.to_vec(),
            });
        }

        Ok(first.clone())
    }

    /// Names of every table of `table_type` created for `context_id`
    pub async fn get_tables(
        &self,
        table_type: TableType,
        context_id: &str,
    ) -> FederationResult<Vec<String>> {
        self.guards.get_tables.check(&[
            ("table_type", GuardArg::Str(table_type.prefix())),
            ("context_id", GuardArg::Str(context_id)),
        ])?;

        Ok(self
            .context_tables(context_id)
            .await?
            .into_iter()
            .filter(|(name, _)| name.table_type() == table_type)
            .map(|(name, _)| name.to_string())
            .collect())
    }

    pub async fn get_table_schema(&self, table_name: &str) -> FederationResult<TableSchema> {
        self.guards
            .read_table
            .check(&[("table_name", GuardArg::Str(table_name))])?;
        self.read_schema(&flatten_primary_data_table(table_name))
            .await
    }

    pub async fn get_table_data(&self, table_name: &str) -> FederationResult<TableData> {
        self.guards
            .read_table
            .check(&[("table_name", GuardArg::Str(table_name))])?;

        let relation = flatten_primary_data_table(table_name);
        let schema = self.read_schema(&relation).await?;
        let columns = schema
            .columns
            .iter()
            .map(|c| self.db.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let result = self
            .db
            .fetch(&format!(
                "SELECT {} FROM {}",
                columns,
                self.db.quote_ident(&relation)
            ))
            .await?;

        Ok(TableData {
            name: table_name.to_string(),
            schema,
            rows: result.rows.into_iter().map(|r| r.values).collect(),
        })
    }

    /// Drops every table of `context_id`, dependents first
    ///
    /// Cleaning a context with no tables is a no-op.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn clean_up(&self, context_id: &str) -> FederationResult<usize> {
        self.guards.get_tables.check(&[
            ("table_type", GuardArg::Str("all")),
            ("context_id", GuardArg::Str(context_id)),
        ])?;

        let tables = self.context_tables(context_id).await?;
        let mut dropped = 0;
        for table_type in TableType::CLEANUP_ORDER {
            for (name, kind) in tables.iter().filter(|(n, _)| n.table_type() == table_type) {
                self.drop_relation(&name.to_string(), *kind).await?;
                dropped += 1;
            }
        }

        info!(context_id, dropped, "Cleaned up context");
        Ok(dropped)
    }

    async fn context_tables(
        &self,
        context_id: &str,
    ) -> FederationResult<Vec<(TableName, RelationKind)>> {
        let mut tables: Vec<(TableName, RelationKind)> = self
            .db
            .list_relations()
            .await?
            .into_iter()
            .filter_map(|r| TableName::parse(&r.name).ok().map(|n| (n, r.kind)))
            .filter(|(n, _)| n.context_id() == context_id)
            .collect();
        tables.sort_by_key(|(n, _)| n.to_string());
        Ok(tables)
    }

    async fn read_schema(&self, relation: &str) -> FederationResult<TableSchema> {
        let described = self.db.describe(relation).await?;
        if described.is_empty() {
            return Err(FederationError::TablesNotFound {
                tables: vec![relation.to_string()],
            });
        }

        let columns = described
            .into_iter()
            .map(|c| {
                DType::from_sql_type(&c.data_type)
                    .map(|dtype| ColumnInfo::new(c.name.clone(), dtype))
                    .ok_or_else(|| {
                        FederationError::from(EngineError::not_supported(format!(
                            "Column '{}' of '{}' has unsupported type '{}'",
                            c.name, relation, c.data_type
                        )))
                    })
            })
            .collect::<FederationResult<Vec<_>>>()?;
        Ok(TableSchema::new(columns))
    }

    async fn count_rows(&self, relation: &str) -> FederationResult<u64> {
        let result = self
            .db
            .fetch(&format!(
                "SELECT COUNT(*) FROM {}",
                self.db.quote_ident(relation)
            ))
            .await?;
        Ok(result
            .scalar()
            .and_then(Value::as_i64)
            .map(|n| n.max(0) as u64)
            .unwrap_or(0))
    }

    async fn drop_relation(&self, relation: &str, kind: RelationKind) -> FederationResult<()> {
        let keyword = match kind {
            RelationKind::View => "VIEW",
            RelationKind::Table => "TABLE",
        };
        self.db
            .execute(&format!(
                "DROP {} IF EXISTS {}",
                keyword,
                self.db.quote_ident(relation)
            ))
            .await?;
        debug!(relation, "Dropped relation");
        Ok(())
    }
}

/// Primary data table of a data model, in the `"<datamodel>".<table>` form
pub fn primary_data_table(data_model: &str, table: &str) -> String {
    format!("\"{}\".{}", data_model, table)
}

/// Maps `"<datamodel>".<table>` onto the single relation that stores it
pub fn flatten_primary_data_table(table_name: &str) -> String {
    if let Some(rest) = table_name.strip_prefix('"') {
        if let Some((data_model, table)) = rest.split_once("\".") {
            return format!("{}.{}", data_model, table.trim_matches('"'));
        }
    }
    table_name.to_string()
}

/// Attachment alias for the database behind a db socket address
pub fn remote_alias(db_socket_address: &str) -> String {
    let suffix: String = db_socket_address
        .chars()
        .map(|c| if c.is_ascii_digit() { c } else { '_' })
        .collect();
    format!("remote_db_{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::drivers::sqlite::SqliteDatabase;
    use crate::tables::filters::FilterNode;
    use serde_json::json;

    async fn manager(min_rows: u64) -> TableManager {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        TableManager::new(Arc::new(db), "localnode1", min_rows).unwrap()
    }

    fn ab_schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnInfo::new("a", DType::Int),
            ColumnInfo::new("b", DType::Str),
        ])
    }

    async fn table_with_rows(tm: &TableManager, ctx: &str, rows: i64) -> TableInfo {
        let info = tm.create_table(ctx, "cmd1", &ab_schema()).await.unwrap();
        let data: Vec<Vec<Value>> = (0..rows)
            .map(|i| vec![Value::Int(i), Value::Text(format!("row{}", i))])
            .collect();
        tm.insert_data_to_table(&info.name.to_string(), &data)
            .await
            .unwrap();
        info
    }

    #[tokio::test]
    async fn create_table_names_and_types() {
        let tm = manager(0).await;
        let info = tm.create_table("ctx1", "cmd1", &ab_schema()).await.unwrap();

        assert_eq!(info.table_type(), TableType::Normal);
        assert_eq!(info.node_id(), Some("localnode1"));
        assert_eq!(info.context_id(), "ctx1");
        assert_eq!(info.command_id(), "cmd1");

        let schema = tm.get_table_schema(&info.name.to_string()).await.unwrap();
        assert_eq!(schema, ab_schema());
        assert_eq!(
            tm.get_tables(TableType::Normal, "ctx1").await.unwrap(),
            vec![info.name.to_string()]
        );
    }

    #[tokio::test]
    async fn create_table_rejects_bad_column_names() {
        let tm = manager(0).await;
        let schema = TableSchema::new(vec![ColumnInfo::new("a; DROP", DType::Int)]);
        let err = tm.create_table("ctx1", "cmd1", &schema).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidSQLParameter");
    }

    #[tokio::test]
    async fn view_keeps_requested_column_order_and_filters() {
        let tm = manager(0).await;
        let table = table_with_rows(&tm, "ctx1", 3).await;
        let filter: FilterNode = serde_json::from_value(json!({
            "condition": "AND",
            "rules": [{"id": "a", "field": "a", "type": "int", "input": "number",
                       "operator": "greater_or_equal", "value": 1}]
        }))
        .unwrap();

        let view_name = TableName::generate(TableType::View, "localnode1", "ctx1", "cmd2").unwrap();
        let columns = vec!["b".to_string(), "a".to_string()];
        let view = tm
            .create_view(
                &view_name,
                &table.name.to_string(),
                &columns,
                Some(&filter),
                false,
            )
            .await
            .unwrap();

        assert_eq!(view.schema.column_names(), vec!["b", "a"]);
        let data = tm.get_table_data(&view.name.to_string()).await.unwrap();
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.rows[0][0], Value::Text("row1".into()));
    }

    #[tokio::test]
    async fn view_below_threshold_is_rolled_back() {
        let tm = manager(5).await;
        let table = table_with_rows(&tm, "ctx1", 3).await;
        let view_name = TableName::generate(TableType::View, "localnode1", "ctx1", "cmd2").unwrap();

        let err = tm
            .create_view(
                &view_name,
                &table.name.to_string(),
                &["a".to_string()],
                None,
                true,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "InsufficientDataError");
        assert!(err.to_string().contains("minimum row count of 5"));
        assert!(tm.get_tables(TableType::View, "ctx1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn view_over_keyword_columns() {
        let tm = manager(0).await;
        let schema = TableSchema::new(vec![
            ColumnInfo::new("group", DType::Str),
            ColumnInfo::new("order", DType::Int),
        ]);
        let table = tm.create_table("ctx1", "cmd1", &schema).await.unwrap();
        tm.insert_data_to_table(
            &table.name.to_string(),
            &[
                vec![Value::Text("a".into()), Value::Int(1)],
                vec![Value::Text("b".into()), Value::Int(2)],
            ],
        )
        .await
        .unwrap();
        let filter: FilterNode = serde_json::from_value(json!({
            "condition": "AND",
            "rules": [{"id": "group", "field": "group", "type": "string", "input": "text",
                       "operator": "equal", "value": "b"}]
        }))
        .unwrap();

        let view_name = TableName::generate(TableType::View, "localnode1", "ctx1", "cmd2").unwrap();
        let columns = vec!["order".to_string(), "group".to_string()];
        let view = tm
            .create_view(
                &view_name,
                &table.name.to_string(),
                &columns,
                Some(&filter),
                false,
            )
            .await
            .unwrap();

        assert_eq!(view.schema.column_names(), vec!["order", "group"]);
        let data = tm.get_table_data(&view.name.to_string()).await.unwrap();
        assert_eq!(
            data.rows,
            vec![vec![Value::Int(2), Value::Text("b".into())]]
        );
    }

    #[tokio::test]
    async fn view_rejects_duplicate_columns() {
        let tm = manager(0).await;
        let table = table_with_rows(&tm, "ctx1", 3).await;
        let view_name = TableName::generate(TableType::View, "localnode1", "ctx1", "cmd2").unwrap();

        let err = tm
            .create_view(
                &view_name,
                &table.name.to_string(),
                &["a".to_string(), "b".to_string(), "a".to_string()],
                None,
                false,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "BadUserInput");
        assert!(err.to_string().contains("'a'"));
        assert!(tm.get_tables(TableType::View, "ctx1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn view_with_unreadable_schema_is_dropped() {
        let tm = manager(0).await;
        // Columns without a declared type have no DType
        tm.db
            .execute(r#"CREATE TABLE "normal_localnode1_ctx1_cmd1_0" (a, b)"#)
            .await
            .unwrap();
        let view_name = TableName::generate(TableType::View, "localnode1", "ctx1", "cmd2").unwrap();

        let err = tm
            .create_view(
                &view_name,
                "normal_localnode1_ctx1_cmd1_0",
                &["a".to_string()],
                None,
                false,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "Database");
        assert!(tm.get_tables(TableType::View, "ctx1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn view_at_threshold_is_kept() {
        let tm = manager(3).await;
        let table = table_with_rows(&tm, "ctx1", 3).await;
        let view_name = TableName::generate(TableType::View, "localnode1", "ctx1", "cmd2").unwrap();
        tm.create_view(
            &view_name,
            &table.name.to_string(),
            &["a".to_string()],
            None,
            true,
        )
        .await
        .unwrap();
        assert_eq!(
            tm.get_tables(TableType::View, "ctx1").await.unwrap(),
            vec![view_name.to_string()]
        );
    }

    #[tokio::test]
    async fn view_rejects_non_view_name() {
        let tm = manager(0).await;
        let table = table_with_rows(&tm, "ctx1", 1).await;
        let name = TableName::generate(TableType::Normal, "localnode1", "ctx1", "cmd2").unwrap();
        let err = tm
            .create_view(&name, &table.name.to_string(), &["a".to_string()], None, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidTableName");
    }

    #[tokio::test]
    async fn merge_table_unions_members() {
        let tm = manager(0).await;
        let t1 = table_with_rows(&tm, "ctx1", 2).await;
        let t2 = table_with_rows(&tm, "ctx1", 3).await;

        let merge = tm
            .create_merge_table(
                "ctx1",
                "cmd9",
                &[t1.name.to_string(), t2.name.to_string()],
            )
            .await
            .unwrap();

        assert_eq!(merge.table_type(), TableType::Merge);
        assert_eq!(merge.schema, ab_schema());
        let data = tm.get_table_data(&merge.name.to_string()).await.unwrap();
        assert_eq!(data.rows.len(), 5);
    }

    #[tokio::test]
    async fn merge_rejects_schema_mismatch_without_creating_anything() {
        let tm = manager(0).await;
        let t1 = table_with_rows(&tm, "ctx1", 1).await;
        let wider = TableSchema::new(vec![
            ColumnInfo::new("a", DType::Int),
            ColumnInfo::new("b", DType::Str),
            ColumnInfo::new("c", DType::Float),
        ]);
        let t2 = tm.create_table("ctx1", "cmd1", &wider).await.unwrap();

        let err = tm
            .create_merge_table(
                "ctx1",
                "cmd9",
                &[t1.name.to_string(), t2.name.to_string()],
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "IncompatibleSchemasMergeException");
        assert!(tm.get_tables(TableType::Merge, "ctx1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_rejects_mixed_types() {
        let tm = manager(0).await;
        let t1 = table_with_rows(&tm, "ctx1", 1).await;
        let view_name = TableName::generate(TableType::View, "localnode1", "ctx1", "cmd2").unwrap();
        let columns = vec!["a".to_string(), "b".to_string()];
        let view = tm
            .create_view(&view_name, &t1.name.to_string(), &columns, None, false)
            .await
            .unwrap();

        let err = tm
            .create_merge_table(
                "ctx1",
                "cmd9",
                &[t1.name.to_string(), view.name.to_string()],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "IncompatibleTableTypes");
        assert!(err.to_string().contains("NORMAL"));
        assert!(err.to_string().contains("VIEW"));
    }

    #[tokio::test]
    async fn merge_reports_missing_tables() {
        let tm = manager(0).await;
        let err = tm
            .create_merge_table("ctx1", "cmd9", &["normal_localnode1_ctx1_cmd1_abc".to_string()])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FederationError::TablesNotFound {
                tables: vec!["normal_localnode1_ctx1_cmd1_abc".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn clean_up_is_idempotent_and_scoped_to_context() {
        let tm = manager(0).await;
        let t1 = table_with_rows(&tm, "ctx1", 2).await;
        let other = table_with_rows(&tm, "ctx2", 2).await;
        let view_name = TableName::generate(TableType::View, "localnode1", "ctx1", "cmd2").unwrap();
        let view = tm
            .create_view(&view_name, &t1.name.to_string(), &["a".to_string()], None, false)
            .await
            .unwrap();
        tm.create_merge_table("ctx1", "cmd3", &[view.name.to_string()])
            .await
            .unwrap();

        assert_eq!(tm.clean_up("ctx1").await.unwrap(), 3);
        assert_eq!(tm.clean_up("ctx1").await.unwrap(), 0);
        assert_eq!(tm.clean_up("neverused").await.unwrap(), 0);

        for table_type in TableType::CLEANUP_ORDER {
            assert!(tm.get_tables(table_type, "ctx1").await.unwrap().is_empty());
        }
        assert_eq!(
            tm.get_tables(TableType::Normal, "ctx2").await.unwrap(),
            vec![other.name.to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_table_is_not_found() {
        let tm = manager(0).await;
        let err = tm
            .get_table_schema("normal_localnode1_ctx_cmd_missing")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TablesNotFound");
    }

    #[test]
    fn primary_data_tables_flatten() {
        let name = primary_data_table("dementia:0.1", "primary_data");
        assert_eq!(name, "\"dementia:0.1\".primary_data");
        assert_eq!(flatten_primary_data_table(&name), "dementia:0.1.primary_data");
        assert_eq!(
            flatten_primary_data_table("\"dm:0.1\".\"Data_Table\""),
            "dm:0.1.Data_Table"
        );
        assert_eq!(flatten_primary_data_table("plain"), "plain");
    }

    #[test]
    fn remote_alias_is_an_identifier() {
        assert_eq!(remote_alias("127.0.0.1:50001"), "remote_db_127_0_0_1_50001");
    }
}
