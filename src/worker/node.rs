//! Worker node
//!
//! Owns one database, the table manager over it and the data models loaded into
//! it, and executes [`TaskRequest`]s against them.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{info, instrument};

use crate::engine::types::Value;
use crate::error::{FederationError, FederationResult};
use crate::observability::instrument_task;
use crate::protocol::{
    NodeInfo, Task, TaskOutput, TaskReply, TaskRequest, WorkerInfo, WorkerUdfKeyArguments,
    WorkerUdfPosArguments,
};
use crate::registry::data_model::DataModelMetadata;
use crate::smpc::validate_smpc_templates_match;
use crate::tables::filters::{Condition, FilterNode, FilterOperator, FilterRule};
use crate::tables::manager::{primary_data_table, TableManager};
use crate::tables::naming::{TableName, TableType};
use crate::tables::schema::TableInfo;
use crate::worker::loader::{parse_csv, primary_data_schema, DATASET_COLUMN, ROW_ID};

pub const PRIMARY_DATA: &str = "primary_data";

#[derive(Debug, Clone)]
struct LoadedDataModel {
    metadata: DataModelMetadata,
    datasets: Vec<String>,
}

/// Arguments of a data model view request
#[derive(Debug, Clone)]
pub struct DataModelViewRequest<'a> {
    pub context_id: &'a str,
    pub command_id: &'a str,
    pub data_model: &'a str,
    pub datasets: &'a [String],
    pub columns: &'a [String],
    pub filters: Option<&'a FilterNode>,
    pub dropna: bool,
    pub check_min_rows: bool,
}

pub struct WorkerNode {
    info: WorkerInfo,
    tables: TableManager,
    data_models: RwLock<BTreeMap<String, LoadedDataModel>>,
}

impl WorkerNode {
    pub fn new(info: WorkerInfo, tables: TableManager) -> Self {
        Self {
            info,
            tables,
            data_models: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn info(&self) -> &WorkerInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn tables(&self) -> &TableManager {
        &self.tables
    }

    /// Capability info: identity plus the datasets held per data model
    pub fn node_info(&self) -> NodeInfo {
        let datasets_per_data_model = self
            .data_models
            .read()
            .iter()
            .map(|(key, loaded)| (key.clone(), loaded.datasets.clone()))
            .collect();
        NodeInfo {
            worker: self.info.clone(),
            datasets_per_data_model,
        }
    }

    pub fn data_model_metadata(&self, data_model: &str) -> FederationResult<DataModelMetadata> {
        self.data_models
            .read()
            .get(data_model)
            .map(|loaded| loaded.metadata.clone())
            .ok_or_else(|| self.data_model_unavailable(data_model))
    }

    /// (Re)creates the primary data table of `metadata` and loads the CSV files into it
    ///
    /// Returns the datasets present afterwards.
    #[instrument(skip(self, metadata, csvs), fields(node_id = %self.info.id, data_model = %metadata.data_model()))]
    pub async fn load_data_model(
        &self,
        metadata: DataModelMetadata,
        csvs: &[PathBuf],
    ) -> FederationResult<Vec<String>> {
        let data_model = metadata.data_model();
        let table = primary_data_table(&data_model, PRIMARY_DATA);
        let relation = format!("{}.{}", data_model, PRIMARY_DATA);
        let schema = primary_data_schema(&metadata)?;
        let db = self.tables.database();

        db.execute(&format!("DROP TABLE IF EXISTS {}", db.quote_ident(&relation)))
            .await?;
        let columns = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", db.quote_ident(&c.name), c.dtype.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        db.execute(&format!(
            "CREATE TABLE {} ({})",
            db.quote_ident(&relation),
            columns
        ))
        .await?;

        let mut next_row_id = 0;
        for csv in csvs {
            let raw = tokio::fs::read_to_string(csv).await.map_err(|e| {
                FederationError::bad_user_input(format!("Cannot read {}: {}", csv.display(), e))
            })?;
            let rows = parse_csv(&raw, &schema, next_row_id)?;
            next_row_id += rows.len() as i64;
            let inserted = self.tables.insert_data_to_table(&table, &rows).await?;
            info!(file = %csv.display(), rows = inserted, "Loaded CSV");
        }

        let result = db
            .fetch(&format!(
                "SELECT DISTINCT {} FROM {} WHERE {} IS NOT NULL ORDER BY 1",
                db.quote_ident(DATASET_COLUMN),
                db.quote_ident(&relation),
                db.quote_ident(DATASET_COLUMN)
            ))
            .await?;
        let datasets: Vec<String> = result
            .rows
            .into_iter()
            .filter_map(|row| row.values.into_iter().next())
            .filter_map(|value| match value {
                Value::Text(s) => Some(s),
                _ => None,
            })
            .collect();

        info!(datasets = ?datasets, "Data model loaded");
        self.data_models.write().insert(
            data_model,
            LoadedDataModel {
                metadata,
                datasets: datasets.clone(),
            },
        );
        Ok(datasets)
    }

    /// Creates a privacy-checked view over the primary data of a data model
    ///
    /// Only `row_id` and the requested columns are projected, restricted to the
    /// requested datasets. With `dropna`, rows with a NULL in any requested
    /// column are left out.
    pub async fn create_data_model_view(
        &self,
        request: DataModelViewRequest<'_>,
    ) -> FederationResult<TableInfo> {
        {
            let data_models = self.data_models.read();
            let loaded = data_models
                .get(request.data_model)
                .ok_or_else(|| self.data_model_unavailable(request.data_model))?;
            if let Some(missing) = request
                .datasets
                .iter()
                .find(|d| !loaded.datasets.contains(d))
            {
                return Err(FederationError::DatasetUnavailable {
                    worker_id: self.info.id.clone(),
                    dataset: missing.clone(),
                });
            }
        }
        if request.datasets.is_empty() {
            return Err(FederationError::bad_user_input(
                "At least one dataset must be requested",
            ));
        }

        let mut columns = vec![ROW_ID.to_string()];
        columns.extend(request.columns.iter().filter(|c| *c != ROW_ID).cloned());

        let mut rules = vec![rule(
            DATASET_COLUMN,
            FilterOperator::In,
            json!(request.datasets),
        )];
        if request.dropna {
            rules.extend(
                request
                    .columns
                    .iter()
                    .map(|c| rule(c, FilterOperator::IsNotNull, serde_json::Value::Null)),
            );
        }
        if let Some(user_filter) = request.filters {
            rules.push(user_filter.clone());
        }
        let filter = FilterNode::Group {
            condition: Condition::And,
            rules,
        };

        let view_name = TableName::generate(
            TableType::View,
            &self.info.id,
            request.context_id,
            request.command_id,
        )?;
        self.tables
            .create_view(
                &view_name,
                &primary_data_table(request.data_model, PRIMARY_DATA),
                &columns,
                Some(&filter),
                request.check_min_rows,
            )
            .await
    }

    /// Executes one task and wraps the outcome for the wire
    pub async fn handle(&self, request: TaskRequest) -> TaskReply {
        let request_id = match request.require_request_id() {
            Ok(id) => id.to_string(),
            Err(e) => return TaskReply::from(Err::<TaskOutput, _>(e)),
        };
        let task_name = request.task.name();
        let result = instrument_task(
            task_name,
            &request_id,
            &self.info.id,
            self.execute(request.task),
        )
        .await;
        TaskReply::from(result)
    }

    async fn execute(&self, task: Task) -> FederationResult<TaskOutput> {
        let output = match task {
            Task::GetNodeInfo => TaskOutput::NodeInfo(self.node_info()),
            Task::GetDataModelCdes { data_model } => {
                TaskOutput::DataModelMetadata(self.data_model_metadata(&data_model)?)
            }
            Task::CreateTable {
                context_id,
                command_id,
                schema,
            } => TaskOutput::Table(
                self.tables
                    .create_table(&context_id, &command_id, &schema)
                    .await?,
            ),
            Task::InsertDataToTable { table_name, rows } => TaskOutput::Inserted(
                self.tables.insert_data_to_table(&table_name, &rows).await?,
            ),
            Task::CreateView {
                context_id,
                command_id,
                table_name,
                columns,
                filters,
                check_min_rows,
            } => {
                let view_name =
                    TableName::generate(TableType::View, &self.info.id, &context_id, &command_id)?;
                TaskOutput::Table(
                    self.tables
                        .create_view(
                            &view_name,
                            &table_name,
                            &columns,
                            filters.as_ref(),
                            check_min_rows,
                        )
                        .await?,
                )
            }
            Task::CreateDataModelView {
                context_id,
                command_id,
                data_model,
                datasets,
                columns,
                filters,
                dropna,
                check_min_rows,
            } => TaskOutput::Table(
                self.create_data_model_view(DataModelViewRequest {
                    context_id: &context_id,
                    command_id: &command_id,
                    data_model: &data_model,
                    datasets: &datasets,
                    columns: &columns,
                    filters: filters.as_ref(),
                    dropna,
                    check_min_rows,
                })
                .await?,
            ),
            Task::CreateRemoteTable {
                table_info,
                db_socket_address,
            } => TaskOutput::Table(
                self.tables
                    .create_remote_table(&table_info, &db_socket_address)
                    .await?,
            ),
            Task::CreateMergeTable {
                context_id,
                command_id,
                table_names,
            } => TaskOutput::Table(
                self.tables
                    .create_merge_table(&context_id, &command_id, &table_names)
                    .await?,
            ),
            Task::GetTables {
                table_type,
                context_id,
            } => TaskOutput::TableNames(self.tables.get_tables(table_type, &context_id).await?),
            Task::GetTableSchema { table_name } => {
                TaskOutput::Schema(self.tables.get_table_schema(&table_name).await?)
            }
            Task::GetTableData { table_name } => {
                TaskOutput::Data(self.tables.get_table_data(&table_name).await?)
            }
            Task::CleanUp { context_id } => {
                TaskOutput::CleanedUp(self.tables.clean_up(&context_id).await?)
            }
            Task::ValidateSmpcTemplatesMatch { table_name } => {
                validate_smpc_templates_match(&self.tables, &table_name).await?;
                TaskOutput::Done
            }
            Task::ValidateUdfArguments {
                positional,
                keyword,
            } => {
                self.check_udf_arguments(&positional, &keyword).await?;
                TaskOutput::Done
            }
        };
        Ok(output)
    }

    /// Vets UDF arguments before execution: literals and schemas must be safe,
    /// and every argument table owned by this node must exist
    async fn check_udf_arguments(
        &self,
        positional: &WorkerUdfPosArguments,
        keyword: &WorkerUdfKeyArguments,
    ) -> FederationResult<()> {
        positional.validate()?;
        keyword.validate()?;

        let mut missing = Vec::new();
        let tables = positional
            .args
            .iter()
            .chain(keyword.args.values())
            .flat_map(|arg| arg.tables());
        for table in tables.filter(|t| t.node_id() == Some(self.info.id.as_str())) {
            let name = table.name.to_string();
            match self.tables.get_table_schema(&name).await {
                Ok(_) => {}
                Err(FederationError::TablesNotFound { .. }) => missing.push(name),
                Err(e) => return Err(e),
            }
        }
        if !missing.is_empty() {
            return Err(FederationError::TablesNotFound { tables: missing });
        }
        Ok(())
    }

    fn data_model_unavailable(&self, data_model: &str) -> FederationError {
        FederationError::DataModelUnavailable {
            worker_id: self.info.id.clone(),
            data_model: data_model.to_string(),
        }
    }
}

fn rule(field: &str, operator: FilterOperator, value: serde_json::Value) -> FilterNode {
    FilterNode::Rule(FilterRule {
        id: field.to_string(),
        field: field.to_string(),
        value_type: String::new(),
        input: String::new(),
        operator,
        value,
    })
}
