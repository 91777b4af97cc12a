//! Request-scoped task dispatch
//!
//! A [`RequestScope`] can only be obtained with a request id, so every remote
//! operation carries one and a missing id fails before anything is sent. Each
//! helper checks that the worker answered with the output its task produces.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::controller::transport::WorkerTransport;
use crate::engine::types::Value;
use crate::error::{FederationError, FederationResult};
use crate::protocol::{
    NodeInfo, Task, TaskOutput, TaskRequest, WorkerInfo, WorkerUdfKeyArguments,
    WorkerUdfPosArguments,
};
use crate::registry::data_model::DataModelMetadata;
use crate::tables::filters::FilterNode;
use crate::tables::naming::TableType;
use crate::tables::schema::{TableData, TableInfo, TableSchema};

/// Arguments of a data model view, as sent to one local node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModelViewArgs {
    pub context_id: String,
    pub command_id: String,
    pub data_model: String,
    pub datasets: Vec<String>,
    pub columns: Vec<String>,
    pub filters: Option<FilterNode>,
    pub dropna: bool,
    pub check_min_rows: bool,
}

pub struct TaskDispatcher {
    transport: Arc<dyn WorkerTransport>,
    timeout: Duration,
}

impl TaskDispatcher {
    pub fn new(transport: Arc<dyn WorkerTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Opens a scope for `request_id`
    ///
    /// A missing or blank id is `RequestIDNotFound`.
    pub fn for_request(&self, request_id: Option<&str>) -> FederationResult<RequestScope<'_>> {
        let request_id = request_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(FederationError::RequestIDNotFound)?;
        Ok(RequestScope {
            dispatcher: self,
            request_id: request_id.to_string(),
        })
    }
}

fn unexpected(task: &str, output: &TaskOutput) -> FederationError {
    FederationError::UnexpectedReply {
        task: task.to_string(),
        reply: output.kind().to_string(),
    }
}

macro_rules! expect_output {
    ($task:expr, $output:expr, $variant:ident) => {
        match $output {
            TaskOutput::$variant(value) => Ok(value),
            other => Err(unexpected($task, &other)),
        }
    };
}

pub struct RequestScope<'a> {
    dispatcher: &'a TaskDispatcher,
    request_id: String,
}

impl RequestScope<'_> {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    async fn send(&self, socket_addr: &str, task: Task) -> FederationResult<TaskOutput> {
        let name = task.name();
        debug!(request_id = %self.request_id, %socket_addr, task = name, "Dispatching task");
        let request = TaskRequest::new(self.request_id.clone(), task);
        self.dispatcher
            .transport
            .send(socket_addr, &request, self.dispatcher.timeout)
            .await
    }

    pub async fn get_node_info(&self, socket_addr: &str) -> FederationResult<NodeInfo> {
        let output = self.send(socket_addr, Task::GetNodeInfo).await?;
        expect_output!("get_node_info", output, NodeInfo)
    }

    pub async fn get_data_model_cdes(
        &self,
        worker: &WorkerInfo,
        data_model: &str,
    ) -> FederationResult<DataModelMetadata> {
        let task = Task::GetDataModelCdes {
            data_model: data_model.to_string(),
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("get_data_model_cdes", output, DataModelMetadata)
    }

    pub async fn create_table(
        &self,
        worker: &WorkerInfo,
        context_id: &str,
        command_id: &str,
        schema: TableSchema,
    ) -> FederationResult<TableInfo> {
        let task = Task::CreateTable {
            context_id: context_id.to_string(),
            command_id: command_id.to_string(),
            schema,
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("create_table", output, Table)
    }

    pub async fn insert_data_to_table(
        &self,
        worker: &WorkerInfo,
        table_name: &str,
        rows: Vec<Vec<Value>>,
    ) -> FederationResult<u64> {
        let task = Task::InsertDataToTable {
            table_name: table_name.to_string(),
            rows,
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("insert_data_to_table", output, Inserted)
    }

    pub async fn create_data_model_view(
        &self,
        worker: &WorkerInfo,
        args: DataModelViewArgs,
    ) -> FederationResult<TableInfo> {
        let task = Task::CreateDataModelView {
            context_id: args.context_id,
            command_id: args.command_id,
            data_model: args.data_model,
            datasets: args.datasets,
            columns: args.columns,
            filters: args.filters,
            dropna: args.dropna,
            check_min_rows: args.check_min_rows,
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("create_data_model_view", output, Table)
    }

    /// Exposes `table_info` (owned by the node behind `db_socket_address`) on `worker`
    pub async fn create_remote_table(
        &self,
        worker: &WorkerInfo,
        table_info: &TableInfo,
        db_socket_address: &str,
    ) -> FederationResult<TableInfo> {
        let task = Task::CreateRemoteTable {
            table_info: table_info.clone(),
            db_socket_address: db_socket_address.to_string(),
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("create_remote_table", output, Table)
    }

    pub async fn create_merge_table(
        &self,
        worker: &WorkerInfo,
        context_id: &str,
        command_id: &str,
        table_names: Vec<String>,
    ) -> FederationResult<TableInfo> {
        let task = Task::CreateMergeTable {
            context_id: context_id.to_string(),
            command_id: command_id.to_string(),
            table_names,
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("create_merge_table", output, Table)
    }

    pub async fn get_tables(
        &self,
        worker: &WorkerInfo,
        table_type: TableType,
        context_id: &str,
    ) -> FederationResult<Vec<String>> {
        let task = Task::GetTables {
            table_type,
            context_id: context_id.to_string(),
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("get_tables", output, TableNames)
    }

    pub async fn get_table_schema(
        &self,
        worker: &WorkerInfo,
        table_name: &str,
    ) -> FederationResult<TableSchema> {
        let task = Task::GetTableSchema {
            table_name: table_name.to_string(),
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("get_table_schema", output, Schema)
    }

    pub async fn get_table_data(
        &self,
        worker: &WorkerInfo,
        table_name: &str,
    ) -> FederationResult<TableData> {
        let task = Task::GetTableData {
            table_name: table_name.to_string(),
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("get_table_data", output, Data)
    }

    pub async fn clean_up(&self, worker: &WorkerInfo, context_id: &str) -> FederationResult<usize> {
        let task = Task::CleanUp {
            context_id: context_id.to_string(),
        };
        let output = self.send(&worker.socket_addr(), task).await?;
        expect_output!("clean_up", output, CleanedUp)
    }

    /// Gate for secure aggregation: fails unless every template row matches
    pub async fn validate_smpc_templates_match(
        &self,
        worker: &WorkerInfo,
        table_name: &str,
    ) -> FederationResult<()> {
        let task = Task::ValidateSmpcTemplatesMatch {
            table_name: table_name.to_string(),
        };
        match self.send(&worker.socket_addr(), task).await? {
            TaskOutput::Done => Ok(()),
            other => Err(unexpected("validate_smpc_templates_match", &other)),
        }
    }

    /// Has the worker vet UDF arguments against its own tables
    pub async fn validate_udf_arguments(
        &self,
        worker: &WorkerInfo,
        positional: WorkerUdfPosArguments,
        keyword: WorkerUdfKeyArguments,
    ) -> FederationResult<()> {
        let task = Task::ValidateUdfArguments {
            positional,
            keyword,
        };
        match self.send(&worker.socket_addr(), task).await? {
            TaskOutput::Done => Ok(()),
            other => Err(unexpected("validate_udf_arguments", &other)),
        }
    }
}
