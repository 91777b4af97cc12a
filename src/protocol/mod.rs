//! Worker task protocol
//!
//! Every remote operation is a [`TaskRequest`]: a caller-supplied request id plus
//! one [`Task`] variant. Workers answer with a [`TaskReply`], which is either the
//! task output or the error envelope of a [`FederationError`].

pub mod node_info;
pub mod udf;

use serde::{Deserialize, Serialize};

use crate::engine::types::Value;
use crate::error::{ErrorEnvelope, FederationError, FederationResult};
use crate::registry::data_model::DataModelMetadata;
use crate::tables::filters::FilterNode;
use crate::tables::naming::TableType;
use crate::tables::schema::{TableData, TableInfo, TableSchema};

pub use node_info::{NodeInfo, NodeRole, WorkerInfo};
pub use udf::{
    validate_udf_arguments, WorkerUdfArgument, WorkerUdfKeyArguments, WorkerUdfPosArguments,
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "args", rename_all = "snake_case")]
pub enum Task {
    GetNodeInfo,
    GetDataModelCdes {
        data_model: String,
    },
    CreateTable {
        context_id: String,
        command_id: String,
        schema: TableSchema,
    },
    InsertDataToTable {
        table_name: String,
        rows: Vec<Vec<Value>>,
    },
    CreateView {
        context_id: String,
        command_id: String,
        table_name: String,
        columns: Vec<String>,
        #[serde(default)]
        filters: Option<FilterNode>,
        #[serde(default)]
        check_min_rows: bool,
    },
    CreateDataModelView {
        context_id: String,
        command_id: String,
        data_model: String,
        datasets: Vec<String>,
        columns: Vec<String>,
        #[serde(default)]
        filters: Option<FilterNode>,
        #[serde(default = "default_true")]
        dropna: bool,
        #[serde(default = "default_true")]
        check_min_rows: bool,
    },
    CreateRemoteTable {
        table_info: TableInfo,
        db_socket_address: String,
    },
    CreateMergeTable {
        context_id: String,
        command_id: String,
        table_names: Vec<String>,
    },
    GetTables {
        table_type: TableType,
        context_id: String,
    },
    GetTableSchema {
        table_name: String,
    },
    GetTableData {
        table_name: String,
    },
    CleanUp {
        context_id: String,
    },
    ValidateSmpcTemplatesMatch {
        table_name: String,
    },
    ValidateUdfArguments {
        #[serde(default)]
        positional: WorkerUdfPosArguments,
        #[serde(default)]
        keyword: WorkerUdfKeyArguments,
    },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::GetNodeInfo => "get_node_info",
            Task::GetDataModelCdes { .. } => "get_data_model_cdes",
            Task::CreateTable { .. } => "create_table",
            Task::InsertDataToTable { .. } => "insert_data_to_table",
            Task::CreateView { .. } => "create_view",
            Task::CreateDataModelView { .. } => "create_data_model_view",
            Task::CreateRemoteTable { .. } => "create_remote_table",
            Task::CreateMergeTable { .. } => "create_merge_table",
            Task::GetTables { .. } => "get_tables",
            Task::GetTableSchema { .. } => "get_table_schema",
            Task::GetTableData { .. } => "get_table_data",
            Task::CleanUp { .. } => "clean_up",
            Task::ValidateSmpcTemplatesMatch { .. } => "validate_smpc_templates_match",
            Task::ValidateUdfArguments { .. } => "validate_udf_arguments",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub task: Task,
}

impl TaskRequest {
    pub fn new(request_id: impl Into<String>, task: Task) -> Self {
        Self {
            request_id: Some(request_id.into()),
            task,
        }
    }

    /// The request id, failing with `RequestIDNotFound` when absent or blank
    pub fn require_request_id(&self) -> FederationResult<&str> {
        self.request_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(FederationError::RequestIDNotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TaskOutput {
    NodeInfo(NodeInfo),
    DataModelMetadata(DataModelMetadata),
    Table(TableInfo),
    Inserted(u64),
    TableNames(Vec<String>),
    Schema(TableSchema),
    Data(TableData),
    CleanedUp(usize),
    Done,
}

impl TaskOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskOutput::NodeInfo(_) => "node_info",
            TaskOutput::DataModelMetadata(_) => "data_model_metadata",
            TaskOutput::Table(_) => "table",
            TaskOutput::Inserted(_) => "inserted",
            TaskOutput::TableNames(_) => "table_names",
            TaskOutput::Schema(_) => "schema",
            TaskOutput::Data(_) => "data",
            TaskOutput::CleanedUp(_) => "cleaned_up",
            TaskOutput::Done => "done",
        }
    }
}

/// Worker answer: the output, or the error in its wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskReply {
    Ok { output: TaskOutput },
    Err { error: ErrorEnvelope },
}

impl TaskReply {
    pub fn into_result(self) -> FederationResult<TaskOutput> {
        match self {
            TaskReply::Ok { output } => Ok(output),
            TaskReply::Err { error } => Err(FederationError::from_envelope(error)),
        }
    }
}

impl From<FederationResult<TaskOutput>> for TaskReply {
    fn from(result: FederationResult<TaskOutput>) -> Self {
        match result {
            Ok(output) => TaskReply::Ok { output },
            Err(e) => TaskReply::Err {
                error: e.to_envelope(),
            },
        }
    }
}
