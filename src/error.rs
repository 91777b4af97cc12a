//! Federation error taxonomy
//!
//! These errors cross the worker/controller boundary. They never rely on type
//! identity surviving that trip: each one is converted into an [`ErrorEnvelope`]
//! carrying a stable `kind`, a plain-text `message` and the structured `fields`,
//! and is rebuilt from the envelope on the other side.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::engine::error::EngineError;

/// Errors produced by the table engine, the registries and the dispatcher
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "fields")]
pub enum FederationError {
    #[error("The following tables were not found : {}", tables.join(", "))]
    TablesNotFound { tables: Vec<String> },

    #[error("Tables to be added don't match MERGE TABLE schema : {}", tables.join(", "))]
    IncompatibleSchemasMergeException { tables: Vec<String> },

    #[error("Tables have more than one distinct types : {}", types.join(", "))]
    IncompatibleTableTypes { types: Vec<String> },

    #[error("Request id is missing from task's arguments.")]
    RequestIDNotFound,

    #[error("Data model '{data_model}' is not available in worker: '{worker_id}'.")]
    DataModelUnavailable {
        worker_id: String,
        data_model: String,
    },

    #[error("Dataset '{dataset}' is not available in worker: '{worker_id}'.")]
    DatasetUnavailable { worker_id: String, dataset: String },

    #[error("{message}")]
    InsufficientDataError { message: String },

    #[error("{message}")]
    BadUserInput { message: String },

    #[error("Invalid value for SQL parameter '{parameter}': {value}")]
    InvalidSQLParameter { parameter: String, value: String },

    #[error("SMPC templates do not match: '{first}' differs from '{other}'")]
    SmpcTemplatesMismatch { first: String, other: String },

    #[error("Invalid table name '{name}': {reason}")]
    InvalidTableName { name: String, reason: String },

    #[error("Worker at {socket_addr} is unreachable: {message}")]
    WorkerUnreachable {
        socket_addr: String,
        message: String,
    },

    #[error("Unexpected reply to task '{task}': {reply}")]
    UnexpectedReply { task: String, reply: String },

    #[error("Node discovery from {origin} failed: {message}")]
    DiscoveryFailed { origin: String, message: String },

    #[error(transparent)]
    Database(#[from] EngineError),

    /// A kind this build does not know; kept verbatim so nothing is lost
    #[error("{message}")]
    Remote { kind: String, message: String },
}

/// Result type alias for federation operations
pub type FederationResult<T> = Result<T, FederationError>;

/// Wire representation of a [`FederationError`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
}

impl FederationError {
    pub fn bad_user_input(msg: impl Into<String>) -> Self {
        Self::BadUserInput {
            message: msg.into(),
        }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidSQLParameter {
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    pub fn invalid_table_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTableName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Stable name used as the `kind` tag on the wire
    pub fn kind(&self) -> &str {
        match self {
            Self::TablesNotFound { .. } => "TablesNotFound",
            Self::IncompatibleSchemasMergeException { .. } => "IncompatibleSchemasMergeException",
            Self::IncompatibleTableTypes { .. } => "IncompatibleTableTypes",
            Self::RequestIDNotFound => "RequestIDNotFound",
            Self::DataModelUnavailable { .. } => "DataModelUnavailable",
            Self::DatasetUnavailable { .. } => "DatasetUnavailable",
            Self::InsufficientDataError { .. } => "InsufficientDataError",
            Self::BadUserInput { .. } => "BadUserInput",
            Self::InvalidSQLParameter { .. } => "InvalidSQLParameter",
            Self::SmpcTemplatesMismatch { .. } => "SmpcTemplatesMismatch",
            Self::InvalidTableName { .. } => "InvalidTableName",
            Self::WorkerUnreachable { .. } => "WorkerUnreachable",
            Self::UnexpectedReply { .. } => "UnexpectedReply",
            Self::DiscoveryFailed { .. } => "DiscoveryFailed",
            Self::Database(_) => "Database",
            Self::Remote { kind, .. } => kind,
        }
    }

    /// Caller-fixable errors that should be returned to the requester without retry
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::BadUserInput { .. } | Self::InvalidSQLParameter { .. }
        )
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        let message = self.to_string();

        if let Self::Remote { kind, .. } = self {
            return ErrorEnvelope {
                kind: kind.clone(),
                message,
                fields: Map::new(),
            };
        }

        let fields = match serde_json::to_value(self) {
            Ok(JsonValue::Object(mut tagged)) => match tagged.remove("fields") {
                Some(JsonValue::Object(fields)) => fields,
                _ => Map::new(),
            },
            _ => Map::new(),
        };

        ErrorEnvelope {
            kind: self.kind().to_string(),
            message,
            fields,
        }
    }

    /// Rebuilds the typed error from its wire form
    ///
    /// Message-only kinds whose fields were lost are rebuilt from `message`;
    /// anything else that cannot be decoded becomes [`FederationError::Remote`].
    pub fn from_envelope(envelope: ErrorEnvelope) -> Self {
        if let Some(err) = Self::decode(&envelope.kind, envelope.fields.clone()) {
            return err;
        }

        let mut message_only = Map::new();
        message_only.insert(
            "message".to_string(),
            JsonValue::String(envelope.message.clone()),
        );
        if let Some(err) = Self::decode(&envelope.kind, message_only) {
            return err;
        }

        Self::Remote {
            kind: envelope.kind,
            message: envelope.message,
        }
    }

    fn decode(kind: &str, fields: Map<String, JsonValue>) -> Option<Self> {
        let mut tagged = Map::new();
        tagged.insert("kind".to_string(), JsonValue::String(kind.to_string()));
        if !fields.is_empty() {
            tagged.insert("fields".to_string(), JsonValue::Object(fields));
        }
        serde_json::from_value(JsonValue::Object(tagged)).ok()
    }
}

impl From<ErrorEnvelope> for FederationError {
    fn from(envelope: ErrorEnvelope) -> Self {
        Self::from_envelope(envelope)
    }
}

impl From<&FederationError> for ErrorEnvelope {
    fn from(err: &FederationError) -> Self {
        err.to_envelope()
    }
}
