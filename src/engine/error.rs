// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the node database facade
//!
//! Every sqlx / SQLite failure is mapped to one of these variants so that
//! callers above the facade never see driver-specific error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all database facade operations
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Query syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

impl EngineError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError { message: msg.into() }
    }

    /// Maps a sqlx error, splitting out syntax errors the same way for every call site.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::Timeout { timeout_ms: 0 },
            sqlx::Error::Io(e) => Self::connection_failed(e.to_string()),
            other => {
                let msg = other.to_string();
                if msg.contains("syntax") {
                    Self::syntax_error(msg)
                } else {
                    Self::execution_error(msg)
                }
            }
        }
    }
}

/// Result type alias for database facade operations
pub type EngineResult<T> = Result<T, EngineError>;
