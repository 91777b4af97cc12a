//! Worker side: the node that owns a database and serves tasks over HTTP

pub mod loader;
pub mod node;
pub mod server;

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::WorkerConfig;
use crate::engine::drivers::sqlite::SqliteDatabase;
use crate::engine::error::EngineError;
use crate::error::{FederationError, FederationResult};
use crate::protocol::WorkerInfo;
use crate::registry::data_model::parse_data_model_metadata;
use crate::tables::manager::TableManager;

pub use node::{DataModelViewRequest, WorkerNode, PRIMARY_DATA};
pub use server::{router, serve};

/// Opens the configured database and loads every configured data model
///
/// `port` is the port actually bound, which may differ from the configured one.
pub async fn build_worker(
    config: &WorkerConfig,
    ip: Ipv4Addr,
    port: u16,
) -> FederationResult<WorkerNode> {
    let db = SqliteDatabase::connect_with_timeout(
        &config.database.path,
        config.database.acquire_timeout_secs,
    )
    .await?;
    let tables = TableManager::new(
        Arc::new(db),
        config.identifier.clone(),
        config.privacy.minimum_row_count,
    )
    .map_err(|e| FederationError::from(EngineError::internal(e.to_string())))?
    .with_remote_databases(config.remote_databases());

    let info = WorkerInfo {
        id: config.identifier.clone(),
        role: config.role,
        ip,
        port,
        db_ip: config.database.db_ip,
        db_port: config.database.db_port,
    };
    let node = WorkerNode::new(info, tables);

    for source in &config.data_models {
        let raw = read_metadata(&source.metadata).await?;
        let metadata = parse_data_model_metadata(&raw).map_err(|e| {
            FederationError::bad_user_input(format!(
                "Invalid data model metadata {}: {}",
                source.metadata.display(),
                e
            ))
        })?;
        node.load_data_model(metadata, &source.csvs).await?;
    }

    info!(node_id = %config.identifier, role = %config.role, "Worker ready");
    Ok(node)
}

async fn read_metadata(path: &Path) -> FederationResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        FederationError::bad_user_input(format!("Cannot read {}: {}", path.display(), e))
    })
}
