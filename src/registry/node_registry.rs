//! Node Registry
//!
//! Keeps the best known view of the worker pool. Each refresh resolves the
//! worker addresses, asks every worker for its capability info concurrently and
//! collects the data model metadata of the local nodes. The result replaces the
//! previous [`RegistrySnapshot`] in one swap; readers never see a partial one.
//!
//! A worker that fails or times out is logged and left out of that refresh.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::controller::transport::WorkerTransport;
use crate::error::{FederationError, FederationResult};
use crate::protocol::{NodeInfo, NodeRole, Task, TaskOutput, TaskRequest};
use crate::registry::data_model_registry::{DataModelRegistry, NodeDataModel};
use crate::registry::discovery::AddressSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Uninitialized,
    Refreshing,
    Ready,
}

/// One consistent view of the worker pool
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub nodes: Vec<NodeInfo>,
    pub data_models: DataModelRegistry,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    pub fn global_nodes(&self) -> Vec<NodeInfo> {
        self.nodes_with_role(NodeRole::Global)
    }

    pub fn local_nodes(&self) -> Vec<NodeInfo> {
        self.nodes_with_role(NodeRole::Local)
    }

    fn nodes_with_role(&self, role: NodeRole) -> Vec<NodeInfo> {
        self.nodes
            .iter()
            .filter(|n| n.role() == role)
            .cloned()
            .collect()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.id() == node_id)
    }
}

pub struct NodeRegistry {
    source: AddressSource,
    transport: Arc<dyn WorkerTransport>,
    request_timeout: Duration,
    state: RwLock<RegistryState>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl NodeRegistry {
    pub fn new(
        source: AddressSource,
        transport: Arc<dyn WorkerTransport>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            source,
            transport,
            request_timeout,
            state: RwLock::new(RegistryState::Uninitialized),
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    pub fn state(&self) -> RegistryState {
        *self.state.read()
    }

    /// The current snapshot; cheap to clone and never mutated
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Runs one refresh tick
    ///
    /// Fails only when the addresses themselves cannot be resolved; the previous
    /// snapshot is kept in that case.
    pub async fn refresh(&self) -> FederationResult<Arc<RegistrySnapshot>> {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, RegistryState::Refreshing)
        };

        let addresses = match self.source.resolve().await {
            Ok(addresses) => addresses,
            Err(e) => {
                let restored = if previous == RegistryState::Uninitialized {
                    RegistryState::Uninitialized
                } else {
                    RegistryState::Ready
                };
                *self.state.write() = restored;
                error!(error = %e, "Node registry refresh failed");
                return Err(e);
            }
        };

        let nodes = self.fetch_node_info(&addresses).await;
        let data_models = self.fetch_data_models(&nodes).await;
        for (data_model, fields) in data_models.conflicts() {
            error!(%data_model, ?fields, "Data model excluded because nodes disagree on it");
        }

        let snapshot = Arc::new(RegistrySnapshot {
            nodes,
            data_models,
            refreshed_at: Some(Utc::now()),
        });
        *self.snapshot.write() = Arc::clone(&snapshot);
        *self.state.write() = RegistryState::Ready;

        info!(
            addresses = addresses.len(),
            nodes = snapshot.nodes.len(),
            data_models = snapshot.data_models.data_models().len(),
            "Node registry updated"
        );
        Ok(snapshot)
    }

    async fn fetch_node_info(&self, addresses: &[String]) -> Vec<NodeInfo> {
        let request = TaskRequest::new(refresh_request_id(), Task::GetNodeInfo);
        let replies = join_all(
            addresses
                .iter()
                .map(|addr| self.transport.send(addr, &request, self.request_timeout)),
        )
        .await;

        let mut nodes = Vec::with_capacity(addresses.len());
        for (addr, reply) in addresses.iter().zip(replies) {
            match reply {
                Ok(TaskOutput::NodeInfo(info)) => nodes.push(info),
                Ok(other) => warn!(%addr, output = other.kind(), "Unexpected capability reply"),
                Err(e) => warn!(%addr, error = %e, "Dropping node from this refresh"),
            }
        }
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    async fn fetch_data_models(&self, nodes: &[NodeInfo]) -> DataModelRegistry {
        let request_id = refresh_request_id();
        let wanted: Vec<(&NodeInfo, &String, &Vec<String>)> = nodes
            .iter()
            .filter(|n| n.role() == NodeRole::Local)
            .flat_map(|n| {
                n.datasets_per_data_model
                    .iter()
                    .map(move |(dm, datasets)| (n, dm, datasets))
            })
            .collect();

        let replies = join_all(wanted.iter().map(|(node, dm, _)| {
            let request = TaskRequest::new(
                request_id.clone(),
                Task::GetDataModelCdes {
                    data_model: (*dm).clone(),
                },
            );
            let addr = node.worker.socket_addr();
            async move {
                self.transport
                    .send(&addr, &request, self.request_timeout)
                    .await
            }
        }))
        .await;

        let mut reports = Vec::with_capacity(wanted.len());
        for ((node, dm, datasets), reply) in wanted.into_iter().zip(replies) {
            match reply {
                Ok(TaskOutput::DataModelMetadata(metadata)) => reports.push(NodeDataModel {
                    node_id: node.id().to_string(),
                    metadata,
                    datasets: datasets.clone(),
                }),
                Ok(other) => {
                    warn!(node_id = %node.id(), data_model = %dm, output = other.kind(), "Unexpected metadata reply")
                }
                Err(e) => {
                    warn!(node_id = %node.id(), data_model = %dm, error = %e, "Skipping data model of node")
                }
            }
        }
        DataModelRegistry::from_reports(reports)
    }

    /// Refreshes every `interval` until `cancel` fires
    ///
    /// The first refresh runs immediately. A refresh that overruns the interval
    /// is not interrupted; the next one starts after it.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Node registry loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        // Failures are logged inside and the previous snapshot stays
                        let _ = self.refresh().await;
                    }
                }
            }
        })
    }

    // ─── Queries ─────────────────────────────────────────────

    pub fn get_all_global_nodes(&self) -> Vec<NodeInfo> {
        self.snapshot().global_nodes()
    }

    pub fn get_all_local_nodes(&self) -> Vec<NodeInfo> {
        self.snapshot().local_nodes()
    }

    /// Local nodes advertising at least one of `datasets` for `data_model`
    pub fn get_nodes_with_any_of_datasets(
        &self,
        data_model: &str,
        datasets: &[String],
    ) -> Vec<NodeInfo> {
        self.snapshot()
            .local_nodes()
            .into_iter()
            .filter(|n| n.has_any_of_datasets(data_model, datasets))
            .collect()
    }

    pub fn data_model_exists(&self, data_model: &str) -> bool {
        self.snapshot()
            .local_nodes()
            .iter()
            .any(|n| n.datasets_per_data_model.contains_key(data_model))
    }

    pub fn dataset_exists(&self, data_model: &str, dataset: &str) -> bool {
        let wanted = [dataset.to_string()];
        self.snapshot()
            .local_nodes()
            .iter()
            .any(|n| n.has_any_of_datasets(data_model, &wanted))
    }

    pub fn data_model_registry(&self) -> DataModelRegistry {
        self.snapshot().data_models.clone()
    }

    /// Available datasets per data model, as the data model registry sees them
    pub fn available_datasets(&self) -> BTreeMap<String, Vec<String>> {
        self.snapshot()
            .data_models
            .get_all_available_datasets_per_data_model()
    }

    pub fn node_socket_addr(&self, node_id: &str) -> FederationResult<String> {
        self.snapshot()
            .node(node_id)
            .map(|n| n.worker.socket_addr())
            .ok_or_else(|| FederationError::WorkerUnreachable {
                socket_addr: node_id.to_string(),
                message: "node is not in the registry".to_string(),
            })
    }
}

fn refresh_request_id() -> String {
    format!("noderegistry{}", Uuid::new_v4().simple())
}
