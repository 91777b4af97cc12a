//! Data preparation on the controller
//!
//! Turns a data request into the tables an algorithm runs on: one view per
//! participating local node, one remote table per view on the global node and
//! a merge table over those remote tables.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::controller::dispatcher::{DataModelViewArgs, RequestScope, TaskDispatcher};
use crate::error::{FederationError, FederationResult};
use crate::protocol::NodeInfo;
use crate::registry::node_registry::NodeRegistry;
use crate::tables::filters::FilterNode;
use crate::tables::schema::TableInfo;

fn default_true() -> bool {
    true
}

/// An incoming request for algorithm input data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub context_id: String,
    pub command_id: String,
    pub data_model: String,
    pub datasets: Vec<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub filters: Option<FilterNode>,
    #[serde(default = "default_true")]
    pub dropna: bool,
    #[serde(default = "default_true")]
    pub check_min_rows: bool,
}

/// One local node's contribution to a prepared request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalView {
    pub node_id: String,
    pub datasets: Vec<String>,
    pub view: TableInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedData {
    pub global_node: NodeInfo,
    pub local_nodes: Vec<NodeInfo>,
    pub local_views: Vec<LocalView>,
    pub remote_tables: Vec<TableInfo>,
    pub merge_table: TableInfo,
}

impl PreparedData {
    /// Every node that holds tables of this request
    pub fn nodes(&self) -> Vec<NodeInfo> {
        let mut nodes = self.local_nodes.clone();
        nodes.push(self.global_node.clone());
        nodes
    }
}

pub struct Controller {
    registry: Arc<NodeRegistry>,
    dispatcher: TaskDispatcher,
}

impl Controller {
    pub fn new(registry: Arc<NodeRegistry>, dispatcher: TaskDispatcher) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    /// Creates the views, remote tables and merge table of `request`
    ///
    /// When any step fails, whatever the request already created is cleaned up
    /// before the error is returned.
    #[instrument(skip(self, request), fields(context_id = %request.context_id, data_model = %request.data_model))]
    pub async fn prepare_data(&self, request: DataRequest) -> FederationResult<PreparedData> {
        let scope = self.dispatcher.for_request(request.request_id.as_deref())?;
        let plan = self.plan(&request)?;

        let outcome = self.create_tables(&scope, &request, &plan).await;
        if outcome.is_err() {
            let mut touched = plan.local_nodes.clone();
            touched.push(plan.global_node.clone());
            if let Err(e) = clean_up_nodes(&scope, &request.context_id, &touched).await {
                warn!(error = %e, "Cleanup after a failed preparation did not complete");
            }
        }
        outcome
    }

    /// Drops every table of `context_id` on every known node
    pub async fn clean_up(
        &self,
        request_id: Option<&str>,
        context_id: &str,
    ) -> FederationResult<usize> {
        let scope = self.dispatcher.for_request(request_id)?;
        let nodes = self.registry.snapshot().nodes.clone();
        clean_up_nodes(&scope, context_id, &nodes).await
    }

    fn plan(&self, request: &DataRequest) -> FederationResult<Plan> {
        let snapshot = self.registry.snapshot();
        let data_models = &snapshot.data_models;

        if !data_models.data_model_exists(&request.data_model) {
            return Err(FederationError::bad_user_input(format!(
                "Data model '{}' does not exist.",
                request.data_model
            )));
        }
        if request.datasets.is_empty() {
            return Err(FederationError::bad_user_input(
                "At least one dataset must be requested.",
            ));
        }
        let missing: Vec<&str> = request
            .datasets
            .iter()
            .filter(|d| !data_models.dataset_exists(&request.data_model, d))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(FederationError::bad_user_input(format!(
                "Datasets: {} do not exist in data model '{}'.",
                missing.join(", "),
                request.data_model
            )));
        }

        let cdes = data_models
            .get_cdes(&request.data_model)
            .unwrap_or_default();
        let unknown: Vec<&str> = request
            .columns
            .iter()
            .filter(|c| !cdes.contains_key(*c))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(FederationError::bad_user_input(format!(
                "Variables: {} are not part of data model '{}'.",
                unknown.join(", "),
                request.data_model
            )));
        }

        let global_node = snapshot.global_nodes().into_iter().next().ok_or_else(|| {
            FederationError::WorkerUnreachable {
                socket_addr: "global".to_string(),
                message: "no global node is registered".to_string(),
            }
        })?;

        let node_ids: BTreeSet<String> = data_models
            .get_node_ids_with_any_of_datasets(&request.data_model, &request.datasets)
            .into_iter()
            .collect();
        let mut local_nodes = Vec::with_capacity(node_ids.len());
        for node_id in &node_ids {
            match snapshot.node(node_id) {
                Some(node) => local_nodes.push(node.clone()),
                None => {
                    return Err(FederationError::WorkerUnreachable {
                        socket_addr: node_id.clone(),
                        message: "node holding requested datasets left the registry".to_string(),
                    })
                }
            }
        }

        let datasets_per_node = local_nodes
            .iter()
            .map(|node| {
                data_models.get_node_specific_datasets(
                    node.id(),
                    &request.data_model,
                    &request.datasets,
                )
            })
            .collect();

        Ok(Plan {
            global_node,
            local_nodes,
            datasets_per_node,
        })
    }

    async fn create_tables(
        &self,
        scope: &RequestScope<'_>,
        request: &DataRequest,
        plan: &Plan,
    ) -> FederationResult<PreparedData> {
        let views = join_all(plan.local_nodes.iter().zip(&plan.datasets_per_node).map(
            |(node, datasets)| {
                let args = DataModelViewArgs {
                    context_id: request.context_id.clone(),
                    command_id: request.command_id.clone(),
                    data_model: request.data_model.clone(),
                    datasets: datasets.clone(),
                    columns: request.columns.clone(),
                    filters: request.filters.clone(),
                    dropna: request.dropna,
                    check_min_rows: request.check_min_rows,
                };
                scope.create_data_model_view(&node.worker, args)
            },
        ))
        .await;

        let mut local_views = Vec::with_capacity(views.len());
        for ((node, datasets), view) in plan
            .local_nodes
            .iter()
            .zip(&plan.datasets_per_node)
            .zip(views)
        {
            local_views.push(LocalView {
                node_id: node.id().to_string(),
                datasets: datasets.clone(),
                view: view?,
            });
        }

        let global = &plan.global_node.worker;
        let remotes = join_all(plan.local_nodes.iter().zip(&local_views).map(|(node, lv)| {
            let db_socket_addr = node.worker.db_socket_addr();
            async move {
                scope
                    .create_remote_table(global, &lv.view, &db_socket_addr)
                    .await
            }
        }))
        .await;
        let remote_tables = remotes.into_iter().collect::<FederationResult<Vec<_>>>()?;

        let merge_table = scope
            .create_merge_table(
                global,
                &request.context_id,
                &request.command_id,
                remote_tables.iter().map(|t| t.name.to_string()).collect(),
            )
            .await?;

        info!(
            request_id = %scope.request_id(),
            local_nodes = plan.local_nodes.len(),
            merge_table = %merge_table.name,
            "Data prepared"
        );
        Ok(PreparedData {
            global_node: plan.global_node.clone(),
            local_nodes: plan.local_nodes.clone(),
            local_views,
            remote_tables,
            merge_table,
        })
    }
}

/// Which nodes take part in a request and with which of its datasets
struct Plan {
    global_node: NodeInfo,
    local_nodes: Vec<NodeInfo>,
    datasets_per_node: Vec<Vec<String>>,
}

/// Fans cleanup out to `nodes`; every node is attempted and the first error is returned
async fn clean_up_nodes(
    scope: &RequestScope<'_>,
    context_id: &str,
    nodes: &[NodeInfo],
) -> FederationResult<usize> {
    let results = join_all(
        nodes
            .iter()
            .map(|node| scope.clean_up(&node.worker, context_id)),
    )
    .await;

    let mut dropped = 0;
    let mut first_error = None;
    for (node, result) in nodes.iter().zip(results) {
        match result {
            Ok(count) => dropped += count,
            Err(e) => {
                warn!(node_id = %node.id(), %context_id, error = %e, "Cleanup failed on node");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(dropped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::transport::LocalTransport;
    use crate::engine::drivers::sqlite::SqliteDatabase;
    use crate::protocol::{NodeRole, WorkerInfo};
    use crate::registry::data_model::parse_data_model_metadata;
    use crate::registry::discovery::AddressSource;
    use crate::tables::manager::TableManager;
    use crate::worker::WorkerNode;
    use std::io::Write;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const METADATA: &str = r#"{
        "code": "demo", "version": "0.1", "label": "Demo",
        "variables": [
            {"code": "dataset", "label": "Dataset", "sql_type": "text", "isCategorical": true},
            {"code": "x", "label": "X", "sql_type": "real", "isCategorical": false}
        ],
        "groups": []
    }"#;

    async fn local_worker(csv: &str) -> Arc<WorkerNode> {
        let db = SqliteDatabase::connect(":memory:").await.unwrap();
        let tables = TableManager::new(Arc::new(db), "localnode1", 1).unwrap();
        let node = WorkerNode::new(
            WorkerInfo {
                id: "localnode1".into(),
                role: NodeRole::Local,
                ip: Ipv4Addr::LOCALHOST,
                port: 5671,
                db_ip: Ipv4Addr::LOCALHOST,
                db_port: 50001,
            },
            tables,
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(csv.as_bytes()).unwrap();
        node.load_data_model(
            parse_data_model_metadata(METADATA).unwrap(),
            &[file.path().to_path_buf()],
        )
        .await
        .unwrap();
        Arc::new(node)
    }

    async fn controller(
        workers: Vec<Arc<WorkerNode>>,
    ) -> (Controller, tempfile::NamedTempFile) {
        let addresses: Vec<String> = workers.iter().map(|w| w.info().socket_addr()).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&addresses).unwrap().as_bytes())
            .unwrap();

        let transport: Arc<LocalTransport> = Arc::new(
            workers
                .into_iter()
                .fold(LocalTransport::new(), |t, w| t.with_worker(w)),
        );
        let registry = Arc::new(NodeRegistry::new(
            AddressSource::Static {
                path: file.path().to_path_buf(),
            },
            transport.clone(),
            Duration::from_secs(5),
        ));
        registry.refresh().await.unwrap();
        let dispatcher = TaskDispatcher::new(transport, Duration::from_secs(5));
        (Controller::new(registry, dispatcher), file)
    }

    fn request(datasets: &[&str], columns: &[&str]) -> DataRequest {
        DataRequest {
            request_id: Some("req1".into()),
            context_id: "ctx1".into(),
            command_id: "cmd1".into(),
            data_model: "demo:0.1".into(),
            datasets: datasets.iter().map(|s| s.to_string()).collect(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            filters: None,
            dropna: true,
            check_min_rows: true,
        }
    }

    #[tokio::test]
    async fn requests_are_validated_against_the_registry() {
        let (controller, _file) = controller(vec![local_worker("dataset,x\nd1,1\n").await]).await;

        let mut unknown_model = request(&["d1"], &["x"]);
        unknown_model.data_model = "other:0.1".into();
        let cases = [
            (unknown_model, "does not exist"),
            (request(&[], &["x"]), "At least one dataset"),
            (request(&["d9"], &["x"]), "d9"),
            (request(&["d1"], &["nope"]), "nope"),
        ];
        for (req, needle) in cases {
            let err = controller.prepare_data(req).await.unwrap_err();
            assert_eq!(err.kind(), "BadUserInput");
            assert!(err.to_string().contains(needle), "{}", err);
        }
    }

    #[tokio::test]
    async fn missing_request_id_is_rejected_first() {
        let (controller, _file) = controller(vec![local_worker("dataset,x\nd1,1\n").await]).await;
        let mut req = request(&["d1"], &["x"]);
        req.request_id = None;
        let err = controller.prepare_data(req).await.unwrap_err();
        assert_eq!(err, FederationError::RequestIDNotFound);
    }

    #[tokio::test]
    async fn no_global_node_is_a_topology_error() {
        let (controller, _file) = controller(vec![local_worker("dataset,x\nd1,1\n").await]).await;
        let err = controller
            .prepare_data(request(&["d1"], &["x"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "WorkerUnreachable");
    }
}
