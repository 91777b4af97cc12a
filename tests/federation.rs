//! End-to-end data preparation over in-process workers backed by SQLite files

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fedx_lib::config::{DataModelSource, WorkerConfig};
use fedx_lib::controller::{Controller, DataRequest, LocalTransport, TaskDispatcher};
use fedx_lib::observability::Sensitive;
use fedx_lib::protocol::{NodeRole, WorkerInfo};
use fedx_lib::registry::{AddressSource, NodeRegistry};
use fedx_lib::tables::TableType;
use fedx_lib::worker::{build_worker, WorkerNode};
use tempfile::TempDir;

const METADATA: &str = r#"{
    "code": "demo", "version": "0.1", "label": "Demo",
    "variables": [
        {"code": "dataset", "label": "Dataset", "sql_type": "text", "isCategorical": true}
    ],
    "groups": [
        {"code": "measures", "label": "Measures", "variables": [
            {"code": "x", "label": "X", "sql_type": "real", "isCategorical": false},
            {"code": "y", "label": "Y", "sql_type": "int", "isCategorical": false}
        ]}
    ]
}"#;

struct Federation {
    _dir: TempDir,
    controller: Controller,
    global: WorkerInfo,
    locals: Vec<WorkerInfo>,
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn local_config(dir: &Path, id: &str, db_port: u16, csv: &str, min_rows: u64) -> WorkerConfig {
    let mut config = WorkerConfig {
        identifier: id.to_string(),
        role: NodeRole::Local,
        ..WorkerConfig::default()
    };
    config.database.path = dir.join(format!("{}.db", id)).display().to_string();
    config.database.db_port = db_port;
    config.privacy.minimum_row_count = min_rows;
    config.data_models.push(DataModelSource {
        metadata: write(dir, "demo.json", METADATA),
        csvs: vec![write(dir, &format!("{}.csv", id), csv)],
    });
    config
}

async fn federation(second_node_min_rows: u64) -> Federation {
    let dir = tempfile::tempdir().unwrap();
    let ip = Ipv4Addr::LOCALHOST;

    let local1 = local_config(
        dir.path(),
        "localnode1",
        50001,
        "dataset,x,y\nd1,1.5,1\nd1,2.5,2\nd1,3.5,3\n",
        2,
    );
    let local2 = local_config(
        dir.path(),
        "localnode2",
        50002,
        "x,y,dataset\n4.5,4,d2\n5.5,5,d2\n",
        second_node_min_rows,
    );

    let mut global = WorkerConfig {
        identifier: "globalnode".to_string(),
        role: NodeRole::Global,
        ..WorkerConfig::default()
    };
    global.database.path = dir.path().join("globalnode.db").display().to_string();
    global.database.db_port = 50000;
    global.remote_databases = BTreeMap::from([
        (
            "127.0.0.1:50001".to_string(),
            Sensitive::new(local1.database.path.clone()),
        ),
        (
            "127.0.0.1:50002".to_string(),
            Sensitive::new(local2.database.path.clone()),
        ),
    ]);

    let nodes: Vec<Arc<WorkerNode>> = vec![
        Arc::new(build_worker(&global, ip, 5670).await.unwrap()),
        Arc::new(build_worker(&local1, ip, 5671).await.unwrap()),
        Arc::new(build_worker(&local2, ip, 5672).await.unwrap()),
    ];
    let addresses: Vec<String> = nodes.iter().map(|n| n.info().socket_addr()).collect();
    let infos: Vec<WorkerInfo> = nodes.iter().map(|n| n.info().clone()).collect();
    let address_file = write(
        dir.path(),
        "localnodes.json",
        &serde_json::to_string(&addresses).unwrap(),
    );

    let transport = Arc::new(
        nodes
            .into_iter()
            .fold(LocalTransport::new(), |t, n| t.with_worker(n)),
    );
    let registry = Arc::new(NodeRegistry::new(
        AddressSource::Static { path: address_file },
        transport.clone(),
        Duration::from_secs(5),
    ));
    registry.refresh().await.unwrap();

    Federation {
        _dir: dir,
        controller: Controller::new(registry, TaskDispatcher::new(transport, Duration::from_secs(5))),
        global: infos[0].clone(),
        locals: infos[1..].to_vec(),
    }
}

fn request(context_id: &str) -> DataRequest {
    DataRequest {
        request_id: Some("req1".into()),
        context_id: context_id.into(),
        command_id: "cmd1".into(),
        data_model: "demo:0.1".into(),
        datasets: vec!["d1".into(), "d2".into()],
        columns: vec!["x".into(), "y".into()],
        filters: None,
        dropna: true,
        check_min_rows: true,
    }
}

#[tokio::test]
async fn registry_sees_the_whole_federation() {
    let fed = federation(2).await;
    let registry = fed.controller.registry();

    assert_eq!(registry.get_all_global_nodes().len(), 1);
    assert_eq!(registry.get_all_local_nodes().len(), 2);
    assert_eq!(
        registry.available_datasets().get("demo:0.1"),
        Some(&vec!["d1".to_string(), "d2".to_string()])
    );
    assert!(registry.data_model_registry().conflicts().is_empty());
    let cdes = registry.data_model_registry().get_cdes("demo:0.1").unwrap();
    assert!(cdes.contains_key("x") && cdes.contains_key("y"));
}

#[tokio::test]
async fn prepared_data_merges_every_local_view() {
    let fed = federation(2).await;
    let prepared = fed.controller.prepare_data(request("ctx1")).await.unwrap();

    assert_eq!(prepared.local_views.len(), 2);
    assert_eq!(prepared.remote_tables.len(), 2);
    assert_eq!(prepared.merge_table.table_type(), TableType::Merge);
    assert_eq!(prepared.merge_table.node_id(), Some("globalnode"));
    assert_eq!(
        prepared.merge_table.schema.column_names(),
        vec!["row_id", "x", "y"]
    );
    for view in &prepared.local_views {
        assert_eq!(view.view.table_type(), TableType::View);
        assert_eq!(view.view.context_id(), "ctx1");
    }

    let scope = fed.controller.dispatcher().for_request(Some("req2")).unwrap();
    let mut view_rows = 0;
    for (local, view) in fed.locals.iter().zip(&prepared.local_views) {
        view_rows += scope
            .get_table_data(local, &view.view.name.to_string())
            .await
            .unwrap()
            .rows
            .len();
    }
    let merged = scope
        .get_table_data(&fed.global, &prepared.merge_table.name.to_string())
        .await
        .unwrap();
    assert_eq!(view_rows, 5);
    assert_eq!(merged.rows.len(), view_rows);

    let remotes = scope
        .get_tables(&fed.global, TableType::Remote, "ctx1")
        .await
        .unwrap();
    assert_eq!(remotes.len(), 2);
}

#[tokio::test]
async fn clean_up_removes_the_context_everywhere() {
    let fed = federation(2).await;
    fed.controller.prepare_data(request("ctx2")).await.unwrap();

    let dropped = fed.controller.clean_up(Some("req1"), "ctx2").await.unwrap();
    assert_eq!(dropped, 5);
    assert_eq!(fed.controller.clean_up(Some("req1"), "ctx2").await.unwrap(), 0);

    let scope = fed.controller.dispatcher().for_request(Some("req1")).unwrap();
    for node in fed.locals.iter().chain([&fed.global]) {
        for table_type in TableType::CLEANUP_ORDER {
            let left = scope.get_tables(node, table_type, "ctx2").await.unwrap();
            assert!(left.is_empty(), "{} left {:?}", node.id, left);
        }
    }
}

#[tokio::test]
async fn privacy_floor_failure_leaves_no_views_behind() {
    let fed = federation(3).await;
    let err = fed
        .controller
        .prepare_data(request("ctx3"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InsufficientDataError");

    let scope = fed.controller.dispatcher().for_request(Some("req1")).unwrap();
    for node in &fed.locals {
        let views = scope.get_tables(node, TableType::View, "ctx3").await.unwrap();
        assert!(views.is_empty(), "{} kept {:?}", node.id, views);
    }
}

#[tokio::test]
async fn a_single_dataset_involves_only_its_node() {
    let fed = federation(2).await;
    let mut req = request("ctx4");
    req.datasets = vec!["d2".into()];
    let prepared = fed.controller.prepare_data(req).await.unwrap();

    assert_eq!(prepared.local_nodes.len(), 1);
    assert_eq!(prepared.local_nodes[0].id(), "localnode2");
    assert_eq!(prepared.local_views[0].datasets, vec!["d2".to_string()]);
    assert_eq!(prepared.nodes().len(), 2);
}
