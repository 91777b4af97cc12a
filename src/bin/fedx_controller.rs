//! fedx-controller: keeps the node registry of a federation up to date
//!
//! ## Configuration
//! - first argument or `FEDX_CONFIG`: JSON config file (defaults otherwise)
//! - `FEDX_*` variables override single settings, `FEDX_LOG` the log filter

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use fedx_lib::config::ControllerConfig;
use fedx_lib::controller::HttpTransport;
use fedx_lib::observability::init_tracing;
use fedx_lib::registry::NodeRegistry;

#[global_allocator]
static GLOBAL_ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FEDX_CONFIG").ok())
        .map(PathBuf::from)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ControllerConfig::load(config_path().as_deref())?;
    init_tracing("controller", &config.logging);

    let source = config.address_source()?;
    info!(deployment = ?config.deployment_type, ?source, "Starting controller");

    let registry = Arc::new(NodeRegistry::new(
        source,
        Arc::new(HttpTransport::new()),
        config.request_timeout(),
    ));

    let cancel = CancellationToken::new();
    let refresh = Arc::clone(&registry).spawn(config.refresh_interval(), cancel.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    cancel.cancel();
    refresh.await?;

    let snapshot = registry.snapshot();
    info!(
        nodes = snapshot.nodes.len(),
        datasets = ?snapshot.data_models.get_all_available_datasets_per_data_model(),
        "Controller stopped"
    );
    Ok(())
}
