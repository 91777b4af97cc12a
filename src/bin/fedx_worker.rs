//! fedx-worker: serves one node's task API
//!
//! ## Configuration
//! - first argument or `FEDX_CONFIG`: JSON config file (defaults otherwise)
//! - `FEDX_*` variables override single settings, `FEDX_LOG` the log filter

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fedx_lib::config::WorkerConfig;
use fedx_lib::observability::init_tracing;
use fedx_lib::worker::{build_worker, serve};

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
    let config = WorkerConfig::load(config_path().as_deref())?;
    init_tracing(&format!("worker-{}", config.identifier), &config.logging);

    let listener = TcpListener::bind((config.ip, config.port)).await?;
    let port = listener.local_addr()?.port();

    let node = build_worker(&config, config.ip, port).await.map_err(|e| {
        error!(error = %e, "Failed to start worker");
        e
    })?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        signal.cancel();
    });

    serve(listener, Arc::new(node), shutdown).await?;
    Ok(())
}
