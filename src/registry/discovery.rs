//! Worker address discovery
//!
//! Either a static JSON file listing `ip:port` strings, or a DNS name whose A
//! records are combined with a fixed task port.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FederationError, FederationResult};
use crate::guard::is_socket_address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AddressSource {
    /// JSON array of `"ip:port"` strings, re-read on every refresh
    Static { path: PathBuf },
    Dns { name: String, port: u16 },
}

impl AddressSource {
    fn origin(&self) -> String {
        match self {
            AddressSource::Static { path } => path.display().to_string(),
            AddressSource::Dns { name, port } => format!("{}:{}", name, port),
        }
    }

    /// Current worker socket addresses, sorted and deduplicated
    pub async fn resolve(&self) -> FederationResult<Vec<String>> {
        let addresses = match self {
            AddressSource::Static { path } => read_address_file(path).await?,
            AddressSource::Dns { name, port } => lookup(name, *port).await?,
        };

        let unique: BTreeSet<String> = addresses.into_iter().collect();
        debug!(origin = %self.origin(), count = unique.len(), "Resolved worker addresses");
        Ok(unique.into_iter().collect())
    }

    fn failure(&self, message: impl ToString) -> FederationError {
        FederationError::DiscoveryFailed {
            origin: self.origin(),
            message: message.to_string(),
        }
    }
}

async fn read_address_file(path: &PathBuf) -> FederationResult<Vec<String>> {
    let source = AddressSource::Static { path: path.clone() };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| source.failure(e))?;
    let addresses: Vec<String> = serde_json::from_str(&raw).map_err(|e| source.failure(e))?;

    if let Some(bad) = addresses.iter().find(|a| !is_socket_address(a)) {
        return Err(source.failure(format!("'{}' is not an ip:port address", bad)));
    }
    Ok(addresses)
}

async fn lookup(name: &str, port: u16) -> FederationResult<Vec<String>> {
    let source = AddressSource::Dns {
        name: name.to_string(),
        port,
    };
    let resolved = tokio::net::lookup_host((name, port))
        .await
        .map_err(|e| source.failure(e))?;

    Ok(resolved
        .filter(|addr| matches!(addr, SocketAddr::V4(_)))
        .map(|addr| addr.to_string())
        .collect())
}
