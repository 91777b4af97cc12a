//! Worker identity and capability info

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    #[serde(rename = "GLOBALWORKER", alias = "GLOBAL")]
    Global,
    #[serde(rename = "LOCALWORKER", alias = "LOCAL")]
    Local,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Global => f.write_str("GLOBALWORKER"),
            NodeRole::Local => f.write_str("LOCALWORKER"),
        }
    }
}

/// One addressable worker process and the database it owns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub role: NodeRole,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub db_ip: Ipv4Addr,
    pub db_port: u16,
}

impl WorkerInfo {
    /// Where the worker's task endpoint listens
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Where the worker's database can be reached by other nodes
    pub fn db_socket_addr(&self) -> String {
        format!("{}:{}", self.db_ip, self.db_port)
    }
}

/// Capability info a worker reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(flatten)]
    pub worker: WorkerInfo,
    #[serde(default)]
    pub datasets_per_data_model: BTreeMap<String, Vec<String>>,
}

impl NodeInfo {
    pub fn id(&self) -> &str {
        &self.worker.id
    }

    pub fn role(&self) -> NodeRole {
        self.worker.role
    }

    pub fn has_any_of_datasets(&self, data_model: &str, datasets: &[String]) -> bool {
        self.datasets_per_data_model
            .get(data_model)
            .map(|held| held.iter().any(|d| datasets.contains(d)))
            .unwrap_or(false)
    }
}
