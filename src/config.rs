//! Process configuration
//!
//! Both binaries read a JSON file and then apply `FEDX_*` environment
//! overrides. Every field has a default so a partial file is enough.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::observability::Sensitive;
use crate::protocol::NodeRole;
use crate::registry::discovery::AddressSource;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {variable}: '{value}'")]
    Env { variable: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded configuration from {:?}", path);
    Ok(config)
}

fn parse_env<T: std::str::FromStr>(variable: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        variable: variable.to_string(),
        value,
    })
}

// ─── Logging ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `FEDX_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Daily rolling files go here; stdout when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retention_days() -> u64 {
    14
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
            retention_days: default_retention_days(),
        }
    }
}

// ─── Worker ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Address other nodes use to reach this database
    #[serde(default = "default_ip")]
    pub db_ip: Ipv4Addr,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_db_path() -> String {
    ":memory:".to_string()
}

fn default_ip() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

fn default_db_port() -> u16 {
    50000
}

fn default_acquire_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            db_ip: default_ip(),
            db_port: default_db_port(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyConfig {
    #[serde(default = "default_minimum_row_count")]
    pub minimum_row_count: u64,
}

fn default_minimum_row_count() -> u64 {
    10
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            minimum_row_count: default_minimum_row_count(),
        }
    }
}

/// A data model to load at startup: its metadata file and the CSVs of its datasets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModelSource {
    pub metadata: PathBuf,
    #[serde(default)]
    pub csvs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_identifier")]
    pub identifier: String,
    #[serde(default = "default_role")]
    pub role: NodeRole,
    #[serde(default = "default_ip")]
    pub ip: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub data_models: Vec<DataModelSource>,
    /// db socket address -> database file, for remote tables
    #[serde(default)]
    pub remote_databases: BTreeMap<String, Sensitive<String>>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_identifier() -> String {
    "localnode1".to_string()
}

fn default_role() -> NodeRole {
    NodeRole::Local
}

fn default_port() -> u16 {
    5670
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            identifier: default_identifier(),
            role: default_role(),
            ip: default_ip(),
            port: default_port(),
            database: DatabaseConfig::default(),
            privacy: PrivacyConfig::default(),
            data_models: Vec::new(),
            remote_databases: BTreeMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Reads `path` (defaults when `None`), then applies the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config: Self = match path {
            Some(path) => read_json(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FEDX_NODE_ID") {
            self.identifier = v;
        }
        if let Some(v) = lookup("FEDX_ROLE") {
            self.role = serde_json::from_value(serde_json::Value::String(v.clone())).map_err(
                |_| ConfigError::Env {
                    variable: "FEDX_ROLE".into(),
                    value: v,
                },
            )?;
        }
        if let Some(v) = lookup("FEDX_IP") {
            self.ip = parse_env("FEDX_IP", v)?;
        }
        if let Some(v) = lookup("FEDX_PORT") {
            self.port = parse_env("FEDX_PORT", v)?;
        }
        if let Some(v) = lookup("FEDX_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = lookup("FEDX_DB_IP") {
            self.database.db_ip = parse_env("FEDX_DB_IP", v)?;
        }
        if let Some(v) = lookup("FEDX_DB_PORT") {
            self.database.db_port = parse_env("FEDX_DB_PORT", v)?;
        }
        if let Some(v) = lookup("FEDX_MINIMUM_ROW_COUNT") {
            self.privacy.minimum_row_count = parse_env("FEDX_MINIMUM_ROW_COUNT", v)?;
        }
        if let Some(v) = lookup("FEDX_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    /// The identifier becomes part of every table name, so it is restricted
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = !self.identifier.is_empty()
            && self
                .identifier
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid {
            return Err(ConfigError::Invalid(format!(
                "identifier '{}' must be lowercase letters and digits only",
                self.identifier
            )));
        }
        Ok(())
    }

    pub fn remote_databases(&self) -> std::collections::HashMap<String, String> {
        self.remote_databases
            .iter()
            .map(|(addr, path)| (addr.clone(), path.expose().clone()))
            .collect()
    }
}

// ─── Controller ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentType {
    /// Addresses come from a static JSON file
    #[default]
    Local,
    /// Addresses come from DNS A records
    Kubernetes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalNodesConfig {
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    #[serde(default)]
    pub dns: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for LocalNodesConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            dns: None,
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub deployment_type: DeploymentType,
    #[serde(default)]
    pub localnodes: LocalNodesConfig,
    #[serde(default = "default_interval")]
    pub node_registry_update_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            deployment_type: DeploymentType::default(),
            localnodes: LocalNodesConfig::default(),
            node_registry_update_interval_secs: default_interval(),
            request_timeout_secs: default_request_timeout(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config: Self = match path {
            Some(path) => read_json(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.address_source()?;
        Ok(config)
    }

    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FEDX_DEPLOYMENT_TYPE") {
            self.deployment_type = match v.to_ascii_uppercase().as_str() {
                "LOCAL" => DeploymentType::Local,
                "KUBERNETES" => DeploymentType::Kubernetes,
                _ => {
                    return Err(ConfigError::Env {
                        variable: "FEDX_DEPLOYMENT_TYPE".into(),
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = lookup("FEDX_LOCALNODES_CONFIG_FILE") {
            self.localnodes.config_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FEDX_LOCALNODES_DNS") {
            self.localnodes.dns = Some(v);
        }
        if let Some(v) = lookup("FEDX_LOCALNODES_PORT") {
            self.localnodes.port = parse_env("FEDX_LOCALNODES_PORT", v)?;
        }
        if let Some(v) = lookup("FEDX_NODE_REGISTRY_UPDATE_INTERVAL") {
            self.node_registry_update_interval_secs =
                parse_env("FEDX_NODE_REGISTRY_UPDATE_INTERVAL", v)?;
        }
        if let Some(v) = lookup("FEDX_REQUEST_TIMEOUT") {
            self.request_timeout_secs = parse_env("FEDX_REQUEST_TIMEOUT", v)?;
        }
        if let Some(v) = lookup("FEDX_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Where the node registry finds worker addresses for this deployment type
    pub fn address_source(&self) -> Result<AddressSource, ConfigError> {
        match self.deployment_type {
            DeploymentType::Local => self
                .localnodes
                .config_file
                .clone()
                .map(|path| AddressSource::Static { path })
                .ok_or_else(|| {
                    ConfigError::Invalid("LOCAL deployment needs localnodes.config_file".into())
                }),
            DeploymentType::Kubernetes => self
                .localnodes
                .dns
                .clone()
                .map(|name| AddressSource::Dns {
                    name,
                    port: self.localnodes.port,
                })
                .ok_or_else(|| {
                    ConfigError::Invalid("KUBERNETES deployment needs localnodes.dns".into())
                }),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.node_registry_update_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn worker_defaults() {
        let config: WorkerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.privacy.minimum_row_count, 10);
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.role, NodeRole::Local);
    }

    #[test]
    fn worker_file_and_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "identifier": "globalnode",
                "role": "GLOBALWORKER",
                "port": 5680,
                "remote_databases": {{"127.0.0.1:50001": "/data/localnode1.db"}}
            }}"#
        )
        .unwrap();

        let mut config: WorkerConfig = read_json(file.path()).unwrap();
        config
            .apply_env(env(&[("FEDX_MINIMUM_ROW_COUNT", "3"), ("FEDX_PORT", "5690")]))
            .unwrap();

        assert_eq!(config.identifier, "globalnode");
        assert_eq!(config.role, NodeRole::Global);
        assert_eq!(config.port, 5690);
        assert_eq!(config.privacy.minimum_row_count, 3);
        assert_eq!(
            config.remote_databases()["127.0.0.1:50001"],
            "/data/localnode1.db"
        );
        assert!(!format!("{:?}", config).contains("/data/localnode1.db"));
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = WorkerConfig::default();
        let err = config
            .apply_env(env(&[("FEDX_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
        assert!(err.to_string().contains("FEDX_PORT"));
    }

    #[test]
    fn identifier_must_fit_table_names() {
        let config = WorkerConfig {
            identifier: "local_node".into(),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn controller_address_source_follows_deployment_type() {
        let mut config = ControllerConfig::default();
        assert!(config.address_source().is_err());

        config
            .apply_env(env(&[
                ("FEDX_DEPLOYMENT_TYPE", "kubernetes"),
                ("FEDX_LOCALNODES_DNS", "localnodes"),
                ("FEDX_LOCALNODES_PORT", "5671"),
            ]))
            .unwrap();
        assert_eq!(
            config.address_source().unwrap(),
            AddressSource::Dns {
                name: "localnodes".into(),
                port: 5671
            }
        );
        assert_eq!(config.refresh_interval(), Duration::from_secs(10));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = WorkerConfig::load(Some(Path::new("/nonexistent/worker.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
