//! Node configuration (§6, "Configuration (recognized options)").
//!
//! Parsing arbitrary external config formats is out of scope (§1), but
//! loading SmartXChain's own recognized TOML layout is ambient plumbing
//! every node needs — grounded in `obscura-core`'s `Config`/`ConfigBuilder`
//! fluent-builder pattern.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityProtocol {
    Tls11,
    Tls12,
    Tls13,
}

impl Default for SecurityProtocol {
    fn default() -> Self {
        SecurityProtocol::Tls12
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub chain_id: String,
    pub miner_address: String,
    pub node_address: String,
    pub url: String,
    pub peers: Vec<String>,
    pub blockchain_path: String,
    pub ssl: bool,
    pub security_protocol: SecurityProtocol,
    pub max_parallel_connections: u32,
    pub debug: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            chain_id: "smartxchain-dev".to_string(),
            miner_address: "miner-local".to_string(),
            node_address: "https://127.0.0.1:9000".to_string(),
            url: "https://127.0.0.1:9000".to_string(),
            peers: Vec::new(),
            blockchain_path: "./data".to_string(),
            ssl: false,
            security_protocol: SecurityProtocol::Tls12,
            max_parallel_connections: 32,
            debug: false,
        }
    }
}

impl NodeConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(contents)?;
        if config.chain_id.is_empty() {
            return Err(ConfigError::MissingField("ChainId"));
        }
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn database_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.blockchain_path).join(format!("{}.db", self.chain_id))
    }

    pub fn chain_dump_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.blockchain_path).join(format!("chain-{}", self.chain_id))
    }

    pub fn archive_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.blockchain_path).join("archive")
    }
}

/// Fluent builder mirroring `obscura-core`'s `ConfigBuilder`, so operator
/// code and tests can assemble a [`NodeConfig`] without constructing the
/// struct literal directly.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: NodeConfig,
}

impl ConfigBuilder {
    pub fn chain_id(mut self, value: impl Into<String>) -> Self {
        self.config.chain_id = value.into();
        self
    }

    pub fn miner_address(mut self, value: impl Into<String>) -> Self {
        self.config.miner_address = value.into();
        self
    }

    pub fn node_address(mut self, value: impl Into<String>) -> Self {
        self.config.node_address = value.into();
        self
    }

    pub fn url(mut self, value: impl Into<String>) -> Self {
        self.config.url = value.into();
        self
    }

    pub fn peers(mut self, value: Vec<String>) -> Self {
        self.config.peers = value;
        self
    }

    pub fn blockchain_path(mut self, value: impl Into<String>) -> Self {
        self.config.blockchain_path = value.into();
        self
    }

    pub fn ssl(mut self, value: bool) -> Self {
        self.config.ssl = value;
        self
    }

    pub fn security_protocol(mut self, value: SecurityProtocol) -> Self {
        self.config.security_protocol = value;
        self
    }

    pub fn max_parallel_connections(mut self, value: u32) -> Self {
        self.config.max_parallel_connections = value;
        self
    }

    pub fn debug(mut self, value: bool) -> Self {
        self.config.debug = value;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_chain_id() {
        assert!(!NodeConfig::default().chain_id.is_empty());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = NodeConfig::builder()
            .chain_id("custom-chain")
            .ssl(true)
            .build();
        assert_eq!(config.chain_id, "custom-chain");
        assert!(config.ssl);
    }

    #[test]
    fn from_toml_str_rejects_missing_chain_id() {
        let result = NodeConfig::from_toml_str("miner_address = \"m\"\nnode_address = \"n\"\n");
        assert!(matches!(result, Err(ConfigError::MissingField("ChainId"))));
    }

    #[test]
    fn from_toml_str_parses_recognized_options() {
        let toml_str = r#"
            chain_id = "prod-chain"
            miner_address = "miner-1"
            node_address = "https://node1.example"
            url = "https://node1.example"
            peers = ["https://node2.example"]
            blockchain_path = "/var/lib/smartxchain"
            ssl = true
            max_parallel_connections = 64
            debug = false
        "#;
        let config = NodeConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.chain_id, "prod-chain");
        assert_eq!(config.peers, vec!["https://node2.example".to_string()]);
    }
}
