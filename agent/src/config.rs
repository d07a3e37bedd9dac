use crate::errors::{MeshError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Main configuration for a graphmesh agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub peer: PeerConfig,
    pub rpc: RpcConfig,
    pub coordination: CoordinationConfig,
    pub logging: LoggingConfig,
}

/// Peer identity and addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Stable string id for this peer; generated on first run
    pub peer_id: String,
    /// Address the RPC server binds to
    pub listen_addr: String,
    /// Address other peers should dial; defaults to listen_addr
    pub advertise_addr: String,
    /// Number of tokio worker threads for the runtime
    pub worker_threads: usize,
}

/// RPC deadlines and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Deadline for a single request/response call, in milliseconds
    pub request_timeout_ms: u64,
    /// Deadline for a whole streaming call, in milliseconds
    pub stream_timeout_ms: u64,
    /// Bounded attempts for idempotent calls
    pub retry_attempts: u32,
    /// Linear backoff increment between attempts, in milliseconds
    pub retry_backoff_ms: u64,
}

/// Coordination-service connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Base URL of the coordinator (e.g. http://127.0.0.1:7470)
    pub url: String,
    /// Key namespace; node keys are "<namespace>.node.<id>"
    pub namespace: String,
    /// Service name under which this peer registers
    pub service: String,
    /// Heartbeat interval, in seconds
    pub heartbeat_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    pub log_dir: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            peer: PeerConfig {
                peer_id: Uuid::new_v4().to_string(),
                listen_addr: "127.0.0.1:7400".to_string(),
                advertise_addr: "127.0.0.1:7400".to_string(),
                worker_threads: 4,
            },
            rpc: RpcConfig {
                request_timeout_ms: 5_000,
                stream_timeout_ms: 30_000,
                retry_attempts: 3,
                retry_backoff_ms: 200,
            },
            coordination: CoordinationConfig {
                url: "http://127.0.0.1:7470".to_string(),
                namespace: "graphmesh".to_string(),
                service: "graphmesh".to_string(),
                heartbeat_secs: 15,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_to_file: false,
                log_dir: None,
            },
        }
    }
}

impl AgentConfig {
    /// Default configuration file path: `~/.graphmesh/agent.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| MeshError::Config("cannot determine home directory".into()))?;
        Ok(home.join(".graphmesh").join("agent.toml"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::info!(path = %path.display(), "saved configuration");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.peer.peer_id.is_empty() {
            return Err(MeshError::Config("peer.peer_id must not be empty".into()));
        }
        if self.peer.worker_threads == 0 {
            return Err(MeshError::Config("peer.worker_threads must be > 0".into()));
        }
        if self.rpc.request_timeout_ms == 0 {
            return Err(MeshError::Config("rpc.request_timeout_ms must be > 0".into()));
        }
        if self.coordination.namespace.is_empty() {
            return Err(MeshError::Config(
                "coordination.namespace must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.request_timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.stream_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.rpc.retry_backoff_ms)
    }

    /// Key under which a node id's owner address is published
    pub fn node_key(&self, id: &str) -> String {
        node_key(&self.coordination.namespace, id)
    }
}

/// Key convention: `<namespace>.node.<id>` -> owner peer address
pub fn node_key(namespace: &str, id: &str) -> String {
    format!("{}.node.{}", namespace, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.peer.peer_id.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agent.toml");

        let mut config = AgentConfig::default();
        config.peer.peer_id = "mgr".to_string();
        config.rpc.retry_attempts = 7;
        config.save(&path).unwrap();

        let loaded = AgentConfig::load(&path).unwrap();
        assert_eq!(loaded.peer.peer_id, "mgr");
        assert_eq!(loaded.rpc.retry_attempts, 7);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let mut config = AgentConfig::default();
        config.peer.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_key_convention() {
        let config = AgentConfig::default();
        assert_eq!(config.node_key("abc"), "graphmesh.node.abc");
    }
}
