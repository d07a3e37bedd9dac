use crate::errors::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Address the HTTP server binds to
    pub listen_addr: String,
    /// Peers unseen for longer than this are dropped from listings
    pub stale_after_secs: u64,
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7470".to_string(),
            stale_after_secs: 60,
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Default configuration file path: `~/.graphmesh/coordinator.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoordinatorError::Config("cannot determine home directory".into()))?;
        Ok(home.join(".graphmesh").join("coordinator.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoordinatorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(CoordinatorError::Config("listen_addr must not be empty".into()));
        }
        if self.stale_after_secs == 0 {
            return Err(CoordinatorError::Config("stale_after_secs must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("coordinator.toml");

        let mut config = CoordinatorConfig::default();
        config.stale_after_secs = 90;
        config.save(&path).unwrap();

        let loaded = CoordinatorConfig::load(&path).unwrap();
        assert_eq!(loaded.stale_after_secs, 90);
        assert_eq!(loaded.listen_addr, "127.0.0.1:7470");
    }

    #[test]
    fn test_default_path_under_home() {
        if let Some(home) = dirs::home_dir() {
            let path = CoordinatorConfig::default_path().unwrap();
            assert!(path.starts_with(home));
            assert!(path.ends_with(".graphmesh/coordinator.toml"));
        }
    }

    #[test]
    fn test_validation_rejects_zero_staleness() {
        let mut config = CoordinatorConfig::default();
        config.stale_after_secs = 0;
        assert!(config.validate().is_err());
    }
}
