//! Interface configuration: endpoint naming, local state location and the
//! instance metadata service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Top-level interface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Relation endpoint name as declared by the charm (`aws` by default).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Directory holding the local durable key-value store.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Base URL of the EC2 instance metadata service.
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "aws".into()
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(".unit-state")
}
fn default_metadata_url() -> String {
    "http://169.254.169.254/latest/".into()
}
fn default_metadata_timeout_secs() -> u64 {
    10
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            state_dir: default_state_dir(),
            metadata_url: default_metadata_url(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
        }
    }
}

impl InterfaceConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("AWS_INTEGRATION_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(dir) = std::env::var("AWS_INTEGRATION_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("AWS_INTEGRATION_METADATA_URL") {
            config.metadata_url = url;
        }
        if let Ok(secs) = std::env::var("AWS_INTEGRATION_METADATA_TIMEOUT_SECS") {
            config.metadata_timeout_secs = secs.parse().map_err(|_| {
                Error::Config(format!("invalid metadata timeout: {}", secs))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: InterfaceConfig = serde_json::from_str(&content)?;
        config.validate()?;
        debug!("Loaded interface config from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() || self.endpoint.contains('.') {
            return Err(Error::Config(format!(
                "invalid endpoint name: {:?}",
                self.endpoint
            )));
        }
        if !self.metadata_url.ends_with('/') {
            return Err(Error::Config(
                "metadata_url must end with '/'".into(),
            ));
        }
        Ok(())
    }

    /// Namespaced name for this endpoint, e.g. `endpoint.aws.ready`.
    pub fn expand_name(&self, name: &str) -> String {
        format!("endpoint.{}.{}", self.endpoint, name)
    }

    /// Path of the SQLite file backing the local store.
    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join("interface-aws.db")
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}
