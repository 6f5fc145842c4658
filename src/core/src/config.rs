use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ShimError};

/// Shim configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Root directory holding one working directory per container
    pub root_dir: PathBuf,

    /// Unix socket of the execution backend
    pub backend_socket: PathBuf,

    /// Upper bound for establishing a backend connection, in seconds
    pub dial_timeout_secs: u64,

    /// Interval between liveness polls while waiting for a graceful stop
    pub stop_poll_interval_ms: u64,

    /// Where container stdio is wired on the host side
    pub host_stdio: HostStdio,

    /// Image fetch tool configuration
    pub dist: DistConfig,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/var/lib/ctrshim"),
            backend_socket: PathBuf::from("/run/containerd/containerd.sock"),
            dial_timeout_secs: 100,
            stop_poll_interval_ms: 100,
            host_stdio: HostStdio::Inherit,
            dist: DistConfig::default(),
        }
    }
}

impl ShimConfig {
    /// Parse a configuration from YAML. Absent fields keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ShimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ShimError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Loaded shim configuration");
        Self::from_yaml_str(&data)
    }

    /// Reject configurations the shim cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(ShimError::Config("root_dir must not be empty".to_string()));
        }
        if self.backend_socket.as_os_str().is_empty() {
            return Err(ShimError::Config(
                "backend_socket must not be empty".to_string(),
            ));
        }
        if self.dial_timeout_secs == 0 {
            return Err(ShimError::Config(
                "dial_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Backend dial timeout
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// Graceful stop poll interval
    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms.max(1))
    }
}

/// Host side of container stdio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStdio {
    /// Copy the shim's own stdin/stdout/stderr to and from the container
    Inherit,
    /// Feed the container an empty stdin and drop its output
    Discard,
}

/// Configuration for the `dist` image fetch tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistConfig {
    /// Path to the `dist` binary
    pub binary: PathBuf,

    /// Content store root passed as `--root`; the tool default when unset
    pub root: Option<PathBuf>,

    /// Manifest media type requested from the registry
    pub manifest_media_type: String,

    /// Maximum number of layers fetched concurrently
    pub max_concurrent_fetches: usize,
}

impl Default for DistConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("dist"),
            root: None,
            manifest_media_type: "application/vnd.docker.distribution.manifest.v2+json"
                .to_string(),
            max_concurrent_fetches: 10,
        }
    }
}
