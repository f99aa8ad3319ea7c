//! Node configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use zebu_core::{ZebuError, ZebuResult};

/// Replication timing and buffering
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Period of the full-directory republish sweep
    #[serde(with = "humantime_serde")]
    pub republish_interval: Duration,

    /// Bound on every content store or transport call made for a caller
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Bound on the content store probe behind `healthz`
    #[serde(with = "humantime_serde")]
    pub health_timeout: Duration,

    /// First delay before resubscribing after a broken subscription
    #[serde(with = "humantime_serde")]
    pub backoff_initial: Duration,

    /// Ceiling on the resubscribe delay
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            republish_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(1),
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Log output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    pub filter: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Health endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Address for `/healthz` and `/readyz`; disabled when `None`
    pub listen_addr: Option<SocketAddr>,
}

/// Top-level node configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Records are kept under `<data_dir>/records`
    pub data_dir: PathBuf,
    pub replication: ReplicationConfig,
    pub log: LogConfig,
    pub health: HealthConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: PathBuf::from("zebu-data"),
            replication: ReplicationConfig::default(),
            log: LogConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> ZebuResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ZebuError::Config(format!("read {}: {e}", path.display())))?;
        let config: NodeConfig = serde_json::from_str(&text)
            .map_err(|e| ZebuError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ZebuResult<()> {
        let r = &self.replication;
        for (name, value) in [
            ("republish_interval", r.republish_interval),
            ("request_timeout", r.request_timeout),
            ("health_timeout", r.health_timeout),
            ("backoff_initial", r.backoff_initial),
        ] {
            if value.is_zero() {
                return Err(ZebuError::Config(format!("replication.{name} must be non-zero")));
            }
        }
        if r.backoff_max < r.backoff_initial {
            return Err(ZebuError::Config(
                "replication.backoff_max must be at least backoff_initial".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding one file per identity
    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.replication.republish_interval, Duration::from_secs(10));
        assert_eq!(config.replication.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zebu.json");
        std::fs::write(
            &path,
            r#"{"data_dir":"/var/lib/zebu","replication":{"republish_interval":"1m 30s","backoff_max":"5s","channel_capacity":64},"log":{"json":true},"health":{"listen_addr":"127.0.0.1:9090"}}"#,
        )
        .unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.records_dir(), PathBuf::from("/var/lib/zebu/records"));
        assert_eq!(config.replication.republish_interval, Duration::from_secs(90));
        assert_eq!(config.replication.backoff_max, Duration::from_secs(5));
        assert_eq!(config.replication.request_timeout, Duration::from_secs(5));
        assert!(config.log.json);
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.health.listen_addr, Some(SocketAddr::from(([127, 0, 0, 1], 9090))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = NodeConfig::default();
        config.replication.request_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ZebuError::Config(_))));

        let mut config = NodeConfig::default();
        config.replication.backoff_max = Duration::from_millis(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_errors_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NodeConfig::load(dir.path().join("missing.json")),
            Err(ZebuError::Config(_))
        ));
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(NodeConfig::load(&path), Err(ZebuError::Config(_))));
    }
}
