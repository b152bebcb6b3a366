//! flowd.toml configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Durations are humane strings: `"500ms"`, `"3s"`, `"1m"`.
//!
//! ```toml
//! http_port = 8080
//! data_dir = "/var/lib/flowgrid"
//! assign_interval = "3s"
//! monitor_interval = "5s"
//! heartbeat_check_interval = "10s"
//! heartbeat_timeout = "30s"
//! lease_check_interval = "5s"
//! rpc_timeout = "5s"
//! connect_timeout = "3s"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    pub http_port: u16,
    pub data_dir: PathBuf,
    #[serde(deserialize_with = "humane")]
    pub assign_interval: Duration,
    #[serde(deserialize_with = "humane")]
    pub monitor_interval: Duration,
    #[serde(deserialize_with = "humane")]
    pub heartbeat_check_interval: Duration,
    #[serde(deserialize_with = "humane")]
    pub heartbeat_timeout: Duration,
    #[serde(deserialize_with = "humane")]
    pub lease_check_interval: Duration,
    #[serde(deserialize_with = "humane")]
    pub rpc_timeout: Duration,
    #[serde(deserialize_with = "humane")]
    pub connect_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            data_dir: PathBuf::from("/var/lib/flowgrid"),
            assign_interval: Duration::from_secs(3),
            monitor_interval: Duration::from_secs(5),
            heartbeat_check_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            lease_check_interval: Duration::from_secs(5),
            rpc_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoordinatorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject settings the tick loops cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let intervals = [
            ("assign_interval", self.assign_interval),
            ("monitor_interval", self.monitor_interval),
            ("heartbeat_check_interval", self.heartbeat_check_interval),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("lease_check_interval", self.lease_check_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if self.heartbeat_timeout < Duration::from_secs(1) {
            anyhow::bail!(
                "heartbeat_timeout ({:?}) must be at least one second",
                self.heartbeat_timeout
            );
        }
        if self.heartbeat_timeout < self.heartbeat_check_interval {
            anyhow::bail!(
                "heartbeat_timeout ({:?}) is shorter than heartbeat_check_interval ({:?})",
                self.heartbeat_timeout,
                self.heartbeat_check_interval
            );
        }
        Ok(())
    }
}

/// Parse `"250ms"`, `"30s"`, `"5m"` or `"1h"`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3_600_000)
    } else {
        (s, 1_000)
    };
    let value = digits
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid duration {s:?}, expected e.g. \"500ms\", \"3s\" or \"1m\""))?;
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration {s:?} is too large"))
}

fn humane<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: CoordinatorConfig = toml::from_str("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
http_port = 9000
assign_interval = "500ms"
heartbeat_timeout = "1m"
"#;
        let config: CoordinatorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.assign_interval, Duration::from_millis(500));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(config.monitor_interval, Duration::from_secs(5));
    }

    #[test]
    fn bad_duration_is_rejected() {
        assert!(toml::from_str::<CoordinatorConfig>(r#"rpc_timeout = "fast""#).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<CoordinatorConfig>("assign_every = 3").is_err());
    }

    #[test]
    fn zero_interval_fails_validation() {
        let config = CoordinatorConfig {
            monitor_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sub_second_heartbeat_timeout_fails_validation() {
        let config = CoordinatorConfig {
            heartbeat_check_interval: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_lease_check_interval_fails_validation() {
        let config: CoordinatorConfig = toml::from_str(r#"lease_check_interval = "0s""#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowd.toml");
        std::fs::write(&path, "data_dir = \"/tmp/flowgrid\"\n").unwrap();

        let config = CoordinatorConfig::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/flowgrid"));
    }
}
