use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::relay::RelayTiming;

/// Process configuration, read once from `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Prometheus exporter port. `None` disables the exporter.
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    /// Seed the reference catalog into an empty store.
    pub seed: bool,
    /// Upstream realtime telemetry hub. `None` disables the IoT relay.
    pub iot_hub_url: Option<String>,
    pub iot_tenant: String,
    pub iot_retry: Duration,
    /// Upstream silence after which the relay drops and reopens the session.
    pub iot_idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            seed: true,
            iot_hub_url: None,
            iot_tenant: "innovia".into(),
            iot_retry: Duration::from_secs(10),
            iot_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bind: get("SLOTBOOK_BIND").unwrap_or(defaults.bind),
            port: parse(&lookup, "SLOTBOOK_PORT")?.unwrap_or(defaults.port),
            data_dir: get("SLOTBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            metrics_port: parse(&lookup, "SLOTBOOK_METRICS_PORT")?,
            compact_threshold: parse(&lookup, "SLOTBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            seed: parse(&lookup, "SLOTBOOK_SEED")?.unwrap_or(defaults.seed),
            iot_hub_url: get("SLOTBOOK_IOT_HUB_URL"),
            iot_tenant: get("SLOTBOOK_IOT_TENANT").unwrap_or(defaults.iot_tenant),
            iot_retry: parse(&lookup, "SLOTBOOK_IOT_RETRY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.iot_retry),
            iot_idle_timeout: match parse(&lookup, "SLOTBOOK_IOT_IDLE_SECS")? {
                Some(0) => {
                    return Err(ConfigError {
                        var: "SLOTBOOK_IOT_IDLE_SECS",
                        value: "0".into(),
                    });
                }
                Some(secs) => Duration::from_secs(secs),
                None => defaults.iot_idle_timeout,
            },
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn relay_timing(&self) -> RelayTiming {
        RelayTiming {
            retry: self.iot_retry,
            idle_timeout: self.iot_idle_timeout,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value: v }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:8080");
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/bookings.wal"));
        assert_eq!(cfg.iot_retry, Duration::from_secs(10));
        assert_eq!(cfg.relay_timing().idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides() {
        let cfg = from(&[
            ("SLOTBOOK_PORT", "9000"),
            ("SLOTBOOK_METRICS_PORT", "9100"),
            ("SLOTBOOK_SEED", "false"),
            ("SLOTBOOK_IOT_HUB_URL", "ws://localhost:5104/hub/telemetry"),
            ("SLOTBOOK_IOT_RETRY_SECS", "3"),
            ("SLOTBOOK_IOT_TENANT", "acme"),
            ("SLOTBOOK_IOT_IDLE_SECS", "45"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert!(!cfg.seed);
        assert_eq!(cfg.iot_hub_url.as_deref(), Some("ws://localhost:5104/hub/telemetry"));
        assert_eq!(cfg.iot_retry, Duration::from_secs(3));
        assert_eq!(cfg.iot_tenant, "acme");
        assert_eq!(cfg.iot_idle_timeout, Duration::from_secs(45));
    }

    #[test]
    fn blank_values_fall_back() {
        let cfg = from(&[("SLOTBOOK_PORT", " "), ("SLOTBOOK_IOT_HUB_URL", "")]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.iot_hub_url, None);
    }

    #[test]
    fn zero_idle_timeout_is_an_error() {
        let err = from(&[("SLOTBOOK_IOT_IDLE_SECS", "0")]).unwrap_err();
        assert_eq!(err.var, "SLOTBOOK_IOT_IDLE_SECS");
    }

    #[test]
    fn malformed_number_is_an_error() {
        let err = from(&[("SLOTBOOK_PORT", "eighty")]).unwrap_err();
        assert_eq!(err.var, "SLOTBOOK_PORT");
        assert!(err.to_string().contains("eighty"));
    }
}
