//! Configuration types for the detour proxy.

mod listen;
mod throttle;
mod upstream;

use std::path::Path;
use std::time::Duration;

use crate::throttle::Leg;
use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use listen::{ListenConfig, MetricsConfig};
pub use throttle::{LegThrottleConfig, ThrottleConfig};
pub use upstream::{ConnectionPoolConfig, UpstreamConfig};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: ListenConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Origin every non-bypassed transaction is forwarded to
    pub upstream: UpstreamConfig,

    /// Default shaping applied when a message carries no directive
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    /// Fail transactions still running after this many milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Config {
    /// Minimal configuration forwarding `port` to `upstream_url`.
    pub fn new(port: u16, upstream_url: impl Into<String>) -> Self {
        Self {
            listen: ListenConfig::new(port),
            metrics: MetricsConfig::default(),
            upstream: UpstreamConfig::new(upstream_url),
            throttle: ThrottleConfig::default(),
            connection_pool: ConnectionPoolConfig::default(),
            timeout_ms: None,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.upstream.validate().map_err(|e| anyhow::anyhow!(e))?;

        if self.metrics.enabled && self.metrics.port == self.listen.port {
            anyhow::bail!(
                "Metrics port {} collides with the listener port. Pick a different 'metrics.port'",
                self.metrics.port
            );
        }

        for leg in [Leg::Request, Leg::Response] {
            self.throttle
                .leg(leg)
                .to_throttle()
                .with_context(|| format!("invalid 'throttle.{leg}' section"))?;
        }

        if self.timeout_ms == Some(0) {
            anyhow::bail!("'timeout_ms' must be greater than zero when set");
        }

        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::Throttle;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
listen:
  port: 8080
metrics:
  port: 9091
upstream:
  url: "http://127.0.0.1:8000"
throttle:
  request:
    latency_ms: 100
  response:
    latency_ms: 20
    rate_bytes_per_sec: 1024000
timeout_ms: 30000
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen.port, 8080);
        assert_eq!(config.listen.address, "0.0.0.0");
        assert_eq!(config.metrics.port, 9091);
        assert!(config.metrics.enabled);
        assert_eq!(
            config.throttle.request.to_throttle().unwrap(),
            Some(Throttle::latency(100))
        );
        let response = config.throttle.response.to_throttle().unwrap().unwrap();
        assert_eq!(response.latency_ms(), Some(20));
        assert_eq!(response.rate_bytes_per_sec(), Some(1_024_000));
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_defaults() {
        let yaml = r#"
listen:
  port: 8080
upstream:
  url: "https://api.example.com"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.metrics.port, 9090);
        assert_eq!(config.connection_pool.max_idle_per_host, 100);
        assert_eq!(config.connection_pool.idle_timeout_secs, 90);
        assert_eq!(config.connection_pool.keepalive_timeout_secs, 60);
        assert_eq!(config.connection_pool.connect_timeout_secs, 5);
        assert_eq!(config.throttle.request.to_throttle().unwrap(), None);
        assert!(config.timeout().is_none());
        assert!(!config.upstream.tls_skip_verify);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let mut config = Config::new(8080, "http://127.0.0.1:8000");
        config.throttle.response.rate_bytes_per_sec = Some(0);
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("throttle.response"));
    }

    #[test]
    fn test_upstream_url_validation() {
        for bad in ["127.0.0.1:8000", "ftp://files.example.com", "http://host/?q=1"] {
            let config = Config::new(8080, bad);
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
        Config::new(8080, "http://127.0.0.1:8000/base")
            .validate()
            .unwrap();
    }

    #[test]
    fn test_metrics_port_collision() {
        let mut config = Config::new(9090, "http://127.0.0.1:8000");
        assert!(config.validate().is_err());
        config.metrics.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "listen:\n  port: 8081\nupstream:\n  url: \"http://localhost:3000\"\ntimeout_ms: 0"
        )
        .unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));

        let missing = Config::from_file("/nonexistent/detour.yaml").unwrap_err();
        assert!(missing.to_string().contains("failed to read config file"));
    }
}
