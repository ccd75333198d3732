//! Listen and metrics configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    pub port: u16,
    /// Bind address (default: all interfaces)
    #[serde(default = "default_listen_address")]
    pub address: String,
}

impl ListenConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            address: default_listen_address(),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
            enabled: default_metrics_enabled(),
        }
    }
}
