//! Upstream and connection pool configuration.

use hyper::Uri;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to, e.g. `http://127.0.0.1:8000`
    pub url: String,
    /// Skip TLS certificate verification (for self-signed certs in dev/test)
    #[serde(default)]
    pub tls_skip_verify: bool,
}

impl UpstreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls_skip_verify: false,
        }
    }

    /// Check that the URL carries an http(s) scheme and an authority.
    pub fn validate(&self) -> Result<(), String> {
        let uri: Uri = self
            .url
            .parse()
            .map_err(|e| format!("Invalid upstream URL '{}': {e}", self.url))?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            Some(other) => {
                return Err(format!(
                    "Unsupported upstream scheme '{other}'. Currently supported: http, https"
                ))
            }
            None => return Err(format!("Invalid URL format (missing scheme): {}", self.url)),
        }
        if uri.authority().is_none() {
            return Err(format!("Invalid URL format (missing host): {}", self.url));
        }
        if uri.query().is_some() {
            return Err(format!("Upstream URL must not carry a query: {}", self.url));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_timeout_secs: default_keepalive_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}
