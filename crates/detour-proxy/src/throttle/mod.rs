//! Network-condition simulation.
//!
//! A [`Throttle`] is a shaping directive attached to a request or response:
//! an upfront latency, a sustained byte rate, or both. The directive is pure
//! configuration; [`shaper::transmit`] applies it when a body is actually sent.

pub mod shaper;

pub use shaper::{body_channel, transmit, BodySink, ChannelSink, Transfer};

use crate::error::ProxyError;
use std::fmt;
use std::time::Duration;

/// Which side of the proxy a body is travelling on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// Proxy to origin.
    Request,
    /// Proxy to client.
    Response,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Request => "request",
            Leg::Response => "response",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shaping directive: fixed startup latency and/or a byte rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Throttle {
    latency_ms: Option<u64>,
    rate_bytes_per_sec: Option<u64>,
}

impl Throttle {
    /// Build a directive, rejecting a zero rate.
    pub fn new(latency_ms: Option<u64>, rate_bytes_per_sec: Option<u64>) -> Result<Self, ProxyError> {
        if rate_bytes_per_sec == Some(0) {
            return Err(ProxyError::ShapingConfig(
                "rate_bytes_per_sec must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            latency_ms,
            rate_bytes_per_sec,
        })
    }

    /// Delay the first byte by `ms` milliseconds.
    pub fn latency(ms: u64) -> Self {
        Self {
            latency_ms: Some(ms),
            rate_bytes_per_sec: None,
        }
    }

    /// Limit throughput to `bytes_per_sec` bytes per second.
    pub fn rate(bytes_per_sec: u64) -> Result<Self, ProxyError> {
        Self::new(None, Some(bytes_per_sec))
    }

    /// Add a rate limit to an existing directive.
    pub fn with_rate(self, bytes_per_sec: u64) -> Result<Self, ProxyError> {
        Self::new(self.latency_ms, Some(bytes_per_sec))
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    pub fn rate_bytes_per_sec(&self) -> Option<u64> {
        self.rate_bytes_per_sec
    }

    pub fn latency_duration(&self) -> Option<Duration> {
        self.latency_ms.map(Duration::from_millis)
    }

    /// True when the directive adds neither latency nor a rate limit.
    pub fn is_unshaped(&self) -> bool {
        self.latency_ms.unwrap_or(0) == 0 && self.rate_bytes_per_sec.is_none()
    }
}
