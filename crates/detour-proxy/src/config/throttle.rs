//! Default shaping directives per leg.

use crate::error::ProxyError;
use crate::throttle::{Leg, Throttle};
use serde::{Deserialize, Serialize};

/// Latency and rate for one leg; both optional.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct LegThrottleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_bytes_per_sec: Option<u64>,
}

impl LegThrottleConfig {
    /// `None` when neither latency nor rate is configured.
    pub fn to_throttle(&self) -> Result<Option<Throttle>, ProxyError> {
        if self.latency_ms.is_none() && self.rate_bytes_per_sec.is_none() {
            return Ok(None);
        }
        Throttle::new(self.latency_ms, self.rate_bytes_per_sec).map(Some)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct ThrottleConfig {
    #[serde(default)]
    pub request: LegThrottleConfig,
    #[serde(default)]
    pub response: LegThrottleConfig,
}

impl ThrottleConfig {
    pub fn leg(&self, leg: Leg) -> &LegThrottleConfig {
        match leg {
            Leg::Request => &self.request,
            Leg::Response => &self.response,
        }
    }

    pub fn leg_mut(&mut self, leg: Leg) -> &mut LegThrottleConfig {
        match leg {
            Leg::Request => &mut self.request,
            Leg::Response => &mut self.response,
        }
    }
}
