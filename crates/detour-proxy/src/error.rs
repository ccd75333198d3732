//! Error types surfaced by the proxy engine.
//!
//! Every failure of a transaction ends up as exactly one [`ProxyError`],
//! regardless of the stage that produced it.

use crate::hooks::Phase;
use crate::throttle::Leg;
use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// A registered hook returned an error, panicked, or dropped its continuation.
    #[error("{phase} hook failed: {message}")]
    Hook {
        phase: Phase,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// Reading a body source or writing to a sink failed.
    #[error("transport failure on the {leg} leg: {message}")]
    Transport {
        leg: Leg,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// The origin collaborator failed to produce a response.
    #[error("origin dispatch failed: {message}")]
    OriginDispatch {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("invalid shaping directive: {0}")]
    ShapingConfig(String),
    /// A caller-supplied deadline expired before the transaction finished.
    #[error("transaction timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

impl ProxyError {
    pub fn hook(phase: Phase, message: impl Into<String>) -> Self {
        Self::Hook {
            phase,
            message: message.into(),
            source: None,
        }
    }

    pub fn transport(leg: Leg, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self::Transport {
            leg,
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn origin(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self::OriginDispatch {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Convert a hook's error into a proxy error.
    ///
    /// Errors that already are a `ProxyError` (for instance a rejected
    /// shaping directive propagated with `?`) keep their kind.
    pub(crate) fn from_hook(phase: Phase, err: anyhow::Error) -> Self {
        match err.downcast::<ProxyError>() {
            Ok(proxy_err) => proxy_err,
            Err(err) => Self::Hook {
                phase,
                message: format!("{err:#}"),
                source: Some(err.into()),
            },
        }
    }

    /// Descriptive message accompanying the error, when one was recorded.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Hook { message, .. }
            | Self::Transport { message, .. }
            | Self::OriginDispatch { message, .. } => Some(message),
            Self::ShapingConfig(message) => Some(message),
            Self::TimedOut(_) => None,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hook { .. } => "hook",
            Self::Transport { .. } => "transport",
            Self::OriginDispatch { .. } => "origin",
            Self::ShapingConfig(_) => "shaping_config",
            Self::TimedOut(_) => "timeout",
        }
    }
}
