//! Detour: an intercepting HTTP proxy engine.
//!
//! Every client request becomes a [`Transaction`] that flows through five
//! ordered stages: request interception, request transmission, origin
//! dispatch, response interception and response transmission. Hooks may
//! rewrite either message, answer the request themselves (skipping the
//! origin), share values through the transaction's [`DataStore`], and attach
//! a [`Throttle`] to simulate latency and limited bandwidth on either leg.
//!
//! ```ignore
//! let proxy = Proxy::builder(HttpOrigin::new("http://127.0.0.1:8000")?)
//!     .hook(Phase::Request, Hook::sync(|tx| {
//!         tx.response.slow(Throttle::latency(100));
//!         Ok(())
//!     }))
//!     .build();
//! let mut response = proxy.handle(request).await?;
//! // The head is back; the shaped body arrives as it is read.
//! let body = response.take_body().collect().await?;
//! ```

// ===== Engine =====
pub mod error;
pub mod hooks;
pub mod message;
pub mod pipeline;
pub mod store;
pub mod throttle;

// ===== Collaborators =====
pub mod config;
pub mod metrics;
pub mod origin;
pub mod proxy;

pub use error::ProxyError;
pub use hooks::{Hook, HookResult, Hooks, Next, Phase};
pub use message::{Body, HttpBody, Request, Response};
pub use origin::{origin_fn, HttpOrigin, Origin};
pub use pipeline::{Proxy, ProxyBuilder, Transaction};
pub use store::DataStore;
pub use throttle::{Leg, Throttle};
