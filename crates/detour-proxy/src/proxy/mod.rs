//! Client-facing HTTP transport.
//!
//! - `server` - ProxyServer accept loop and the metrics listener
//! - `conversion` - hyper <-> engine message conversion and error responses

mod conversion;
mod server;

pub use conversion::{engine_request, error_response, response_for_error};
pub use server::{build_proxy, serve_metrics, ProxyServer};
