//! HTTP message representations handled by the engine.
//!
//! Headers use [`hyper::HeaderMap`], which matches names case-insensitively.
//! Bodies are either in memory or lazily streamed (see [`Body`]).

mod body;
mod request;
mod response;

pub use body::{Body, HttpBody};
pub use request::Request;
pub use response::Response;
