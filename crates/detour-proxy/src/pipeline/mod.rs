//! The transaction pipeline.
//!
//! [`Proxy::handle`] drives one [`Transaction`] through request
//! interception, request transmission, origin dispatch, response
//! interception and response transmission.

mod engine;
mod transaction;

pub use engine::{Proxy, ProxyBuilder};
pub use transaction::Transaction;
