//! Origin dispatch.
//!
//! The origin is the collaborator that turns a (possibly rewritten) request
//! into a response. [`HttpOrigin`] forwards over the network; [`origin_fn`]
//! adapts a closure, which is handy for embedding and tests.

mod http;
mod tls;

pub use self::http::HttpOrigin;

use crate::error::ProxyError;
use crate::message::{Request, Response};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait Origin: Send + Sync {
    /// Produce the response for `request`.
    ///
    /// Unless [`Origin::streams_request_body`] says otherwise, the request
    /// body has already been transmitted and is held in memory, and
    /// `request.body()` can be drained as many times as needed via
    /// `Body::try_clone`.
    async fn dispatch(&self, request: Request) -> Result<Response, ProxyError>;

    /// Whether `dispatch` wants the request body while it is being shaped.
    ///
    /// When true, `dispatch` starts as soon as transmission begins and the
    /// request carries a lazy body fed by the shaper. `RequestSent` still runs
    /// once the last byte has been handed over, before the response is
    /// intercepted.
    fn streams_request_body(&self) -> bool {
        false
    }
}

#[async_trait]
impl<O: Origin + ?Sized> Origin for Arc<O> {
    async fn dispatch(&self, request: Request) -> Result<Response, ProxyError> {
        (**self).dispatch(request).await
    }

    fn streams_request_body(&self) -> bool {
        (**self).streams_request_body()
    }
}

/// Origin backed by an async closure.
pub struct FnOrigin<F> {
    f: F,
}

pub fn origin_fn<F, Fut>(f: F) -> FnOrigin<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, ProxyError>> + Send + 'static,
{
    FnOrigin { f }
}

#[async_trait]
impl<F, Fut> Origin for FnOrigin<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, ProxyError>> + Send + 'static,
{
    async fn dispatch(&self, request: Request) -> Result<Response, ProxyError> {
        (self.f)(request).await
    }
}
