use crate::error::{BoxError, ProxyError};
use crate::message::{Body, Request};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};
use std::io;

/// Wrap an inbound hyper request; the body stays lazy until the request leg
/// transmits it.
pub fn engine_request<B>(req: hyper::Request<B>) -> Request
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();
    let body = if body.is_end_stream() {
        Body::empty()
    } else {
        Body::from_stream(body.into_data_stream().map_err(io::Error::other))
    };
    Request::from(hyper::Request::from_parts(parts, body))
}

/// Helper function to create an error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Response sent to the client when a transaction fails.
pub fn response_for_error(err: &ProxyError) -> Response<Full<Bytes>> {
    let status = match err {
        ProxyError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    error_response(status, &err.to_string())
}
