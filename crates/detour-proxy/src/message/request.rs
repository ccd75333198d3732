use super::body::Body;
use crate::throttle::Throttle;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, Uri};
use tracing::debug;

/// A request travelling through the proxy.
///
/// Hooks may rewrite any part of it until it has been transmitted to the
/// origin.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
    throttle: Option<Throttle>,
    transmitted: bool,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Body::empty(),
            throttle: None,
            transmitted: false,
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Builder-style header insertion. Invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    /// Path and query of the target, `/` when the URI has none.
    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Attach a shaping directive for the upload leg.
    ///
    /// Has no effect once the body has been sent.
    pub fn slow(&mut self, throttle: Throttle) -> &mut Self {
        if self.transmitted {
            debug!(?throttle, "request already sent, ignoring shaping directive");
        } else {
            self.throttle = Some(throttle);
        }
        self
    }

    pub fn throttle(&self) -> Option<Throttle> {
        self.throttle
    }

    pub fn is_transmitted(&self) -> bool {
        self.transmitted
    }

    pub(crate) fn mark_transmitted(&mut self) {
        self.transmitted = true;
    }

    /// Copy handed to the origin once the body sits in memory.
    pub(crate) fn snapshot(&self) -> Option<Self> {
        Some(self.forward_with(self.body.try_clone()?))
    }

    /// Same head with a different body.
    pub(crate) fn forward_with(&self, body: Body) -> Self {
        Self {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            body,
            throttle: self.throttle,
            transmitted: self.transmitted,
        }
    }
}

impl<B: Into<Body>> From<hyper::Request<B>> for Request {
    fn from(req: hyper::Request<B>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: body.into(),
            throttle: None,
            transmitted: false,
        }
    }
}
