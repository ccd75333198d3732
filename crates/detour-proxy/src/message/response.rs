use super::body::{Body, HttpBody};
use crate::throttle::Throttle;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::StatusCode;
use tracing::debug;

/// A response travelling back to the client.
///
/// Starts out unpopulated. A request hook that sets a status or a body turns
/// it into a canned response and the origin is skipped.
#[derive(Debug, Default)]
pub struct Response {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Body,
    throttle: Option<Throttle>,
    transmitted: bool,
}

impl Response {
    /// An unpopulated response.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
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

    /// Status that will be sent, `200 OK` when none was set.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn status_if_set(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
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

    /// Whether a status or a body has been supplied.
    pub fn is_populated(&self) -> bool {
        self.status.is_some() || !self.body.is_empty()
    }

    /// Attach a shaping directive for the download leg.
    ///
    /// Has no effect once the body has been sent.
    pub fn slow(&mut self, throttle: Throttle) -> &mut Self {
        if self.transmitted {
            debug!(?throttle, "response already sent, ignoring shaping directive");
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

    /// Same head with a different body, already marked transmitted.
    pub(crate) fn forward_with(&self, body: Body) -> Self {
        Self {
            status: self.status,
            headers: self.headers.clone(),
            body,
            throttle: self.throttle,
            transmitted: true,
        }
    }

    /// Convert into a hyper response. A streamed body stays lazy; framing
    /// headers are left for hyper to derive from the body.
    pub fn into_hyper(self) -> hyper::Response<HttpBody> {
        let status = self.status();
        let mut headers = self.headers;
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);

        let mut response = hyper::Response::new(self.body.into_http_body());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl<B: Into<Body>> From<hyper::Response<B>> for Response {
    fn from(resp: hyper::Response<B>) -> Self {
        let (parts, body) = resp.into_parts();
        Self {
            status: Some(parts.status),
            headers: parts.headers,
            body: body.into(),
            throttle: None,
            transmitted: false,
        }
    }
}
