use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;
use hyper::body::Bytes;

/// The response computed by a [`MockEngine`] for one request.
///
/// It carries no reference to the evaluation context it was materialized from.
///
/// [`MockEngine`]: crate::MockEngine
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    delay: Option<Duration>,
}

impl Response {
    /// An empty response with the given status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
            delay: None,
        }
    }

    pub(crate) fn from_parts(
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
        delay: Option<Duration>,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            delay,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The first value of header `name`, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Insert a header only if the response does not already carry one with that name.
    pub fn insert_header_if_absent(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.entry(name).or_insert(value);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The artificial latency the transport should wait for before replying.
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    pub(crate) fn with_body(mut self, body: impl Into<Vec<u8>>, mime: &'static str) -> Self {
        self.body = body.into();
        self.headers
            .insert(http::header::CONTENT_TYPE, HeaderValue::from_static(mime));
        self
    }

    pub(crate) fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let mut response = hyper::Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
