use std::collections::BTreeMap;
use std::fmt;

use http::header::COOKIE;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

pub const BODY_PRINT_LIMIT: usize = 10_000;

/// Specifies limitations on printing request bodies when logging requests. For some mock servers
/// the bodies may be too large to reasonably print and it may be desirable to limit them.
#[derive(Debug, Copy, Clone)]
pub enum BodyPrintLimit {
    /// Maximum length of a body to print in bytes.
    Limited(usize),
    /// There is no limit to the size of a body that may be printed.
    Unlimited,
}

/// An incoming request to a [`MockEngine`].
///
/// The path is kept exactly as it arrived on the wire (no percent-decoding) so that
/// malformed or special-character segments can still be matched by a [`PathPattern`].
///
/// A `Request` is immutable once built: the engine shares it with scripts behind an `Arc`
/// for the duration of one evaluation.
///
/// [`MockEngine`]: crate::MockEngine
/// [`PathPattern`]: crate::PathPattern
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    query_params: BTreeMap<String, Vec<String>>,
    headers: HeaderMap,
    cookies: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Request {
    /// Build a request from a method and a raw request target, e.g. `/hello/world?a=1&a=2`.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        let path = if path.is_empty() { "/" } else { path };
        let query_params = query.as_deref().map(parse_query).unwrap_or_default();
        Self {
            method,
            path: path.to_string(),
            query,
            query_params,
            headers: HeaderMap::new(),
            cookies: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Append a header value. `Cookie` headers are parsed into [`Request::cookies`].
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if name == COOKIE {
            parse_cookies(&value, &mut self.cookies);
        }
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The raw, not percent-decoded, path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The raw request target: path plus query string.
    pub fn uri(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Decoded query parameters. A key may repeat: values keep their order of appearance.
    pub fn query_params(&self) -> &BTreeMap<String, Vec<String>> {
        &self.query_params
    }

    /// The first value of the query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Request headers; lookups are case-insensitive and a header may carry multiple values.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Cookies sent with the request, by name.
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub(crate) async fn from_hyper(
        request: hyper::Request<hyper::body::Incoming>,
    ) -> Result<Request, hyper::Error> {
        let (parts, body) = request.into_parts();
        let body = body.collect().await?.to_bytes();

        let target = match parts.uri.query() {
            Some(query) => format!("{}?{}", parts.uri.path(), query),
            None => parts.uri.path().to_string(),
        };
        let mut request = Request::new(parts.method, &target).with_body(body.to_vec());
        for (name, value) in parts.headers.iter() {
            request = request.with_header(name.clone(), value.clone());
        }
        Ok(request)
    }

    pub(crate) fn print_with_limit(
        &self,
        mut buffer: impl fmt::Write,
        body_print_limit: BodyPrintLimit,
    ) -> fmt::Result {
        writeln!(buffer, "{} {}", self.method, self.uri())?;
        for name in self.headers.keys() {
            let values = self
                .headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()))
                .collect::<Vec<_>>();
            let values = values.join(",");
            writeln!(buffer, "{}: {}", name, values)?;
        }

        match body_print_limit {
            BodyPrintLimit::Limited(limit) if self.body.len() > limit => {
                // Back off to the closest char boundary at or below the limit.
                let truncated = (limit.saturating_sub(3)..=limit)
                    .rev()
                    .find_map(|end| std::str::from_utf8(&self.body[..end]).ok());
                match truncated {
                    Some(truncated) => {
                        writeln!(buffer, "{}", truncated)?;
                        writeln!(
                            buffer,
                            "We truncated the body because it was too large: {} bytes (limit: {} bytes)",
                            self.body.len(),
                            limit
                        )?;
                        writeln!(
                            buffer,
                            "Increase this limit by setting `SCENARIO_MOCK_BODY_PRINT_LIMIT`, or calling `MockServerBuilder::body_print_limit` when building your MockServer instance"
                        )
                    }
                    None => writeln!(
                        buffer,
                        "Body is likely binary (invalid utf-8) size is {} bytes",
                        self.body.len()
                    ),
                }
            }
            _ => {
                if let Ok(body) = std::str::from_utf8(&self.body) {
                    writeln!(buffer, "{}", body)
                } else {
                    writeln!(
                        buffer,
                        "Body is likely binary (invalid utf-8) size is {} bytes",
                        self.body.len()
                    )
                }
            }
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print_with_limit(f, BodyPrintLimit::Unlimited)
    }
}

fn parse_query(query: &str) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

// `Cookie: a=b; c=d`. Pairs without `=` are ignored, later duplicates win.
fn parse_cookies(header: &HeaderValue, cookies: &mut BTreeMap<String, String>) {
    let header = String::from_utf8_lossy(header.as_bytes());
    for pair in header.split(';') {
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
}
