//! Request-scoped state shared by predicate evaluation, statement execution and response
//! materialization.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::feature::{Configuration, FeatureDefinition};
use crate::path_pattern::{PathBindings, PatternCache};
use crate::response::Response;
use crate::value::{SerializationError, Value};
use crate::Request;

/// The logical response value. Unset by default; `def response = null` sets it to `Value::Null`.
pub const RESPONSE: &str = "response";
/// Response headers; seeded with the configured defaults.
pub const RESPONSE_HEADERS: &str = "responseHeaders";
/// Response status code, `200` unless overridden.
pub const RESPONSE_STATUS: &str = "responseStatus";
/// Artificial latency in milliseconds applied by the transport.
pub const RESPONSE_DELAY: &str = "responseDelay";
/// Placeholder bindings collected by `pathMatches`.
pub const PATH_PARAMS: &str = "pathParams";

pub(crate) const RESPONSE_SLOTS: [&str; 4] =
    [RESPONSE, RESPONSE_HEADERS, RESPONSE_STATUS, RESPONSE_DELAY];

/// A value could not be assigned to one of the reserved response slots.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContextError {
    #[error("`responseStatus` must be an integer between 100 and 999, got `{0}`")]
    InvalidStatus(String),
    #[error("`responseHeaders` must be a map of header names to strings or lists of strings, got `{0}`")]
    InvalidHeaders(String),
    #[error("`{0}` is not a valid header name")]
    InvalidHeaderName(String),
    #[error("the value of header `{0}` is not a valid header value")]
    InvalidHeaderValue(String),
    #[error("`responseDelay` must be a non-negative number of milliseconds, got `{0}`")]
    InvalidDelay(String),
}

/// The mutable part of an [`EvaluationContext`] at a point in time.
#[derive(Debug)]
pub(crate) struct Checkpoint {
    variables: BTreeMap<String, Value>,
    response: Option<Value>,
    response_headers: HeaderMap,
    response_status: StatusCode,
    response_delay: Option<Duration>,
}

/// A cooperative cancellation flag.
///
/// The transport cancels it when a client goes away; the engine stops before the next predicate
/// or statement, and evaluators may poll it while running.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Mutable state for the evaluation of a single request.
///
/// A context is created fresh for every request, seeded from the request and from the
/// (read-only) feature configuration, and discarded once the [`Response`] has been
/// materialized. It is never shared across requests.
///
/// Besides plain variables, a context owns the reserved response slots (`response`,
/// `responseHeaders`, `responseStatus`, `responseDelay`): assigning to those names through
/// [`EvaluationContext::assign`] validates and converts the value.
#[derive(Debug)]
pub struct EvaluationContext {
    request: Arc<Request>,
    patterns: Arc<PatternCache>,
    cancellation: Cancellation,
    variables: BTreeMap<String, Value>,
    response: Option<Value>,
    response_headers: HeaderMap,
    response_status: StatusCode,
    response_delay: Option<Duration>,
}

impl EvaluationContext {
    pub(crate) fn new(
        request: Arc<Request>,
        feature: &FeatureDefinition,
        cancellation: Cancellation,
    ) -> Self {
        let configuration = feature.configuration();
        let mut context = Self::detached(request, feature.patterns().clone(), cancellation);
        context.response_headers = configuration.response_headers().clone();
        context.response_delay = configuration.response_delay();
        for (name, value) in feature.globals() {
            context.variables.insert(name.clone(), value.clone());
        }
        context.seed_request_variables();
        context
    }

    /// A context with no feature defaults, used to run background statements.
    pub(crate) fn detached(
        request: Arc<Request>,
        patterns: Arc<PatternCache>,
        cancellation: Cancellation,
    ) -> Self {
        let mut context = Self {
            request,
            patterns,
            cancellation,
            variables: BTreeMap::new(),
            response: None,
            response_headers: HeaderMap::new(),
            response_status: StatusCode::OK,
            response_delay: None,
        };
        context.seed_request_variables();
        context
    }

    fn seed_request_variables(&mut self) {
        let request = self.request.clone();
        let headers = request
            .headers()
            .keys()
            .map(|name| {
                let values = request
                    .headers()
                    .get_all(name)
                    .iter()
                    .map(|value| Value::String(String::from_utf8_lossy(value.as_bytes()).into()))
                    .collect();
                (name.as_str().to_string(), Value::List(values))
            })
            .collect();
        let params = request
            .query_params()
            .iter()
            .map(|(name, values)| {
                let values = values.iter().map(|v| Value::from(v.as_str())).collect();
                (name.clone(), Value::List(values))
            })
            .collect();
        let cookies = request
            .cookies()
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
            .collect();

        let seeds = [
            ("request", interpret_body(request.body())),
            ("requestBytes", Value::Bytes(request.body().to_vec())),
            ("requestMethod", Value::from(request.method().as_str())),
            ("requestPath", Value::from(request.path())),
            ("requestUri", Value::from(request.uri())),
            ("requestHeaders", Value::Map(headers)),
            ("requestParams", Value::Map(params)),
            ("requestCookies", Value::Map(cookies)),
            (PATH_PARAMS, Value::Map(BTreeMap::new())),
        ];
        for (name, value) in seeds {
            self.variables.insert(name.to_string(), value);
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// A shared handle on the request, for evaluators that need `'static` access to it.
    pub fn shared_request(&self) -> Arc<Request> {
        self.request.clone()
    }

    /// Path patterns precompiled for the feature this request is evaluated against.
    pub fn patterns(&self) -> &Arc<PatternCache> {
        &self.patterns
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Read a variable or a reserved slot.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            RESPONSE => Some(self.response.clone().unwrap_or(Value::Null)),
            RESPONSE_HEADERS => Some(headers_to_value(&self.response_headers)),
            RESPONSE_STATUS => Some(Value::Integer(self.response_status.as_u16().into())),
            RESPONSE_DELAY => Some(delay_to_value(self.response_delay)),
            _ => self.variables.get(name).cloned(),
        }
    }

    /// Every name visible to a script: plain variables and reserved slots.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut snapshot = self.variables.clone();
        for slot in RESPONSE_SLOTS {
            if let Some(value) = self.get(slot) {
                snapshot.insert(slot.to_string(), value);
            }
        }
        snapshot
    }

    /// Bind `name` to `value`. Reserved slots are validated and converted.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), ContextError> {
        match name {
            RESPONSE => self.response = Some(value),
            RESPONSE_HEADERS => {
                self.response_headers = merge_headers(&value, &self.response_headers)?
            }
            RESPONSE_STATUS => self.response_status = value_to_status(&value)?,
            RESPONSE_DELAY => self.response_delay = value_to_delay(&value)?,
            _ => {
                self.variables.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// The logical response value; `None` if no statement ever assigned it.
    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    pub fn response_status(&self) -> StatusCode {
        self.response_status
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Bind path placeholders: into `pathParams`, and as top-level variables unless the name
    /// collides with a reserved response slot.
    pub fn bind_path_params(&mut self, bindings: &PathBindings) {
        for (name, raw) in bindings.iter() {
            if let Some(Value::Map(params)) = self.variables.get_mut(PATH_PARAMS) {
                params.insert(name.to_string(), Value::from(raw));
            }
            if !RESPONSE_SLOTS.contains(&name) {
                self.variables.insert(name.to_string(), Value::from(raw));
            }
        }
    }

    /// Everything a predicate may change, to be put back if it evaluates to false.
    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            variables: self.variables.clone(),
            response: self.response.clone(),
            response_headers: self.response_headers.clone(),
            response_status: self.response_status,
            response_delay: self.response_delay,
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        self.variables = checkpoint.variables;
        self.response = checkpoint.response;
        self.response_headers = checkpoint.response_headers;
        self.response_status = checkpoint.response_status;
        self.response_delay = checkpoint.response_delay;
    }

    /// Turn the accumulated response slots into a [`Response`], consuming the context.
    ///
    /// Headers set by the scenario replace configured defaults with the same name; the
    /// remaining defaults are kept.
    pub(crate) fn into_response(
        self,
        configuration: &Configuration,
    ) -> Result<Response, SerializationError> {
        let mut headers = configuration.response_headers().clone();
        for name in self.response_headers.keys() {
            headers.remove(name);
        }
        for (name, value) in self.response_headers.iter() {
            headers.append(name.clone(), value.clone());
        }

        let (body, mime) = Value::into_body(self.response)?;
        if let Some(mime) = mime {
            if !headers.contains_key(http::header::CONTENT_TYPE) {
                headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static(mime));
            }
        }

        Ok(Response::from_parts(
            self.response_status,
            headers,
            body,
            self.response_delay,
        ))
    }
}

// Empty -> null, JSON -> structured, UTF-8 -> text, anything else -> bytes.
fn interpret_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        return Value::from(json);
    }
    match std::str::from_utf8(body) {
        Ok(text) => Value::from(text),
        Err(_) => Value::Bytes(body.to_vec()),
    }
}

pub(crate) fn headers_to_value(headers: &HeaderMap) -> Value {
    let mut map = BTreeMap::new();
    for name in headers.keys() {
        let mut values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .map(|value| Value::String(String::from_utf8_lossy(value.as_bytes()).into()))
            .collect();
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            Value::List(values)
        };
        map.insert(name.as_str().to_string(), value);
    }
    Value::Map(map)
}

pub(crate) fn value_to_headers(value: &Value) -> Result<HeaderMap, ContextError> {
    merge_headers(value, &HeaderMap::new())
}

// Header names are case-insensitive, so `Content-Type` and `content-type` are the same header.
// When both are present, the entry that differs from `current` wins.
fn merge_headers(value: &Value, current: &HeaderMap) -> Result<HeaderMap, ContextError> {
    let map = match value {
        Value::Null => return Ok(HeaderMap::new()),
        Value::Map(map) => map,
        other => return Err(ContextError::InvalidHeaders(other.to_string())),
    };

    let mut headers = HeaderMap::new();
    for (name, values) in map {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ContextError::InvalidHeaderName(name.clone()))?;
        let values = match values {
            Value::List(values) => values.as_slice(),
            single => std::slice::from_ref(single),
        };
        let mut header_values = Vec::with_capacity(values.len());
        for value in values {
            let text = match value {
                Value::List(_) | Value::Map(_) => {
                    return Err(ContextError::InvalidHeaders(value.to_string()))
                }
                scalar => scalar
                    .to_text()
                    .map_err(|_| ContextError::InvalidHeaderValue(name.clone()))?,
            };
            let header_value = HeaderValue::from_str(&text)
                .map_err(|_| ContextError::InvalidHeaderValue(name.clone()))?;
            header_values.push(header_value);
        }

        if headers.contains_key(&header_name) {
            let unchanged = current
                .get_all(&header_name)
                .iter()
                .eq(header_values.iter());
            if unchanged {
                continue;
            }
            headers.remove(&header_name);
        }
        for header_value in header_values {
            headers.append(header_name.clone(), header_value);
        }
    }
    Ok(headers)
}

fn value_to_status(value: &Value) -> Result<StatusCode, ContextError> {
    let code = match value {
        Value::Integer(code) => u16::try_from(*code).ok(),
        Value::String(code) => code.trim().parse::<u16>().ok(),
        _ => None,
    };
    code.and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| ContextError::InvalidStatus(value.to_string()))
}

fn delay_to_value(delay: Option<Duration>) -> Value {
    match delay {
        Some(delay) => Value::Integer(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)),
        None => Value::Null,
    }
}

pub(crate) fn value_to_delay(value: &Value) -> Result<Option<Duration>, ContextError> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(millis) => u64::try_from(*millis)
            .map(|millis| Some(Duration::from_millis(millis)))
            .map_err(|_| ContextError::InvalidDelay(value.to_string())),
        Value::Float(millis) if millis.is_finite() && *millis >= 0.0 => {
            Ok(Some(Duration::from_millis(*millis as u64)))
        }
        _ => Err(ContextError::InvalidDelay(value.to_string())),
    }
}
