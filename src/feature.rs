use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_HEADERS,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::{
    value_to_delay, value_to_headers, Cancellation, EvaluationContext, RESPONSE_DELAY,
    RESPONSE_HEADERS, RESPONSE_SLOTS,
};
use crate::evaluate::{Evaluate, EvaluatorError};
use crate::path_pattern::{PatternCache, PatternError};
use crate::response::Response;
use crate::scenario::{Expression, Scenario, ScenarioBuilder, Statement, StatementError};
use crate::value::Value;
use crate::Request;

const CORS: &str = "cors";

// Literal templates passed to `pathMatches`, compiled once when the feature is built.
static PATH_MATCHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"pathMatches\s*\(\s*"([^"]*)"\s*\)"#).expect("Invalid pathMatches regex")
});

/// A feature could not be built. These errors are fatal: a mock server must not start serving
/// from a feature that failed to build.
#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("Scenario #{scenario} has an invalid path template")]
    Pattern {
        scenario: usize,
        #[source]
        source: PatternError,
    },
    #[error("Invalid statement in {location}")]
    Syntax {
        location: String,
        #[source]
        source: StatementError,
    },
    #[error("Background statement #{line} (`{statement}`) failed")]
    Background {
        line: usize,
        statement: String,
        #[source]
        source: EvaluatorError,
    },
    #[error("`{0}` is not a known configuration option")]
    UnknownOption(String),
    #[error("Invalid value for configuration option `{option}`: {message}")]
    InvalidOption { option: String, message: String },
    #[error("`configure` is only allowed in the background, found `{statement}` in Scenario #{scenario}")]
    ConfigureOutsideBackground { scenario: usize, statement: String },
    #[error("`{0}` is a reserved response slot and cannot be defined in the background")]
    ReservedName(String),
}

/// The effect of a feature-level `configure` option on outgoing responses.
///
/// Transforms are registered by option name on a [`FeatureBuilder`]; the value the background
/// assigned to the option is handed back on every call.
///
/// ### Example:
/// ```rust
/// use scenario_mock::{Request, Response, ResponseTransform, Value};
/// use scenario_mock::http::{header, HeaderValue};
///
/// /// `configure server = "mock/1.0"` stamps every response with a `Server` header.
/// struct ServerHeader;
///
/// impl ResponseTransform for ServerHeader {
///     fn transform(&self, value: &Value, _request: &Request, response: &mut Response) {
///         if let Some(Ok(server)) = value.as_str().map(HeaderValue::from_str) {
///             response.insert_header_if_absent(header::SERVER, server);
///         }
///     }
/// }
/// ```
pub trait ResponseTransform: Send + Sync {
    /// Adjust a response materialized from a scenario, or from a failure.
    fn transform(&self, value: &Value, request: &Request, response: &mut Response);

    /// Answer `request` directly, before any scenario is evaluated.
    fn intercept(&self, value: &Value, request: &Request) -> Option<Response> {
        let _ = (value, request);
        None
    }
}

/// `configure cors = true`: answer preflight requests and allow any origin.
///
/// A string value is used as the allowed origin instead of `*`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cors;

impl Cors {
    fn allowed_origin(value: &Value) -> Option<HeaderValue> {
        match value {
            Value::Bool(true) => Some(HeaderValue::from_static("*")),
            Value::String(origin) => HeaderValue::from_str(origin).ok(),
            _ => None,
        }
    }
}

impl ResponseTransform for Cors {
    fn transform(&self, value: &Value, _request: &Request, response: &mut Response) {
        if let Some(origin) = Self::allowed_origin(value) {
            response.insert_header_if_absent(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
    }

    fn intercept(&self, value: &Value, request: &Request) -> Option<Response> {
        if request.method() != Method::OPTIONS {
            return None;
        }
        let origin = Self::allowed_origin(value)?;

        let mut response = Response::new(StatusCode::OK);
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, HEAD, POST, PUT, DELETE, PATCH"),
        );
        let allowed_headers = request
            .headers()
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*"));
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allowed_headers);
        Some(response)
    }
}

struct Effect {
    option: String,
    value: Value,
    transform: Arc<dyn ResponseTransform>,
}

/// Feature-wide settings, evaluated once by the background and read-only afterwards.
#[derive(Default)]
pub struct Configuration {
    response_headers: HeaderMap,
    response_delay: Option<Duration>,
    options: BTreeMap<String, Value>,
    effects: Vec<Effect>,
}

impl Configuration {
    /// Headers added to every response, unless a scenario sets a header with the same name.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Default artificial latency for every response.
    pub fn response_delay(&self) -> Option<Duration> {
        self.response_delay
    }

    /// The value assigned to a `configure` option, if any.
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub(crate) fn intercept(&self, request: &Request) -> Option<Response> {
        self.effects.iter().find_map(|effect| {
            let response = effect.transform.intercept(&effect.value, request)?;
            debug!("Request intercepted by `{}`", effect.option);
            Some(response)
        })
    }

    pub(crate) fn apply(&self, request: &Request, response: &mut Response) {
        for effect in &self.effects {
            effect.transform.transform(&effect.value, request, response);
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("response_headers", &self.response_headers)
            .field("response_delay", &self.response_delay)
            .field("options", &self.options)
            .finish()
    }
}

/// An ordered set of [`Scenario`]s plus the [`Configuration`] they share.
///
/// A `FeatureDefinition` is built once, before serving starts, and is never mutated afterwards:
/// every concurrent request reads it without locking.
///
/// ### Example:
/// ```rust
/// use scenario_mock::{FeatureDefinition, RhaiEvaluator, Scenario};
///
/// let evaluator = RhaiEvaluator::new();
/// let feature = FeatureDefinition::builder()
///     .background(r#"configure responseHeaders = #{ "Content-Type": "text/html" }"#)
///     .background(r#"def greeting = "hello""#)
///     .scenario(
///         Scenario::given(r#"pathMatches("/hello/{name}")"#)
///             .then(r#"def response = greeting + " " + name"#),
///     )
///     .build(&evaluator)
///     .unwrap();
///
/// assert_eq!(feature.scenarios().len(), 1);
/// assert_eq!(
///     feature.configuration().response_headers()["content-type"],
///     "text/html"
/// );
/// assert!(feature.globals().contains_key("greeting"));
/// ```
#[derive(Debug)]
pub struct FeatureDefinition {
    scenarios: Vec<Scenario>,
    configuration: Configuration,
    globals: BTreeMap<String, Value>,
    patterns: Arc<PatternCache>,
}

impl FeatureDefinition {
    pub fn builder() -> FeatureBuilder {
        FeatureBuilder::new()
    }

    /// Scenarios in declaration order.
    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Variables defined by the background, copied into every request context.
    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    /// Path templates found in the feature, precompiled.
    pub fn patterns(&self) -> &Arc<PatternCache> {
        &self.patterns
    }
}

/// A builder providing a fluent API to assemble a [`FeatureDefinition`] step-by-step.
/// Use [`FeatureDefinition::builder`] to get started.
pub struct FeatureBuilder {
    background: Vec<String>,
    scenarios: Vec<ScenarioBuilder>,
    transforms: BTreeMap<String, Arc<dyn ResponseTransform>>,
}

impl FeatureBuilder {
    fn new() -> Self {
        let mut transforms: BTreeMap<String, Arc<dyn ResponseTransform>> = BTreeMap::new();
        transforms.insert(CORS.to_string(), Arc::new(Cors));
        Self {
            background: Vec::new(),
            scenarios: Vec::new(),
            transforms,
        }
    }

    /// Append a background line: a `def` defining a global, or a `configure` statement.
    pub fn background(mut self, line: impl Into<String>) -> Self {
        self.background.push(line.into());
        self
    }

    /// Append a scenario. Scenarios are matched in the order they are added.
    pub fn scenario(mut self, scenario: ScenarioBuilder) -> Self {
        self.scenarios.push(scenario);
        self
    }

    /// Make `configure <name> = <expression>` legal, applying `transform` to every response.
    pub fn option<T>(mut self, name: impl Into<String>, transform: T) -> Self
    where
        T: ResponseTransform + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(transform));
        self
    }

    /// Parse every statement, precompile literal path templates and run the background.
    pub fn build<E>(self, evaluator: &E) -> Result<FeatureDefinition, FeatureError>
    where
        E: Evaluate + ?Sized,
    {
        let mut patterns = PatternCache::default();
        let mut scenarios = Vec::with_capacity(self.scenarios.len());

        for (index, builder) in self.scenarios.into_iter().enumerate() {
            let location = match &builder.name {
                Some(name) => format!("Scenario #{} ({})", index, name),
                None => format!("Scenario #{}", index),
            };

            let mut statements = Vec::with_capacity(builder.lines.len());
            for line in &builder.lines {
                let statement =
                    Statement::parse(line).map_err(|source| FeatureError::Syntax {
                        location: location.clone(),
                        source,
                    })?;
                if let Statement::Configure { .. } = statement {
                    return Err(FeatureError::ConfigureOutsideBackground {
                        scenario: index,
                        statement: line.clone(),
                    });
                }
                statements.push(statement);
            }

            let predicate = Expression::new(builder.predicate.trim());
            let sources = std::iter::once(predicate.source()).chain(statements.iter().map(
                |statement| match statement {
                    Statement::Def { expression, .. }
                    | Statement::Configure { expression, .. }
                    | Statement::Eval(expression) => expression.source(),
                },
            ));
            for source in sources {
                for captures in PATH_MATCHES.captures_iter(source) {
                    patterns
                        .insert(&captures[1])
                        .map_err(|source| FeatureError::Pattern {
                            scenario: index,
                            source,
                        })?;
                }
            }

            scenarios.push(Scenario {
                name: builder.name,
                index,
                predicate,
                statements,
            });
        }

        let patterns = Arc::new(patterns);
        let (configuration, globals) =
            run_background(&self.background, &self.transforms, &patterns, evaluator)?;
        debug!(
            "Built a feature with {} scenarios and {} path patterns",
            scenarios.len(),
            patterns.len()
        );

        Ok(FeatureDefinition {
            scenarios,
            configuration,
            globals,
            patterns,
        })
    }
}

fn run_background<E>(
    lines: &[String],
    transforms: &BTreeMap<String, Arc<dyn ResponseTransform>>,
    patterns: &Arc<PatternCache>,
    evaluator: &E,
) -> Result<(Configuration, BTreeMap<String, Value>), FeatureError>
where
    E: Evaluate + ?Sized,
{
    // The background runs against a placeholder request: it must not depend on one.
    let request = Arc::new(Request::new(Method::GET, "/"));
    let mut context = EvaluationContext::detached(request, patterns.clone(), Cancellation::new());
    let seeded = context.snapshot();

    let mut configuration = Configuration::default();

    for (line_number, line) in lines.iter().enumerate() {
        let statement = Statement::parse(line).map_err(|source| FeatureError::Syntax {
            location: "Background".to_string(),
            source,
        })?;
        let background_error = |source: EvaluatorError| FeatureError::Background {
            line: line_number,
            statement: line.clone(),
            source,
        };

        match &statement {
            Statement::Def { name, expression } => {
                if RESPONSE_SLOTS.contains(&name.as_str()) {
                    return Err(FeatureError::ReservedName(name.clone()));
                }
                let value = evaluator
                    .evaluate(expression, &mut context)
                    .map_err(background_error)?;
                context
                    .assign(name, value)
                    .map_err(|e| background_error(e.into()))?;
            }
            Statement::Configure { option, expression } => {
                let value = evaluator
                    .evaluate(expression, &mut context)
                    .map_err(background_error)?;
                configure(&mut configuration, transforms, option, value)?;
            }
            Statement::Eval(expression) => {
                evaluator
                    .evaluate(expression, &mut context)
                    .map_err(background_error)?;
            }
        }
    }

    let globals = context
        .snapshot()
        .into_iter()
        .filter(|(name, value)| {
            !RESPONSE_SLOTS.contains(&name.as_str()) && seeded.get(name) != Some(value)
        })
        .collect();
    Ok((configuration, globals))
}

fn configure(
    configuration: &mut Configuration,
    transforms: &BTreeMap<String, Arc<dyn ResponseTransform>>,
    option: &str,
    value: Value,
) -> Result<(), FeatureError> {
    let invalid = |message: String| FeatureError::InvalidOption {
        option: option.to_string(),
        message,
    };

    match option {
        RESPONSE_HEADERS => {
            configuration.response_headers =
                value_to_headers(&value).map_err(|e| invalid(e.to_string()))?;
        }
        RESPONSE_DELAY => {
            configuration.response_delay =
                value_to_delay(&value).map_err(|e| invalid(e.to_string()))?;
        }
        _ => {
            let transform = transforms
                .get(option)
                .ok_or_else(|| FeatureError::UnknownOption(option.to_string()))?;
            configuration.effects.retain(|effect| effect.option != option);
            configuration.effects.push(Effect {
                option: option.to_string(),
                value: value.clone(),
                transform: transform.clone(),
            });
        }
    }
    configuration.options.insert(option.to_string(), value);
    Ok(())
}
