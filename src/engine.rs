use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use log::{debug, warn};

use crate::context::{Cancellation, EvaluationContext};
use crate::evaluate::{Evaluate, EvaluatorError};
use crate::feature::FeatureDefinition;
use crate::response::Response;
use crate::scenario::{Scenario, Statement};
use crate::value::{SerializationError, Value};
use crate::Request;

/// Where, within a scenario, evaluation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementLocation {
    Predicate,
    /// The statement at `index` in the scenario's statement list.
    Statement { index: usize, statement: String },
}

impl fmt::Display for StatementLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementLocation::Predicate => f.write_str("predicate"),
            StatementLocation::Statement { index, statement } => {
                write!(f, "statement #{} (`{}`)", index, statement)
            }
        }
    }
}

/// A request could not be answered by any scenario.
///
/// `MockError`s never escape [`MockEngine::handle`]: they are converted into a response with
/// [`MockError::to_response`].
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("No scenario matched the request")]
    NoMatch,
    #[error("{scenario} failed while evaluating its {location}")]
    Evaluation {
        scenario: String,
        location: StatementLocation,
        #[source]
        source: EvaluatorError,
    },
    #[error("{scenario} produced a response that cannot be serialized")]
    Serialization {
        scenario: String,
        #[source]
        source: SerializationError,
    },
    #[error("Request evaluation was cancelled")]
    Cancelled,
}

impl MockError {
    /// `404` with an empty body when nothing matched; a `5xx` with a plain-text diagnostic for
    /// everything else.
    pub fn to_response(&self) -> Response {
        let status = match self {
            MockError::NoMatch => return Response::new(StatusCode::NOT_FOUND),
            MockError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            MockError::Evaluation { .. } | MockError::Serialization { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let diagnostic = match std::error::Error::source(self) {
            Some(source) => format!("{}: {}", self, source),
            None => self.to_string(),
        };
        Response::new(status).with_body(diagnostic, "text/plain")
    }
}

/// Matches requests against the scenarios of a [`FeatureDefinition`] and computes responses.
///
/// Scenarios are tried in declaration order: the first one whose predicate evaluates to `true`
/// is selected and the remaining ones are never evaluated for that request.
///
/// A `MockEngine` is cheap to clone and safe to share across threads. Every call to
/// [`MockEngine::handle`] works on its own [`EvaluationContext`]: the feature is the only state
/// shared between concurrent requests, and it is read-only.
///
/// ### Example:
/// ```rust
/// use scenario_mock::{FeatureDefinition, MockEngine, Request, RhaiEvaluator, Scenario};
/// use scenario_mock::http::{Method, StatusCode};
///
/// let evaluator = RhaiEvaluator::new();
/// let feature = FeatureDefinition::builder()
///     .scenario(
///         Scenario::given(r#"pathMatches("/cats/{name}") && methodIs("get")"#)
///             .then(r#"def response = #{ name: name, lives: 9 }"#),
///     )
///     .scenario(
///         Scenario::given(r#"pathMatches("/cats/{name}")"#)
///             .then("def responseStatus = 405"),
///     )
///     .build(&evaluator)
///     .unwrap();
/// let engine = MockEngine::new(feature, evaluator);
///
/// let response = engine.handle(Request::new(Method::GET, "/cats/tom"));
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.body(), br#"{"lives":9,"name":"tom"}"#);
/// assert_eq!(response.header("content-type"), Some("application/json"));
///
/// let response = engine.handle(Request::new(Method::DELETE, "/cats/tom"));
/// assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
///
/// let response = engine.handle(Request::new(Method::GET, "/dogs/rex"));
/// assert_eq!(response.status(), StatusCode::NOT_FOUND);
/// assert!(response.body().is_empty());
/// ```
#[derive(Clone)]
pub struct MockEngine {
    feature: Arc<FeatureDefinition>,
    evaluator: Arc<dyn Evaluate>,
}

impl MockEngine {
    pub fn new<E>(feature: FeatureDefinition, evaluator: E) -> Self
    where
        E: Evaluate + 'static,
    {
        Self {
            feature: Arc::new(feature),
            evaluator: Arc::new(evaluator),
        }
    }

    pub fn feature(&self) -> &FeatureDefinition {
        &self.feature
    }

    /// Compute the response for `request`. Failures are turned into responses, see
    /// [`MockError::to_response`].
    pub fn handle(&self, request: Request) -> Response {
        self.handle_with(request, &Cancellation::new())
    }

    /// Like [`MockEngine::handle`], stopping early if `cancellation` fires.
    pub fn handle_with(&self, request: Request, cancellation: &Cancellation) -> Response {
        let request = Arc::new(request);
        match self.run(&request, cancellation) {
            Ok(response) => response,
            Err(e) => {
                let (method, uri) = (request.method(), request.uri());
                match &e {
                    MockError::NoMatch => debug!("No scenario matched {} {}", method, uri),
                    MockError::Cancelled => debug!("Evaluation of {} {} was cancelled", method, uri),
                    _ => warn!("Failed to answer {} {}: {}", method, uri, e),
                }
                let mut response = e.to_response();
                self.feature.configuration().apply(&request, &mut response);
                response
            }
        }
    }

    /// Compute the response for `request`, surfacing failures as a [`MockError`].
    pub fn try_handle(&self, request: Request) -> Result<Response, MockError> {
        self.try_handle_with(request, &Cancellation::new())
    }

    /// Like [`MockEngine::try_handle`], stopping early if `cancellation` fires.
    pub fn try_handle_with(
        &self,
        request: Request,
        cancellation: &Cancellation,
    ) -> Result<Response, MockError> {
        self.run(&Arc::new(request), cancellation)
    }

    fn run(
        &self,
        request: &Arc<Request>,
        cancellation: &Cancellation,
    ) -> Result<Response, MockError> {
        let configuration = self.feature.configuration();
        if let Some(response) = configuration.intercept(request) {
            return Ok(response);
        }

        let mut context =
            EvaluationContext::new(request.clone(), &self.feature, cancellation.clone());
        let scenario = self.select(&mut context)?;
        debug!("{} {} matched {}", request.method(), request.uri(), scenario);

        for (index, statement) in scenario.statements().iter().enumerate() {
            if context.is_cancelled() {
                return Err(MockError::Cancelled);
            }
            self.execute(statement, &mut context).map_err(|source| {
                let location = StatementLocation::Statement {
                    index,
                    statement: statement.to_string(),
                };
                evaluation_error(scenario, location, source)
            })?;
        }

        let mut response = context
            .into_response(configuration)
            .map_err(|source| MockError::Serialization {
                scenario: scenario.to_string(),
                source,
            })?;
        configuration.apply(request, &mut response);
        Ok(response)
    }

    // First match wins. A predicate that evaluates to false leaves no trace in the context.
    fn select(&self, context: &mut EvaluationContext) -> Result<&Scenario, MockError> {
        for scenario in self.feature.scenarios() {
            if context.is_cancelled() {
                return Err(MockError::Cancelled);
            }
            let checkpoint = context.checkpoint();
            let matched = self
                .evaluator
                .evaluate(scenario.predicate(), context)
                .and_then(|value| match value {
                    Value::Bool(matched) => Ok(matched),
                    other => Err(EvaluatorError::NotABoolean(other.to_string())),
                })
                .map_err(|source| {
                    evaluation_error(scenario, StatementLocation::Predicate, source)
                })?;
            if matched {
                return Ok(scenario);
            }
            context.restore(checkpoint);
        }
        Err(MockError::NoMatch)
    }

    fn execute(
        &self,
        statement: &Statement,
        context: &mut EvaluationContext,
    ) -> Result<(), EvaluatorError> {
        match statement {
            Statement::Def { name, expression } => {
                let value = self.evaluator.evaluate(expression, context)?;
                context.assign(name, value)?;
            }
            Statement::Eval(expression) => {
                self.evaluator.evaluate(expression, context)?;
            }
            Statement::Configure { option, .. } => {
                return Err(EvaluatorError::script(format!(
                    "`configure {}` is only allowed in the background",
                    option
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MockEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockEngine")
            .field("feature", &self.feature)
            .finish()
    }
}

fn evaluation_error(
    scenario: &Scenario,
    location: StatementLocation,
    source: EvaluatorError,
) -> MockError {
    match source {
        EvaluatorError::Cancelled => MockError::Cancelled,
        source => MockError::Evaluation {
            scenario: scenario.to_string(),
            location,
            source,
        },
    }
}
