use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::context::{ContextError, EvaluationContext};
use crate::scenario::Expression;
use crate::value::Value;

/// Anything that implements `Evaluate` can run the expressions of a feature: predicates,
/// `def` right-hand sides, `configure` values and expression statements.
///
/// The engine never interprets expressions itself. It hands each one, together with the
/// request-scoped [`EvaluationContext`], to the evaluator and reads back the returned value and
/// whatever the evaluator wrote into the context.
///
/// [`RhaiEvaluator`] is the evaluator provided out of the box. `Fn` closures with a compatible
/// signature implement `Evaluate` too, which is handy to plug in a tiny ad-hoc language:
///
/// ```rust
/// use scenario_mock::{Evaluate, EvaluationContext, Expression, EvaluatorError, Value};
///
/// // Every expression evaluates to its own source text, except `true`.
/// let evaluator = |expression: &Expression, _context: &mut EvaluationContext| {
///     Ok::<_, EvaluatorError>(match expression.source() {
///         "true" => Value::Bool(true),
///         other => Value::from(other),
///     })
/// };
///
/// fn assert_evaluator(_: &impl Evaluate) {}
/// assert_evaluator(&evaluator);
/// ```
///
/// Implementations must be `Send + Sync`: a single evaluator serves every in-flight request
/// concurrently, so all per-request state belongs in the context.
///
/// [`RhaiEvaluator`]: crate::RhaiEvaluator
pub trait Evaluate: Send + Sync {
    /// Evaluate `expression` against `context`, returning its value.
    fn evaluate(
        &self,
        expression: &Expression,
        context: &mut EvaluationContext,
    ) -> Result<Value, EvaluatorError>;
}

impl<F> Evaluate for F
where
    F: Fn(&Expression, &mut EvaluationContext) -> Result<Value, EvaluatorError>,
    F: Send + Sync,
{
    fn evaluate(
        &self,
        expression: &Expression,
        context: &mut EvaluationContext,
    ) -> Result<Value, EvaluatorError> {
        self(expression, context)
    }
}

/// Evaluation of an expression failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluatorError {
    #[error("{0}")]
    Script(String),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("the predicate evaluated to `{0}` instead of a boolean")]
    NotABoolean(String),
    #[error("evaluation was cancelled")]
    Cancelled,
}

impl EvaluatorError {
    pub fn script(message: impl fmt::Display) -> Self {
        Self::Script(message.to_string())
    }
}

/// Host-provided values and functions that scripts may reach into, the way a JVM script calls
/// `Java.type(...)`.
///
/// The engine never queries a registry: evaluators do, and decide how lookups surface in their
/// language.
pub trait HostRegistry: Send + Sync {
    /// The value registered under `name`.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Call the function registered under `name`. `None` if there is no such function.
    fn invoke(&self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
        let _ = (name, args);
        None
    }
}

type HostFunction = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A [`HostRegistry`] backed by in-memory tables.
///
/// ### Example:
/// ```rust
/// use scenario_mock::{HostBindings, HostRegistry, Value};
///
/// let host = HostBindings::new()
///     .register_value("MockUtils", Value::Map([
///         ("testBytes".to_string(), Value::Bytes(vec![0, 1, 2])),
///     ].into_iter().collect()))
///     .register_fn("upper", |args| match args {
///         [Value::String(s)] => Ok(Value::from(s.to_uppercase())),
///         _ => Err("upper expects a single string".to_string()),
///     });
///
/// assert!(host.lookup("MockUtils").is_some());
/// assert_eq!(
///     host.invoke("upper", &[Value::from("hi")]),
///     Some(Ok(Value::from("HI")))
/// );
/// ```
#[derive(Clone, Default)]
pub struct HostBindings {
    values: BTreeMap<String, Value>,
    functions: BTreeMap<String, HostFunction>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Register any `Serialize` value, converted through its JSON representation.
    pub fn register_serializable<T: Serialize>(
        self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let value = Value::from_serialize(value)?;
        Ok(self.register_value(name, value))
    }

    pub fn register_fn<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }
}

impl HostRegistry for HostBindings {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn invoke(&self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
        self.functions.get(name).map(|function| function(args))
    }
}

impl fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBindings")
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}
