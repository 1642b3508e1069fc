//! The default expression evaluator, backed by the [`rhai`] scripting language.
use std::fmt;
use std::sync::{Arc, Mutex};

use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, Map, Scope};

use crate::context::EvaluationContext;
use crate::evaluate::{Evaluate, EvaluatorError, HostRegistry};
use crate::path_pattern::PathBindings;
use crate::scenario::Expression;
use crate::value::Value;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Evaluates expressions as [rhai](https://rhai.rs) scripts.
///
/// `null` and `()` both denote [`Value::Null`].
///
/// Every variable of the [`EvaluationContext`] is visible to the script; variables the script
/// creates or modifies are written back to the context once the script completes. On top of the
/// rhai standard library, scripts can call:
///
/// | Function | |
/// |---|---|
/// | `pathMatches(template)` | match the raw request path against a path template, binding its placeholders for the statements that follow |
/// | `methodIs(method)` | case-insensitive comparison with the request method |
/// | `paramExists(name)` / `paramValue(name)` | query parameters |
/// | `headerContains(name, text)` | whether any value of a request header contains `text` |
/// | `typeContains(text)` / `acceptContains(text)` | shorthands for `Content-Type` and `Accept` |
/// | `hostType(name)` / `hostCall(name, args)` | reach into the [`HostRegistry`] |
///
/// ### Example:
/// ```rust
/// use scenario_mock::{FeatureDefinition, HostBindings, MockEngine, Request, RhaiEvaluator, Scenario, Value};
/// use scenario_mock::http::Method;
///
/// let host = HostBindings::new().register_value("MockUtils", Value::Map([
///     ("testBytes".to_string(), Value::Bytes(vec![0, 1, 2, 3])),
/// ].into_iter().collect()));
/// let evaluator = RhaiEvaluator::new().with_host(host);
///
/// let feature = FeatureDefinition::builder()
///     .background(r#"def utils = hostType("MockUtils")"#)
///     .scenario(
///         Scenario::given(r#"pathMatches("/bytes") && methodIs("get")"#)
///             .then("def response = utils.testBytes"),
///     )
///     .build(&evaluator)
///     .unwrap();
/// let engine = MockEngine::new(feature, evaluator);
///
/// let response = engine.handle(Request::new(Method::GET, "/bytes"));
/// assert_eq!(response.body(), &[0, 1, 2, 3]);
/// ```
#[derive(Clone, Default)]
pub struct RhaiEvaluator {
    host: Option<Arc<dyn HostRegistry>>,
    max_operations: Option<u64>,
}

impl RhaiEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `host` to scripts through `hostType` and `hostCall`.
    pub fn with_host<H>(mut self, host: H) -> Self
    where
        H: HostRegistry + 'static,
    {
        self.host = Some(Arc::new(host));
        self
    }

    /// Abort any single evaluation performing more than `operations` rhai operations.
    pub fn max_operations(mut self, operations: u64) -> Self {
        self.max_operations = Some(operations);
        self
    }

    fn engine(
        &self,
        context: &EvaluationContext,
        bindings: Arc<Mutex<Vec<PathBindings>>>,
    ) -> Result<Engine, EvaluatorError> {
        let mut engine = Engine::new();
        if let Some(operations) = self.max_operations {
            engine.set_max_operations(operations);
        }

        // `null` is reserved but unused by rhai; scenarios use it for the unit value.
        engine
            .register_custom_syntax(["null"], false, |_, _| Ok(Dynamic::UNIT))
            .map_err(EvaluatorError::script)?;

        let cancellation = context.cancellation().clone();
        engine.on_progress(move |_| {
            if cancellation.is_cancelled() {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        let request = context.shared_request();
        let patterns = context.patterns().clone();
        engine.register_fn("pathMatches", move |template: &str| -> ScriptResult<bool> {
            let pattern = patterns
                .get_or_compile(template)
                .map_err(|e| e.to_string())?;
            match pattern.matches(request.path()) {
                Some(matched) => {
                    bindings.lock().expect("Poisoned lock!").push(matched);
                    Ok(true)
                }
                None => Ok(false),
            }
        });

        let request = context.shared_request();
        engine.register_fn("methodIs", move |method: &str| {
            request.method().as_str().eq_ignore_ascii_case(method)
        });

        let request = context.shared_request();
        engine.register_fn("paramExists", move |name: &str| {
            request.query_params().contains_key(name)
        });

        let request = context.shared_request();
        engine.register_fn("paramValue", move |name: &str| -> Dynamic {
            match request.query_param(name) {
                Some(value) => Dynamic::from(value.to_string()),
                None => Dynamic::UNIT,
            }
        });

        let request = context.shared_request();
        engine.register_fn("headerContains", move |name: &str, text: &str| {
            header_contains(&request, name, text)
        });

        let request = context.shared_request();
        engine.register_fn("typeContains", move |text: &str| {
            header_contains(&request, "content-type", text)
        });

        let request = context.shared_request();
        engine.register_fn("acceptContains", move |text: &str| {
            header_contains(&request, "accept", text)
        });

        let host = self.host.clone();
        engine.register_fn("hostType", move |name: &str| -> ScriptResult<Dynamic> {
            let host = host.as_ref().ok_or("no host registry is configured")?;
            let value = host
                .lookup(name)
                .ok_or_else(|| format!("no host value is registered as `{}`", name))?;
            Ok(value_to_dynamic(&value))
        });

        let host = self.host.clone();
        engine.register_fn(
            "hostCall",
            move |name: &str, args: Array| -> ScriptResult<Dynamic> {
                let host = host.as_ref().ok_or("no host registry is configured")?;
                let args: Vec<Value> = args.into_iter().map(dynamic_to_value).collect();
                match host.invoke(name, &args) {
                    Some(Ok(value)) => Ok(value_to_dynamic(&value)),
                    Some(Err(message)) => Err(message.into()),
                    None => Err(format!("no host function is registered as `{}`", name).into()),
                }
            },
        );

        Ok(engine)
    }
}

impl Evaluate for RhaiEvaluator {
    fn evaluate(
        &self,
        expression: &Expression,
        context: &mut EvaluationContext,
    ) -> Result<Value, EvaluatorError> {
        let bindings = Arc::new(Mutex::new(Vec::new()));
        let engine = self.engine(context, bindings.clone())?;

        let before = context.snapshot();
        let mut scope = Scope::new();
        for (name, value) in &before {
            scope.push_dynamic(name.clone(), value_to_dynamic(value));
        }

        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, expression.source())
            .map_err(|e| {
                if context.is_cancelled() {
                    EvaluatorError::Cancelled
                } else {
                    EvaluatorError::script(e)
                }
            })?;

        for (name, _, value) in scope.iter() {
            let value = dynamic_to_value(value);
            if before.get(name) != Some(&value) {
                context.assign(name, value)?;
            }
        }
        let bindings = std::mem::take(&mut *bindings.lock().expect("Poisoned lock!"));
        for matched in &bindings {
            context.bind_path_params(matched);
        }

        Ok(dynamic_to_value(result))
    }
}

impl fmt::Debug for RhaiEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiEvaluator")
            .field("host", &self.host.is_some())
            .field("max_operations", &self.max_operations)
            .finish()
    }
}

fn header_contains(request: &crate::Request, name: &str, text: &str) -> bool {
    request
        .headers()
        .get_all(name)
        .iter()
        .any(|value| String::from_utf8_lossy(value.as_bytes()).contains(text))
}

pub(crate) fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Integer(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Bytes(bytes) => Dynamic::from_blob(bytes.clone()),
        Value::List(values) => Dynamic::from_array(values.iter().map(value_to_dynamic).collect()),
        Value::Map(values) => {
            let mut map = Map::new();
            for (k, v) in values {
                map.insert(k.as_str().into(), value_to_dynamic(v));
            }
            Dynamic::from_map(map)
        }
    }
}

pub(crate) fn dynamic_to_value(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Integer(i)
    } else if let Ok(f) = value.as_float() {
        Value::Float(f)
    } else if let Ok(c) = value.as_char() {
        Value::String(c.to_string())
    } else if value.is_string() {
        Value::String(value.into_string().unwrap_or_default())
    } else if let Some(bytes) = value.clone().try_cast::<Blob>() {
        Value::Bytes(bytes)
    } else if let Some(values) = value.clone().try_cast::<Array>() {
        Value::List(values.into_iter().map(dynamic_to_value).collect())
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        Value::Map(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_value(v)))
                .collect(),
        )
    } else {
        Value::String(value.to_string())
    }
}
