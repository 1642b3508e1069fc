#![allow(clippy::needless_doctest_main)]
//! `scenario-mock` is a scenario-driven HTTP mock server, to perform black-box testing of Rust
//! applications that interact with third-party APIs.
//!
//! Behaviour is declared as a *feature*: an ordered list of scenarios, each a predicate over the
//! incoming request paired with the statements computing the response, plus a background
//! evaluated once to set up globals and configuration.
//!
//! # Table of Contents
//! 1. [Getting started](#getting-started)
//! 2. [Scenarios](#scenarios)
//! 3. [Expressions](#expressions)
//! 4. [Configuration](#configuration)
//! 5. [Failures](#failures)
//! 6. [Runtime compatibility](#runtime-compatibility)
//!
//! ## Getting started
//! ```rust
//! use scenario_mock::{FeatureDefinition, MockEngine, MockServer, RhaiEvaluator, Scenario};
//!
//! #[async_std::main]
//! async fn main() {
//!     let evaluator = RhaiEvaluator::new();
//!     let feature = FeatureDefinition::builder()
//!         .background(r#"configure responseHeaders = #{ "X-Mock": "yes" }"#)
//!         .scenario(
//!             Scenario::given(r#"pathMatches("/hello/{name}") && methodIs("get")"#)
//!                 .then(r#"def response = "hello " + name"#),
//!         )
//!         .build(&evaluator)
//!         .expect("Invalid feature");
//!
//!     // Start a background HTTP server on a random local port
//!     let mock_server = MockServer::start(MockEngine::new(feature, evaluator)).await;
//!
//!     // If we probe the MockServer using any HTTP client it behaves as expected.
//!     let response = reqwest::get(format!("{}/hello/world", &mock_server.uri()))
//!         .await
//!         .unwrap();
//!     assert_eq!(response.status(), 200);
//!     assert_eq!(response.headers()["x-mock"], "yes");
//!     assert_eq!(response.text().await.unwrap(), "hello world");
//!
//!     // If the request doesn't match any scenario a 404 is returned.
//!     let status = reqwest::get(format!("{}/missing", &mock_server.uri()))
//!         .await
//!         .unwrap()
//!         .status();
//!     assert_eq!(status, 404);
//! }
//! ```
//!
//! ## Scenarios
//!
//! A [`Scenario`] is a predicate followed by statements:
//! - `def <name> = <expression>` binds a variable. The reserved names `response`,
//!   `responseHeaders`, `responseStatus` and `responseDelay` shape the response;
//! - any other line is an expression evaluated for its side effects.
//!
//! Scenarios are matched in declaration order and the first one whose predicate evaluates to
//! `true` wins: the statements of later scenarios never run for that request.
//! `pathMatches("/users/{id}")` binds `id` to the raw, not percent-decoded, path segment; the
//! binding is visible to the statements of the scenario, both as `id` and as `pathParams.id`.
//!
//! A `response` that is never assigned, or assigned `null` (or `()`), produces an empty body.
//!
//! ## Expressions
//!
//! The engine does not interpret expressions: it delegates to an [`Evaluate`] implementation.
//! [`RhaiEvaluator`] is provided out of the box and speaks [rhai](https://rhai.rs); check its
//! documentation for the helper functions available to scripts. Host values and functions can
//! be exposed to scripts through a [`HostRegistry`], e.g. [`HostBindings`].
//!
//! ## Configuration
//!
//! The background runs once, when the feature is built. Besides `def`s, which become globals
//! visible to every scenario, it accepts `configure <option> = <expression>`:
//! - `responseHeaders`: headers added to every response, unless a scenario sets them;
//! - `responseDelay`: a default latency, in milliseconds;
//! - `cors`: answer `OPTIONS` preflight requests and add `Access-Control-Allow-Origin`;
//! - any option registered with [`FeatureBuilder::option`], paired with a [`ResponseTransform`].
//!
//! ## Failures
//!
//! Errors in the feature itself (malformed path template, unknown option, failing background)
//! are reported by [`FeatureBuilder::build`] as a [`FeatureError`], before any request is
//! served.
//!
//! Per-request failures never take the server down: no match is answered with an empty `404`,
//! a failing predicate or statement with a `500` whose body names the scenario and the
//! statement that failed. Use [`MockEngine::try_handle`] to get the underlying [`MockError`].
//!
//! ## Runtime compatibility
//!
//! The [`MockServer`] runs on a dedicated thread with its own [`tokio`] runtime: it can be used
//! (and it is tested to work) with [`async_std`], [`tokio`] and [`actix_rt`] as futures runtimes.
//! [`MockEngine`] is synchronous and can be used without any server at all.
//!
//! [`async_std`]: https://docs.rs/async-std/
//! [`tokio`]: https://docs.rs/tokio/
//! [`actix_rt`]: https://docs.rs/actix-rt/
mod context;
mod engine;
mod evaluate;
mod feature;
pub mod http;
mod mock_server;
mod path_pattern;
mod request;
mod response;
mod scenario;
mod scripting;
mod value;

pub use context::{
    Cancellation, ContextError, EvaluationContext, PATH_PARAMS, RESPONSE, RESPONSE_DELAY,
    RESPONSE_HEADERS, RESPONSE_STATUS,
};
pub use engine::{MockEngine, MockError, StatementLocation};
pub use evaluate::{Evaluate, EvaluatorError, HostBindings, HostRegistry};
pub use feature::{
    Configuration, Cors, FeatureBuilder, FeatureDefinition, FeatureError, ResponseTransform,
};
pub use mock_server::{MockServer, MockServerBuilder};
pub use path_pattern::{PathBindings, PathPattern, PatternCache, PatternError};
pub use request::{BodyPrintLimit, Request};
pub use response::Response;
pub use scenario::{Expression, Scenario, ScenarioBuilder, Statement, StatementError};
pub use scripting::RhaiEvaluator;
pub use value::{SerializationError, Value};
