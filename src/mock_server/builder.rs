use crate::mock_server::bare_server::{BareMockServer, RequestRecording};
use crate::request::{BodyPrintLimit, BODY_PRINT_LIMIT};
use crate::{MockEngine, MockServer};
use std::env;
use std::net::TcpListener;

const BODY_PRINT_LIMIT_VAR: &str = "SCENARIO_MOCK_BODY_PRINT_LIMIT";

/// Transport settings for a [`MockServer`]: where it listens, whether it keeps the requests it
/// served, how much of a body ends up in the logs.
///
/// What the server answers is decided by the [`MockEngine`] handed to
/// [`MockServerBuilder::start`]; nothing here affects scenario evaluation.
pub struct MockServerBuilder {
    listener: Option<TcpListener>,
    recording: RequestRecording,
    body_print_limit: BodyPrintLimit,
}

impl MockServerBuilder {
    pub(super) fn new() -> Self {
        Self {
            listener: None,
            recording: RequestRecording::Enabled,
            body_print_limit: body_print_limit_from_env(),
        }
    }

    /// Serve on an already bound `listener` instead of a fresh port on `127.0.0.1`.
    ///
    /// Handy when the system under test needs the mock address before the feature is built.
    ///
    /// ### Example:
    /// ```rust
    /// use scenario_mock::{FeatureDefinition, MockEngine, MockServer, RhaiEvaluator};
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     // Arrange
    ///     let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    ///     let address = listener.local_addr().unwrap();
    ///     let evaluator = RhaiEvaluator::new();
    ///     let feature = FeatureDefinition::builder()
    ///         .background(format!(r#"def selfUrl = "http://{}""#, address))
    ///         .build(&evaluator)
    ///         .unwrap();
    ///
    ///     // Act
    ///     let mock_server = MockServer::builder()
    ///         .listener(listener)
    ///         .start(MockEngine::new(feature, evaluator))
    ///         .await;
    ///
    ///     // Assert
    ///     assert_eq!(&address, mock_server.address());
    /// }
    /// ```
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Stop keeping a copy of every served request.
    ///
    /// Recorded requests, bodies included, live as long as the server. Turn recording off for
    /// servers that outlive a single test; [`MockServer::received_requests`] then returns `None`.
    ///
    /// ### Example:
    /// ```rust
    /// use scenario_mock::{FeatureDefinition, MockEngine, MockServer, RhaiEvaluator};
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     let evaluator = RhaiEvaluator::new();
    ///     let feature = FeatureDefinition::builder().build(&evaluator).unwrap();
    ///     let mock_server = MockServer::builder()
    ///         .disable_request_recording()
    ///         .start(MockEngine::new(feature, evaluator))
    ///         .await;
    ///
    ///     assert!(mock_server.received_requests().await.is_none());
    /// }
    /// ```
    pub fn disable_request_recording(mut self) -> Self {
        self.recording = RequestRecording::Disabled;
        self
    }

    /// Cap the number of body bytes printed when logging a request no scenario matched.
    ///
    /// Defaults to the value of `SCENARIO_MOCK_BODY_PRINT_LIMIT` if it is set to a number,
    /// `10 000` bytes otherwise.
    pub fn body_print_limit(mut self, limit: BodyPrintLimit) -> Self {
        self.body_print_limit = limit;
        self
    }

    pub(super) async fn build_bare(self, engine: MockEngine) -> BareMockServer {
        let listener = match self.listener {
            Some(listener) => listener,
            None => TcpListener::bind("127.0.0.1:0")
                .expect("Failed to bind an OS port for a mock server."),
        };
        BareMockServer::start(listener, engine, self.recording, self.body_print_limit).await
    }

    /// Start serving the scenarios of `engine`.
    pub async fn start(self, engine: MockEngine) -> MockServer {
        MockServer::new(self.build_bare(engine).await)
    }
}

fn body_print_limit_from_env() -> BodyPrintLimit {
    let limit = env::var(BODY_PRINT_LIMIT_VAR)
        .ok()
        .and_then(|limit| limit.trim().parse::<usize>().ok())
        .unwrap_or(BODY_PRINT_LIMIT);
    BodyPrintLimit::Limited(limit)
}
