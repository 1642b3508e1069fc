use crate::mock_server::bare_server::BareMockServer;
use crate::mock_server::MockServerBuilder;
use crate::{MockEngine, Request};
use std::net::SocketAddr;

/// An HTTP web-server running in the background, answering requests with the scenarios of a
/// [`MockEngine`].
///
/// Each instance of `MockServer` is fully isolated: [`MockServer::start`] takes care of finding a random port
/// available on your local machine which is assigned to the new `MockServer`.
///
/// You can use [`MockServer::builder`] if you need to specify custom configuration - e.g.
/// run on a specific port or disable request recording.
///
/// The server runs on a dedicated thread with its own runtime, so it can be started from any
/// async runtime. It shuts down when the `MockServer` is dropped.
pub struct MockServer(BareMockServer);

impl MockServer {
    pub(super) fn new(server: BareMockServer) -> Self {
        Self(server)
    }

    /// You can use `MockServer::builder` if you need to specify custom configuration - e.g.
    /// run on a specific port or disable request recording.
    ///
    /// If this is not your case, use [`MockServer::start`].
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start a new instance of a `MockServer` listening on a random port.
    ///
    /// ### Example:
    /// ```rust
    /// use scenario_mock::{FeatureDefinition, MockEngine, MockServer, RhaiEvaluator, Scenario};
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     // Arrange
    ///     let evaluator = RhaiEvaluator::new();
    ///     let feature = FeatureDefinition::builder()
    ///         .scenario(
    ///             Scenario::given(r#"pathMatches("/hello") && methodIs("get")"#)
    ///                 .then(r#"def response = "hello world""#),
    ///         )
    ///         .build(&evaluator)
    ///         .unwrap();
    ///     let mock_server = MockServer::start(MockEngine::new(feature, evaluator)).await;
    ///
    ///     // Act
    ///     let response = reqwest::get(format!("{}/hello", mock_server.uri()))
    ///         .await
    ///         .unwrap();
    ///
    ///     // Assert
    ///     assert_eq!(response.status(), 200);
    ///     assert_eq!(response.text().await.unwrap(), "hello world");
    ///
    ///     // No scenario matches: a 404 is returned.
    ///     let status = reqwest::get(format!("{}/missing", mock_server.uri()))
    ///         .await
    ///         .unwrap()
    ///         .status();
    ///     assert_eq!(status, 404);
    /// }
    /// ```
    pub async fn start(engine: MockEngine) -> Self {
        Self::builder().start(engine).await
    }

    /// The engine answering requests on this `MockServer`.
    pub fn engine(&self) -> &MockEngine {
        self.0.engine()
    }

    /// Return the base uri of this running instance of `MockServer`, e.g. `http://127.0.0.1:4372`.
    ///
    /// Use this method to compose uris when interacting with this instance of `MockServer` via
    /// an HTTP client.
    pub fn uri(&self) -> String {
        self.0.uri()
    }

    /// Return the socket address of this running instance of `MockServer`, e.g. `127.0.0.1:4372`.
    ///
    /// Use this method to interact with the `MockServer` using `TcpStream`s.
    ///
    /// ### Example:
    /// ```rust
    /// use scenario_mock::{FeatureDefinition, MockEngine, MockServer, RhaiEvaluator};
    /// use std::net::TcpStream;
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     // Act - the server is started
    ///     let evaluator = RhaiEvaluator::new();
    ///     let feature = FeatureDefinition::builder().build(&evaluator).unwrap();
    ///     let mock_server = MockServer::start(MockEngine::new(feature, evaluator)).await;
    ///
    ///     // Assert - we can connect to it
    ///     assert!(TcpStream::connect(mock_server.address()).is_ok());
    /// }
    /// ```
    pub fn address(&self) -> &SocketAddr {
        self.0.address()
    }

    /// Return a vector with all the requests received by the `MockServer` since it started.
    /// If no request has been served, it returns an empty vector.
    ///
    /// If request recording has been disabled using [`MockServerBuilder::disable_request_recording`],
    /// it returns `None`.
    ///
    /// ### Example:
    ///
    /// ```rust
    /// use scenario_mock::{FeatureDefinition, MockEngine, MockServer, RhaiEvaluator};
    /// use scenario_mock::http::Method;
    ///
    /// #[async_std::main]
    /// async fn main() {
    ///     // Arrange
    ///     let evaluator = RhaiEvaluator::new();
    ///     let feature = FeatureDefinition::builder().build(&evaluator).unwrap();
    ///     let mock_server = MockServer::start(MockEngine::new(feature, evaluator)).await;
    ///
    ///     // Act
    ///     reqwest::get(mock_server.uri()).await.unwrap();
    ///
    ///     // Assert
    ///     let received_requests = mock_server.received_requests().await.unwrap();
    ///     assert_eq!(received_requests.len(), 1);
    ///
    ///     let received_request = &received_requests[0];
    ///     assert_eq!(received_request.method(), Method::GET);
    ///     assert_eq!(received_request.path(), "/");
    ///     assert!(received_request.body().is_empty());
    /// }
    /// ```
    pub async fn received_requests(&self) -> Option<Vec<Request>> {
        self.0.received_requests().await
    }
}
