use crate::context::Cancellation;
use crate::mock_server::hyper::run_server;
use crate::request::BodyPrintLimit;
use crate::{MockEngine, Request, Response};
use http::StatusCode;
use log::{debug, info, warn};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tokio::sync::RwLock;

/// An HTTP web-server running in the background to serve the scenarios of a [`MockEngine`].
///
/// `BareMockServer` is the actual mock server behind the publicly-exposed `MockServer`.
pub(crate) struct BareMockServer {
    state: Arc<MockServerState>,
    server_address: SocketAddr,
    // When `_shutdown_trigger` gets dropped the listening server terminates gracefully.
    _shutdown_trigger: tokio::sync::oneshot::Sender<()>,
}

/// The elements of [`BareMockServer`] that are affected by each incoming request.
/// By bundling them together, we can expose a unified `handle_request` that ensures
/// they are kept in sync without having to leak logic across multiple corners of the `BareMockServer`'s implementation.
pub(super) struct MockServerState {
    engine: MockEngine,
    received_requests: Option<RwLock<Vec<Request>>>,
    body_print_limit: BodyPrintLimit,
}

impl MockServerState {
    pub(super) async fn handle_request(&self, request: Request) -> Response {
        debug!("Handling request.");
        if let Some(received_requests) = &self.received_requests {
            received_requests.write().await.push(request.clone());
        }

        let engine = self.engine.clone();
        let cancellation = Cancellation::new();
        // Cancels the evaluation if this future is dropped, e.g. because the client went away.
        let guard = CancelOnDrop(Some(cancellation.clone()));
        let unexpected = request.clone();
        let outcome = tokio::task::spawn_blocking(move || engine.handle_with(request, &cancellation))
            .await;
        guard.disarm();

        match outcome {
            Ok(response) => {
                if response.status() == StatusCode::NOT_FOUND && response.body().is_empty() {
                    let mut buffer = String::new();
                    if unexpected
                        .print_with_limit(&mut buffer, self.body_print_limit)
                        .is_ok()
                    {
                        debug!("Got unexpected request:\n{}", buffer);
                    }
                }
                response
            }
            Err(e) => {
                warn!("Scenario evaluation panicked: {}", e);
                Response::new(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

struct CancelOnDrop(Option<Cancellation>);

impl CancelOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(cancellation) = self.0.take() {
            cancellation.cancel();
        }
    }
}

/// Whether the server records the requests it receives.
pub(super) enum RequestRecording {
    Enabled,
    Disabled,
}

impl BareMockServer {
    /// Start a new instance of a `BareMockServer` listening on the specified
    /// [`TcpListener`].
    pub(super) async fn start(
        listener: TcpListener,
        engine: MockEngine,
        request_recording: RequestRecording,
        body_print_limit: BodyPrintLimit,
    ) -> Self {
        let (shutdown_trigger, shutdown_receiver) = tokio::sync::oneshot::channel();
        let received_requests = match request_recording {
            RequestRecording::Enabled => Some(RwLock::new(Vec::new())),
            RequestRecording::Disabled => None,
        };
        let state = Arc::new(MockServerState {
            engine,
            received_requests,
            body_print_limit,
        });
        let server_address = listener
            .local_addr()
            .expect("Failed to get server address.");

        let server_state = state.clone();
        std::thread::spawn(move || {
            let server_future = run_server(listener, server_state, shutdown_receiver);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("Cannot build local tokio runtime");

            runtime.block_on(server_future);
        });
        info!("Mock server listening on http://{}", server_address);

        Self {
            state,
            server_address,
            _shutdown_trigger: shutdown_trigger,
        }
    }

    pub(crate) fn engine(&self) -> &MockEngine {
        &self.state.engine
    }

    /// Return the base uri of this running instance of `BareMockServer`, e.g. `http://127.0.0.1:4372`.
    ///
    /// Use this method to compose uris when interacting with this instance of `BareMockServer` via
    /// an HTTP client.
    pub(crate) fn uri(&self) -> String {
        format!("http://{}", self.server_address)
    }

    /// Return the socket address of this running instance of `BareMockServer`, e.g. `127.0.0.1:4372`.
    ///
    /// Use this method to interact with the `BareMockServer` using `TcpStream`s.
    pub(crate) fn address(&self) -> &SocketAddr {
        &self.server_address
    }

    /// Return the list of requests received by this instance of `BareMockServer`, if request
    /// recording is enabled.
    pub(crate) async fn received_requests(&self) -> Option<Vec<Request>> {
        match &self.state.received_requests {
            Some(requests) => Some(requests.read().await.clone()),
            None => None,
        }
    }
}
