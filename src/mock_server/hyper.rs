use crate::mock_server::bare_server::MockServerState;
use crate::Request;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{debug, warn};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;

/// The actual HTTP server responding to incoming requests according to the scenarios of the engine.
pub(super) async fn run_server(
    listener: std::net::TcpListener,
    server_state: Arc<MockServerState>,
    mut shutdown_signal: tokio::sync::oneshot::Receiver<()>,
) {
    listener
        .set_nonblocking(true)
        .expect("Cannot set non-blocking mode on TcpListener");
    let listener = TcpListener::from_std(listener).expect("Cannot upgrade TcpListener");

    let request_handler = move |request: hyper::Request<Incoming>| {
        let server_state = server_state.clone();
        async move {
            let request = match Request::from_hyper(request).await {
                Ok(request) => request,
                Err(e) => {
                    warn!("Failed to read the request body: {}", e);
                    let mut response = hyper::Response::new(Full::new(Bytes::new()));
                    *response.status_mut() = StatusCode::BAD_REQUEST;
                    return Ok::<_, Infallible>(response);
                }
            };
            let response = server_state.handle_request(request).await;

            // The delay is awaited here, once the scenario has been evaluated: nothing is
            // held on behalf of the engine while we wait, so other requests are served
            // in the meantime.
            if let Some(delay) = response.delay() {
                tokio::time::sleep(delay).await;
            }

            Ok::<_, Infallible>(response.into_hyper())
        }
    };

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
            // This resolves when either:
            // - the sender half of the channel gets dropped (i.e. MockServer is dropped)
            // - the sender is used, therefore sending a poison pill willingly as a shutdown signal
            _ = &mut shutdown_signal => break,
        };
        let io = TokioIo::new(stream);
        let request_handler = request_handler.clone();

        tokio::task::spawn(async move {
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service_fn(request_handler))
                .await
            {
                debug!("Connection error: {}", e);
            }
        });
    }
}
