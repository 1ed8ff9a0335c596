use std::future::{Future, IntoFuture};
use std::net::SocketAddr;

use axum::Router;
use metrelay_log::LogError;
use tokio::net::TcpListener;
use tower::ServiceBuilder;

use crate::endpoints;
use crate::middlewares::{self, CatchPanicLayer};
use crate::service::ServiceState;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[source] std::io::Error),

    /// The server stopped with an I/O error.
    #[error("failed to serve requests")]
    Serve(#[source] std::io::Error),
}

/// Builds the axum application with all routes and middleware.
pub fn make_app(state: ServiceState) -> Router {
    // Layers added first are called first on requests.
    let middleware = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(middlewares::handle_panic))
        .layer(middlewares::trace_http_layer());

    endpoints::routes(state.config())
        // Route layers see the matched path, unmatched requests are not timed.
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middlewares::metrics,
        ))
        .layer(middleware)
        .with_state(state)
}

/// The HTTP server accepting remote write requests.
#[derive(Debug)]
pub struct HttpServer {
    state: ServiceState,
    listener: TcpListener,
}

impl HttpServer {
    /// Binds the listener at the configured address.
    pub async fn bind(state: ServiceState) -> Result<Self, ServerError> {
        let addr = state.config().listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(ServerError::BindFailed)?;

        Ok(Self { state, listener })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::BindFailed)
    }

    /// Serves requests until `shutdown` resolves.
    ///
    /// After the signal, in-flight requests are given the configured shutdown timeout to finish.
    /// Returns `Ok(false)` if they were abandoned.
    pub async fn serve<F>(self, shutdown: F) -> Result<bool, ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self { state, listener } = self;
        let timeout = state.config().shutdown_timeout();

        if let Ok(addr) = listener.local_addr() {
            metrelay_log::info!("spawning http server");
            metrelay_log::info!("  listening on http://{addr}/");
        }

        let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel();
        let signal = async move {
            shutdown.await;
            metrelay_log::info!("shutting down http server");
            signalled_tx.send(()).ok();
        };

        let server = axum::serve(listener, make_app(state))
            .with_graceful_shutdown(signal)
            .into_future();
        let drain = async move {
            // A dropped sender means the server stopped before any signal.
            if signalled_rx.await.is_err() {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(timeout).await;
        };

        tokio::select! {
            result = server => {
                result.map_err(ServerError::Serve)?;
                Ok(true)
            }
            _ = drain => {
                metrelay_log::warn!(
                    timeout = ?timeout,
                    "abandoning in-flight requests after shutdown timeout"
                );
                Ok(false)
            }
        }
    }
}

/// Resolves on `SIGINT` or, on unix, `SIGTERM`.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            metrelay_log::error!("failed to listen for ctrl-c: {}", LogError(&error));
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                metrelay_log::error!("failed to listen for SIGTERM: {}", LogError(&error));
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => metrelay_log::info!("received SIGINT"),
        _ = terminate => metrelay_log::info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use metrelay_eventhub::testutils::MockTransport;

    use super::*;
    use crate::testutils::{self, series};

    const LOCAL: &str = "server:\n  host: 127.0.0.1\n  port: 0\n  shutdown_timeout: 1\n";

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let setup = testutils::setup(LOCAL, MockTransport::new()).await;
        let server = HttpServer::bind(setup.state.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(async move {
            rx.await.ok();
        }));

        // Raw HTTP/1.1 so the test needs no client dependency.
        let body = testutils::write_request(vec![series("up", &[], &[(1.0, 1_000)])]);
        let mut request = format!(
            "POST /write HTTP/1.1\r\nhost: {addr}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(&body);

        let response = send_raw(addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 204"), "{response}");

        tx.send(()).unwrap();
        assert!(handle.await.unwrap().unwrap());
        assert_eq!(setup.transport.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_serve_abandons_stuck_requests() {
        let transport = MockTransport::new().with_delay(Duration::from_secs(30));
        let setup = testutils::setup(LOCAL, transport).await;
        let server = HttpServer::bind(setup.state.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(async move {
            rx.await.ok();
        }));

        let body = testutils::write_request(vec![series("up", &[], &[(1.0, 1_000)])]);
        let mut request = format!(
            "POST /write HTTP/1.1\r\nhost: {addr}\r\ncontent-length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(&body);

        let pending = tokio::spawn(async move { send_raw(addr, &request).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        tx.send(()).unwrap();
        assert!(!handle.await.unwrap().unwrap());
        pending.abort();
    }

    async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }
}
