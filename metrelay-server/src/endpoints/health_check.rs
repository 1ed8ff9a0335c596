//! Liveness and readiness checks.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::service::ServiceState;

#[derive(Debug, Serialize)]
struct Status {
    is_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    hub: Option<String>,
}

pub async fn handle_live() -> impl IntoResponse {
    Json(Status {
        is_healthy: true,
        hub: None,
    })
}

/// Ready while the event hub connection is open.
pub async fn handle_ready(State(state): State<ServiceState>) -> impl IntoResponse {
    let dispatcher = state.dispatcher();
    if dispatcher.is_closed() {
        let status = Status {
            is_healthy: false,
            hub: None,
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(status));
    }

    let status = Status {
        is_healthy: true,
        hub: Some(dispatcher.runtime().path),
    };
    (StatusCode::OK, Json(status))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use metrelay_eventhub::testutils::MockTransport;
    use tower::ServiceExt;

    use crate::server::make_app;
    use crate::testutils;

    async fn get(app: axum::Router, uri: &str) -> (u16, String) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_live() {
        let setup = testutils::setup("", MockTransport::new()).await;
        let app = make_app(setup.state);

        let (status, body) = get(app, "/healthcheck/live").await;
        assert_eq!(status, 200);
        assert_eq!(body, r#"{"is_healthy":true}"#);
    }

    #[tokio::test]
    async fn test_ready_while_open() {
        let setup = testutils::setup("", MockTransport::new()).await;
        let app = make_app(setup.state);

        let (status, body) = get(app, "/healthcheck/ready").await;
        assert_eq!(status, 200);
        assert_eq!(body, r#"{"is_healthy":true,"hub":"metrics"}"#);
    }

    #[tokio::test]
    async fn test_not_ready_after_close() {
        let setup = testutils::setup("", MockTransport::new()).await;
        setup.state.dispatcher().close().await.unwrap();
        let app = make_app(setup.state);

        let (status, body) = get(app.clone(), "/healthcheck/ready").await;
        assert_eq!(status, 503);
        assert_eq!(body, r#"{"is_healthy":false}"#);

        let (status, _) = get(app, "/healthcheck/live").await;
        assert_eq!(status, 200);
    }
}
