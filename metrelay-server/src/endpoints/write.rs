//! The remote write endpoint.

use axum::extract::{DefaultBodyLimit, FromRequest, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, post};
use bytes::Bytes;
use metrelay_config::Config;
use tokio::time::Instant;

use crate::service::ServiceState;

async fn handle(State(state): State<ServiceState>, request: Request) -> Response {
    let config = state.config();
    let deadline = Instant::now() + config.write_timeout();

    let read = Bytes::from_request(request, &state);
    let body = match tokio::time::timeout(config.read_timeout(), read).await {
        Ok(Ok(body)) => body,
        Ok(Err(rejection)) => return rejection.into_response(),
        Err(_) => {
            metrelay_log::debug!("timed out reading request body");
            return (StatusCode::REQUEST_TIMEOUT, "timed out reading request body").into_response();
        }
    };

    match state.pipeline().handle(&body, deadline).await {
        Ok(outcome) => {
            metrelay_log::trace!(
                received = outcome.received,
                filtered = outcome.filtered,
                delivered = outcome.delivered,
                "handled write request"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub fn route(config: &Config) -> MethodRouter<ServiceState> {
    post(handle).route_layer(DefaultBodyLimit::max(config.max_body_size()))
}
