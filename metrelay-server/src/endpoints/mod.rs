//! Web server endpoints.
//!
//! The remote write endpoint lives at the configured write path. Health checks are served
//! under `/healthcheck`.

use axum::Router;
use axum::routing::get;
use metrelay_config::Config;

use crate::service::ServiceState;

mod health_check;
mod write;

/// Returns all routes of the server.
pub fn routes(config: &Config) -> Router<ServiceState> {
    Router::new()
        .route(config.write_path(), write::route(config))
        .route("/healthcheck/live", get(health_check::handle_live))
        .route("/healthcheck/ready", get(health_check::handle_ready))
}
