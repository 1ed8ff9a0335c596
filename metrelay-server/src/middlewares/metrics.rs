use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use metrelay_statsd::metric;
use tokio::time::Instant;

use crate::service::ServiceState;
use crate::statsd::{ServerCounters, ServerTimers};

/// Records the duration and status of every routed request.
///
/// Must be registered as a route layer so that the matched path is available.
pub async fn metrics(State(state): State<ServiceState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unknown".to_owned());
    let method = request.method().clone();

    let response = next.run(request).await;

    let metrics = state.metrics();
    let status = response.status();
    metric!(
        metrics,
        counter(ServerCounters::Requests) += 1,
        route = &route,
        method = method.as_str(),
        status_code = status.as_str(),
    );
    metric!(
        metrics,
        timer(ServerTimers::RequestsDuration) = start.elapsed(),
        route = &route,
        method = method.as_str(),
        status_code = status.as_str(),
    );

    response
}
