//! Request instrumentation for the script endpoint.

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::IntGauge;
use std::collections::HashMap;
use std::time::Instant;

use crate::state::SharedState;

/// Holds one in-flight slot; released on drop, so an abandoned request
/// (scraper hung up mid-run) does not leave the gauge raised.
struct InflightGuard(IntGauge);

impl InflightGuard {
    fn new(gauge: IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Counts requests, in-flight requests and durations per script.
pub async fn track_script_requests(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Response {
    let script = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(mut params)| params.remove("script"))
        .unwrap_or_default();
    let method = req.method().as_str().to_owned();

    state
        .metrics
        .script_requests
        .with_label_values(&[script.as_str()])
        .inc();
    let inflight = InflightGuard::new(
        state
            .metrics
            .script_inflight
            .with_label_values(&[script.as_str()]),
    );

    let start = Instant::now();
    let response = next.run(req).await;
    drop(inflight);

    state.metrics.observe_request(
        &script,
        response.status().as_u16(),
        &method,
        start.elapsed().as_secs_f64(),
    );
    response
}
