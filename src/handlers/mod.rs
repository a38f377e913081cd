//! HTTP endpoint handlers for the exporter.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/probe`: Run a script and return its metrics
//! - `/probes-status`: Alert probe states from Prometheus
//! - `/metrics`: Exporter's own metrics
//! - `/health`: Health check endpoint
//! - `/doc`: Documentation endpoint

use axum::{middleware, routing::get, Router};

use crate::state::SharedState;

pub mod doc;
pub mod health;
pub mod instrument;
pub mod metrics;
pub mod probe;
pub mod probes_status;

// Re-export handlers
pub use doc::doc_handler;
pub use health::health_handler;
pub use instrument::track_script_requests;
pub use metrics::metrics_handler;
pub use probe::probe_handler;
pub use probes_status::probes_status_handler;

/// Builds the HTTP router. Only `/probe` is instrumented.
pub fn router(state: SharedState) -> Router {
    let probe = Router::new()
        .route("/probe", get(probe_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            track_script_requests,
        ));

    let mut app = Router::new()
        .merge(probe)
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/doc", get(doc_handler))
        .route("/", get(doc_handler));

    if state.prober.is_some() {
        app = app.route("/probes-status", get(probes_status_handler));
    }

    app.with_state(state)
}
