//! Documentation endpoint handler.
//!
//! This module provides the `/doc` endpoint handler that displays
//! usage documentation for the exporter.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::handlers::health::FOOTER_TEXT;
use crate::state::SharedState;

/// Handler for the /doc endpoint.
#[instrument(skip(state))]
pub async fn doc_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /doc request");

    let version = env!("CARGO_PKG_VERSION");
    let probes_status = if state.prober.is_some() {
        "enabled"
    } else {
        "disabled (no prometheus section configured)"
    };
    let doc = format!(
        r#"SCRIPT STATUS EXPORTER - DOCUMENTATION
======================================

VERSION: {version}
DESCRIPTION: Prometheus exporter for script results and alert probe states

HTTP ENDPOINTS
--------------
GET /probe           - Run a script and return its metrics
GET /probes-status   - Probe state per alerting rule and instance ({probes_status})
GET /metrics         - Exporter's own metrics
GET /health          - Health check (plain text)
GET /doc             - This documentation (plain text)

PROBE PARAMETERS
----------------
script=<name>        - Configured script to run (required)
prefix=<ns>          - Prefix every metric of the script output with "<ns>_"
params=<p1,p2>       - Names of further query parameters whose values are
                       appended to the script's arguments, in order
output=ignore        - Only return the script_* metrics
timeout=<seconds>    - Overrides the X-Prometheus-Scrape-Timeout-Seconds header

SYNTHETIC METRICS
-----------------
script_success{{script}}            - 1 if the script succeeded, 0 otherwise
script_duration_seconds{{script}}   - Script execution time in seconds
script_exit_code{{script}}          - Exit code of the script (-1 if none)

probe_status{{alertname,instance}}  - ok/pending/warning/firing mapped to
                                     the configured probe_states values

EXAMPLE USAGE
-------------
curl 'http://localhost:9469/probe?script=ping&prefix=ping&params=target&target=example.com'
curl http://localhost:9469/probes-status

PROMETHEUS SCRAPE CONFIG
------------------------
scrape_configs:
  - job_name: 'script_ping'
    metrics_path: /probe
    params:
      script: [ping]
      prefix: [ping]
    static_configs:
      - targets: ['localhost:9469']

{FOOTER_TEXT}
"#
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        doc,
    )
}
