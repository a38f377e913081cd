//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that returns
//! a short plain-text status of the exporter.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::{AppState, SharedState};

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = "Endpoints: /probe /probes-status /metrics /health /doc";

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("OK\n\n{}\n{FOOTER_TEXT}", render_table(&state)),
    )
}

/// Renders exporter status as a plain-text table.
fn render_table(state: &AppState) -> String {
    let mut out = String::new();
    writeln!(out, "{:20} | {}", "Item", "Value").ok();
    writeln!(out, "{}", "-".repeat(50)).ok();
    writeln!(
        out,
        "{:20} | {}",
        "Uptime (s)",
        state.started.elapsed().as_secs()
    )
    .ok();
    writeln!(out, "{:20} | {}", "Scripts", state.config.scripts.len()).ok();
    writeln!(
        out,
        "{:20} | {}",
        "Arguments",
        if state.config.no_args() {
            "disabled"
        } else {
            "enabled"
        }
    )
    .ok();
    let prometheus = state
        .config
        .prometheus
        .as_ref()
        .map(|p| p.url())
        .unwrap_or_else(|| "-".into());
    writeln!(out, "{:20} | {}", "Prometheus", prometheus).ok();
    out
}
