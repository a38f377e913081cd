//! Probe status endpoint handler.

use axum::{extract::State, http::header, response::IntoResponse};
use tracing::{debug, instrument};

use crate::handlers::probe::CONTENT_TYPE_TEXT;
use crate::state::SharedState;

/// Handler for the /probes-status endpoint.
///
/// Backend failures never fail the request; they only shrink the body.
#[instrument(skip(state))]
pub async fn probes_status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /probes-status request");

    let body = match &state.prober {
        Some(prober) => prober.render().await,
        None => String::new(),
    };

    ([(header::CONTENT_TYPE, CONTENT_TYPE_TEXT)], body)
}
