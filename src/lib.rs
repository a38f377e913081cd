//! script-status-exporter library.
//!
//! Exposes the results of externally invoked scripts (`/probe`) and the
//! state of Prometheus alerting rules (`/probes-status`) as Prometheus
//! metrics. The binary in `main.rs` only wires these modules together.

pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod exposition;
pub mod handlers;
pub mod metrics;
pub mod probe;
pub mod runner;
pub mod server;
pub mod state;
pub mod status;
pub mod template;

pub use config::Config;
pub use handlers::router;
pub use state::{AppState, SharedState};
