//! Application state management for the exporter.
//!
//! This module defines the shared application state that is built once at
//! startup and passed to every HTTP handler.

use prometheus::Registry;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::backend::PrometheusClient;
use crate::config::Config;
use crate::metrics::ExporterMetrics;
use crate::probe::ProbeAggregator;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests.
pub struct AppState {
    pub registry: Registry,
    pub metrics: ExporterMetrics,
    pub config: Arc<Config>,
    /// Present only when a prometheus section is configured.
    pub prober: Option<Arc<ProbeAggregator>>,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: Config, prober: Option<Arc<ProbeAggregator>>) -> prometheus::Result<Self> {
        let registry = Registry::new();
        let metrics = ExporterMetrics::new(&registry)?;
        debug!("Prometheus registry initialized");

        Ok(Self {
            registry,
            metrics,
            config: Arc::new(config),
            prober,
            started: Instant::now(),
        })
    }

    /// Builds the state, including the Prometheus client when configured.
    pub fn from_config(config: Config) -> anyhow::Result<SharedState> {
        let prober = match &config.prometheus {
            Some(prom) => {
                let client = PrometheusClient::new(prom)?;
                info!("Probe status enabled against {}", client.base_url());
                Some(Arc::new(ProbeAggregator::from_config(
                    Arc::new(client),
                    prom,
                    config.probe_states,
                )))
            }
            None => None,
        };

        Ok(Arc::new(Self::new(config, prober)?))
    }
}
