//! Prometheus metrics describing the exporter itself.
//!
//! The `http_*` metrics count every instrumented request by status code and
//! method, the `scripts_*` metrics break the same requests down per script.
//! The `scripts` namespace keeps them apart from the `script_*` probe results.

use prometheus::{
    exponential_buckets, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};

/// Collection of instrumentation metrics registered in one registry.
#[derive(Clone)]
pub struct ExporterMetrics {
    pub http_requests: IntCounterVec,
    pub http_duration: HistogramVec,
    pub script_requests: IntCounterVec,
    pub script_inflight: IntGaugeVec,
    pub script_duration: HistogramVec,
    pub build_info: IntGaugeVec,
}

impl ExporterMetrics {
    /// Creates and registers all metrics with the registry.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let http_requests = IntCounterVec::new(
            Opts::new(
                "requests_total",
                "Total requests for scripts by HTTP result code and method.",
            )
            .namespace("http"),
            &["code", "method"],
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "requests_duration_seconds",
                "A histogram of request durations by HTTP result code and method.",
            )
            .namespace("http")
            .buckets(exponential_buckets(0.1, 1.5, 5)?),
            &["code", "method"],
        )?;

        // Per-script metrics
        let script_requests = IntCounterVec::new(
            Opts::new("requests_total", "Total requests to a script").namespace("scripts"),
            &["script"],
        )?;
        let script_inflight = IntGaugeVec::new(
            Opts::new("requests_inflight", "Number of requests in flight to a script")
                .namespace("scripts"),
            &["script"],
        )?;
        let script_duration = HistogramVec::new(
            HistogramOpts::new("duration_seconds", "A histogram of request durations to a script")
                .namespace("scripts"),
            &["script"],
        )?;

        let build_info = IntGaugeVec::new(
            Opts::new(
                "build_info",
                "A metric with a constant '1' value labeled by build information.",
            )
            .namespace("scripts"),
            &["version", "revision", "branch", "builddate"],
        )?;
        build_info
            .with_label_values(&[
                env!("CARGO_PKG_VERSION"),
                option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
                option_env!("VERGEN_GIT_BRANCH").unwrap_or("unknown"),
                option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
            ])
            .set(1);

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_duration.clone()))?;
        registry.register(Box::new(script_requests.clone()))?;
        registry.register(Box::new(script_inflight.clone()))?;
        registry.register(Box::new(script_duration.clone()))?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            http_requests,
            http_duration,
            script_requests,
            script_inflight,
            script_duration,
            build_info,
        })
    }

    /// Records a finished request.
    pub fn observe_request(&self, script: &str, code: u16, method: &str, seconds: f64) {
        let code = code.to_string();
        self.http_requests
            .with_label_values(&[code.as_str(), method])
            .inc();
        self.http_duration
            .with_label_values(&[code.as_str(), method])
            .observe(seconds);
        self.script_duration
            .with_label_values(&[script])
            .observe(seconds);
    }
}
