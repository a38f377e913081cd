//! Probe status aggregation over Prometheus alerting rules.
//!
//! Every alerting rule carrying an `expr_reversed` annotation is queried as
//! `<expr_reversed> OR ALERTS{alertname="<rule>"}`, so a single instant
//! query returns both the instances that are fine and the ones with an
//! active alert. Each returned sample becomes one `probe_status` line.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::backend::{AlertingRule, BackendError, ProbeSample, RulesBackend, ALERTS_METRIC};
use crate::config::{PrometheusConfig, StateMapping};
use crate::exposition::{escape_label_value, format_labels};
use crate::status::{classify, SEVERITY_LABEL};
use crate::template::TemplateExpander;

pub const PROBE_STATUS_METRIC: &str = "probe_status";
pub const ALERTNAME_LABEL: &str = "alertname";
pub const INSTANCE_LABEL: &str = "instance";

/// Builds the query for `rule`, or `None` when it has no reverse expression.
pub fn build_query(rule: &AlertingRule) -> Option<String> {
    let expr = rule.reverse_expr()?;
    Some(format!(
        "{expr} OR {ALERTS_METRIC}{{{ALERTNAME_LABEL}=\"{}\"}}",
        escape_label_value(&rule.name)
    ))
}

/// Fans out one query per rule and merges the rendered lines.
pub struct ProbeAggregator {
    backend: Arc<dyn RulesBackend>,
    mapping: StateMapping,
    keep_labels: Vec<String>,
    expander: TemplateExpander,
    query_timeout: Duration,
}

impl ProbeAggregator {
    pub fn new(
        backend: Arc<dyn RulesBackend>,
        mapping: StateMapping,
        keep_labels: Vec<String>,
        expander: TemplateExpander,
        query_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            mapping,
            keep_labels,
            expander,
            query_timeout,
        }
    }

    pub fn from_config(
        backend: Arc<dyn RulesBackend>,
        config: &PrometheusConfig,
        mapping: StateMapping,
    ) -> Self {
        let expander =
            TemplateExpander::new(config.external_labels.clone(), config.external_url());
        Self::new(
            backend,
            mapping,
            config.keep_labels.clone(),
            expander,
            config.query_timeout(),
        )
    }

    /// Renders the full response body; empty when nothing could be fetched.
    pub async fn render(self: &Arc<Self>) -> String {
        let lines = self.collect().await;
        if lines.is_empty() {
            return String::new();
        }
        let mut body = lines.join("\n");
        body.push('\n');
        body
    }

    /// Queries all rules concurrently and returns their lines.
    ///
    /// Lines keep the backend's order within a rule and the rule listing
    /// order across rules. Failing rules are logged and contribute nothing.
    #[instrument(skip(self))]
    pub async fn collect(self: &Arc<Self>) -> Vec<String> {
        let rules = match self.backend.alerting_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                error!("Failed to fetch prometheus rules: {}", e);
                return Vec::new();
            }
        };

        let mut tasks = Vec::new();
        for rule in rules {
            let Some(query) = build_query(&rule) else {
                debug!(rule = %rule.name, "Skipping rule without reverse expression");
                continue;
            };
            let this = Arc::clone(self);
            let name = rule.name.clone();
            let handle = tokio::spawn(async move { this.probe_rule(&rule, &query).await });
            tasks.push((name, handle));
        }
        debug!("Spawned {} probe status queries", tasks.len());

        let mut lines = Vec::new();
        for (name, handle) in tasks {
            match handle.await {
                Ok(Ok(rule_lines)) => lines.extend(rule_lines),
                Ok(Err(e)) => error!(rule = %name, "Failed to fetch probe status: {}", e),
                Err(e) => error!(rule = %name, "Probe status task failed: {}", e),
            }
        }
        lines
    }

    /// Runs the query for one rule and renders every resulting sample.
    pub async fn probe_rule(
        &self,
        rule: &AlertingRule,
        query: &str,
    ) -> Result<Vec<String>, BackendError> {
        let result = self.backend.query(query, self.query_timeout).await?;
        debug!(
            rule = %rule.name,
            samples = result.samples.len(),
            "Probe status query finished"
        );
        Ok(result
            .samples
            .iter()
            .map(|sample| self.render_sample(rule, sample))
            .collect())
    }

    /// Renders `probe_status{...} <value>` for one sample.
    pub fn render_sample(&self, rule: &AlertingRule, sample: &ProbeSample) -> String {
        let state = classify(sample, rule);
        let template_name = format!("__alert_{}", rule.name);

        let mut labels = self.status_labels(rule, sample);
        for value in labels.values_mut() {
            *value = self
                .expander
                .expand(&template_name, value, &sample.labels, sample.value);
        }

        format!(
            "{PROBE_STATUS_METRIC}{} {}",
            format_labels(&labels),
            self.mapping.value(state)
        )
    }

    /// Rule labels, overridden by kept sample labels, overridden by
    /// `alertname` and `instance`; `severity` never survives.
    fn status_labels(&self, rule: &AlertingRule, sample: &ProbeSample) -> BTreeMap<String, String> {
        let mut labels = rule.labels.clone();

        for name in &self.keep_labels {
            if name.starts_with("__") {
                continue;
            }
            if let Some(value) = sample.label(name) {
                labels.insert(name.clone(), value.to_string());
            }
        }

        labels.insert(ALERTNAME_LABEL.to_string(), rule.name.clone());
        if let Some(instance) = sample.label(INSTANCE_LABEL) {
            labels.insert(INSTANCE_LABEL.to_string(), instance.to_string());
        }
        labels.remove(SEVERITY_LABEL);
        labels
    }
}
