//! Client for the metrics backend (Prometheus HTTP API v1).
//!
//! The probe aggregator only needs two operations, listing alerting rules
//! and running an instant query, so they are exposed through the
//! [`RulesBackend`] trait. [`PrometheusClient`] is the HTTP implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PrometheusConfig;

/// Name of the series Prometheus keeps for pending and firing alerts.
pub const ALERTS_METRIC: &str = "ALERTS";
pub const METRIC_NAME_LABEL: &str = "__name__";
/// Rule annotation holding the query for the rule's ok condition.
pub const REVERSE_EXPR_ANNOTATION: &str = "expr_reversed";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("prometheus returned {error_type}: {error}")]
    Api { error_type: String, error: String },
    #[error("unexpected result type '{0}', expected vector")]
    UnexpectedResultType(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

/// An alerting rule as listed by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertingRule {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl AlertingRule {
    /// The non-empty reverse expression annotation, if any.
    pub fn reverse_expr(&self) -> Option<&str> {
        self.annotations
            .get(REVERSE_EXPR_ANNOTATION)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// One row of an instant vector result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeSample {
    /// All labels, including `__name__` when the series has one.
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl ProbeSample {
    pub fn metric_name(&self) -> Option<&str> {
        self.label(METRIC_NAME_LABEL)
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Result of an instant query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub samples: Vec<ProbeSample>,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait RulesBackend: Send + Sync {
    /// Lists every alerting rule across all rule groups.
    async fn alerting_rules(&self) -> Result<Vec<AlertingRule>, BackendError>;

    /// Runs an instant query evaluated at the current time.
    async fn query(&self, query: &str, timeout: Duration) -> Result<QueryResult, BackendError>;
}

/// HTTP client for a Prometheus server.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: reqwest::Client,
    base_url: String,
    rules_timeout: Duration,
}

impl PrometheusClient {
    pub fn new(config: &PrometheusConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("script-status-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url(),
            rules_timeout: config.rules_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RulesBackend for PrometheusClient {
    async fn alerting_rules(&self) -> Result<Vec<AlertingRule>, BackendError> {
        let url = format!("{}/api/v1/rules", self.base_url);
        debug!("Fetching alerting rules from {}", url);
        let body = self
            .client
            .get(&url)
            .query(&[("type", "alert")])
            .timeout(self.rules_timeout)
            .send()
            .await?
            .text()
            .await?;
        parse_rules_response(&body)
    }

    async fn query(&self, query: &str, timeout: Duration) -> Result<QueryResult, BackendError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let body = self
            .client
            .get(&url)
            .query(&[
                ("query", query.to_string()),
                ("time", format!("{time:.3}")),
                ("timeout", format!("{}ms", timeout.as_millis())),
            ])
            .timeout(timeout)
            .send()
            .await?
            .text()
            .await?;

        let result = parse_query_response(&body)?;
        for warning in &result.warnings {
            warn!(query = %query, "Prometheus returned a warning: {}", warning);
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

impl<T> ApiResponse<T> {
    fn into_data(self) -> Result<(T, Vec<String>), BackendError> {
        if self.status != "success" {
            return Err(BackendError::Api {
                error_type: self.error_type.unwrap_or_else(|| self.status.clone()),
                error: self.error.unwrap_or_default(),
            });
        }
        let data = self
            .data
            .ok_or_else(|| BackendError::Decode("missing data".into()))?;
        Ok((data, self.warnings))
    }
}

#[derive(Debug, Deserialize)]
struct RulesData {
    groups: Vec<RuleGroup>,
}

#[derive(Debug, Deserialize)]
struct RuleGroup {
    #[serde(default)]
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

/// Extracts alerting rules from a `/api/v1/rules` response body.
pub fn parse_rules_response(body: &str) -> Result<Vec<AlertingRule>, BackendError> {
    let response: ApiResponse<RulesData> =
        serde_json::from_str(body).map_err(|e| BackendError::Decode(e.to_string()))?;
    let (data, _) = response.into_data()?;

    Ok(data
        .groups
        .into_iter()
        .flat_map(|group| group.rules)
        .filter(|rule| rule.kind == "alerting")
        .map(|rule| AlertingRule {
            name: rule.name,
            labels: rule.labels,
            annotations: rule.annotations,
        })
        .collect())
}

/// Extracts the instant vector from a `/api/v1/query` response body.
pub fn parse_query_response(body: &str) -> Result<QueryResult, BackendError> {
    let response: ApiResponse<QueryData> =
        serde_json::from_str(body).map_err(|e| BackendError::Decode(e.to_string()))?;
    let (data, warnings) = response.into_data()?;

    if data.result_type != "vector" {
        return Err(BackendError::UnexpectedResultType(data.result_type));
    }

    let rows: Vec<VectorSample> =
        serde_json::from_value(data.result).map_err(|e| BackendError::Decode(e.to_string()))?;
    let samples = rows
        .into_iter()
        .map(|row| {
            let value = row
                .value
                .1
                .parse::<f64>()
                .map_err(|e| BackendError::Decode(format!("sample value '{}': {}", row.value.1, e)))?;
            Ok(ProbeSample {
                labels: row.metric,
                value,
            })
        })
        .collect::<Result<Vec<_>, BackendError>>()?;

    Ok(QueryResult { samples, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"{
      "status": "success",
      "data": {
        "groups": [
          {
            "name": "node",
            "file": "/etc/prometheus/rules.yml",
            "rules": [
              {
                "type": "alerting",
                "name": "HighCPU",
                "query": "cpu > 0.9",
                "labels": {"severity": "warning"},
                "annotations": {"expr_reversed": "up == 1", "summary": "CPU"},
                "alerts": [],
                "health": "ok"
              },
              {
                "type": "recording",
                "name": "job:cpu:avg",
                "query": "avg(cpu)"
              }
            ]
          },
          {"name": "empty", "rules": []}
        ]
      }
    }"#;

    #[test]
    fn test_parse_rules() {
        let rules = parse_rules_response(RULES).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "HighCPU");
        assert_eq!(rules[0].labels["severity"], "warning");
        assert_eq!(rules[0].reverse_expr(), Some("up == 1"));
    }

    #[test]
    fn test_reverse_expr_blank() {
        let mut rule = AlertingRule::default();
        assert_eq!(rule.reverse_expr(), None);
        rule.annotations
            .insert(REVERSE_EXPR_ANNOTATION.into(), "   ".into());
        assert_eq!(rule.reverse_expr(), None);
    }

    #[test]
    fn test_parse_vector() {
        let body = r#"{
          "status": "success",
          "data": {
            "resultType": "vector",
            "result": [
              {"metric": {"__name__": "up", "instance": "a:9100"}, "value": [1700000000.5, "1"]},
              {"metric": {"__name__": "ALERTS", "alertstate": "firing"}, "value": [1700000000.5, "NaN"]}
            ]
          },
          "warnings": ["partial response"]
        }"#;
        let result = parse_query_response(body).unwrap();
        assert_eq!(result.samples.len(), 2);
        assert_eq!(result.samples[0].metric_name(), Some("up"));
        assert_eq!(result.samples[0].label("instance"), Some("a:9100"));
        assert_eq!(result.samples[0].value, 1.0);
        assert!(result.samples[1].value.is_nan());
        assert_eq!(result.warnings, vec!["partial response"]);
    }

    #[test]
    fn test_parse_unexpected_result_type() {
        let body = r#"{"status":"success","data":{"resultType":"scalar","result":[1700000000,"1"]}}"#;
        let err = parse_query_response(body).unwrap_err();
        assert!(matches!(err, BackendError::UnexpectedResultType(t) if t == "scalar"));
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error at char 3"}"#;
        let err = parse_query_response(body).unwrap_err();
        assert_eq!(
            err.to_string(),
            "prometheus returned bad_data: parse error at char 3"
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_rules_response("<html>bad gateway</html>"),
            Err(BackendError::Decode(_))
        ));
    }
}
