//! Classification of probe samples into ok/pending/warning/firing.

use std::fmt;
use tracing::trace;

use crate::backend::{AlertingRule, ProbeSample, ALERTS_METRIC};
use crate::config::StateMapping;

/// Label carrying the alert state on `ALERTS` series.
pub const ALERT_STATE_LABEL: &str = "alertstate";
pub const SEVERITY_LABEL: &str = "severity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeState {
    Ok,
    Pending,
    Warning,
    Firing,
}

impl ProbeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeState::Ok => "ok",
            ProbeState::Pending => "pending",
            ProbeState::Warning => "warning",
            ProbeState::Firing => "firing",
        }
    }
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMapping {
    /// Numeric value exported for `state`.
    pub fn value(&self, state: ProbeState) -> f64 {
        match state {
            ProbeState::Ok => self.ok,
            ProbeState::Pending => self.pending,
            ProbeState::Warning => self.warning,
            ProbeState::Firing => self.firing,
        }
    }
}

/// Determines the state of one sample returned for `rule`'s query.
///
/// Samples of the reverse expression are `ok`. `ALERTS` samples are
/// `pending` while the alert is pending, otherwise `warning` for
/// warning-severity alerts and `firing` for everything else.
pub fn classify(sample: &ProbeSample, rule: &AlertingRule) -> ProbeState {
    let state = if sample.metric_name() != Some(ALERTS_METRIC) {
        ProbeState::Ok
    } else if sample.label(ALERT_STATE_LABEL) == Some("pending") {
        ProbeState::Pending
    } else if sample.label(SEVERITY_LABEL) == Some("warning") {
        ProbeState::Warning
    } else {
        ProbeState::Firing
    };
    trace!(rule = %rule.name, state = %state, "Classified probe sample");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn rule() -> AlertingRule {
        AlertingRule {
            name: "HighCPU".into(),
            ..Default::default()
        }
    }

    fn sample(pairs: &[(&str, &str)]) -> ProbeSample {
        ProbeSample {
            labels: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            value: 1.0,
        }
    }

    #[test]
    fn test_reverse_expression_sample_is_ok() {
        let s = sample(&[("__name__", "up"), ("instance", "a")]);
        assert_eq!(classify(&s, &rule()), ProbeState::Ok);
        // Comparison results may have no metric name at all.
        let s = sample(&[("instance", "a"), ("severity", "warning")]);
        assert_eq!(classify(&s, &rule()), ProbeState::Ok);
    }

    #[test]
    fn test_alert_states() {
        let pending = sample(&[
            ("__name__", "ALERTS"),
            ("alertstate", "pending"),
            ("severity", "warning"),
        ]);
        assert_eq!(classify(&pending, &rule()), ProbeState::Pending);

        let warning = sample(&[
            ("__name__", "ALERTS"),
            ("alertstate", "firing"),
            ("severity", "warning"),
        ]);
        assert_eq!(classify(&warning, &rule()), ProbeState::Warning);

        let firing = sample(&[
            ("__name__", "ALERTS"),
            ("alertstate", "firing"),
            ("severity", "critical"),
        ]);
        assert_eq!(classify(&firing, &rule()), ProbeState::Firing);

        let bare = sample(&[("__name__", "ALERTS")]);
        assert_eq!(classify(&bare, &rule()), ProbeState::Firing);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let s = sample(&[("__name__", "ALERTS"), ("alertstate", "firing")]);
        let first = classify(&s, &rule());
        for _ in 0..10 {
            assert_eq!(classify(&s, &rule()), first);
        }
    }

    #[test]
    fn test_state_mapping_values() {
        let mapping = StateMapping::default();
        assert_eq!(mapping.value(ProbeState::Ok), 0.0);
        assert_eq!(mapping.value(ProbeState::Pending), 1.0);
        assert_eq!(mapping.value(ProbeState::Warning), 2.0);
        assert_eq!(mapping.value(ProbeState::Firing), 3.0);
    }
}
