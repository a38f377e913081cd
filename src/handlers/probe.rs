//! Script probe endpoint handler.
//!
//! `/probe?script=<name>` runs the configured script and returns the
//! synthetic `script_*` metrics followed by the script's own output.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::config::Config;
use crate::exposition::{render_outcome, ExpositionRewriter};
use crate::runner::{run_script, ScriptInvocation};
use crate::state::SharedState;

/// Header Prometheus uses to announce its scrape timeout.
pub const TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Request errors reported to the scraper as 400.
#[derive(Debug)]
pub enum ProbeRequestError {
    MissingScript,
    UnknownScript(String),
    InvalidPrefix(String),
}

impl fmt::Display for ProbeRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingScript => write!(f, "Script parameter is missing"),
            Self::UnknownScript(name) => write!(f, "Script '{name}' not found"),
            Self::InvalidPrefix(prefix) => write!(f, "Invalid prefix '{prefix}'"),
        }
    }
}

impl std::error::Error for ProbeRequestError {}

impl IntoResponse for ProbeRequestError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{self}\n"),
        )
            .into_response()
    }
}

/// A parsed `/probe` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeRequest {
    pub script: String,
    /// Metric prefix including the trailing underscore, or empty.
    pub prefix: String,
    /// Values appended after the script's static arguments.
    pub extra_args: Vec<String>,
    /// Timeout requested by the caller, before the offset is applied.
    pub requested_timeout: Option<String>,
    pub ignore_output: bool,
}

impl ProbeRequest {
    /// Reads the request from query parameters and the timeout header.
    pub fn from_params(
        params: &HashMap<String, String>,
        header_timeout: Option<&str>,
        no_args: bool,
    ) -> Result<Self, ProbeRequestError> {
        let script = params
            .get("script")
            .filter(|s| !s.is_empty())
            .ok_or(ProbeRequestError::MissingScript)?
            .clone();

        let prefix = match params.get("prefix").filter(|p| !p.is_empty()) {
            Some(p) if p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
                format!("{p}_")
            }
            Some(p) => return Err(ProbeRequestError::InvalidPrefix(p.clone())),
            None => String::new(),
        };

        // `params` names other query parameters whose values become arguments.
        let extra_args = match params.get("params").filter(|p| !p.is_empty()) {
            Some(names) if !no_args => names
                .split(',')
                .map(|name| params.get(name).cloned().unwrap_or_default())
                .collect(),
            _ => Vec::new(),
        };

        let requested_timeout = params
            .get("timeout")
            .map(String::as_str)
            .or(header_timeout)
            .map(str::to_string);

        Ok(Self {
            script,
            prefix,
            extra_args,
            requested_timeout,
            ignore_output: params.get("output").map(String::as_str) == Some("ignore"),
        })
    }
}

/// Effective timeout: caller timeout minus `offset`, never above `max`.
///
/// An absent, unparsable or non-positive caller timeout falls back to `max`.
pub fn resolve_timeout(
    requested: Option<&str>,
    offset: Duration,
    max: Option<Duration>,
) -> Option<Duration> {
    let adjusted = requested
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| secs - offset.as_secs_f64())
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

    match (adjusted, max) {
        (Some(timeout), Some(max)) => Some(timeout.min(max)),
        (Some(timeout), None) => Some(timeout),
        (None, max) => max,
    }
}

/// Runs the requested script and renders the response body.
pub async fn execute(config: &Config, request: &ProbeRequest) -> Result<String, ProbeRequestError> {
    let name = request.script.as_str();
    let script = config.script(name).ok_or_else(|| {
        error!("Script '{}' not found", name);
        ProbeRequestError::UnknownScript(name.to_string())
    })?;
    let (program, mut args) = script
        .run_args()
        .ok_or_else(|| ProbeRequestError::UnknownScript(name.to_string()))?;
    let rewriter = ExpositionRewriter::new(&request.prefix)
        .map_err(|_| ProbeRequestError::InvalidPrefix(request.prefix.clone()))?;

    args.extend(request.extra_args.iter().cloned());

    let invocation = ScriptInvocation {
        name: name.to_string(),
        program,
        args,
        env: script.env.clone(),
        timeout: resolve_timeout(
            request.requested_timeout.as_deref(),
            config.timeout_offset(),
            script.max_timeout(),
        ),
        enforced: script.timeout.enforced,
    };

    let result = run_script(&invocation).await;
    if let Some(err) = &result.error {
        error!(script = %name, "Run script failed: {}", err);
    }
    debug!(
        script = %name,
        exit_code = result.exit_code,
        "Script finished in {:.3}s",
        result.elapsed.as_secs_f64()
    );

    let mut body = render_outcome(name, result.success(), result.elapsed, result.exit_code);
    let skip_output =
        request.ignore_output || (!result.success() && script.ignore_output_on_fail);
    if !skip_output {
        body.push_str(&rewriter.rewrite(&result.stdout));
    }
    Ok(body)
}

/// Handler for the /probe endpoint.
#[instrument(skip(state, headers))]
pub async fn probe_handler(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ProbeRequestError> {
    debug!("Processing /probe request");

    let header_timeout = headers.get(TIMEOUT_HEADER).and_then(|v| v.to_str().ok());
    let request = ProbeRequest::from_params(&params, header_timeout, state.config.no_args())
        .inspect_err(|e| error!("{}", e))?;
    let body = execute(&state.config, &request).await?;

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE_TEXT)], body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScriptConfig, TimeoutConfig};

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config_with(script: ScriptConfig) -> Config {
        Config {
            scripts: vec![script],
            ..Default::default()
        }
    }

    fn shell_script(name: &str, body: &str) -> ScriptConfig {
        ScriptConfig {
            name: name.into(),
            command: Some("/bin/sh".into()),
            args: vec!["-c".into(), body.into(), name.into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_script() {
        let err = ProbeRequest::from_params(&params(&[("prefix", "x")]), None, false).unwrap_err();
        assert!(matches!(err, ProbeRequestError::MissingScript));
        let err = ProbeRequest::from_params(&params(&[("script", "")]), None, false).unwrap_err();
        assert!(matches!(err, ProbeRequestError::MissingScript));
    }

    #[test]
    fn test_dynamic_params_in_order() {
        let p = params(&[
            ("script", "foo"),
            ("params", "bar,baz,missing"),
            ("bar", "5"),
            ("baz", "x y"),
        ]);
        let req = ProbeRequest::from_params(&p, None, false).unwrap();
        assert_eq!(req.extra_args, vec!["5", "x y", ""]);
        assert_eq!(req.prefix, "");

        let req = ProbeRequest::from_params(&p, None, true).unwrap();
        assert!(req.extra_args.is_empty());
    }

    #[test]
    fn test_prefix_and_output() {
        let p = params(&[("script", "foo"), ("prefix", "ns"), ("output", "ignore")]);
        let req = ProbeRequest::from_params(&p, None, false).unwrap();
        assert_eq!(req.prefix, "ns_");
        assert!(req.ignore_output);

        let p = params(&[("script", "foo"), ("output", "keep")]);
        assert!(!ProbeRequest::from_params(&p, None, false).unwrap().ignore_output);
    }

    #[test]
    fn test_prefix_must_be_a_metric_name_part() {
        for bad in ["n\u{e9}", "a b", "ns{x}", "a-b"] {
            let p = params(&[("script", "foo"), ("prefix", bad)]);
            let err = ProbeRequest::from_params(&p, None, false).unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid prefix '{bad}'"));
        }
    }

    #[test]
    fn test_timeout_source_precedence() {
        let p = params(&[("script", "foo"), ("timeout", "3")]);
        let req = ProbeRequest::from_params(&p, Some("10"), false).unwrap();
        assert_eq!(req.requested_timeout.as_deref(), Some("3"));

        let p = params(&[("script", "foo")]);
        let req = ProbeRequest::from_params(&p, Some("10"), false).unwrap();
        assert_eq!(req.requested_timeout.as_deref(), Some("10"));
    }

    #[test]
    fn test_resolve_timeout() {
        let offset = Duration::from_millis(500);
        let max = Some(Duration::from_secs(5));

        assert_eq!(resolve_timeout(Some("3"), offset, max), Some(Duration::from_millis(2500)));
        // Never above the configured maximum.
        assert_eq!(resolve_timeout(Some("30"), offset, max), max);
        assert_eq!(resolve_timeout(None, offset, max), max);
        assert_eq!(resolve_timeout(Some("abc"), offset, max), max);
        assert_eq!(resolve_timeout(Some("0.2"), offset, max), max);
        assert_eq!(resolve_timeout(Some("10"), offset, None), Some(Duration::from_millis(9500)));
        assert_eq!(resolve_timeout(None, offset, None), None);
    }

    #[tokio::test]
    async fn test_static_and_dynamic_args() {
        let script = ScriptConfig {
            name: "foo".into(),
            command: Some("/bin/sh".into()),
            args: vec![
                "-c".into(),
                r#"echo "first_arg{v=\"$1\"} 1"; echo "second_arg $2"; echo "arg_count $#""#.into(),
                "foo".into(),
                "-x".into(),
            ],
            ..Default::default()
        };
        let config = config_with(script);
        let p = params(&[("script", "foo"), ("params", "bar"), ("bar", "5")]);
        let req = ProbeRequest::from_params(&p, None, false).unwrap();

        let body = execute(&config, &req).await.unwrap();
        assert!(
            body.ends_with("first_arg{v=\"-x\"} 1\nsecond_arg 5\narg_count 2\n"),
            "{body}"
        );
    }

    #[tokio::test]
    async fn test_unknown_script() {
        let config = config_with(shell_script("known", "true"));
        let req = ProbeRequest {
            script: "other".into(),
            ..Default::default()
        };
        let err = execute(&config, &req).await.unwrap_err();
        assert_eq!(err.to_string(), "Script 'other' not found");
    }

    #[tokio::test]
    async fn test_output_is_rewritten() {
        let config = config_with(shell_script("m", "echo '# TYPE foo gauge'; echo 'foo 1,5'; echo junk"));
        let req = ProbeRequest {
            script: "m".into(),
            prefix: "ns_".into(),
            ..Default::default()
        };
        let body = execute(&config, &req).await.unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[2], "script_success{script=\"m\"} 1");
        assert_eq!(lines[9], "# TYPE ns_foo gauge");
        assert_eq!(lines[10], "ns_foo 1.5");
    }

    #[tokio::test]
    async fn test_ignore_output_yields_nine_lines() {
        let config = config_with(shell_script("m", "echo 'foo 1'; echo 'bar 2'"));
        let req = ProbeRequest {
            script: "m".into(),
            ignore_output: true,
            ..Default::default()
        };
        let body = execute(&config, &req).await.unwrap();
        assert_eq!(body.lines().count(), 9);
    }

    #[tokio::test]
    async fn test_failure_reports_exit_code() {
        let config = config_with(shell_script("f", "echo 'foo 1'; exit 2"));
        let req = ProbeRequest {
            script: "f".into(),
            ..Default::default()
        };
        let body = execute(&config, &req).await.unwrap();
        assert!(body.contains("script_success{script=\"f\"} 0\n"));
        assert!(body.contains("script_exit_code{script=\"f\"} 2\n"));
        assert!(body.ends_with("foo 1\n"));
    }

    #[tokio::test]
    async fn test_ignore_output_on_fail() {
        let mut script = shell_script("f", "echo 'foo 1'; exit 1");
        script.ignore_output_on_fail = true;
        let config = config_with(script);
        let req = ProbeRequest {
            script: "f".into(),
            ..Default::default()
        };
        let body = execute(&config, &req).await.unwrap();
        assert_eq!(body.lines().count(), 9);
        assert!(!body.contains("foo 1"));
    }

    #[tokio::test]
    async fn test_enforced_timeout() {
        let mut script = shell_script("slow", "sleep 5; echo 'late 1'");
        script.timeout = TimeoutConfig {
            max_timeout: Some(0.3),
            enforced: true,
        };
        let config = config_with(script);
        let req = ProbeRequest {
            script: "slow".into(),
            ..Default::default()
        };
        let body = execute(&config, &req).await.unwrap();
        assert!(body.contains("script_success{script=\"slow\"} 0\n"));
        assert!(body.contains("script_exit_code{script=\"slow\"} -1\n"));
        assert!(!body.contains("late"));
    }
}
