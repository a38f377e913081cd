//! Prometheus text exposition helpers.
//!
//! This module rewrites raw script output into well-formed, optionally
//! prefixed exposition lines and renders the synthetic `script_*` outcome
//! metrics that accompany every `/probe` response.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::time::Duration;

/// Namespace of the synthetic outcome metrics.
pub const NAMESPACE: &str = "script";

static COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(# *(?:TYPE|HELP) +)").expect("valid comment regex"));

/// Line-by-line rewriter for one prefix.
///
/// Sample lines must end up as `<prefix>name{labels} value` where the value
/// only contains digits and dots; anything else is dropped silently. Names
/// and separators are ASCII only, as the Prometheus text parser expects.
#[derive(Debug, Clone)]
pub struct ExpositionRewriter {
    prefix: String,
    token: Regex,
    sample: Regex,
}

impl ExpositionRewriter {
    /// Builds a rewriter for `prefix`, which is used verbatim (include the
    /// trailing underscore if one is wanted).
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        let escaped = regex::escape(prefix);
        Ok(Self {
            prefix: prefix.to_string(),
            token: Regex::new(&format!(r"^{escaped}[a-zA-Z0-9_]+(?:\{{.*\}})?[ \t]+"))?,
            sample: Regex::new(&format!(
                r"^{escaped}[a-zA-Z0-9_]+(?:\{{.*\}})?[ \t]+[0-9.]+$"
            ))?,
        })
    }

    /// Rewrites raw output; every emitted line is newline-terminated.
    pub fn rewrite(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len() + raw.len() / 8);

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('#') {
                if self.prefix.is_empty() {
                    out.push_str(line);
                } else {
                    let rewritten = COMMENT_RE
                        .replace(line, |caps: &Captures| format!("{}{}", &caps[1], self.prefix));
                    out.push_str(&rewritten);
                }
                out.push('\n');
                continue;
            }

            if let Some(sample) = self.rewrite_sample(line) {
                out.push_str(&sample);
                out.push('\n');
            }
        }

        out
    }

    fn rewrite_sample(&self, line: &str) -> Option<String> {
        let metric = format!("{}{}", self.prefix, line);
        let token = self.token.find(&metric)?;
        let value = metric[token.end()..].replace(',', ".");
        let candidate = format!("{}{}", token.as_str(), value);
        self.sample.is_match(&candidate).then_some(candidate)
    }
}

/// Renders the HELP/TYPE/value triples for success, duration and exit code.
pub fn render_outcome(script: &str, success: bool, duration: Duration, exit_code: i32) -> String {
    let label = format!("{{script=\"{}\"}}", escape_label_value(script));
    let mut out = String::with_capacity(512);

    writeln!(
        out,
        "# HELP {NAMESPACE}_success Script exit status (0 = error, 1 = success)."
    )
    .ok();
    writeln!(out, "# TYPE {NAMESPACE}_success gauge").ok();
    writeln!(out, "{NAMESPACE}_success{label} {}", u8::from(success)).ok();

    writeln!(
        out,
        "# HELP {NAMESPACE}_duration_seconds Script execution time, in seconds."
    )
    .ok();
    writeln!(out, "# TYPE {NAMESPACE}_duration_seconds gauge").ok();
    writeln!(
        out,
        "{NAMESPACE}_duration_seconds{label} {:.6}",
        duration.as_secs_f64()
    )
    .ok();

    writeln!(out, "# HELP {NAMESPACE}_exit_code The exit code of the script.").ok();
    writeln!(out, "# TYPE {NAMESPACE}_exit_code gauge").ok();
    writeln!(out, "{NAMESPACE}_exit_code{label} {exit_code}").ok();

    out
}

/// Escapes a label value for the text exposition format.
pub fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Formats a label set as `{a="1",b="2"}`; an empty set renders as nothing.
pub fn format_labels(labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(name, value)| format!("{name}=\"{}\"", escape_label_value(value)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}
