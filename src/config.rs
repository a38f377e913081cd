//! Configuration management for script-status-exporter.
//!
//! This module loads the configuration file (YAML/JSON/TOML), merges CLI
//! overrides on top of it and validates the effective result. Precedence is
//! always: CLI (if provided) > config file > built-in default.

use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use clap::ValueEnum;

use crate::cli::{Args, ConfigFormat, LogLevel};

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9469;
pub const DEFAULT_TIMEOUT_OFFSET: f64 = 0.5;
const DEFAULT_RULES_TIMEOUT: f64 = 10.0;
const DEFAULT_QUERY_TIMEOUT: f64 = 5.0;

/// Locations searched when no config file is given on the command line.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "/etc/script-status-exporter/config.yaml",
    "/etc/script-status-exporter/config.yml",
    "./script-status-exporter.yaml",
    "./script-status-exporter.yml",
    "./script-status-exporter.json",
];

/// Errors raised while loading, rendering or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("failed to render configuration: {0}")]
    Render(String),
    #[error("{0}")]
    Invalid(String),
}

/// Effective exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Logging
    pub log_level: Option<String>,

    /// Seconds subtracted from the scraper-supplied timeout.
    #[serde(alias = "timeout-offset", alias = "timeoutOffset")]
    pub timeout_offset: Option<f64>,
    /// If true, the `params` query parameter is ignored.
    #[serde(alias = "noargs", alias = "no-args")]
    pub no_args: Option<bool>,

    pub tls: TlsConfig,
    pub scripts: Vec<ScriptConfig>,
    pub prometheus: Option<PrometheusConfig>,
    #[serde(alias = "probeStates", alias = "probe-states")]
    pub probe_states: StateMapping,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            log_level: Some("info".into()),
            timeout_offset: Some(DEFAULT_TIMEOUT_OFFSET),
            no_args: Some(false),
            tls: TlsConfig::default(),
            scripts: Vec::new(),
            prometheus: None,
            probe_states: StateMapping::default(),
        }
    }
}

/// TLS settings for the HTTP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crt: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
}

/// A script that can be requested through `/probe?script=<name>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub name: String,
    /// Whitespace separated command line: program followed by static args.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Program to run; takes precedence over `script` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, alias = "ignoreOutputOnFail")]
    pub ignore_output_on_fail: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

impl ScriptConfig {
    /// Returns the program and its static arguments in invocation order.
    pub fn run_args(&self) -> Option<(String, Vec<String>)> {
        if let Some(command) = self
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            return Some((command.to_string(), self.args.clone()));
        }

        let mut parts = self.script.as_deref()?.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        let mut args: Vec<String> = parts.collect();
        args.extend(self.args.iter().cloned());
        Some((program, args))
    }

    /// Upper bound for a single run of this script, if configured.
    pub fn max_timeout(&self) -> Option<Duration> {
        self.timeout
            .max_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|d| !d.is_zero())
    }
}

/// Per-script timeout settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(
        default,
        alias = "maxTimeout",
        alias = "max-timeout",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_timeout: Option<f64>,
    /// Kill the process when the timeout is exceeded.
    #[serde(default)]
    pub enforced: bool,
}

/// Location and behaviour of the Prometheus server used for probe status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    #[serde(alias = "externalURL", skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    /// Sample labels copied into every `probe_status` line.
    #[serde(alias = "keepLabels")]
    pub keep_labels: Vec<String>,
    pub rules_timeout: f64,
    pub query_timeout: f64,
    #[serde(alias = "externalLabels")]
    pub external_labels: BTreeMap<String, String>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            scheme: "http".into(),
            host: "localhost".into(),
            port: 9090,
            path: String::new(),
            external_url: None,
            keep_labels: Vec::new(),
            rules_timeout: DEFAULT_RULES_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            external_labels: BTreeMap::new(),
        }
    }
}

impl PrometheusConfig {
    /// Base URL of the Prometheus HTTP API, without trailing slash.
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme,
            self.host,
            self.port,
            self.path.trim_end_matches('/')
        )
    }

    /// URL exposed to templates as `$externalURL`.
    pub fn external_url(&self) -> String {
        self.external_url.clone().unwrap_or_else(|| self.url())
    }

    pub fn rules_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.rules_timeout)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_RULES_TIMEOUT))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.query_timeout)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_QUERY_TIMEOUT))
    }
}

/// Numeric value exported for each probe state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMapping {
    pub ok: f64,
    pub pending: f64,
    pub warning: f64,
    pub firing: f64,
}

impl Default for StateMapping {
    fn default() -> Self {
        Self {
            ok: 0.0,
            pending: 1.0,
            warning: 2.0,
            firing: 3.0,
        }
    }
}

impl Config {
    /// Looks up a script by name.
    pub fn script(&self, name: &str) -> Option<&ScriptConfig> {
        self.scripts.iter().find(|s| s.name == name)
    }

    /// Configured log level; unknown names fall back to info.
    pub fn log_level(&self) -> LogLevel {
        self.log_level
            .as_deref()
            .and_then(|level| LogLevel::from_str(level, true).ok())
            .unwrap_or(LogLevel::Info)
    }

    pub fn no_args(&self) -> bool {
        self.no_args.unwrap_or(false)
    }

    pub fn timeout_offset(&self) -> Duration {
        self.timeout_offset
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_OFFSET))
    }

    /// Validate effective config (used by --check-config and at startup)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scripts.is_empty() && self.prometheus.is_none() {
            return Err(ConfigError::Invalid(
                "no scripts configured and no prometheus section defined".into(),
            ));
        }

        let mut seen = HashSet::new();
        for script in &self.scripts {
            if script.name.trim().is_empty() {
                return Err(ConfigError::Invalid("script with empty name".into()));
            }
            if !seen.insert(script.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate script name '{}'",
                    script.name
                )));
            }
            if script.run_args().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "script '{}' has neither 'script' nor 'command' set",
                    script.name
                )));
            }
            if let Some(max) = script.timeout.max_timeout {
                if !(max > 0.0 && max.is_finite()) {
                    return Err(ConfigError::Invalid(format!(
                        "script '{}': max_timeout must be a positive number of seconds",
                        script.name
                    )));
                }
            }
        }

        if let Some(level) = self.log_level.as_deref() {
            if LogLevel::from_str(level, true).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "Invalid log_level '{}', expected off, error, warn, info, debug or trace",
                    level
                )));
            }
        }

        if let Some(offset) = self.timeout_offset {
            if !(offset >= 0.0 && offset.is_finite()) {
                return Err(ConfigError::Invalid(
                    "timeout_offset must not be negative".into(),
                ));
            }
        }

        if self.tls.enabled && (self.tls.crt.is_none() || self.tls.key.is_none()) {
            return Err(ConfigError::Invalid(
                "tls is enabled, but crt or key is missing".into(),
            ));
        }

        if let Some(prom) = &self.prometheus {
            match prom.scheme.as_str() {
                "http" | "https" => {}
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "Invalid prometheus scheme '{}', expected 'http' or 'https'",
                        other
                    )));
                }
            }
            if prom.host.trim().is_empty() {
                return Err(ConfigError::Invalid("prometheus host is empty".into()));
            }
            for (key, secs) in [
                ("rules_timeout", prom.rules_timeout),
                ("query_timeout", prom.query_timeout),
            ] {
                if !(secs > 0.0 && secs.is_finite()) {
                    return Err(ConfigError::Invalid(format!(
                        "prometheus {key} must be a positive number of seconds"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Serializes the configuration in the requested format.
    pub fn render(&self, format: &ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))
            }
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))
            }
            ConfigFormat::Yaml => {
                serde_yaml::to_string(self).map_err(|e| ConfigError::Render(e.to_string()))
            }
        }
    }
}

/// Resolves configuration from CLI args, config file, and defaults.
pub fn resolve_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(level) = args.log_level {
        config.log_level = Some(level.as_str().to_string());
    }
    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if let Some(offset) = args.timeout_offset {
        config.timeout_offset = Some(offset);
    }
    if args.no_args {
        config.no_args = Some(true);
    }

    Ok(config)
}

/// Loads the config file, falling back to the default locations.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            Some(p) => PathBuf::from(p),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config = parse_config(&path, &content)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses configuration content, picking the format from the file extension.
pub fn parse_config(path: &Path, content: &str) -> Result<Config, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
        Some("toml") => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
        // Default to YAML
        _ => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string())),
    }
}
