//! CLI arguments and subcommands for script-status-exporter.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "script-status-exporter",
    about = "Prometheus exporter for script results and alert probe states",
    long_about = "Prometheus exporter for script results and alert probe states.\n\n\
                  Runs configured scripts on every scrape of /probe and exposes their output \
                  together with success, duration and exit code metrics. The /probes-status \
                  endpoint turns Prometheus alerting rules into per-instance probe_status gauges.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides `log_level` from the config file, default info)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Seconds subtracted from the scrape timeout sent by Prometheus
    #[arg(long)]
    pub timeout_offset: Option<f64>,

    /// Ignore the `params` query parameter and never pass extra arguments
    #[arg(long)]
    pub no_args: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a configured script once and print the resulting metrics
    Test {
        /// Script name as configured
        #[arg(short = 's', long)]
        script: String,

        /// Metric name prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Timeout in seconds (defaults to the script's max_timeout)
        #[arg(long)]
        timeout: Option<f64>,

        /// Extra arguments appended after the static ones
        args: Vec<String>,
    },

    /// List configured scripts
    Scripts {
        /// Show command line, environment and timeout settings
        #[arg(long)]
        verbose: bool,
    },
}
