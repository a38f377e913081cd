// script-status-exporter - version 0.1.0
// Script and alert probe exporter with tracing logging
use anyhow::Context;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use tokio::{net::TcpListener, signal};
use tracing::{info, level_filters::LevelFilter};

use script_status_exporter::cli::{Args, Commands, LogLevel};
use script_status_exporter::commands;
use script_status_exporter::config::{resolve_config, DEFAULT_BIND_ADDR, DEFAULT_PORT};
use script_status_exporter::server::{serve_plain, serve_tls};
use script_status_exporter::{router, AppState};

/// Initializes tracing logging subsystem with configured log level
fn setup_logging(level: LogLevel) -> anyhow::Result<()> {
    let log_level = match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Logging initialized with level: {}", level.as_str());
    Ok(())
}

/// Resolves once SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = config.validate() {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        println!("{}", config.render(&args.config_format)?);
        return Ok(());
    }

    // CLI level beats the config file, so logging starts once both are known
    let config = resolve_config(&args)?;
    setup_logging(config.log_level())?;

    // Handle subcommands
    if let Some(command) = args.command {
        return match command {
            Commands::Test {
                script,
                prefix,
                timeout,
                args: extra,
            } => commands::command_test(&config, script, prefix, timeout, extra).await,
            Commands::Scripts { verbose } => commands::command_scripts(&config, verbose),
        };
    }

    // Validate config before starting exporter
    if let Err(e) = config.validate() {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    info!("Starting script-status-exporter");

    let bind_ip: IpAddr = config
        .bind
        .as_deref()
        .unwrap_or(DEFAULT_BIND_ADDR)
        .parse()
        .context("invalid bind address")?;
    let addr = SocketAddr::new(bind_ip, config.port.unwrap_or(DEFAULT_PORT));
    let tls = config.tls.clone();

    let state = AppState::from_config(config)?;
    info!("{} script(s) configured", state.config.scripts.len());
    let app = router(state);

    match (tls.enabled, tls.crt.as_deref(), tls.key.as_deref()) {
        (true, Some(crt), Some(key)) => serve_tls(addr, app, crt, key, shutdown_signal()).await?,
        _ => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("cannot bind {addr}"))?;
            serve_plain(listener, app, shutdown_signal()).await?
        }
    }

    info!("script-status-exporter stopped gracefully");
    Ok(())
}
