//! HTTP listeners for plain and TLS serving.
//!
//! Both stop accepting connections once `shutdown` resolves and let
//! in-flight requests finish, so a scrape running a script is not cut off.

use anyhow::Context;
use axum::Router;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Upper bound on draining in-flight TLS connections after shutdown.
pub const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves `app` over plain HTTP until `shutdown` resolves.
pub async fn serve_plain<F>(listener: TcpListener, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(
        "script-status-exporter listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

/// Serves `app` over HTTPS until `shutdown` resolves.
pub async fn serve_tls<F>(
    addr: SocketAddr,
    app: Router,
    crt: &Path,
    key: &Path,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let tls = RustlsConfig::from_pem_file(crt, key)
        .await
        .with_context(|| format!("cannot load TLS files {} / {}", crt.display(), key.display()))?;

    let handle = Handle::new();
    let drain = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
    });

    info!("script-status-exporter listening on https://{}", addr);
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .context("HTTPS server failed")
}
