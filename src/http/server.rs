//! HTTP server setup for entry points.
//!
//! # Responsibilities
//! - Create the Axum app dispatching every request to the entry point's live handler
//! - Wire up request ID and tracing layers
//! - Serve plain HTTP (axum) or TLS (axum-server + rustls) with graceful shutdown
//!
//! # Design Decisions
//! - The app is built once per entry point; reloads swap the handler behind it
//! - HTTP/1.1 and HTTP/2 are both served (ALPN on TLS entry points)

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::http::request::MakeRequestUuidV4;
use crate::server::entry_point::EntryPoint;

/// How long TLS connections may drain after a stop request.
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Build the Axum app for an entry point.
pub fn build_app(entry_point: &EntryPoint) -> Router {
    Router::new()
        .fallback_service(entry_point.service())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
}

/// Serve plain HTTP until `stop` fires.
pub async fn serve_plain(
    listener: TcpListener,
    app: Router,
    mut stop: broadcast::Receiver<()>,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = stop.recv().await;
    })
    .await?;

    tracing::info!(address = %addr, "HTTP server stopped");
    Ok(())
}

/// Serve HTTPS until `stop` fires.
pub async fn serve_tls(
    listener: std::net::TcpListener,
    app: Router,
    tls: RustlsConfig,
    mut stop: broadcast::Receiver<()>,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTPS server starting");

    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        let _ = stop.recv().await;
        shutdown.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
    });

    axum_server::from_tcp_rustls(listener, tls)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    tracing::info!(address = %addr, "HTTPS server stopped");
    Ok(())
}
