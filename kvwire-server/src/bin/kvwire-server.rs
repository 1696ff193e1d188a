//! # Emulated Server Binary
//!
//! Serves the in-memory keyspace on one address.
//!
//! Usage: `kvwire-server [ADDR]` where `ADDR` is `host:port` (default
//! `127.0.0.1:6379`) or `unix:/path/to/socket`. Log verbosity follows
//! `RUST_LOG`.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use kvwire_server::{serve_tcp, ServerState};

const DEFAULT_ADDR: &str = "127.0.0.1:6379";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let state = Arc::new(ServerState::new());

    if let Some(path) = addr.strip_prefix("unix:") {
        return serve_unix_path(path, state).await;
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    serve_tcp(listener, state).await.context("accept loop failed")
}

#[cfg(unix)]
async fn serve_unix_path(path: &str, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = tokio::net::UnixListener::bind(path)
        .with_context(|| format!("failed to bind unix socket {}", path))?;
    kvwire_server::serve_unix(listener, state)
        .await
        .context("accept loop failed")
}

#[cfg(not(unix))]
async fn serve_unix_path(_path: &str, _state: Arc<ServerState>) -> anyhow::Result<()> {
    anyhow::bail!("unix domain sockets are not available on this platform")
}
