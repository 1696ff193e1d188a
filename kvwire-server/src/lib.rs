//! # kvwire Emulated Server
//!
//! Purpose: Run a small in-memory server that speaks the same RESP2 wire
//! protocol as the real key-value store, so clients can be exercised end to
//! end without an external process.
//!
//! ## Usage
//!
//! - `TestServer::start()` binds an ephemeral TCP port and serves on a
//!   background thread until the handle is dropped.
//! - `TestServer::start_unix(path)` does the same on a unix domain socket.
//! - The `kvwire-server` binary serves a fixed address in the foreground.

pub mod db;
pub mod protocol;
pub mod server;

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::warn;

pub use db::Db;
pub use server::{handle_connection, serve_tcp, ServerState};

#[cfg(unix)]
pub use server::serve_unix;

enum StdListener {
    Tcp(std::net::TcpListener),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixListener),
}

/// Emulated server running on a background thread.
///
/// Dropping the handle stops the accept loop and closes every connection.
pub struct TestServer {
    addr: String,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Starts a server on `127.0.0.1` with an OS-assigned port.
    pub fn start() -> io::Result<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?.to_string();
        Self::spawn(StdListener::Tcp(listener), addr)
    }

    /// Starts a server on the unix domain socket at `path`.
    #[cfg(unix)]
    pub fn start_unix(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let listener = std::os::unix::net::UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        Self::spawn(StdListener::Unix(listener), path.display().to_string())
    }

    fn spawn(listener: StdListener, addr: String) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let state = Arc::new(ServerState::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let serve_state = state.clone();
        let thread = thread::Builder::new()
            .name("kvwire-test-server".to_string())
            .spawn(move || {
                let result = runtime.block_on(async move {
                    tokio::select! {
                        res = run(listener, serve_state) => res,
                        _ = shutdown_rx => Ok(()),
                    }
                });
                if let Err(err) = result {
                    warn!(error = %err, "test server stopped with error");
                }
            })?;

        Ok(TestServer {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Address to hand to a client (`host:port` or socket path).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The keyspace, for seeding or inspecting data directly.
    pub fn db(&self) -> &Db {
        &self.state.db
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn run(listener: StdListener, state: Arc<ServerState>) -> io::Result<()> {
    match listener {
        StdListener::Tcp(listener) => {
            serve_tcp(tokio::net::TcpListener::from_std(listener)?, state).await
        }
        #[cfg(unix)]
        StdListener::Unix(listener) => {
            serve_unix(tokio::net::UnixListener::from_std(listener)?, state).await
        }
    }
}
