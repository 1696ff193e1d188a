//! # kvwire Client
//!
//! Purpose: Provide a lightweight, synchronous client for the RESP2
//! key-value protocol with a fixed-size connection pool and per-call
//! deadlines.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections to avoid repeated connects.
//! 2. **Single Entry Point**: `Client::call` runs any command; typed helpers
//!    live in collaborator crates.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.
//!
//! ## Layering
//!
//! ```text
//! Client ── ConnectionPool ── Connection ── resp (encode / decode)
//!    └── Stats (optional sink)     └── Dialer / Link (transport seam)
//! ```

mod client;
mod config;
mod connection;
mod error;
mod pool;
mod resp;
mod stats;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, Transport, DEFAULT_POOL_SIZE, DEFAULT_TIMEOUT};
pub use connection::{Connection, Dialer, Link, NetDialer, Socket};
pub use error::{ClientError, ClientResult, ConfigError, DecodeError, ReplyError};
pub use pool::{ConnectionPool, PooledSlot};
pub use resp::{encode_command, read_reply, Arg, Reply, MAX_BULK_LEN, MAX_LINE_LEN};
pub use stats::{Counter, LatencyHistogram, LatencySnapshot, Metrics, MetricsSnapshot, Stats, Timing};
