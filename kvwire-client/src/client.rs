//! # Synchronous Client API
//!
//! Purpose: Expose one blocking `call` entry point that runs any command
//! against the server over a pooled connection.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, deadlines and protocol details.
//! 2. **Borrow-Friendly API**: Arguments are borrowed `Arg`s, not owned buffers.
//! 3. **No Retries**: Every failure returns to the caller; the only recovery
//!    is discarding a dead connection so the next call redials.
//! 4. **Guaranteed Release**: The slot guard returns capacity on every path.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::connection::{Connection, Dialer, NetDialer};
use crate::error::{ClientError, ClientResult};
use crate::pool::{ConnectionPool, PooledSlot};
use crate::resp::{Arg, Reply};
use crate::stats::{Counter, Stats, Timing};

/// Builder for a `Client` with optional instrumentation or a custom dialer.
pub struct ClientBuilder {
    config: ClientConfig,
    dialer: Option<Arc<dyn Dialer>>,
    stats: Option<Arc<dyn Stats>>,
}

impl ClientBuilder {
    /// Reports call counters and latencies to `stats`.
    pub fn stats(mut self, stats: Arc<dyn Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Opens connections through `dialer` instead of real sockets.
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn build(self) -> Client {
        let dialer: Arc<dyn Dialer> = match self.dialer {
            Some(dialer) => dialer,
            None => Arc::new(NetDialer::new(self.config.transport)),
        };
        Client {
            pool: ConnectionPool::new(self.config.pool_size),
            config: self.config,
            dialer,
            stats: self.stats,
        }
    }
}

/// Pooled client, safe to share between threads.
///
/// Configuration is fixed at construction. The pool materializes on the first
/// call; its connections live as long as the client.
pub struct Client {
    config: ClientConfig,
    pool: ConnectionPool,
    dialer: Arc<dyn Dialer>,
    stats: Option<Arc<dyn Stats>>,
}

impl Client {
    /// Creates a client that dials real sockets and reports no stats.
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            dialer: None,
            stats: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs one command and returns its reply.
    ///
    /// **Input**: the command name followed by its arguments.
    /// **Output**: the decoded reply; any `Err` means no usable reply exists.
    ///
    /// **Logic**:
    /// 1. Acquire a slot (blocks while every slot is checked out).
    /// 2. Dial when the slot is empty.
    /// 3. Set the deadline `start + timeout` on the socket.
    /// 4. Write the command, then read one reply.
    /// 5. On failure, close the connection when the error says the peer is gone.
    /// 6. Return the slot (live or empty) to the pool.
    pub fn call(&self, args: &[Arg<'_>]) -> ClientResult<Reply> {
        let start = Instant::now();
        let acquired = self.pool.acquire();
        self.record(Timing::Acquire, start);
        let mut slot = match acquired {
            Ok(slot) => slot,
            Err(err) => {
                self.inc(Counter::AcquireError);
                return Err(err);
            }
        };

        let result = self.exchange(&mut slot, start, args);
        if let Err(err) = &result {
            if self.should_close(err) {
                self.inc(Counter::FatalClose);
                warn!(addr = %self.config.addr, error = %err, "closing connection after fatal error");
                slot.discard();
            }
        }
        slot.release();
        self.record(Timing::Release, start);

        match &result {
            Ok(_) => trace!(command = %CommandName(args), "call ok"),
            Err(err) => trace!(command = %CommandName(args), error = %err, "call failed"),
        }
        result
    }

    fn exchange(&self, slot: &mut PooledSlot<'_>, start: Instant, args: &[Arg<'_>]) -> ClientResult<Reply> {
        let conn = slot.get_or_dial(|| self.dial())?;

        if let Err(err) = conn.sock().set_deadline(start + self.config.timeout) {
            self.inc(Counter::DeadlineError);
            warn!(addr = %self.config.addr, error = %err, "failed to set connection deadline");
            slot.discard();
            return Err(ClientError::Deadline(err));
        }

        let written = conn.write(args);
        self.record(Timing::Write, start);
        if let Err(err) = written {
            self.inc(Counter::WriteError);
            return Err(err);
        }

        let reply = conn.read();
        self.record(Timing::Read, start);
        if reply.is_err() {
            self.inc(Counter::ReadError);
        }
        reply
    }

    fn dial(&self) -> ClientResult<Connection> {
        self.inc(Counter::NewConnection);
        debug!(addr = %self.config.addr, transport = %self.config.transport, "dialing new connection");
        Connection::dial(self.dialer.as_ref(), &self.config.addr, self.config.timeout).map_err(|err| {
            self.inc(Counter::AcquireError);
            err
        })
    }

    fn should_close(&self, err: &ClientError) -> bool {
        err.should_close() || (self.config.discard_on_timeout && err.is_timeout())
    }

    fn inc(&self, counter: Counter) {
        if let Some(stats) = &self.stats {
            stats.inc(counter);
        }
    }

    fn record(&self, timing: Timing, start: Instant) {
        if let Some(stats) = &self.stats {
            stats.record(timing, start.elapsed());
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("pool_size", &self.pool.size())
            .field("stats", &self.stats.is_some())
            .finish()
    }
}

/// Logs only the command name, never argument payloads.
struct CommandName<'a, 'b>(&'a [Arg<'b>]);

impl fmt::Display for CommandName<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.first() {
            Some(Arg::Str(name)) => f.write_str(name),
            Some(Arg::Bytes(name)) => f.write_str(&String::from_utf8_lossy(name)),
            Some(Arg::Int(value)) => write!(f, "{}", value),
            Some(Arg::Uint(value)) => write!(f, "{}", value),
            None => f.write_str("<empty>"),
        }
    }
}
