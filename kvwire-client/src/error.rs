//! # Error Taxonomy
//!
//! Purpose: Give every failure a `Call` can produce its own variant so callers
//! can tell configuration, dial, deadline, transport, protocol and server
//! failures apart.
//!
//! ## Design Principles
//! 1. **One Error Per Call**: `ClientError` is the only error `Client::call` returns.
//! 2. **Cloneable Reply Errors**: `ReplyError` lives inside decoded replies, so it
//!    carries bytes instead of `io::Error`.
//! 3. **Policy Next To Data**: the fatal-close check is a method on the error.

use std::io;

use bytes::Bytes;
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by `Client::call` and the lower layers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Pool size is zero; every call fails the same way and no I/O happens.
    #[error("client pool size not specified")]
    PoolNotConfigured,
    /// Opening the stream failed.
    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// The per-call deadline could not be applied to the socket.
    #[error("set deadline: {0}")]
    Deadline(#[source] io::Error),
    /// Writing the encoded command failed.
    #[error("write: {0}")]
    Write(#[source] io::Error),
    /// Reading the reply failed at the transport level.
    #[error("read: {0}")]
    Read(#[source] io::Error),
    /// The server answered with an error reply (or a nil multi-bulk).
    #[error(transparent)]
    Reply(#[from] ReplyError),
    /// The peer sent bytes that are not valid protocol framing.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Returns true when the failure came from an expired call deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::Dial { source, .. } => is_timeout_kind(source),
            ClientError::Write(err) | ClientError::Read(err) => is_timeout_kind(err),
            _ => false,
        }
    }

    /// Decides whether the connection that produced this error must be closed.
    ///
    /// Only transport errors meaning the peer dropped the link qualify; every
    /// other failure (timeouts, server errors, protocol faults) leaves the
    /// connection in the pool.
    pub fn should_close(&self) -> bool {
        match self {
            ClientError::Write(err) | ClientError::Read(err) => is_broken_pipe(err),
            _ => false,
        }
    }
}

/// Error carried by a decoded reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// `-ERR ...` style reply; the message excludes the marker byte.
    #[error("server error: {}", String::from_utf8_lossy(.0))]
    Server(Bytes),
    /// A multi-bulk reply with count -1.
    #[error("-MULTI-BULK: nil reply")]
    NilReply,
}

/// Stream-level decode failure: the reply could not be read at all.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<DecodeError> for ClientError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Io(err) => ClientError::Read(err),
            DecodeError::Protocol(message) => ClientError::Protocol(message),
        }
    }
}

/// Errors raised while loading a `ClientConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: String, value: String },
    #[error("unknown transport {0:?}, expected \"tcp\" or \"unix\"")]
    UnknownTransport(String),
}

fn is_timeout_kind(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

// Error kinds are the primary signal; the message suffix catches platforms
// that report EPIPE through a generic kind.
fn is_broken_pipe(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => true,
        _ => err.to_string().ends_with("broken pipe"),
    }
}
