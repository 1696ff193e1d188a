//! # Server
//!
//! Accept RESP2 connections over TCP or unix domain sockets, parse commands,
//! and dispatch them to the in-memory keyspace.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::db::Db;
use crate::protocol::{
    resp_bulk, resp_error, resp_integer, resp_null, resp_simple, RespError, RespParser,
};

/// State shared by every connection of one server.
#[derive(Debug, Default)]
pub struct ServerState {
    pub db: Db,
    connections: AtomicUsize,
}

impl ServerState {
    pub fn new() -> Self {
        ServerState::default()
    }

    /// Total connections accepted since start.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Accept loop for TCP listeners.
pub async fn serve_tcp(listener: TcpListener, state: Arc<ServerState>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        state.connections.fetch_add(1, Ordering::Relaxed);
        debug!(%peer, "accepted connection");
        spawn_connection(stream, state.clone());
    }
}

/// Accept loop for unix domain socket listeners.
#[cfg(unix)]
pub async fn serve_unix(listener: tokio::net::UnixListener, state: Arc<ServerState>) -> io::Result<()> {
    info!(addr = ?listener.local_addr()?, "listening");
    loop {
        let (stream, _) = listener.accept().await?;
        state.connections.fetch_add(1, Ordering::Relaxed);
        debug!("accepted unix connection");
        spawn_connection(stream, state.clone());
    }
}

fn spawn_connection<S>(stream: S, state: Arc<ServerState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, state).await {
            debug!(error = %err, "connection closed with error");
        }
    });
}

/// Handles a single client connection until EOF or a protocol error.
pub async fn handle_connection<S>(mut stream: S, state: Arc<ServerState>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    let response = dispatch_command(&args, &state.db).await;
                    stream.write_all(&response).await?;
                }
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    stream.write_all(&resp_error("Protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

async fn dispatch_command(args: &[Vec<u8>], db: &Db) -> Vec<u8> {
    if args.is_empty() {
        return resp_error("empty command");
    }

    let cmd = args[0].to_ascii_uppercase();
    match cmd.as_slice() {
        b"PING" => handle_ping(args),
        b"ECHO" => handle_echo(args),
        b"GET" => handle_get(args, db),
        b"MGET" => handle_mget(args, db),
        b"SET" => handle_set(args, db),
        b"DEL" => handle_del(args, db),
        b"EXISTS" => handle_exists(args, db),
        b"DEBUG" => handle_debug(args).await,
        _ => resp_error(&format!(
            "unknown command '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    }
}

fn handle_ping(args: &[Vec<u8>]) -> Vec<u8> {
    match args.len() {
        1 => resp_simple("PONG"),
        2 => resp_bulk(&args[1]),
        _ => wrong_arity("ping"),
    }
}

fn handle_echo(args: &[Vec<u8>]) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("echo");
    }
    resp_bulk(&args[1])
}

fn handle_get(args: &[Vec<u8>], db: &Db) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("get");
    }
    match db.get(&args[1]) {
        Some(value) => resp_bulk(&value),
        None => resp_null(),
    }
}

fn handle_mget(args: &[Vec<u8>], db: &Db) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_arity("mget");
    }
    let keys = &args[1..];
    let mut buf = format!("*{}\r\n", keys.len()).into_bytes();
    for key in keys {
        match db.get(key) {
            Some(value) => buf.extend_from_slice(&resp_bulk(&value)),
            None => buf.extend_from_slice(&resp_null()),
        }
    }
    buf
}

fn handle_set(args: &[Vec<u8>], db: &Db) -> Vec<u8> {
    if args.len() < 3 {
        return wrong_arity("set");
    }

    let ttl = match args.len() {
        3 => None,
        5 => {
            let amount = match parse_u64(&args[4]) {
                Ok(value) if value > 0 => value,
                Ok(_) => return resp_error("invalid expire time in 'set' command"),
                Err(resp) => return resp,
            };
            if args[3].eq_ignore_ascii_case(b"EX") {
                Some(Duration::from_secs(amount))
            } else if args[3].eq_ignore_ascii_case(b"PX") {
                Some(Duration::from_millis(amount))
            } else {
                return resp_error("syntax error");
            }
        }
        _ => return resp_error("syntax error"),
    };

    db.set(args[1].clone(), args[2].clone(), ttl);
    resp_simple("OK")
}

fn handle_del(args: &[Vec<u8>], db: &Db) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_arity("del");
    }
    let removed = args[1..].iter().filter(|key| db.delete(key)).count();
    resp_integer(removed as i64)
}

fn handle_exists(args: &[Vec<u8>], db: &Db) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_arity("exists");
    }
    let found = args[1..].iter().filter(|key| db.exists(key)).count();
    resp_integer(found as i64)
}

/// `DEBUG SLEEP <seconds>` stalls this connection, as the real server does.
async fn handle_debug(args: &[Vec<u8>]) -> Vec<u8> {
    if args.len() == 3 && args[1].eq_ignore_ascii_case(b"SLEEP") {
        let seconds = std::str::from_utf8(&args[2])
            .ok()
            .and_then(|text| text.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0);
        return match seconds {
            Some(secs) => {
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                resp_simple("OK")
            }
            None => resp_error("value is not a valid float"),
        };
    }
    resp_error("unsupported DEBUG subcommand")
}

fn wrong_arity(cmd: &str) -> Vec<u8> {
    resp_error(&format!("wrong number of arguments for '{}' command", cmd))
}

fn parse_u64(arg: &[u8]) -> Result<u64, Vec<u8>> {
    if arg.is_empty() {
        return Err(resp_error("value is not an integer or out of range"));
    }
    let mut value: u64 = 0;
    for &b in arg {
        if !b.is_ascii_digit() {
            return Err(resp_error("value is not an integer or out of range"));
        }
        value = value.saturating_mul(10).saturating_add(u64::from(b - b'0'));
    }
    Ok(value)
}
