//! # Connection
//!
//! Purpose: Own one duplex link plus its read buffer, encode commands onto it
//! and decode replies from it.
//!
//! ## Design Principles
//! 1. **Transport Seam**: `Dialer` and `Link` are traits so TCP, unix domain
//!    sockets and in-memory doubles share one code path.
//! 2. **Absolute Deadlines**: `Socket` turns a deadline into the remaining
//!    socket timeout right before every read and write syscall.
//! 3. **Buffer Reuse**: Each connection keeps its own line and write buffers.

use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::config::Transport;
use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_reply, Arg, Reply};

/// A connected byte stream the client can drive.
pub trait Link: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    /// Shuts down both directions of the stream.
    fn shutdown(&self) -> io::Result<()>;
}

impl Link for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Link for std::os::unix::net::UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// Opens links to a server address.
pub trait Dialer: Send + Sync {
    /// Connects to `addr`; a zero `timeout` waits as long as the OS allows.
    fn dial(&self, addr: &str, timeout: Duration) -> io::Result<Box<dyn Link>>;
}

/// Dialer for real sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetDialer {
    transport: Transport,
}

impl NetDialer {
    pub fn new(transport: Transport) -> Self {
        NetDialer { transport }
    }
}

impl Dialer for NetDialer {
    fn dial(&self, addr: &str, timeout: Duration) -> io::Result<Box<dyn Link>> {
        match self.transport {
            Transport::Tcp => Ok(Box::new(dial_tcp(addr, timeout)?)),
            Transport::Unix => dial_unix(addr, timeout),
        }
    }
}

fn dial_tcp(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for sock_addr in addr.to_socket_addrs()? {
        let attempt = if timeout.is_zero() {
            TcpStream::connect(sock_addr)
        } else {
            TcpStream::connect_timeout(&sock_addr, timeout)
        };
        match attempt {
            Ok(stream) => {
                // Disable Nagle to keep request latency low for small payloads.
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to no socket addresses")
    }))
}

#[cfg(unix)]
fn dial_unix(path: &str, timeout: Duration) -> io::Result<Box<dyn Link>> {
    use socket2::{Domain, SockAddr, Socket as RawSocket, Type};

    let socket = RawSocket::new(Domain::UNIX, Type::STREAM, None)?;
    let addr = SockAddr::unix(path)?;
    if timeout.is_zero() {
        socket.connect(&addr)?;
    } else {
        socket.connect_timeout(&addr, timeout)?;
    }
    Ok(Box::new(std::os::unix::net::UnixStream::from(socket)))
}

#[cfg(not(unix))]
fn dial_unix(_path: &str, _timeout: Duration) -> io::Result<Box<dyn Link>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix domain sockets are not available on this platform",
    ))
}

/// Link wrapper enforcing an absolute I/O deadline.
pub struct Socket {
    link: Box<dyn Link>,
    deadline: Option<Instant>,
}

impl Socket {
    fn new(link: Box<dyn Link>) -> Self {
        Socket { link, deadline: None }
    }

    /// Sets the deadline for all following reads and writes.
    ///
    /// An already expired deadline is accepted; the next I/O fails with
    /// `TimedOut` instead.
    pub fn set_deadline(&mut self, deadline: Instant) -> io::Result<()> {
        self.deadline = Some(deadline);
        if let Ok(Some(remaining)) = self.remaining() {
            self.link.set_read_timeout(Some(remaining))?;
            self.link.set_write_timeout(Some(remaining))?;
        }
        Ok(())
    }

    // Never yields Some(ZERO): std rejects a zero socket timeout.
    fn remaining(&self) -> io::Result<Option<Duration>> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    Err(timeout_error())
                } else {
                    Ok(Some(deadline - now))
                }
            }
        }
    }

    fn arm_read(&self) -> io::Result<()> {
        match self.remaining() {
            Ok(Some(remaining)) => self.link.set_read_timeout(Some(remaining)),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn arm_write(&self) -> io::Result<()> {
        match self.remaining() {
            Ok(Some(remaining)) => self.link.set_write_timeout(Some(remaining)),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm_read()?;
        self.link.read(buf).map_err(normalize_timeout)
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm_write()?;
        self.link.write(buf).map_err(normalize_timeout)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.link.flush().map_err(normalize_timeout)
    }
}

fn timeout_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o timeout")
}

// Socket timeouts surface as EAGAIN on unix; report them as timeouts.
fn normalize_timeout(err: io::Error) -> io::Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => timeout_error(),
        _ => err,
    }
}

/// Single server connection with reusable buffers.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<Socket>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Opens a new connection through `dialer`, bounded by `timeout`.
    pub fn dial(dialer: &dyn Dialer, addr: &str, timeout: Duration) -> ClientResult<Self> {
        let link = dialer.dial(addr, timeout).map_err(|source| ClientError::Dial {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Connection::from_link(link))
    }

    /// Wraps an already connected link.
    pub fn from_link(link: Box<dyn Link>) -> Self {
        Connection {
            reader: BufReader::new(Socket::new(link)),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        }
    }

    /// Encodes the command and writes it in one `write_all`.
    pub fn write(&mut self, args: &[Arg<'_>]) -> ClientResult<()> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let socket = self.reader.get_mut();
        socket.write_all(&self.write_buf).map_err(ClientError::Write)?;
        socket.flush().map_err(ClientError::Write)
    }

    /// Reads one reply. A reply carrying an error is returned as `Err`.
    pub fn read(&mut self) -> ClientResult<Reply> {
        let reply = read_reply(&mut self.reader, &mut self.line_buf)?;
        if let Some(err) = reply.error() {
            return Err(ClientError::Reply(err));
        }
        Ok(reply)
    }

    /// Underlying socket, used to set the per-call deadline.
    pub fn sock(&mut self) -> &mut Socket {
        self.reader.get_mut()
    }

    /// Closes the stream. Consuming `self` rules out a double close.
    pub fn close(self) -> io::Result<()> {
        self.reader.into_inner().link.shutdown()
    }
}
