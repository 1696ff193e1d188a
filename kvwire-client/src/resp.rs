//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands as arrays of bulk strings and decode one
//! server reply at a time from a buffered reader.
//!
//! ## Design Principles
//! 1. **Closed Argument Model**: `Arg` is a small sum type (string, bytes,
//!    integer) with one formatting rule per variant.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Partial Arrays**: A nested error reply marks the array but decoding
//!    continues, so the stream stays aligned for the next reply.
//!
//! ## Wire Layout
//!
//! ```text
//! request:  *<argc>\r\n ( $<len>\r\n <payload>\r\n ){argc}
//! replies:  +<simple>\r\n | -<error>\r\n | :<integer>\r\n
//!           $<len>\r\n<payload>\r\n | $-1\r\n
//!           *<count>\r\n <reply>{count} | *-1\r\n
//! ```

use std::io::{self, BufRead, Read};

use bytes::Bytes;

use crate::error::{DecodeError, ReplyError};

const CRLF: &[u8] = b"\r\n";

// Upper bound for eager allocation; larger arrays grow as they are read.
const MAX_PREALLOC_ITEMS: usize = 1024;

/// Largest bulk payload accepted from a peer (the server's default
/// `proto-max-bulk-len`).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest reply line accepted, terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// One command argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg<'a> {
    Str(&'a str),
    Bytes(&'a [u8]),
    Int(i64),
    Uint(u64),
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(value: &'a str) -> Self {
        Arg::Str(value)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(value: &'a String) -> Self {
        Arg::Str(value.as_str())
    }
}

impl<'a> From<&'a [u8]> for Arg<'a> {
    fn from(value: &'a [u8]) -> Self {
        Arg::Bytes(value)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Arg<'a> {
    fn from(value: &'a [u8; N]) -> Self {
        Arg::Bytes(value)
    }
}

impl<'a> From<&'a Vec<u8>> for Arg<'a> {
    fn from(value: &'a Vec<u8>) -> Self {
        Arg::Bytes(value.as_slice())
    }
}

impl<'a> From<&'a Bytes> for Arg<'a> {
    fn from(value: &'a Bytes) -> Self {
        Arg::Bytes(value.as_ref())
    }
}

impl From<i64> for Arg<'_> {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg<'_> {
    fn from(value: i32) -> Self {
        Arg::Int(i64::from(value))
    }
}

impl From<u64> for Arg<'_> {
    fn from(value: u64) -> Self {
        Arg::Uint(value)
    }
}

impl From<u32> for Arg<'_> {
    fn from(value: u32) -> Self {
        Arg::Uint(u64::from(value))
    }
}

impl From<usize> for Arg<'_> {
    fn from(value: usize) -> Self {
        Arg::Uint(value as u64)
    }
}

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// +OK or +PONG style responses.
    Simple(Bytes),
    /// -ERR ... responses, without the marker.
    Error(Bytes),
    /// :123 responses, kept in their textual form.
    Integer(Bytes),
    /// $... bulk strings, with None for null.
    Bulk(Option<Bytes>),
    /// *... arrays. `items` is None for the nil array; `error` holds the
    /// first nested error reply (or the nil-reply error).
    Array {
        items: Option<Vec<Reply>>,
        error: Option<ReplyError>,
    },
}

impl Reply {
    /// Returns the error this reply carries, if any.
    pub fn error(&self) -> Option<ReplyError> {
        match self {
            Reply::Error(message) => Some(ReplyError::Server(message.clone())),
            Reply::Array { error, .. } => error.clone(),
            _ => None,
        }
    }

    /// True for the absent bulk string and the absent array.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::Array { items: None, .. })
    }

    /// Payload of a simple, integer or present bulk reply.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Reply::Simple(data) | Reply::Integer(data) | Reply::Bulk(Some(data)) => Some(data),
            _ => None,
        }
    }

    /// Parses an integer reply. The codec does not validate integers while
    /// decoding, so malformed digits surface here as `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Reply::Integer(data) => parse_i64(data),
            _ => None,
        }
    }

    /// Elements of a present array reply.
    pub fn items(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array { items: Some(items), .. } => Some(items.as_slice()),
            _ => None,
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[Arg<'_>], out: &mut Vec<u8>) {
    out.push(b'*');
    push_u64(out, args.len() as u64);
    out.extend_from_slice(CRLF);
    for arg in args {
        match *arg {
            Arg::Str(text) => push_bulk(out, text.as_bytes()),
            Arg::Bytes(data) => push_bulk(out, data),
            Arg::Int(value) => {
                let (digits, len) = format_i64(value);
                push_bulk(out, &digits[..len]);
            }
            Arg::Uint(value) => {
                let (digits, len) = format_u64(value);
                push_bulk(out, &digits[..len]);
            }
        }
    }
}

/// Reads one RESP value from the buffered reader.
///
/// **Input**: a buffered reader positioned at a reply boundary and a scratch
/// line buffer.
/// **Output**: the decoded `Reply`, or a `DecodeError` when the stream failed
/// or the framing is invalid.
///
/// **Logic**:
/// 1. Read one CRLF-terminated line; its first byte selects the variant.
/// 2. Bulk strings read exactly `len` bytes plus the trailing CRLF.
/// 3. Arrays recurse `count` times; nested error replies are recorded on the
///    array, stream failures abort the whole decode.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> Result<Reply, DecodeError> {
    read_line(reader, line_buf)?;
    let Some((&marker, rest)) = line_buf.split_first() else {
        return Err(DecodeError::Protocol("empty reply line".to_string()));
    };

    match marker {
        b'+' => Ok(Reply::Simple(Bytes::copy_from_slice(rest))),
        b'-' => Ok(Reply::Error(Bytes::copy_from_slice(rest))),
        b':' => Ok(Reply::Integer(Bytes::copy_from_slice(rest))),
        b'$' => {
            let len = parse_len(rest, "bulk length")?;
            read_bulk(reader, len)
        }
        b'*' => {
            let count = parse_len(rest, "multi-bulk count")?;
            read_array(reader, count, line_buf)
        }
        other => Err(DecodeError::Protocol(format!(
            "unexpected reply marker {:?}",
            char::from(other)
        ))),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: Option<usize>) -> Result<Reply, DecodeError> {
    let Some(len) = len else {
        return Ok(Reply::Bulk(None));
    };
    if len > MAX_BULK_LEN {
        return Err(DecodeError::Protocol(format!(
            "bulk length {} exceeds limit {}",
            len, MAX_BULK_LEN
        )));
    }

    let mut data = vec![0u8; len + CRLF.len()];
    reader.read_exact(&mut data).map_err(short_read)?;
    if &data[len..] != CRLF {
        return Err(DecodeError::Protocol("bulk payload not terminated by CRLF".to_string()));
    }
    data.truncate(len);
    Ok(Reply::Bulk(Some(Bytes::from(data))))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    count: Option<usize>,
    line_buf: &mut Vec<u8>,
) -> Result<Reply, DecodeError> {
    let Some(count) = count else {
        return Ok(Reply::Array {
            items: None,
            error: Some(ReplyError::NilReply),
        });
    };

    let mut items = Vec::with_capacity(count.min(MAX_PREALLOC_ITEMS));
    let mut error = None;
    for _ in 0..count {
        let item = read_reply(reader, line_buf)?;
        if error.is_none() {
            error = item.error();
        }
        items.push(item);
    }
    Ok(Reply::Array {
        items: Some(items),
        error,
    })
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), DecodeError> {
    buf.clear();
    let bytes = reader.take(MAX_LINE_LEN as u64).read_until(b'\n', buf)?;
    if bytes == MAX_LINE_LEN && !buf.ends_with(b"\n") {
        return Err(DecodeError::Protocol(format!(
            "reply line exceeds limit {}",
            MAX_LINE_LEN
        )));
    }
    if bytes == 0 {
        return Err(DecodeError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before reply",
        )));
    }
    if !buf.ends_with(CRLF) {
        return Err(DecodeError::Protocol("reply line not terminated by CRLF".to_string()));
    }
    buf.truncate(buf.len() - CRLF.len());
    Ok(())
}

// EOF in the middle of a payload is a framing fault; timeouts stay I/O errors.
fn short_read(err: io::Error) -> DecodeError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        DecodeError::Protocol("short bulk read".to_string())
    } else {
        DecodeError::Io(err)
    }
}

/// Parses a length header; `-1` is the absent marker and maps to `None`.
fn parse_len(data: &[u8], what: &str) -> Result<Option<usize>, DecodeError> {
    match parse_i64(data) {
        Some(-1) => Ok(None),
        Some(value) if value >= 0 => match usize::try_from(value) {
            Ok(len) => Ok(Some(len)),
            Err(_) => Err(DecodeError::Protocol(format!("{} {} out of range", what, value))),
        },
        _ => Err(DecodeError::Protocol(format!(
            "invalid {}: {:?}",
            what,
            String::from_utf8_lossy(data)
        ))),
    }
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return None,
    };
    if digits.is_empty() {
        return None;
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
    }

    Some(if negative { -value } else { value })
}

fn push_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.push(b'$');
    push_u64(out, data.len() as u64);
    out.extend_from_slice(CRLF);
    out.extend_from_slice(data);
    out.extend_from_slice(CRLF);
}

fn push_u64(out: &mut Vec<u8>, value: u64) {
    let (digits, len) = format_u64(value);
    out.extend_from_slice(&digits[..len]);
}

fn format_i64(value: i64) -> ([u8; 21], usize) {
    let mut buf = [0u8; 21];
    let (digits, len) = format_u64(value.unsigned_abs());
    let mut start = 0;
    if value < 0 {
        buf[0] = b'-';
        start = 1;
    }
    buf[start..start + len].copy_from_slice(&digits[..len]);
    (buf, start + len)
}

fn format_u64(mut value: u64) -> ([u8; 20], usize) {
    // Stack buffer keeps conversion allocation-free.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        return (buf, 1);
    }
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    (buf, len)
}
