//! # Request Framing
//!
//! Incremental parser for RESP2 request arrays and encoders for the five
//! reply kinds.

use bytes::{Buf, BytesMut};

/// Request parse failure. Anything other than "need more bytes" is fatal for
/// the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Parses `*<n>\r\n($<len>\r\n<data>\r\n){n}` frames out of a read buffer.
#[derive(Debug, Default)]
pub struct RespParser {
    _private: (),
}

impl RespParser {
    pub fn new() -> Self {
        RespParser::default()
    }

    /// Removes and returns one complete command from `buffer`.
    ///
    /// Returns `Ok(None)` and leaves the buffer untouched when the frame is
    /// still incomplete.
    pub fn parse(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let mut cursor = Cursor { data: &buffer[..], pos: 0 };

        let Some(header) = cursor.line()? else {
            return Ok(None);
        };
        if header.first() != Some(&b'*') {
            return Err(RespError::Protocol);
        }
        let count = parse_usize(&header[1..])?;

        let mut args = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let Some(line) = cursor.line()? else {
                return Ok(None);
            };
            if line.first() != Some(&b'$') {
                return Err(RespError::Protocol);
            }
            let len = parse_usize(&line[1..])?;
            let Some(data) = cursor.take(len.saturating_add(2)) else {
                return Ok(None);
            };
            if &data[len..] != b"\r\n" {
                return Err(RespError::Protocol);
            }
            args.push(data[..len].to_vec());
        }

        let consumed = cursor.pos;
        buffer.advance(consumed);
        Ok(Some(args))
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn line(&mut self) -> Result<Option<&'a [u8]>, RespError> {
        let rest = &self.data[self.pos..];
        let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        if newline == 0 || rest[newline - 1] != b'\r' {
            return Err(RespError::Protocol);
        }
        self.pos += newline + 1;
        Ok(Some(&rest[..newline - 1]))
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let rest = &self.data[self.pos..];
        if rest.len() < len {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }
}

fn parse_usize(data: &[u8]) -> Result<usize, RespError> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(usize::from(b - b'0')))
            .ok_or(RespError::Protocol)?;
    }
    Ok(value)
}

pub fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 6);
    buf.extend_from_slice(b"-ERR ");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b":");
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 16);
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}
