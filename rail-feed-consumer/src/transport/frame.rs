//! STOMP 1.1 frame codec.
//!
//! A frame is a command line, `name:value` header lines, a blank line, the
//! body and a NUL byte. Bare end-of-line bytes between frames are heartbeats.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::TransportError;

/// Largest frame, headers and body together, we are willing to buffer.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Frame(Frame),
    Heartbeat,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First occurrence wins when a header is repeated.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let escaped = escapes_headers(&self.command);

        dst.put_slice(self.command.as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &self.headers {
            if escaped {
                dst.put_slice(escape(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.put_slice(&self.body);
        dst.put_u8(0);
    }
}

// CONNECT and CONNECTED predate header escaping and must be sent verbatim.
fn escapes_headers(command: &str) -> bool {
    command != "CONNECT" && command != "CONNECTED"
}

/// Take one frame or heartbeat off the front of `buf`. Returns `Ok(None)`
/// and leaves `buf` untouched when more bytes are needed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Incoming>, TransportError> {
    if buf.starts_with(b"\n") {
        buf.advance(1);
        return Ok(Some(Incoming::Heartbeat));
    }
    if buf.starts_with(b"\r\n") {
        buf.advance(2);
        return Ok(Some(Incoming::Heartbeat));
    }

    let mut lines = Vec::new();
    let mut pos = 0;
    let header_end = loop {
        let Some(newline) = buf[pos..].iter().position(|b| *b == b'\n') else {
            return incomplete(buf);
        };
        let line = trim_cr(&buf[pos..pos + newline]);
        pos += newline + 1;
        if line.is_empty() {
            break pos;
        }
        lines.push(
            std::str::from_utf8(line)
                .map_err(|_| TransportError::Protocol("frame header is not utf-8".to_string()))?
                .to_owned(),
        );
    };

    let mut lines = lines.into_iter();
    let command = lines
        .next()
        .ok_or_else(|| TransportError::Protocol("frame has no command".to_string()))?;
    let escaped = escapes_headers(&command);

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TransportError::Protocol(format!("malformed header line {line:?}")))?;
        if escaped {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_owned(), value.to_owned()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| TransportError::Protocol(format!("bad content-length {value:?}")))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(length) => {
            let body_end = header_end
                .checked_add(length)
                .filter(|end| *end < MAX_FRAME_BYTES)
                .ok_or_else(|| {
                    TransportError::Protocol(format!("content-length {length} is too large"))
                })?;
            if buf.len() <= body_end {
                return Ok(None);
            }
            if buf[body_end] != 0 {
                return Err(TransportError::Protocol(
                    "frame body is not NUL terminated".to_string(),
                ));
            }
            body_end
        }
        None => match buf[header_end..].iter().position(|b| *b == 0) {
            Some(offset) => header_end + offset,
            None => return incomplete(buf),
        },
    };

    let raw = buf.split_to(body_end + 1).freeze();
    Ok(Some(Incoming::Frame(Frame {
        command,
        headers,
        body: raw.slice(header_end..body_end),
    })))
}

// Waiting for more bytes is only fine while the frame could still fit.
fn incomplete(buf: &BytesMut) -> Result<Option<Incoming>, TransportError> {
    if buf.len() > MAX_FRAME_BYTES {
        return Err(TransportError::Protocol(format!(
            "frame exceeds {MAX_FRAME_BYTES} bytes"
        )));
    }
    Ok(None)
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> Result<String, TransportError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            _ => {
                return Err(TransportError::Protocol(format!(
                    "invalid escape in header {raw:?}"
                )))
            }
        }
    }
    Ok(out)
}
