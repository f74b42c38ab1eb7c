use crate::error::FrameError;
use bytes::{Buf, Bytes, BytesMut};
use std::io;

/// RESP2 value types.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),          // +
    Error(String),                 // -
    Integer(i64),                  // :
    BulkString(Option<String>),    // $ (None = null)
    Array(Option<Vec<RespValue>>), // * (None = null)
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn simple(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn bulk(s: impl Into<String>) -> Self {
        RespValue::BulkString(Some(s.into()))
    }

    pub fn null() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Array of bulk strings, the shape every request frame has.
    pub fn bulk_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RespValue::Array(Some(items.into_iter().map(RespValue::bulk).collect()))
    }

    /// Serialize this value to wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => out.extend_from_slice(format!("+{}\r\n", s).as_bytes()),
            RespValue::Error(e) => out.extend_from_slice(format!("-{}\r\n", e).as_bytes()),
            RespValue::Integer(i) => out.extend_from_slice(format!(":{}\r\n", i).as_bytes()),
            RespValue::BulkString(Some(s)) => {
                out.extend_from_slice(format!("${}\r\n", s.len()).as_bytes());
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(Some(items)) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.write_to(out);
                }
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
        }
    }
}

/// Bulk strings longer than this are treated as corrupt framing.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Stateful parser for RESP messages.
///
/// Accumulates data in a buffer and yields complete values. A partial value
/// leaves the buffer untouched so the next read can complete it. Values are
/// only built once the whole frame has arrived.
pub struct RespParser {
    buffer: BytesMut,
    /// Scan progress through a partially received top-level array: elements
    /// still to scan and the offset where the next one starts.
    pending: Option<(usize, usize)>,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            pending: None,
        }
    }

    /// Add incoming bytes to the parser buffer.
    pub fn add_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Clear the buffer after a framing error.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Parse the next complete value. Returns None if incomplete.
    pub fn parse(&mut self) -> Result<Option<RespValue>, FrameError> {
        Ok(self.parse_frame()?.map(|(value, _)| value))
    }

    /// Parse the next complete value together with the number of bytes it
    /// occupied on the wire.
    ///
    /// A delimited frame with invalid content is consumed and reported as
    /// [`FrameError::Invalid`]; parsing can continue with the next frame.
    pub fn parse_frame(&mut self) -> Result<Option<(RespValue, usize)>, FrameError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        tracing::trace!("Parsing buffer: {} bytes", self.buffer.len());

        let Some(end) = self.frame_end()? else {
            return Ok(None);
        };
        self.pending = None;
        let frame = self.buffer.split_to(end);
        let (value, _) = decode_value(&frame, 0).map_err(FrameError::Invalid)?;
        Ok(Some((value, end)))
    }

    /// Find where the first buffered frame ends without building it.
    fn frame_end(&mut self) -> Result<Option<usize>, FrameError> {
        let (mut remaining, mut cursor) = match self.pending {
            Some(progress) => progress,
            None if self.buffer[0] == b'*' => {
                let Some((line, next)) = scan_line(&self.buffer, 1) else {
                    return Ok(None);
                };
                match parse_length(line, "Invalid array length")? {
                    Some(len) => (len, next),
                    None => return Ok(Some(next)),
                }
            }
            None => return scan_value(&self.buffer, 0),
        };

        while remaining > 0 {
            match scan_value(&self.buffer, cursor)? {
                Some(end) => {
                    cursor = end;
                    remaining -= 1;
                }
                None => {
                    self.pending = Some((remaining, cursor));
                    return Ok(None);
                }
            }
        }
        Ok(Some(cursor))
    }

    /// Take a `$<len>\r\n<bytes>` payload that has no trailing CRLF, as sent
    /// after `+FULLRESYNC`. Returns None if the payload is not complete yet.
    pub fn take_snapshot_payload(&mut self) -> Result<Option<Bytes>, io::Error> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        if self.buffer[0] != b'$' {
            return Err(invalid("Expected snapshot payload"));
        }
        let Some((line, start)) = scan_line(&self.buffer, 1) else {
            return Ok(None);
        };
        let length = std::str::from_utf8(line)
            .ok()
            .and_then(|line| line.parse::<usize>().ok())
            .ok_or_else(|| invalid("Invalid snapshot length"))?;
        if self.buffer.len() < start + length {
            return Ok(None);
        }
        self.buffer.advance(start);
        self.pending = None;
        Ok(Some(self.buffer.split_to(length).freeze()))
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Walk the frame starting at `pos` and return the position just past it,
/// or None if more bytes are needed.
fn scan_value(buf: &[u8], pos: usize) -> Result<Option<usize>, FrameError> {
    let Some(&type_byte) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = scan_line(buf, pos + 1) else {
        return Ok(None);
    };

    match type_byte {
        b'+' | b'-' | b':' => Ok(Some(next)),
        b'$' => {
            let Some(length) = parse_length(line, "Invalid bulk string length")? else {
                return Ok(Some(next));
            };
            if length > MAX_BULK_LEN {
                return Err(FrameError::Corrupt("Invalid bulk string length".to_string()));
            }
            let end = next + length;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(FrameError::Corrupt(
                    "Bulk string not terminated by CRLF".to_string(),
                ));
            }
            Ok(Some(end + 2))
        }
        b'*' => {
            let Some(length) = parse_length(line, "Invalid array length")? else {
                return Ok(Some(next));
            };
            let mut cursor = next;
            for _ in 0..length {
                match scan_value(buf, cursor)? {
                    Some(end) => cursor = end,
                    None => return Ok(None),
                }
            }
            Ok(Some(cursor))
        }
        _ => Err(FrameError::Corrupt(format!(
            "Invalid RESP type byte: {}",
            type_byte as char
        ))),
    }
}

/// Build the value starting at `pos` in a buffer already known to hold the
/// whole frame. Returns the value and the position just past it.
fn decode_value(buf: &[u8], pos: usize) -> Result<(RespValue, usize), String> {
    let incomplete = || "Incomplete frame".to_string();
    let type_byte = *buf.get(pos).ok_or_else(incomplete)?;
    let (line, next) = scan_line(buf, pos + 1).ok_or_else(incomplete)?;
    let parse_len = |msg: &str| parse_length(line, msg).map_err(|e| e.to_string());

    match type_byte {
        b'+' => Ok((RespValue::SimpleString(utf8(line)?), next)),
        b'-' => Ok((RespValue::Error(utf8(line)?), next)),
        b':' => {
            let num = std::str::from_utf8(line)
                .ok()
                .and_then(|line| line.parse::<i64>().ok())
                .ok_or_else(|| "Invalid integer".to_string())?;
            Ok((RespValue::Integer(num), next))
        }
        b'$' => match parse_len("Invalid bulk string length")? {
            None => Ok((RespValue::BulkString(None), next)),
            Some(length) => {
                let bytes = buf.get(next..next + length).ok_or_else(incomplete)?;
                Ok((RespValue::BulkString(Some(utf8(bytes)?)), next + length + 2))
            }
        },
        b'*' => match parse_len("Invalid array length")? {
            None => Ok((RespValue::Array(None), next)),
            Some(length) => {
                let mut elements = Vec::with_capacity(length.min(1024));
                let mut cursor = next;
                for _ in 0..length {
                    let (element, end) = decode_value(buf, cursor)?;
                    elements.push(element);
                    cursor = end;
                }
                Ok((RespValue::Array(Some(elements)), cursor))
            }
        },
        _ => Err(format!("Invalid RESP type byte: {}", type_byte as char)),
    }
}

fn utf8(bytes: &[u8]) -> Result<String, String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| "Invalid UTF-8".to_string())
}

/// `-1` is the null marker; any other negative length is an error.
fn parse_length(line: &[u8], msg: &str) -> Result<Option<usize>, FrameError> {
    let corrupt = || FrameError::Corrupt(msg.to_string());
    let length = std::str::from_utf8(line)
        .ok()
        .and_then(|line| line.parse::<i64>().ok())
        .ok_or_else(corrupt)?;
    match length {
        -1 => Ok(None),
        n if n < 0 => Err(corrupt()),
        n => Ok(Some(n as usize)),
    }
}

/// The bytes up to the next CRLF at or after `pos`, and the position past it.
fn scan_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let offset = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..offset], pos + offset + 2))
}
