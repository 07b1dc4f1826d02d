//! RESP protocol parser implementation
//!
//! Provides incremental parsing of RESP frames. Bytes are fed into the
//! parser as they arrive from the socket; complete frames are taken out one
//! at a time, leaving any pipelined remainder buffered for the next call.

use std::sync::Arc;

use super::resp::RespFrame;
use crate::error::{CinnabarError, Result};

/// Parser state for incremental RESP parsing
pub struct RespParser {
    buffer: Vec<u8>,
    position: usize,
}

impl RespParser {
    /// Create a new parser
    pub fn new() -> Self {
        RespParser {
            buffer: Vec::with_capacity(4096),
            position: 0,
        }
    }

    /// Feed data into the parser
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to parse a complete frame from the buffer
    pub fn parse(&mut self) -> Result<Option<RespFrame>> {
        if self.position >= self.buffer.len() {
            return Ok(None);
        }

        match parse_frame(&self.buffer[self.position..])? {
            Some((frame, consumed)) => {
                self.position += consumed;
                self.compact();
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Take one CRLF-terminated line out of the buffer, without the CRLF.
    ///
    /// Used by the replication handshake, whose replies are read line by
    /// line rather than as full frames.
    pub fn read_line(&mut self) -> Option<Vec<u8>> {
        let data = &self.buffer[self.position..];
        for i in 0..data.len().saturating_sub(1) {
            if data[i] == b'\r' && data[i + 1] == b'\n' {
                let line = data[..i].to_vec();
                self.position += i + 2;
                self.compact();
                return Some(line);
            }
        }
        None
    }

    /// Move up to `max` buffered bytes into `dst`, returning how many were
    /// taken. Used to consume raw (non-RESP) payloads such as the snapshot
    /// body that follows a FULLRESYNC reply.
    pub fn drain_raw(&mut self, dst: &mut Vec<u8>, max: usize) -> usize {
        let available = self.buffer.len() - self.position;
        let n = available.min(max);
        dst.extend_from_slice(&self.buffer[self.position..self.position + n]);
        self.position += n;
        self.compact();
        n
    }

    /// Clear the parser buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.position = 0;
    }

    // Reclaim consumed space once it dominates the buffer.
    fn compact(&mut self) {
        if self.position > self.buffer.len() / 2 {
            self.buffer.drain(..self.position);
            self.position = 0;
        }
    }
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a RESP frame from a byte slice
/// Returns Some((frame, bytes_consumed)) if a complete frame is found
pub fn parse_resp_frame(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    parse_frame(data)
}

/// Internal frame parser
fn parse_frame(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    if data.is_empty() {
        return Ok(None);
    }

    match data[0] {
        b'+' => parse_simple_string(data),
        b'-' => parse_error(data),
        b':' => parse_integer(data),
        b'$' => parse_bulk_string(data),
        b'*' => parse_array(data),
        _ => Err(CinnabarError::Protocol(format!(
            "Invalid RESP type byte: {}",
            data[0] as char
        ))),
    }
}

/// Parse a simple string: +OK\r\n
fn parse_simple_string(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    Ok(parse_line(data, 1)
        .map(|(line, consumed)| (RespFrame::SimpleString(Arc::new(line.to_vec())), consumed)))
}

/// Parse an error: -Error message\r\n
fn parse_error(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    Ok(parse_line(data, 1)
        .map(|(line, consumed)| (RespFrame::Error(Arc::new(line.to_vec())), consumed)))
}

/// Parse an integer: :1000\r\n
fn parse_integer(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    match parse_line(data, 1) {
        Some((line, consumed)) => {
            let s = std::str::from_utf8(line)
                .map_err(|_| CinnabarError::Protocol("Invalid UTF-8 in integer".into()))?;
            let n = s
                .parse::<i64>()
                .map_err(|_| CinnabarError::Protocol("Invalid integer format".into()))?;
            Ok(Some((RespFrame::Integer(n), consumed)))
        }
        None => Ok(None),
    }
}

/// Parse a bulk string: $6\r\nfoobar\r\n or $-1\r\n (null)
fn parse_bulk_string(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    let (len_line, header_consumed) = match parse_line(data, 1) {
        Some(v) => v,
        None => return Ok(None),
    };

    let len_str = std::str::from_utf8(len_line)
        .map_err(|_| CinnabarError::Protocol("Invalid UTF-8 in bulk length".into()))?;
    let len = len_str
        .parse::<i64>()
        .map_err(|_| CinnabarError::Protocol("Invalid bulk string length".into()))?;

    if len == -1 {
        return Ok(Some((RespFrame::BulkString(None), header_consumed)));
    }

    if len < 0 {
        return Err(CinnabarError::Protocol(
            "Invalid negative bulk string length".into(),
        ));
    }

    let len = len as usize;
    let total_needed = header_consumed + len + 2; // +2 for \r\n

    if data.len() < total_needed {
        return Ok(None); // Need more data
    }

    if data[header_consumed + len] != b'\r' || data[header_consumed + len + 1] != b'\n' {
        return Err(CinnabarError::Protocol(
            "Missing CRLF after bulk string".into(),
        ));
    }

    let content = data[header_consumed..header_consumed + len].to_vec();
    Ok(Some((
        RespFrame::BulkString(Some(Arc::new(content))),
        total_needed,
    )))
}

/// Parse an array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
fn parse_array(data: &[u8]) -> Result<Option<(RespFrame, usize)>> {
    let (len_line, header_consumed) = match parse_line(data, 1) {
        Some(v) => v,
        None => return Ok(None),
    };

    let len_str = std::str::from_utf8(len_line)
        .map_err(|_| CinnabarError::Protocol("Invalid UTF-8 in array length".into()))?;
    let len = len_str
        .parse::<i64>()
        .map_err(|_| CinnabarError::Protocol("Invalid array length".into()))?;

    if len == -1 {
        return Ok(Some((RespFrame::Array(None), header_consumed)));
    }

    if len < 0 {
        return Err(CinnabarError::Protocol(
            "Invalid negative array length".into(),
        ));
    }

    let len = len as usize;
    let mut elements = Vec::with_capacity(len);
    let mut total_consumed = header_consumed;

    for _ in 0..len {
        match parse_frame(&data[total_consumed..])? {
            Some((frame, consumed)) => {
                elements.push(frame);
                total_consumed += consumed;
            }
            None => return Ok(None), // Need more data
        }
    }

    Ok(Some((RespFrame::Array(Some(elements)), total_consumed)))
}

/// Find a line ending with \r\n, skipping a leading type byte
fn parse_line(data: &[u8], skip_prefix: usize) -> Option<(&[u8], usize)> {
    if data.len() < skip_prefix + 2 {
        return None;
    }

    for i in skip_prefix..data.len() - 1 {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            return Some((&data[skip_prefix..i], i + 2));
        }
    }

    None // Need more data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_string() {
        let data = b"+OK\r\n";
        let result = parse_resp_frame(data).unwrap();
        assert!(matches!(result, Some((RespFrame::SimpleString(_), 5))));
    }

    #[test]
    fn test_parse_error() {
        let data = b"-Error message\r\n";
        let result = parse_resp_frame(data).unwrap();
        assert!(matches!(result, Some((RespFrame::Error(_), 16))));
    }

    #[test]
    fn test_parse_integer() {
        let data = b":1000\r\n";
        let result = parse_resp_frame(data).unwrap();
        assert!(matches!(result, Some((RespFrame::Integer(1000), 7))));

        let data = b":-42\r\n";
        let result = parse_resp_frame(data).unwrap();
        assert!(matches!(result, Some((RespFrame::Integer(-42), 6))));
    }

    #[test]
    fn test_parse_bulk_string() {
        let data = b"$6\r\nfoobar\r\n";
        let result = parse_resp_frame(data).unwrap();
        assert!(matches!(result, Some((RespFrame::BulkString(Some(_)), 12))));

        let data = b"$-1\r\n";
        let result = parse_resp_frame(data).unwrap();
        assert!(matches!(result, Some((RespFrame::BulkString(None), 5))));
    }

    #[test]
    fn test_parse_array() {
        let data = b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        let result = parse_resp_frame(data).unwrap();
        assert!(matches!(result, Some((RespFrame::Array(Some(arr)), 22)) if arr.len() == 2));

        let data = b"*-1\r\n";
        let result = parse_resp_frame(data).unwrap();
        assert!(matches!(result, Some((RespFrame::Array(None), 5))));
    }

    #[test]
    fn test_invalid_type_byte() {
        let data = b"!oops\r\n";
        assert!(parse_resp_frame(data).is_err());
    }

    #[test]
    fn test_incremental_parsing() {
        let mut parser = RespParser::new();

        // Feed partial data
        parser.feed(b"*2\r\n$3\r\n");
        assert!(parser.parse().unwrap().is_none());

        // Feed more data
        parser.feed(b"foo\r\n$3\r\nbar\r\n");
        let frame = parser.parse().unwrap().unwrap();
        assert!(matches!(frame, RespFrame::Array(Some(arr)) if arr.len() == 2));
    }

    #[test]
    fn test_pipelined_frames_are_kept() {
        let mut parser = RespParser::new();
        parser.feed(b"+PONG\r\n+OK\r\n");

        assert!(matches!(
            parser.parse().unwrap(),
            Some(RespFrame::SimpleString(_))
        ));
        assert!(matches!(
            parser.parse().unwrap(),
            Some(RespFrame::SimpleString(_))
        ));
        assert!(parser.parse().unwrap().is_none());
    }

    #[test]
    fn test_read_line_and_drain_raw() {
        let mut parser = RespParser::new();
        parser.feed(b"+FULLRESYNC abc 0\r\n$5\r\nhello");

        let line = parser.read_line().unwrap();
        assert_eq!(line, b"+FULLRESYNC abc 0");

        let header = parser.read_line().unwrap();
        assert_eq!(header, b"$5");

        let mut payload = Vec::new();
        assert_eq!(parser.drain_raw(&mut payload, 5), 5);
        assert_eq!(payload, b"hello");
        assert_eq!(parser.drain_raw(&mut payload, 1), 0);
    }
}
