//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses without
//! external dependencies, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: `RespParser` returns `Ok(None)` until a whole
//!    reply is buffered and resumes where it stopped, so callers can read in
//!    arbitrary chunks.
//! 2. **Buffer Reuse**: Caller provides the output buffer for encoding.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use hcache_common::{CacheError, CacheResult, Command};

/// Upper bound on a single bulk string (matches the store's proto-max-bulk-len).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Deepest array nesting accepted in a reply.
const MAX_DEPTH: usize = 32;

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays; a null array is reported as empty.
    Array(Vec<RespValue>),
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(command: &Command, out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, command.len());
    out.extend_from_slice(b"\r\n");
    for part in command.parts() {
        out.push(b'$');
        push_usize(out, part.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
}

/// Parses one RESP value from the front of `buf`.
///
/// Returns the value and the number of bytes it occupied, or `None` when
/// `buf` holds only a prefix of a reply.
pub fn parse_value(buf: &[u8]) -> CacheResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

/// Resumable RESP2 reply parser.
///
/// Completed frames are kept between calls, so feeding a growing buffer
/// only parses the bytes that arrived since the last call. The buffer must
/// keep its already-parsed prefix until a whole value is returned.
#[derive(Debug, Default)]
pub struct RespParser {
    pos: usize,
    pending: Vec<PendingArray>,
}

#[derive(Debug)]
struct PendingArray {
    items: Vec<RespValue>,
    remaining: usize,
}

enum Frame {
    Value(RespValue),
    ArrayStart(usize),
}

impl RespParser {
    pub fn new() -> Self {
        RespParser::default()
    }

    /// Continues parsing `buf`; returns the finished value and the bytes it
    /// occupied once the whole reply is present.
    ///
    /// After `Some` or an error the parser starts over with the next call.
    pub fn parse(&mut self, buf: &[u8]) -> CacheResult<Option<(RespValue, usize)>> {
        let result = self.advance(buf);
        if !matches!(result, Ok(None)) {
            self.reset();
        }
        result
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.pending.clear();
    }

    fn advance(&mut self, buf: &[u8]) -> CacheResult<Option<(RespValue, usize)>> {
        loop {
            let (frame, next) = match parse_frame(buf, self.pos)? {
                Some(found) => found,
                None => return Ok(None),
            };
            self.pos = next;

            let mut value = match frame {
                Frame::ArrayStart(len) => {
                    if self.pending.len() >= MAX_DEPTH {
                        return Err(CacheError::Protocol);
                    }
                    // Length comes from the wire; do not trust it for preallocation.
                    self.pending.push(PendingArray {
                        items: Vec::with_capacity(len.min(64)),
                        remaining: len,
                    });
                    continue;
                }
                Frame::Value(value) => value,
            };

            // Fold the finished value into its parents, closing every array
            // it completes.
            loop {
                let top = match self.pending.last_mut() {
                    Some(top) => top,
                    None => return Ok(Some((value, self.pos))),
                };
                top.items.push(value);
                top.remaining -= 1;
                if top.remaining > 0 {
                    break;
                }
                value = RespValue::Array(std::mem::take(&mut top.items));
                self.pending.pop();
            }
        }
    }
}

/// Parses the frame header (and bulk payload) starting at `pos`.
fn parse_frame(buf: &[u8], pos: usize) -> CacheResult<Option<(Frame, usize)>> {
    let (line, next) = match read_line(buf, pos)? {
        Some(found) => found,
        None => return Ok(None),
    };
    if line.is_empty() {
        return Err(CacheError::Protocol);
    }

    let value = match line[0] {
        b'+' => RespValue::Simple(line[1..].to_vec()),
        b'-' => RespValue::Error(line[1..].to_vec()),
        b':' => RespValue::Integer(parse_i64(&line[1..])?),
        b'$' => {
            let len = parse_i64(&line[1..])?;
            return parse_bulk(buf, next, len);
        }
        b'*' => {
            let len = parse_i64(&line[1..])?;
            if len <= 0 {
                RespValue::Array(Vec::new())
            } else {
                return Ok(Some((Frame::ArrayStart(len as usize), next)));
            }
        }
        _ => return Err(CacheError::Protocol),
    };
    Ok(Some((Frame::Value(value), next)))
}

fn parse_bulk(buf: &[u8], start: usize, len: i64) -> CacheResult<Option<(Frame, usize)>> {
    if len < 0 {
        return Ok(Some((Frame::Value(RespValue::Bulk(None)), start)));
    }
    if len > MAX_BULK_LEN {
        return Err(CacheError::Protocol);
    }

    let end = start + len as usize;
    if buf.len() < end + 2 {
        return Ok(None);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(CacheError::Protocol);
    }
    let value = RespValue::Bulk(Some(buf[start..end].to_vec()));
    Ok(Some((Frame::Value(value), end + 2)))
}

/// Finds the CRLF-terminated line starting at `pos`.
fn read_line(buf: &[u8], pos: usize) -> CacheResult<Option<(&[u8], usize)>> {
    let rest = match buf.get(pos..) {
        Some(rest) => rest,
        None => return Ok(None),
    };
    let newline = match rest.iter().position(|&b| b == b'\n') {
        Some(idx) => idx,
        None => return Ok(None),
    };
    if newline == 0 || rest[newline - 1] != b'\r' {
        return Err(CacheError::Protocol);
    }
    Ok(Some((&rest[..newline - 1], pos + newline + 1)))
}

fn parse_i64(data: &[u8]) -> CacheResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(CacheError::Protocol),
    };
    if digits.is_empty() {
        return Err(CacheError::Protocol);
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(CacheError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(data: &[u8]) -> RespValue {
        let (value, used) = parse_value(data).unwrap().expect("complete reply");
        assert_eq!(used, data.len());
        value
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&Command::get(b"key"), &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_empty_argument() {
        let mut buf = Vec::new();
        encode_command(&Command::set(b"k", b""), &mut buf);
        assert_eq!(&buf, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n");
    }

    #[test]
    fn parses_simple_string() {
        assert_eq!(parse_all(b"+OK\r\n"), RespValue::Simple(b"OK".to_vec()));
    }

    #[test]
    fn parses_bulk_string() {
        assert_eq!(parse_all(b"$5\r\nhello\r\n"), RespValue::Bulk(Some(b"hello".to_vec())));
    }

    #[test]
    fn parses_empty_bulk_string_as_present() {
        assert_eq!(parse_all(b"$0\r\n\r\n"), RespValue::Bulk(Some(Vec::new())));
    }

    #[test]
    fn parses_null_bulk_string() {
        assert_eq!(parse_all(b"$-1\r\n"), RespValue::Bulk(None));
    }

    #[test]
    fn parses_integer() {
        assert_eq!(parse_all(b":42\r\n"), RespValue::Integer(42));
        assert_eq!(parse_all(b":-2\r\n"), RespValue::Integer(-2));
    }

    #[test]
    fn parses_error() {
        assert_eq!(parse_all(b"-ERR bad\r\n"), RespValue::Error(b"ERR bad".to_vec()));
    }

    #[test]
    fn parses_array_of_bulks() {
        let value = parse_all(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n");
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::Bulk(Some(b"a".to_vec())),
                RespValue::Bulk(Some(b"b".to_vec())),
            ])
        );
    }

    #[test]
    fn parses_empty_and_null_array() {
        assert_eq!(parse_all(b"*0\r\n"), RespValue::Array(Vec::new()));
        assert_eq!(parse_all(b"*-1\r\n"), RespValue::Array(Vec::new()));
    }

    #[test]
    fn partial_reply_needs_more_bytes() {
        assert_eq!(parse_value(b"").unwrap(), None);
        assert_eq!(parse_value(b"+OK").unwrap(), None);
        assert_eq!(parse_value(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_value(b"*2\r\n$1\r\na\r\n").unwrap(), None);
    }

    #[test]
    fn reports_consumed_prefix_only() {
        let (value, used) = parse_value(b":1\r\n+OK\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Integer(1));
        assert_eq!(used, 4);
    }

    #[test]
    fn resumes_across_reads() {
        let reply = b"*3\r\n$1\r\na\r\n*1\r\n:7\r\n$5\r\nhello\r\n";
        let mut parser = RespParser::new();
        for cut in [3, 9, 20, 27] {
            assert_eq!(parser.parse(&reply[..cut]).unwrap(), None, "prefix {cut}");
        }
        let (value, used) = parser.parse(reply).unwrap().expect("complete reply");
        assert_eq!(used, reply.len());
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::Bulk(Some(b"a".to_vec())),
                RespValue::Array(vec![RespValue::Integer(7)]),
                RespValue::Bulk(Some(b"hello".to_vec())),
            ])
        );

        // Starts over for the next reply.
        assert_eq!(parser.parse(b"+OK\r\n").unwrap(), Some((RespValue::Simple(b"OK".to_vec()), 5)));
    }

    #[test]
    fn parses_nesting_up_to_limit() {
        let mut data = b"*1\r\n".repeat(MAX_DEPTH);
        data.extend_from_slice(b":1\r\n");
        let mut value = parse_all(&data);
        for _ in 0..MAX_DEPTH {
            value = match value {
                RespValue::Array(mut items) => items.remove(0),
                other => panic!("expected array, got {other:?}"),
            };
        }
        assert_eq!(value, RespValue::Integer(1));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut data = b"*1\r\n".repeat(200_000);
        data.extend_from_slice(b":1\r\n");
        assert!(matches!(parse_value(&data), Err(CacheError::Protocol)));

        let mut parser = RespParser::new();
        let over = b"*1\r\n".repeat(MAX_DEPTH + 1);
        assert!(matches!(parser.parse(&over), Err(CacheError::Protocol)));
        assert_eq!(parser.parse(b":5\r\n").unwrap(), Some((RespValue::Integer(5), 4)));
    }

    #[test]
    fn rejects_bad_framing() {
        assert!(matches!(parse_value(b"?x\r\n"), Err(CacheError::Protocol)));
        assert!(matches!(parse_value(b"+OK\n"), Err(CacheError::Protocol)));
        assert!(matches!(parse_value(b":12a\r\n"), Err(CacheError::Protocol)));
        assert!(matches!(parse_value(b"$2\r\nabcd\r\n"), Err(CacheError::Protocol)));
    }
}
