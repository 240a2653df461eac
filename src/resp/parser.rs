//! Streaming RESP2 reply parser.
//!
//! [`parse`] takes a byte buffer and returns `Ok((RespValue, bytes_consumed))`,
//! `Err(Incomplete)` when more data is needed, or `Err(Protocol(…))` on
//! malformed input.
//!
//! Bulk strings are extracted with `Bytes::slice`, so they share the read
//! buffer's allocation instead of copying.

use bytes::Bytes;
use memchr::memchr;

use crate::error::{RsedisError, Result};
use crate::resp::types::RespValue;

/// Cap on up-front element allocation; a length prefix is untrusted input.
const MAX_PREALLOC: usize = 1024;

/// Parse one RESP value from the front of `buf`.
///
/// Returns `(value, bytes_consumed)` on success and `Err(Incomplete)` when
/// the buffer holds only part of a reply; callers read more and retry.
pub fn parse(buf: &Bytes) -> Result<(RespValue, usize)> {
    let mut cursor = Cursor { buf, pos: 0 };
    let value = cursor.value()?;
    Ok((value, cursor.pos))
}

/// Parse from a byte slice (copies into `Bytes` first).
pub fn parse_slice(buf: &[u8]) -> Result<(RespValue, usize)> {
    parse(&Bytes::copy_from_slice(buf))
}

/// Read position over a buffer that may end mid-reply.
struct Cursor<'a> {
    buf: &'a Bytes,
    pos: usize,
}

impl Cursor<'_> {
    fn value(&mut self) -> Result<RespValue> {
        let tag = *self.buf.get(self.pos).ok_or(RsedisError::Incomplete)?;
        self.pos += 1;
        match tag {
            b'+' => {
                let line = self.line()?;
                Ok(RespValue::SimpleString(simple_string(line)?))
            }
            b'-' => {
                let line = self.line()?;
                Ok(RespValue::Error(String::from_utf8_lossy(line).into_owned()))
            }
            b':' => Ok(RespValue::Integer(self.int()?)),
            b'$' => self.bulk(),
            b'*' => self.array(),
            other => Err(RsedisError::Protocol(format!(
                "unknown RESP type byte: 0x{other:02x}"
            ))),
        }
    }

    /// The bytes up to the next CRLF; the cursor moves past it.
    fn line(&mut self) -> Result<&[u8]> {
        let start = self.pos;
        let cr = start
            + memchr(b'\r', &self.buf[start..]).ok_or(RsedisError::Incomplete)?;
        match self.buf.get(cr + 1) {
            None => Err(RsedisError::Incomplete),
            Some(b'\n') => {
                self.pos = cr + 2;
                Ok(&self.buf[start..cr])
            }
            Some(_) => Err(RsedisError::Protocol("expected \\n after \\r".into())),
        }
    }

    fn int(&mut self) -> Result<i64> {
        let line = self.line()?;
        parse_int(line)
    }

    /// Length header of a bulk string or array; `None` for the `-1` nil form.
    fn length(&mut self, what: &str) -> Result<Option<usize>> {
        match self.int()? {
            -1 => Ok(None),
            n if n < 0 => Err(RsedisError::Protocol(format!("invalid {what} length: {n}"))),
            n => usize::try_from(n)
                .map(Some)
                .map_err(|_| RsedisError::Protocol(format!("{what} length {n} out of range"))),
        }
    }

    fn bulk(&mut self) -> Result<RespValue> {
        let Some(len) = self.length("bulk")? else {
            return Ok(RespValue::Null);
        };
        let start = self.pos;
        let end = start
            .checked_add(len)
            .ok_or_else(|| RsedisError::Protocol("bulk length overflow".into()))?;
        match self.buf.get(end..end + 2) {
            None => Err(RsedisError::Incomplete),
            Some(b"\r\n") => {
                self.pos = end + 2;
                Ok(RespValue::BulkString(self.buf.slice(start..end)))
            }
            Some(_) => Err(RsedisError::Protocol(
                "bulk string not terminated by \\r\\n".into(),
            )),
        }
    }

    fn array(&mut self) -> Result<RespValue> {
        let Some(count) = self.length("array")? else {
            return Ok(RespValue::NullArray);
        };
        let mut items = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            items.push(self.value()?);
        }
        Ok(RespValue::Array(items))
    }
}

/// Status lines are ASCII in practice; the frequent ones skip validation.
fn simple_string(line: &[u8]) -> Result<String> {
    let s = match line {
        b"OK" => "OK",
        b"QUEUED" => "QUEUED",
        b"PONG" => "PONG",
        other => std::str::from_utf8(other)
            .map_err(|e| RsedisError::Protocol(format!("status line is not UTF-8: {e}")))?,
    };
    Ok(s.to_owned())
}

/// Decimal integer with optional sign, rejecting overflow.
fn parse_int(line: &[u8]) -> Result<i64> {
    let (negative, digits) = match line.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some((b'+', rest)) => (false, rest),
        Some(_) => (false, line),
        None => return Err(RsedisError::Protocol("empty integer".into())),
    };
    if digits.is_empty() {
        return Err(RsedisError::Protocol("integer has no digits".into()));
    }

    // Build the value negatively so i64::MIN fits.
    let overflow = || RsedisError::Protocol("integer overflow".into());
    let mut acc: i64 = 0;
    for &d in digits {
        if !d.is_ascii_digit() {
            return Err(RsedisError::Protocol(format!(
                "invalid byte in integer: 0x{d:02x}"
            )));
        }
        acc = acc
            .checked_mul(10)
            .and_then(|v| v.checked_sub(i64::from(d - b'0')))
            .ok_or_else(overflow)?;
    }
    if negative {
        Ok(acc)
    } else {
        acc.checked_neg().ok_or_else(overflow)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
