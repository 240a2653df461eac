//! Typed reply decoders.
//!
//! [`FromResp`] turns a parsed [`RespValue`] into the shape a command
//! promises. Error replies become [`RsedisError::Redis`]. A nil reply decodes
//! to `None` for `Option<T>` and to [`RsedisError::Nil`] for every other
//! target, so "absent" never collapses into a zero value.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{RsedisError, Result};
use crate::resp::types::RespValue;

/// Conversion from a reply tree into a Rust value.
pub trait FromResp: Sized {
    fn from_resp(value: RespValue) -> Result<Self>;
}

/// A sorted-set member with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ZMember {
    pub member: String,
    pub score: f64,
}

/// One page of a SCAN-family iteration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Reject error replies and nil markers before a typed conversion.
fn present(value: RespValue) -> Result<RespValue> {
    match value {
        RespValue::Error(msg) => Err(RsedisError::redis(msg)),
        RespValue::Null | RespValue::NullArray => Err(RsedisError::Nil),
        other => Ok(other),
    }
}

fn type_error(expected: &str, got: &RespValue) -> RsedisError {
    RsedisError::Type(format!("expected {expected}, got {}", got.type_name()))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| RsedisError::Type(format!("invalid UTF-8: {e}")))
}

impl FromResp for RespValue {
    fn from_resp(value: RespValue) -> Result<Self> {
        match value {
            RespValue::Error(msg) => Err(RsedisError::redis(msg)),
            other => Ok(other),
        }
    }
}

impl FromResp for String {
    fn from_resp(value: RespValue) -> Result<Self> {
        match present(value)? {
            RespValue::SimpleString(s) => Ok(s),
            RespValue::BulkString(b) => Ok(utf8(&b)?.to_string()),
            RespValue::Integer(i) => Ok(i.to_string()),
            other => Err(type_error("string", &other)),
        }
    }
}

impl FromResp for Bytes {
    fn from_resp(value: RespValue) -> Result<Self> {
        match present(value)? {
            RespValue::BulkString(b) => Ok(b),
            RespValue::SimpleString(s) => Ok(Bytes::from(s)),
            other => Err(type_error("bulk string", &other)),
        }
    }
}

impl FromResp for i64 {
    fn from_resp(value: RespValue) -> Result<Self> {
        match present(value)? {
            RespValue::Integer(i) => Ok(i),
            RespValue::BulkString(b) => utf8(&b)?
                .parse()
                .map_err(|e| RsedisError::Type(format!("invalid integer: {e}"))),
            RespValue::SimpleString(s) => s
                .parse()
                .map_err(|e| RsedisError::Type(format!("invalid integer: {e}"))),
            other => Err(type_error("integer", &other)),
        }
    }
}

impl FromResp for u64 {
    fn from_resp(value: RespValue) -> Result<Self> {
        match present(value)? {
            RespValue::Integer(i) => u64::try_from(i)
                .map_err(|_| RsedisError::Type(format!("negative value {i} for u64"))),
            RespValue::BulkString(b) => utf8(&b)?
                .parse()
                .map_err(|e| RsedisError::Type(format!("invalid unsigned integer: {e}"))),
            RespValue::SimpleString(s) => s
                .parse()
                .map_err(|e| RsedisError::Type(format!("invalid unsigned integer: {e}"))),
            other => Err(type_error("unsigned integer", &other)),
        }
    }
}

impl FromResp for f64 {
    fn from_resp(value: RespValue) -> Result<Self> {
        let parse = |s: &str| -> Result<f64> {
            match s {
                "inf" | "+inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                _ => s
                    .parse()
                    .map_err(|e| RsedisError::Type(format!("invalid float: {e}"))),
            }
        };
        match present(value)? {
            RespValue::Integer(i) => Ok(i as f64),
            RespValue::BulkString(b) => parse(utf8(&b)?),
            RespValue::SimpleString(s) => parse(&s),
            other => Err(type_error("float", &other)),
        }
    }
}

impl FromResp for bool {
    fn from_resp(value: RespValue) -> Result<Self> {
        match present(value)? {
            RespValue::Integer(i) => Ok(i != 0),
            RespValue::SimpleString(s) => Ok(s == "OK"),
            other => Err(type_error("boolean", &other)),
        }
    }
}

impl FromResp for () {
    fn from_resp(value: RespValue) -> Result<Self> {
        present(value).map(|_| ())
    }
}

impl<T: FromResp> FromResp for Option<T> {
    fn from_resp(value: RespValue) -> Result<Self> {
        match value {
            RespValue::Null | RespValue::NullArray => Ok(None),
            other => T::from_resp(other).map(Some),
        }
    }
}

impl<T: FromResp> FromResp for Vec<T> {
    fn from_resp(value: RespValue) -> Result<Self> {
        match present(value)? {
            RespValue::Array(items) => items.into_iter().map(T::from_resp).collect(),
            other => Err(type_error("array", &other)),
        }
    }
}

impl<A: FromResp, B: FromResp> FromResp for (A, B) {
    fn from_resp(value: RespValue) -> Result<Self> {
        match present(value)? {
            RespValue::Array(items) if items.len() == 2 => {
                let mut it = items.into_iter();
                match (it.next(), it.next()) {
                    (Some(a), Some(b)) => Ok((A::from_resp(a)?, B::from_resp(b)?)),
                    _ => Err(RsedisError::Type("expected 2-element array".into())),
                }
            }
            other => Err(type_error("2-element array", &other)),
        }
    }
}

impl FromResp for HashMap<String, String> {
    fn from_resp(value: RespValue) -> Result<Self> {
        let items = match present(value)? {
            RespValue::Array(items) => items,
            other => return Err(type_error("array", &other)),
        };
        if items.len() % 2 != 0 {
            return Err(RsedisError::Type(format!(
                "expected even number of elements, got {}",
                items.len()
            )));
        }
        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut it = items.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            map.insert(String::from_resp(k)?, String::from_resp(v)?);
        }
        Ok(map)
    }
}

impl FromResp for ScanPage {
    fn from_resp(value: RespValue) -> Result<Self> {
        let (cursor, keys) = <(u64, Vec<String>)>::from_resp(value)?;
        Ok(ScanPage { cursor, keys })
    }
}

/// Decode a `WITHSCORES` reply (`[member, score, member, score, …]`).
pub fn zmembers(value: RespValue) -> Result<Vec<ZMember>> {
    let items = match present(value)? {
        RespValue::Array(items) => items,
        other => return Err(type_error("array", &other)),
    };
    if items.len() % 2 != 0 {
        return Err(RsedisError::Type(format!(
            "expected member/score pairs, got {} elements",
            items.len()
        )));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    while let (Some(m), Some(s)) = (it.next(), it.next()) {
        out.push(ZMember {
            member: String::from_resp(m)?,
            score: f64::from_resp(s)?,
        });
    }
    Ok(out)
}

// ── Tests ──────────────────────────────────────────────────────────
