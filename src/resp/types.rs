use bytes::Bytes;

/// One RESP2 reply.
///
/// The two nil markers are kept apart: `$-1` is [`RespValue::Null`] and
/// `*-1` is [`RespValue::NullArray`]. EXEC uses the latter to report an
/// aborted transaction, which must not be confused with an empty `*0`.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Status line, `+OK`.
    SimpleString(String),
    /// Error line, `-ERR message`. Kept as a value so that one failed reply
    /// inside a pipeline or EXEC result does not abort decoding the rest.
    Error(String),
    /// `:1000`
    Integer(i64),
    /// Length-prefixed binary payload, `$6` followed by `foobar`.
    BulkString(Bytes),
    /// `*N` followed by N nested replies.
    Array(Vec<RespValue>),
    /// Nil bulk string, `$-1`.
    Null,
    /// Nil array, `*-1`.
    NullArray,
}

impl RespValue {
    /// Text of a status or bulk reply, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::SimpleString(s) => Some(s),
            Self::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Raw payload of a status or bulk reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::BulkString(b) => Some(b),
            Self::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Value of an integer reply.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Elements of a non-nil array reply.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// `true` for either nil marker.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::NullArray)
    }

    /// `true` for an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Message of an error reply.
    pub fn as_error_msg(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Short name of the reply kind, used in type-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple_string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk_string",
            Self::Array(_) => "array",
            Self::Null => "null",
            Self::NullArray => "null_array",
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
