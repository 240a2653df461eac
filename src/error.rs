use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

// ── Error taxonomy ─────────────────────────────────────────────────
//
//  RsedisError
//  ├── Redis            server replied with `-ERR …`; connection is reusable
//  ├── Connection       I/O failure           ┐
//  ├── Timeout          read/write/dial/pool  ├ transport: connection discarded
//  ├── Protocol         malformed reply       ┘
//  ├── Desync           unread bytes when the connection was returned
//  ├── TxFailed         EXEC aborted by a WATCHed key
//  ├── Nil              reply was nil where a value was required
//  ├── NoReply          command was never executed
//  ├── WaitTimeout      blocking command's server-side timeout elapsed
//  ├── Closed           client / pool / session is closed
//  ├── Sentinel         primary discovery failure
//  ├── Type             reply could not be decoded into the requested type
//  └── Incomplete       parser control flow, never surfaced to callers

/// Leading word of a server error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// EXECABORT Transaction discarded because of previous errors
    ExecAbort,
    /// LOADING Redis is loading the dataset in memory
    Loading,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// NOSCRIPT No matching script
    NoScript,
    /// BUSY Redis is busy running a script
    Busy,
    /// Any other Redis error prefix
    Other(String),
}

impl RedisErrorKind {
    /// Classify a server error message by its leading word.
    pub fn from_error_msg(msg: &str) -> Self {
        let prefix = msg.split_whitespace().next().unwrap_or("UNKNOWN");
        match prefix {
            "ERR" => Self::Err,
            "WRONGTYPE" => Self::WrongType,
            "EXECABORT" => Self::ExecAbort,
            "LOADING" => Self::Loading,
            "READONLY" => Self::ReadOnly,
            "NOSCRIPT" => Self::NoScript,
            "BUSY" => Self::Busy,
            other => Self::Other(other.to_string()),
        }
    }
}

/// All error variants for rsedis.
///
/// Cloneable so that a command's sticky error can be handed out by every
/// accessor without consuming the command.
#[derive(Debug, Clone)]
pub enum RsedisError {
    /// Socket failure, including EOF from the server.
    Connection(Arc<io::Error>),
    /// Reply bytes that are not valid RESP2.
    Protocol(String),
    /// The parser needs more bytes. Internal to the read loop.
    Incomplete,
    /// Error reply from the server.
    Redis {
        kind: RedisErrorKind,
        message: String,
    },
    /// Connection went back to the pool with unread input.
    Desync,
    /// EXEC returned a nil array: a watched key changed.
    TxFailed,
    /// Reply was nil.
    Nil,
    /// The command has not been executed yet.
    NoReply,
    /// A blocking command's server-side timeout elapsed without data.
    WaitTimeout(Duration),
    /// Client, pool, transaction or subscription is closed.
    Closed,
    /// The reply has a shape the requested type cannot hold.
    Type(String),
    /// A client-side deadline passed.
    Timeout(String),
    /// No monitor could name the primary.
    Sentinel(String),
}

impl RsedisError {
    /// Wrap a server error message, classifying it by its first word.
    pub fn redis(msg: impl Into<String>) -> Self {
        let message = msg.into();
        let kind = RedisErrorKind::from_error_msg(&message);
        Self::Redis { kind, message }
    }

    /// True when the connection that produced this error can no longer be
    /// trusted and must be discarded.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Protocol(_) | Self::Incomplete
        )
    }

    /// True for any timeout-classified error (client deadline, pool wait,
    /// subscription receive).
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Connection(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// True when this is a server-reported error reply.
    pub fn is_redis(&self) -> bool {
        matches!(self, Self::Redis { .. })
    }

    /// The server message, if this is a server-reported error.
    pub fn redis_message(&self) -> Option<&str> {
        match self {
            Self::Redis { message, .. } => Some(message),
            _ => None,
        }
    }

    pub(crate) fn closed_connection() -> Self {
        Self::Connection(Arc::new(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        )))
    }
}

impl fmt::Display for RsedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "connection error: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Incomplete => write!(f, "incomplete RESP message"),
            Self::Redis { message, .. } => write!(f, "redis error: {message}"),
            Self::Desync => write!(f, "connection returned with unread input"),
            Self::TxFailed => write!(f, "transaction failed: watched key modified"),
            Self::Nil => write!(f, "nil reply"),
            Self::NoReply => write!(f, "command has no reply"),
            Self::WaitTimeout(d) => write!(f, "blocking wait expired after {d:?}"),
            Self::Closed => write!(f, "client is closed"),
            Self::Type(msg) => write!(f, "type error: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Sentinel(msg) => write!(f, "sentinel error: {msg}"),
        }
    }
}

impl std::error::Error for RsedisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connection(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for RsedisError {
    fn from(e: io::Error) -> Self {
        Self::Connection(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, RsedisError>;

// ── Tests ──────────────────────────────────────────────────────────
