//! A single connection to a Redis server.
//!
//! [`RedisConnection`] owns a byte stream (TCP, a unix socket, or an
//! in-memory duplex in tests) plus the read buffer the RESP parser works on.
//! Reads and writes run under the connection's current deadlines. A transport
//! failure of any kind marks the connection broken, after which the pool
//! refuses to hand it out again.

use std::future::Future;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{RsedisError, Result};
use crate::resp::parser::parse;
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command;

const INITIAL_BUF_CAPACITY: usize = 64 * 1024;

/// Spare room requested before each socket read.
const MIN_READ_SPACE: usize = 4 * 1024;

/// Default ceiling for one connection's read buffer (512 MiB).
pub const DEFAULT_MAX_BUF_SIZE: usize = 512 * 1024 * 1024;

/// Byte stream a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub struct RedisConnection {
    stream: Box<dyn AsyncStream>,
    /// Bytes received but not yet parsed into a reply.
    buf: BytesMut,
    max_buf_size: usize,
    /// `host:port` or socket path this connection was opened to.
    addr: String,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    broken: bool,
    /// Pool generation this connection was dialed in.
    pub(crate) generation: u64,
    /// Time of the last completed read or write.
    pub last_used: Instant,
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("addr", &self.addr)
            .field("buffered", &self.buf.len())
            .field("broken", &self.broken)
            .finish()
    }
}

impl RedisConnection {
    /// Adopt a stream that is already connected to `addr`.
    pub fn from_stream<S>(stream: S, addr: impl Into<String>, max_buf_size: usize) -> Self
    where
        S: AsyncStream + 'static,
    {
        Self {
            stream: Box::new(stream),
            buf: BytesMut::with_capacity(INITIAL_BUF_CAPACITY),
            max_buf_size,
            addr: addr.into(),
            read_timeout: None,
            write_timeout: None,
            broken: false,
            generation: 0,
            last_used: Instant::now(),
        }
    }

    /// Open a TCP connection with no connect deadline.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_timeout(addr, None, DEFAULT_MAX_BUF_SIZE).await
    }

    pub async fn connect_timeout(
        addr: &str,
        timeout: Option<Duration>,
        max_buf_size: usize,
    ) -> Result<Self> {
        let stream = with_deadline(timeout, TcpStream::connect(addr), || {
            format!("connecting to {addr}")
        })
        .await??;
        // Replies are small and latency bound.
        stream.set_nodelay(true).ok();
        Ok(Self::from_stream(stream, addr, max_buf_size))
    }

    #[cfg(unix)]
    pub async fn connect_unix(
        path: &str,
        timeout: Option<Duration>,
        max_buf_size: usize,
    ) -> Result<Self> {
        let stream = with_deadline(timeout, tokio::net::UnixStream::connect(path), || {
            format!("connecting to {path}")
        })
        .await??;
        Ok(Self::from_stream(stream, path, max_buf_size))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Bytes arrived that no caller has read yet. Replies on such a
    /// connection no longer line up with requests.
    pub fn has_pending_input(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Deadlines for subsequent reads and writes; `None` waits forever.
    pub fn set_timeouts(&mut self, read: Option<Duration>, write: Option<Duration>) {
        self.read_timeout = read;
        self.write_timeout = write;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Write already-encoded bytes.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        let addr = &self.addr;
        let written = with_deadline(self.write_timeout, self.stream.write_all(data), || {
            format!("writing to {addr}")
        })
        .await
        .and_then(|io| io.map_err(RsedisError::from));
        self.track(written)
    }

    /// Read the next complete reply.
    ///
    /// Cancel-safe: dropping the future keeps any partial reply buffered.
    pub async fn read_response(&mut self) -> Result<RespValue> {
        let addr = self.addr.clone();
        let read = with_deadline(self.read_timeout, self.read_value(), || {
            format!("reading from {addr}")
        })
        .await
        .and_then(|r| r);
        self.track(read)
    }

    /// Record the outcome of an I/O step.
    fn track<T>(&mut self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(v) => {
                self.last_used = Instant::now();
                Ok(v)
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    async fn read_value(&mut self) -> Result<RespValue> {
        loop {
            if let Some(value) = self.take_buffered()? {
                return Ok(value);
            }
            self.reserve_read_space()?;
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(RsedisError::closed_connection());
            }
        }
    }

    /// Parse one reply from the buffer if a whole one has arrived.
    fn take_buffered(&mut self) -> Result<Option<RespValue>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        // Bulk payloads become slices of the frozen chunk.
        let chunk = self.buf.split().freeze();
        let parsed = parse(&chunk);
        let unread = match &parsed {
            Ok((_, used)) => &chunk[*used..],
            Err(_) => &chunk[..],
        };
        self.buf.extend_from_slice(unread);
        match parsed {
            Ok((value, _)) => Ok(Some(value)),
            Err(RsedisError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Grow the buffer by doubling, never past `max_buf_size`.
    fn reserve_read_space(&mut self) -> Result<()> {
        let cap = self.buf.capacity();
        if cap - self.buf.len() >= MIN_READ_SPACE {
            return Ok(());
        }
        if cap >= self.max_buf_size {
            return Err(RsedisError::Protocol(format!(
                "reply does not fit in the {} byte read buffer",
                self.max_buf_size
            )));
        }
        let target = (cap * 2).max(INITIAL_BUF_CAPACITY).min(self.max_buf_size);
        self.buf.reserve(target - self.buf.len());
        Ok(())
    }

    /// Round trip one command.
    ///
    /// A server error reply is `Ok(RespValue::Error)`; `Err` means the
    /// transport failed.
    pub async fn execute<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<RespValue> {
        self.send_raw(&encode_command(args)).await?;
        self.read_response().await
    }

    pub async fn auth(&mut self, username: Option<&str>, password: &str) -> Result<()> {
        let reply = match username {
            Some(user) => self.execute(&["AUTH", user, password]).await?,
            None => self.execute(&["AUTH", password]).await?,
        };
        expect_ok("AUTH", reply)
    }

    /// SELECT `db`; a no-op for database 0.
    pub async fn select_db(&mut self, db: u16) -> Result<()> {
        if db == 0 {
            return Ok(());
        }
        let mut digits = itoa::Buffer::new();
        let reply = self.execute(&["SELECT", digits.format(db)]).await?;
        expect_ok("SELECT", reply)
    }

    /// `true` when the server answered PONG.
    pub async fn ping(&mut self) -> Result<bool> {
        let reply = self.execute(&["PING"]).await?;
        Ok(matches!(&reply, RespValue::SimpleString(s) if s == "PONG"))
    }

    /// Handshake for a fresh connection: AUTH when a password is set, then
    /// SELECT.
    pub async fn init(
        &mut self,
        username: Option<&str>,
        password: Option<&str>,
        db: u16,
    ) -> Result<()> {
        if let Some(password) = password {
            self.auth(username, password).await?;
        }
        self.select_db(db).await
    }
}

fn expect_ok(verb: &str, reply: RespValue) -> Result<()> {
    match reply {
        RespValue::SimpleString(s) if s == "OK" => Ok(()),
        RespValue::Error(msg) => Err(RsedisError::redis(msg)),
        other => Err(RsedisError::Protocol(format!(
            "{verb} answered with {} instead of OK",
            other.type_name()
        ))),
    }
}

/// Await `fut`, giving up with [`RsedisError::Timeout`] once `deadline`
/// passes. `what` names the operation in the error message.
pub(crate) async fn with_deadline<F, M>(
    deadline: Option<Duration>,
    fut: F,
    what: M,
) -> Result<F::Output>
where
    F: Future,
    M: FnOnce() -> String,
{
    let Some(limit) = deadline else {
        return Ok(fut.await);
    };
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| RsedisError::Timeout(format!("{} timed out after {limit:?}", what())))
}

// ── Tests ──────────────────────────────────────────────────────────
