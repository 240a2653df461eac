//! Connection factories.
//!
//! The pool never knows where connections come from; it asks a [`Dialer`].
//! Standalone clients dial a fixed TCP address or unix socket, sentinel
//! clients dial whatever primary the monitors currently report.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::connection::tcp::RedisConnection;
use crate::error::Result;

/// Future returned by [`Dialer::dial`].
pub type DialFuture<'a> = Pin<Box<dyn Future<Output = Result<RedisConnection>> + Send + 'a>>;

/// Produces new, uninitialized connections.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self) -> DialFuture<'_>;
}

/// Dials a fixed TCP address.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
    connect_timeout: Option<Duration>,
    max_buf_size: usize,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>, connect_timeout: Option<Duration>, max_buf_size: usize) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            max_buf_size,
        }
    }

    /// Dialer for the primary address of a standalone config.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            config.primary_addr(),
            config.connect_timeout(),
            config.max_buffer_size,
        )
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Dialer for TcpDialer {
    fn dial(&self) -> DialFuture<'_> {
        Box::pin(async move {
            tracing::debug!(addr = %self.addr, "dialing");
            RedisConnection::connect_timeout(&self.addr, self.connect_timeout, self.max_buf_size)
                .await
        })
    }
}

/// Dials a unix domain socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixDialer {
    path: String,
    connect_timeout: Option<Duration>,
    max_buf_size: usize,
}

#[cfg(unix)]
impl UnixDialer {
    pub fn new(path: impl Into<String>, connect_timeout: Option<Duration>, max_buf_size: usize) -> Self {
        Self {
            path: path.into(),
            connect_timeout,
            max_buf_size,
        }
    }
}

#[cfg(unix)]
impl Dialer for UnixDialer {
    fn dial(&self) -> DialFuture<'_> {
        Box::pin(async move {
            tracing::debug!(path = %self.path, "dialing unix socket");
            RedisConnection::connect_unix(&self.path, self.connect_timeout, self.max_buf_size).await
        })
    }
}
