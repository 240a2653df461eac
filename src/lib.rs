//! Async Redis connection runtime.
//!
//! A [`Client`] owns a bounded [`ConnectionPool`] and runs single commands,
//! [pipelines](Pipeline), [transactions](Tx) and [pub/sub sessions](PubSub)
//! over RESP2. Sentinel deployments are followed through
//! [`SentinelFailover`], which evicts pooled connections when the primary
//! moves.

pub mod client;
pub mod cmd;
pub mod config;
pub mod connection;
pub mod error;
pub mod multi;
pub mod pipeline;
pub mod pubsub;
pub mod resp;
pub mod sentinel;

pub use client::Client;
pub use cmd::{Cmd, ToArg};
pub use config::{ConnectionConfig, Topology};
pub use connection::{
    ConnFilter, ConnectionPool, DialFuture, Dialer, PoolEvent, PoolEvents, PoolGuard,
    RedisConnection, TcpDialer,
};
#[cfg(unix)]
pub use connection::UnixDialer;
pub use error::{RedisErrorKind, Result, RsedisError};
pub use multi::Tx;
pub use pipeline::Pipeline;
pub use pubsub::{Message, PubSub, SubscriptionKind};
pub use resp::{FromResp, RespValue, ScanPage, ZMember};
pub use sentinel::{SentinelDialer, SentinelFailover};
