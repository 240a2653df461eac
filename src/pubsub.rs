//! Publish/subscribe sessions.
//!
//! A [`PubSub`] owns a dedicated connection that the pool does not count.
//! Subscription commands are written without waiting for their
//! acknowledgement; acknowledgements arrive through [`PubSub::receive`] like
//! any other message.

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::cmd::ToArg;
use crate::connection::tcp::RedisConnection;
use crate::error::{RsedisError, Result};
use crate::resp::decode::FromResp;
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
}

impl SubscriptionKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            "psubscribe" => Some(Self::PSubscribe),
            "punsubscribe" => Some(Self::PUnsubscribe),
            _ => None,
        }
    }
}

/// One event pushed by the server.
///
/// Payloads are raw bytes; channel and pattern names are text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// (Un)subscribe acknowledgement with the remaining subscription count.
    /// `channel` is empty when unsubscribing with nothing subscribed.
    Subscription {
        kind: SubscriptionKind,
        channel: String,
        count: i64,
    },
    Message {
        channel: String,
        payload: Bytes,
    },
    PMessage {
        pattern: String,
        channel: String,
        payload: Bytes,
    },
    Pong {
        payload: String,
    },
}

impl Message {
    fn from_resp(value: RespValue) -> Result<Self> {
        let items = match value {
            RespValue::Array(items) => items,
            // PING outside subscribed mode.
            RespValue::SimpleString(s) if s.eq_ignore_ascii_case("PONG") => {
                return Ok(Message::Pong {
                    payload: String::new(),
                })
            }
            RespValue::Error(msg) => return Err(RsedisError::redis(msg)),
            other => {
                return Err(RsedisError::Protocol(format!(
                    "unexpected pub/sub reply: {}",
                    other.type_name()
                )))
            }
        };

        let mut it = items.into_iter();
        let kind: String = match it.next() {
            Some(v) => String::from_resp(v)?,
            None => return Err(RsedisError::Protocol("empty pub/sub reply".into())),
        };
        let mut next = || {
            it.next()
                .ok_or_else(|| RsedisError::Protocol(format!("short {kind} reply")))
        };

        match kind.as_str() {
            "message" => Ok(Message::Message {
                channel: nil_as_default(next()?)?,
                payload: nil_as_default(next()?)?,
            }),
            "pmessage" => Ok(Message::PMessage {
                pattern: nil_as_default(next()?)?,
                channel: nil_as_default(next()?)?,
                payload: nil_as_default(next()?)?,
            }),
            "pong" => Ok(Message::Pong {
                payload: nil_as_default(next()?)?,
            }),
            name => match SubscriptionKind::from_name(name) {
                Some(kind) => {
                    let channel = nil_as_default(next()?)?;
                    let count = nil_as_default::<String>(next()?)?
                        .parse()
                        .map_err(|e| RsedisError::Type(format!("invalid subscription count: {e}")))?;
                    Ok(Message::Subscription {
                        kind,
                        channel,
                        count,
                    })
                }
                None => Err(RsedisError::Protocol(format!("unknown pub/sub message kind: {name}"))),
            },
        }
    }
}

fn nil_as_default<T: FromResp + Default>(value: RespValue) -> Result<T> {
    Ok(Option::<T>::from_resp(value)?.unwrap_or_default())
}

/// A subscription session on a dedicated connection.
pub struct PubSub {
    conn: Option<RedisConnection>,
    channels: BTreeSet<String>,
    patterns: BTreeSet<String>,
}

impl PubSub {
    pub(crate) fn new(conn: RedisConnection) -> Self {
        Self {
            conn: Some(conn),
            channels: BTreeSet::new(),
            patterns: BTreeSet::new(),
        }
    }

    fn conn(&mut self) -> Result<&mut RedisConnection> {
        self.conn.as_mut().ok_or(RsedisError::Closed)
    }

    async fn send(&mut self, verb: &str, names: &[String]) -> Result<()> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(names.len() + 1);
        args.push(verb.as_bytes());
        args.extend(names.iter().map(|n| n.as_bytes()));
        let wire = encode_command(&args);
        self.conn()?.send_raw(&wire).await
    }

    fn names<I>(names: I) -> Vec<String>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        names
            .into_iter()
            .map(|n| String::from_utf8_lossy(&n.to_arg()).into_owned())
            .collect()
    }

    /// Subscribe to `channels`. An empty list sends nothing.
    pub async fn subscribe<I>(&mut self, channels: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        let channels = Self::names(channels);
        if channels.is_empty() {
            return Ok(());
        }
        self.send("SUBSCRIBE", &channels).await?;
        self.channels.extend(channels);
        Ok(())
    }

    /// Unsubscribe from `channels`; an empty list unsubscribes from all.
    pub async fn unsubscribe<I>(&mut self, channels: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        let channels = Self::names(channels);
        self.send("UNSUBSCRIBE", &channels).await?;
        if channels.is_empty() {
            self.channels.clear();
        } else {
            for c in &channels {
                self.channels.remove(c);
            }
        }
        Ok(())
    }

    /// Subscribe to glob `patterns`. An empty list sends nothing.
    pub async fn psubscribe<I>(&mut self, patterns: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        let patterns = Self::names(patterns);
        if patterns.is_empty() {
            return Ok(());
        }
        self.send("PSUBSCRIBE", &patterns).await?;
        self.patterns.extend(patterns);
        Ok(())
    }

    /// Unsubscribe from `patterns`; an empty list unsubscribes from all.
    pub async fn punsubscribe<I>(&mut self, patterns: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        let patterns = Self::names(patterns);
        self.send("PUNSUBSCRIBE", &patterns).await?;
        if patterns.is_empty() {
            self.patterns.clear();
        } else {
            for p in &patterns {
                self.patterns.remove(p);
            }
        }
        Ok(())
    }

    /// Send PING; the answer arrives as [`Message::Pong`].
    pub async fn ping(&mut self, payload: Option<&str>) -> Result<()> {
        let payload: Vec<String> = payload.map(str::to_string).into_iter().collect();
        self.send("PING", &payload).await
    }

    /// Wait for the next message.
    pub async fn receive(&mut self) -> Result<Message> {
        let value = self.conn()?.read_response().await?;
        Message::from_resp(value)
    }

    /// Wait at most `timeout` for the next message.
    ///
    /// Expiry is a timeout-classified error; the session stays usable and a
    /// partially received message is kept for the next call.
    pub async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        let conn = self.conn()?;
        match tokio::time::timeout(timeout, conn.read_response()).await {
            Ok(value) => Message::from_resp(value?),
            Err(_) => Err(RsedisError::Timeout(format!(
                "no pub/sub message within {timeout:?}"
            ))),
        }
    }

    /// Channels this session is subscribed to.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    /// Patterns this session is subscribed to.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(String::as_str)
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Close the dedicated connection. Later calls fail with
    /// [`RsedisError::Closed`].
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(addr = conn.addr(), "pub/sub session closed");
        }
        self.channels.clear();
        self.patterns.clear();
    }
}
