//! Commands and their replies.
//!
//! A [`Cmd`] carries its arguments, optional per-command timeouts and, once
//! executed, exactly one outcome. An error outcome is sticky: every accessor
//! reports it.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{RsedisError, Result};
use crate::resp::decode::FromResp;
use crate::resp::types::RespValue;

/// Conversion of a value into one binary-safe command argument.
pub trait ToArg {
    fn to_arg(&self) -> Bytes;
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

macro_rules! int_args {
    ($($t:ty),*) => {$(
        impl ToArg for $t {
            fn to_arg(&self) -> Bytes {
                Bytes::copy_from_slice(itoa::Buffer::new().format(*self).as_bytes())
            }
        }
    )*};
}

int_args!(i32, i64, u16, u32, u64, usize);

impl ToArg for f64 {
    fn to_arg(&self) -> Bytes {
        if self.is_infinite() {
            let s: &'static str = if *self > 0.0 { "+inf" } else { "-inf" };
            return Bytes::from_static(s.as_bytes());
        }
        Bytes::from(self.to_string())
    }
}

/// One command: verb, arguments, timeouts and (after execution) the reply.
#[derive(Clone, Default)]
pub struct Cmd {
    args: Vec<Bytes>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    reply: Option<Result<RespValue>>,
}

impl Cmd {
    /// Start a command with its verb.
    pub fn new<A: ToArg + ?Sized>(verb: &A) -> Self {
        Self {
            args: vec![verb.to_arg()],
            ..Self::default()
        }
    }

    /// Append an argument (builder style).
    pub fn arg<A: ToArg + ?Sized>(mut self, arg: &A) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Append several arguments (builder style).
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.args.extend(args.into_iter().map(|a| a.to_arg()));
        self
    }

    pub fn push_arg<A: ToArg + ?Sized>(&mut self, arg: &A) {
        self.args.push(arg.to_arg());
    }

    /// Override the read deadline for this command. `Duration::ZERO` means no
    /// deadline at all.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Override the write deadline for this command. `Duration::ZERO` means no
    /// deadline at all.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }

    /// Lower-cased verb, for logs and diagnostics.
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|v| String::from_utf8_lossy(v).to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Attach a reply. Error replies become the command's error. An error
    /// already recorded is never overwritten.
    pub(crate) fn set_reply(&mut self, value: RespValue) {
        match value {
            RespValue::Error(msg) => self.set_err(RsedisError::redis(msg)),
            value => {
                if !matches!(self.reply, Some(Err(_))) {
                    self.reply = Some(Ok(value));
                }
            }
        }
    }

    pub(crate) fn set_err(&mut self, err: RsedisError) {
        if !matches!(self.reply, Some(Err(_))) {
            self.reply = Some(Err(err));
        }
    }

    /// Forget any previous outcome so the command can be executed again.
    pub(crate) fn reset(&mut self) {
        self.reply = None;
    }

    /// The recorded error, if any.
    pub fn err(&self) -> Option<&RsedisError> {
        match &self.reply {
            Some(Err(e)) => Some(e),
            _ => None,
        }
    }

    pub fn has_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Borrow the raw reply.
    pub fn value(&self) -> Result<&RespValue> {
        match &self.reply {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(e.clone()),
            None => Err(RsedisError::NoReply),
        }
    }

    /// The raw reply, cloned.
    pub fn result(&self) -> Result<RespValue> {
        self.value().cloned()
    }

    /// Decode the reply into `T`.
    pub fn decode<T: FromResp>(&self) -> Result<T> {
        T::from_resp(self.result()?)
    }

    /// Move the outcome out of the command.
    pub fn into_result(self) -> Result<RespValue> {
        self.reply.unwrap_or(Err(RsedisError::NoReply))
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&String::from_utf8_lossy(arg))?;
        }
        match &self.reply {
            Some(Ok(v)) => write!(f, ": {v:?}"),
            Some(Err(e)) => write!(f, ": {e}"),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cmd({self})")
    }
}

// ── Builders ───────────────────────────────────────────────────────

pub fn ping() -> Cmd {
    Cmd::new("PING")
}

pub fn echo<V: ToArg + ?Sized>(message: &V) -> Cmd {
    Cmd::new("ECHO").arg(message)
}

pub fn get<K: ToArg + ?Sized>(key: &K) -> Cmd {
    Cmd::new("GET").arg(key)
}

pub fn set<K: ToArg + ?Sized, V: ToArg + ?Sized>(key: &K, value: &V) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// SET with an expiry; sub-second precision uses PX.
pub fn set_ex<K: ToArg + ?Sized, V: ToArg + ?Sized>(key: &K, value: &V, ttl: Duration) -> Cmd {
    let cmd = Cmd::new("SET").arg(key).arg(value);
    if ttl.subsec_millis() == 0 {
        cmd.arg("EX").arg(&ttl.as_secs())
    } else {
        cmd.arg("PX").arg(&(ttl.as_millis() as u64))
    }
}

pub fn incr<K: ToArg + ?Sized>(key: &K) -> Cmd {
    Cmd::new("INCR").arg(key)
}

pub fn incr_by<K: ToArg + ?Sized>(key: &K, delta: i64) -> Cmd {
    Cmd::new("INCRBY").arg(key).arg(&delta)
}

pub fn del<I>(keys: I) -> Cmd
where
    I: IntoIterator,
    I::Item: ToArg,
{
    Cmd::new("DEL").args(keys)
}

pub fn exists<I>(keys: I) -> Cmd
where
    I: IntoIterator,
    I::Item: ToArg,
{
    Cmd::new("EXISTS").args(keys)
}

pub fn rpush<K, I>(key: &K, values: I) -> Cmd
where
    K: ToArg + ?Sized,
    I: IntoIterator,
    I::Item: ToArg,
{
    Cmd::new("RPUSH").arg(key).args(values)
}

pub fn lrange<K: ToArg + ?Sized>(key: &K, start: i64, stop: i64) -> Cmd {
    Cmd::new("LRANGE").arg(key).arg(&start).arg(&stop)
}

/// Whole seconds sent as a blocking timeout: `timeout` rounded up, so the
/// server never gives up early. Zero stays zero (block forever).
pub fn blocking_secs(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

/// Blocking left pop. `timeout` is rounded up to whole seconds (see
/// [`blocking_secs`]). The read deadline is that plus one second so the
/// server always answers first; a zero `timeout` blocks forever and so gets
/// no read deadline.
pub fn blpop<I>(keys: I, timeout: Duration) -> Cmd
where
    I: IntoIterator,
    I::Item: ToArg,
{
    let secs = blocking_secs(timeout);
    let read_timeout = if secs == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(secs + 1)
    };
    Cmd::new("BLPOP")
        .args(keys)
        .arg(&secs)
        .with_read_timeout(read_timeout)
}

pub fn publish<C: ToArg + ?Sized, M: ToArg + ?Sized>(channel: &C, message: &M) -> Cmd {
    Cmd::new("PUBLISH").arg(channel).arg(message)
}

pub fn watch<I>(keys: I) -> Cmd
where
    I: IntoIterator,
    I::Item: ToArg,
{
    Cmd::new("WATCH").args(keys)
}

pub fn unwatch() -> Cmd {
    Cmd::new("UNWATCH")
}

pub fn flushdb() -> Cmd {
    Cmd::new("FLUSHDB")
}

pub fn scan(cursor: u64, pattern: Option<&str>, count: Option<u64>) -> Cmd {
    let mut cmd = Cmd::new("SCAN").arg(&cursor);
    if let Some(pattern) = pattern {
        cmd = cmd.arg("MATCH").arg(pattern);
    }
    if let Some(count) = count {
        cmd = cmd.arg("COUNT").arg(&count);
    }
    cmd
}

pub fn hgetall<K: ToArg + ?Sized>(key: &K) -> Cmd {
    Cmd::new("HGETALL").arg(key)
}

pub fn zrange_withscores<K: ToArg + ?Sized>(key: &K, start: i64, stop: i64) -> Cmd {
    Cmd::new("ZRANGE")
        .arg(key)
        .arg(&start)
        .arg(&stop)
        .arg("WITHSCORES")
}

// ── Tests ──────────────────────────────────────────────────────────
