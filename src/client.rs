//! Redis client.
//!
//! A [`Client`] owns a connection pool and executes one command per pooled
//! checkout. Pipelines, transactions and pub/sub sessions are created from
//! it. The client is cheap to clone; clones share the pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::cmd::{self, Cmd, ToArg};
use crate::config::{ConnectionConfig, Topology};
use crate::connection::dialer::{Dialer, TcpDialer};
use crate::connection::pool::{ConnectionPool, PoolGuard};
use crate::connection::tcp::RedisConnection;
use crate::error::{RsedisError, Result};
use crate::multi::Tx;
use crate::pipeline::Pipeline;
use crate::pubsub::PubSub;
use crate::resp::decode::{zmembers, FromResp, ScanPage, ZMember};
use crate::sentinel::{SentinelDialer, SentinelFailover};

/// Combine a per-command override with the client default.
///
/// An override of `Duration::ZERO` removes the deadline entirely.
pub(crate) fn effective(over: Option<Duration>, default: Option<Duration>) -> Option<Duration> {
    match over {
        Some(d) if d.is_zero() => None,
        Some(d) => Some(d),
        None => default,
    }
}

/// Async Redis client backed by a bounded connection pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    pool: ConnectionPool,
    username: Option<String>,
    password: Option<String>,
    db: u16,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    failover: Option<Arc<SentinelFailover>>,
}

impl Client {
    /// Build a client from `config`.
    ///
    /// Standalone configs dial `host:port`; sentinel configs discover the
    /// primary through the listed monitors. No connection is made until the
    /// first command runs.
    pub fn new(config: ConnectionConfig) -> Self {
        match config.topology.clone() {
            Topology::Standalone => {
                let dialer = TcpDialer::from_config(&config);
                Self::build(config, Arc::new(dialer), None)
            }
            Topology::Sentinel {
                master_name,
                sentinels,
            } => {
                let addrs = sentinels
                    .iter()
                    .map(|(host, port)| format!("{host}:{port}"))
                    .collect();
                let failover = Arc::new(SentinelFailover::new(master_name, addrs, &config));
                let dialer = SentinelDialer::new(Arc::clone(&failover), &config);
                let client = Self::build(config, Arc::new(dialer), Some(Arc::clone(&failover)));
                failover.attach_pool(client.inner.pool.events());
                client
            }
        }
    }

    /// Build a client from a `redis://` or `redis+sentinel://` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self::new(ConnectionConfig::from_url(url)?))
    }

    /// Build a client that obtains connections from a custom dialer.
    ///
    /// Topology in `config` is ignored; pool sizing, timeouts, credentials
    /// and db still apply.
    pub fn with_dialer(config: ConnectionConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self::build(config, dialer, None)
    }

    fn build(
        config: ConnectionConfig,
        dialer: Arc<dyn Dialer>,
        failover: Option<Arc<SentinelFailover>>,
    ) -> Self {
        let pool = ConnectionPool::new(dialer, &config);
        Self {
            inner: Arc::new(ClientInner {
                pool,
                read_timeout: config.read_timeout(),
                write_timeout: config.write_timeout(),
                username: config.username,
                password: config.password,
                db: config.db,
                failover,
            }),
        }
    }

    /// The connection pool behind this client.
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// The sentinel failover state, for sentinel clients.
    pub fn failover(&self) -> Option<&Arc<SentinelFailover>> {
        self.inner.failover.as_ref()
    }

    pub(crate) fn default_timeouts(&self) -> (Option<Duration>, Option<Duration>) {
        (self.inner.read_timeout, self.inner.write_timeout)
    }

    /// AUTH and SELECT on a fresh connection.
    pub(crate) async fn init_conn(&self, conn: &mut RedisConnection) -> Result<()> {
        conn.set_timeouts(self.inner.read_timeout, self.inner.write_timeout);
        conn.init(
            self.inner.username.as_deref(),
            self.inner.password.as_deref(),
            self.inner.db,
        )
        .await
    }

    /// Check out an initialized connection.
    pub(crate) async fn conn(&self) -> Result<PoolGuard<'_>> {
        let mut guard = self.inner.pool.get().await?;
        if guard.is_new() {
            if let Err(e) = self.init_conn(guard.conn()).await {
                warn!(addr = guard.conn().addr(), error = %e, "connection init failed");
                guard.remove();
                return Err(e);
            }
        }
        Ok(guard)
    }

    /// Dial and initialize a connection the pool does not count.
    pub(crate) async fn dedicated_conn(&self) -> Result<RedisConnection> {
        let mut conn = self.inner.pool.dial_dedicated().await?;
        self.init_conn(&mut conn).await?;
        Ok(conn)
    }

    /// Execute one command and attach its outcome to `cmd`.
    ///
    /// Returns the command's error, if any. A server error reply keeps the
    /// connection; a transport failure removes it from the pool.
    pub async fn process(&self, cmd: &mut Cmd) -> Result<()> {
        cmd.reset();
        let mut guard = match self.conn().await {
            Ok(guard) => guard,
            Err(e) => {
                cmd.set_err(e.clone());
                return Err(e);
            }
        };

        let conn = guard.conn();
        conn.set_timeouts(
            effective(cmd.read_timeout(), self.inner.read_timeout),
            effective(cmd.write_timeout(), self.inner.write_timeout),
        );
        match conn.execute(cmd.arguments()).await {
            Ok(value) => {
                cmd.set_reply(value);
                if let Err(e) = guard.release() {
                    warn!(cmd = %cmd.name(), error = %e, "connection dropped after reply");
                }
            }
            Err(e) => {
                debug!(cmd = %cmd.name(), error = %e, "transport error; removing connection");
                guard.remove();
                cmd.set_err(e);
            }
        }

        match cmd.err() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Execute `cmd` and decode its reply into `T`.
    pub async fn query<T: FromResp>(&self, mut cmd: Cmd) -> Result<T> {
        self.process(&mut cmd).await?;
        T::from_resp(cmd.into_result()?)
    }

    // ── Commands ───────────────────────────────────────────────────

    pub async fn ping(&self) -> Result<String> {
        self.query(cmd::ping()).await
    }

    pub async fn echo<V: ToArg + ?Sized>(&self, message: &V) -> Result<String> {
        self.query(cmd::echo(message)).await
    }

    /// GET; `None` when the key does not exist.
    pub async fn get<K: ToArg + ?Sized>(&self, key: &K) -> Result<Option<Bytes>> {
        self.query(cmd::get(key)).await
    }

    /// GET parsed as an integer. A missing key is [`RsedisError::Nil`],
    /// never zero.
    pub async fn get_int<K: ToArg + ?Sized>(&self, key: &K) -> Result<i64> {
        self.query(cmd::get(key)).await
    }

    pub async fn set<K, V>(&self, key: &K, value: &V) -> Result<()>
    where
        K: ToArg + ?Sized,
        V: ToArg + ?Sized,
    {
        self.query(cmd::set(key, value)).await
    }

    pub async fn set_ex<K, V>(&self, key: &K, value: &V, ttl: Duration) -> Result<()>
    where
        K: ToArg + ?Sized,
        V: ToArg + ?Sized,
    {
        self.query(cmd::set_ex(key, value, ttl)).await
    }

    pub async fn incr<K: ToArg + ?Sized>(&self, key: &K) -> Result<i64> {
        self.query(cmd::incr(key)).await
    }

    pub async fn incr_by<K: ToArg + ?Sized>(&self, key: &K, delta: i64) -> Result<i64> {
        self.query(cmd::incr_by(key, delta)).await
    }

    pub async fn del<I>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.query(cmd::del(keys)).await
    }

    pub async fn exists<I>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.query(cmd::exists(keys)).await
    }

    pub async fn rpush<K, I>(&self, key: &K, values: I) -> Result<i64>
    where
        K: ToArg + ?Sized,
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.query(cmd::rpush(key, values)).await
    }

    pub async fn lrange<K: ToArg + ?Sized>(&self, key: &K, start: i64, stop: i64) -> Result<Vec<String>> {
        self.query(cmd::lrange(key, start, stop)).await
    }

    /// Blocking left pop returning `(list, value)`.
    ///
    /// The server waits in whole seconds, so a fractional `timeout` is
    /// rounded up. When that wait elapses without data the result is
    /// [`RsedisError::WaitTimeout`] carrying the rounded duration. A zero
    /// `timeout` waits forever.
    pub async fn blpop<I>(&self, keys: I, timeout: Duration) -> Result<(String, String)>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        match self.query::<Option<(String, String)>>(cmd::blpop(keys, timeout)).await? {
            Some(pair) => Ok(pair),
            None => {
                let waited = Duration::from_secs(cmd::blocking_secs(timeout));
                Err(RsedisError::WaitTimeout(waited))
            }
        }
    }

    /// Publish `message`; returns the number of receiving subscribers.
    pub async fn publish<C, M>(&self, channel: &C, message: &M) -> Result<i64>
    where
        C: ToArg + ?Sized,
        M: ToArg + ?Sized,
    {
        self.query(cmd::publish(channel, message)).await
    }

    pub async fn flushdb(&self) -> Result<()> {
        self.query(cmd::flushdb()).await
    }

    pub async fn scan(&self, cursor: u64, pattern: Option<&str>, count: Option<u64>) -> Result<ScanPage> {
        self.query(cmd::scan(cursor, pattern, count)).await
    }

    pub async fn hgetall<K: ToArg + ?Sized>(&self, key: &K) -> Result<HashMap<String, String>> {
        self.query(cmd::hgetall(key)).await
    }

    pub async fn zrange_withscores<K: ToArg + ?Sized>(
        &self,
        key: &K,
        start: i64,
        stop: i64,
    ) -> Result<Vec<ZMember>> {
        let value = self.query(cmd::zrange_withscores(key, start, stop)).await?;
        zmembers(value)
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Start an empty pipeline.
    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(self)
    }

    /// Build a pipeline with `f`, execute it, and return its commands.
    pub async fn pipelined<F>(&self, f: F) -> Result<Vec<Cmd>>
    where
        F: FnOnce(&mut Pipeline<'_>),
    {
        let mut pipe = self.pipeline();
        f(&mut pipe);
        pipe.exec().await
    }

    /// Open a transaction session on one exclusively held connection.
    pub async fn multi(&self) -> Result<Tx<'_>> {
        let guard = self.conn().await?;
        Ok(Tx::new(self, guard))
    }

    /// Open a publish/subscribe session on a dedicated connection.
    pub async fn pubsub(&self) -> Result<PubSub> {
        let mut conn = self.dedicated_conn().await?;
        // Pushed messages arrive whenever they arrive.
        conn.set_timeouts(None, self.inner.write_timeout);
        Ok(PubSub::new(conn))
    }

    /// Close the pool and stop the sentinel listener. Later commands fail
    /// with [`RsedisError::Closed`].
    pub async fn close(&self) {
        self.inner.pool.close();
        if let Some(failover) = &self.inner.failover {
            failover.close().await;
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
