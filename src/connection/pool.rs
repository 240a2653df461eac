//! Bounded pool of [`RedisConnection`]s.
//!
//! A semaphore hands out one permit per checkout; idle connections wait in a
//! stack behind a `parking_lot` mutex, which is what lets [`PoolGuard`]
//! return its connection from a synchronous `Drop`.
//!
//! Only a permit holder that found no idle connection dials, so idle plus
//! checked-out connections stay within `max_size`.
//!
//! Every filter opens a new generation. A remembered filter only judges
//! connections dialed before it, and is forgotten once none of those are
//! left.

use crate::config::ConnectionConfig;
use crate::connection::dialer::Dialer;
use crate::connection::tcp::RedisConnection;
use crate::error::{RsedisError, Result};

use parking_lot::Mutex as SyncMutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

/// Predicate deciding whether a connection may stay in the pool.
pub type ConnFilter = Arc<dyn Fn(&RedisConnection) -> bool + Send + Sync>;

/// Messages another task can post to the pool.
pub enum PoolEvent {
    /// Evict every existing connection for which the predicate returns
    /// false, now and when checked-out ones come back. Connections dialed
    /// afterwards are not judged.
    Filter(ConnFilter),
}

impl std::fmt::Debug for PoolEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filter(_) => f.write_str("Filter(..)"),
        }
    }
}

/// Cloneable sender into a pool's event inbox.
#[derive(Clone)]
pub struct PoolEvents {
    tx: UnboundedSender<PoolEvent>,
}

impl PoolEvents {
    /// Post an event; applied at the pool's next get, put or stats call.
    pub fn send(&self, event: PoolEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| RsedisError::Closed)
    }
}

pub struct ConnectionPool {
    /// Most recently returned last.
    idle: SyncMutex<VecDeque<RedisConnection>>,
    permits: Semaphore,
    /// Idle plus checked-out connections.
    live: AtomicUsize,
    dialer: Arc<dyn Dialer>,
    generations: SyncMutex<Generations>,
    events_tx: UnboundedSender<PoolEvent>,
    events_rx: SyncMutex<UnboundedReceiver<PoolEvent>>,
    closed: AtomicBool,
    max_size: usize,
    /// Longest wait for a permit.
    pool_timeout: Duration,
    /// Idle connections older than this are closed instead of reused.
    idle_timeout: Duration,
}

impl ConnectionPool {
    /// Create a pool sized and timed from `config`, dialing through `dialer`.
    pub fn new(dialer: Arc<dyn Dialer>, config: &ConnectionConfig) -> Self {
        let max_size = config.pool_size.max(1);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            idle: SyncMutex::new(VecDeque::with_capacity(max_size)),
            permits: Semaphore::new(max_size),
            live: AtomicUsize::new(0),
            dialer,
            generations: SyncMutex::new(Generations::default()),
            events_tx,
            events_rx: SyncMutex::new(events_rx),
            closed: AtomicBool::new(false),
            max_size,
            pool_timeout: config.pool_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }

    /// Check out a connection, reusing the freshest idle one or dialing.
    ///
    /// Waits at most `pool_timeout` for a slot. Dropping the [`PoolGuard`]
    /// puts the connection back.
    pub async fn get(&self) -> Result<PoolGuard<'_>> {
        if self.is_closed() {
            return Err(RsedisError::Closed);
        }
        self.apply_events();

        let permit = tokio::time::timeout(self.pool_timeout, self.permits.acquire())
            .await
            .map_err(|_| {
                RsedisError::Timeout(format!(
                    "no pooled connection free after {:?}",
                    self.pool_timeout
                ))
            })?
            .map_err(|_| RsedisError::Closed)?;

        let reused = self.pop_idle();
        let is_new = reused.is_none();
        let conn = match reused {
            Some(conn) => conn,
            None => self.dial_counted().await?,
        };

        Ok(PoolGuard {
            conn: Some(conn),
            pool: self,
            is_new,
            _permit: permit,
        })
    }

    /// Dial a connection that the pool does not own or count.
    ///
    /// Used for long-lived sessions (pub/sub) that must not starve the pool.
    pub async fn dial_dedicated(&self) -> Result<RedisConnection> {
        if self.is_closed() {
            return Err(RsedisError::Closed);
        }
        self.dialer.dial().await
    }

    /// Handle for posting events from other tasks.
    pub fn events(&self) -> PoolEvents {
        PoolEvents {
            tx: self.events_tx.clone(),
        }
    }

    /// Evict idle connections rejected by `pred` and remember it for the
    /// checked-out ones, which are judged when they come back. Connections
    /// dialed after this call are kept regardless of `pred`.
    pub fn filter<F>(&self, pred: F)
    where
        F: Fn(&RedisConnection) -> bool + Send + Sync + 'static,
    {
        self.apply_filter(Arc::new(pred));
    }

    /// Drop idle connections and fail current and future `get` calls with
    /// [`RsedisError::Closed`]. Checked-out connections are closed on return.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();
        let drained: Vec<RedisConnection> = self.idle.lock().drain(..).collect();
        for conn in drained {
            self.discard(conn, "pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Live connections, idle and checked out.
    pub fn len(&self) -> usize {
        self.apply_events();
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn idle_count(&self) -> usize {
        self.apply_events();
        self.idle.lock().len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Slots not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn dial_counted(&self) -> Result<RedisConnection> {
        // Stamped before dialing so a filter posted mid-dial still judges
        // the result.
        let stamp = DialStamp {
            pool: self,
            generation: self.generations.lock().enter(),
            armed: true,
        };
        let mut conn = self.dialer.dial().await?;
        conn.generation = stamp.disarm();
        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(addr = conn.addr(), live, generation = conn.generation, "dialed pooled connection");
        Ok(conn)
    }

    /// Newest idle connection that has not outlived `idle_timeout`.
    fn pop_idle(&self) -> Option<RedisConnection> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop_back() {
            if conn.last_used.elapsed() <= self.idle_timeout {
                return Some(conn);
            }
            self.discard(conn, "idle timeout");
        }
        None
    }

    /// Put a connection back, or close it when it must not be reused.
    /// Synchronous so `Drop` can call it.
    fn return_connection(&self, conn: RedisConnection) -> Result<()> {
        self.apply_events();

        if conn.has_pending_input() {
            warn!(addr = conn.addr(), "connection returned with unread input; discarding");
            self.discard(conn, "unread input");
            return Err(RsedisError::Desync);
        }
        if self.is_closed() {
            self.discard(conn, "pool closed");
            return Ok(());
        }
        if conn.is_broken() {
            self.discard(conn, "broken");
            return Ok(());
        }
        let judges = self.generations.lock().judges(conn.generation);
        if judges.iter().any(|keep| !keep(&conn)) {
            self.discard(conn, "filtered");
            return Ok(());
        }

        self.idle.lock().push_back(conn);
        Ok(())
    }

    fn discard(&self, conn: RedisConnection, reason: &str) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.generations.lock().leave(conn.generation);
        debug!(addr = conn.addr(), reason, "discarding connection");
    }

    fn apply_filter(&self, keep: ConnFilter) {
        // Every idle connection predates the filter.
        self.generations.lock().remember(Arc::clone(&keep));
        let evicted: Vec<RedisConnection> = {
            let mut idle = self.idle.lock();
            let (kept, evicted): (VecDeque<_>, VecDeque<_>) =
                idle.drain(..).partition(|conn| keep(conn));
            *idle = kept;
            evicted.into()
        };
        for conn in evicted {
            self.discard(conn, "filtered");
        }
    }

    fn apply_events(&self) {
        let pending: Vec<PoolEvent> = {
            let mut rx = self.events_rx.lock();
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for event in pending {
            match event {
                PoolEvent::Filter(keep) => self.apply_filter(keep),
            }
        }
    }
}

#[derive(Default)]
struct Generations {
    /// Stamped on every new dial; bumped by each filter.
    current: u64,
    /// Live pooled connections (and dials in flight) per generation.
    live: BTreeMap<u64, usize>,
    /// Filters with the first generation they no longer judge.
    filters: Vec<(u64, ConnFilter)>,
}

impl Generations {
    fn enter(&mut self) -> u64 {
        *self.live.entry(self.current).or_default() += 1;
        self.current
    }

    fn leave(&mut self, generation: u64) {
        if let Some(count) = self.live.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                self.live.remove(&generation);
            }
        }
        self.prune();
    }

    fn remember(&mut self, keep: ConnFilter) {
        self.current += 1;
        self.filters.push((self.current, keep));
        self.prune();
    }

    /// Filters that apply to a connection from `generation`.
    fn judges(&self, generation: u64) -> Vec<ConnFilter> {
        self.filters
            .iter()
            .filter(|(until, _)| generation < *until)
            .map(|(_, keep)| Arc::clone(keep))
            .collect()
    }

    /// Drop filters that no live connection predates.
    fn prune(&mut self) {
        let oldest = self.live.keys().next().copied();
        self.filters
            .retain(|(until, _)| oldest.is_some_and(|generation| generation < *until));
    }
}

/// Generation reservation for a dial in flight; released if the dial fails
/// or is cancelled.
struct DialStamp<'a> {
    pool: &'a ConnectionPool,
    generation: u64,
    armed: bool,
}

impl DialStamp<'_> {
    fn disarm(mut self) -> u64 {
        self.armed = false;
        self.generation
    }
}

impl Drop for DialStamp<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.generations.lock().leave(self.generation);
        }
    }
}

/// A checked-out connection; goes back to the pool when dropped.
pub struct PoolGuard<'a> {
    conn: Option<RedisConnection>,
    pool: &'a ConnectionPool,
    is_new: bool,
    _permit: SemaphorePermit<'a>,
}

impl std::fmt::Debug for PoolGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("conn", &self.conn)
            .field("is_new", &self.is_new)
            .finish_non_exhaustive()
    }
}

impl<'a> PoolGuard<'a> {
    pub fn conn(&mut self) -> &mut RedisConnection {
        self.conn.as_mut().expect("connection already taken")
    }

    /// Dialed for this checkout, so AUTH and SELECT have not run yet.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Hand the connection back. Unread reply bytes make this fail with
    /// [`RsedisError::Desync`] and the connection is closed instead.
    pub fn release(mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => self.pool.return_connection(conn),
            None => Ok(()),
        }
    }

    /// Close the connection rather than returning it.
    pub fn remove(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn, "removed");
        }
    }
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = self.pool.return_connection(conn);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
