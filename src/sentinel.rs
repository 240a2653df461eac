//! Sentinel-based primary discovery and failover.
//!
//! [`SentinelFailover`] asks the monitors where the primary for a master name
//! lives, remembers the first monitor that answers, and keeps a listener on
//! that monitor's `+switch-master` channel. When the primary moves, the
//! listener posts a filter event to the pool so connections to the old
//! primary are evicted. [`SentinelDialer`] plugs discovery into the pool.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::ConnectionConfig;
use crate::connection::dialer::{DialFuture, Dialer};
use crate::connection::pool::{PoolEvent, PoolEvents};
use crate::connection::tcp::RedisConnection;
use crate::error::{RsedisError, Result};
use crate::pubsub::{Message, PubSub};
use crate::resp::decode::FromResp;
use crate::resp::types::RespValue;

const SWITCH_MASTER_CHANNEL: &str = "+switch-master";

struct SentinelState {
    /// Candidate monitors; the last one that answered is first.
    addrs: Vec<String>,
    /// Connection to the known-good monitor.
    monitor: Option<RedisConnection>,
    /// Bumped on every listener restart so a stale listener cannot clear a
    /// newer monitor.
    generation: u64,
    closed: bool,
}

/// Primary discovery state for one master name.
pub struct SentinelFailover {
    master_name: String,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    max_buf_size: usize,
    state: Arc<Mutex<SentinelState>>,
    /// Outside `state` so `Drop` can always reach it.
    listener: SyncMutex<Option<JoinHandle<()>>>,
    events: Arc<OnceLock<PoolEvents>>,
}

impl SentinelFailover {
    /// `addrs` are monitor addresses in `host:port` form.
    pub fn new(master_name: String, addrs: Vec<String>, config: &ConnectionConfig) -> Self {
        Self {
            master_name,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            max_buf_size: config.max_buffer_size,
            state: Arc::new(Mutex::new(SentinelState {
                addrs,
                monitor: None,
                generation: 0,
                closed: false,
            })),
            listener: SyncMutex::new(None),
            events: Arc::new(OnceLock::new()),
        }
    }

    /// Route switch-master notifications to the pool behind `events`.
    ///
    /// Only the first call has an effect.
    pub fn attach_pool(&self, events: PoolEvents) {
        if self.events.set(events).is_err() {
            debug!("sentinel already attached to a pool");
        }
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// Current candidate monitors, known-good first.
    pub async fn sentinel_addrs(&self) -> Vec<String> {
        self.state.lock().await.addrs.clone()
    }

    /// Ask the monitors for the current primary address.
    #[instrument(skip(self), fields(master = %self.master_name))]
    pub async fn master_addr(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(RsedisError::Closed);
        }

        if let Some(monitor) = state.monitor.as_mut() {
            match self.query_master(monitor).await {
                Ok(addr) => return Ok(addr),
                Err(e) => {
                    warn!(monitor = monitor.addr(), error = %e, "known monitor failed; rediscovering");
                    state.monitor = None;
                }
            }
        }

        if state.addrs.is_empty() {
            return Err(RsedisError::Sentinel("no sentinel addresses configured".into()));
        }

        let mut last_err = None;
        for i in 0..state.addrs.len() {
            let addr = state.addrs[i].clone();
            let mut conn = match self.dial_monitor(&addr).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(monitor = %addr, error = %e, "monitor unreachable");
                    last_err = Some(e);
                    continue;
                }
            };
            let master = match self.query_master(&mut conn).await {
                Ok(master) => master,
                Err(e) => {
                    debug!(monitor = %addr, error = %e, "monitor could not resolve master");
                    last_err = Some(e);
                    continue;
                }
            };

            let promoted = state.addrs.remove(i);
            state.addrs.insert(0, promoted);
            match self.query_peers(&mut conn).await {
                Ok(peers) => {
                    for peer in peers {
                        if !state.addrs.contains(&peer) {
                            debug!(peer = %peer, "discovered sentinel");
                            state.addrs.push(peer);
                        }
                    }
                }
                Err(e) => debug!(monitor = %addr, error = %e, "peer discovery failed"),
            }
            state.monitor = Some(conn);
            self.restart_listener(&mut state, addr.clone());
            info!(monitor = %addr, master = %master, "resolved primary");
            return Ok(master);
        }

        let detail = last_err.map(|e| e.to_string()).unwrap_or_default();
        warn!(error = %detail, "all sentinels unreachable");
        Err(RsedisError::Sentinel(format!(
            "no sentinel could resolve '{}': {detail}",
            self.master_name
        )))
    }

    /// Stop the switch-master listener and forget the monitor connection.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.monitor = None;
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }

    async fn dial_monitor(&self, addr: &str) -> Result<RedisConnection> {
        let mut conn =
            RedisConnection::connect_timeout(addr, self.connect_timeout, self.max_buf_size).await?;
        conn.set_timeouts(self.read_timeout, self.write_timeout);
        Ok(conn)
    }

    async fn query_master(&self, conn: &mut RedisConnection) -> Result<String> {
        let reply = conn
            .execute(&["SENTINEL", "get-master-addr-by-name", self.master_name.as_str()])
            .await?;
        match Option::<(String, String)>::from_resp(reply)? {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| RsedisError::Sentinel(format!("invalid master port: {port}")))?;
                Ok(format!("{host}:{port}"))
            }
            None => Err(RsedisError::Sentinel(format!(
                "master '{}' not known to sentinel at {}",
                self.master_name,
                conn.addr()
            ))),
        }
    }

    async fn query_peers(&self, conn: &mut RedisConnection) -> Result<Vec<String>> {
        let reply = conn
            .execute(&["SENTINEL", "sentinels", self.master_name.as_str()])
            .await?;
        parse_peers(reply)
    }

    fn restart_listener(&self, state: &mut SentinelState, monitor_addr: String) {
        state.generation += 1;
        let listener = SwitchListener {
            master_name: self.master_name.clone(),
            monitor_addr,
            connect_timeout: self.connect_timeout,
            max_buf_size: self.max_buf_size,
            events: Arc::clone(&self.events),
            state: Arc::downgrade(&self.state),
            generation: state.generation,
        };
        if let Some(old) = self.listener.lock().replace(tokio::spawn(listener.run())) {
            old.abort();
        }
    }
}

impl Drop for SentinelFailover {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

/// Background task following `+switch-master` on one monitor.
struct SwitchListener {
    master_name: String,
    monitor_addr: String,
    connect_timeout: Option<Duration>,
    max_buf_size: usize,
    events: Arc<OnceLock<PoolEvents>>,
    state: Weak<Mutex<SentinelState>>,
    generation: u64,
}

impl SwitchListener {
    async fn run(self) {
        let err = match self.listen().await {
            Ok(()) => return,
            Err(e) => e,
        };
        warn!(monitor = %self.monitor_addr, error = %err, "switch-master listener stopped");

        // The next lookup rediscovers a monitor.
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().await;
            if state.generation == self.generation {
                state.monitor = None;
            }
        }
    }

    async fn listen(&self) -> Result<()> {
        let conn = RedisConnection::connect_timeout(
            &self.monitor_addr,
            self.connect_timeout,
            self.max_buf_size,
        )
        .await?;
        let mut pubsub = PubSub::new(conn);
        pubsub.subscribe([SWITCH_MASTER_CHANNEL]).await?;
        debug!(monitor = %self.monitor_addr, "listening for switch-master");

        loop {
            if let Message::Message { channel, payload } = pubsub.receive().await? {
                if channel == SWITCH_MASTER_CHANNEL {
                    self.on_switch(&payload)?;
                }
            }
        }
    }

    fn on_switch(&self, payload: &[u8]) -> Result<()> {
        let Some(switch) = std::str::from_utf8(payload).ok().and_then(parse_switch) else {
            warn!(payload = %String::from_utf8_lossy(payload), "malformed switch-master payload");
            return Ok(());
        };
        if switch.name != self.master_name {
            return Ok(());
        }

        info!(from = %switch.old_addr, to = %switch.new_addr, "primary switched");
        let Some(events) = self.events.get() else {
            return Ok(());
        };
        let new_addr = switch.new_addr;
        events.send(PoolEvent::Filter(Arc::new(move |conn: &RedisConnection| {
            conn.addr() == new_addr
        })))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Switch {
    name: String,
    old_addr: String,
    new_addr: String,
}

/// Parse `<name> <old-ip> <old-port> <new-ip> <new-port>`.
fn parse_switch(payload: &str) -> Option<Switch> {
    let parts: Vec<&str> = payload.split_whitespace().collect();
    let [name, old_ip, old_port, new_ip, new_port] = parts.as_slice() else {
        return None;
    };
    new_port.parse::<u16>().ok()?;
    Some(Switch {
        name: name.to_string(),
        old_addr: format!("{old_ip}:{old_port}"),
        new_addr: format!("{new_ip}:{new_port}"),
    })
}

/// Extract `ip:port` from a `SENTINEL sentinels` reply: an array of flat
/// field/value arrays.
fn parse_peers(reply: RespValue) -> Result<Vec<String>> {
    let entries = Vec::<Vec<String>>::from_resp(reply)?;
    let mut peers = Vec::with_capacity(entries.len());
    for fields in entries {
        let mut ip = None;
        let mut port = None;
        for pair in fields.chunks_exact(2) {
            match pair[0].as_str() {
                "ip" => ip = Some(&pair[1]),
                "port" => port = Some(&pair[1]),
                _ => {}
            }
        }
        if let (Some(ip), Some(port)) = (ip, port) {
            peers.push(format!("{ip}:{port}"));
        }
    }
    Ok(peers)
}

/// Dials whatever primary the monitors currently report.
pub struct SentinelDialer {
    failover: Arc<SentinelFailover>,
    connect_timeout: Option<Duration>,
    max_buf_size: usize,
}

impl SentinelDialer {
    pub fn new(failover: Arc<SentinelFailover>, config: &ConnectionConfig) -> Self {
        Self {
            failover,
            connect_timeout: config.connect_timeout(),
            max_buf_size: config.max_buffer_size,
        }
    }
}

impl Dialer for SentinelDialer {
    fn dial(&self) -> DialFuture<'_> {
        Box::pin(async move {
            let addr = self.failover.master_addr().await?;
            debug!(addr = %addr, "dialing primary");
            RedisConnection::connect_timeout(&addr, self.connect_timeout, self.max_buf_size).await
        })
    }
}
