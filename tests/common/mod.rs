//! Shared helpers for integration tests.
//!
//! [`FakeServer`] is an in-process RESP2 server covering the command subset
//! the runtime exercises: strings, lists, WATCH/MULTI/EXEC, pub/sub and the
//! sentinel queries. Every test gets its own server on an ephemeral port.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rsedis::resp::parse;
use rsedis::{Client, ConnectionConfig, RespValue, RsedisError, Topology};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` every 10ms until it holds, panicking after two seconds.
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut cond: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct Subscriber {
    channels: HashSet<Bytes>,
    patterns: HashSet<Bytes>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Subscriber {
    fn count(&self) -> i64 {
        (self.channels.len() + self.patterns.len()) as i64
    }
}

struct SentinelRole {
    master_name: String,
    master: (String, u16),
    peers: Vec<(String, u16)>,
}

#[derive(Default)]
struct Store {
    strings: HashMap<Bytes, Bytes>,
    lists: HashMap<Bytes, VecDeque<Bytes>>,
    /// Bumped on every write; WATCH compares these.
    versions: HashMap<Bytes, u64>,
    clock: u64,
    subscribers: HashMap<u64, Subscriber>,
    sentinel: Option<SentinelRole>,
}

struct Shared {
    store: Mutex<Store>,
    password: Option<String>,
    accepted: AtomicUsize,
    next_id: AtomicU64,
    /// Open sessions by id.
    sessions: Mutex<HashMap<u64, JoinHandle<()>>>,
}

/// A fake server listening on `127.0.0.1:<ephemeral>`.
pub struct FakeServer {
    host: String,
    port: u16,
    shared: Arc<Shared>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::spawn(Store::default(), None).await
    }

    /// A server requiring AUTH with `password`.
    pub async fn with_password(password: &str) -> Self {
        Self::spawn(Store::default(), Some(password.to_string())).await
    }

    /// A monitor reporting `master` (host:port) for `master_name`.
    pub async fn sentinel(master_name: &str, master: &str) -> Self {
        let store = Store {
            sentinel: Some(SentinelRole {
                master_name: master_name.to_string(),
                master: split_addr(master),
                peers: Vec::new(),
            }),
            ..Store::default()
        };
        Self::spawn(store, None).await
    }

    async fn spawn(store: Store, password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            store: Mutex::new(store),
            password,
            accepted: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        });

        let accept_shared = Arc::clone(&shared);
        let accept = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                let id = accept_shared.next_id.fetch_add(1, Ordering::SeqCst);
                let task = tokio::spawn(serve(socket, Arc::clone(&accept_shared), id));
                accept_shared.sessions.lock().insert(id, task);
            }
        });

        Self {
            host: local.ip().to_string(),
            port: local.port(),
            shared,
            accept: Mutex::new(Some(accept)),
        }
    }

    /// Stop listening and drop every open connection.
    pub async fn stop(&self) {
        let accept = self.accept.lock().take();
        if let Some(accept) = accept {
            accept.abort();
            let _ = accept.await;
        }
        let ids: Vec<u64> = self.shared.sessions.lock().keys().copied().collect();
        self.kill(&ids).await;
    }

    /// Drop every connection in subscribed mode; others stay up.
    pub async fn kick_subscribers(&self) {
        let ids: Vec<u64> = self.shared.store.lock().subscribers.keys().copied().collect();
        self.kill(&ids).await;
    }

    async fn kill(&self, ids: &[u64]) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut sessions = self.shared.sessions.lock();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        {
            let mut store = self.shared.store.lock();
            for id in ids {
                store.subscribers.remove(id);
            }
        }
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }

    /// Connections currently open.
    pub fn connections(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Standalone config pointing at this server.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            read_timeout_ms: 2000,
            write_timeout_ms: 2000,
            pool_timeout_ms: 2000,
            ..ConnectionConfig::default()
        }
    }

    pub fn client(&self) -> Client {
        Client::new(self.config())
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Peek at a string key without going through the protocol.
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        self.shared.store.lock().strings.get(key.as_bytes()).cloned()
    }

    /// Publish from outside any connection; returns the receiver count.
    pub fn publish(&self, channel: &str, payload: &str) -> i64 {
        self.shared
            .store
            .lock()
            .publish(channel.as_bytes(), payload.as_bytes())
    }

    /// Sessions currently subscribed to `channel`.
    pub fn subscribers(&self, channel: &str) -> usize {
        self.shared
            .store
            .lock()
            .subscribers
            .values()
            .filter(|s| s.channels.contains(channel.as_bytes()))
            .count()
    }

    /// Change the primary this monitor reports.
    pub fn set_master(&self, master: &str) {
        if let Some(role) = self.shared.store.lock().sentinel.as_mut() {
            role.master = split_addr(master);
        }
    }

    /// Advertise another monitor through `SENTINEL sentinels`.
    pub fn add_peer(&self, peer: &str) {
        if let Some(role) = self.shared.store.lock().sentinel.as_mut() {
            role.peers.push(split_addr(peer));
        }
    }
}

/// Sentinel-topology config following `master_name` through `monitors`.
pub fn sentinel_config(master_name: &str, monitors: &[&FakeServer]) -> ConnectionConfig {
    ConnectionConfig {
        topology: Topology::Sentinel {
            master_name: master_name.to_string(),
            sentinels: monitors
                .iter()
                .map(|m| (m.host().to_string(), m.port()))
                .collect(),
        },
        connect_timeout_ms: 500,
        read_timeout_ms: 2000,
        pool_timeout_ms: 2000,
        ..ConnectionConfig::default()
    }
}

fn split_addr(addr: &str) -> (String, u16) {
    let (host, port) = addr.rsplit_once(':').expect("host:port");
    (host.to_string(), port.parse().expect("port"))
}

// ── Connection handling ────────────────────────────────────────────

async fn serve(socket: TcpStream, shared: Arc<Shared>, id: u64) {
    let (mut rd, mut wr) = socket.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if wr.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        id,
        authed: shared.password.is_none(),
        shared: Arc::clone(&shared),
        tx,
        multi: None,
        aborted: false,
        watched: HashMap::new(),
        subscribed: false,
    };

    let mut buf = BytesMut::with_capacity(4096);
    'conn: loop {
        match rd.read_buf(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        loop {
            let snapshot = buf.clone().freeze();
            match parse(&snapshot) {
                Ok((value, consumed)) => {
                    let _ = buf.split_to(consumed);
                    match command_args(value) {
                        Some(args) if !args.is_empty() => {
                            if !session.handle(args).await {
                                break 'conn;
                            }
                        }
                        _ => session.reply(&RespValue::Error("ERR Protocol error".into())),
                    }
                }
                Err(RsedisError::Incomplete) => break,
                Err(_) => break 'conn,
            }
        }
    }

    shared.store.lock().subscribers.remove(&id);
    drop(session);
    let _ = writer.await;
    shared.sessions.lock().remove(&id);
}

fn command_args(value: RespValue) -> Option<Vec<Bytes>> {
    match value {
        RespValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                RespValue::BulkString(b) => Some(b),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

struct Session {
    id: u64,
    authed: bool,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    multi: Option<Vec<Vec<Bytes>>>,
    aborted: bool,
    watched: HashMap<Bytes, u64>,
    subscribed: bool,
}

impl Session {
    fn reply(&self, value: &RespValue) {
        let mut out = Vec::new();
        encode(value, &mut out);
        let _ = self.tx.send(out);
    }

    /// Handle one command; `false` closes the connection.
    async fn handle(&mut self, args: Vec<Bytes>) -> bool {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

        if name == "QUIT" {
            self.reply(&ok());
            return false;
        }
        if name == "AUTH" {
            let reply = self.auth(&args);
            self.reply(&reply);
            return true;
        }
        if !self.authed {
            self.reply(&err("NOAUTH Authentication required."));
            return true;
        }

        if self.subscribed
            && !matches!(
                name.as_str(),
                "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" | "PING"
            )
        {
            self.reply(&err(&format!(
                "ERR Can't execute '{}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context",
                name.to_ascii_lowercase()
            )));
            return true;
        }

        match name.as_str() {
            "MULTI" => {
                let reply = if self.multi.is_some() {
                    err("ERR MULTI calls can not be nested")
                } else {
                    self.multi = Some(Vec::new());
                    self.aborted = false;
                    ok()
                };
                self.reply(&reply);
            }
            "EXEC" => {
                let reply = self.exec();
                self.reply(&reply);
            }
            "DISCARD" => {
                let reply = if self.multi.take().is_some() {
                    self.watched.clear();
                    ok()
                } else {
                    err("ERR DISCARD without MULTI")
                };
                self.reply(&reply);
            }
            "WATCH" => {
                let reply = if self.multi.is_some() {
                    err("ERR WATCH inside MULTI is not allowed")
                } else if args.len() < 2 {
                    arity_err(&name)
                } else {
                    let store = self.shared.store.lock();
                    for key in &args[1..] {
                        let version = store.versions.get(key).copied().unwrap_or(0);
                        self.watched.insert(key.clone(), version);
                    }
                    ok()
                };
                self.reply(&reply);
            }
            "UNWATCH" => {
                self.watched.clear();
                self.reply(&ok());
            }
            _ if self.multi.is_some() => {
                let reply = match check_arity(&name, args.len()) {
                    Ok(()) => {
                        if let Some(queue) = self.multi.as_mut() {
                            queue.push(args);
                        }
                        RespValue::SimpleString("QUEUED".into())
                    }
                    Err(e) => {
                        self.aborted = true;
                        e
                    }
                };
                self.reply(&reply);
            }
            "SUBSCRIBE" | "PSUBSCRIBE" => self.subscribe(&name, &args[1..]),
            "UNSUBSCRIBE" | "PUNSUBSCRIBE" => self.unsubscribe(&name, &args[1..]),
            "PING" if self.subscribed => {
                let payload = args.get(1).cloned().unwrap_or_default();
                self.reply(&RespValue::Array(vec![bulk("pong"), RespValue::BulkString(payload)]));
            }
            "SLEEP" if args.len() == 2 => {
                let ms: u64 = String::from_utf8_lossy(&args[1]).parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.reply(&ok());
            }
            "BLPOP" if args.len() >= 3 => {
                let reply = self.blpop(&args).await;
                self.reply(&reply);
            }
            _ => {
                let reply = match check_arity(&name, args.len()) {
                    Ok(()) => self.shared.store.lock().execute(&name, &args),
                    Err(e) => e,
                };
                self.reply(&reply);
            }
        }
        true
    }

    fn auth(&mut self, args: &[Bytes]) -> RespValue {
        let given = match args.len() {
            2 => &args[1],
            3 => &args[2],
            _ => return arity_err("AUTH"),
        };
        match &self.shared.password {
            None => err("ERR AUTH <password> called without any password configured for the default user."),
            Some(p) if p.as_bytes() == &given[..] => {
                self.authed = true;
                ok()
            }
            Some(_) => err("WRONGPASS invalid username-password pair or user is disabled."),
        }
    }

    fn exec(&mut self) -> RespValue {
        let Some(queue) = self.multi.take() else {
            return err("ERR EXEC without MULTI");
        };
        let watched = std::mem::take(&mut self.watched);
        if std::mem::take(&mut self.aborted) {
            return err("EXECABORT Transaction discarded because of previous errors.");
        }

        let mut store = self.shared.store.lock();
        let conflict = watched
            .iter()
            .any(|(key, v)| store.versions.get(key).copied().unwrap_or(0) != *v);
        if conflict {
            return RespValue::NullArray;
        }
        let replies = queue
            .iter()
            .map(|args| {
                let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
                store.execute(&name, args)
            })
            .collect();
        RespValue::Array(replies)
    }

    async fn blpop(&mut self, args: &[Bytes]) -> RespValue {
        let keys = &args[1..args.len() - 1];
        let secs: f64 = match String::from_utf8_lossy(&args[args.len() - 1]).parse() {
            Ok(s) if s >= 0.0 => s,
            _ => return err("ERR timeout is not a float or out of range"),
        };
        let deadline = (secs > 0.0).then(|| Instant::now() + Duration::from_secs_f64(secs));
        loop {
            {
                let mut store = self.shared.store.lock();
                for key in keys {
                    if let Some(value) = store.pop_front(key) {
                        return RespValue::Array(vec![
                            RespValue::BulkString(key.clone()),
                            RespValue::BulkString(value),
                        ]);
                    }
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return RespValue::NullArray;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn subscribe(&mut self, name: &str, targets: &[Bytes]) {
        if targets.is_empty() {
            self.reply(&arity_err(name));
            return;
        }
        let kind = name.to_ascii_lowercase();
        let mut store = self.shared.store.lock();
        let sub = store.subscribers.entry(self.id).or_insert_with(|| Subscriber {
            channels: HashSet::new(),
            patterns: HashSet::new(),
            tx: self.tx.clone(),
        });
        for target in targets {
            if name == "SUBSCRIBE" {
                sub.channels.insert(target.clone());
            } else {
                sub.patterns.insert(target.clone());
            }
            let ack = RespValue::Array(vec![
                bulk(&kind),
                RespValue::BulkString(target.clone()),
                RespValue::Integer(sub.count()),
            ]);
            let mut out = Vec::new();
            encode(&ack, &mut out);
            let _ = self.tx.send(out);
        }
        self.subscribed = true;
    }

    fn unsubscribe(&mut self, name: &str, targets: &[Bytes]) {
        let kind = name.to_ascii_lowercase();
        let mut store = self.shared.store.lock();
        let Some(sub) = store.subscribers.get_mut(&self.id) else {
            drop(store);
            self.reply(&RespValue::Array(vec![bulk(&kind), RespValue::Null, RespValue::Integer(0)]));
            return;
        };
        let set = if name == "UNSUBSCRIBE" {
            &mut sub.channels
        } else {
            &mut sub.patterns
        };
        let targets: Vec<Bytes> = if targets.is_empty() {
            set.drain().collect()
        } else {
            targets.iter().filter(|t| set.remove(*t)).cloned().collect()
        };

        let mut frames = Vec::new();
        if targets.is_empty() {
            encode(
                &RespValue::Array(vec![bulk(&kind), RespValue::Null, RespValue::Integer(sub.count())]),
                &mut frames,
            );
        }
        for target in targets {
            encode(
                &RespValue::Array(vec![
                    bulk(&kind),
                    RespValue::BulkString(target),
                    RespValue::Integer(sub.count()),
                ]),
                &mut frames,
            );
        }
        let remaining = sub.count();
        if remaining == 0 {
            store.subscribers.remove(&self.id);
            self.subscribed = false;
        }
        let _ = self.tx.send(frames);
    }
}

// ── Data commands ──────────────────────────────────────────────────

fn check_arity(name: &str, argc: usize) -> Result<(), RespValue> {
    let ok = match name {
        "PING" => (1..=2).contains(&argc),
        "ECHO" | "GET" | "INCR" | "LPOP" | "SELECT" => argc == 2,
        "INCRBY" | "PUBLISH" => argc == 3,
        "LRANGE" => argc == 4,
        "SET" => argc == 3 || argc == 5,
        "DEL" | "EXISTS" | "SENTINEL" => argc >= 2,
        "RPUSH" | "BLPOP" => argc >= 3,
        "FLUSHDB" | "DBSIZE" => argc == 1,
        _ => return Err(err(&format!("ERR unknown command '{name}'"))),
    };
    if ok {
        Ok(())
    } else {
        Err(arity_err(name))
    }
}

impl Store {
    fn touch(&mut self, key: &Bytes) {
        self.clock += 1;
        self.versions.insert(key.clone(), self.clock);
    }

    fn pop_front(&mut self, key: &Bytes) -> Option<Bytes> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_front();
        if list.is_empty() {
            self.lists.remove(key);
        }
        if value.is_some() {
            self.touch(key);
        }
        value
    }

    fn execute(&mut self, name: &str, args: &[Bytes]) -> RespValue {
        if let Err(e) = check_arity(name, args.len()) {
            return e;
        }
        match name {
            "PING" => match args.get(1) {
                Some(payload) => RespValue::BulkString(payload.clone()),
                None => RespValue::SimpleString("PONG".into()),
            },
            "ECHO" => RespValue::BulkString(args[1].clone()),
            "SELECT" => ok(),
            "GET" => {
                if self.lists.contains_key(&args[1]) {
                    return wrongtype();
                }
                match self.strings.get(&args[1]) {
                    Some(v) => RespValue::BulkString(v.clone()),
                    None => RespValue::Null,
                }
            }
            "SET" => {
                self.lists.remove(&args[1]);
                self.strings.insert(args[1].clone(), args[2].clone());
                self.touch(&args[1]);
                ok()
            }
            "INCR" | "INCRBY" => {
                let delta = if name == "INCR" {
                    1
                } else {
                    match parse_int(&args[2]) {
                        Some(d) => d,
                        None => return err("ERR value is not an integer or out of range"),
                    }
                };
                if self.lists.contains_key(&args[1]) {
                    return wrongtype();
                }
                let current = match self.strings.get(&args[1]) {
                    Some(v) => match parse_int(v) {
                        Some(n) => n,
                        None => return err("ERR value is not an integer or out of range"),
                    },
                    None => 0,
                };
                let next = current + delta;
                self.strings
                    .insert(args[1].clone(), Bytes::from(next.to_string()));
                self.touch(&args[1]);
                RespValue::Integer(next)
            }
            "DEL" => {
                let mut removed = 0;
                for key in &args[1..] {
                    if self.strings.remove(key).is_some() || self.lists.remove(key).is_some() {
                        removed += 1;
                        self.touch(key);
                    }
                }
                RespValue::Integer(removed)
            }
            "EXISTS" => RespValue::Integer(
                args[1..]
                    .iter()
                    .filter(|k| self.strings.contains_key(*k) || self.lists.contains_key(*k))
                    .count() as i64,
            ),
            "RPUSH" => {
                if self.strings.contains_key(&args[1]) {
                    return wrongtype();
                }
                let list = self.lists.entry(args[1].clone()).or_default();
                list.extend(args[2..].iter().cloned());
                let len = list.len() as i64;
                self.touch(&args[1]);
                RespValue::Integer(len)
            }
            "LPOP" => match self.pop_front(&args[1]) {
                Some(v) => RespValue::BulkString(v),
                None => RespValue::Null,
            },
            "BLPOP" => {
                for key in &args[1..args.len() - 1] {
                    if let Some(v) = self.pop_front(key) {
                        return RespValue::Array(vec![
                            RespValue::BulkString(key.clone()),
                            RespValue::BulkString(v),
                        ]);
                    }
                }
                RespValue::NullArray
            }
            "LRANGE" => {
                let (Some(start), Some(stop)) = (parse_int(&args[2]), parse_int(&args[3])) else {
                    return err("ERR value is not an integer or out of range");
                };
                let Some(list) = self.lists.get(&args[1]) else {
                    return RespValue::Array(Vec::new());
                };
                let len = list.len() as i64;
                let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
                let (start, stop) = (norm(start), norm(stop).min(len - 1));
                if start > stop {
                    return RespValue::Array(Vec::new());
                }
                RespValue::Array(
                    list.iter()
                        .skip(start as usize)
                        .take((stop - start + 1) as usize)
                        .cloned()
                        .map(RespValue::BulkString)
                        .collect(),
                )
            }
            "PUBLISH" => RespValue::Integer(self.publish(&args[1], &args[2])),
            "FLUSHDB" => {
                let keys: Vec<Bytes> = self
                    .strings
                    .keys()
                    .chain(self.lists.keys())
                    .cloned()
                    .collect();
                for key in &keys {
                    self.touch(key);
                }
                self.strings.clear();
                self.lists.clear();
                ok()
            }
            "DBSIZE" => RespValue::Integer((self.strings.len() + self.lists.len()) as i64),
            "SENTINEL" => self.sentinel(args),
            _ => err(&format!("ERR unknown command '{name}'")),
        }
    }

    fn publish(&mut self, channel: &[u8], payload: &[u8]) -> i64 {
        let mut receivers = 0;
        for sub in self.subscribers.values() {
            let mut out = Vec::new();
            if sub.channels.contains(channel) {
                encode(
                    &RespValue::Array(vec![
                        bulk("message"),
                        RespValue::BulkString(Bytes::copy_from_slice(channel)),
                        RespValue::BulkString(Bytes::copy_from_slice(payload)),
                    ]),
                    &mut out,
                );
                receivers += 1;
            }
            for pattern in &sub.patterns {
                if glob_match(pattern, channel) {
                    encode(
                        &RespValue::Array(vec![
                            bulk("pmessage"),
                            RespValue::BulkString(pattern.clone()),
                            RespValue::BulkString(Bytes::copy_from_slice(channel)),
                            RespValue::BulkString(Bytes::copy_from_slice(payload)),
                        ]),
                        &mut out,
                    );
                    receivers += 1;
                }
            }
            if !out.is_empty() {
                let _ = sub.tx.send(out);
            }
        }
        receivers
    }

    fn sentinel(&self, args: &[Bytes]) -> RespValue {
        let Some(role) = &self.sentinel else {
            return err("ERR unknown command 'SENTINEL'");
        };
        let sub = String::from_utf8_lossy(&args[1]).to_ascii_lowercase();
        let name_matches = args.get(2).is_some_and(|n| n == role.master_name.as_bytes());
        match sub.as_str() {
            "get-master-addr-by-name" if name_matches => RespValue::Array(vec![
                bulk(&role.master.0),
                bulk(&role.master.1.to_string()),
            ]),
            "get-master-addr-by-name" => RespValue::NullArray,
            "sentinels" if name_matches => RespValue::Array(
                role.peers
                    .iter()
                    .map(|(host, port)| {
                        RespValue::Array(vec![
                            bulk("name"),
                            bulk(&format!("{host}:{port}")),
                            bulk("ip"),
                            bulk(host),
                            bulk("port"),
                            bulk(&port.to_string()),
                        ])
                    })
                    .collect(),
            ),
            "sentinels" => err("ERR No such master with that name"),
            _ => err(&format!("ERR Unknown sentinel subcommand '{sub}'")),
        }
    }
}

// ── Wire helpers ───────────────────────────────────────────────────

fn ok() -> RespValue {
    RespValue::SimpleString("OK".into())
}

fn err(msg: &str) -> RespValue {
    RespValue::Error(msg.to_string())
}

fn wrongtype() -> RespValue {
    err("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn arity_err(name: &str) -> RespValue {
    err(&format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn bulk(s: &str) -> RespValue {
    RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

fn parse_int(b: &[u8]) -> Option<i64> {
    std::str::from_utf8(b).ok()?.parse().ok()
}

fn encode(value: &RespValue, out: &mut Vec<u8>) {
    match value {
        RespValue::SimpleString(s) => out.extend_from_slice(format!("+{s}\r\n").as_bytes()),
        RespValue::Error(s) => out.extend_from_slice(format!("-{s}\r\n").as_bytes()),
        RespValue::Integer(n) => out.extend_from_slice(format!(":{n}\r\n").as_bytes()),
        RespValue::BulkString(b) => {
            out.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Array(items) => {
            out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode(item, out);
            }
        }
        RespValue::Null => out.extend_from_slice(b"$-1\r\n"),
        RespValue::NullArray => out.extend_from_slice(b"*-1\r\n"),
    }
}

/// Glob match supporting `*` and `?`.
fn glob_match(pattern: &[u8], s: &[u8]) -> bool {
    match (pattern.first(), s.first()) {
        (None, None) => true,
        (Some(b'*'), _) => glob_match(&pattern[1..], s) || (!s.is_empty() && glob_match(pattern, &s[1..])),
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &s[1..]),
        (Some(p), Some(c)) if p == c => glob_match(&pattern[1..], &s[1..]),
        _ => false,
    }
}
