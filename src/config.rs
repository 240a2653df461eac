//! Client configuration and URL parsing.
//!
//! Accepted URL forms:
//!
//! ```text
//! redis://[user:pass@]host[:port][/db]
//! redis+sentinel://[user:pass@]master@host[:port][,host[:port]...][/db]
//! ```

use std::time::Duration;

use crate::error::{RsedisError, Result};

/// Port used when a `redis://` URL names none.
pub const DEFAULT_PORT: u16 = 6379;
/// Port used for sentinel monitors listed without one.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// Where the primary lives.
#[derive(Debug, Clone, PartialEq)]
pub enum Topology {
    /// A fixed server at `host:port`.
    Standalone,
    /// Resolved by asking sentinel monitors for `master_name`.
    Sentinel {
        master_name: String,
        sentinels: Vec<(String, u16)>,
    },
}

/// Settings shared by the client, its pool and every connection it opens.
///
/// Timeouts are in milliseconds. For read and write timeouts `0` disables
/// the deadline.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Standalone server host; the first monitor in sentinel mode.
    pub host: String,
    pub port: u16,
    /// ACL user sent with AUTH.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Selected with SELECT after connecting when non-zero.
    pub db: u16,
    pub topology: Topology,
    /// Upper bound on live pooled connections.
    pub pool_size: usize,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// How long a checkout waits for a free slot.
    pub pool_timeout_ms: u64,
    /// Idle connections older than this are closed at checkout.
    pub idle_timeout_ms: u64,
    /// Read buffer ceiling per connection, in bytes.
    pub max_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            db: 0,
            topology: Topology::Standalone,
            pool_size: 10,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            pool_timeout_ms: 5_000,
            idle_timeout_ms: 300_000,
            max_buffer_size: crate::connection::tcp::DEFAULT_MAX_BUF_SIZE,
        }
    }
}

/// `0` means no deadline.
pub(crate) fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl ConnectionConfig {
    /// Build a configuration from a `redis://` or `redis+sentinel://` URL.
    ///
    /// Fields the URL does not mention keep their defaults.
    pub fn from_url(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| bad_url(format!("missing scheme in {url:?}")))?;

        let mut config = Self::default();
        let (authority, db) = split_path(rest);
        if let Some(db) = db {
            config.db = db
                .parse()
                .map_err(|_| bad_url(format!("invalid db number: {db}")))?;
        }

        match scheme {
            "redis" => config.apply_standalone(authority)?,
            "redis+sentinel" => config.apply_sentinel(authority)?,
            "rediss" | "redis+sentinels" => {
                return Err(bad_url(format!("TLS is not supported: {scheme}://")));
            }
            other => return Err(bad_url(format!("unknown URL scheme: {other}"))),
        }
        Ok(config)
    }

    /// `host:port` of the standalone server.
    pub fn primary_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// `[userinfo@]host[:port]`
    fn apply_standalone(&mut self, authority: &str) -> Result<()> {
        let endpoint = match authority.rsplit_once('@') {
            Some((userinfo, endpoint)) => {
                self.apply_userinfo(userinfo);
                endpoint
            }
            None => authority,
        };
        (self.host, self.port) = host_port(endpoint, DEFAULT_PORT)?;
        Ok(())
    }

    /// `[userinfo@]master@monitor[,monitor...]`
    ///
    /// The last `@` ends the master name; an earlier one ends the credentials.
    fn apply_sentinel(&mut self, authority: &str) -> Result<()> {
        let (prefix, monitors) = authority.rsplit_once('@').ok_or_else(|| {
            bad_url("sentinel URL must name the master: redis+sentinel://master@host:port".into())
        })?;
        let master_name = match prefix.rsplit_once('@') {
            Some((userinfo, master)) => {
                self.apply_userinfo(userinfo);
                master
            }
            None => prefix,
        };
        if master_name.is_empty() {
            return Err(bad_url("empty sentinel master name".into()));
        }

        let sentinels = monitors
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(|m| host_port(m, DEFAULT_SENTINEL_PORT))
            .collect::<Result<Vec<_>>>()?;
        let Some((host, port)) = sentinels.first().cloned() else {
            return Err(bad_url("sentinel URL lists no monitors".into()));
        };

        self.host = host;
        self.port = port;
        self.topology = Topology::Sentinel {
            master_name: master_name.to_owned(),
            sentinels,
        };
        Ok(())
    }

    /// `user:pass`, `:pass`, or a bare password.
    fn apply_userinfo(&mut self, userinfo: &str) {
        let (user, pass) = userinfo.split_once(':').unwrap_or(("", userinfo));
        if !user.is_empty() {
            self.username = Some(user.to_owned());
        }
        if !pass.is_empty() {
            self.password = Some(pass.to_owned());
        }
    }
}

fn bad_url(msg: String) -> RsedisError {
    RsedisError::Protocol(msg)
}

/// Split off the `/db` suffix; an empty suffix counts as absent.
fn split_path(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('/') {
        Some((authority, db)) => (authority, Some(db).filter(|d| !d.is_empty())),
        None => (rest, None),
    }
}

/// `host[:port]`, `[v6]:port`, or an unbracketed IPv6 address.
/// An empty host means loopback.
fn host_port(s: &str, default_port: u16) -> Result<(String, u16)> {
    let parse_port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| bad_url(format!("invalid port: {p}")))
    };

    let (host, port) = if let Some(bracketed) = s.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| bad_url(format!("unclosed IPv6 bracket: {s}")))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None => default_port,
        };
        (host, port)
    } else {
        match s.rsplit_once(':') {
            // More than one colon and no brackets: the whole thing is an address.
            Some((h, _)) if h.contains(':') => (s, default_port),
            Some((h, p)) => (h, parse_port(p)?),
            None => (s, default_port),
        }
    };

    let host = if host.is_empty() { "127.0.0.1" } else { host };
    Ok((host.to_owned(), port))
}

// ── Tests ──────────────────────────────────────────────────────────
