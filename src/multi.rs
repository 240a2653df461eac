//! MULTI/EXEC transactions with optimistic locking (WATCH).
//!
//! A [`Tx`] holds one pooled connection for its whole life, since WATCHed
//! keys are server-side state of that connection. Outside a transaction
//! block commands run immediately; after [`Tx::begin`] they are queued and
//! sent as `MULTI … EXEC` in one write.

use std::time::Duration;

use tracing::{debug, warn};

use crate::client::{effective, Client};
use crate::cmd::{self, Cmd, ToArg};
use crate::connection::pool::PoolGuard;
use crate::connection::tcp::RedisConnection;
use crate::error::{RsedisError, Result};
use crate::resp::types::RespValue;
use crate::resp::writer::encode_into;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Queuing,
}

/// A transaction session.
pub struct Tx<'a> {
    client: &'a Client,
    /// `None` after a transport error discarded the connection; the next
    /// operation checks out a fresh one.
    guard: Option<PoolGuard<'a>>,
    state: TxState,
    queue: Vec<Cmd>,
    watching: bool,
    /// Set when the connection holding a WATCH was discarded. The next EXEC
    /// fails instead of running unguarded on a fresh connection.
    watch_lost: bool,
    closed: bool,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(client: &'a Client, guard: PoolGuard<'a>) -> Self {
        Self {
            client,
            guard: Some(guard),
            state: TxState::Idle,
            queue: Vec::new(),
            watching: false,
            watch_lost: false,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(RsedisError::Closed)
        } else {
            Ok(())
        }
    }

    async fn conn(&mut self) -> Result<&mut RedisConnection> {
        if self.guard.is_none() {
            let client: &'a Client = self.client;
            self.guard = Some(client.conn().await?);
        }
        match self.guard.as_mut() {
            Some(guard) => Ok(guard.conn()),
            None => Err(RsedisError::Closed),
        }
    }

    fn drop_conn(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.remove();
        }
        if self.watching {
            warn!("connection holding WATCHed keys was lost");
            self.watch_lost = true;
        }
        self.watching = false;
    }

    /// Run `cmd` now on the session connection.
    async fn run(&mut self, cmd: &mut Cmd) -> Result<()> {
        cmd.reset();
        let (read_default, write_default) = self.client.default_timeouts();
        let outcome = match self.conn().await {
            Ok(conn) => {
                conn.set_timeouts(
                    effective(cmd.read_timeout(), read_default),
                    effective(cmd.write_timeout(), write_default),
                );
                conn.execute(cmd.arguments()).await
            }
            Err(e) => {
                cmd.set_err(e.clone());
                return Err(e);
            }
        };
        match outcome {
            Ok(value) => cmd.set_reply(value),
            Err(e) => {
                debug!(cmd = %cmd.name(), error = %e, "transport error in transaction session");
                self.drop_conn();
                cmd.set_err(e);
            }
        }
        match cmd.err() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Execute `cmd` immediately, or queue a copy of it inside a
    /// transaction block.
    ///
    /// A queued command gets its reply in the list returned by
    /// [`Tx::exec`]; `cmd` itself is left untouched.
    pub async fn process(&mut self, cmd: &mut Cmd) -> Result<()> {
        self.check_open()?;
        match self.state {
            TxState::Idle => self.run(cmd).await,
            TxState::Queuing => {
                self.queue.push(cmd.clone());
                Ok(())
            }
        }
    }

    /// WATCH `keys` for the next EXEC.
    pub async fn watch<I>(&mut self, keys: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.check_open()?;
        self.run(&mut cmd::watch(keys)).await?;
        self.watching = true;
        Ok(())
    }

    /// Forget every WATCHed key, including ones lost with a dropped
    /// connection.
    pub async fn unwatch(&mut self) -> Result<()> {
        self.check_open()?;
        self.run(&mut cmd::unwatch()).await?;
        self.watching = false;
        self.watch_lost = false;
        Ok(())
    }

    /// Enter the transaction block; later commands are queued.
    pub fn begin(&mut self) -> Result<()> {
        self.check_open()?;
        self.state = TxState::Queuing;
        Ok(())
    }

    /// Queue `cmd`, entering the transaction block if needed.
    pub fn queue(&mut self, cmd: Cmd) -> Result<&mut Self> {
        self.check_open()?;
        self.state = TxState::Queuing;
        self.queue.push(cmd);
        Ok(self)
    }

    /// Drop the queued commands. The block stays open.
    pub fn discard(&mut self) -> Result<()> {
        self.check_open()?;
        self.queue.clear();
        Ok(())
    }

    pub fn is_queuing(&self) -> bool {
        self.state == TxState::Queuing
    }

    /// Send `MULTI`, the queued commands and `EXEC`, and attach the results.
    ///
    /// * aborted by a WATCHed key: [`RsedisError::TxFailed`], also recorded on
    ///   every command;
    /// * rejected at queue time (EXECABORT): that error, recorded on every
    ///   command;
    /// * otherwise each command carries its own reply or error.
    ///
    /// An empty queue still runs `MULTI`/`EXEC`, which releases any WATCH.
    /// If the connection holding a WATCH was lost since the last EXEC, nothing
    /// is sent and the result is [`RsedisError::TxFailed`].
    /// The session is back in the idle state afterwards and no keys are
    /// watched.
    pub async fn exec(&mut self) -> Result<Vec<Cmd>> {
        self.check_open()?;
        self.state = TxState::Idle;
        let mut cmds = std::mem::take(&mut self.queue);
        for cmd in cmds.iter_mut() {
            cmd.reset();
        }
        if std::mem::take(&mut self.watch_lost) {
            return Err(fail_all(&mut cmds, RsedisError::TxFailed));
        }

        let outcome = self.exec_cmds(&mut cmds).await;
        self.watching = false;
        if let Err(e) = &outcome {
            if e.is_transport() {
                self.drop_conn();
            }
        }
        outcome.map(|()| cmds)
    }

    async fn exec_cmds(&mut self, cmds: &mut [Cmd]) -> Result<()> {
        let (read_default, write_default) = self.client.default_timeouts();
        // The block goes out in one write and the EXEC reply carries every
        // result, so both deadlines follow the most patient command.
        let (read_timeout, write_timeout) = if cmds.is_empty() {
            (read_default, write_default)
        } else {
            (
                most_lenient(cmds.iter().map(|c| effective(c.read_timeout(), read_default))),
                most_lenient(cmds.iter().map(|c| effective(c.write_timeout(), write_default))),
            )
        };

        let mut wire = Vec::new();
        encode_into(&mut wire, &["MULTI"]);
        for cmd in cmds.iter() {
            encode_into(&mut wire, cmd.arguments());
        }
        encode_into(&mut wire, &["EXEC"]);

        let conn = match self.conn().await {
            Ok(conn) => conn,
            Err(e) => return Err(fail_all(cmds, e)),
        };
        conn.set_timeouts(read_timeout, write_timeout);
        if let Err(e) = conn.send_raw(&wire).await {
            return Err(fail_all(cmds, e));
        }

        // MULTI ack.
        let mut block_err = match conn.read_response().await {
            Ok(RespValue::Error(msg)) => Some(RsedisError::redis(msg)),
            Ok(_) => None,
            Err(e) => return Err(fail_all(cmds, e)),
        };

        // One QUEUED (or queue-time error) per command.
        for i in 0..cmds.len() {
            match conn.read_response().await {
                Ok(value @ RespValue::Error(_)) => cmds[i].set_reply(value),
                Ok(_) => {}
                Err(e) => return Err(fail_all(cmds, e)),
            }
        }

        let reply = match conn.read_response().await {
            Ok(reply) => reply,
            Err(e) => return Err(fail_all(cmds, e)),
        };
        match reply {
            RespValue::NullArray => {
                debug!("transaction aborted by a watched key");
                Err(fail_all(cmds, RsedisError::TxFailed))
            }
            RespValue::Error(msg) => Err(fail_all(cmds, RsedisError::redis(msg))),
            RespValue::Array(items) if items.len() == cmds.len() => {
                for (cmd, item) in cmds.iter_mut().zip(items) {
                    cmd.set_reply(item);
                }
                match block_err.take() {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
            other => {
                conn.mark_broken();
                Err(fail_all(
                    cmds,
                    RsedisError::Protocol(format!(
                        "EXEC returned {} for {} queued commands",
                        describe(&other),
                        cmds.len()
                    )),
                ))
            }
        }
    }

    /// End the session: UNWATCH if needed and return the connection to the
    /// pool. Every later operation fails with [`RsedisError::Closed`].
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let mut result = Ok(());
        if self.watching && self.guard.is_some() {
            result = self.run(&mut cmd::unwatch()).await;
            if result.is_ok() {
                self.watching = false;
            }
        }
        self.closed = true;
        self.queue.clear();
        if let Some(guard) = self.guard.take() {
            if self.watching {
                guard.remove();
            } else if let Err(e) = guard.release() {
                warn!(error = %e, "transaction connection dropped on close");
                result = result.and(Err(e));
            }
        }
        result
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        // A connection with WATCHed keys must not be reused by others.
        if self.watching {
            if let Some(guard) = self.guard.take() {
                guard.remove();
            }
        }
    }
}

/// Longest of `timeouts`; `None` (no deadline) wins.
fn most_lenient(mut timeouts: impl Iterator<Item = Option<Duration>>) -> Option<Duration> {
    timeouts.try_fold(Duration::ZERO, |acc, d| d.map(|d| acc.max(d)))
}

fn fail_all(cmds: &mut [Cmd], err: RsedisError) -> RsedisError {
    for cmd in cmds.iter_mut() {
        cmd.set_err(err.clone());
    }
    err
}

fn describe(value: &RespValue) -> String {
    match value {
        RespValue::Array(items) => format!("{} replies", items.len()),
        other => other.type_name().to_string(),
    }
}
