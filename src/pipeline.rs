//! Command pipelining.
//!
//! Queued commands go out in a single write on one pooled connection; the
//! replies are read back in submission order and attached one per command.

use tracing::{debug, warn};

use crate::client::{effective, Client};
use crate::cmd::Cmd;
use crate::error::Result;
use crate::resp::writer::encode_pipeline;

/// A batch of commands executed with one round trip.
pub struct Pipeline<'a> {
    client: &'a Client,
    cmds: Vec<Cmd>,
}

impl<'a> Pipeline<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            cmds: Vec::new(),
        }
    }

    /// Append a command to the batch.
    pub fn queue(&mut self, cmd: Cmd) -> &mut Self {
        self.cmds.push(cmd);
        self
    }

    /// Drop every queued command.
    pub fn discard(&mut self) {
        self.cmds.clear();
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Send the batch and collect one reply per command.
    ///
    /// Fails only when no connection can be obtained. Every other outcome is
    /// recorded on the returned commands: a server error on the command that
    /// caused it, a transport error on every command whose reply was not yet
    /// read. An empty batch performs no I/O.
    pub async fn exec(&mut self) -> Result<Vec<Cmd>> {
        let mut cmds = std::mem::take(&mut self.cmds);
        if cmds.is_empty() {
            return Ok(cmds);
        }
        for cmd in cmds.iter_mut() {
            cmd.reset();
        }

        let mut guard = self.client.conn().await?;
        let (read_default, write_default) = self.client.default_timeouts();
        let conn = guard.conn();

        // One write for the whole batch, so it gets the most lenient of the
        // per-command write deadlines.
        let write_timeout = cmds
            .iter()
            .map(|c| effective(c.write_timeout(), write_default))
            .try_fold(std::time::Duration::ZERO, |acc, d| d.map(|d| acc.max(d)));
        conn.set_timeouts(read_default, write_timeout);

        let wire = encode_pipeline(cmds.iter().map(|c| c.arguments()));
        if let Err(e) = conn.send_raw(&wire).await {
            debug!(len = cmds.len(), error = %e, "pipeline write failed");
            for cmd in cmds.iter_mut() {
                cmd.set_err(e.clone());
            }
            guard.remove();
            return Ok(cmds);
        }

        for i in 0..cmds.len() {
            conn.set_timeouts(effective(cmds[i].read_timeout(), read_default), write_timeout);
            match conn.read_response().await {
                Ok(value) => cmds[i].set_reply(value),
                Err(e) => {
                    debug!(index = i, error = %e, "pipeline read failed");
                    for cmd in cmds[i..].iter_mut() {
                        cmd.set_err(e.clone());
                    }
                    guard.remove();
                    return Ok(cmds);
                }
            }
        }

        if let Err(e) = guard.release() {
            warn!(error = %e, "pipeline connection dropped after replies");
        }
        Ok(cmds)
    }
}
