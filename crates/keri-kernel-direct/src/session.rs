//! A direct-mode session: one local habitat talking to one peer.
//!
//! On every tick the session performs any scripted action due, sends the
//! part of its own log the peer has not seen, and feeds received bytes into
//! its kernel. The receive buffer persists across ticks, so a message split
//! over several deliveries is processed once the last piece arrives.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use keri_kernel::{Habitat, Kernel};
use keri_kernel_core::{KeyState, Prefix, ProcessOutcome, Seal};
use keri_kernel_store::LogStore;

use crate::doist::{Doer, Step};
use crate::error::{DirectError, Result};
use crate::transport::Transport;

/// Something the local controller does at a scripted tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Rotate to the pre-committed keys.
    Rotate,
    /// Issue an interaction anchoring these seals.
    Interact(Vec<Seal>),
    /// Issue an interaction anchoring the latest event of every known peer.
    InteractPeers,
    /// Close the transport and finish.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scripted {
    pub at: u64,
    pub action: Action,
}

/// Session behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub script: Vec<Scripted>,
    /// Finish once the script has run and the peer has closed.
    pub finish_on_peer_close: bool,
}

impl SessionConfig {
    pub fn at(mut self, tick: u64, action: Action) -> Self {
        self.script.push(Scripted { at: tick, action });
        self
    }

    pub fn with_finish_on_peer_close(mut self, finish: bool) -> Self {
        self.finish_on_peer_close = finish;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Exchanging logs.
    Running,
    Closed,
}

pub struct Session<S: LogStore, T: Transport> {
    habitat: Habitat,
    kernel: Kernel<S>,
    transport: T,
    config: SessionConfig,
    phase: SessionPhase,
    /// Bytes received but not yet consumed as whole messages.
    rx: BytesMut,
    /// Own log messages already sent.
    sent: usize,
    /// Script entries already performed.
    performed: usize,
}

impl<S: LogStore, T: Transport> Session<S, T> {
    /// Start a session. The habitat's existing log is accepted locally and
    /// queued for the peer.
    pub fn new(
        habitat: Habitat,
        mut kernel: Kernel<S>,
        transport: T,
        mut config: SessionConfig,
    ) -> Result<Self> {
        for msg in habitat.kel() {
            kernel.ingest_message(msg.clone())?;
        }
        config.script.sort_by_key(|s| s.at);
        debug!(prefix = %habitat.prefix(), "session started");
        Ok(Self {
            habitat,
            kernel,
            transport,
            config,
            phase: SessionPhase::Running,
            rx: BytesMut::new(),
            sent: 0,
            performed: 0,
        })
    }

    pub fn prefix(&self) -> &Prefix {
        self.habitat.prefix()
    }

    pub fn habitat(&self) -> &Habitat {
        &self.habitat
    }

    pub fn kernel(&self) -> &Kernel<S> {
        &self.kernel
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Identifiers learned from the peer.
    pub fn peers(&self) -> Vec<Prefix> {
        let mut peers: Vec<_> = self
            .kernel
            .router()
            .prefixes()
            .filter(|p| *p != self.habitat.prefix())
            .cloned()
            .collect();
        peers.sort();
        peers
    }

    /// Key state of a peer identifier as this side has verified it.
    pub fn peer_state(&self, prefix: &Prefix) -> Option<&KeyState> {
        self.kernel.key_state(prefix)
    }

    pub fn close(&mut self) {
        if self.phase != SessionPhase::Closed {
            self.transport.close();
            self.phase = SessionPhase::Closed;
            info!(prefix = %self.habitat.prefix(), "session closed");
        }
    }

    fn perform(&mut self, action: Action) -> Result<()> {
        let msg = match action {
            Action::Rotate => self.habitat.rotate()?,
            Action::Interact(seals) => self.habitat.interact(seals)?,
            Action::InteractPeers => {
                let seals = self
                    .peers()
                    .iter()
                    .filter_map(|p| self.kernel.key_state(p))
                    .map(|s| Seal::Event {
                        prefix: s.prefix.clone(),
                        sn: s.sn,
                        digest: s.last_digest,
                    })
                    .collect();
                self.habitat.interact(seals)?
            }
            Action::Close => {
                self.flush()?;
                self.close();
                return Ok(());
            }
        };
        debug!(
            prefix = %self.habitat.prefix(),
            sn = msg.sn(),
            ilk = %msg.inner().ilk(),
            "local event issued"
        );
        self.kernel.ingest_message(msg)?;
        Ok(())
    }

    /// Send own log messages the peer has not been sent yet. Returns false
    /// once the peer has hung up.
    fn flush(&mut self) -> Result<bool> {
        let kel = self.habitat.kel();
        while self.sent < kel.len() {
            match self.transport.send(kel[self.sent].to_bytes()?) {
                Ok(()) => self.sent += 1,
                Err(DirectError::Closed) => {
                    info!(
                        prefix = %self.habitat.prefix(),
                        unsent = kel.len() - self.sent,
                        "peer closed, local events not delivered"
                    );
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn receive(&mut self) -> Result<()> {
        if self.transport.recv_into(&mut self.rx)? == 0 {
            return Ok(());
        }
        for report in self.kernel.ingest_stream(&mut self.rx)? {
            let outcomes = std::iter::once(&report.outcome).chain(report.replayed.iter());
            for outcome in outcomes {
                match outcome {
                    ProcessOutcome::Accepted { prefix, sn, .. } => {
                        info!(
                            local = %self.habitat.prefix(),
                            peer = %prefix,
                            sn,
                            "peer event accepted"
                        );
                    }
                    ProcessOutcome::Rejected { prefix, sn, error } => {
                        warn!(peer = %prefix, sn, %error, "peer event rejected");
                    }
                    ProcessOutcome::Duplicity { prefix, sn } => {
                        warn!(peer = %prefix, sn, "peer duplicity");
                    }
                    ProcessOutcome::Malformed { error } => {
                        warn!(%error, "malformed bytes from peer, buffer discarded");
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

impl<S: LogStore, T: Transport> Doer for Session<S, T> {
    fn tick(&mut self, tick: u64) -> Result<Step> {
        if self.phase == SessionPhase::Closed {
            return Ok(Step::Done);
        }

        while let Some(next) = self.config.script.get(self.performed) {
            if next.at > tick {
                break;
            }
            let action = next.action.clone();
            self.performed += 1;
            self.perform(action)?;
            if self.phase == SessionPhase::Closed {
                return Ok(Step::Done);
            }
        }

        let reachable = self.flush()?;
        self.receive()?;
        if !reachable {
            self.close();
            return Ok(Step::Done);
        }

        let script_done = self.performed == self.config.script.len();
        if !self.transport.is_open() && script_done && self.config.finish_on_peer_close {
            self.close();
            return Ok(Step::Done);
        }
        Ok(Step::Continue)
    }
}

impl<S: LogStore, T: Transport> std::fmt::Debug for Session<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("habitat", &self.habitat)
            .field("phase", &self.phase)
            .field("sent", &self.sent)
            .field("buffered", &self.rx.len())
            .finish()
    }
}
