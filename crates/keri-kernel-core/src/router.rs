//! Multi-identifier event routing.
//!
//! The [`EventRouter`] parses signed messages from raw bytes, dispatches each
//! to the validator of its identifier, escrows events that arrive before
//! their predecessors and replays them once the gap closes. Every call yields
//! a structured [`ProcessReport`]; validation failures of one identifier
//! never affect another.

use std::collections::HashMap;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::canonical::Parsed;
use crate::crypto::Digest;
use crate::derivation::MatterCode;
use crate::error::{CoreError, ValidationError};
use crate::escrow::{Escrow, EscrowInsert, EscrowReason};
use crate::event::Event;
use crate::message::{parse_message, SignedMessage};
use crate::prefix::Prefix;
use crate::state::KeyState;
use crate::validation::EventValidator;

/// Router limits and digest algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Maximum number of escrowed events across all identifiers.
    pub max_escrow_size: usize,
    /// Maximum number of escrowed events for any one identifier.
    pub max_escrow_per_prefix: usize,
    /// Router calls an escrowed event survives before it is dropped.
    pub escrow_lifetime: u64,
    /// Maximum escrowed events replayed per accepted event.
    pub max_replay_depth: usize,
    /// Replay passes an escrowed event survives before it is dropped.
    pub escrow_retry_budget: u32,
    /// Algorithm for digests of accepted events.
    pub digest_code: MatterCode,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_escrow_size: 1024,
            max_escrow_per_prefix: 64,
            escrow_lifetime: 4096,
            max_replay_depth: 64,
            escrow_retry_budget: 32,
            digest_code: MatterCode::Blake3_256,
        }
    }
}

impl RouterConfig {
    pub fn with_max_escrow_size(mut self, size: usize) -> Self {
        self.max_escrow_size = size;
        self
    }

    pub fn with_max_escrow_per_prefix(mut self, size: usize) -> Self {
        self.max_escrow_per_prefix = size;
        self
    }

    pub fn with_escrow_lifetime(mut self, calls: u64) -> Self {
        self.escrow_lifetime = calls;
        self
    }

    pub fn with_max_replay_depth(mut self, depth: usize) -> Self {
        self.max_replay_depth = depth;
        self
    }

    pub fn with_escrow_retry_budget(mut self, budget: u32) -> Self {
        self.escrow_retry_budget = budget;
        self
    }

    pub fn with_digest_code(mut self, code: MatterCode) -> Self {
        self.digest_code = code;
        self
    }
}

/// Evidence of two validly signed events at one sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicityRecord {
    pub prefix: Prefix,
    pub sn: u64,
    pub accepted: Digest,
    pub conflicting: Vec<Digest>,
}

/// Outcome of processing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Accepted { prefix: Prefix, sn: u64, digest: Digest },
    Escrowed { prefix: Prefix, sn: u64, reason: EscrowReason },
    /// Resubmission of an already accepted event.
    Ignored { prefix: Prefix, sn: u64 },
    Rejected { prefix: Prefix, sn: u64, error: ValidationError },
    Duplicity { prefix: Prefix, sn: u64 },
    NeedMoreInput { needed: usize },
    Malformed { error: CoreError },
}

impl ProcessOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProcessOutcome::Accepted { .. })
    }
}

/// Everything one call to the router did.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    /// Bytes consumed from the head of the input.
    pub consumed: usize,
    pub outcome: ProcessOutcome,
    /// Outcomes of escrowed events replayed because of this message.
    pub replayed: Vec<ProcessOutcome>,
    /// Messages accepted by this call, in acceptance order, replays included.
    pub accepted: Vec<SignedMessage>,
}

#[derive(Default)]
struct Effects {
    replayed: Vec<ProcessOutcome>,
    accepted: Vec<SignedMessage>,
}

/// Routes messages to per-identifier validators.
#[derive(Debug)]
pub struct EventRouter {
    config: RouterConfig,
    validators: HashMap<Prefix, EventValidator>,
    escrow: Escrow,
    duplicity: Vec<DuplicityRecord>,
}

impl EventRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            escrow: Escrow::new(config.max_escrow_size)
                .with_prefix_limit(config.max_escrow_per_prefix),
            config,
            validators: HashMap::new(),
            duplicity: Vec::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Parse and process one message from the head of `input`.
    pub fn process_one(&mut self, input: &[u8]) -> ProcessReport {
        match parse_message(input) {
            Ok(Parsed::Complete { value, consumed }) => {
                let mut report = self.process_message(value);
                report.consumed = consumed;
                report
            }
            Ok(Parsed::Incomplete { needed }) => {
                trace!(needed, "waiting for more input");
                ProcessReport {
                    consumed: 0,
                    outcome: ProcessOutcome::NeedMoreInput { needed },
                    replayed: Vec::new(),
                    accepted: Vec::new(),
                }
            }
            Err(error) => {
                debug!(%error, "malformed message");
                self.tick_escrow();
                ProcessReport {
                    consumed: 0,
                    outcome: ProcessOutcome::Malformed { error },
                    replayed: Vec::new(),
                    accepted: Vec::new(),
                }
            }
        }
    }

    /// Process an already parsed message.
    pub fn process_message(&mut self, msg: SignedMessage) -> ProcessReport {
        self.tick_escrow();
        let mut fx = Effects::default();
        let outcome = self.dispatch(msg, &mut fx);
        ProcessReport {
            consumed: 0,
            outcome,
            replayed: fx.replayed,
            accepted: fx.accepted,
        }
    }

    /// Drain complete messages from `buf`, leaving a partial tail in place.
    ///
    /// A malformed message discards the rest of the buffer, since message
    /// boundaries can no longer be trusted.
    pub fn process_stream(&mut self, buf: &mut BytesMut) -> Vec<ProcessReport> {
        let mut reports = Vec::new();
        while !buf.is_empty() {
            let report = self.process_one(&buf[..]);
            match report.outcome {
                ProcessOutcome::NeedMoreInput { .. } => {
                    reports.push(report);
                    break;
                }
                ProcessOutcome::Malformed { .. } => {
                    warn!(discarded = buf.len(), "discarding stream after malformed message");
                    buf.clear();
                    reports.push(report);
                    break;
                }
                _ => {
                    buf.advance(report.consumed);
                    reports.push(report);
                }
            }
        }
        reports
    }

    pub fn key_state(&self, prefix: &Prefix) -> Option<&KeyState> {
        self.validators.get(prefix).and_then(EventValidator::state)
    }

    pub fn validator(&self, prefix: &Prefix) -> Option<&EventValidator> {
        self.validators.get(prefix)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &Prefix> {
        self.validators.keys()
    }

    pub fn duplicity_records(&self) -> &[DuplicityRecord] {
        &self.duplicity
    }

    pub fn escrow_len(&self) -> usize {
        self.escrow.len()
    }

    /// Sequence numbers escrowed for `prefix`.
    pub fn escrowed_sns(&self, prefix: &Prefix) -> Vec<u64> {
        self.escrow.sns(prefix)
    }

    /// Drop all escrowed events for `prefix`.
    pub fn purge_escrow(&mut self, prefix: &Prefix) -> usize {
        let purged = self.escrow.purge(prefix);
        if purged > 0 {
            debug!(prefix = %prefix, purged, "escrow purged");
        }
        purged
    }

    /// Record duplicity discovered outside the router, for example a stored
    /// event that conflicts with a replayed one. Freezes the identifier.
    pub fn mark_duplicitous(&mut self, prefix: &Prefix, sn: u64, conflicting: Digest) {
        let Some(validator) = self.validators.get_mut(prefix) else {
            warn!(prefix = %prefix, sn, "duplicity reported for unknown identifier");
            return;
        };
        validator.mark_compromised(sn);
        let accepted = validator.digest_at(sn).unwrap_or(conflicting);
        self.note_duplicity(prefix, sn, accepted, conflicting);
    }

    fn tick_escrow(&mut self) {
        let expired = self.escrow.tick(self.config.escrow_lifetime);
        if expired > 0 {
            debug!(expired, "escrowed events expired");
        }
    }

    fn dispatch(&mut self, msg: SignedMessage, fx: &mut Effects) -> ProcessOutcome {
        let prefix = msg.prefix().clone();
        let sn = msg.sn();

        if !self.validators.contains_key(&prefix) {
            if !matches!(msg.inner(), Event::Inception(_)) {
                return self.escrow(msg, EscrowReason::MissingInception);
            }
            let mut validator = EventValidator::new(self.config.digest_code);
            let digest = match validator.apply(&msg) {
                Ok(state) => state.last_digest,
                Err(error) => return reject(prefix, sn, error),
            };
            self.validators.insert(prefix.clone(), validator);
            fx.accepted.push(msg);
            self.replay(&prefix, fx);
            return ProcessOutcome::Accepted { prefix, sn, digest };
        }

        let outcome = self.apply(msg, fx);
        if outcome.is_accepted() {
            self.replay(&prefix, fx);
        }
        outcome
    }

    /// Apply a message to an existing validator.
    fn apply(&mut self, msg: SignedMessage, fx: &mut Effects) -> ProcessOutcome {
        let prefix = msg.prefix().clone();
        let sn = msg.sn();
        let Some(validator) = self.validators.get_mut(&prefix) else {
            return self.escrow(msg, EscrowReason::MissingInception);
        };

        match validator.apply(&msg).map(|s| s.last_digest) {
            Ok(digest) => {
                fx.accepted.push(msg);
                ProcessOutcome::Accepted { prefix, sn, digest }
            }
            Err(ValidationError::SequenceGap { .. }) => self.escrow(msg, EscrowReason::OutOfOrder),
            Err(ValidationError::SequenceReplay { .. }) => {
                trace!(prefix = %prefix, sn, "replayed event ignored");
                ProcessOutcome::Ignored { prefix, sn }
            }
            Err(ValidationError::Duplicity { .. }) => {
                let accepted = validator.digest_at(sn);
                match (accepted, msg.event.digest(self.config.digest_code)) {
                    (Some(accepted), Ok(conflicting)) if accepted != conflicting => {
                        self.note_duplicity(&prefix, sn, accepted, conflicting);
                    }
                    _ => {}
                }
                ProcessOutcome::Duplicity { prefix, sn }
            }
            Err(error) => reject(prefix, sn, error),
        }
    }

    fn escrow(&mut self, msg: SignedMessage, reason: EscrowReason) -> ProcessOutcome {
        let prefix = msg.prefix().clone();
        let sn = msg.sn();
        match self.escrow.insert(msg, reason) {
            EscrowInsert::Stored | EscrowInsert::Duplicate => {
                debug!(prefix = %prefix, sn, ?reason, "event escrowed");
                ProcessOutcome::Escrowed { prefix, sn, reason }
            }
            EscrowInsert::Full => {
                warn!(prefix = %prefix, sn, "escrow full, event dropped");
                reject(
                    prefix,
                    sn,
                    ValidationError::EscrowFull {
                        capacity: self.escrow.capacity(),
                    },
                )
            }
            EscrowInsert::PrefixFull => {
                warn!(prefix = %prefix, sn, "escrow share of identifier exhausted, event dropped");
                reject(
                    prefix,
                    sn,
                    ValidationError::EscrowFull {
                        capacity: self.escrow.prefix_limit(),
                    },
                )
            }
        }
    }

    /// Replay escrowed events for `prefix` in ascending order until a gap.
    fn replay(&mut self, prefix: &Prefix, fx: &mut Effects) {
        let mut budget = self.config.max_replay_depth;
        loop {
            let Some(current) = self.key_state(prefix).map(|s| s.sn) else {
                break;
            };

            // Events at or below the accepted sn are replays or conflicts.
            for stale in self.escrow.take_through(prefix, current) {
                let outcome = self.apply(stale.message, fx);
                fx.replayed.push(outcome);
            }

            if budget == 0 {
                break;
            }
            let candidates = self.escrow.take(prefix, current + 1);
            if candidates.is_empty() {
                break;
            }
            let mut advanced = false;
            for candidate in candidates {
                budget = budget.saturating_sub(1);
                let outcome = self.apply(candidate.message, fx);
                advanced |= outcome.is_accepted();
                fx.replayed.push(outcome);
            }
            if !advanced {
                break;
            }
        }

        let dropped = self.escrow.age(prefix, self.config.escrow_retry_budget);
        if dropped > 0 {
            debug!(prefix = %prefix, dropped, "escrowed events exceeded retry budget");
        }
    }

    fn note_duplicity(&mut self, prefix: &Prefix, sn: u64, accepted: Digest, conflicting: Digest) {
        if let Some(record) = self
            .duplicity
            .iter_mut()
            .find(|r| &r.prefix == prefix && r.sn == sn)
        {
            if !record.conflicting.contains(&conflicting) {
                record.conflicting.push(conflicting);
            }
            return;
        }
        if self.duplicity.iter().any(|r| &r.prefix == prefix) {
            return;
        }
        warn!(prefix = %prefix, sn, "duplicity recorded");
        self.duplicity.push(DuplicityRecord {
            prefix: prefix.clone(),
            sn,
            accepted,
            conflicting: vec![conflicting],
        });
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

fn reject(prefix: Prefix, sn: u64, error: ValidationError) -> ProcessOutcome {
    if error.is_fatal() {
        warn!(prefix = %prefix, sn, %error, "event rejected");
    } else {
        debug!(prefix = %prefix, sn, %error, "event rejected");
    }
    ProcessOutcome::Rejected { prefix, sn, error }
}
