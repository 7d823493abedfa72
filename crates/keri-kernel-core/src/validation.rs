//! Per-identifier event validation.
//!
//! An [`EventValidator`] owns the key event log of one identifier and applies
//! signed events to it one at a time:
//!
//! - Inception: self-certifying prefix, own threshold over own keys
//! - Rotation: chained prior digest, current threshold over current keys, new
//!   keys match the prior next-keys commitment
//! - Interaction: chained prior digest, current threshold over current keys
//!
//! A second validly signed event at an already accepted sequence number is
//! duplicity. The validator then stops advancing and keeps its accepted
//! history pinned.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::canonical::SerialKind;
use crate::crypto::{
    duplicate_key, next_commitment, Digest, IndexedSignature, PublicKey, Qualified,
};
use crate::derivation::MatterCode;
use crate::error::ValidationError;
use crate::event::{Event, Inception, Interaction, Rotation};
use crate::message::SignedMessage;
use crate::state::KeyState;
use crate::threshold::Threshold;

/// Lifecycle of a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorPhase {
    Uninitialized,
    Active,
    /// Duplicity was detected at `since`.
    Compromised { since: u64 },
}

/// One accepted event and the state it produced.
#[derive(Debug, Clone)]
struct AcceptedEvent {
    state: KeyState,
    raw: Bytes,
}

/// Validates and applies events for a single identifier.
#[derive(Debug, Clone)]
pub struct EventValidator {
    phase: ValidatorPhase,
    digest_code: MatterCode,
    /// Accepted events, indexed by sequence number.
    log: Vec<AcceptedEvent>,
}

impl EventValidator {
    /// A validator that records event digests under `digest_code`.
    pub fn new(digest_code: MatterCode) -> Self {
        Self {
            phase: ValidatorPhase::Uninitialized,
            digest_code,
            log: Vec::new(),
        }
    }

    pub fn phase(&self) -> ValidatorPhase {
        self.phase
    }

    /// Current key state, once incepted.
    pub fn state(&self) -> Option<&KeyState> {
        self.log.last().map(|a| &a.state)
    }

    /// Key state right after the event at `sn`.
    pub fn state_at(&self, sn: u64) -> Option<&KeyState> {
        self.log.get(usize::try_from(sn).ok()?).map(|a| &a.state)
    }

    /// Raw bytes of the accepted event at `sn`.
    pub fn raw_at(&self, sn: u64) -> Option<&Bytes> {
        self.log.get(usize::try_from(sn).ok()?).map(|a| &a.raw)
    }

    /// Digest of the accepted event at `sn`.
    pub fn digest_at(&self, sn: u64) -> Option<Digest> {
        self.state_at(sn).map(|s| s.last_digest)
    }

    /// Highest sequence number not disputed by duplicity.
    pub fn undisputed_sn(&self) -> Option<u64> {
        match self.phase {
            ValidatorPhase::Uninitialized => None,
            ValidatorPhase::Active => self.state().map(|s| s.sn),
            ValidatorPhase::Compromised { since } => since.checked_sub(1),
        }
    }

    pub fn is_compromised(&self) -> bool {
        matches!(self.phase, ValidatorPhase::Compromised { .. })
    }

    /// Freeze the validator after duplicity found outside this validator.
    pub fn mark_compromised(&mut self, since: u64) {
        if !self.is_compromised() {
            warn!(sn = since, "validator marked compromised");
            self.phase = ValidatorPhase::Compromised { since };
        }
    }

    /// Apply a signed event, returning the new key state when accepted.
    pub fn apply(&mut self, msg: &SignedMessage) -> Result<&KeyState, ValidationError> {
        let sn = msg.sn();
        match self.phase {
            ValidatorPhase::Compromised { since } => {
                Err(ValidationError::Duplicity { sn, since })
            }
            ValidatorPhase::Uninitialized => {
                if !matches!(msg.inner(), Event::Inception(_)) {
                    return Err(ValidationError::SequenceGap {
                        expected: 0,
                        got: sn,
                    });
                }
                let state = self.validate_inception(msg)?;
                self.push(state, msg.event.raw.clone());
                self.phase = ValidatorPhase::Active;
                self.accepted()
            }
            ValidatorPhase::Active => {
                let current = self.state().map(|s| s.sn).unwrap_or(0);
                if sn > current + 1 {
                    return Err(ValidationError::SequenceGap {
                        expected: current + 1,
                        got: sn,
                    });
                }
                if sn <= current {
                    return Err(self.check_conflict(msg));
                }
                let prior = self.log.last().ok_or_else(|| {
                    ValidationError::StructuralError("active validator without state".into())
                })?;
                let state = self.validate_transition(prior, msg)?;
                self.push(state, msg.event.raw.clone());
                self.accepted()
            }
        }
    }

    fn push(&mut self, state: KeyState, raw: Bytes) {
        if let Some(last) = self.log.last_mut() {
            last.state.latest = false;
        }
        debug!(prefix = %state.prefix, sn = state.sn, "event accepted");
        self.log.push(AcceptedEvent { state, raw });
    }

    fn accepted(&self) -> Result<&KeyState, ValidationError> {
        self.state().ok_or_else(|| {
            ValidationError::StructuralError("accepted event left no state".into())
        })
    }

    /// An event at an occupied sequence number: replay, duplicity, or an
    /// invalid conflicting event.
    fn check_conflict(&mut self, msg: &SignedMessage) -> ValidationError {
        let sn = msg.sn();
        let Some(index) = usize::try_from(sn).ok().filter(|i| *i < self.log.len()) else {
            return ValidationError::StructuralError(format!("no accepted event at sn {sn}"));
        };
        if self.log[index].raw == msg.event.raw {
            return ValidationError::SequenceReplay { sn };
        }

        let valid = if index == 0 {
            self.validate_inception(msg).map(|_| ())
        } else {
            self.validate_transition(&self.log[index - 1], msg)
                .map(|_| ())
        };
        match valid {
            Ok(()) => {
                warn!(prefix = %msg.prefix(), sn, "duplicitous event detected");
                self.phase = ValidatorPhase::Compromised { since: sn };
                ValidationError::Duplicity { sn, since: sn }
            }
            Err(e) => e,
        }
    }

    fn validate_inception(&self, msg: &SignedMessage) -> Result<KeyState, ValidationError> {
        let Event::Inception(icp) = msg.inner() else {
            return Err(ValidationError::StructuralError(
                "expected an inception event".into(),
            ));
        };
        verify_distinct_keys(&icp.keys)?;
        icp.threshold.validate(icp.keys.len())?;
        icp.witnesses.validate()?;
        verify_self_certifying(icp, msg.event.kind)?;
        verify_signatures(0, &icp.keys, &icp.threshold, &msg.event.raw, &msg.signatures)?;

        let digest = Digest::compute(self.digest_code, &msg.event.raw)?;
        Ok(KeyState::from_inception(icp, digest))
    }

    fn validate_transition(
        &self,
        prior: &AcceptedEvent,
        msg: &SignedMessage,
    ) -> Result<KeyState, ValidationError> {
        match msg.inner() {
            Event::Inception(_) => Err(ValidationError::StructuralError(
                "inception after establishment".into(),
            )),
            Event::Rotation(rot) => self.validate_rotation(prior, rot, msg),
            Event::Interaction(ixn) => self.validate_interaction(prior, ixn, msg),
        }
    }

    fn validate_rotation(
        &self,
        prior: &AcceptedEvent,
        rot: &Rotation,
        msg: &SignedMessage,
    ) -> Result<KeyState, ValidationError> {
        let state = &prior.state;
        verify_prior_digest(rot.sn, &rot.prior, &prior.raw)?;
        verify_signatures(rot.sn, &state.keys, &state.threshold, &msg.event.raw, &msg.signatures)?;

        let committed = match state.next {
            Some(next) if state.is_transferable() => next,
            _ => return Err(ValidationError::NotTransferable),
        };
        verify_distinct_keys(&rot.keys)?;
        let presented = next_commitment(&rot.threshold, &rot.keys, committed.code())?;
        if presented != committed {
            warn!(prefix = %rot.prefix, sn = rot.sn, "rotation keys do not match commitment");
            return Err(ValidationError::NextCommitmentMismatch { sn: rot.sn });
        }

        rot.threshold.validate(rot.keys.len())?;
        let witnesses = state
            .witnesses
            .rotate(rot.witness_threshold, &rot.cuts, &rot.adds)?;

        let digest = Digest::compute(self.digest_code, &msg.event.raw)?;
        Ok(state.rotated(rot, witnesses, digest))
    }

    fn validate_interaction(
        &self,
        prior: &AcceptedEvent,
        ixn: &Interaction,
        msg: &SignedMessage,
    ) -> Result<KeyState, ValidationError> {
        let state = &prior.state;
        verify_prior_digest(ixn.sn, &ixn.prior, &prior.raw)?;
        if state.is_establishment_only() {
            return Err(ValidationError::EstablishmentOnly);
        }
        verify_signatures(ixn.sn, &state.keys, &state.threshold, &msg.event.raw, &msg.signatures)?;

        let digest = Digest::compute(self.digest_code, &msg.event.raw)?;
        Ok(state.interacted(ixn, digest))
    }
}

/// Declared prefix must be the one the inception derives.
fn verify_self_certifying(icp: &Inception, kind: SerialKind) -> Result<(), ValidationError> {
    let derived = crate::prefix::derive_prefix(icp.prefix.code(), icp, kind)?;
    if derived != icp.prefix {
        return Err(ValidationError::PrefixMismatch {
            declared: icp.prefix.qb64(),
            derived: derived.qb64(),
        });
    }
    Ok(())
}

fn verify_distinct_keys(keys: &[PublicKey]) -> Result<(), ValidationError> {
    match duplicate_key(keys) {
        Some(key) => Err(ValidationError::DuplicateKey { key: key.qb64() }),
        None => Ok(()),
    }
}

/// Recompute the prior event digest with the algorithm the event declares.
fn verify_prior_digest(
    sn: u64,
    declared: &Digest,
    prior_raw: &[u8],
) -> Result<(), ValidationError> {
    let actual = Digest::compute(declared.code(), prior_raw)?;
    if actual != *declared {
        return Err(ValidationError::PriorDigestMismatch {
            sn,
            expected: actual.qb64(),
            got: declared.qb64(),
        });
    }
    Ok(())
}

/// Verify signatures and check the distinct verified signers meet the
/// threshold. Signatures with out-of-range indexes or that fail to verify are
/// ignored.
pub fn verify_signatures(
    sn: u64,
    keys: &[PublicKey],
    threshold: &Threshold,
    message: &[u8],
    signatures: &[IndexedSignature],
) -> Result<Vec<usize>, ValidationError> {
    let mut verified: Vec<usize> = signatures
        .iter()
        .filter_map(|sig| {
            let index = usize::try_from(sig.index).ok()?;
            let key = keys.get(index)?;
            key.verify(message, &sig.signature).then_some(index)
        })
        .collect();
    verified.sort_unstable();
    verified.dedup();

    if !threshold.is_satisfied(&verified) {
        return Err(ValidationError::ThresholdNotMet {
            sn,
            verified: verified.len(),
            keys: keys.len(),
        });
    }
    Ok(verified)
}
