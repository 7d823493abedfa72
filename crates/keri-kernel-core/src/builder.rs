//! Builders for key events.
//!
//! Builders produce a [`SerializedEvent`] ready to be signed. Inception
//! builders derive the identifier prefix; rotation and interaction builders
//! chain from a prior [`KeyState`].

use crate::canonical::{SerialKind, SerializedEvent};
use crate::crypto::{duplicate_key, Digest, PublicKey};
use crate::derivation::MatterCode;
use crate::error::{CoreError, Result};
use crate::event::{ConfigTrait, Event, Inception, Interaction, Rotation, Seal, WitnessConfig};
use crate::prefix::{derive_prefix, Prefix};
use crate::state::KeyState;
use crate::threshold::Threshold;

/// Entry point for event builders.
pub struct EventBuilder;

impl EventBuilder {
    pub fn inception(keys: Vec<PublicKey>) -> InceptionBuilder {
        InceptionBuilder::new(keys)
    }

    pub fn rotation(state: &KeyState, keys: Vec<PublicKey>) -> RotationBuilder {
        RotationBuilder::new(state, keys)
    }

    pub fn interaction(state: &KeyState) -> InteractionBuilder {
        InteractionBuilder::new(state)
    }
}

/// Builder for inception events.
#[derive(Debug, Clone)]
pub struct InceptionBuilder {
    keys: Vec<PublicKey>,
    threshold: Option<Threshold>,
    next: Option<Digest>,
    witnesses: WitnessConfig,
    config: Vec<ConfigTrait>,
    prefix_code: MatterCode,
    kind: SerialKind,
}

impl InceptionBuilder {
    pub fn new(keys: Vec<PublicKey>) -> Self {
        Self {
            keys,
            threshold: None,
            next: None,
            witnesses: WitnessConfig::default(),
            config: Vec::new(),
            prefix_code: MatterCode::Blake3_256,
            kind: SerialKind::Json,
        }
    }

    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Commit to the next key set. Omit for a non-transferable identifier.
    pub fn next(mut self, commitment: Digest) -> Self {
        self.next = Some(commitment);
        self
    }

    pub fn witnesses(mut self, witnesses: WitnessConfig) -> Self {
        self.witnesses = witnesses;
        self
    }

    pub fn config(mut self, traits: Vec<ConfigTrait>) -> Self {
        self.config = traits;
        self
    }

    /// Derivation code of the identifier prefix.
    pub fn prefix_code(mut self, code: MatterCode) -> Self {
        self.prefix_code = code;
        self
    }

    pub fn kind(mut self, kind: SerialKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn build(self) -> Result<SerializedEvent> {
        let first = *self
            .keys
            .first()
            .ok_or_else(|| CoreError::encoding("inception needs at least one key"))?;
        distinct(&self.keys)?;
        let mut icp = Inception {
            // Replaced by the derived prefix below.
            prefix: Prefix::Basic(first),
            threshold: self
                .threshold
                .unwrap_or_else(|| Threshold::default_for(self.keys.len())),
            keys: self.keys,
            next: self.next,
            witnesses: self.witnesses,
            config: self.config,
        };
        icp.prefix = derive_prefix(self.prefix_code, &icp, self.kind)?;
        SerializedEvent::new(Event::Inception(icp), self.kind)
    }
}

fn distinct(keys: &[PublicKey]) -> Result<()> {
    match duplicate_key(keys) {
        Some(key) => Err(CoreError::encoding(format!("duplicate key {key}"))),
        None => Ok(()),
    }
}

/// Builder for rotation events.
#[derive(Debug, Clone)]
pub struct RotationBuilder {
    prefix: Prefix,
    sn: u64,
    prior: Digest,
    prior_witnesses: WitnessConfig,
    keys: Vec<PublicKey>,
    threshold: Option<Threshold>,
    next: Option<Digest>,
    witness_threshold: Option<u64>,
    cuts: Vec<Prefix>,
    adds: Vec<Prefix>,
    seals: Vec<Seal>,
    kind: SerialKind,
}

impl RotationBuilder {
    pub fn new(state: &KeyState, keys: Vec<PublicKey>) -> Self {
        Self {
            prefix: state.prefix.clone(),
            sn: state.next_sn(),
            prior: state.last_digest,
            prior_witnesses: state.witnesses.clone(),
            keys,
            threshold: None,
            next: None,
            witness_threshold: None,
            cuts: Vec::new(),
            adds: Vec::new(),
            seals: Vec::new(),
            kind: SerialKind::Json,
        }
    }

    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn next(mut self, commitment: Digest) -> Self {
        self.next = Some(commitment);
        self
    }

    pub fn witness_threshold(mut self, toad: u64) -> Self {
        self.witness_threshold = Some(toad);
        self
    }

    pub fn cuts(mut self, cuts: Vec<Prefix>) -> Self {
        self.cuts = cuts;
        self
    }

    pub fn adds(mut self, adds: Vec<Prefix>) -> Self {
        self.adds = adds;
        self
    }

    pub fn seals(mut self, seals: Vec<Seal>) -> Self {
        self.seals = seals;
        self
    }

    pub fn kind(mut self, kind: SerialKind) -> Self {
        self.kind = kind;
        self
    }

    /// Prior witness threshold, clamped to the rotated witness count.
    fn default_witness_threshold(&self) -> u64 {
        let remaining = self
            .prior_witnesses
            .witnesses
            .iter()
            .filter(|w| !self.cuts.contains(w))
            .count()
            + self.adds.len();
        match remaining as u64 {
            0 => 0,
            n => self.prior_witnesses.threshold.clamp(1, n),
        }
    }

    pub fn build(self) -> Result<SerializedEvent> {
        distinct(&self.keys)?;
        let witness_threshold = self
            .witness_threshold
            .unwrap_or_else(|| self.default_witness_threshold());
        let rot = Rotation {
            prefix: self.prefix,
            sn: self.sn,
            prior: self.prior,
            threshold: self
                .threshold
                .unwrap_or_else(|| Threshold::default_for(self.keys.len())),
            keys: self.keys,
            next: self.next,
            witness_threshold,
            cuts: self.cuts,
            adds: self.adds,
            seals: self.seals,
        };
        SerializedEvent::new(Event::Rotation(rot), self.kind)
    }
}

/// Builder for interaction events.
#[derive(Debug, Clone)]
pub struct InteractionBuilder {
    prefix: Prefix,
    sn: u64,
    prior: Digest,
    seals: Vec<Seal>,
    kind: SerialKind,
}

impl InteractionBuilder {
    pub fn new(state: &KeyState) -> Self {
        Self {
            prefix: state.prefix.clone(),
            sn: state.next_sn(),
            prior: state.last_digest,
            seals: Vec::new(),
            kind: SerialKind::Json,
        }
    }

    pub fn seals(mut self, seals: Vec<Seal>) -> Self {
        self.seals = seals;
        self
    }

    pub fn kind(mut self, kind: SerialKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn build(self) -> Result<SerializedEvent> {
        let ixn = Interaction {
            prefix: self.prefix,
            sn: self.sn,
            prior: self.prior,
            seals: self.seals,
        };
        SerializedEvent::new(Event::Interaction(ixn), self.kind)
    }
}

/// Build an inception with a self-addressing Blake3 prefix in JSON.
pub fn build_inception(
    keys: Vec<PublicKey>,
    threshold: Threshold,
    next: Option<Digest>,
    witnesses: WitnessConfig,
) -> Result<SerializedEvent> {
    let mut builder = EventBuilder::inception(keys)
        .threshold(threshold)
        .witnesses(witnesses);
    if let Some(next) = next {
        builder = builder.next(next);
    }
    builder.build()
}

/// Build a rotation on top of `state`.
pub fn build_rotation(
    state: &KeyState,
    keys: Vec<PublicKey>,
    threshold: Threshold,
    next: Option<Digest>,
    cuts: Vec<Prefix>,
    adds: Vec<Prefix>,
) -> Result<SerializedEvent> {
    let mut builder = EventBuilder::rotation(state, keys)
        .threshold(threshold)
        .cuts(cuts)
        .adds(adds);
    if let Some(next) = next {
        builder = builder.next(next);
    }
    builder.build()
}

/// Build an interaction on top of `state`.
pub fn build_interaction(state: &KeyState, seals: Vec<Seal>) -> Result<SerializedEvent> {
    EventBuilder::interaction(state).seals(seals).build()
}
