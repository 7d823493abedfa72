//! A local controller: one identifier and the signers behind it.
//!
//! A habitat holds a sequence of signers split into key sets of
//! `key_count`. Key set 0 signs the inception and key set 1 is committed to
//! as the next keys. Each rotation reveals the committed set and commits to
//! the one after it. When the sequence runs out, the last rotation commits to
//! nothing and the identifier can no longer rotate.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use keri_kernel_core::{
    next_commitment, Digest, EventBuilder, EventValidator, KeyState, Prefix, PublicKey, Qualified,
    Seal, SerializedEvent, SignedMessage, Signer, Threshold, ValidationError, WitnessConfig,
};

use crate::config::KernelConfig;
use crate::error::{KernelError, Result};

pub struct Habitat {
    signers: Vec<Signer>,
    /// Index of the first signer of the current key set.
    current: usize,
    config: KernelConfig,
    threshold: Threshold,
    validator: EventValidator,
    state: KeyState,
    kel: Vec<SignedMessage>,
}

impl Habitat {
    /// Incept a new identifier over `signers`.
    pub fn new(signers: Vec<Signer>, config: &KernelConfig) -> Result<Self> {
        let count = config.key_count;
        if count == 0 {
            return Err(KernelError::InvalidOperation(
                "a key set needs at least one key".into(),
            ));
        }
        let threshold = config.threshold();
        threshold.validate(count)?;

        let keys = public_keys(signers.get(..count).ok_or_else(|| {
            KernelError::InvalidOperation(format!(
                "{} signers cannot fill a key set of {count}",
                signers.len()
            ))
        })?);

        let mut builder = EventBuilder::inception(keys)
            .threshold(threshold.clone())
            .witnesses(WitnessConfig::new(
                config.witness_threshold,
                config.witnesses.clone(),
            ))
            .config(config.traits.clone())
            .prefix_code(config.prefix_code)
            .kind(config.kind);
        if config.prefix_code.is_transferable() {
            if let Some(next) = commit(&signers, count, count, &threshold, config)? {
                builder = builder.next(next);
            }
        }
        let icp = builder.build()?;
        let msg = sign(icp, &signers[..count]);

        let mut validator = EventValidator::new(config.digest_code());
        let state = validator.apply(&msg)?.clone();
        debug!(prefix = %state.prefix, keys = count, "habitat incepted");

        Ok(Self {
            signers,
            current: 0,
            config: config.clone(),
            threshold,
            validator,
            state,
            kel: vec![msg],
        })
    }

    /// Incept from qualified seeds, in rotation order.
    pub fn from_seeds(seeds: &[&str], config: &KernelConfig) -> Result<Self> {
        let transferable = config.prefix_code.is_transferable();
        let signers = seeds
            .iter()
            .map(|seed| Signer::from_qb64(seed, transferable))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::new(signers, config)
    }

    /// Incept with freshly generated signers for `key_sets` key sets.
    pub fn generate(key_sets: usize, config: &KernelConfig) -> Result<Self> {
        let transferable = config.prefix_code.is_transferable();
        let signers = (0..key_sets * config.key_count)
            .map(|_| Signer::generate(transferable))
            .collect();
        Self::new(signers, config)
    }

    pub fn prefix(&self) -> &Prefix {
        &self.state.prefix
    }

    pub fn state(&self) -> &KeyState {
        &self.state
    }

    /// Signers of the current key set.
    pub fn current_signers(&self) -> &[Signer] {
        &self.signers[self.current..self.current + self.config.key_count]
    }

    /// Every message issued so far, in order.
    pub fn kel(&self) -> &[SignedMessage] {
        &self.kel
    }

    /// The whole log as concatenated wire messages.
    pub fn kel_messages(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        for msg in &self.kel {
            buf.put(msg.to_bytes()?);
        }
        Ok(buf.freeze())
    }

    /// Rotate to the committed key set, keeping witnesses.
    pub fn rotate(&mut self) -> Result<SignedMessage> {
        self.rotate_witnesses(None, Vec::new(), Vec::new())
    }

    /// Rotate to the committed key set and change the witness list.
    pub fn rotate_witnesses(
        &mut self,
        witness_threshold: Option<u64>,
        cuts: Vec<Prefix>,
        adds: Vec<Prefix>,
    ) -> Result<SignedMessage> {
        if !self.state.is_transferable() {
            return Err(ValidationError::NotTransferable.into());
        }
        let count = self.config.key_count;
        let start = self.current + count;
        let keys = public_keys(
            self.signers
                .get(start..start + count)
                .ok_or_else(|| KernelError::SignersExhausted(self.prefix().clone()))?,
        );

        let mut builder = EventBuilder::rotation(&self.state, keys)
            .threshold(self.threshold.clone())
            .cuts(cuts)
            .adds(adds)
            .kind(self.config.kind);
        if let Some(toad) = witness_threshold {
            builder = builder.witness_threshold(toad);
        }
        let next = commit(&self.signers, start + count, count, &self.threshold, &self.config)?;
        if let Some(next) = next {
            builder = builder.next(next);
        }
        let rot = builder.build()?;

        // Signed by the keys being rotated out.
        let msg = sign(rot, self.current_signers());
        let msg = self.accept(msg)?;
        self.current = start;
        debug!(prefix = %self.prefix(), sn = self.state.sn, "habitat rotated");
        Ok(msg)
    }

    /// Anchor `seals` in an interaction event.
    pub fn interact(&mut self, seals: Vec<Seal>) -> Result<SignedMessage> {
        let ixn = EventBuilder::interaction(&self.state)
            .seals(seals)
            .kind(self.config.kind)
            .build()?;
        let msg = sign(ixn, self.current_signers());
        self.accept(msg)
    }

    /// Seal referencing this habitat's latest event.
    pub fn seal(&self) -> Seal {
        Seal::Event {
            prefix: self.prefix().clone(),
            sn: self.state.sn,
            digest: self.state.last_digest,
        }
    }

    fn accept(&mut self, msg: SignedMessage) -> Result<SignedMessage> {
        self.state = self.validator.apply(&msg)?.clone();
        self.kel.push(msg.clone());
        Ok(msg)
    }
}

impl std::fmt::Debug for Habitat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Habitat")
            .field("prefix", &self.prefix().qb64())
            .field("sn", &self.state.sn)
            .field("signers", &self.signers.len())
            .finish()
    }
}

fn public_keys(signers: &[Signer]) -> Vec<PublicKey> {
    signers.iter().map(Signer::public_key).collect()
}

fn sign(event: SerializedEvent, signers: &[Signer]) -> SignedMessage {
    let refs: Vec<&Signer> = signers.iter().collect();
    SignedMessage::sign(event, &refs)
}

/// Commitment to the key set starting at `start`, if the sequence has one.
fn commit(
    signers: &[Signer],
    start: usize,
    count: usize,
    threshold: &Threshold,
    config: &KernelConfig,
) -> Result<Option<Digest>> {
    signers
        .get(start..start + count)
        .map(|set| next_commitment(threshold, &public_keys(set), config.digest_code()))
        .transpose()
        .map_err(KernelError::from)
}
