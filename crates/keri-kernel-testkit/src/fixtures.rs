//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use keri_kernel::{Habitat, Kernel, KernelConfig};
use keri_kernel_core::{
    Digest, Event, EventBuilder, EventValidator, MatterCode, Seal, SignedMessage, Signer,
};
use keri_kernel_store::MemoryStore;

/// A controller with deterministic signers and its habitat.
pub struct TestController {
    pub signers: Vec<Signer>,
    pub config: KernelConfig,
    pub habitat: Habitat,
}

impl TestController {
    /// Controller over `key_sets` single-key sets derived from `seed`.
    pub fn with_seed(seed: u8, key_sets: usize) -> Self {
        Self::with_config(seed, key_sets, KernelConfig::default())
    }

    pub fn with_config(seed: u8, key_sets: usize, config: KernelConfig) -> Self {
        let transferable = config.prefix_code.is_transferable();
        let signers: Vec<_> = (0..key_sets * config.key_count)
            .map(|i| {
                let mut bytes = [seed; 32];
                bytes[31] = i as u8;
                Signer::from_seed(&bytes, transferable)
            })
            .collect();
        let habitat = Habitat::new(signers.clone(), &config).unwrap();
        Self {
            signers,
            config,
            habitat,
        }
    }

    /// Controller with random signers.
    pub fn random(key_sets: usize) -> Self {
        let config = KernelConfig::default();
        let signers: Vec<_> = (0..key_sets)
            .map(|_| Signer::from_seed(&rand::random::<[u8; 32]>(), true))
            .collect();
        let habitat = Habitat::new(signers.clone(), &config).unwrap();
        Self {
            signers,
            config,
            habitat,
        }
    }

    /// Signers that were authoritative after the event at `sn`.
    pub fn signers_at(&self, sn: u64) -> &[Signer] {
        let rotations = self.habitat.kel()[1..=sn as usize]
            .iter()
            .filter(|m| matches!(m.inner(), Event::Rotation(_)))
            .count();
        let count = self.config.key_count;
        &self.signers[rotations * count..(rotations + 1) * count]
    }

    /// A validly signed interaction at `sn + 1` that differs from whatever
    /// the habitat issued there.
    pub fn fork_interaction(&self, sn: u64) -> SignedMessage {
        let mut validator = EventValidator::new(self.config.digest_code());
        let mut state = None;
        for msg in &self.habitat.kel()[..=sn as usize] {
            state = Some(validator.apply(msg).unwrap().clone());
        }
        let digest = Digest::compute(MatterCode::Blake3_256, &sn.to_be_bytes()).unwrap();
        let seal = Seal::Digest(digest);
        let ixn = EventBuilder::interaction(&state.unwrap())
            .seals(vec![seal])
            .kind(self.config.kind)
            .build()
            .unwrap();
        let refs: Vec<&Signer> = self.signers_at(sn).iter().collect();
        SignedMessage::sign(ixn, &refs)
    }
}

/// A kernel over a fresh in-memory store.
pub fn memory_kernel(config: KernelConfig) -> Kernel<MemoryStore> {
    Kernel::open(MemoryStore::new(), config).unwrap()
}

/// Create controllers for multi-party tests.
pub fn multi_party_fixtures(count: usize, key_sets: usize) -> Vec<TestController> {
    (0..count)
        .map(|i| TestController::with_seed(i as u8 + 1, key_sets))
        .collect()
}
