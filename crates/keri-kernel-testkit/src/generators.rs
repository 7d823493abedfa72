//! Proptest generators for property-based testing.

use proptest::prelude::*;

use keri_kernel::{Habitat, KernelConfig};
use keri_kernel_core::{Digest, MatterCode, PublicKey, Seal, SerialKind, Signer, Threshold};

/// Generate a random transferable signer.
pub fn signer() -> impl Strategy<Value = Signer> {
    any::<[u8; 32]>().prop_map(|seed| Signer::from_seed(&seed, true))
}

/// Generate a random Ed25519 public key.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    signer().prop_map(|s| s.public_key())
}

/// Generate a digest code this implementation computes.
pub fn digest_code() -> impl Strategy<Value = MatterCode> {
    prop_oneof![
        Just(MatterCode::Blake3_256),
        Just(MatterCode::Sha3_256),
        Just(MatterCode::Sha2_256),
    ]
}

/// Generate a random digest.
pub fn digest() -> impl Strategy<Value = Digest> {
    (digest_code(), prop::collection::vec(any::<u8>(), 0..64))
        .prop_filter_map("digest", |(code, data)| Digest::compute(code, &data).ok())
}

pub fn serial_kind() -> impl Strategy<Value = SerialKind> {
    prop_oneof![Just(SerialKind::Json), Just(SerialKind::Cbor)]
}

/// Generate a count threshold satisfiable by `keys` signers.
pub fn threshold(keys: usize) -> impl Strategy<Value = Threshold> {
    (1..=keys.max(1) as u64).prop_map(Threshold::Count)
}

/// Generate up to `max` digest seals.
pub fn seals(max: usize) -> impl Strategy<Value = Vec<Seal>> {
    prop::collection::vec(digest().prop_map(Seal::Digest), 0..=max)
}

/// One step in a generated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOp {
    Rotate,
    Interact(Vec<Seal>),
}

pub fn chain_op() -> impl Strategy<Value = ChainOp> {
    prop_oneof![
        1 => Just(ChainOp::Rotate),
        2 => seals(2).prop_map(ChainOp::Interact),
    ]
}

/// Parameters for generating a whole key event log.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub seed: [u8; 32],
    pub key_count: usize,
    pub threshold: Threshold,
    pub kind: SerialKind,
    pub ops: Vec<ChainOp>,
}

impl ChainParams {
    pub fn config(&self) -> KernelConfig {
        KernelConfig::default()
            .with_kind(self.kind)
            .with_keys(self.key_count, self.threshold.clone())
    }

    /// Signers for every key set the log needs, plus one committed set.
    pub fn signers(&self) -> Vec<Signer> {
        let rotations = self.ops.iter().filter(|op| **op == ChainOp::Rotate).count();
        let total = (rotations + 2) * self.key_count;
        (0..total)
            .map(|i| {
                let mut seed = self.seed;
                seed[..8].copy_from_slice(&(i as u64).to_be_bytes());
                Signer::from_seed(&seed, true)
            })
            .collect()
    }

    /// Build the log. Panics if the parameters are inconsistent.
    pub fn build(&self) -> Habitat {
        let mut hab = Habitat::new(self.signers(), &self.config()).unwrap();
        for op in &self.ops {
            match op {
                ChainOp::Rotate => hab.rotate().unwrap(),
                ChainOp::Interact(seals) => hab.interact(seals.clone()).unwrap(),
            };
        }
        hab
    }
}

impl Arbitrary for ChainParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (1usize..=3)
            .prop_flat_map(|keys| {
                (
                    any::<[u8; 32]>(),
                    Just(keys),
                    threshold(keys),
                    serial_kind(),
                    prop::collection::vec(chain_op(), 0..6),
                )
            })
            .prop_map(|(seed, key_count, threshold, kind, ops)| ChainParams {
                seed,
                key_count,
                threshold,
                kind,
                ops,
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use keri_kernel_core::{EventRouter, RouterConfig};

    proptest! {
        #[test]
        fn test_generated_chain_verifies(params: ChainParams) {
            let hab = params.build();
            let mut router = EventRouter::new(RouterConfig::default());
            let mut buf = BytesMut::from(&hab.kel_messages().unwrap()[..]);
            let reports = router.process_stream(&mut buf);

            prop_assert!(buf.is_empty());
            prop_assert_eq!(reports.len(), params.ops.len() + 1);
            prop_assert!(reports.iter().all(|r| r.outcome.is_accepted()));
            prop_assert_eq!(router.key_state(hab.prefix()), Some(hab.state()));
        }

        #[test]
        fn test_chain_is_deterministic(params: ChainParams) {
            let a = params.build();
            let b = params.build();
            prop_assert_eq!(a.prefix(), b.prefix());
            prop_assert_eq!(a.kel_messages().unwrap(), b.kel_messages().unwrap());
        }

        #[test]
        fn test_reversed_chain_converges(params: ChainParams) {
            let hab = params.build();
            let mut router = EventRouter::new(RouterConfig::default());
            for msg in hab.kel().iter().rev() {
                router.process_message(msg.clone());
            }
            prop_assert_eq!(router.key_state(hab.prefix()), Some(hab.state()));
            prop_assert_eq!(router.escrow_len(), 0);
        }
    }
}
