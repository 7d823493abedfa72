//! Key state snapshots.

use serde::{Deserialize, Serialize};

use crate::crypto::{Digest, PublicKey};
use crate::event::{ConfigTrait, Inception, Interaction, Rotation, WitnessConfig};
use crate::prefix::Prefix;
use crate::threshold::Threshold;

/// The authoritative key state of an identifier after one accepted event.
///
/// Snapshots are immutable; every accepted event produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    pub prefix: Prefix,
    /// Sequence number of the last accepted event.
    pub sn: u64,
    /// Digest of the last accepted event.
    pub last_digest: Digest,
    /// Sequence number of the last establishment event.
    pub last_establishment_sn: u64,
    pub threshold: Threshold,
    pub keys: Vec<PublicKey>,
    /// Commitment to the next key set; absent once non-transferable.
    pub next: Option<Digest>,
    pub witnesses: WitnessConfig,
    pub config: Vec<ConfigTrait>,
    /// Whether no later event has been accepted on top of this snapshot.
    pub latest: bool,
}

impl KeyState {
    /// State created by an accepted inception.
    pub fn from_inception(icp: &Inception, digest: Digest) -> Self {
        Self {
            prefix: icp.prefix.clone(),
            sn: 0,
            last_digest: digest,
            last_establishment_sn: 0,
            threshold: icp.threshold.clone(),
            keys: icp.keys.clone(),
            next: icp.next,
            witnesses: icp.witnesses.clone(),
            config: icp.config.clone(),
            latest: true,
        }
    }

    /// State after an accepted rotation.
    pub fn rotated(&self, rot: &Rotation, witnesses: WitnessConfig, digest: Digest) -> Self {
        Self {
            prefix: self.prefix.clone(),
            sn: rot.sn,
            last_digest: digest,
            last_establishment_sn: rot.sn,
            threshold: rot.threshold.clone(),
            keys: rot.keys.clone(),
            next: rot.next,
            witnesses,
            config: self.config.clone(),
            latest: true,
        }
    }

    /// State after an accepted interaction; keys are unchanged.
    pub fn interacted(&self, ixn: &Interaction, digest: Digest) -> Self {
        Self {
            sn: ixn.sn,
            last_digest: digest,
            latest: true,
            ..self.clone()
        }
    }

    /// Whether this is the state immediately after the event at `sn`.
    pub fn is_after(&self, sn: u64) -> bool {
        self.sn == sn
    }

    pub fn next_sn(&self) -> u64 {
        self.sn + 1
    }

    /// Whether the identifier can still rotate.
    pub fn is_transferable(&self) -> bool {
        self.prefix.is_transferable() && self.next.is_some()
    }

    pub fn is_establishment_only(&self) -> bool {
        self.config.contains(&ConfigTrait::EstablishmentOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{next_commitment, Signer};
    use crate::derivation::MatterCode;

    fn digest(data: &[u8]) -> Digest {
        Digest::compute(MatterCode::Blake3_256, data).unwrap()
    }

    fn inception(transferable: bool) -> Inception {
        let key = Signer::from_seed(&[1; 32], transferable).public_key();
        let next_key = Signer::from_seed(&[2; 32], true).public_key();
        Inception {
            prefix: Prefix::Basic(key),
            threshold: Threshold::Count(1),
            keys: vec![key],
            next: transferable.then(|| {
                next_commitment(&Threshold::Count(1), &[next_key], MatterCode::Blake3_256)
                    .unwrap()
            }),
            witnesses: WitnessConfig::default(),
            config: vec![],
        }
    }

    #[test]
    fn test_from_inception() {
        let state = KeyState::from_inception(&inception(true), digest(b"icp"));
        assert!(state.is_after(0));
        assert_eq!(state.next_sn(), 1);
        assert!(state.is_transferable());
        assert!(state.latest);
        assert!(!state.is_establishment_only());
    }

    #[test]
    fn test_non_transferable() {
        let state = KeyState::from_inception(&inception(false), digest(b"icp"));
        assert!(!state.is_transferable());
    }

    #[test]
    fn test_interaction_keeps_keys() {
        let state = KeyState::from_inception(&inception(true), digest(b"icp"));
        let ixn = Interaction {
            prefix: state.prefix.clone(),
            sn: 1,
            prior: state.last_digest,
            seals: vec![],
        };
        let next = state.interacted(&ixn, digest(b"ixn"));
        assert!(next.is_after(1));
        assert_eq!(next.keys, state.keys);
        assert_eq!(next.next, state.next);
        assert_eq!(next.last_establishment_sn, 0);
        assert_ne!(next, state);
    }

    #[test]
    fn test_establishment_only() {
        let mut icp = inception(true);
        icp.config = vec![ConfigTrait::EstablishmentOnly];
        let state = KeyState::from_inception(&icp, digest(b"icp"));
        assert!(state.is_establishment_only());
    }

    #[test]
    fn test_serde_json_roundtrip() {
        let state = KeyState::from_inception(&inception(true), digest(b"icp"));
        let json = serde_json::to_string(&state).unwrap();
        let back: KeyState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
