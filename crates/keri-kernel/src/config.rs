//! Kernel and habitat configuration.

use serde::{Deserialize, Serialize};

use keri_kernel_core::{ConfigTrait, MatterCode, Prefix, RouterConfig, SerialKind, Threshold};

/// Configuration for the Kernel and the habitats it creates.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Escrow limits and the digest algorithm for accepted events.
    pub router: RouterConfig,
    /// Derivation code for new identifier prefixes.
    pub prefix_code: MatterCode,
    /// Serialization of locally issued events.
    pub kind: SerialKind,
    /// Keys per establishment event.
    pub key_count: usize,
    /// Signing threshold for each key set. `None` means a simple majority.
    pub signing_threshold: Option<Threshold>,
    pub witness_threshold: u64,
    pub witnesses: Vec<Prefix>,
    pub traits: Vec<ConfigTrait>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            prefix_code: MatterCode::Blake3_256,
            kind: SerialKind::Json,
            key_count: 1,
            signing_threshold: None,
            witness_threshold: 0,
            witnesses: Vec::new(),
            traits: Vec::new(),
        }
    }
}

impl KernelConfig {
    pub fn digest_code(&self) -> MatterCode {
        self.router.digest_code
    }

    /// The threshold applied to every key set of a habitat.
    pub fn threshold(&self) -> Threshold {
        self.signing_threshold
            .clone()
            .unwrap_or_else(|| Threshold::default_for(self.key_count))
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_digest_code(mut self, code: MatterCode) -> Self {
        self.router.digest_code = code;
        self
    }

    pub fn with_prefix_code(mut self, code: MatterCode) -> Self {
        self.prefix_code = code;
        self
    }

    pub fn with_kind(mut self, kind: SerialKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_keys(mut self, count: usize, threshold: Threshold) -> Self {
        self.key_count = count;
        self.signing_threshold = Some(threshold);
        self
    }

    pub fn with_witnesses(mut self, threshold: u64, witnesses: Vec<Prefix>) -> Self {
        self.witness_threshold = threshold;
        self.witnesses = witnesses;
        self
    }

    pub fn with_traits(mut self, traits: Vec<ConfigTrait>) -> Self {
        self.traits = traits;
        self
    }
}
