//! Key event types.
//!
//! One [`Event`] enum covers the three event kinds an identifier can emit.
//! Events are plain data; encoding lives in [`crate::canonical`] and
//! validation in [`crate::validation`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{Digest, PublicKey};
use crate::error::{CoreError, ValidationError};
use crate::prefix::Prefix;
use crate::threshold::Threshold;

/// Event type tag, the `ilk` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ilk {
    Inception,
    Rotation,
    Interaction,
}

impl Ilk {
    pub fn as_str(self) -> &'static str {
        match self {
            Ilk::Inception => "icp",
            Ilk::Rotation => "rot",
            Ilk::Interaction => "ixn",
        }
    }
}

impl FromStr for Ilk {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "icp" => Ok(Ilk::Inception),
            "rot" => Ok(Ilk::Rotation),
            "ixn" => Ok(Ilk::Interaction),
            other => Err(CoreError::malformed(format!("unknown ilk {other:?}"))),
        }
    }
}

impl fmt::Display for Ilk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration traits declared at inception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigTrait {
    /// Only establishment events may be issued.
    #[serde(rename = "EO")]
    EstablishmentOnly,
}

impl ConfigTrait {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigTrait::EstablishmentOnly => "EO",
        }
    }
}

impl FromStr for ConfigTrait {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EO" => Ok(ConfigTrait::EstablishmentOnly),
            other => Err(CoreError::malformed(format!("unknown config trait {other:?}"))),
        }
    }
}

/// Anchored data carried by rotation and interaction events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seal {
    /// Digest of arbitrary external data.
    Digest(Digest),
    /// Reference to an event in some identifier's log.
    Event { prefix: Prefix, sn: u64, digest: Digest },
}

/// Witness threshold (`toad`) and witness list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessConfig {
    pub threshold: u64,
    pub witnesses: Vec<Prefix>,
}

impl WitnessConfig {
    pub fn new(threshold: u64, witnesses: Vec<Prefix>) -> Self {
        Self {
            threshold,
            witnesses,
        }
    }

    /// Witnesses must be distinct and the threshold must lie in
    /// `1..=witnesses.len()`, or be zero when there are no witnesses.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        if !self.witnesses.iter().all(|w| seen.insert(w)) {
            return Err(ValidationError::InvalidWitnessConfig(
                "duplicate witness".to_string(),
            ));
        }
        let n = self.witnesses.len() as u64;
        let ok = if n == 0 {
            self.threshold == 0
        } else {
            (1..=n).contains(&self.threshold)
        };
        if !ok {
            return Err(ValidationError::InvalidWitnessConfig(format!(
                "witness threshold {} invalid for {n} witnesses",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Apply rotation cuts and adds, producing the new configuration.
    pub fn rotate(
        &self,
        threshold: u64,
        cuts: &[Prefix],
        adds: &[Prefix],
    ) -> Result<WitnessConfig, ValidationError> {
        let invalid = |msg: &str| Err(ValidationError::InvalidWitnessConfig(msg.to_string()));

        let cut_set: HashSet<&Prefix> = cuts.iter().collect();
        if cut_set.len() != cuts.len() {
            return invalid("duplicate cut");
        }
        if !cuts.iter().all(|c| self.witnesses.contains(c)) {
            return invalid("cut of unknown witness");
        }
        let add_set: HashSet<&Prefix> = adds.iter().collect();
        if add_set.len() != adds.len() {
            return invalid("duplicate add");
        }
        if adds.iter().any(|a| cut_set.contains(a)) {
            return invalid("witness both cut and added");
        }
        if adds.iter().any(|a| self.witnesses.contains(a)) {
            return invalid("added witness already present");
        }

        let witnesses = self
            .witnesses
            .iter()
            .filter(|w| !cut_set.contains(w))
            .chain(adds.iter())
            .cloned()
            .collect();
        let rotated = WitnessConfig::new(threshold, witnesses);
        rotated.validate()?;
        Ok(rotated)
    }
}

/// Inception: establishes the identifier and its first key set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inception {
    pub prefix: Prefix,
    pub threshold: Threshold,
    pub keys: Vec<PublicKey>,
    /// Absent for non-transferable identifiers.
    pub next: Option<Digest>,
    pub witnesses: WitnessConfig,
    pub config: Vec<ConfigTrait>,
}

/// Rotation: replaces the key set with the one committed to earlier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    pub prefix: Prefix,
    pub sn: u64,
    pub prior: Digest,
    pub threshold: Threshold,
    pub keys: Vec<PublicKey>,
    pub next: Option<Digest>,
    pub witness_threshold: u64,
    pub cuts: Vec<Prefix>,
    pub adds: Vec<Prefix>,
    pub seals: Vec<Seal>,
}

/// Interaction: anchors data without changing keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub prefix: Prefix,
    pub sn: u64,
    pub prior: Digest,
    pub seals: Vec<Seal>,
}

/// A key event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Inception(Inception),
    Rotation(Rotation),
    Interaction(Interaction),
}

impl Event {
    pub fn prefix(&self) -> &Prefix {
        match self {
            Event::Inception(e) => &e.prefix,
            Event::Rotation(e) => &e.prefix,
            Event::Interaction(e) => &e.prefix,
        }
    }

    pub fn sn(&self) -> u64 {
        match self {
            Event::Inception(_) => 0,
            Event::Rotation(e) => e.sn,
            Event::Interaction(e) => e.sn,
        }
    }

    pub fn ilk(&self) -> Ilk {
        match self {
            Event::Inception(_) => Ilk::Inception,
            Event::Rotation(_) => Ilk::Rotation,
            Event::Interaction(_) => Ilk::Interaction,
        }
    }

    /// Digest of the preceding event, for non-inception events.
    pub fn prior(&self) -> Option<&Digest> {
        match self {
            Event::Inception(_) => None,
            Event::Rotation(e) => Some(&e.prior),
            Event::Interaction(e) => Some(&e.prior),
        }
    }

    pub fn is_establishment(&self) -> bool {
        !matches!(self, Event::Interaction(_))
    }
}
