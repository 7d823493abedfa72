//! Identifier prefixes.
//!
//! A prefix is either a basic prefix (the single inception key itself) or a
//! self-addressing prefix (the digest of the inception event serialized with
//! an empty prefix field). Both commit to the inception keys.

use std::fmt;

use crate::canonical::{self, SerialKind};
use crate::crypto::{qualified_serde, Digest, PublicKey, Qualified};
use crate::derivation::{CodeRole, MatterCode};
use crate::error::{CoreError, Result};
use crate::event::Inception;

/// A self-certifying identifier prefix.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prefix {
    Basic(PublicKey),
    SelfAddressing(Digest),
}

impl Prefix {
    pub fn code(&self) -> MatterCode {
        match self {
            Prefix::Basic(key) => key.code(),
            Prefix::SelfAddressing(digest) => digest.code(),
        }
    }

    /// Basic prefixes with a non-transferable code may never rotate.
    pub fn is_transferable(&self) -> bool {
        self.code().is_transferable()
    }

    /// Whether `inception` derives this exact prefix.
    pub fn verify(&self, inception: &Inception, kind: SerialKind) -> Result<bool> {
        Ok(derive_prefix(self.code(), inception, kind)? == *self)
    }
}

/// Derive the prefix an inception event commits to under `code`.
///
/// Basic codes require exactly one key already carrying that code. A
/// non-transferable basic prefix may not carry a next-keys commitment.
/// Self-addressing codes digest the event serialized in `kind` with an empty
/// prefix field.
pub fn derive_prefix(code: MatterCode, inception: &Inception, kind: SerialKind) -> Result<Prefix> {
    match code.role() {
        CodeRole::Key => {
            let [key] = inception.keys.as_slice() else {
                return Err(CoreError::encoding(format!(
                    "basic prefix needs exactly one key, got {}",
                    inception.keys.len()
                )));
            };
            if key.code() != code {
                return Err(CoreError::encoding(format!(
                    "key code {} does not match prefix code {code}",
                    key.code()
                )));
            }
            if !code.is_transferable() && inception.next.is_some() {
                return Err(CoreError::encoding(
                    "non-transferable prefix cannot commit to next keys",
                ));
            }
            Ok(Prefix::Basic(*key))
        }
        CodeRole::Digest => {
            let raw = canonical::inception_bytes_for_derivation(inception, kind)?;
            Ok(Prefix::SelfAddressing(Digest::compute(code, &raw)?))
        }
        CodeRole::Seed => Err(CoreError::encoding(format!(
            "{code} cannot derive a prefix"
        ))),
    }
}

impl Qualified for Prefix {
    fn qb64(&self) -> String {
        match self {
            Prefix::Basic(key) => key.qb64(),
            Prefix::SelfAddressing(digest) => digest.qb64(),
        }
    }

    fn from_qb64(text: &str) -> Result<Self> {
        let head = text
            .get(..1)
            .ok_or_else(|| CoreError::encoding("empty prefix"))?;
        match MatterCode::from_text(head)?.role() {
            CodeRole::Key => Ok(Prefix::Basic(PublicKey::from_qb64(text)?)),
            CodeRole::Digest => Ok(Prefix::SelfAddressing(Digest::from_qb64(text)?)),
            CodeRole::Seed => Err(CoreError::encoding("a seed is not a prefix")),
        }
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prefix({})", self.qb64())
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qb64())
    }
}

qualified_serde!(Prefix);
