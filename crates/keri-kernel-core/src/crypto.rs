//! Cryptographic primitives for the KERI Kernel.
//!
//! Wraps Ed25519 signing and the supported digest algorithms with strong,
//! self-describing types. Every type renders to and parses from qualified
//! text through [`Qualified`].

use std::collections::HashSet;
use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey, Verifier, VerifyingKey};
use sha2::Digest as _;

use crate::derivation::{
    decode_b64, decode_qb64, encode_b64, encode_qb64, CodeRole, IndexedCode, MatterCode,
    INDEX_LEN,
};
use crate::error::{CoreError, Result};
use crate::threshold::Threshold;

/// Values with a qualified text ("qb64") form.
pub trait Qualified: Sized {
    fn qb64(&self) -> String;
    fn from_qb64(text: &str) -> Result<Self>;
}

/// Implements serde for a [`Qualified`] type as its qb64 string.
macro_rules! qualified_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&$crate::crypto::Qualified::qb64(self))
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let text = <String as serde::Deserialize>::deserialize(deserializer)?;
                <$ty as $crate::crypto::Qualified>::from_qb64(&text)
                    .map_err(serde::de::Error::custom)
            }
        }
    };
}
pub(crate) use qualified_serde;

fn to_array<const N: usize>(raw: &[u8]) -> Result<[u8; N]> {
    raw.try_into()
        .map_err(|_| CoreError::encoding(format!("expected {N} raw bytes, got {}", raw.len())))
}

/// An Ed25519 public key tagged with its transferability code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey {
    code: MatterCode,
    raw: [u8; 32],
}

impl PublicKey {
    /// Create from raw bytes; `code` must be an Ed25519 key code.
    pub fn new(code: MatterCode, raw: [u8; 32]) -> Result<Self> {
        match code {
            MatterCode::Ed25519 | MatterCode::Ed25519N => Ok(Self { code, raw }),
            c if c.is_key() => Err(CoreError::encoding(format!("unsupported key code {c}"))),
            c => Err(CoreError::encoding(format!("{c} is not a key code"))),
        }
    }

    pub fn code(&self) -> MatterCode {
        self.code
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.raw
    }

    pub fn is_transferable(&self) -> bool {
        self.code.is_transferable()
    }

    /// Verify a signature over a message. Malformed keys or signatures yield
    /// `false`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.raw) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        verifying_key.verify(message, &sig).is_ok()
    }
}

impl Qualified for PublicKey {
    fn qb64(&self) -> String {
        format!("{}{}", self.code.text(), encode_b64(&self.raw))
    }

    fn from_qb64(text: &str) -> Result<Self> {
        let (code, raw) = decode_qb64(text)?;
        Self::new(code, to_array(&raw)?)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}:{})", self.code, &hex::encode(self.raw)[..16])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qb64())
    }
}

qualified_serde!(PublicKey);

/// A 32-byte digest tagged with the algorithm that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    code: MatterCode,
    raw: [u8; 32],
}

impl Digest {
    /// Compute a digest of `data` with the algorithm named by `code`.
    pub fn compute(code: MatterCode, data: &[u8]) -> Result<Self> {
        let mut raw = [0u8; 32];
        match code {
            MatterCode::Blake3_256 => raw.copy_from_slice(blake3::hash(data).as_bytes()),
            MatterCode::Sha2_256 => raw.copy_from_slice(&sha2::Sha256::digest(data)),
            MatterCode::Sha3_256 => raw.copy_from_slice(&sha3::Sha3_256::digest(data)),
            c if c.is_digest() => {
                return Err(CoreError::encoding(format!("unsupported digest code {c}")))
            }
            c => return Err(CoreError::encoding(format!("{c} is not a digest code"))),
        }
        Ok(Self { code, raw })
    }

    /// Wrap precomputed digest bytes.
    pub fn from_raw(code: MatterCode, raw: [u8; 32]) -> Result<Self> {
        if code.role() != CodeRole::Digest {
            return Err(CoreError::encoding(format!("{code} is not a digest code")));
        }
        Ok(Self { code, raw })
    }

    pub fn code(&self) -> MatterCode {
        self.code
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.raw
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.raw)
    }

    /// Whether `data` hashes to this digest under the same algorithm.
    pub fn verify(&self, data: &[u8]) -> Result<bool> {
        Ok(Self::compute(self.code, data)? == *self)
    }
}

impl Qualified for Digest {
    fn qb64(&self) -> String {
        format!("{}{}", self.code.text(), encode_b64(&self.raw))
    }

    fn from_qb64(text: &str) -> Result<Self> {
        let (code, raw) = decode_qb64(text)?;
        Self::from_raw(code, to_array(&raw)?)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.code, &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qb64())
    }
}

qualified_serde!(Digest);

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &hex::encode(self.0)[..16])
    }
}

/// A signature carrying the position of its signing key in the key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedSignature {
    pub code: IndexedCode,
    pub index: u32,
    pub signature: Signature,
}

impl IndexedSignature {
    /// Ed25519 signature for the key at `index`.
    pub fn new(index: u32, signature: Signature) -> Self {
        Self {
            code: IndexedCode::Ed25519,
            index,
            signature,
        }
    }
}

impl Qualified for IndexedSignature {
    fn qb64(&self) -> String {
        // Indexes beyond one base64 digit never appear in a well-formed set.
        let index = crate::derivation::int_to_b64(self.index, INDEX_LEN)
            .unwrap_or_else(|_| "_".to_string());
        format!("{}{}{}", self.code.text(), index, encode_b64(&self.signature.0))
    }

    fn from_qb64(text: &str) -> Result<Self> {
        if !text.is_ascii() {
            return Err(CoreError::encoding("indexed signature is not ascii"));
        }
        let head = text
            .get(..1)
            .ok_or_else(|| CoreError::encoding("empty indexed signature"))?;
        let code = IndexedCode::from_text(head)?;
        if !code.is_supported() {
            return Err(CoreError::encoding(format!(
                "unsupported indexed signature code {head}"
            )));
        }
        if text.len() != code.qb64_len() {
            return Err(CoreError::encoding(format!(
                "indexed signature expects {} characters, got {}",
                code.qb64_len(),
                text.len()
            )));
        }
        let split = head.len() + INDEX_LEN;
        let index = crate::derivation::b64_to_int(&text[head.len()..split])?;
        let raw = decode_b64(&text[split..])?;
        Ok(Self {
            code,
            index,
            signature: Signature(to_array(&raw)?),
        })
    }
}

/// An Ed25519 signing key.
#[derive(Clone)]
pub struct Signer {
    signing_key: SigningKey,
    transferable: bool,
}

impl Signer {
    /// Generate a new random signer.
    pub fn generate(transferable: bool) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
            transferable,
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32], transferable: bool) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
            transferable,
        }
    }

    /// Create from a qualified Ed25519 seed (code `A`).
    pub fn from_qb64(seed: &str, transferable: bool) -> Result<Self> {
        let (code, raw) = decode_qb64(seed)?;
        if code != MatterCode::Ed25519Seed {
            return Err(CoreError::encoding(format!("{code} is not a seed code")));
        }
        Ok(Self::from_seed(&to_array(&raw)?, transferable))
    }

    /// Qualified text of the seed (secret key material).
    pub fn seed_qb64(&self) -> String {
        // The seed always has the size its code declares.
        encode_qb64(MatterCode::Ed25519Seed, &self.signing_key.to_bytes()).unwrap_or_default()
    }

    pub fn public_key(&self) -> PublicKey {
        let code = if self.transferable {
            MatterCode::Ed25519
        } else {
            MatterCode::Ed25519N
        };
        PublicKey {
            code,
            raw: self.signing_key.verifying_key().to_bytes(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Sign and tag the signature with the signer's key index.
    pub fn sign_indexed(&self, index: u32, message: &[u8]) -> IndexedSignature {
        IndexedSignature::new(index, self.sign(message))
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// First key that appears more than once in `keys`.
pub fn duplicate_key(keys: &[PublicKey]) -> Option<&PublicKey> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter().find(|key| !seen.insert(*key))
}

/// Commitment to a future signing threshold and key list.
///
/// The XOR of the digest of the threshold's canonical text and the digests of
/// each key's qualified text, so key order does not matter. Keys must be
/// distinct: a repeated pair would cancel out of the XOR.
pub fn next_commitment(
    threshold: &Threshold,
    keys: &[PublicKey],
    code: MatterCode,
) -> Result<Digest> {
    if let Some(key) = duplicate_key(keys) {
        return Err(CoreError::encoding(format!("duplicate key {key} in commitment")));
    }
    let mut acc = *Digest::compute(code, threshold.canonical_text().as_bytes())?.as_bytes();
    for key in keys {
        let digest = Digest::compute(code, key.qb64().as_bytes())?;
        for (a, b) in acc.iter_mut().zip(digest.as_bytes()) {
            *a ^= b;
        }
    }
    Digest::from_raw(code, acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let signer = Signer::from_seed(&[0x42; 32], true);
        let message = b"hello world";
        let sig = signer.sign(message);
        assert!(signer.public_key().verify(message, &sig));
        assert!(!signer.public_key().verify(b"wrong message", &sig));
    }

    #[test]
    fn test_malformed_signature_is_false() {
        let signer = Signer::from_seed(&[0x42; 32], true);
        assert!(!signer.public_key().verify(b"msg", &Signature([0u8; 64])));
        assert!(!signer.public_key().verify(b"msg", &Signature([0xff; 64])));
    }

    #[test]
    fn test_seed_qb64_roundtrip() {
        let seed = "ArwXoACJgOleVZ2PY7kXn7rA0II0mHYDhc6WrBH8fDAc";
        let signer = Signer::from_qb64(seed, true).unwrap();
        assert_eq!(signer.seed_qb64(), seed);
        assert!(signer.public_key().qb64().starts_with('D'));
    }

    #[test]
    fn test_non_transferable_key_code() {
        let signer = Signer::from_seed(&[7; 32], false);
        let key = signer.public_key();
        assert_eq!(key.code(), MatterCode::Ed25519N);
        assert!(key.qb64().starts_with('B'));
        assert!(!key.is_transferable());
    }

    #[test]
    fn test_public_key_qb64_roundtrip() {
        let key = Signer::from_seed(&[9; 32], true).public_key();
        let text = key.qb64();
        assert_eq!(text.len(), 44);
        assert_eq!(PublicKey::from_qb64(&text).unwrap(), key);
    }

    #[test]
    fn test_digest_algorithms_differ() {
        let data = b"event bytes";
        let b3 = Digest::compute(MatterCode::Blake3_256, data).unwrap();
        let s2 = Digest::compute(MatterCode::Sha2_256, data).unwrap();
        let s3 = Digest::compute(MatterCode::Sha3_256, data).unwrap();
        assert_ne!(b3.as_bytes(), s2.as_bytes());
        assert_ne!(s2.as_bytes(), s3.as_bytes());
        assert!(b3.qb64().starts_with('E'));
        assert!(s2.qb64().starts_with('K'));
        assert!(s3.qb64().starts_with('J'));
        assert!(s3.verify(data).unwrap());
    }

    #[test]
    fn test_digest_deterministic() {
        let a = Digest::compute(MatterCode::Blake3_256, b"x").unwrap();
        let b = Digest::compute(MatterCode::Blake3_256, b"x").unwrap();
        assert_eq!(a, b);
        assert_eq!(Digest::from_qb64(&a.qb64()).unwrap(), a);
    }

    #[test]
    fn test_unsupported_digest_codes() {
        assert!(matches!(
            Digest::compute(MatterCode::Blake2b_256, b"x"),
            Err(CoreError::Encoding(_))
        ));
        assert!(matches!(
            Digest::compute(MatterCode::Ed25519, b"x"),
            Err(CoreError::Encoding(_))
        ));
    }

    #[test]
    fn test_secp256k1_key_unsupported() {
        let text = encode_qb64(MatterCode::Secp256k1, &[2; 33]).unwrap();
        assert!(matches!(
            PublicKey::from_qb64(&text),
            Err(CoreError::Encoding(_))
        ));
    }

    #[test]
    fn test_indexed_signature_roundtrip() {
        let signer = Signer::from_seed(&[1; 32], true);
        let sig = signer.sign_indexed(3, b"payload");
        let text = sig.qb64();
        assert_eq!(text.len(), 88);
        assert!(text.starts_with("AD"));
        assert_eq!(IndexedSignature::from_qb64(&text).unwrap(), sig);
    }

    #[test]
    fn test_indexed_signature_multibyte_index() {
        let text = format!("A\u{e9}{}", "A".repeat(85));
        assert_eq!(text.len(), 88);
        assert!(matches!(
            IndexedSignature::from_qb64(&text),
            Err(CoreError::Encoding(_))
        ));
    }

    #[test]
    fn test_indexed_secp256k1_unsupported() {
        let text = format!("BA{}", "A".repeat(86));
        assert!(matches!(
            IndexedSignature::from_qb64(&text),
            Err(CoreError::Encoding(_))
        ));
    }

    #[test]
    fn test_next_commitment_order_insensitive() {
        let k1 = Signer::from_seed(&[1; 32], true).public_key();
        let k2 = Signer::from_seed(&[2; 32], true).public_key();
        let t = Threshold::Count(1);
        let a = next_commitment(&t, &[k1, k2], MatterCode::Blake3_256).unwrap();
        let b = next_commitment(&t, &[k2, k1], MatterCode::Blake3_256).unwrap();
        assert_eq!(a, b);
        let c = next_commitment(&Threshold::Count(2), &[k1, k2], MatterCode::Blake3_256).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_next_commitment_rejects_repeated_keys() {
        let k1 = Signer::from_seed(&[1; 32], true).public_key();
        let ka = Signer::from_seed(&[9; 32], true).public_key();
        let t = Threshold::Count(1);
        assert_eq!(duplicate_key(&[k1, ka, ka]), Some(&ka));
        assert_eq!(duplicate_key(&[k1, ka]), None);
        assert!(matches!(
            next_commitment(&t, &[k1, ka, ka], MatterCode::Blake3_256),
            Err(CoreError::Encoding(_))
        ));
    }
}
