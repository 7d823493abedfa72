//! Derivation code tables for qualified ("qb64") text.
//!
//! A qualified value is a short code followed by the URL-safe, unpadded
//! base64 encoding of its raw bytes. Every code has a fixed raw size, so the
//! text length of a value is fully determined by its code.

use std::fmt;

use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Codes for fixed-size primitives (keys, seeds, digests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatterCode {
    Ed25519Seed,
    Ed25519N,
    X25519,
    Ed25519,
    Blake3_256,
    Blake2b_256,
    Blake2s_256,
    Secp256k1N,
    Secp256k1,
    Sha3_256,
    Sha2_256,
}

/// What a matter code stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRole {
    Seed,
    Key,
    Digest,
}

struct MatterEntry {
    code: MatterCode,
    text: &'static str,
    raw_size: usize,
    role: CodeRole,
    supported: bool,
}

#[rustfmt::skip]
static MATTER_TABLE: &[MatterEntry] = &[
    MatterEntry { code: MatterCode::Ed25519Seed, text: "A", raw_size: 32, role: CodeRole::Seed, supported: true },
    MatterEntry { code: MatterCode::Ed25519N, text: "B", raw_size: 32, role: CodeRole::Key, supported: true },
    MatterEntry { code: MatterCode::X25519, text: "C", raw_size: 32, role: CodeRole::Key, supported: false },
    MatterEntry { code: MatterCode::Ed25519, text: "D", raw_size: 32, role: CodeRole::Key, supported: true },
    MatterEntry { code: MatterCode::Blake3_256, text: "E", raw_size: 32, role: CodeRole::Digest, supported: true },
    MatterEntry { code: MatterCode::Blake2b_256, text: "F", raw_size: 32, role: CodeRole::Digest, supported: false },
    MatterEntry { code: MatterCode::Blake2s_256, text: "G", raw_size: 32, role: CodeRole::Digest, supported: false },
    MatterEntry { code: MatterCode::Secp256k1N, text: "H", raw_size: 33, role: CodeRole::Key, supported: false },
    MatterEntry { code: MatterCode::Secp256k1, text: "I", raw_size: 33, role: CodeRole::Key, supported: false },
    MatterEntry { code: MatterCode::Sha3_256, text: "J", raw_size: 32, role: CodeRole::Digest, supported: true },
    MatterEntry { code: MatterCode::Sha2_256, text: "K", raw_size: 32, role: CodeRole::Digest, supported: true },
];

impl MatterCode {
    fn entry(self) -> &'static MatterEntry {
        // Every variant has exactly one table row.
        MATTER_TABLE
            .iter()
            .find(|e| e.code == self)
            .unwrap_or(&MATTER_TABLE[0])
    }

    /// Look up a code by its text form.
    pub fn from_text(text: &str) -> Result<Self> {
        MATTER_TABLE
            .iter()
            .find(|e| e.text == text)
            .map(|e| e.code)
            .ok_or_else(|| CoreError::encoding(format!("unknown derivation code {text:?}")))
    }

    /// The code's text form.
    pub fn text(self) -> &'static str {
        self.entry().text
    }

    /// Size of the raw material in bytes.
    pub fn raw_size(self) -> usize {
        self.entry().raw_size
    }

    /// Length of the full qualified text (code plus payload).
    pub fn qb64_len(self) -> usize {
        self.text().len() + b64_len(self.raw_size())
    }

    pub fn role(self) -> CodeRole {
        self.entry().role
    }

    /// Whether this implementation can compute or verify with the code.
    pub fn is_supported(self) -> bool {
        self.entry().supported
    }

    pub fn is_digest(self) -> bool {
        self.role() == CodeRole::Digest
    }

    pub fn is_key(self) -> bool {
        self.role() == CodeRole::Key
    }

    /// Non-transferable key codes may never rotate.
    pub fn is_transferable(self) -> bool {
        !matches!(self, MatterCode::Ed25519N | MatterCode::Secp256k1N)
    }
}

impl fmt::Display for MatterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Codes for indexed signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexedCode {
    Ed25519,
    Secp256k1,
}

struct IndexedEntry {
    code: IndexedCode,
    text: &'static str,
    raw_size: usize,
    supported: bool,
}

static INDEXED_TABLE: &[IndexedEntry] = &[
    IndexedEntry { code: IndexedCode::Ed25519, text: "A", raw_size: 64, supported: true },
    IndexedEntry { code: IndexedCode::Secp256k1, text: "B", raw_size: 64, supported: false },
];

/// Number of base64 characters carrying the signer index.
pub const INDEX_LEN: usize = 1;

/// Length of an indexed Ed25519 signature in qualified text.
pub const INDEXED_SIG_LEN: usize = 88;

impl IndexedCode {
    fn entry(self) -> &'static IndexedEntry {
        INDEXED_TABLE
            .iter()
            .find(|e| e.code == self)
            .unwrap_or(&INDEXED_TABLE[0])
    }

    pub fn from_text(text: &str) -> Result<Self> {
        INDEXED_TABLE
            .iter()
            .find(|e| e.text == text)
            .map(|e| e.code)
            .ok_or_else(|| CoreError::encoding(format!("unknown indexed code {text:?}")))
    }

    pub fn text(self) -> &'static str {
        self.entry().text
    }

    pub fn raw_size(self) -> usize {
        self.entry().raw_size
    }

    pub fn qb64_len(self) -> usize {
        self.text().len() + INDEX_LEN + b64_len(self.raw_size())
    }

    pub fn is_supported(self) -> bool {
        self.entry().supported
    }
}

/// Count code prefix for attached indexed signature groups.
pub const SIG_COUNT_CODE: &str = "-A";

/// Length of a full count code (`-A` plus two base64 digits).
pub const COUNT_CODE_LEN: usize = 4;

/// Largest count expressible with two base64 digits.
pub const MAX_COUNT: u32 = 64 * 64 - 1;

const B64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Unpadded base64 length of `raw` bytes.
pub const fn b64_len(raw: usize) -> usize {
    (raw * 4 + 2) / 3
}

/// Encode an integer as `width` base64 digits, most significant first.
pub fn int_to_b64(mut value: u32, width: usize) -> Result<String> {
    let mut out = vec![b'A'; width];
    for slot in out.iter_mut().rev() {
        *slot = B64_ALPHABET[(value % 64) as usize];
        value /= 64;
    }
    if value != 0 {
        return Err(CoreError::encoding(format!(
            "integer does not fit in {width} base64 digits"
        )));
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Decode base64 digits into an integer.
pub fn b64_to_int(text: &str) -> Result<u32> {
    let mut value: u32 = 0;
    for ch in text.bytes() {
        let digit = B64_ALPHABET
            .iter()
            .position(|&c| c == ch)
            .ok_or_else(|| CoreError::encoding(format!("invalid base64 digit {:?}", ch as char)))?;
        value = value
            .checked_mul(64)
            .and_then(|v| v.checked_add(digit as u32))
            .ok_or_else(|| CoreError::encoding("base64 integer overflow"))?;
    }
    Ok(value)
}

/// Encode raw material under a code.
pub fn encode_qb64(code: MatterCode, raw: &[u8]) -> Result<String> {
    if raw.len() != code.raw_size() {
        return Err(CoreError::encoding(format!(
            "code {code} expects {} raw bytes, got {}",
            code.raw_size(),
            raw.len()
        )));
    }
    Ok(format!("{}{}", code.text(), BASE64_URL_SAFE_NO_PAD.encode(raw)))
}

/// Decode qualified text into its code and raw material.
pub fn decode_qb64(text: &str) -> Result<(MatterCode, Vec<u8>)> {
    let head = text
        .get(..1)
        .ok_or_else(|| CoreError::encoding("empty qualified text"))?;
    let code = MatterCode::from_text(head)?;
    if text.len() != code.qb64_len() {
        return Err(CoreError::encoding(format!(
            "code {code} expects {} characters, got {}",
            code.qb64_len(),
            text.len()
        )));
    }
    let raw = BASE64_URL_SAFE_NO_PAD
        .decode(&text[code.text().len()..])
        .map_err(|e| CoreError::encoding(format!("invalid base64: {e}")))?;
    if raw.len() != code.raw_size() {
        return Err(CoreError::encoding("decoded size does not match code"));
    }
    Ok((code, raw))
}

pub(crate) fn decode_b64(text: &str) -> Result<Vec<u8>> {
    BASE64_URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|e| CoreError::encoding(format!("invalid base64: {e}")))
}

pub(crate) fn encode_b64(raw: &[u8]) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(raw)
}
