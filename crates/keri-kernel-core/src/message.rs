//! Signed event messages.
//!
//! Wire layout: `<event bytes><-A count><indexed sig 0>...<indexed sig n-1>`.
//! The count code is always present, `-AAA` for an unsigned event.

use bytes::{BufMut, Bytes, BytesMut};

use crate::canonical::{parse_event, Parsed, SerializedEvent};
use crate::crypto::{IndexedSignature, Qualified, Signer};
use crate::derivation::{
    b64_to_int, int_to_b64, IndexedCode, COUNT_CODE_LEN, MAX_COUNT, SIG_COUNT_CODE,
};
use crate::error::{CoreError, Result};
use crate::event::Event;
use crate::prefix::Prefix;

/// An event with its attached signature set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub event: SerializedEvent,
    pub signatures: Vec<IndexedSignature>,
}

impl SignedMessage {
    pub fn new(event: SerializedEvent, signatures: Vec<IndexedSignature>) -> Self {
        Self { event, signatures }
    }

    /// Sign `event` with `signers`, each at its position in the slice.
    pub fn sign(event: SerializedEvent, signers: &[&Signer]) -> Self {
        let signatures = signers
            .iter()
            .enumerate()
            .map(|(i, s)| s.sign_indexed(i as u32, &event.raw))
            .collect();
        Self { event, signatures }
    }

    pub fn prefix(&self) -> &Prefix {
        self.event.prefix()
    }

    pub fn sn(&self) -> u64 {
        self.event.sn()
    }

    pub fn inner(&self) -> &Event {
        &self.event.event
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let count = u32::try_from(self.signatures.len())
            .ok()
            .filter(|n| *n <= MAX_COUNT)
            .ok_or_else(|| CoreError::encoding("too many signatures"))?;
        let sig_len = IndexedCode::Ed25519.qb64_len();
        let mut buf = BytesMut::with_capacity(
            self.event.raw.len() + COUNT_CODE_LEN + self.signatures.len() * sig_len,
        );
        buf.put_slice(&self.event.raw);
        buf.put_slice(SIG_COUNT_CODE.as_bytes());
        buf.put_slice(int_to_b64(count, COUNT_CODE_LEN - SIG_COUNT_CODE.len())?.as_bytes());
        for sig in &self.signatures {
            buf.put_slice(sig.qb64().as_bytes());
        }
        Ok(buf.freeze())
    }
}

/// Parse one signed message from the head of `bytes`.
pub fn parse_message(bytes: &[u8]) -> Result<Parsed<SignedMessage>> {
    let (event, mut offset) = match parse_event(bytes)? {
        Parsed::Complete { value, consumed } => (value, consumed),
        Parsed::Incomplete { needed } => return Ok(Parsed::Incomplete { needed }),
    };

    let rest = &bytes[offset..];
    if rest.len() < COUNT_CODE_LEN {
        return Ok(Parsed::Incomplete {
            needed: COUNT_CODE_LEN - rest.len(),
        });
    }
    let count_code = std::str::from_utf8(&rest[..COUNT_CODE_LEN])
        .map_err(|_| CoreError::malformed("count code is not text"))?;
    if !count_code.starts_with(SIG_COUNT_CODE) {
        return Err(CoreError::malformed(format!(
            "expected signature count code, found {count_code:?}"
        )));
    }
    let count = b64_to_int(&count_code[SIG_COUNT_CODE.len()..])
        .map_err(|e| CoreError::malformed(e.to_string()))? as usize;
    offset += COUNT_CODE_LEN;

    let sig_len = IndexedCode::Ed25519.qb64_len();
    let total = offset + count * sig_len;
    if bytes.len() < total {
        return Ok(Parsed::Incomplete {
            needed: total - bytes.len(),
        });
    }

    let mut signatures = Vec::with_capacity(count);
    for chunk in bytes[offset..total].chunks(sig_len) {
        let text = std::str::from_utf8(chunk)
            .map_err(|_| CoreError::malformed("signature is not text"))?;
        signatures.push(IndexedSignature::from_qb64(text)?);
    }

    Ok(Parsed::Complete {
        value: SignedMessage { event, signatures },
        consumed: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EventBuilder;
    use crate::threshold::Threshold;

    fn signed(seed: u8) -> (Signer, SignedMessage) {
        let signer = Signer::from_seed(&[seed; 32], true);
        let event = EventBuilder::inception(vec![signer.public_key()])
            .threshold(Threshold::Count(1))
            .build()
            .unwrap();
        let msg = SignedMessage::sign(event, &[&signer]);
        (signer, msg)
    }

    #[test]
    fn test_message_roundtrip() {
        let (_, msg) = signed(1);
        let bytes = msg.to_bytes().unwrap();
        match parse_message(&bytes).unwrap() {
            Parsed::Complete { value, consumed } => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(value, msg);
            }
            Parsed::Incomplete { .. } => panic!("expected complete message"),
        }
    }

    #[test]
    fn test_count_code_layout() {
        let (_, msg) = signed(2);
        let bytes = msg.to_bytes().unwrap();
        let raw_len = msg.event.raw.len();
        assert_eq!(&bytes[raw_len..raw_len + 4], b"-AAB");
        assert_eq!(bytes.len(), raw_len + 4 + 88);
    }

    #[test]
    fn test_unsigned_message_has_count_code() {
        let (_, msg) = signed(3);
        let unsigned = SignedMessage::new(msg.event.clone(), vec![]);
        let bytes = unsigned.to_bytes().unwrap();
        assert!(bytes.ends_with(b"-AAA"));
        assert!(parse_message(&bytes).unwrap().is_complete());
    }

    #[test]
    fn test_missing_count_code_waits_then_fails() {
        let (_, msg) = signed(4);
        let raw = msg.event.raw.clone();
        assert_eq!(
            parse_message(&raw).unwrap(),
            Parsed::Incomplete { needed: 4 }
        );
        let mut bad = raw.to_vec();
        bad.extend_from_slice(b"XXXX");
        assert!(matches!(
            parse_message(&bad),
            Err(CoreError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_truncated_signature_needs_more() {
        let (_, msg) = signed(5);
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(
            parse_message(&bytes[..bytes.len() - 10]).unwrap(),
            Parsed::Incomplete { needed: 10 }
        );
    }

    #[test]
    fn test_two_messages_back_to_back() {
        let (_, a) = signed(6);
        let (_, b) = signed(7);
        let mut stream = a.to_bytes().unwrap().to_vec();
        stream.extend_from_slice(&b.to_bytes().unwrap());
        let Parsed::Complete { value, consumed } = parse_message(&stream).unwrap() else {
            panic!("expected complete message");
        };
        assert_eq!(value, a);
        let Parsed::Complete { value, .. } = parse_message(&stream[consumed..]).unwrap() else {
            panic!("expected second message");
        };
        assert_eq!(value, b);
    }
}
