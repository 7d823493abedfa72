//! Canonical serialization of key events.
//!
//! Every event is a map whose first field is a 17-character version string
//! `KERI10{KIND}{size:06x}_` declaring the serialization kind and the total
//! serialized length. Field order is fixed per event type, so an event always
//! serializes to the same bytes:
//!
//! - JSON: compact `serde_json` output, no whitespace
//! - CBOR: definite lengths, smallest integer encoding, map entries in field
//!   order
//!
//! Parsing rejects any input that does not re-serialize to identical bytes,
//! which keeps event digests stable across implementations.

use std::fmt;

use bytes::Bytes;
use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use crate::crypto::{Digest, PublicKey, Qualified};
use crate::error::{CoreError, Result};
use crate::event::{
    ConfigTrait, Event, Ilk, Inception, Interaction, Rotation, Seal, WitnessConfig,
};
use crate::prefix::Prefix;
use crate::threshold::Threshold;

/// Field labels, in wire order.
mod labels {
    pub const VERSION: &str = "vs";
    pub const PREFIX: &str = "pre";
    pub const SN: &str = "sn";
    pub const ILK: &str = "ilk";
    pub const PRIOR: &str = "dig";
    pub const THRESHOLD: &str = "sith";
    pub const KEYS: &str = "keys";
    pub const NEXT: &str = "nxt";
    pub const WITNESS_THRESHOLD: &str = "toad";
    pub const WITNESSES: &str = "wits";
    pub const CUTS: &str = "cuts";
    pub const ADDS: &str = "adds";
    pub const CONFIG: &str = "cnfg";
    pub const DATA: &str = "data";

    pub const SEAL_PREFIX: &str = "i";
    pub const SEAL_SN: &str = "s";
    pub const SEAL_DIGEST: &str = "d";
}

const PROTOCOL: &str = "KERI";
const VERSION_MAJOR: u8 = 1;
const VERSION_MINOR: u8 = 0;

/// Length of the version string.
pub const VERSION_STRING_LEN: usize = 17;

/// Largest offset of the version string from the start of an event.
pub const MAX_VERSION_OFFSET: usize = 12;

/// Largest size expressible in the version string.
pub const MAX_EVENT_SIZE: usize = 0xff_ffff;

/// Serialization kind of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerialKind {
    #[default]
    Json,
    Cbor,
}

impl SerialKind {
    pub fn tag(self) -> &'static str {
        match self {
            SerialKind::Json => "JSON",
            SerialKind::Cbor => "CBOR",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "JSON" => Ok(SerialKind::Json),
            "CBOR" => Ok(SerialKind::Cbor),
            other => Err(CoreError::malformed(format!(
                "unsupported serialization kind {other:?}"
            ))),
        }
    }
}

impl fmt::Display for SerialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Decoded version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub kind: SerialKind,
    pub size: usize,
}

/// Render a version string.
pub fn version_string(kind: SerialKind, size: usize) -> String {
    format!(
        "{PROTOCOL}{VERSION_MAJOR:x}{VERSION_MINOR:x}{}{size:06x}_",
        kind.tag()
    )
}

/// Parse a 17-byte version string.
pub fn parse_version(text: &[u8]) -> Result<Version> {
    if !text.is_ascii() {
        return Err(CoreError::malformed("version string is not ascii"));
    }
    let text = std::str::from_utf8(text)
        .map_err(|_| CoreError::malformed("version string is not text"))?;
    if text.len() != VERSION_STRING_LEN || !text.starts_with(PROTOCOL) || !text.ends_with('_') {
        return Err(CoreError::malformed(format!("invalid version string {text:?}")));
    }
    let major = u8::from_str_radix(&text[4..5], 16);
    let minor = u8::from_str_radix(&text[5..6], 16);
    if major != Ok(VERSION_MAJOR) || minor != Ok(VERSION_MINOR) {
        return Err(CoreError::malformed(format!(
            "unsupported protocol version {}",
            &text[4..6]
        )));
    }
    let kind = SerialKind::from_tag(&text[6..10])?;
    let size = usize::from_str_radix(&text[10..16], 16)
        .map_err(|_| CoreError::malformed(format!("invalid size in {text:?}")))?;
    Ok(Version { kind, size })
}

/// Outcome of parsing from the head of a possibly partial buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Complete { value: T, consumed: usize },
    Incomplete { needed: usize },
}

impl<T> Parsed<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Parsed::Complete { .. })
    }
}

/// An event together with the exact bytes it was serialized to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedEvent {
    pub event: Event,
    pub raw: Bytes,
    pub kind: SerialKind,
}

impl SerializedEvent {
    /// Serialize `event` in `kind`.
    pub fn new(event: Event, kind: SerialKind) -> Result<Self> {
        let raw = serialize_event(&event, kind)?;
        Ok(Self {
            event,
            raw: Bytes::from(raw),
            kind,
        })
    }

    /// Digest of the serialized bytes.
    pub fn digest(&self, code: crate::MatterCode) -> Result<Digest> {
        Digest::compute(code, &self.raw)
    }

    pub fn prefix(&self) -> &Prefix {
        self.event.prefix()
    }

    pub fn sn(&self) -> u64 {
        self.event.sn()
    }
}

/// Serialize an event in `kind`.
pub fn serialize_event(event: &Event, kind: SerialKind) -> Result<Vec<u8>> {
    let prefix = event.prefix().qb64();
    sized(kind, |vs| event_value(event, &prefix, vs))
}

/// Inception bytes with the prefix field left empty, the input to
/// self-addressing prefix derivation.
pub(crate) fn inception_bytes_for_derivation(
    inception: &Inception,
    kind: SerialKind,
) -> Result<Vec<u8>> {
    let event = Event::Inception(inception.clone());
    sized(kind, |vs| event_value(&event, "", vs))
}

/// Encode with a placeholder size, then again with the real one. The version
/// string has a fixed width, so the length does not change.
fn sized(kind: SerialKind, build: impl Fn(&str) -> Value) -> Result<Vec<u8>> {
    let draft = encode(kind, &build(&version_string(kind, 0)))?;
    let size = draft.len();
    if size > MAX_EVENT_SIZE {
        return Err(CoreError::malformed(format!("event too large: {size} bytes")));
    }
    encode(kind, &build(&version_string(kind, size)))
}

fn encode(kind: SerialKind, value: &Value) -> Result<Vec<u8>> {
    match kind {
        SerialKind::Json => serde_json::to_vec(value)
            .map_err(|e| CoreError::malformed(format!("JSON encoding failed: {e}"))),
        SerialKind::Cbor => {
            let mut buf = Vec::new();
            encode_value_to(&mut buf, value)?;
            Ok(buf)
        }
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn hex_value(n: u64) -> Value {
    Value::Text(format!("{n:x}"))
}

fn qualified_list<T: Qualified>(items: &[T]) -> Value {
    Value::Array(items.iter().map(|i| Value::Text(i.qb64())).collect())
}

fn seal_value(seal: &Seal) -> Value {
    match seal {
        Seal::Digest(d) => Value::Map(vec![(text(labels::SEAL_DIGEST), text(&d.qb64()))]),
        Seal::Event { prefix, sn, digest } => Value::Map(vec![
            (text(labels::SEAL_PREFIX), text(&prefix.qb64())),
            (text(labels::SEAL_SN), hex_value(*sn)),
            (text(labels::SEAL_DIGEST), text(&digest.qb64())),
        ]),
    }
}

fn next_value(next: &Option<Digest>) -> Value {
    match next {
        Some(d) => text(&d.qb64()),
        None => text(""),
    }
}

fn event_value(event: &Event, prefix: &str, vs: &str) -> Value {
    let mut fields: Vec<(Value, Value)> = Vec::with_capacity(12);
    let mut put = |label: &str, value: Value| fields.push((text(label), value));

    put(labels::VERSION, text(vs));
    put(labels::PREFIX, text(prefix));
    put(labels::SN, hex_value(event.sn()));
    put(labels::ILK, text(event.ilk().as_str()));

    match event {
        Event::Inception(e) => {
            put(labels::THRESHOLD, e.threshold.to_value());
            put(labels::KEYS, qualified_list(&e.keys));
            put(labels::NEXT, next_value(&e.next));
            put(labels::WITNESS_THRESHOLD, hex_value(e.witnesses.threshold));
            put(labels::WITNESSES, qualified_list(&e.witnesses.witnesses));
            put(
                labels::CONFIG,
                Value::Array(e.config.iter().map(|c| text(c.as_str())).collect()),
            );
        }
        Event::Rotation(e) => {
            put(labels::PRIOR, text(&e.prior.qb64()));
            put(labels::THRESHOLD, e.threshold.to_value());
            put(labels::KEYS, qualified_list(&e.keys));
            put(labels::NEXT, next_value(&e.next));
            put(labels::WITNESS_THRESHOLD, hex_value(e.witness_threshold));
            put(labels::CUTS, qualified_list(&e.cuts));
            put(labels::ADDS, qualified_list(&e.adds));
            put(labels::DATA, Value::Array(e.seals.iter().map(seal_value).collect()));
        }
        Event::Interaction(e) => {
            put(labels::PRIOR, text(&e.prior.qb64()));
            put(labels::DATA, Value::Array(e.seals.iter().map(seal_value).collect()));
        }
    }

    Value::Map(fields)
}

// ---------------------------------------------------------------------------
// CBOR encoder
// ---------------------------------------------------------------------------

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item)?;
            }
        }
        Value::Map(entries) => {
            // Entries are written in insertion order.
            encode_uint(buf, 5, entries.len() as u64);
            for (k, v) in entries {
                encode_value_to(buf, k)?;
                encode_value_to(buf, v)?;
            }
        }
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(_) => return Err(CoreError::malformed("floats are not canonical")),
        _ => return Err(CoreError::malformed("unsupported CBOR value type")),
    }
    Ok(())
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Locate and parse the version string at the head of `bytes`.
pub fn sniff(bytes: &[u8]) -> Result<Parsed<Version>> {
    let Some(&first) = bytes.first() else {
        return Ok(Parsed::Incomplete { needed: 1 });
    };
    let expected = match first {
        b'{' => SerialKind::Json,
        0xa0..=0xbf => SerialKind::Cbor,
        other => {
            return Err(CoreError::malformed(format!(
                "unexpected leading byte 0x{other:02x}"
            )))
        }
    };

    let window = &bytes[..bytes.len().min(MAX_VERSION_OFFSET + PROTOCOL.len())];
    let found = window
        .windows(PROTOCOL.len())
        .position(|w| w == PROTOCOL.as_bytes());

    match found {
        Some(at) if at + VERSION_STRING_LEN <= bytes.len() => {
            let version = parse_version(&bytes[at..at + VERSION_STRING_LEN])?;
            if version.kind != expected {
                return Err(CoreError::malformed(format!(
                    "version declares {} but body is {expected}",
                    version.kind
                )));
            }
            if version.size < at + VERSION_STRING_LEN {
                return Err(CoreError::malformed(format!(
                    "declared size {} is too small",
                    version.size
                )));
            }
            Ok(Parsed::Complete {
                value: version,
                consumed: at + VERSION_STRING_LEN,
            })
        }
        Some(at) => Ok(Parsed::Incomplete {
            needed: at + VERSION_STRING_LEN - bytes.len(),
        }),
        None if bytes.len() < MAX_VERSION_OFFSET + PROTOCOL.len() => Ok(Parsed::Incomplete {
            needed: MAX_VERSION_OFFSET + PROTOCOL.len() - bytes.len(),
        }),
        None => Err(CoreError::malformed("missing version string")),
    }
}

/// Parse one event from the head of `bytes`.
pub fn parse_event(bytes: &[u8]) -> Result<Parsed<SerializedEvent>> {
    let version = match sniff(bytes)? {
        Parsed::Complete { value, .. } => value,
        Parsed::Incomplete { needed } => return Ok(Parsed::Incomplete { needed }),
    };
    if bytes.len() < version.size {
        return Ok(Parsed::Incomplete {
            needed: version.size - bytes.len(),
        });
    }

    let raw = &bytes[..version.size];
    let value = decode_value(version.kind, raw)?;
    let event = value_to_event(&value)?;

    if serialize_event(&event, version.kind)? != raw {
        return Err(CoreError::malformed(
            "event is not in canonical form or its size does not match",
        ));
    }

    tracing::trace!(ilk = %event.ilk(), sn = event.sn(), size = version.size, "parsed event");

    Ok(Parsed::Complete {
        value: SerializedEvent {
            event,
            raw: Bytes::copy_from_slice(raw),
            kind: version.kind,
        },
        consumed: version.size,
    })
}

fn decode_value(kind: SerialKind, raw: &[u8]) -> Result<Value> {
    match kind {
        SerialKind::Json => serde_json::from_slice(raw)
            .map_err(|e| CoreError::malformed(format!("invalid JSON: {e}"))),
        SerialKind::Cbor => ciborium::from_reader(raw)
            .map_err(|e| CoreError::malformed(format!("invalid CBOR: {e}"))),
    }
}

/// Reads map entries in their required order.
struct FieldReader<'a> {
    entries: &'a [(Value, Value)],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(value: &'a Value) -> Result<Self> {
        match value {
            Value::Map(entries) => Ok(Self { entries, pos: 0 }),
            _ => Err(CoreError::malformed("expected map")),
        }
    }

    fn next(&mut self, label: &str) -> Result<&'a Value> {
        match self.entries.get(self.pos) {
            Some((Value::Text(key), value)) if key == label => {
                self.pos += 1;
                Ok(value)
            }
            Some((key, _)) => Err(CoreError::malformed(format!(
                "expected field {label:?}, found {key:?}"
            ))),
            None => Err(CoreError::malformed(format!("missing field {label:?}"))),
        }
    }

    fn text(&mut self, label: &str) -> Result<&'a str> {
        as_text(self.next(label)?, label)
    }

    fn hex(&mut self, label: &str) -> Result<u64> {
        parse_hex(self.text(label)?, label)
    }

    fn list<T: Qualified>(&mut self, label: &str) -> Result<Vec<T>> {
        as_array(self.next(label)?, label)?
            .iter()
            .map(|item| T::from_qb64(as_text(item, label)?))
            .collect()
    }

    fn next_digest(&mut self) -> Result<Option<Digest>> {
        match self.text(labels::NEXT)? {
            "" => Ok(None),
            qb64 => Digest::from_qb64(qb64).map(Some),
        }
    }

    fn seals(&mut self) -> Result<Vec<Seal>> {
        as_array(self.next(labels::DATA)?, labels::DATA)?
            .iter()
            .map(value_to_seal)
            .collect()
    }

    fn finish(self) -> Result<()> {
        if self.pos != self.entries.len() {
            return Err(CoreError::malformed("unexpected trailing fields"));
        }
        Ok(())
    }
}

fn as_text<'a>(value: &'a Value, label: &str) -> Result<&'a str> {
    match value {
        Value::Text(s) => Ok(s),
        _ => Err(CoreError::malformed(format!("field {label:?} must be a string"))),
    }
}

fn as_array<'a>(value: &'a Value, label: &str) -> Result<&'a [Value]> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(CoreError::malformed(format!("field {label:?} must be a list"))),
    }
}

fn parse_hex(s: &str, label: &str) -> Result<u64> {
    u64::from_str_radix(s, 16)
        .map_err(|_| CoreError::malformed(format!("field {label:?} is not hex: {s:?}")))
}

fn value_to_seal(value: &Value) -> Result<Seal> {
    let mut fields = FieldReader::new(value)?;
    let seal = match fields.entries.len() {
        1 => Seal::Digest(Digest::from_qb64(fields.text(labels::SEAL_DIGEST)?)?),
        3 => Seal::Event {
            prefix: Prefix::from_qb64(fields.text(labels::SEAL_PREFIX)?)?,
            sn: fields.hex(labels::SEAL_SN)?,
            digest: Digest::from_qb64(fields.text(labels::SEAL_DIGEST)?)?,
        },
        n => return Err(CoreError::malformed(format!("seal with {n} fields"))),
    };
    fields.finish()?;
    Ok(seal)
}

fn value_to_event(value: &Value) -> Result<Event> {
    let mut fields = FieldReader::new(value)?;
    // Already checked by sniffing; read to advance.
    fields.text(labels::VERSION)?;
    let prefix = Prefix::from_qb64(fields.text(labels::PREFIX)?)?;
    let sn = fields.hex(labels::SN)?;
    let ilk: Ilk = fields.text(labels::ILK)?.parse()?;

    let event = match ilk {
        Ilk::Inception => {
            if sn != 0 {
                return Err(CoreError::malformed(format!("inception at sn {sn}")));
            }
            let threshold = Threshold::from_value(fields.next(labels::THRESHOLD)?)?;
            let keys: Vec<PublicKey> = fields.list(labels::KEYS)?;
            let next = fields.next_digest()?;
            let toad = fields.hex(labels::WITNESS_THRESHOLD)?;
            let witnesses: Vec<Prefix> = fields.list(labels::WITNESSES)?;
            let config = as_array(fields.next(labels::CONFIG)?, labels::CONFIG)?
                .iter()
                .map(|c| as_text(c, labels::CONFIG)?.parse::<ConfigTrait>())
                .collect::<Result<Vec<_>>>()?;
            Event::Inception(Inception {
                prefix,
                threshold,
                keys,
                next,
                witnesses: WitnessConfig::new(toad, witnesses),
                config,
            })
        }
        Ilk::Rotation => {
            if sn == 0 {
                return Err(CoreError::malformed("rotation at sn 0"));
            }
            Event::Rotation(Rotation {
                prefix,
                sn,
                prior: Digest::from_qb64(fields.text(labels::PRIOR)?)?,
                threshold: Threshold::from_value(fields.next(labels::THRESHOLD)?)?,
                keys: fields.list(labels::KEYS)?,
                next: fields.next_digest()?,
                witness_threshold: fields.hex(labels::WITNESS_THRESHOLD)?,
                cuts: fields.list(labels::CUTS)?,
                adds: fields.list(labels::ADDS)?,
                seals: fields.seals()?,
            })
        }
        Ilk::Interaction => {
            if sn == 0 {
                return Err(CoreError::malformed("interaction at sn 0"));
            }
            Event::Interaction(Interaction {
                prefix,
                sn,
                prior: Digest::from_qb64(fields.text(labels::PRIOR)?)?,
                seals: fields.seals()?,
            })
        }
    };
    fields.finish()?;
    Ok(event)
}
