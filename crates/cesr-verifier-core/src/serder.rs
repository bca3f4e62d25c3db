//! Message body serialization.
//!
//! Bodies are field maps serialized in insertion order as compact JSON or
//! as CBOR. Every body begins with a version string in its `v` field that
//! names the protocol, the serialization kind and the total body size, so
//! a reader can frame the body before decoding it.
//!
//! CBOR is written with the encoder below rather than a generic serializer:
//! integers use their smallest encoding, lengths are definite, and map
//! entries keep the order the fields were inserted in.

use bytes::Bytes;
use ciborium::value::Value as Cbor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::MessageError;

/// A field map in insertion order.
pub type Sad = serde_json::Map<String, Value>;

/// Length of a version string, e.g. `KERI10JSON00011c_`.
pub const VERSION_LEN: usize = 17;

/// Furthest offset at which a version string may start.
pub const MAX_VERSION_OFFSET: usize = 12;

/// Largest body size a version string can declare.
pub const MAX_BODY_SIZE: usize = 0xff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Keri,
    Acdc,
}

impl Protocol {
    const fn tag(self) -> &'static str {
        match self {
            Protocol::Keri => "KERI",
            Protocol::Acdc => "ACDC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Json,
    Cbor,
}

impl Kind {
    const fn tag(self) -> &'static str {
        match self {
            Kind::Json => "JSON",
            Kind::Cbor => "CBOR",
        }
    }
}

/// A parsed version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub protocol: Protocol,
    pub major: u8,
    pub minor: u8,
    pub kind: Kind,
    pub size: usize,
}

/// Why a version string could not be located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSniff {
    /// More bytes are needed before the search window is complete.
    Incomplete,
    /// The search window is complete and holds no valid version string.
    NotFound,
}

impl Version {
    /// Version 1.0 with a zero size, to be filled in once serialized.
    pub fn new(protocol: Protocol, kind: Kind) -> Self {
        Self {
            protocol,
            major: 1,
            minor: 0,
            kind,
            size: 0,
        }
    }

    pub fn with_size(self, size: usize) -> Self {
        Self { size, ..self }
    }

    /// Parse exactly one version string.
    pub fn parse(text: &[u8]) -> Result<Self, MessageError> {
        let bad = |reason: &str| MessageError::invalid("v", reason);
        if text.len() != VERSION_LEN || text[VERSION_LEN - 1] != b'_' {
            return Err(bad("version string must be 17 characters ending in '_'"));
        }
        let protocol = match &text[..4] {
            b"KERI" => Protocol::Keri,
            b"ACDC" => Protocol::Acdc,
            _ => return Err(bad("unknown protocol")),
        };
        let hex_digit = |c: u8| (c as char).to_digit(16).map(|d| d as u8);
        let major = hex_digit(text[4]).ok_or_else(|| bad("invalid major version"))?;
        let minor = hex_digit(text[5]).ok_or_else(|| bad("invalid minor version"))?;
        let kind = match &text[6..10] {
            b"JSON" => Kind::Json,
            b"CBOR" => Kind::Cbor,
            _ => return Err(bad("unsupported serialization kind")),
        };
        let size_text =
            std::str::from_utf8(&text[10..16]).map_err(|_| bad("invalid size field"))?;
        if !size_text.bytes().all(|c| c.is_ascii_hexdigit()) {
            return Err(bad("invalid size field"));
        }
        let size = usize::from_str_radix(size_text, 16).map_err(|_| bad("invalid size field"))?;
        Ok(Self {
            protocol,
            major,
            minor,
            kind,
            size,
        })
    }

    /// Locate the version string near the front of a raw body.
    pub fn sniff(raw: &[u8]) -> Result<Self, VersionSniff> {
        let window_len = MAX_VERSION_OFFSET + VERSION_LEN;
        let window = &raw[..raw.len().min(window_len)];
        if window.len() >= VERSION_LEN {
            for start in 0..=(window.len() - VERSION_LEN) {
                let candidate = &window[start..start + VERSION_LEN];
                if candidate.starts_with(b"KERI") || candidate.starts_with(b"ACDC") {
                    if let Ok(version) = Self::parse(candidate) {
                        return Ok(version);
                    }
                }
            }
        }
        if raw.len() < window_len {
            Err(VersionSniff::Incomplete)
        } else {
            Err(VersionSniff::NotFound)
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:x}{:x}{}{:06x}_",
            self.protocol.tag(),
            self.major,
            self.minor,
            self.kind.tag(),
            self.size
        )
    }
}

/// Serialize a field map.
pub fn dumps(sad: &Sad, kind: Kind) -> Result<Vec<u8>, MessageError> {
    match kind {
        Kind::Json => serde_json::to_vec(sad).map_err(|e| MessageError::Serialization(e.to_string())),
        Kind::Cbor => {
            let mut buf = Vec::new();
            encode_map(&mut buf, sad)?;
            Ok(buf)
        }
    }
}

/// Deserialize a field map.
pub fn loads(raw: &[u8], kind: Kind) -> Result<Sad, MessageError> {
    match kind {
        Kind::Json => {
            serde_json::from_slice(raw).map_err(|e| MessageError::Serialization(e.to_string()))
        }
        Kind::Cbor => {
            let value: Cbor =
                ciborium::from_reader(raw).map_err(|e| MessageError::Serialization(e.to_string()))?;
            match cbor_to_json(value)? {
                Value::Object(map) => Ok(map),
                _ => Err(MessageError::Serialization("CBOR body is not a map".into())),
            }
        }
    }
}

/// Set the `v` field's size to the serialized size of `sad`.
///
/// The size field is fixed width, so the serialized length does not change.
pub fn size_version(sad: &mut Sad, kind: Kind) -> Result<Version, MessageError> {
    let current = sad
        .get("v")
        .and_then(Value::as_str)
        .ok_or_else(|| MessageError::MissingField("v".into()))?;
    let version = Version::parse(current.as_bytes())?;
    if version.kind != kind {
        return Err(MessageError::invalid("v", "serialization kind does not match"));
    }
    let size = dumps(sad, kind)?.len();
    if size > MAX_BODY_SIZE {
        return Err(MessageError::invalid("v", "body too large"));
    }
    let sized = version.with_size(size);
    sad.insert("v".into(), Value::String(sized.to_string()));
    Ok(sized)
}

/// A framed message body: raw bytes, version and decoded fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Serder {
    raw: Bytes,
    version: Version,
    sad: Sad,
}

impl Serder {
    /// Decode a body whose version was already located.
    ///
    /// `raw` must be exactly `version.size` bytes.
    pub fn from_raw(raw: &[u8], version: Version) -> Result<Self, MessageError> {
        if raw.len() != version.size {
            return Err(MessageError::invalid(
                "v",
                format!("declared size {} but body has {} bytes", version.size, raw.len()),
            ));
        }
        let sad = loads(raw, version.kind)?;
        let embedded = sad
            .get("v")
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::MissingField("v".into()))?;
        if embedded != version.to_string() {
            return Err(MessageError::invalid("v", "version field is not the first field"));
        }
        Ok(Self {
            raw: Bytes::copy_from_slice(raw),
            version,
            sad,
        })
    }

    /// Serialize a field map whose `v` field is already sized.
    pub fn from_sad(sad: Sad) -> Result<Self, MessageError> {
        let embedded = sad
            .get("v")
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::MissingField("v".into()))?;
        let version = Version::parse(embedded.as_bytes())?;
        let raw = dumps(&sad, version.kind)?;
        if raw.len() != version.size {
            return Err(MessageError::invalid("v", "size field does not match body"));
        }
        Ok(Self {
            raw: Bytes::from(raw),
            version,
            sad,
        })
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn kind(&self) -> Kind {
        self.version.kind
    }

    pub fn protocol(&self) -> Protocol {
        self.version.protocol
    }

    pub fn sad(&self) -> &Sad {
        &self.sad
    }

    /// The message type (`t` field), absent for credentials.
    pub fn ilk(&self) -> Option<&str> {
        self.sad.get("t").and_then(Value::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CBOR
// ─────────────────────────────────────────────────────────────────────────────

fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), MessageError> {
    match value {
        Value::Null => buf.push(0xf6),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                encode_uint(buf, 0, u);
            } else if let Some(i) = n.as_i64() {
                // CBOR encodes -1 as 0, -2 as 1, etc.
                encode_uint(buf, 1, (-1 - i) as u64);
            } else {
                return Err(MessageError::Serialization(
                    "floats not supported in message bodies".into(),
                ));
            }
        }
        Value::String(s) => encode_text(buf, s),
        Value::Array(items) => {
            encode_uint(buf, 4, items.len() as u64);
            for item in items {
                encode_value(buf, item)?;
            }
        }
        Value::Object(map) => encode_map(buf, map)?,
    }
    Ok(())
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

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode a map (major type 5) in insertion order.
fn encode_map(buf: &mut Vec<u8>, map: &Sad) -> Result<(), MessageError> {
    encode_uint(buf, 5, map.len() as u64);
    for (key, value) in map {
        encode_text(buf, key);
        encode_value(buf, value)?;
    }
    Ok(())
}

fn cbor_to_json(value: Cbor) -> Result<Value, MessageError> {
    let unsupported = |what: &str| MessageError::Serialization(format!("unsupported CBOR {what}"));
    Ok(match value {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(i) => {
            let n: i128 = i.into();
            if let Ok(u) = u64::try_from(n) {
                Value::from(u)
            } else if let Ok(s) = i64::try_from(n) {
                Value::from(s)
            } else {
                return Err(unsupported("integer"));
            }
        }
        Cbor::Text(s) => Value::String(s),
        Cbor::Array(items) => Value::Array(
            items
                .into_iter()
                .map(cbor_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Cbor::Map(entries) => {
            let mut map = Sad::new();
            for (k, v) in entries {
                let Cbor::Text(key) = k else {
                    return Err(unsupported("map key"));
                };
                map.insert(key, cbor_to_json(v)?);
            }
            Value::Object(map)
        }
        Cbor::Float(_) => return Err(unsupported("float")),
        Cbor::Bytes(_) => return Err(unsupported("byte string")),
        Cbor::Tag(..) => return Err(unsupported("tag")),
        _ => return Err(unsupported("value")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(kind: Kind) -> Sad {
        let mut sad = Sad::new();
        sad.insert(
            "v".into(),
            Value::String(Version::new(Protocol::Keri, kind).to_string()),
        );
        sad.insert("t".into(), json!("icp"));
        sad.insert("s".into(), json!("0"));
        sad.insert("k".into(), json!(["DKey", "DOther"]));
        sad.insert("n".into(), json!({"z": 1, "a": -3}));
        sad
    }

    #[test]
    fn test_version_string_roundtrip() {
        let version = Version::new(Protocol::Acdc, Kind::Json).with_size(0x11c);
        assert_eq!(version.to_string(), "ACDC10JSON00011c_");
        assert_eq!(Version::parse(b"ACDC10JSON00011c_").unwrap(), version);
        assert!(Version::parse(b"KERI10YAML00011c_").is_err());
        assert!(Version::parse(b"KERI10JSON00011c.").is_err());
    }

    #[test]
    fn test_sniff_window() {
        let body = br#"{"v":"KERI10JSON000020_","t":"x"}"#;
        let version = Version::sniff(body).unwrap();
        assert_eq!(version.kind, Kind::Json);
        assert_eq!(version.size, 0x20);

        assert_eq!(Version::sniff(br#"{"v":"KER"#), Err(VersionSniff::Incomplete));
        assert_eq!(
            Version::sniff(br#"{"zzzzzzzzzzzzzzzz":"KERI10JSON000020_"}"#),
            Err(VersionSniff::NotFound)
        );
    }

    #[test]
    fn test_json_keeps_insertion_order() {
        let mut sad = sample(Kind::Json);
        size_version(&mut sad, Kind::Json).unwrap();
        let raw = dumps(&sad, Kind::Json).unwrap();
        let text = String::from_utf8(raw.clone()).unwrap();
        assert!(text.starts_with(r#"{"v":"KERI10JSON"#));
        assert!(text.contains(r#""n":{"z":1,"a":-3}"#));

        let serder = Serder::from_sad(sad.clone()).unwrap();
        assert_eq!(serder.raw().as_ref(), raw.as_slice());
        assert_eq!(serder.ilk(), Some("icp"));
    }

    #[test]
    fn test_cbor_roundtrip_and_framing() {
        let mut sad = sample(Kind::Cbor);
        let version = size_version(&mut sad, Kind::Cbor).unwrap();
        let raw = dumps(&sad, Kind::Cbor).unwrap();
        assert_eq!(raw.len(), version.size);
        assert_eq!(raw[0] >> 5, 0b101);

        let sniffed = Version::sniff(&raw).unwrap();
        assert_eq!(sniffed, version);
        let serder = Serder::from_raw(&raw, sniffed).unwrap();
        assert_eq!(serder.sad(), &sad);
        let keys: Vec<_> = serder.sad()["n"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_from_raw_checks_size() {
        let mut sad = sample(Kind::Json);
        let version = size_version(&mut sad, Kind::Json).unwrap();
        let raw = dumps(&sad, Kind::Json).unwrap();
        let wrong = version.with_size(version.size - 1);
        assert!(Serder::from_raw(&raw[..raw.len() - 1], wrong).is_err());
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, vec![0x19, 0x01, 0x00]);
    }

    #[test]
    fn test_floats_rejected() {
        let mut sad = Sad::new();
        sad.insert("x".into(), json!(1.5));
        assert!(dumps(&sad, Kind::Cbor).is_err());
    }
}
