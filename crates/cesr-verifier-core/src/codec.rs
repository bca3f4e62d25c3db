//! Self-framing CESR primitives ("matter").
//!
//! A primitive is a type code followed by its raw value. The code fixes the
//! primitive's total length, so a reader finds the boundary without an outer
//! length prefix. Two domains are supported:
//!
//! - **Text (qb64)**: `code || base64url(zeros(ps) || raw)[ps..]`, where the
//!   pad size `ps = (3 - len(raw) % 3) % 3` always equals `len(code) % 4`.
//! - **Binary (qb2)**: the base64url decoding of the text form.
//!
//! Declared-length codes (`4B`, `5B`, `6B`) carry a two character quadlet
//! count after the hard code and use leading zero bytes instead of pad chars.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fmt;

use crate::error::CodecError;

pub(crate) const B64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Largest quadlet count expressible in a two character soft size.
const MAX_SMALL_QUADLETS: usize = 64 * 64 - 1;

/// Which CESR domain a buffer is encoded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Text,
    Binary,
}

pub(crate) fn b64_value(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'Z' => Some(c - b'A'),
        b'a'..=b'z' => Some(c - b'a' + 26),
        b'0'..=b'9' => Some(c - b'0' + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

pub(crate) fn ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Base64 digits of `value`, truncated to `chars` digits.
pub(crate) fn b64_digits(value: u64, chars: usize) -> String {
    let mut out = vec![b'A'; chars];
    let mut v = value;
    for slot in out.iter_mut().rev() {
        *slot = B64_ALPHABET[(v & 0x3f) as usize];
        v >>= 6;
    }
    ascii(&out)
}

/// Encode `value` as exactly `chars` base64 digits, most significant first.
pub fn int_to_b64(value: u64, chars: usize) -> Result<String, CodecError> {
    if chars < 11 && value >> (6 * chars) != 0 {
        return Err(CodecError::SoftOverflow { value, chars });
    }
    Ok(b64_digits(value, chars))
}

/// Decode base64 digits into an integer.
pub fn b64_to_int(text: &[u8]) -> Result<u64, CodecError> {
    if text.len() > 10 {
        return Err(CodecError::InvalidValue(format!(
            "{} base64 digits overflow u64",
            text.len()
        )));
    }
    text.iter().try_fold(0u64, |acc, &c| {
        let v = b64_value(c)
            .ok_or_else(|| CodecError::InvalidBase64(format!("invalid character {:?}", c as char)))?;
        Ok((acc << 6) | u64::from(v))
    })
}

/// Pack base64 text into bytes. `text` must be whole quadlets of valid digits.
pub(crate) fn text_to_binary(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 3 / 4);
    for quad in text.chunks(4) {
        let mut n: u32 = 0;
        for &c in quad {
            n = (n << 6) | u32::from(b64_value(c).unwrap_or(0));
        }
        out.extend_from_slice(&[(n >> 16) as u8, (n >> 8) as u8, n as u8]);
    }
    out
}

/// Recover the first `chars` text characters from a binary buffer.
pub(crate) fn binary_head(buf: &[u8], chars: usize) -> Result<Vec<u8>, CodecError> {
    let needed = (chars * 6 + 7) / 8;
    if buf.len() < needed {
        return Err(CodecError::Shortage { needed });
    }
    let text = URL_SAFE_NO_PAD.encode(&buf[..needed]);
    Ok(text.as_bytes()[..chars].to_vec())
}

/// Transcode a complete binary primitive of `text_size` chars into text.
pub(crate) fn binary_to_text(buf: &[u8], text_size: usize) -> Result<Vec<u8>, CodecError> {
    let size = text_size * 3 / 4;
    if buf.len() < size {
        return Err(CodecError::Shortage { needed: size });
    }
    Ok(URL_SAFE_NO_PAD.encode(&buf[..size]).into_bytes())
}

/// Encode raw bytes behind a code of `pad` pad characters.
pub(crate) fn encode_padded(raw: &[u8], pad: usize) -> String {
    let mut padded = vec![0u8; pad];
    padded.extend_from_slice(raw);
    let text = URL_SAFE_NO_PAD.encode(&padded);
    text[pad..].to_string()
}

/// Decode the value part of a fixed-size primitive whose code used `pad`
/// characters of the leading triplet.
pub(crate) fn decode_padded(body: &[u8], pad: usize, code: &str) -> Result<Vec<u8>, CodecError> {
    let mut text = vec![b'A'; pad];
    text.extend_from_slice(body);
    let decoded = URL_SAFE_NO_PAD
        .decode(&text)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
    match decoded.get(..pad) {
        Some(lead) if lead.iter().all(|b| *b == 0) => Ok(decoded[pad..].to_vec()),
        _ => Err(CodecError::NonZeroPad(code.to_string())),
    }
}

/// Number of hard code characters selected by the first character.
fn hard_size(first: u8) -> Option<usize> {
    match first {
        b'A'..=b'Z' | b'a'..=b'z' => Some(1),
        b'0' | b'4' | b'5' | b'6' => Some(2),
        b'1' | b'2' | b'3' | b'7' | b'8' | b'9' => Some(4),
        _ => None,
    }
}

/// Type codes for primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatterCode {
    /// Ed25519 private key seed.
    Ed25519Seed,
    /// Ed25519 public key of a non-transferable identifier.
    Ed25519N,
    /// Ed25519 public verification key.
    Ed25519,
    Blake3_256,
    Sha2_256,
    /// Two byte number.
    Short,
    /// 128 bit salt, also used for sequence numbers.
    Salt128,
    Ed25519Sig,
    /// Four byte number.
    Long,
    /// ISO-8601 datetime in base64 translation.
    DateTime,
    /// Declared-length raw bytes.
    Bytes,
}

impl MatterCode {
    /// The hard code text. Declared-length bytes report their zero-lead form.
    pub const fn hard(self) -> &'static str {
        match self {
            MatterCode::Ed25519Seed => "A",
            MatterCode::Ed25519N => "B",
            MatterCode::Ed25519 => "D",
            MatterCode::Blake3_256 => "E",
            MatterCode::Sha2_256 => "I",
            MatterCode::Short => "M",
            MatterCode::Salt128 => "0A",
            MatterCode::Ed25519Sig => "0B",
            MatterCode::Long => "0H",
            MatterCode::DateTime => "1AAG",
            MatterCode::Bytes => "4B",
        }
    }

    /// Raw size in bytes, `None` for declared-length codes.
    pub const fn raw_size(self) -> Option<usize> {
        match self {
            MatterCode::Ed25519Seed
            | MatterCode::Ed25519N
            | MatterCode::Ed25519
            | MatterCode::Blake3_256
            | MatterCode::Sha2_256 => Some(32),
            MatterCode::Short => Some(2),
            MatterCode::Salt128 => Some(16),
            MatterCode::Ed25519Sig => Some(64),
            MatterCode::Long => Some(4),
            MatterCode::DateTime => Some(24),
            MatterCode::Bytes => None,
        }
    }

    /// Full text size in characters, `None` for declared-length codes.
    pub const fn full_size(self) -> Option<usize> {
        match self {
            MatterCode::Ed25519Seed
            | MatterCode::Ed25519N
            | MatterCode::Ed25519
            | MatterCode::Blake3_256
            | MatterCode::Sha2_256 => Some(44),
            MatterCode::Short => Some(4),
            MatterCode::Salt128 => Some(24),
            MatterCode::Ed25519Sig => Some(88),
            MatterCode::Long => Some(8),
            MatterCode::DateTime => Some(36),
            MatterCode::Bytes => None,
        }
    }

    /// Whether this code identifies a digest.
    pub const fn is_digest(self) -> bool {
        matches!(self, MatterCode::Blake3_256 | MatterCode::Sha2_256)
    }

    /// Whether this code may serve as an identifier prefix.
    pub const fn is_prefix(self) -> bool {
        matches!(
            self,
            MatterCode::Ed25519N | MatterCode::Ed25519 | MatterCode::Blake3_256 | MatterCode::Sha2_256
        )
    }

    /// Look up a hard code, returning the code and its lead byte count.
    fn from_hard(hard: &str) -> Option<(Self, usize)> {
        let code = match hard {
            "A" => MatterCode::Ed25519Seed,
            "B" => MatterCode::Ed25519N,
            "D" => MatterCode::Ed25519,
            "E" => MatterCode::Blake3_256,
            "I" => MatterCode::Sha2_256,
            "M" => MatterCode::Short,
            "0A" => MatterCode::Salt128,
            "0B" => MatterCode::Ed25519Sig,
            "0H" => MatterCode::Long,
            "1AAG" => MatterCode::DateTime,
            "4B" => return Some((MatterCode::Bytes, 0)),
            "5B" => return Some((MatterCode::Bytes, 1)),
            "6B" => return Some((MatterCode::Bytes, 2)),
            _ => return None,
        };
        Some((code, 0))
    }
}

/// A decoded CESR primitive.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Matter {
    code: MatterCode,
    raw: Vec<u8>,
}

impl Matter {
    /// Create a primitive, checking the raw size against the code.
    pub fn new(code: MatterCode, raw: impl Into<Vec<u8>>) -> Result<Self, CodecError> {
        let raw = raw.into();
        match code.raw_size() {
            Some(expected) if expected != raw.len() => Err(CodecError::RawSize {
                code: code.hard().to_string(),
                expected,
                got: raw.len(),
            }),
            None if raw.len() + 2 > MAX_SMALL_QUADLETS * 3 => Err(CodecError::RawSize {
                code: code.hard().to_string(),
                expected: MAX_SMALL_QUADLETS * 3 - 2,
                got: raw.len(),
            }),
            _ => Ok(Self { code, raw }),
        }
    }

    /// Build from raw bytes whose size the caller already guarantees.
    pub(crate) fn from_sized(code: MatterCode, raw: Vec<u8>) -> Self {
        debug_assert!(code.raw_size().map_or(true, |size| size == raw.len()));
        Self { code, raw }
    }

    pub fn code(&self) -> MatterCode {
        self.code
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Text domain encoding.
    pub fn qb64(&self) -> String {
        match self.code.full_size() {
            Some(_) => {
                let hard = self.code.hard();
                format!("{}{}", hard, encode_padded(&self.raw, hard.len() % 4))
            }
            None => {
                let lead = (3 - self.raw.len() % 3) % 3;
                let hard = ["4B", "5B", "6B"][lead];
                let quadlets = (self.raw.len() + lead) / 3;
                let mut padded = vec![0u8; lead];
                padded.extend_from_slice(&self.raw);
                format!(
                    "{}{}{}",
                    hard,
                    b64_digits(quadlets as u64, 2),
                    URL_SAFE_NO_PAD.encode(&padded)
                )
            }
        }
    }

    /// Binary domain encoding.
    pub fn qb2(&self) -> Vec<u8> {
        text_to_binary(self.qb64().as_bytes())
    }

    pub fn encode(&self, domain: Domain) -> Vec<u8> {
        match domain {
            Domain::Text => self.qb64().into_bytes(),
            Domain::Binary => self.qb2(),
        }
    }

    /// Decode one primitive from the front of `buf`.
    ///
    /// Returns the primitive and the number of bytes it occupied.
    pub fn decode(buf: &[u8], domain: Domain) -> Result<(Self, usize), CodecError> {
        match domain {
            Domain::Text => Self::decode_text(buf),
            Domain::Binary => Self::decode_binary(buf),
        }
    }

    /// Parse a complete qb64 string. Trailing characters are an error.
    pub fn from_qb64(text: &str) -> Result<Self, CodecError> {
        let (matter, used) = Self::decode_text(text.as_bytes())?;
        if used != text.len() {
            return Err(CodecError::InvalidValue(format!(
                "{} trailing characters after {}",
                text.len() - used,
                matter.code.hard()
            )));
        }
        Ok(matter)
    }

    fn decode_text(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        let first = *buf.first().ok_or(CodecError::Shortage { needed: 1 })?;
        let hs = hard_size(first).ok_or_else(|| CodecError::UnknownCode(ascii(&[first])))?;
        if buf.len() < hs {
            return Err(CodecError::Shortage { needed: hs });
        }
        let hard = ascii(&buf[..hs]);
        let (code, lead) =
            MatterCode::from_hard(&hard).ok_or_else(|| CodecError::UnknownCode(hard.clone()))?;

        match code.full_size() {
            Some(fs) => {
                if buf.len() < fs {
                    return Err(CodecError::Shortage { needed: fs });
                }
                let raw = decode_padded(&buf[hs..fs], hs % 4, &hard)?;
                Ok((Self { code, raw }, fs))
            }
            None => {
                if buf.len() < 4 {
                    return Err(CodecError::Shortage { needed: 4 });
                }
                let fs = 4 + b64_to_int(&buf[2..4])? as usize * 4;
                if buf.len() < fs {
                    return Err(CodecError::Shortage { needed: fs });
                }
                let decoded = URL_SAFE_NO_PAD
                    .decode(&buf[4..fs])
                    .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
                match decoded.get(..lead) {
                    Some(l) if l.iter().all(|b| *b == 0) => Ok((
                        Self {
                            code,
                            raw: decoded[lead..].to_vec(),
                        },
                        fs,
                    )),
                    _ => Err(CodecError::NonZeroPad(hard)),
                }
            }
        }
    }

    fn decode_binary(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        let first = *buf.first().ok_or(CodecError::Shortage { needed: 1 })?;
        let lead_char = B64_ALPHABET[(first >> 2) as usize];
        let hs = hard_size(lead_char).ok_or_else(|| CodecError::UnknownCode(ascii(&[lead_char])))?;
        let head = binary_head(buf, hs)?;
        let hard = ascii(&head);
        let (code, _) =
            MatterCode::from_hard(&hard).ok_or_else(|| CodecError::UnknownCode(hard.clone()))?;
        let fs = match code.full_size() {
            Some(fs) => fs,
            None => {
                let head = binary_head(buf, 4)?;
                4 + b64_to_int(&head[2..4])? as usize * 4
            }
        };
        let text = binary_to_text(buf, fs)?;
        let (matter, _) = Self::decode_text(&text)?;
        Ok((matter, fs * 3 / 4))
    }
}

impl fmt::Debug for Matter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matter({})", self.qb64())
    }
}

impl fmt::Display for Matter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qb64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sequence_number_vector() {
        let mut raw = [0u8; 16];
        raw[15] = 1;
        let m = Matter::new(MatterCode::Salt128, raw.to_vec()).unwrap();
        assert_eq!(m.qb64(), "0AAAAAAAAAAAAAAAAAAAAAAB");
    }

    #[test]
    fn test_short_number_vectors() {
        let zero = Matter::new(MatterCode::Short, vec![0, 0]).unwrap();
        assert_eq!(zero.qb64(), "MAAA");
        let one = Matter::new(MatterCode::Short, vec![0, 1]).unwrap();
        assert_eq!(one.qb64(), "MAAB");
    }

    #[test]
    fn test_declared_length_vectors() {
        let three = Matter::new(MatterCode::Bytes, b"abc".to_vec()).unwrap();
        assert_eq!(three.qb64(), "4BABYWJj");
        let two = Matter::new(MatterCode::Bytes, b"ab".to_vec()).unwrap();
        assert_eq!(two.qb64(), "5BABAGFi");

        let (decoded, used) = Matter::decode(b"5BABAGFi-rest", Domain::Text).unwrap();
        assert_eq!(used, 8);
        assert_eq!(decoded.raw(), b"ab");
    }

    #[test]
    fn test_decode_consumes_only_its_length() {
        let key = Matter::new(MatterCode::Ed25519, vec![7u8; 32]).unwrap();
        let mut buf = key.qb64().into_bytes();
        buf.extend_from_slice(b"-AAB");
        let (decoded, used) = Matter::decode(&buf, Domain::Text).unwrap();
        assert_eq!(used, 44);
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_unknown_code() {
        assert!(matches!(
            Matter::decode(b"#AAA", Domain::Text),
            Err(CodecError::UnknownCode(_))
        ));
        assert!(matches!(
            Matter::decode(b"0ZAAAAAAAAAAAAAAAAAAAAAA", Domain::Text),
            Err(CodecError::UnknownCode(_))
        ));
    }

    #[test]
    fn test_short_buffer() {
        let key = Matter::new(MatterCode::Blake3_256, vec![1u8; 32]).unwrap();
        let text = key.qb64();
        assert_eq!(
            Matter::decode(&text.as_bytes()[..20], Domain::Text),
            Err(CodecError::Shortage { needed: 44 })
        );
        let bin = key.qb2();
        assert_eq!(
            Matter::decode(&bin[..10], Domain::Binary),
            Err(CodecError::Shortage { needed: 33 })
        );
    }

    #[test]
    fn test_nonzero_pad_rejected() {
        let mut text = String::from("BQ");
        text.push_str(&"A".repeat(42));
        assert!(matches!(
            Matter::decode(text.as_bytes(), Domain::Text),
            Err(CodecError::NonZeroPad(_))
        ));
    }

    #[test]
    fn test_raw_size_checked() {
        assert!(matches!(
            Matter::new(MatterCode::Ed25519, vec![0u8; 31]),
            Err(CodecError::RawSize { expected: 32, got: 31, .. })
        ));
    }

    #[test]
    fn test_from_qb64_rejects_trailing() {
        let key = Matter::new(MatterCode::Ed25519N, vec![3u8; 32]).unwrap();
        let mut text = key.qb64();
        assert_eq!(Matter::from_qb64(&text).unwrap(), key);
        text.push('A');
        assert!(Matter::from_qb64(&text).is_err());
    }

    #[test]
    fn test_b64_int_helpers() {
        assert_eq!(int_to_b64(1, 2).unwrap(), "AB");
        assert_eq!(int_to_b64(64, 2).unwrap(), "BA");
        assert_eq!(b64_to_int(b"BA").unwrap(), 64);
        assert!(int_to_b64(4096, 2).is_err());
    }

    fn fixed_code() -> impl Strategy<Value = MatterCode> {
        prop_oneof![
            Just(MatterCode::Ed25519Seed),
            Just(MatterCode::Ed25519N),
            Just(MatterCode::Ed25519),
            Just(MatterCode::Blake3_256),
            Just(MatterCode::Sha2_256),
            Just(MatterCode::Short),
            Just(MatterCode::Salt128),
            Just(MatterCode::Ed25519Sig),
            Just(MatterCode::Long),
            Just(MatterCode::DateTime),
        ]
    }

    fn any_matter() -> impl Strategy<Value = Matter> {
        let fixed = fixed_code().prop_flat_map(|code| {
            let size = code.raw_size().unwrap_or(0);
            prop::collection::vec(any::<u8>(), size)
                .prop_map(move |raw| Matter::new(code, raw).unwrap())
        });
        let variable = prop::collection::vec(any::<u8>(), 0..200)
            .prop_map(|raw| Matter::new(MatterCode::Bytes, raw).unwrap());
        prop_oneof![4 => fixed, 1 => variable]
    }

    proptest! {
        #[test]
        fn prop_roundtrip_both_domains(m in any_matter()) {
            let text = m.encode(Domain::Text);
            let (back, used) = Matter::decode(&text, Domain::Text).unwrap();
            prop_assert_eq!(&back, &m);
            prop_assert_eq!(used, text.len());

            let bin = m.encode(Domain::Binary);
            prop_assert_eq!(bin.len() * 4, text.len() * 3);
            let (back, used) = Matter::decode(&bin, Domain::Binary).unwrap();
            prop_assert_eq!(&back, &m);
            prop_assert_eq!(used, bin.len());
        }
    }
}
