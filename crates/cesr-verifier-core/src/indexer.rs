//! Indexed signatures.
//!
//! An indexed signature carries the position of the signing key in the
//! signer's key list, so a verifier can pair signatures with keys without
//! attaching the keys themselves.

use std::fmt;

use crate::codec::{
    ascii, b64_digits, b64_to_int, binary_head, binary_to_text, decode_padded, encode_padded,
    text_to_binary, Domain, B64_ALPHABET,
};
use crate::crypto::Ed25519Signature;
use crate::error::CodecError;

/// Indexed signature codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexCode {
    /// Index valid in both current and prior next lists. One char index.
    Ed25519Sig,
    /// Index valid in the current list only. One char index.
    Ed25519CrtSig,
    /// Two char index and two char other-index.
    Ed25519BigSig,
    /// Two char index, current list only.
    Ed25519BigCrtSig,
}

impl IndexCode {
    pub const fn hard(self) -> &'static str {
        match self {
            IndexCode::Ed25519Sig => "A",
            IndexCode::Ed25519CrtSig => "B",
            IndexCode::Ed25519BigSig => "2A",
            IndexCode::Ed25519BigCrtSig => "2B",
        }
    }

    const fn soft_size(self) -> usize {
        match self {
            IndexCode::Ed25519Sig | IndexCode::Ed25519CrtSig => 1,
            IndexCode::Ed25519BigSig | IndexCode::Ed25519BigCrtSig => 4,
        }
    }

    const fn full_size(self) -> usize {
        match self {
            IndexCode::Ed25519Sig | IndexCode::Ed25519CrtSig => 88,
            IndexCode::Ed25519BigSig | IndexCode::Ed25519BigCrtSig => 92,
        }
    }

    fn from_hard(hard: &str) -> Option<Self> {
        match hard {
            "A" => Some(IndexCode::Ed25519Sig),
            "B" => Some(IndexCode::Ed25519CrtSig),
            "2A" => Some(IndexCode::Ed25519BigSig),
            "2B" => Some(IndexCode::Ed25519BigCrtSig),
            _ => None,
        }
    }
}

fn hard_size(first: u8) -> Option<usize> {
    match first {
        b'A' | b'B' => Some(1),
        b'2' => Some(2),
        _ => None,
    }
}

/// An Ed25519 signature tagged with its key index.
#[derive(Clone, PartialEq, Eq)]
pub struct Siger {
    code: IndexCode,
    index: u32,
    ondex: Option<u32>,
    signature: Ed25519Signature,
}

impl Siger {
    /// Signature by the key at `index`, valid against both lists at the
    /// same position.
    pub fn new(index: u32, signature: Ed25519Signature) -> Self {
        let code = if index < 64 {
            IndexCode::Ed25519Sig
        } else {
            IndexCode::Ed25519BigSig
        };
        Self {
            code,
            index,
            ondex: Some(index),
            signature,
        }
    }

    /// Signature by the key at `index` that makes no claim on the prior
    /// next list.
    pub fn current_only(index: u32, signature: Ed25519Signature) -> Self {
        let code = if index < 64 {
            IndexCode::Ed25519CrtSig
        } else {
            IndexCode::Ed25519BigCrtSig
        };
        Self {
            code,
            index,
            ondex: None,
            signature,
        }
    }

    pub fn code(&self) -> IndexCode {
        self.code
    }

    /// Position of the signing key in the current key list.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Position in the prior next-key list, when claimed.
    pub fn ondex(&self) -> Option<usize> {
        self.ondex.map(|o| o as usize)
    }

    pub fn signature(&self) -> &Ed25519Signature {
        &self.signature
    }

    pub fn qb64(&self) -> String {
        let soft = match self.code {
            IndexCode::Ed25519Sig | IndexCode::Ed25519CrtSig => b64_digits(u64::from(self.index), 1),
            IndexCode::Ed25519BigSig => format!(
                "{}{}",
                b64_digits(u64::from(self.index), 2),
                b64_digits(u64::from(self.ondex.unwrap_or(self.index)), 2)
            ),
            IndexCode::Ed25519BigCrtSig => format!("{}AA", b64_digits(u64::from(self.index), 2)),
        };
        format!("{}{}{}", self.code.hard(), soft, encode_padded(self.signature.as_bytes(), 2))
    }

    pub fn qb2(&self) -> Vec<u8> {
        text_to_binary(self.qb64().as_bytes())
    }

    pub fn encode(&self, domain: Domain) -> Vec<u8> {
        match domain {
            Domain::Text => self.qb64().into_bytes(),
            Domain::Binary => self.qb2(),
        }
    }

    /// Decode one indexed signature from the front of `buf`.
    pub fn decode(buf: &[u8], domain: Domain) -> Result<(Self, usize), CodecError> {
        match domain {
            Domain::Text => Self::decode_text(buf),
            Domain::Binary => {
                let first = *buf.first().ok_or(CodecError::Shortage { needed: 1 })?;
                let lead = B64_ALPHABET[(first >> 2) as usize];
                let hs = hard_size(lead).ok_or_else(|| CodecError::UnknownCode(ascii(&[lead])))?;
                let hard = ascii(&binary_head(buf, hs)?);
                let code = IndexCode::from_hard(&hard).ok_or(CodecError::UnknownCode(hard))?;
                let text = binary_to_text(buf, code.full_size())?;
                let (siger, _) = Self::decode_text(&text)?;
                Ok((siger, code.full_size() * 3 / 4))
            }
        }
    }

    fn decode_text(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        let first = *buf.first().ok_or(CodecError::Shortage { needed: 1 })?;
        let hs = hard_size(first).ok_or_else(|| CodecError::UnknownCode(ascii(&[first])))?;
        if buf.len() < hs {
            return Err(CodecError::Shortage { needed: hs });
        }
        let hard = ascii(&buf[..hs]);
        let code = IndexCode::from_hard(&hard).ok_or_else(|| CodecError::UnknownCode(hard.clone()))?;
        let fs = code.full_size();
        if buf.len() < fs {
            return Err(CodecError::Shortage { needed: fs });
        }
        let cs = hs + code.soft_size();
        let soft = &buf[hs..cs];
        let (index, ondex) = match code {
            IndexCode::Ed25519Sig => {
                let i = b64_to_int(soft)? as u32;
                (i, Some(i))
            }
            IndexCode::Ed25519CrtSig => (b64_to_int(soft)? as u32, None),
            IndexCode::Ed25519BigSig => (
                b64_to_int(&soft[..2])? as u32,
                Some(b64_to_int(&soft[2..])? as u32),
            ),
            IndexCode::Ed25519BigCrtSig => (b64_to_int(&soft[..2])? as u32, None),
        };
        let raw = decode_padded(&buf[cs..fs], cs % 4, &hard)?;
        let bytes: [u8; 64] = raw.as_slice().try_into().map_err(|_| CodecError::RawSize {
            code: hard.clone(),
            expected: 64,
            got: raw.len(),
        })?;
        Ok((
            Self {
                code,
                index,
                ondex,
                signature: Ed25519Signature::from_bytes(bytes),
            },
            fs,
        ))
    }
}

impl fmt::Debug for Siger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Siger({}, {:?})", self.index, self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(byte: u8) -> Ed25519Signature {
        Ed25519Signature::from_bytes([byte; 64])
    }

    #[test]
    fn test_small_index_layout() {
        let siger = Siger::new(0, sig(0));
        let text = siger.qb64();
        assert_eq!(text.len(), 88);
        assert!(text.starts_with("AA"));

        let siger = Siger::current_only(2, sig(9));
        assert!(siger.qb64().starts_with("BC"));
    }

    #[test]
    fn test_text_and_binary_roundtrip() {
        for siger in [
            Siger::new(3, sig(0xab)),
            Siger::current_only(5, sig(0x01)),
            Siger::new(100, sig(0x7f)),
            Siger::current_only(70, sig(0xff)),
        ] {
            let text = siger.encode(Domain::Text);
            let (back, used) = Siger::decode(&text, Domain::Text).unwrap();
            assert_eq!(back, siger);
            assert_eq!(used, text.len());

            let bin = siger.encode(Domain::Binary);
            let (back, used) = Siger::decode(&bin, Domain::Binary).unwrap();
            assert_eq!(back, siger);
            assert_eq!(used, bin.len());
        }
    }

    #[test]
    fn test_big_index_keeps_ondex() {
        let siger = Siger::new(65, sig(2));
        assert_eq!(siger.code(), IndexCode::Ed25519BigSig);
        let (back, _) = Siger::decode(siger.qb64().as_bytes(), Domain::Text).unwrap();
        assert_eq!(back.index(), 65);
        assert_eq!(back.ondex(), Some(65));
    }

    #[test]
    fn test_truncated_signature() {
        let text = Siger::new(0, sig(1)).qb64();
        assert_eq!(
            Siger::decode(&text.as_bytes()[..50], Domain::Text),
            Err(CodecError::Shortage { needed: 88 })
        );
    }
}
