//! Count codes that frame attachment groups.

use std::fmt;

use crate::codec::{
    ascii, b64_digits, b64_to_int, binary_head, binary_to_text, text_to_binary, Domain,
};
use crate::error::CodecError;

/// Attachment group count codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterCode {
    /// Indexed signatures by the event's controller.
    ControllerIdxSigs,
    /// Indexed signatures by the event's witnesses.
    WitnessIdxSigs,
    /// `(prefix, signature)` couples from non-transferable receiptors.
    NonTransReceiptCouples,
    /// `(prefix, sn, digest, indexed signature)` from transferable receiptors.
    TransReceiptQuadruples,
    /// `(first seen ordinal, datetime)` couples.
    FirstSeenReplayCouples,
    /// `(prefix, sn, digest)` followed by a controller signature group.
    TransIdxSigGroups,
    /// `(sn, digest)` of the anchoring event.
    SealSourceCouples,
    /// `prefix` followed by a controller signature group.
    TransLastIdxSigGroups,
    /// `(prefix, sn, digest)` of the anchoring event.
    SealSourceTriples,
    /// Pipelined group framed by a quadlet count.
    AttachedMaterialQuadlets,
    BigAttachedMaterialQuadlets,
    /// Protocol stack version marker.
    ProtocolStack,
}

impl CounterCode {
    pub const fn hard(self) -> &'static str {
        match self {
            CounterCode::ControllerIdxSigs => "-A",
            CounterCode::WitnessIdxSigs => "-B",
            CounterCode::NonTransReceiptCouples => "-C",
            CounterCode::TransReceiptQuadruples => "-D",
            CounterCode::FirstSeenReplayCouples => "-E",
            CounterCode::TransIdxSigGroups => "-F",
            CounterCode::SealSourceCouples => "-G",
            CounterCode::TransLastIdxSigGroups => "-H",
            CounterCode::SealSourceTriples => "-I",
            CounterCode::AttachedMaterialQuadlets => "-V",
            CounterCode::BigAttachedMaterialQuadlets => "-0V",
            CounterCode::ProtocolStack => "-_AAA",
        }
    }

    const fn soft_size(self) -> usize {
        match self {
            CounterCode::BigAttachedMaterialQuadlets => 5,
            CounterCode::ProtocolStack => 3,
            _ => 2,
        }
    }

    const fn full_size(self) -> usize {
        match self {
            CounterCode::BigAttachedMaterialQuadlets | CounterCode::ProtocolStack => 8,
            _ => 4,
        }
    }

    fn from_hard(hard: &str) -> Option<Self> {
        let code = match hard {
            "-A" => CounterCode::ControllerIdxSigs,
            "-B" => CounterCode::WitnessIdxSigs,
            "-C" => CounterCode::NonTransReceiptCouples,
            "-D" => CounterCode::TransReceiptQuadruples,
            "-E" => CounterCode::FirstSeenReplayCouples,
            "-F" => CounterCode::TransIdxSigGroups,
            "-G" => CounterCode::SealSourceCouples,
            "-H" => CounterCode::TransLastIdxSigGroups,
            "-I" => CounterCode::SealSourceTriples,
            "-V" => CounterCode::AttachedMaterialQuadlets,
            "-0V" => CounterCode::BigAttachedMaterialQuadlets,
            "-_AAA" => CounterCode::ProtocolStack,
            _ => return None,
        };
        Some(code)
    }
}

fn hard_size(head: &[u8]) -> Result<usize, CodecError> {
    match head {
        [b'-', b'0'] => Ok(3),
        [b'-', b'_'] => Ok(5),
        [b'-', c] if c.is_ascii_alphabetic() => Ok(2),
        _ => Err(CodecError::UnknownCode(ascii(head))),
    }
}

/// A decoded count code.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    code: CounterCode,
    count: u64,
}

impl Counter {
    pub fn new(code: CounterCode, count: u64) -> Result<Self, CodecError> {
        let chars = code.soft_size();
        if count >> (6 * chars) != 0 {
            return Err(CodecError::SoftOverflow {
                value: count,
                chars,
            });
        }
        Ok(Self { code, count })
    }

    /// Attachment quadlet framing, choosing the big code when needed.
    pub fn quadlets(count: u64) -> Result<Self, CodecError> {
        if count < 64 * 64 {
            Self::new(CounterCode::AttachedMaterialQuadlets, count)
        } else {
            Self::new(CounterCode::BigAttachedMaterialQuadlets, count)
        }
    }

    pub fn code(&self) -> CounterCode {
        self.code
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn qb64(&self) -> String {
        format!(
            "{}{}",
            self.code.hard(),
            b64_digits(self.count, self.code.soft_size())
        )
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

    /// Decode one count code from the front of `buf`.
    pub fn decode(buf: &[u8], domain: Domain) -> Result<(Self, usize), CodecError> {
        match domain {
            Domain::Text => Self::decode_text(buf),
            Domain::Binary => {
                let head = binary_head(buf, 2)?;
                let hs = hard_size(&head)?;
                let hard = ascii(&binary_head(buf, hs)?);
                let code = CounterCode::from_hard(&hard).ok_or(CodecError::UnknownCode(hard))?;
                let text = binary_to_text(buf, code.full_size())?;
                let (counter, _) = Self::decode_text(&text)?;
                Ok((counter, code.full_size() * 3 / 4))
            }
        }
    }

    fn decode_text(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 2 {
            return Err(CodecError::Shortage { needed: 2 });
        }
        let hs = hard_size(&buf[..2])?;
        if buf.len() < hs {
            return Err(CodecError::Shortage { needed: hs });
        }
        let hard = ascii(&buf[..hs]);
        let code = CounterCode::from_hard(&hard).ok_or_else(|| CodecError::UnknownCode(hard))?;
        let fs = code.full_size();
        if buf.len() < fs {
            return Err(CodecError::Shortage { needed: fs });
        }
        let count = b64_to_int(&buf[hs..fs])?;
        Ok((Self { code, count }, fs))
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Counter({})", self.qb64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_sig_count_vector() {
        let counter = Counter::new(CounterCode::ControllerIdxSigs, 1).unwrap();
        assert_eq!(counter.qb64(), "-AAB");
        let (back, used) = Counter::decode(b"-AAB", Domain::Text).unwrap();
        assert_eq!(back, counter);
        assert_eq!(used, 4);
    }

    #[test]
    fn test_big_and_stack_codes() {
        let big = Counter::quadlets(5000).unwrap();
        assert_eq!(big.code(), CounterCode::BigAttachedMaterialQuadlets);
        assert_eq!(big.qb64().len(), 8);

        let (stack, used) = Counter::decode(b"-_AAABAA", Domain::Text).unwrap();
        assert_eq!(stack.code(), CounterCode::ProtocolStack);
        assert_eq!(used, 8);
    }

    #[test]
    fn test_binary_domain() {
        for counter in [
            Counter::new(CounterCode::SealSourceCouples, 1).unwrap(),
            Counter::quadlets(70_000).unwrap(),
        ] {
            let bin = counter.qb2();
            assert_eq!(bin[0] >> 5, 0b111);
            let (back, used) = Counter::decode(&bin, Domain::Binary).unwrap();
            assert_eq!(back, counter);
            assert_eq!(used, bin.len());
        }
    }

    #[test]
    fn test_rejects_unknown_and_short() {
        assert!(matches!(
            Counter::decode(b"-ZAB", Domain::Text),
            Err(CodecError::UnknownCode(_))
        ));
        assert!(matches!(
            Counter::decode(b"XXAB", Domain::Text),
            Err(CodecError::UnknownCode(_))
        ));
        assert_eq!(
            Counter::decode(b"-A", Domain::Text),
            Err(CodecError::Shortage { needed: 4 })
        );
    }

    #[test]
    fn test_count_overflow() {
        assert!(Counter::new(CounterCode::ControllerIdxSigs, 4096).is_err());
    }
}
