//! Stream demultiplexer.
//!
//! Splits a CESR byte stream into message groups: one framed body followed
//! by the attachment groups that trail it. Bodies frame themselves through
//! their version string; attachments frame themselves through count codes,
//! in either the text or the binary domain.
//!
//! [`parse`] is lazy. A structural failure is yielded once and ends the
//! iteration; groups yielded before it are unaffected.

use bytes::Bytes;
use std::iter::FusedIterator;

use crate::codec::{Domain, Matter};
use crate::counter::{Counter, CounterCode};
use crate::crypto::Ed25519Signature;
use crate::error::{CodecError, ParseError};
use crate::indexer::Siger;
use crate::serder::{Kind, Serder, Version, VersionSniff};
use crate::state::ReceiptCouple;
use crate::types::{Dater, Prefix, Said, Seqner};

/// What the first byte of a group says about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColdStart {
    Json,
    Cbor,
    TextCounter,
    BinaryCounter,
    Unknown,
}

/// Classify a byte by its top three bits.
pub fn sniff(byte: u8) -> ColdStart {
    match byte >> 5 {
        0b001 if byte == b'-' => ColdStart::TextCounter,
        0b011 if byte == b'{' => ColdStart::Json,
        0b101 => ColdStart::Cbor,
        0b111 => ColdStart::BinaryCounter,
        _ => ColdStart::Unknown,
    }
}

/// `(sn, said)` of the event that anchors this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSeal {
    pub sn: u64,
    pub said: Said,
}

/// `(prefix, sn, said)` of the event that anchors this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTriple {
    pub prefix: Prefix,
    pub sn: u64,
    pub said: Said,
}

/// A receipt from a transferable receiptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransReceipt {
    pub prefix: Prefix,
    pub sn: u64,
    pub said: Said,
    pub siger: Siger,
}

/// Signatures made under the key state established at `(prefix, sn, said)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransSigGroup {
    pub prefix: Prefix,
    pub sn: u64,
    pub said: Said,
    pub sigers: Vec<Siger>,
}

/// Signatures made under `prefix`'s latest establishment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastSigGroup {
    pub prefix: Prefix,
    pub sigers: Vec<Siger>,
}

/// Everything attached to one message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachments {
    pub controller_sigs: Vec<Siger>,
    pub witness_sigs: Vec<Siger>,
    pub receipt_couples: Vec<ReceiptCouple>,
    pub trans_receipts: Vec<TransReceipt>,
    pub first_seen: Vec<(Seqner, Dater)>,
    pub trans_sig_groups: Vec<TransSigGroup>,
    pub last_sig_groups: Vec<LastSigGroup>,
    pub source_seals: Vec<SourceSeal>,
    pub source_triples: Vec<SourceTriple>,
}

impl Attachments {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One message body with its attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    pub serder: Serder,
    pub attachments: Attachments,
    raw: Bytes,
    offset: usize,
}

impl MessageGroup {
    /// The exact bytes of the whole group, attachments included.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Where the group started in the parsed buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Lazily demultiplex `buf` into message groups.
pub fn parse(buf: &[u8]) -> Parser<'_> {
    Parser {
        buf,
        pos: 0,
        done: false,
    }
}

pub struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Parser<'a> {
    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn skip_stack_markers(&mut self) -> Result<(), ParseError> {
        while self.pos < self.buf.len() {
            let domain = match sniff(self.buf[self.pos]) {
                ColdStart::TextCounter => Domain::Text,
                ColdStart::BinaryCounter => Domain::Binary,
                _ => return Ok(()),
            };
            let rest = &self.buf[self.pos..];
            let (counter, used) = Counter::decode(rest, domain)
                .map_err(|e| ParseError::from_codec(e, self.pos, rest.len()))?;
            if counter.code() != CounterCode::ProtocolStack {
                return Err(ParseError::MalformedMessage {
                    offset: self.pos,
                    reason: format!("attachment group {} without a message", counter.code().hard()),
                });
            }
            self.pos += used;
        }
        Ok(())
    }

    fn read_body(&mut self) -> Result<Serder, ParseError> {
        let offset = self.pos;
        let rest = &self.buf[offset..];
        let expected = match sniff(rest[0]) {
            ColdStart::Json => Kind::Json,
            ColdStart::Cbor => Kind::Cbor,
            other => {
                return Err(ParseError::MalformedMessage {
                    offset,
                    reason: format!("expected a message body, found {other:?} start"),
                })
            }
        };
        let version = match Version::sniff(rest) {
            Ok(version) => version,
            Err(VersionSniff::Incomplete) => {
                return Err(ParseError::TruncatedStream {
                    offset,
                    needed: crate::serder::MAX_VERSION_OFFSET + crate::serder::VERSION_LEN
                        - rest.len(),
                })
            }
            Err(VersionSniff::NotFound) => {
                return Err(ParseError::MalformedMessage {
                    offset,
                    reason: "no version string".into(),
                })
            }
        };
        if version.kind != expected {
            return Err(ParseError::MalformedMessage {
                offset,
                reason: format!("body starts as {expected:?} but declares {:?}", version.kind),
            });
        }
        if rest.len() < version.size {
            return Err(ParseError::TruncatedStream {
                offset,
                needed: version.size - rest.len(),
            });
        }
        let serder = Serder::from_raw(&rest[..version.size], version).map_err(|e| {
            ParseError::MalformedMessage {
                offset,
                reason: e.to_string(),
            }
        })?;
        self.pos += version.size;
        Ok(serder)
    }

    fn read_attachments(&mut self) -> Result<Attachments, ParseError> {
        let mut attachments = Attachments::default();
        while self.pos < self.buf.len() {
            let domain = match sniff(self.buf[self.pos]) {
                ColdStart::TextCounter => Domain::Text,
                ColdStart::BinaryCounter => Domain::Binary,
                _ => break,
            };
            let mut cursor = Cursor {
                buf: self.buf,
                pos: self.pos,
                end: self.buf.len(),
                domain,
            };
            cursor.group(&mut attachments)?;
            self.pos = cursor.pos;
        }
        Ok(attachments)
    }

    fn read_group(&mut self) -> Result<Option<MessageGroup>, ParseError> {
        self.skip_stack_markers()?;
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let start = self.pos;
        let serder = self.read_body()?;
        let attachments = self.read_attachments()?;
        Ok(Some(MessageGroup {
            serder,
            attachments,
            raw: Bytes::copy_from_slice(&self.buf[start..self.pos]),
            offset: start,
        }))
    }
}

impl<'a> Iterator for Parser<'a> {
    type Item = Result<MessageGroup, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_group() {
            Ok(Some(group)) => Some(Ok(group)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for Parser<'_> {}

/// Reads primitives from a bounded window of the stream.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
    domain: Domain,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..self.end]
    }

    fn lift(&self, err: CodecError) -> ParseError {
        ParseError::from_codec(err, self.pos, self.end - self.pos)
    }

    fn counter(&mut self) -> Result<Counter, ParseError> {
        let (counter, used) = Counter::decode(self.rest(), self.domain).map_err(|e| self.lift(e))?;
        self.pos += used;
        Ok(counter)
    }

    fn matter(&mut self) -> Result<Matter, ParseError> {
        let (matter, used) = Matter::decode(self.rest(), self.domain).map_err(|e| self.lift(e))?;
        self.pos += used;
        Ok(matter)
    }

    /// Read a primitive and convert it, reporting conversion failures at
    /// the primitive's offset.
    fn typed<T>(
        &mut self,
        convert: impl FnOnce(Matter) -> Result<T, CodecError>,
    ) -> Result<T, ParseError> {
        let offset = self.pos;
        let matter = self.matter()?;
        convert(matter).map_err(|e| ParseError::MalformedPrimitive {
            offset,
            reason: e.to_string(),
        })
    }

    fn prefix(&mut self) -> Result<Prefix, ParseError> {
        self.typed(Prefix::from_matter)
    }

    fn said(&mut self) -> Result<Said, ParseError> {
        self.typed(Said::from_matter)
    }

    fn seqner(&mut self) -> Result<Seqner, ParseError> {
        self.typed(|m| Seqner::from_matter(&m))
    }

    fn dater(&mut self) -> Result<Dater, ParseError> {
        self.typed(|m| Dater::from_matter(&m))
    }

    fn signature(&mut self) -> Result<Ed25519Signature, ParseError> {
        self.typed(|m| {
            Ed25519Signature::from_matter(&m).ok_or_else(|| CodecError::UnexpectedCode {
                expected: "signature",
                got: m.code().hard().to_string(),
            })
        })
    }

    fn siger(&mut self) -> Result<Siger, ParseError> {
        let (siger, used) = Siger::decode(self.rest(), self.domain).map_err(|e| self.lift(e))?;
        self.pos += used;
        Ok(siger)
    }

    fn sigers(&mut self, count: u64) -> Result<Vec<Siger>, ParseError> {
        (0..count).map(|_| self.siger()).collect()
    }

    /// Controller signature group nested in `-F` and `-H`.
    fn nested_sigers(&mut self) -> Result<Vec<Siger>, ParseError> {
        let offset = self.pos;
        let counter = self.counter()?;
        if counter.code() != CounterCode::ControllerIdxSigs {
            return Err(ParseError::MalformedPrimitive {
                offset,
                reason: format!("expected -A signatures, found {}", counter.code().hard()),
            });
        }
        self.sigers(counter.count())
    }

    /// Read one counted attachment group into `att`.
    fn group(&mut self, att: &mut Attachments) -> Result<(), ParseError> {
        let counter = self.counter()?;
        let count = counter.count();
        match counter.code() {
            CounterCode::ControllerIdxSigs => att.controller_sigs.extend(self.sigers(count)?),
            CounterCode::WitnessIdxSigs => att.witness_sigs.extend(self.sigers(count)?),
            CounterCode::NonTransReceiptCouples => {
                for _ in 0..count {
                    let witness = self.prefix()?;
                    let signature = self.signature()?;
                    att.receipt_couples.push(ReceiptCouple { witness, signature });
                }
            }
            CounterCode::TransReceiptQuadruples => {
                for _ in 0..count {
                    let prefix = self.prefix()?;
                    let sn = self.seqner()?.0;
                    let said = self.said()?;
                    let siger = self.siger()?;
                    att.trans_receipts.push(TransReceipt {
                        prefix,
                        sn,
                        said,
                        siger,
                    });
                }
            }
            CounterCode::FirstSeenReplayCouples => {
                for _ in 0..count {
                    let fn_ = self.seqner()?;
                    let dater = self.dater()?;
                    att.first_seen.push((fn_, dater));
                }
            }
            CounterCode::TransIdxSigGroups => {
                for _ in 0..count {
                    let prefix = self.prefix()?;
                    let sn = self.seqner()?.0;
                    let said = self.said()?;
                    let sigers = self.nested_sigers()?;
                    att.trans_sig_groups.push(TransSigGroup {
                        prefix,
                        sn,
                        said,
                        sigers,
                    });
                }
            }
            CounterCode::SealSourceCouples => {
                for _ in 0..count {
                    let sn = self.seqner()?.0;
                    let said = self.said()?;
                    att.source_seals.push(SourceSeal { sn, said });
                }
            }
            CounterCode::TransLastIdxSigGroups => {
                for _ in 0..count {
                    let prefix = self.prefix()?;
                    let sigers = self.nested_sigers()?;
                    att.last_sig_groups.push(LastSigGroup { prefix, sigers });
                }
            }
            CounterCode::SealSourceTriples => {
                for _ in 0..count {
                    let prefix = self.prefix()?;
                    let sn = self.seqner()?.0;
                    let said = self.said()?;
                    att.source_triples.push(SourceTriple { prefix, sn, said });
                }
            }
            CounterCode::AttachedMaterialQuadlets | CounterCode::BigAttachedMaterialQuadlets => {
                let unit = match self.domain {
                    Domain::Text => 4,
                    Domain::Binary => 3,
                };
                let size = usize::try_from(count).unwrap_or(usize::MAX).saturating_mul(unit);
                let end = self.pos.saturating_add(size);
                if end > self.end {
                    return Err(ParseError::TruncatedStream {
                        offset: self.pos,
                        needed: end - self.end,
                    });
                }
                let mut inner = Cursor {
                    buf: self.buf,
                    pos: self.pos,
                    end,
                    domain: self.domain,
                };
                while inner.pos < end {
                    inner.group(att)?;
                }
                self.pos = end;
            }
            CounterCode::ProtocolStack => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DigestCode, Keypair};
    use crate::said::saidify;
    use crate::serder::{size_version, Protocol, Sad};
    use serde_json::json;

    fn body(kind: Kind) -> Serder {
        let mut sad = Sad::new();
        sad.insert("v".into(), json!(Version::new(Protocol::Keri, kind).to_string()));
        sad.insert("t".into(), json!("rct"));
        sad.insert("d".into(), json!(""));
        sad.insert("i".into(), json!(Said::compute(DigestCode::Blake3_256, b"i").qb64()));
        sad.insert("s".into(), json!("0"));
        saidify(&mut sad, kind, &["d"], DigestCode::Blake3_256).unwrap();
        size_version(&mut sad, kind).unwrap();
        Serder::from_sad(sad).unwrap()
    }

    fn signed(serder: &Serder, domain: Domain) -> Vec<u8> {
        let keypair = Keypair::from_seed(&[3; 32]);
        let siger = Siger::new(0, keypair.sign(serder.raw()));
        let mut out = serder.raw().to_vec();
        out.extend(Counter::new(CounterCode::ControllerIdxSigs, 1).unwrap().encode(domain));
        out.extend(siger.encode(domain));
        out
    }

    #[test]
    fn test_sniff_tritets() {
        assert_eq!(sniff(b'{'), ColdStart::Json);
        assert_eq!(sniff(b'-'), ColdStart::TextCounter);
        assert_eq!(sniff(0xa5), ColdStart::Cbor);
        assert_eq!(sniff(0xf8), ColdStart::BinaryCounter);
        assert_eq!(sniff(b'x'), ColdStart::Unknown);
    }

    #[test]
    fn test_two_groups_text_and_binary() {
        let first = body(Kind::Json);
        let second = body(Kind::Cbor);
        let mut stream = signed(&first, Domain::Text);
        stream.extend(signed(&second, Domain::Binary));

        let groups: Vec<_> = parse(&stream).collect::<Result<_, _>>().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].serder, first);
        assert_eq!(groups[0].attachments.controller_sigs.len(), 1);
        assert_eq!(groups[1].serder.kind(), Kind::Cbor);
        assert_eq!(groups[1].attachments.controller_sigs.len(), 1);
        assert_eq!(groups[1].offset(), groups[0].raw().len());
        assert_eq!(
            groups[0].raw().len() + groups[1].raw().len(),
            stream.len()
        );
    }

    #[test]
    fn test_pipelined_group() {
        let serder = body(Kind::Json);
        let keypair = Keypair::from_seed(&[4; 32]);
        let mut inner = Counter::new(CounterCode::ControllerIdxSigs, 1).unwrap().qb64();
        inner.push_str(&Siger::new(0, keypair.sign(serder.raw())).qb64());
        inner.push_str(&Counter::new(CounterCode::SealSourceCouples, 1).unwrap().qb64());
        inner.push_str(&Seqner(2).qb64());
        inner.push_str(&Said::compute(DigestCode::Blake3_256, b"anchor").qb64());

        let mut stream = serder.raw().to_vec();
        stream.extend(Counter::quadlets((inner.len() / 4) as u64).unwrap().qb64().bytes());
        stream.extend(inner.bytes());

        let group = parse(&stream).next().unwrap().unwrap();
        assert_eq!(group.attachments.controller_sigs.len(), 1);
        assert_eq!(group.attachments.source_seals, vec![SourceSeal {
            sn: 2,
            said: Said::compute(DigestCode::Blake3_256, b"anchor"),
        }]);
    }

    #[test]
    fn test_protocol_stack_marker_skipped() {
        let serder = body(Kind::Json);
        let mut stream = b"-_AAABAA".to_vec();
        stream.extend(signed(&serder, Domain::Text));
        let groups: Vec<_> = parse(&stream).collect::<Result<_, _>>().unwrap();
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_truncated_attachment_stops_iteration() {
        let serder = body(Kind::Json);
        let good = signed(&serder, Domain::Text);
        let mut stream = good.clone();
        stream.extend(&good[..good.len() - 10]);

        let mut parser = parse(&stream);
        assert!(parser.next().unwrap().is_ok());
        match parser.next() {
            Some(Err(ParseError::TruncatedStream { offset, .. })) => assert!(offset >= good.len()),
            other => panic!("expected truncation, got {other:?}"),
        }
        assert!(parser.next().is_none());
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_truncated_body() {
        let serder = body(Kind::Json);
        let raw = serder.raw();
        let err = parse(&raw[..raw.len() - 5]).next().unwrap().unwrap_err();
        assert_eq!(err, ParseError::TruncatedStream { offset: 0, needed: 5 });
    }

    #[test]
    fn test_garbage_start_is_malformed() {
        let err = parse(b"hello world").next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::MalformedMessage { offset: 0, .. }));

        let err = parse(b"-AAB").next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::MalformedMessage { .. }));
    }

    #[test]
    fn test_bad_attachment_code_is_malformed_primitive() {
        let serder = body(Kind::Json);
        let mut stream = serder.raw().to_vec();
        stream.extend(b"-ZAB");
        let err = parse(&stream).next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::MalformedPrimitive { .. }));
        assert_eq!(err.offset(), serder.raw().len());
    }

    #[test]
    fn test_empty_input() {
        assert!(parse(b"").next().is_none());
    }
}
