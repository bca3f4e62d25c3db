//! Verified state records.
//!
//! These are the values the store persists: they are only ever built from
//! events and credentials that passed verification.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::Matter;
use crate::crypto::Ed25519Signature;
use crate::error::CodecError;
use crate::event::{EventSeal, Ilk};
use crate::tholder::Tholder;
use crate::types::{Prefix, Said, Verfer};

/// `(sn, said)` of an identifier's latest establishment event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastEstablishment {
    pub sn: u64,
    pub said: Said,
}

/// Current key state of one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyState {
    pub prefix: Prefix,
    pub sn: u64,
    /// SAID of the latest accepted event.
    pub said: Said,
    pub last_establishment: LastEstablishment,
    pub keys: Vec<Verfer>,
    pub signing_threshold: Tholder,
    pub next_digests: Vec<Said>,
    pub next_threshold: Tholder,
    pub witnesses: Vec<Prefix>,
    pub witness_threshold: u64,
    pub config: Vec<String>,
}

impl KeyState {
    /// Establishment-only identifiers accept no interaction events.
    pub fn establishment_only(&self) -> bool {
        self.config.iter().any(|c| c == "EO")
    }

    /// An identifier with no next keys can never rotate or interact.
    pub fn is_transferable(&self) -> bool {
        self.prefix.is_transferable() && !self.next_digests.is_empty()
    }
}

/// An accepted key event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEventRecord {
    pub prefix: Prefix,
    pub sn: u64,
    pub said: Said,
    pub ilk: Ilk,
    /// The body bytes the controller signed.
    pub raw: Bytes,
    /// Event seals anchored in `a`.
    pub seals: Vec<EventSeal>,
}

impl KeyEventRecord {
    /// Whether this event anchors the given seal.
    pub fn anchors(&self, seal: &EventSeal) -> bool {
        self.seals.contains(seal)
    }
}

/// A receipt signature from a non-transferable receiptor.
///
/// Serialized as a pair of qb64 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "(Prefix, String)", try_from = "(Prefix, String)")]
pub struct ReceiptCouple {
    pub witness: Prefix,
    pub signature: Ed25519Signature,
}

impl From<ReceiptCouple> for (Prefix, String) {
    fn from(couple: ReceiptCouple) -> Self {
        (couple.witness, couple.signature.to_matter().qb64())
    }
}

impl TryFrom<(Prefix, String)> for ReceiptCouple {
    type Error = CodecError;

    fn try_from((witness, text): (Prefix, String)) -> Result<Self, Self::Error> {
        let matter = Matter::from_qb64(&text)?;
        let signature =
            Ed25519Signature::from_matter(&matter).ok_or_else(|| CodecError::UnexpectedCode {
                expected: "signature",
                got: matter.code().hard().to_string(),
            })?;
        Ok(Self { witness, signature })
    }
}

impl ReceiptCouple {
    /// Verify against the receipted event's body.
    pub fn verify(&self, raw: &[u8]) -> bool {
        self.witness
            .verfer()
            .is_some_and(|v| v.verify(raw, &self.signature).is_ok())
    }
}

/// State of one credential registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    pub registry: Said,
    pub issuer: Prefix,
    pub sn: u64,
    pub said: Said,
    pub backers: Vec<Prefix>,
    pub backer_threshold: u64,
    pub no_backers: bool,
}

/// Issuance status of one credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub credential: Said,
    pub registry: Said,
    /// SAID of the issuance event.
    pub issuance: Said,
    pub sn: u64,
    /// SAID of the latest status event.
    pub said: Said,
    pub issued_at: Option<String>,
    pub revoked_at: Option<String>,
}

impl CredentialStatus {
    pub fn is_revoked(&self) -> bool {
        self.sn > 0
    }
}

/// An accepted registry or status event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelEventRecord {
    /// Registry id or credential SAID.
    pub id: Said,
    pub sn: u64,
    pub said: Said,
    pub ilk: Ilk,
    pub registry: Said,
    pub raw: Bytes,
}

/// A credential that passed every check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedCredential {
    pub said: Said,
    pub issuer: Prefix,
    pub recipient: Option<Prefix>,
    pub schema: Said,
    pub registry: Option<Said>,
    /// The credential body as JSON text, fields in their original order.
    pub content: String,
    /// The credential group as received.
    pub raw: Bytes,
    pub verified_at: String,
}

impl VerifiedCredential {
    pub fn content_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_receipt_couple_serde() {
        let keypair = Keypair::from_seed(&[5; 32]);
        let couple = ReceiptCouple {
            witness: keypair.non_transferable_prefix(),
            signature: keypair.sign(b"event"),
        };
        assert!(couple.verify(b"event"));
        assert!(!couple.verify(b"other"));

        let mut buf = Vec::new();
        ciborium::into_writer(&couple, &mut buf).unwrap();
        let back: ReceiptCouple = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, couple);
    }

    #[test]
    fn test_key_state_traits() {
        let keypair = Keypair::from_seed(&[6; 32]);
        let said = crate::types::Said::compute(crate::crypto::DigestCode::Blake3_256, b"x");
        let state = KeyState {
            prefix: said.as_prefix(),
            sn: 0,
            said: said.clone(),
            last_establishment: LastEstablishment {
                sn: 0,
                said: said.clone(),
            },
            keys: vec![keypair.verfer()],
            signing_threshold: Tholder::Unweighted(1),
            next_digests: vec![said],
            next_threshold: Tholder::Unweighted(1),
            witnesses: vec![],
            witness_threshold: 0,
            config: vec!["EO".into()],
        };
        assert!(state.establishment_only());
        assert!(state.is_transferable());

        let mut buf = Vec::new();
        ciborium::into_writer(&state, &mut buf).unwrap();
        let back: KeyState = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, state);
    }
}
