//! Self-addressing identifiers.
//!
//! A SAID is the digest of a body serialized with every SAID field
//! replaced by a placeholder of the same length. Deriving one embeds it;
//! verifying one recomputes it from the received fields.

use serde_json::Value;

use crate::crypto::DigestCode;
use crate::error::MessageError;
use crate::serder::{dumps, size_version, Kind, Sad};
use crate::types::Said;

/// Placeholder character written into SAID fields before digesting.
pub const PLACEHOLDER: char = '#';

/// Length of a 32-byte digest in qb64.
pub const SAID_LEN: usize = 44;

fn dummy() -> Value {
    Value::String(PLACEHOLDER.to_string().repeat(SAID_LEN))
}

/// Derive a SAID over `sad` and embed it under each of `labels`.
///
/// If the map carries a version string its size is updated first.
pub fn saidify(
    sad: &mut Sad,
    kind: Kind,
    labels: &[&str],
    code: DigestCode,
) -> Result<Said, MessageError> {
    for label in labels {
        sad.insert((*label).to_string(), dummy());
    }
    if sad.contains_key("v") {
        size_version(sad, kind)?;
    }
    let raw = dumps(sad, kind)?;
    let said = Said::compute(code, &raw);
    for label in labels {
        sad.insert((*label).to_string(), Value::String(said.qb64()));
    }
    Ok(said)
}

/// Check the SAID embedded under `labels`, all of which must agree.
///
/// The first label is authoritative; its digest code selects the algorithm.
pub fn verify_said(sad: &Sad, kind: Kind, labels: &[&str]) -> Result<Said, MessageError> {
    let Some((primary, rest)) = labels.split_first() else {
        return Err(MessageError::MissingField("d".into()));
    };
    let embedded = sad
        .get(*primary)
        .and_then(Value::as_str)
        .ok_or_else(|| MessageError::MissingField((*primary).to_string()))?;
    let said = Said::parse(embedded).map_err(|e| MessageError::invalid(primary, e.to_string()))?;

    for label in rest {
        let other = sad
            .get(*label)
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::MissingField((*label).to_string()))?;
        if other != embedded {
            return Err(MessageError::SaidMismatch {
                label: (*label).to_string(),
                embedded: other.to_string(),
                computed: embedded.to_string(),
            });
        }
    }

    let mut copy = sad.clone();
    for label in labels {
        copy.insert((*label).to_string(), dummy());
    }
    let raw = dumps(&copy, kind)?;
    let computed = Said::compute(said.digest_code(), &raw);
    if computed != said {
        return Err(MessageError::SaidMismatch {
            label: (*primary).to_string(),
            embedded: embedded.to_string(),
            computed: computed.qb64(),
        });
    }
    Ok(said)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serder::{Protocol, Version};
    use serde_json::json;

    fn credential_like() -> Sad {
        let mut sad = Sad::new();
        sad.insert(
            "v".into(),
            Value::String(Version::new(Protocol::Acdc, Kind::Json).to_string()),
        );
        sad.insert("d".into(), json!(""));
        sad.insert("i".into(), json!("EIssuer"));
        sad.insert("a".into(), json!({"name": "alice"}));
        sad
    }

    #[test]
    fn test_saidify_then_verify() {
        let mut sad = credential_like();
        let said = saidify(&mut sad, Kind::Json, &["d"], DigestCode::Blake3_256).unwrap();
        assert_eq!(sad["d"], Value::String(said.qb64()));
        assert_eq!(verify_said(&sad, Kind::Json, &["d"]).unwrap(), said);

        let version = Version::parse(sad["v"].as_str().unwrap().as_bytes()).unwrap();
        assert_eq!(version.size, dumps(&sad, Kind::Json).unwrap().len());
    }

    #[test]
    fn test_tampered_field_is_detected() {
        let mut sad = credential_like();
        saidify(&mut sad, Kind::Json, &["d"], DigestCode::Blake3_256).unwrap();
        sad.insert("a".into(), json!({"name": "mallory"}));
        assert!(matches!(
            verify_said(&sad, Kind::Json, &["d"]),
            Err(MessageError::SaidMismatch { .. })
        ));
    }

    #[test]
    fn test_dual_labels_must_agree() {
        let mut sad = credential_like();
        let said = saidify(&mut sad, Kind::Json, &["d", "i"], DigestCode::Sha2_256).unwrap();
        assert_eq!(sad["i"], Value::String(said.qb64()));
        assert_eq!(said.digest_code(), DigestCode::Sha2_256);
        assert!(verify_said(&sad, Kind::Json, &["d", "i"]).is_ok());

        sad.insert("i".into(), json!(format!("E{}", "A".repeat(43))));
        assert!(verify_said(&sad, Kind::Json, &["d", "i"]).is_err());
    }

    #[test]
    fn test_cbor_said() {
        let mut sad = Sad::new();
        sad.insert(
            "v".into(),
            Value::String(Version::new(Protocol::Keri, Kind::Cbor).to_string()),
        );
        sad.insert("d".into(), json!(""));
        let said = saidify(&mut sad, Kind::Cbor, &["d"], DigestCode::Blake3_256).unwrap();
        assert_eq!(verify_said(&sad, Kind::Cbor, &["d"]).unwrap(), said);
        assert!(verify_said(&sad, Kind::Json, &["d"]).is_err());
    }
}
