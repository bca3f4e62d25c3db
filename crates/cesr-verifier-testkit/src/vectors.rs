//! Golden test vectors for deterministic verification.
//!
//! These vectors pin the wire form of primitives, counters, signatures and
//! SAIDs so that any change to the codec shows up as a failing test rather
//! than as a silent interop break.

use cesr_verifier_core::{
    saidify, Counter, CounterCode, DigestCode, Domain, Keypair, Kind, Matter, MatterCode, Sad,
    Said, Seqner,
};

/// A golden primitive: raw bytes and their expected text and binary forms.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub code: MatterCode,
    pub raw: Vec<u8>,
    /// Expected qualified Base64 form.
    pub expected_qb64: &'static str,
}

/// A golden count code.
#[derive(Debug, Clone)]
pub struct CounterVector {
    pub name: &'static str,
    pub code: CounterCode,
    pub count: u64,
    pub expected_qb64: &'static str,
    /// Expected qualified binary form (hex).
    pub expected_qb2: &'static str,
}

/// Get all golden primitive vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "Blake3 digest over counting bytes",
            code: MatterCode::Blake3_256,
            raw: (0u8..32).collect(),
            expected_qb64: "EAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f",
        },
        GoldenVector {
            name: "Non-transferable prefix of all ones",
            code: MatterCode::Ed25519N,
            raw: vec![0xff; 32],
            expected_qb64: "BP__________________________________________",
        },
        GoldenVector {
            name: "Sequence number five",
            code: MatterCode::Salt128,
            raw: 5u128.to_be_bytes().to_vec(),
            expected_qb64: "0AAAAAAAAAAAAAAAAAAAAAAF",
        },
        GoldenVector {
            name: "Short number one",
            code: MatterCode::Short,
            raw: vec![0x00, 0x01],
            expected_qb64: "MAAB",
        },
        GoldenVector {
            name: "Long number 0x10000",
            code: MatterCode::Long,
            raw: vec![0x00, 0x01, 0x00, 0x00],
            expected_qb64: "0HAAAQAA",
        },
    ]
}

/// Get all golden counter vectors.
pub fn counter_vectors() -> Vec<CounterVector> {
    vec![
        CounterVector {
            name: "One controller signature",
            code: CounterCode::ControllerIdxSigs,
            count: 1,
            expected_qb64: "-AAB",
            expected_qb2: "f80001",
        },
        CounterVector {
            name: "Attachment group of 45 quadlets",
            code: CounterCode::AttachedMaterialQuadlets,
            count: 45,
            expected_qb64: "-VAt",
            expected_qb2: "f9502d",
        },
    ]
}

/// Seed used by the signing vector.
pub const SIGNING_SEED: [u8; 32] = [0x42; 32];
/// Message signed by the signing vector.
pub const SIGNING_MESSAGE: &[u8] = b"hello";
/// Transferable key derived from [`SIGNING_SEED`].
pub const SIGNING_VERFER: &str = "DCFS-NGbeR0kRTJC4V8uq2y3z_p7al7TAJeWDgaYgdsS";
/// Non-transferable prefix derived from [`SIGNING_SEED`].
pub const SIGNING_PREFIX: &str = "BCFS-NGbeR0kRTJC4V8uq2y3z_p7al7TAJeWDgaYgdsS";
/// Signature of [`SIGNING_MESSAGE`] under [`SIGNING_SEED`].
pub const SIGNING_SIGNATURE: &str =
    "0BD6EOpkbX7oCZS93dA5QkebYanVSWLP_j5ilTcma4rcRrWmCyBPF5i_MjmLwtTvjXkaTkrnw560PoNWPOZ9OeQF";

/// SHA2-256 SAID of [`said_vector_body`].
pub const SAID_VECTOR: &str = "IIq520VIB3QnR9MgdvwWU42p5IHEzquraN6QsNOLNPux";
/// The same body once saidified.
pub const SAID_VECTOR_RAW: &str = r#"{"v":"ACDC10JSON0000b2_","d":"IIq520VIB3QnR9MgdvwWU42p5IHEzquraN6QsNOLNPux","i":"BP__________________________________________","s":"EAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f"}"#;

/// A small credential-shaped body with an empty `d`.
pub fn said_vector_body() -> Sad {
    let mut sad = Sad::new();
    sad.insert("v".into(), "ACDC10JSON000000_".into());
    sad.insert("d".into(), "".into());
    sad.insert("i".into(), "BP__________________________________________".into());
    sad.insert("s".into(), "EAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f".into());
    sad
}

/// Verify that all vectors produce their expected output.
///
/// Returns the names of the vectors that did not.
pub fn verify_all_vectors() -> Vec<&'static str> {
    let mut failures = Vec::new();

    for vector in all_vectors() {
        let ok = Matter::new(vector.code, vector.raw.clone())
            .map(|m| m.qb64() == vector.expected_qb64)
            .unwrap_or(false);
        if !ok {
            failures.push(vector.name);
        }
    }

    for vector in counter_vectors() {
        let ok = Counter::new(vector.code, vector.count)
            .map(|c| {
                c.qb64() == vector.expected_qb64 && hex::encode(c.qb2()) == vector.expected_qb2
            })
            .unwrap_or(false);
        if !ok {
            failures.push(vector.name);
        }
    }

    let keypair = Keypair::from_seed(&SIGNING_SEED);
    if keypair.verfer().qb64() != SIGNING_VERFER
        || keypair.non_transferable_prefix().qb64() != SIGNING_PREFIX
        || keypair.sign(SIGNING_MESSAGE).to_matter().qb64() != SIGNING_SIGNATURE
    {
        failures.push("Ed25519 signing");
    }

    let mut sad = said_vector_body();
    let said = saidify(&mut sad, Kind::Json, &["d"], DigestCode::Sha2_256)
        .ok()
        .map(|s| s.qb64());
    let raw = serde_json::to_string(&sad).unwrap_or_default();
    if said.as_deref() != Some(SAID_VECTOR) || raw != SAID_VECTOR_RAW {
        failures.push("SHA2-256 SAID");
    }

    failures
}

/// The sequence number vector as a typed value.
pub fn seqner_vector() -> (Seqner, &'static str) {
    (Seqner(5), "0AAAAAAAAAAAAAAAAAAAAAAF")
}

/// The SAID vector as a typed value.
pub fn said_vector() -> Said {
    Said::parse(SAID_VECTOR).expect("golden SAID parses")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cesr_verifier_core::{verify_said, Ed25519Signature, Verfer};

    #[test]
    fn all_vectors_match() {
        assert_eq!(verify_all_vectors(), Vec::<&str>::new());
    }

    #[test]
    fn primitives_decode_back_to_raw() {
        for vector in all_vectors() {
            let matter = Matter::from_qb64(vector.expected_qb64).unwrap();
            assert_eq!(matter.code(), vector.code, "{}", vector.name);
            assert_eq!(matter.raw(), vector.raw.as_slice(), "{}", vector.name);

            let qb2 = matter.encode(Domain::Binary);
            let (decoded, used) = Matter::decode(&qb2, Domain::Binary).unwrap();
            assert_eq!(used, qb2.len());
            assert_eq!(decoded, matter);
        }
    }

    #[test]
    fn counters_decode_from_both_domains() {
        for vector in counter_vectors() {
            let (text, used) =
                Counter::decode(vector.expected_qb64.as_bytes(), Domain::Text).unwrap();
            assert_eq!(used, vector.expected_qb64.len());
            assert_eq!((text.code(), text.count()), (vector.code, vector.count));

            let qb2 = hex::decode(vector.expected_qb2).unwrap();
            let (binary, used) = Counter::decode(&qb2, Domain::Binary).unwrap();
            assert_eq!(used, qb2.len());
            assert_eq!(binary, text);
        }
    }

    #[test]
    fn seqner_matches_vector() {
        let (seqner, qb64) = seqner_vector();
        assert_eq!(seqner.qb64(), qb64);
        let matter = Matter::from_qb64(qb64).unwrap();
        assert_eq!(Seqner::from_matter(&matter).unwrap().0, 5);
    }

    #[test]
    fn golden_signature_verifies() {
        let verfer = Verfer::parse(SIGNING_VERFER).unwrap();
        let matter = Matter::from_qb64(SIGNING_SIGNATURE).unwrap();
        let signature = Ed25519Signature::from_matter(&matter).unwrap();
        assert!(verfer.verify(SIGNING_MESSAGE, &signature).is_ok());
        assert!(verfer.verify(b"hellO", &signature).is_err());
    }

    #[test]
    fn golden_said_verifies() {
        let sad: Sad = serde_json::from_str(SAID_VECTOR_RAW).unwrap();
        assert_eq!(verify_said(&sad, Kind::Json, &["d"]).unwrap(), said_vector());
        assert!(said_vector().verifies(
            b"{\"v\":\"ACDC10JSON0000b2_\",\"d\":\"############################################\",\"i\":\"BP__________________________________________\",\"s\":\"EAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f\"}"
        ));
    }
}
