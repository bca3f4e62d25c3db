//! Record builders shared by the backend tests.

use bytes::Bytes;
use cesr_verifier_core::{
    DigestCode, Ilk, KeyEventRecord, KeyState, Keypair, LastEstablishment, ReceiptCouple,
    RegistryState, Said, TelEventRecord, Tholder, VerifiedCredential,
};

fn said(seed: u8, tag: &str) -> Said {
    Said::compute(DigestCode::Blake3_256, format!("{tag}-{seed}").as_bytes())
}

pub(crate) fn key_state(seed: u8, sn: u64) -> KeyState {
    let keypair = Keypair::from_seed(&[seed; 32]);
    let prefix = said(seed, "prefix").as_prefix();
    let latest = said(seed, &format!("event-{sn}"));
    KeyState {
        prefix,
        sn,
        said: latest.clone(),
        last_establishment: LastEstablishment { sn, said: latest },
        keys: vec![keypair.verfer()],
        signing_threshold: Tholder::Unweighted(1),
        next_digests: vec![said(seed, "next")],
        next_threshold: Tholder::Unweighted(1),
        witnesses: vec![],
        witness_threshold: 0,
        config: vec![],
    }
}

pub(crate) fn key_event(state: &KeyState) -> KeyEventRecord {
    KeyEventRecord {
        prefix: state.prefix.clone(),
        sn: state.sn,
        said: state.said.clone(),
        ilk: if state.sn == 0 { Ilk::Icp } else { Ilk::Ixn },
        raw: Bytes::from(format!("event {}", state.sn)),
        seals: vec![],
    }
}

pub(crate) fn receipt_couple(seed: u8, message: &[u8]) -> ReceiptCouple {
    let keypair = Keypair::from_seed(&[seed; 32]);
    ReceiptCouple {
        witness: keypair.non_transferable_prefix(),
        signature: keypair.sign(message),
    }
}

pub(crate) fn registry_event(seed: u8) -> (RegistryState, TelEventRecord) {
    let registry = said(seed, "registry");
    let state = RegistryState {
        registry: registry.clone(),
        issuer: said(seed, "issuer").as_prefix(),
        sn: 0,
        said: registry.clone(),
        backers: vec![],
        backer_threshold: 0,
        no_backers: true,
    };
    let event = TelEventRecord {
        id: registry.clone(),
        sn: 0,
        said: registry.clone(),
        ilk: Ilk::Vcp,
        registry,
        raw: Bytes::from_static(b"vcp"),
    };
    (state, event)
}

pub(crate) fn credential(seed: u8) -> VerifiedCredential {
    VerifiedCredential {
        said: said(seed, "credential"),
        issuer: said(seed, "issuer").as_prefix(),
        recipient: Some(said(seed, "holder").as_prefix()),
        schema: said(seed, "schema"),
        registry: Some(said(seed, "registry")),
        content: r#"{"v":"ACDC10JSON000000_"}"#.to_string(),
        raw: Bytes::from_static(b"acdc"),
        verified_at: "2024-01-01T00:00:00.000000+00:00".to_string(),
    }
}
