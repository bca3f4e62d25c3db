//! Proptest generators for property-based testing.

use proptest::prelude::*;

use cesr_verifier_core::{Counter, CounterCode, Domain, Keypair, Matter, MatterCode, Siger};

use crate::fixtures::{stream, Controller, Group};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a fixed-size matter code.
pub fn sized_code() -> impl Strategy<Value = MatterCode> {
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
    ]
}

/// Generate any primitive, declared-length ones included.
pub fn matter() -> impl Strategy<Value = Matter> {
    let sized = sized_code().prop_flat_map(|code| {
        let size = code.raw_size().unwrap_or(0);
        prop::collection::vec(any::<u8>(), size).prop_map(move |raw| {
            Matter::new(code, raw).expect("raw matches the code size")
        })
    });
    let declared = prop::collection::vec(any::<u8>(), 0..=200)
        .prop_map(|raw| Matter::new(MatterCode::Bytes, raw).expect("declared length fits"));
    prop_oneof![4 => sized, 1 => declared]
}

/// Generate an indexed signature.
pub fn siger() -> impl Strategy<Value = Siger> {
    (keypair(), 0u32..4096, any::<bool>(), any::<Vec<u8>>()).prop_map(
        |(keypair, index, both, message)| {
            let signature = keypair.sign(&message);
            if both {
                Siger::new(index, signature)
            } else {
                Siger::current_only(index, signature)
            }
        },
    )
}

/// Generate an attachment counter.
pub fn counter() -> impl Strategy<Value = Counter> {
    let code = prop_oneof![
        Just(CounterCode::ControllerIdxSigs),
        Just(CounterCode::WitnessIdxSigs),
        Just(CounterCode::NonTransReceiptCouples),
        Just(CounterCode::TransReceiptQuadruples),
        Just(CounterCode::FirstSeenReplayCouples),
        Just(CounterCode::TransIdxSigGroups),
        Just(CounterCode::SealSourceCouples),
        Just(CounterCode::TransLastIdxSigGroups),
        Just(CounterCode::SealSourceTriples),
        Just(CounterCode::AttachedMaterialQuadlets),
    ];
    (code, 0u64..4096).prop_map(|(code, count)| Counter::new(code, count).expect("count fits"))
}

/// Generate an encoding domain.
pub fn domain() -> impl Strategy<Value = Domain> {
    prop_oneof![Just(Domain::Text), Just(Domain::Binary)]
}

/// One step of a key event log after inception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStep {
    Interact,
    Rotate,
}

pub fn log_steps(max: usize) -> impl Strategy<Value = Vec<LogStep>> {
    prop::collection::vec(
        prop_oneof![Just(LogStep::Interact), Just(LogStep::Rotate)],
        0..=max,
    )
}

/// Build a controller's log: inception followed by `steps`.
pub fn key_event_log(tag: u8, steps: &[LogStep]) -> (Controller, Vec<Group>) {
    let mut controller = Controller::new(tag);
    let mut events = vec![controller.incept()];
    for step in steps {
        events.push(match step {
            LogStep::Interact => controller.interact(&[]),
            LogStep::Rotate => controller.rotate(),
        });
    }
    (controller, events)
}

/// Generate a valid key event log as a text stream.
pub fn kel_stream(max_events: usize) -> impl Strategy<Value = (Vec<Group>, Vec<u8>)> {
    (any::<u8>(), log_steps(max_events)).prop_map(|(tag, steps)| {
        let (_, events) = key_event_log(tag, &steps);
        let bytes = stream(&events);
        (events, bytes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cesr_verifier_core::parse;

    proptest! {
        #[test]
        fn test_matter_round_trips(m in matter(), d in domain()) {
            let bytes = m.encode(d);
            let (back, used) = Matter::decode(&bytes, d).unwrap();
            prop_assert_eq!(used, bytes.len());
            prop_assert_eq!(back, m);
        }

        #[test]
        fn test_counter_round_trips(c in counter(), d in domain()) {
            let bytes = c.encode(d);
            let (back, used) = Counter::decode(&bytes, d).unwrap();
            prop_assert_eq!(used, bytes.len());
            prop_assert_eq!(back, c);
        }

        #[test]
        fn test_kel_stream_parses_completely((events, bytes) in kel_stream(6)) {
            let groups: Vec<_> = parse(&bytes).collect::<Result<_, _>>().unwrap();
            prop_assert_eq!(groups.len(), events.len());
            for (group, event) in groups.iter().zip(&events) {
                prop_assert_eq!(group.serder.raw(), event.serder().raw());
            }
        }

        #[test]
        fn test_truncation_keeps_prefix((events, bytes) in kel_stream(4), cut in 1usize..64) {
            let cut = cut.min(bytes.len() - 1);
            let truncated = &bytes[..bytes.len() - cut];
            let results: Vec<_> = parse(truncated).collect();
            prop_assert!(results.last().unwrap().is_err());
            prop_assert!(results.len() <= events.len());
            prop_assert!(results[..results.len() - 1].iter().all(Result::is_ok));
        }
    }
}
