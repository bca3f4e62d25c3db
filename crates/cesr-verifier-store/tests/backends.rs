//! The memory and SQLite backends must agree on every operation.

use bytes::Bytes;
use proptest::prelude::*;

use cesr_verifier_store::{EscrowEntry, InsertResult, MemoryStore, SqliteStore, Store};

#[derive(Debug, Clone)]
enum Op {
    Put { dep: u8, id: u8, at: i64 },
    Take { dep: u8 },
    Peek { dep: u8 },
    Purge { cutoff: i64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3, 0u8..6, 0i64..100).prop_map(|(dep, id, at)| Op::Put { dep, id, at }),
        (0u8..3).prop_map(|dep| Op::Take { dep }),
        (0u8..3).prop_map(|dep| Op::Peek { dep }),
        (0i64..100).prop_map(|cutoff| Op::Purge { cutoff }),
    ]
}

fn dep_key(dep: u8) -> String {
    format!("kel:{dep}")
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Put(InsertResult),
    Take(Vec<EscrowEntry>),
    Purge(usize),
}

fn apply(store: &dyn Store, op: &Op) -> Outcome {
    match op {
        Op::Put { dep, id, at } => Outcome::Put(
            store
                .escrow_put(
                    &dep_key(*dep),
                    &EscrowEntry {
                        id: format!("{id:02x}"),
                        raw: Bytes::from(vec![*id; 4]),
                        escrowed_at: *at,
                    },
                )
                .unwrap(),
        ),
        Op::Take { dep } => Outcome::Take(store.escrow_take(&dep_key(*dep)).unwrap()),
        Op::Peek { dep } => Outcome::Take(store.escrow_peek(&dep_key(*dep)).unwrap()),
        Op::Purge { cutoff } => Outcome::Purge(store.escrow_purge(*cutoff).unwrap()),
    }
}

proptest! {
    #[test]
    fn escrow_backends_agree(ops in prop::collection::vec(op(), 1..40)) {
        let memory = MemoryStore::new();
        let sqlite = SqliteStore::open_memory().unwrap();
        for op in &ops {
            prop_assert_eq!(apply(&memory, op), apply(&sqlite, op));
            prop_assert_eq!(memory.escrow_len().unwrap(), sqlite.escrow_len().unwrap());
        }
    }
}
