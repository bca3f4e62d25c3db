//! Escrow of message groups that arrived before what they depend on.
//!
//! A group that cannot be decided yet is filed, as raw bytes, under the
//! [`Dependency`] it waits for. When a later commit satisfies a dependency
//! the pipeline takes every group filed under it and processes them again.
//! Groups older than the escrow timeout are dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use cesr_verifier_core::{Prefix, Said};
use cesr_verifier_store::{now_millis, EscrowEntry, InsertResult, Store, StoreError};

/// What an escrowed group is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// Key state of an identifier, or a later event in its log.
    KeyState(Prefix),
    /// More witness receipts for an identifier's events.
    WitnessReceipts(Prefix),
    /// The key event a receipt names, not yet accepted.
    ReceiptedEvent(Prefix),
    /// A registry inception or rotation.
    Registry(Said),
    /// The issuance status of a credential.
    Issuance(Said),
    /// A verified credential, e.g. an edge source.
    Credential(Said),
    /// A schema the resolver does not know yet.
    Schema(Said),
}

impl Dependency {
    /// Store key this dependency's escrow is filed under.
    pub fn key(&self) -> String {
        match self {
            Dependency::KeyState(prefix) => format!("kel:{prefix}"),
            Dependency::WitnessReceipts(prefix) => format!("wit:{prefix}"),
            Dependency::ReceiptedEvent(prefix) => format!("rct:{prefix}"),
            Dependency::Registry(said) => format!("reg:{said}"),
            Dependency::Issuance(said) => format!("iss:{said}"),
            Dependency::Credential(said) => format!("cred:{said}"),
            Dependency::Schema(said) => format!("schema:{said}"),
        }
    }

    /// Dependencies a newly escrowed group may itself satisfy.
    ///
    /// A receipt waiting for its event can complete that event's witness
    /// support, so the event is retried with the receipt in escrow.
    pub fn wakes(&self) -> Option<Dependency> {
        match self {
            Dependency::ReceiptedEvent(prefix) => Some(Dependency::WitnessReceipts(prefix.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Escrow table over a store.
pub struct Escrow<S: Store> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S: Store> Escrow<S> {
    pub fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    fn cutoff(&self) -> i64 {
        now_millis().saturating_sub(i64::try_from(self.timeout.as_millis()).unwrap_or(i64::MAX))
    }

    /// File a group under `dependency`.
    ///
    /// `since` keeps the original escrow time of a group being re-filed.
    pub fn park(
        &self,
        dependency: &Dependency,
        raw: &Bytes,
        since: Option<i64>,
    ) -> Result<InsertResult, StoreError> {
        let entry = EscrowEntry {
            id: blake3::hash(raw).to_hex().to_string(),
            raw: raw.clone(),
            escrowed_at: since.unwrap_or_else(now_millis),
        };
        let result = self.store.escrow_put(&dependency.key(), &entry)?;
        tracing::debug!(
            dependency = %dependency,
            entry = %entry.id,
            duplicate = matches!(result, InsertResult::AlreadyExists),
            "escrowed message group"
        );
        Ok(result)
    }

    /// Take every unexpired group filed under `dependency`.
    pub fn release(&self, dependency: &Dependency) -> Result<Vec<EscrowEntry>, StoreError> {
        let cutoff = self.cutoff();
        let (live, stale): (Vec<_>, Vec<_>) = self
            .store
            .escrow_take(&dependency.key())?
            .into_iter()
            .partition(|e| e.escrowed_at >= cutoff);
        if !stale.is_empty() {
            tracing::debug!(dependency = %dependency, count = stale.len(), "dropped expired escrow");
        }
        if !live.is_empty() {
            tracing::debug!(dependency = %dependency, count = live.len(), "releasing escrow");
        }
        Ok(live)
    }

    /// Drop every group past the escrow timeout.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let purged = self.store.escrow_purge(self.cutoff())?;
        if purged > 0 {
            tracing::debug!(count = purged, "purged expired escrow");
        }
        Ok(purged)
    }

    /// Number of groups currently escrowed.
    pub fn len(&self) -> Result<usize, StoreError> {
        self.store.escrow_len()
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cesr_verifier_core::DigestCode;
    use cesr_verifier_store::MemoryStore;

    fn dep() -> Dependency {
        Dependency::Credential(Said::compute(DigestCode::Blake3_256, b"edge"))
    }

    #[test]
    fn test_dependency_keys_are_distinct() {
        let said = Said::compute(DigestCode::Blake3_256, b"x");
        let keys = [
            Dependency::KeyState(said.as_prefix()).key(),
            Dependency::WitnessReceipts(said.as_prefix()).key(),
            Dependency::ReceiptedEvent(said.as_prefix()).key(),
            Dependency::Registry(said.clone()).key(),
            Dependency::Issuance(said.clone()).key(),
            Dependency::Credential(said.clone()).key(),
            Dependency::Schema(said).key(),
        ];
        for (i, key) in keys.iter().enumerate() {
            assert!(!keys[..i].contains(key));
        }
    }

    #[test]
    fn test_park_dedupes_and_release_drains() {
        let escrow = Escrow::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        let raw = Bytes::from_static(b"{\"v\":\"...\"}");
        assert_eq!(escrow.park(&dep(), &raw, None).unwrap(), InsertResult::Inserted);
        assert_eq!(escrow.park(&dep(), &raw, None).unwrap(), InsertResult::AlreadyExists);
        assert_eq!(escrow.len().unwrap(), 1);

        let released = escrow.release(&dep()).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].raw, raw);
        assert!(escrow.is_empty().unwrap());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let escrow = Escrow::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        let old = now_millis() - 10_000;
        escrow.park(&dep(), &Bytes::from_static(b"a"), Some(old)).unwrap();
        escrow.park(&dep(), &Bytes::from_static(b"b"), None).unwrap();

        let released = escrow.release(&dep()).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].raw, Bytes::from_static(b"b"));

        escrow.park(&dep(), &Bytes::from_static(b"c"), Some(old)).unwrap();
        assert_eq!(escrow.purge_expired().unwrap(), 1);
    }
}
