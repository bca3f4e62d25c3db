//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cesr_verifier_core::{
    CredentialStatus, Dater, KeyEventRecord, KeyState, Prefix, ReceiptCouple, RegistryState, Said,
    TelEventRecord, VerifiedCredential,
};

use crate::error::{Result, StoreError};
use crate::traits::{EscrowEntry, InsertResult, Store, TelUpdate};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    key_states: HashMap<Prefix, KeyState>,

    /// Accepted key events, ordered by sn per prefix.
    key_events: HashMap<Prefix, BTreeMap<u64, KeyEventRecord>>,

    /// Receipt couples by (prefix, event said).
    receipts: HashMap<(Prefix, Said), Vec<ReceiptCouple>>,

    registries: HashMap<Said, RegistryState>,
    statuses: HashMap<Said, CredentialStatus>,

    /// Accepted transaction events, ordered by sn per registry or credential.
    tel_events: HashMap<Said, BTreeMap<u64, TelEventRecord>>,

    credentials: HashMap<Said, VerifiedCredential>,
    presentations: HashMap<Said, Dater>,

    /// Escrowed groups by dependency key, oldest first.
    escrows: HashMap<String, Vec<EscrowEntry>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get_key_state(&self, prefix: &Prefix) -> Result<Option<KeyState>> {
        Ok(self.read()?.key_states.get(prefix).cloned())
    }

    fn get_key_event(&self, prefix: &Prefix, sn: u64) -> Result<Option<KeyEventRecord>> {
        let inner = self.read()?;
        Ok(inner
            .key_events
            .get(prefix)
            .and_then(|events| events.get(&sn))
            .cloned())
    }

    fn commit_key_event(&self, state: &KeyState, event: &KeyEventRecord) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let events = inner.key_events.entry(event.prefix.clone()).or_default();
        if events.contains_key(&event.sn) {
            return Ok(InsertResult::AlreadyExists);
        }
        events.insert(event.sn, event.clone());
        inner.key_states.insert(state.prefix.clone(), state.clone());
        Ok(InsertResult::Inserted)
    }

    fn add_receipts(
        &self,
        prefix: &Prefix,
        said: &Said,
        couples: &[ReceiptCouple],
    ) -> Result<usize> {
        let mut inner = self.write()?;
        let stored = inner
            .receipts
            .entry((prefix.clone(), said.clone()))
            .or_default();
        let mut added = 0;
        for couple in couples {
            if !stored.iter().any(|c| c.witness == couple.witness) {
                stored.push(couple.clone());
                added += 1;
            }
        }
        Ok(added)
    }

    fn get_receipts(&self, prefix: &Prefix, said: &Said) -> Result<Vec<ReceiptCouple>> {
        let inner = self.read()?;
        Ok(inner
            .receipts
            .get(&(prefix.clone(), said.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn get_registry(&self, registry: &Said) -> Result<Option<RegistryState>> {
        Ok(self.read()?.registries.get(registry).cloned())
    }

    fn get_credential_status(&self, credential: &Said) -> Result<Option<CredentialStatus>> {
        Ok(self.read()?.statuses.get(credential).cloned())
    }

    fn commit_tel_event(&self, update: &TelUpdate, event: &TelEventRecord) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let events = inner.tel_events.entry(event.id.clone()).or_default();
        if events.contains_key(&event.sn) {
            return Ok(InsertResult::AlreadyExists);
        }
        events.insert(event.sn, event.clone());
        match update {
            TelUpdate::Registry(state) => {
                inner.registries.insert(state.registry.clone(), state.clone());
            }
            TelUpdate::Credential(status) => {
                inner.statuses.insert(status.credential.clone(), status.clone());
            }
        }
        Ok(InsertResult::Inserted)
    }

    fn get_tel_event(&self, id: &Said, sn: u64) -> Result<Option<TelEventRecord>> {
        let inner = self.read()?;
        Ok(inner
            .tel_events
            .get(id)
            .and_then(|events| events.get(&sn))
            .cloned())
    }

    fn get_credential(&self, said: &Said) -> Result<Option<VerifiedCredential>> {
        Ok(self.read()?.credentials.get(said).cloned())
    }

    fn put_credential(&self, credential: &VerifiedCredential) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.credentials.contains_key(&credential.said) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner
            .credentials
            .insert(credential.said.clone(), credential.clone());
        Ok(InsertResult::Inserted)
    }

    fn pin_presentation(&self, said: &Said, at: &Dater) -> Result<()> {
        self.write()?.presentations.insert(said.clone(), at.clone());
        Ok(())
    }

    fn get_presentation(&self, said: &Said) -> Result<Option<Dater>> {
        Ok(self.read()?.presentations.get(said).cloned())
    }

    fn escrow_put(&self, dependency: &str, entry: &EscrowEntry) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let entries = inner.escrows.entry(dependency.to_string()).or_default();
        if entries.iter().any(|e| e.id == entry.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        entries.push(entry.clone());
        Ok(InsertResult::Inserted)
    }

    fn escrow_take(&self, dependency: &str) -> Result<Vec<EscrowEntry>> {
        Ok(self.write()?.escrows.remove(dependency).unwrap_or_default())
    }

    fn escrow_peek(&self, dependency: &str) -> Result<Vec<EscrowEntry>> {
        Ok(self.read()?.escrows.get(dependency).cloned().unwrap_or_default())
    }

    fn escrow_purge(&self, cutoff: i64) -> Result<usize> {
        let mut inner = self.write()?;
        let mut purged = 0;
        for entries in inner.escrows.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.escrowed_at >= cutoff);
            purged += before - entries.len();
        }
        inner.escrows.retain(|_, entries| !entries.is_empty());
        Ok(purged)
    }

    fn escrow_len(&self) -> Result<usize> {
        Ok(self.read()?.escrows.values().map(Vec::len).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{key_event, key_state, receipt_couple};
    use bytes::Bytes;

    #[test]
    fn test_commit_key_event_is_idempotent() {
        let store = MemoryStore::new();
        let state = key_state(1, 0);
        let event = key_event(&state);

        assert_eq!(
            store.commit_key_event(&state, &event).unwrap(),
            InsertResult::Inserted
        );
        assert_eq!(
            store.commit_key_event(&state, &event).unwrap(),
            InsertResult::AlreadyExists
        );
        assert_eq!(store.get_key_state(&state.prefix).unwrap(), Some(state.clone()));
        assert_eq!(store.get_key_event(&state.prefix, 0).unwrap(), Some(event));
        assert!(store.get_key_event(&state.prefix, 1).unwrap().is_none());
    }

    #[test]
    fn test_receipts_dedupe_by_witness() {
        let store = MemoryStore::new();
        let state = key_state(2, 0);
        let couple = receipt_couple(9, b"event");
        assert_eq!(
            store
                .add_receipts(&state.prefix, &state.said, &[couple.clone(), couple.clone()])
                .unwrap(),
            1
        );
        assert_eq!(store.get_receipts(&state.prefix, &state.said).unwrap(), vec![couple]);
    }

    #[test]
    fn test_escrow_dedupe_take_and_purge() {
        let store = MemoryStore::new();
        let entry = |id: &str, at: i64| EscrowEntry {
            id: id.to_string(),
            raw: Bytes::from_static(b"{}"),
            escrowed_at: at,
        };

        assert_eq!(store.escrow_put("kel:a", &entry("1", 10)).unwrap(), InsertResult::Inserted);
        assert_eq!(
            store.escrow_put("kel:a", &entry("1", 11)).unwrap(),
            InsertResult::AlreadyExists
        );
        store.escrow_put("kel:a", &entry("2", 20)).unwrap();
        store.escrow_put("tel:b", &entry("3", 5)).unwrap();
        assert_eq!(store.escrow_len().unwrap(), 3);

        assert_eq!(store.escrow_purge(8).unwrap(), 1);
        assert_eq!(store.escrow_peek("kel:a").unwrap().len(), 2);
        assert_eq!(store.escrow_len().unwrap(), 2);
        let taken = store.escrow_take("kel:a").unwrap();
        assert_eq!(
            taken.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
        assert_eq!(store.escrow_len().unwrap(), 0);
        assert!(store.escrow_take("kel:a").unwrap().is_empty());
    }
}
