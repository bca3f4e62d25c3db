//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for the verifier. It uses rusqlite
//! with bundled SQLite. State records are stored as CBOR blobs next to the
//! indexed columns used to find them.

use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use cesr_verifier_core::{
    CredentialStatus, Dater, KeyEventRecord, KeyState, Prefix, ReceiptCouple, RegistryState, Said,
    TelEventRecord, VerifiedCredential,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{now_millis, EscrowEntry, InsertResult, Store, TelUpdate};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        f(&conn)
    }

    /// Execute a blocking operation that needs mutable access.
    fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        f(&mut conn)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(blob: &[u8]) -> Result<T> {
    ciborium::from_reader(blob).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Fetch a single blob column and decode it.
fn query_blob<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<T>> {
    let blob: Option<Vec<u8>> = conn.query_row(sql, params, |row| row.get(0)).optional()?;
    blob.map(|b| decode(&b)).transpose()
}

fn sn_param(sn: u64) -> Result<i64> {
    i64::try_from(sn).map_err(|_| StoreError::InvalidData(format!("sequence number {sn} too large")))
}

fn escrow_entries(conn: &Connection, dependency: &str) -> Result<Vec<EscrowEntry>> {
    let mut stmt = conn.prepare(
        "SELECT entry_id, raw, escrowed_at FROM escrows
         WHERE dependency = ?1 ORDER BY seq",
    )?;
    let entries = stmt
        .query_map(params![dependency], |row| {
            Ok(EscrowEntry {
                id: row.get(0)?,
                raw: Bytes::from(row.get::<_, Vec<u8>>(1)?),
                escrowed_at: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

impl Store for SqliteStore {
    fn get_key_state(&self, prefix: &Prefix) -> Result<Option<KeyState>> {
        self.with_conn(|conn| {
            query_blob(
                conn,
                "SELECT state FROM key_states WHERE prefix = ?1",
                params![prefix.qb64()],
            )
        })
    }

    fn get_key_event(&self, prefix: &Prefix, sn: u64) -> Result<Option<KeyEventRecord>> {
        let sn = sn_param(sn)?;
        self.with_conn(|conn| {
            query_blob(
                conn,
                "SELECT record FROM key_events WHERE prefix = ?1 AND sn = ?2",
                params![prefix.qb64(), sn],
            )
        })
    }

    fn commit_key_event(&self, state: &KeyState, event: &KeyEventRecord) -> Result<InsertResult> {
        let state_blob = encode(state)?;
        let event_blob = encode(event)?;
        let sn = sn_param(event.sn)?;
        let state_sn = sn_param(state.sn)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_millis();

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO key_events (prefix, sn, said, record, accepted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![event.prefix.qb64(), sn, event.said.qb64(), event_blob, now],
            )?;
            if inserted == 0 {
                return Ok(InsertResult::AlreadyExists);
            }

            tx.execute(
                "INSERT INTO key_states (prefix, sn, state, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(prefix) DO UPDATE SET
                    sn = excluded.sn, state = excluded.state, updated_at = excluded.updated_at",
                params![state.prefix.qb64(), state_sn, state_blob, now],
            )?;

            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
    }

    fn add_receipts(
        &self,
        prefix: &Prefix,
        said: &Said,
        couples: &[ReceiptCouple],
    ) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_millis();
            let mut added = 0;
            for couple in couples {
                added += tx.execute(
                    "INSERT OR IGNORE INTO receipts (prefix, said, witness, signature, received_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        prefix.qb64(),
                        said.qb64(),
                        couple.witness.qb64(),
                        couple.signature.to_matter().qb64(),
                        now
                    ],
                )?;
            }
            tx.commit()?;
            Ok(added)
        })
    }

    fn get_receipts(&self, prefix: &Prefix, said: &Said) -> Result<Vec<ReceiptCouple>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT witness, signature FROM receipts
                 WHERE prefix = ?1 AND said = ?2 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map(params![prefix.qb64(), said.qb64()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(witness, signature)| {
                    let witness = Prefix::parse(&witness)
                        .map_err(|e| StoreError::InvalidData(format!("receipt witness: {e}")))?;
                    ReceiptCouple::try_from((witness, signature))
                        .map_err(|e| StoreError::InvalidData(format!("receipt signature: {e}")))
                })
                .collect()
        })
    }

    fn get_registry(&self, registry: &Said) -> Result<Option<RegistryState>> {
        self.with_conn(|conn| {
            query_blob(
                conn,
                "SELECT state FROM registries WHERE registry = ?1",
                params![registry.qb64()],
            )
        })
    }

    fn get_credential_status(&self, credential: &Said) -> Result<Option<CredentialStatus>> {
        self.with_conn(|conn| {
            query_blob(
                conn,
                "SELECT status FROM credential_status WHERE credential = ?1",
                params![credential.qb64()],
            )
        })
    }

    fn commit_tel_event(&self, update: &TelUpdate, event: &TelEventRecord) -> Result<InsertResult> {
        let event_blob = encode(event)?;
        let sn = sn_param(event.sn)?;
        let (table_sql, key, blob) = match update {
            TelUpdate::Registry(state) => (
                "INSERT INTO registries (registry, state, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(registry) DO UPDATE SET
                    state = excluded.state, updated_at = excluded.updated_at",
                state.registry.qb64(),
                encode(state)?,
            ),
            TelUpdate::Credential(status) => (
                "INSERT INTO credential_status (credential, status, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(credential) DO UPDATE SET
                    status = excluded.status, updated_at = excluded.updated_at",
                status.credential.qb64(),
                encode(status)?,
            ),
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_millis();

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO tel_events (id, sn, said, record, accepted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![event.id.qb64(), sn, event.said.qb64(), event_blob, now],
            )?;
            if inserted == 0 {
                return Ok(InsertResult::AlreadyExists);
            }

            tx.execute(table_sql, params![key, blob, now])?;
            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
    }

    fn get_tel_event(&self, id: &Said, sn: u64) -> Result<Option<TelEventRecord>> {
        let sn = sn_param(sn)?;
        self.with_conn(|conn| {
            query_blob(
                conn,
                "SELECT record FROM tel_events WHERE id = ?1 AND sn = ?2",
                params![id.qb64(), sn],
            )
        })
    }

    fn get_credential(&self, said: &Said) -> Result<Option<VerifiedCredential>> {
        self.with_conn(|conn| {
            query_blob(
                conn,
                "SELECT record FROM credentials WHERE said = ?1",
                params![said.qb64()],
            )
        })
    }

    fn put_credential(&self, credential: &VerifiedCredential) -> Result<InsertResult> {
        let blob = encode(credential)?;
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO credentials (said, issuer, schema, record, saved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    credential.said.qb64(),
                    credential.issuer.qb64(),
                    credential.schema.qb64(),
                    blob,
                    now_millis()
                ],
            )?;
            Ok(if inserted == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
    }

    fn pin_presentation(&self, said: &Said, at: &Dater) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presentations (said, presented_at) VALUES (?1, ?2)
                 ON CONFLICT(said) DO UPDATE SET presented_at = excluded.presented_at",
                params![said.qb64(), at.iso()],
            )?;
            Ok(())
        })
    }

    fn get_presentation(&self, said: &Said) -> Result<Option<Dater>> {
        self.with_conn(|conn| {
            let iso: Option<String> = conn
                .query_row(
                    "SELECT presented_at FROM presentations WHERE said = ?1",
                    params![said.qb64()],
                    |row| row.get(0),
                )
                .optional()?;
            iso.map(|iso| {
                Dater::from_iso(&iso).map_err(|e| StoreError::InvalidData(e.to_string()))
            })
            .transpose()
        })
    }

    fn escrow_put(&self, dependency: &str, entry: &EscrowEntry) -> Result<InsertResult> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO escrows (dependency, entry_id, raw, escrowed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![dependency, entry.id, entry.raw.as_ref(), entry.escrowed_at],
            )?;
            Ok(if inserted == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
    }

    fn escrow_take(&self, dependency: &str) -> Result<Vec<EscrowEntry>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let entries = escrow_entries(&tx, dependency)?;
            tx.execute("DELETE FROM escrows WHERE dependency = ?1", params![dependency])?;
            tx.commit()?;
            Ok(entries)
        })
    }

    fn escrow_peek(&self, dependency: &str) -> Result<Vec<EscrowEntry>> {
        self.with_conn(|conn| escrow_entries(conn, dependency))
    }

    fn escrow_purge(&self, cutoff: i64) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM escrows WHERE escrowed_at < ?1", params![cutoff])?)
        })
    }

    fn escrow_len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM escrows", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{credential, key_event, key_state, receipt_couple, registry_event};

    #[test]
    fn test_key_event_commit_and_lookup() {
        let store = SqliteStore::open_memory().unwrap();
        let state = key_state(1, 0);
        let event = key_event(&state);

        assert_eq!(store.commit_key_event(&state, &event).unwrap(), InsertResult::Inserted);
        assert_eq!(store.get_key_state(&state.prefix).unwrap(), Some(state.clone()));
        assert_eq!(store.get_key_event(&state.prefix, 0).unwrap(), Some(event.clone()));

        // A second commit at the same sn leaves the state untouched.
        let mut later = state.clone();
        later.witness_threshold = 7;
        assert_eq!(
            store.commit_key_event(&later, &event).unwrap(),
            InsertResult::AlreadyExists
        );
        assert_eq!(store.get_key_state(&state.prefix).unwrap(), Some(state));
    }

    #[test]
    fn test_receipts_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let state = key_state(2, 0);
        let a = receipt_couple(10, b"event");
        let b = receipt_couple(11, b"event");
        assert_eq!(
            store
                .add_receipts(&state.prefix, &state.said, &[a.clone(), b.clone(), a.clone()])
                .unwrap(),
            2
        );
        assert_eq!(store.get_receipts(&state.prefix, &state.said).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_tel_commit() {
        let store = SqliteStore::open_memory().unwrap();
        let (state, event) = registry_event(3);
        let update = TelUpdate::Registry(state.clone());

        assert_eq!(store.commit_tel_event(&update, &event).unwrap(), InsertResult::Inserted);
        assert_eq!(store.get_registry(&state.registry).unwrap(), Some(state.clone()));
        assert_eq!(store.get_tel_event(&state.registry, 0).unwrap(), Some(event.clone()));
        assert_eq!(
            store.commit_tel_event(&update, &event).unwrap(),
            InsertResult::AlreadyExists
        );
    }

    #[test]
    fn test_credentials_and_presentations() {
        let store = SqliteStore::open_memory().unwrap();
        let cred = credential(4);
        assert_eq!(store.put_credential(&cred).unwrap(), InsertResult::Inserted);
        assert_eq!(store.put_credential(&cred).unwrap(), InsertResult::AlreadyExists);
        assert_eq!(store.get_credential(&cred.said).unwrap(), Some(cred.clone()));

        assert!(store.get_presentation(&cred.said).unwrap().is_none());
        let at = Dater::now();
        store.pin_presentation(&cred.said, &at).unwrap();
        store.pin_presentation(&cred.said, &at).unwrap();
        assert_eq!(store.get_presentation(&cred.said).unwrap(), Some(at));
    }

    #[test]
    fn test_escrow_order_and_purge() {
        let store = SqliteStore::open_memory().unwrap();
        let entry = |id: &str, at: i64| EscrowEntry {
            id: id.to_string(),
            raw: Bytes::from(id.as_bytes().to_vec()),
            escrowed_at: at,
        };
        store.escrow_put("cred:x", &entry("b", 2)).unwrap();
        store.escrow_put("cred:x", &entry("a", 3)).unwrap();
        assert_eq!(
            store.escrow_put("cred:x", &entry("a", 4)).unwrap(),
            InsertResult::AlreadyExists
        );
        store.escrow_put("kel:y", &entry("c", 1)).unwrap();

        assert_eq!(store.escrow_purge(2).unwrap(), 1);
        let taken = store.escrow_take("cred:x").unwrap();
        assert_eq!(taken, vec![entry("b", 2), entry("a", 3)]);
        assert_eq!(store.escrow_len().unwrap(), 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verifier.db");
        let state = key_state(5, 0);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.commit_key_event(&state, &key_event(&state)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_key_state(&state.prefix).unwrap(), Some(state));
    }
}
