//! Store trait: the abstract interface for verifier state persistence.
//!
//! This trait keeps the verifier storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use bytes::Bytes;

use cesr_verifier_core::{
    CredentialStatus, Dater, KeyEventRecord, KeyState, Prefix, ReceiptCouple, RegistryState, Said,
    TelEventRecord, VerifiedCredential,
};

use crate::error::Result;

/// Result of inserting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Record was inserted.
    Inserted,
    /// A record with the same key already exists (idempotent - not an error).
    AlreadyExists,
}

/// A state change committed together with a transaction event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelUpdate {
    Registry(RegistryState),
    Credential(CredentialStatus),
}

/// A message group waiting on some missing dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowEntry {
    /// Content digest of `raw`, used to drop duplicates.
    pub id: String,
    /// The complete message group as received.
    pub raw: Bytes,
    /// When the group was first escrowed (Unix ms).
    pub escrowed_at: i64,
}

/// The Store trait: synchronous interface for verifier state.
///
/// Callers on an async runtime run store work inside `spawn_blocking`.
///
/// # Design Notes
///
/// - **Atomic commits**: Key state and its accepted event are written together,
///   as are registry or credential status and their transaction event.
/// - **Idempotent inserts**: Committing an event at an occupied position returns
///   `AlreadyExists` and changes nothing.
/// - **Escrow by dependency**: Waiting groups are filed under an opaque
///   dependency key and taken back out all at once.
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Key Event Log
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the current key state of an identifier.
    fn get_key_state(&self, prefix: &Prefix) -> Result<Option<KeyState>>;

    /// Get the accepted key event at `sn`.
    fn get_key_event(&self, prefix: &Prefix, sn: u64) -> Result<Option<KeyEventRecord>>;

    /// Commit a new key state together with the event that produced it.
    fn commit_key_event(&self, state: &KeyState, event: &KeyEventRecord) -> Result<InsertResult>;

    /// Record receipt couples for the event `said` of `prefix`.
    ///
    /// Returns how many couples were new.
    fn add_receipts(&self, prefix: &Prefix, said: &Said, couples: &[ReceiptCouple])
        -> Result<usize>;

    /// Get every receipt couple recorded for an event.
    fn get_receipts(&self, prefix: &Prefix, said: &Said) -> Result<Vec<ReceiptCouple>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Transaction Event Log
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the state of a registry.
    fn get_registry(&self, registry: &Said) -> Result<Option<RegistryState>>;

    /// Get the issuance status of a credential.
    fn get_credential_status(&self, credential: &Said) -> Result<Option<CredentialStatus>>;

    /// Commit a registry or credential status change with its event.
    fn commit_tel_event(&self, update: &TelUpdate, event: &TelEventRecord) -> Result<InsertResult>;

    /// Get the accepted transaction event at `sn` of a registry or credential.
    fn get_tel_event(&self, id: &Said, sn: u64) -> Result<Option<TelEventRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Credentials
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a verified credential.
    fn get_credential(&self, said: &Said) -> Result<Option<VerifiedCredential>>;

    /// Save a verified credential.
    fn put_credential(&self, credential: &VerifiedCredential) -> Result<InsertResult>;

    /// Record when a credential was last presented.
    fn pin_presentation(&self, said: &Said, at: &Dater) -> Result<()>;

    /// Get when a credential was last presented.
    fn get_presentation(&self, said: &Said) -> Result<Option<Dater>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Escrow
    // ─────────────────────────────────────────────────────────────────────────

    /// File a group under a dependency key. Duplicates by `id` are ignored.
    fn escrow_put(&self, dependency: &str, entry: &EscrowEntry) -> Result<InsertResult>;

    /// Remove and return every group filed under a dependency key, oldest first.
    fn escrow_take(&self, dependency: &str) -> Result<Vec<EscrowEntry>>;

    /// Return every group filed under a dependency key without removing them.
    fn escrow_peek(&self, dependency: &str) -> Result<Vec<EscrowEntry>>;

    /// Drop every group escrowed before `cutoff` (Unix ms). Returns how many.
    fn escrow_purge(&self, cutoff: i64) -> Result<usize>;

    /// Total number of escrowed groups.
    fn escrow_len(&self) -> Result<usize>;
}

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
