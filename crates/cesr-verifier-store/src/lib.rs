//! # CESR Verifier Store
//!
//! Storage abstraction for the CESR verifier. Provides a trait-based interface
//! for key state, registry state, verified credentials and escrowed message
//! groups, with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The store module abstracts persistence behind the [`Store`] trait,
//! allowing the verifier to be storage-agnostic. The primary implementation
//! is [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`InsertResult`] - Result of inserting a record
//! - [`TelUpdate`] - Registry or credential status change
//! - [`EscrowEntry`] - A message group waiting on a dependency
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cesr_verifier_store::{SqliteStore, Store};
//! use cesr_verifier_core::Prefix;
//!
//! fn example(prefix: &Prefix) {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("verifier.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let state = store.get_key_state(prefix).unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Atomic commits**: State and the event that produced it are written in one transaction
//! - **Idempotent inserts**: Committing at an occupied position returns `AlreadyExists`
//! - **Escrow by dependency**: Waiting groups are keyed by what they wait on

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{now_millis, EscrowEntry, InsertResult, Store, TelUpdate};
