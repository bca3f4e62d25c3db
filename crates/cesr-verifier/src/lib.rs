//! # CESR Verifier
//!
//! Verification of ACDC credentials presented as CESR streams.
//!
//! ## Overview
//!
//! A presentation carries a credential together with its provenance:
//!
//! - **Key event logs**: the issuer's inception, rotations and interactions,
//!   with controller signatures and witness receipts
//! - **Transaction event logs**: the issuer's registry and the credential's
//!   issuance or revocation, each anchored in the key event log
//! - **Credentials**: the ACDC itself, with any chained edge sources
//!
//! The verifier builds key state and registry state from everything it is
//! given, escrows whatever arrives early, and reports the credentials that
//! pass every check.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cesr_verifier::{Verifier, VerifierConfig, CESR_MEDIA_TYPE};
//! use cesr_verifier::store::SqliteStore;
//!
//! async fn example(said: &str, body: bytes::Bytes) {
//!     // Open storage
//!     let store = SqliteStore::open("verifier.db").unwrap();
//!
//!     // Create the verifier
//!     let verifier = Verifier::new(Arc::new(store), VerifierConfig::default());
//!
//!     // Present a credential with its provenance
//!     match verifier.present(said, body, CESR_MEDIA_TYPE).await {
//!         Ok(presentation) => println!("{}", presentation.msg),
//!         Err(err) if err.is_bad_request() => println!("400: {err}"),
//!         Err(err) => println!("500: {err}"),
//!     }
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `cesr_verifier::core` - Codec, parser and message types
//! - `cesr_verifier::store` - Storage abstraction, SQLite and memory backends
//! - `cesr_verifier::eventing` - Key event, transaction event and credential processing

pub mod config;
pub mod error;
pub mod service;

// Re-export component crates
pub use cesr_verifier_core as core;
pub use cesr_verifier_eventing as eventing;
pub use cesr_verifier_store as store;

// Re-export main types for convenience
pub use config::{VerifierConfig, CESR_MEDIA_TYPE};
pub use error::{Result, VerifierError};
pub use service::{Health, Presentation, Verification, Verifier};

// Re-export commonly used types
pub use cesr_verifier_core::{Dater, Prefix, Said, VerifiedCredential};
pub use cesr_verifier_eventing::{
    Cue, Dependency, Disposition, KnownSchemas, ParseReport, Rejection, SchemaResolver,
    SchemaStatus,
};
