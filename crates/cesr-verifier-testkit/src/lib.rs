//! # CESR Verifier Testkit
//!
//! Testing utilities for the CESR verifier.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known primitives, counters, signatures and SAIDs with their exact wire form
//! - **Generators**: Proptest strategies for primitives and whole key event logs
//! - **Fixtures**: Deterministic controllers, witnesses, issuers and credentials that emit signed CESR streams
//!
//! ## Golden Vectors
//!
//! ```rust
//! use cesr_verifier_testkit::vectors::verify_all_vectors;
//!
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use cesr_verifier_testkit::generators::kel_stream;
//!
//! proptest! {
//!     #[test]
//!     fn whole_logs_parse((groups, bytes) in kel_stream(6)) {
//!         let parsed = cesr_verifier_core::parse(&bytes).count();
//!         prop_assert_eq!(parsed, groups.len());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! A credential together with everything needed to verify it:
//!
//! ```rust
//! use cesr_verifier_testkit::fixtures::IssuedCredential;
//!
//! let (_issuer, issued) = IssuedCredential::new(1, "diploma");
//! let stream = issued.to_bytes();
//! assert!(!stream.is_empty());
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    key_seed, next_digest, receipt, schema_said, stream, Anchored, Controller, CredentialBuilder,
    Group, IssuedCredential, Issuer, Witness, FIXTURE_DATETIME,
};
pub use generators::{kel_stream, key_event_log, LogStep};
pub use vectors::{all_vectors, counter_vectors, verify_all_vectors, CounterVector, GoldenVector};
