//! # CESR Verifier Eventing
//!
//! Key event, transaction event and credential processing.
//!
//! ## Overview
//!
//! The [`Pipeline`] takes a CESR stream, demultiplexes it into message
//! groups and decides each one against the state in a [`Store`]:
//!
//! - **Key events** (`icp`, `rot`, `ixn`, `rct`) build each identifier's
//!   key state.
//! - **Transaction events** (`vcp`, `vrt`, `iss`, `bis`, `rev`, `brv`) build
//!   registry state and credential status, anchored in the issuer's log.
//! - **Credentials** (ACDC) are verified against their issuer, status,
//!   schema and edge sources.
//!
//! Every group ends up accepted, rejected, or escrowed on the one
//! [`Dependency`] it is missing. Escrowed groups are retried as soon as a
//! later acceptance satisfies their dependency, in the same call.
//!
//! ## Cues
//!
//! Each call returns its own [`ParseReport`] with the [`Cues`] it produced,
//! so cues from one call can never show up in another:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cesr_verifier_eventing::{Cue, Pipeline, PipelineConfig};
//! use cesr_verifier_store::MemoryStore;
//!
//! let pipeline = Pipeline::new(Arc::new(MemoryStore::new()), PipelineConfig::default());
//! let report = pipeline.process(b"");
//! for cue in report.cues {
//!     if let Cue::CredentialSaved { credential } = cue {
//!         println!("{}", credential.said);
//!     }
//! }
//! ```
//!
//! [`Store`]: cesr_verifier_store::Store

pub mod cue;
pub mod error;
pub mod escrow;
mod kever;
pub mod locks;
pub mod pipeline;
pub mod report;
pub mod schema;
mod tever;
mod verifier;

pub use cue::{Cue, Cues};
pub use error::{EventingError, Rejection, Result};
pub use escrow::{Dependency, Escrow};
pub use locks::KeyedLocks;
pub use pipeline::{Pipeline, PipelineConfig};
pub use report::{Disposition, GroupOutcome, ParseReport};
pub use schema::{AcceptAllSchemas, KnownSchemas, SchemaResolver, SchemaStatus};
