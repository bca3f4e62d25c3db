//! # CESR Verifier Core
//!
//! Pure primitives for the CESR verifier: the primitive codec, message
//! bodies, the stream demultiplexer and the typed messages it feeds.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over self-framing cryptographic data.
//!
//! ## Key Types
//!
//! - [`Matter`] - A coded primitive (key, digest, signature, number, datetime)
//! - [`Siger`] - An indexed signature
//! - [`Counter`] - A count code framing an attachment group
//! - [`Serder`] - A framed message body with its version string
//! - [`MessageGroup`] - One body plus its attachments, as yielded by [`parse`]
//! - [`Message`] - The typed message the pipeline dispatches on
//!
//! ## Domains
//!
//! Every primitive has a text form (qb64) and a binary form (qb2). The binary
//! form is the base64url decoding of the text form, so both carry the same
//! bits. See the [`codec`] module.

pub mod codec;
pub mod counter;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod event;
pub mod indexer;
pub mod parser;
pub mod said;
pub mod serder;
pub mod state;
pub mod tholder;
pub mod types;

pub use codec::{Domain, Matter, MatterCode};
pub use counter::{Counter, CounterCode};
pub use credential::{Credential, Edge, EdgeOperator};
pub use crypto::{DigestCode, Ed25519Signature, Keypair};
pub use error::{CodecError, CryptoError, MessageError, ParseError};
pub use event::{
    EventSeal, Establishment, Ilk, KeyEvent, Message, ReceiptEvent, Seal, TelEvent, WitnessChange,
};
pub use indexer::{IndexCode, Siger};
pub use parser::{parse, Attachments, MessageGroup, Parser, SourceSeal, SourceTriple};
pub use said::{saidify, verify_said};
pub use serder::{Kind, Protocol, Sad, Serder, Version};
pub use state::{
    CredentialStatus, KeyEventRecord, KeyState, LastEstablishment, ReceiptCouple, RegistryState,
    TelEventRecord, VerifiedCredential,
};
pub use tholder::{Tholder, Weight};
pub use types::{Dater, Prefix, Said, Seqner, Verfer};
