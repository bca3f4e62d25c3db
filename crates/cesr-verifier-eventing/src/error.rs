//! Error types for event and credential processing.

use thiserror::Error;

use cesr_verifier_core::{MessageError, ParseError};
use cesr_verifier_store::StoreError;

use crate::escrow::Dependency;

/// Why a message group was refused.
///
/// A rejection affects only its own group; processing continues with the
/// next group in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Signatures, thresholds, digests or anchors did not check out.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// A recomputed SAID differs from the embedded one.
    #[error("SAID mismatch: {0}")]
    SaidMismatch(String),

    /// A registry or status event out of its allowed order.
    #[error("invalid transaction sequence: {0}")]
    InvalidTransactionSequence(String),

    /// The credential itself has been revoked.
    #[error("credential {0} has been revoked")]
    CredentialRevoked(String),

    /// The schema collaborator refused the credential.
    #[error("schema validation failed: {0}")]
    SchemaInvalid(String),

    /// The body is missing fields or has ill-typed ones.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A message type the verifier does not process.
    #[error("unsupported message: {0}")]
    Unsupported(String),
}

impl From<MessageError> for Rejection {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::SaidMismatch { .. } => Rejection::SaidMismatch(err.to_string()),
            MessageError::UnsupportedIlk(ilk) => Rejection::Unsupported(ilk),
            other => Rejection::Malformed(other.to_string()),
        }
    }
}

/// Failures that abort the rest of a processing call.
#[derive(Debug, Error)]
pub enum EventingError {
    /// The stream could not be framed past this point.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for eventing operations.
pub type Result<T> = std::result::Result<T, EventingError>;

/// Why a processor stopped short of accepting a group.
#[derive(Debug)]
pub(crate) enum Halt {
    Escrow(Dependency),
    Reject(Rejection),
    Store(StoreError),
}

impl From<Rejection> for Halt {
    fn from(rejection: Rejection) -> Self {
        Halt::Reject(rejection)
    }
}

impl From<StoreError> for Halt {
    fn from(err: StoreError) -> Self {
        Halt::Store(err)
    }
}

/// Outcome of one processor step.
pub(crate) type Step<T> = std::result::Result<T, Halt>;

pub(crate) fn failed(reason: impl Into<String>) -> Halt {
    Halt::Reject(Rejection::VerificationFailed(reason.into()))
}

pub(crate) fn out_of_sequence(reason: impl Into<String>) -> Halt {
    Halt::Reject(Rejection::InvalidTransactionSequence(reason.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_errors_map_to_rejections() {
        let said = MessageError::SaidMismatch {
            label: "d".into(),
            embedded: "E1".into(),
            computed: "E2".into(),
        };
        assert!(matches!(Rejection::from(said), Rejection::SaidMismatch(_)));
        assert_eq!(
            Rejection::from(MessageError::UnsupportedIlk("qry".into())),
            Rejection::Unsupported("qry".into())
        );
        assert!(matches!(
            Rejection::from(MessageError::MissingField("s".into())),
            Rejection::Malformed(_)
        ));
    }
}
