//! Error types for the Verifier.

use cesr_verifier_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Verifier operations.
#[derive(Debug, Error)]
pub enum VerifierError {
    /// The request body is not a CESR stream.
    #[error("invalid content type={0} for VC presentation")]
    InvalidContentType(String),

    /// The request body exceeds the configured limit.
    #[error("request body of {size} bytes exceeds {limit}")]
    BodyTooLarge { size: usize, limit: usize },

    /// The body did not produce a verified credential with the presented SAID.
    #[error("credential {0} from body of request did not verify")]
    NotVerified(String),

    /// A stored credential body is not valid JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error, including one that stopped processing.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The blocking processing task panicked or was cancelled.
    #[error("processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl VerifierError {
    /// Whether the caller sent a request this verifier refuses, as opposed
    /// to the verifier failing to process it.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            VerifierError::InvalidContentType(_)
                | VerifierError::BodyTooLarge { .. }
                | VerifierError::NotVerified(_)
        )
    }
}

/// Result type for Verifier operations.
pub type Result<T> = std::result::Result<T, VerifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_and_classes() {
        let err = VerifierError::InvalidContentType("text/plain".into());
        assert_eq!(err.to_string(), "invalid content type=text/plain for VC presentation");
        assert!(err.is_bad_request());

        let err = VerifierError::NotVerified("EABC".into());
        assert_eq!(err.to_string(), "credential EABC from body of request did not verify");
        assert!(err.is_bad_request());

        let err = VerifierError::Store(StoreError::Poisoned("escrow".into()));
        assert!(!err.is_bad_request());
    }
}
