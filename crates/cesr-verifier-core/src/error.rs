//! Error types for the CESR verifier core.

use thiserror::Error;

/// Errors raised while encoding or decoding a single CESR primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown code {0:?}")]
    UnknownCode(String),

    /// The buffer ends before the primitive does. `needed` is the total
    /// size of the primitive, counted from its first byte.
    #[error("buffer too short: need {needed} bytes")]
    Shortage { needed: usize },

    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    #[error("non-zero pad bits in {0}")]
    NonZeroPad(String),

    #[error("raw size {got} does not fit code {code} (expected {expected})")]
    RawSize {
        code: String,
        expected: usize,
        got: usize,
    },

    #[error("value {value} does not fit in {chars} base64 characters")]
    SoftOverflow { value: u64, chars: usize },

    #[error("unexpected code {got}, expected {expected}")]
    UnexpectedCode { expected: &'static str, got: String },

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Structural failures of the stream demultiplexer.
///
/// Each of these aborts the remainder of the stream. Groups yielded before
/// the failure remain valid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed primitive at offset {offset}: {reason}")]
    MalformedPrimitive { offset: usize, reason: String },

    #[error("truncated stream at offset {offset}: need {needed} more bytes")]
    TruncatedStream { offset: usize, needed: usize },

    #[error("malformed message at offset {offset}: {reason}")]
    MalformedMessage { offset: usize, reason: String },
}

impl ParseError {
    /// Lift a codec error raised for a primitive starting at `offset`.
    ///
    /// `available` is how many bytes were left in the buffer at that point.
    pub fn from_codec(err: CodecError, offset: usize, available: usize) -> Self {
        match err {
            CodecError::Shortage { needed } => ParseError::TruncatedStream {
                offset,
                needed: needed.saturating_sub(available).max(1),
            },
            other => ParseError::MalformedPrimitive {
                offset,
                reason: other.to_string(),
            },
        }
    }

    /// Byte offset into the stream where the failure was detected.
    pub fn offset(&self) -> usize {
        match self {
            ParseError::MalformedPrimitive { offset, .. }
            | ParseError::TruncatedStream { offset, .. }
            | ParseError::MalformedMessage { offset, .. } => *offset,
        }
    }
}

/// Errors interpreting a framed body as a typed message.
///
/// These reject a single message group; the stream continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("SAID mismatch on {label}: embedded {embedded}, computed {computed}")]
    SaidMismatch {
        label: String,
        embedded: String,
        computed: String,
    },

    #[error("missing field {0:?}")]
    MissingField(String),

    #[error("invalid field {field:?}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("unsupported message type {0:?}")]
    UnsupportedIlk(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl MessageError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        MessageError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Cryptographic failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("code {0} is not a verification key")]
    NotAKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortage_becomes_truncation() {
        let err = ParseError::from_codec(CodecError::Shortage { needed: 44 }, 10, 4);
        assert_eq!(
            err,
            ParseError::TruncatedStream {
                offset: 10,
                needed: 40
            }
        );
    }

    #[test]
    fn test_unknown_code_becomes_malformed() {
        let err = ParseError::from_codec(CodecError::UnknownCode("Z".into()), 3, 10);
        assert!(matches!(err, ParseError::MalformedPrimitive { offset: 3, .. }));
        assert_eq!(err.offset(), 3);
    }
}
