//! Schema resolution.
//!
//! Schema documents are validated outside the verifier. A resolver only
//! reports whether a credential conforms to its schema, fails it, or
//! cannot tell yet because the schema is not loaded.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use cesr_verifier_core::{Sad, Said};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    Valid,
    Invalid(String),
    /// The schema is not available yet; the credential waits in escrow.
    Unknown,
}

pub trait SchemaResolver: Send + Sync {
    fn resolve(&self, schema: &Said, credential: &Sad) -> SchemaStatus;
}

/// Accepts every credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllSchemas;

impl SchemaResolver for AcceptAllSchemas {
    fn resolve(&self, _schema: &Said, _credential: &Sad) -> SchemaStatus {
        SchemaStatus::Valid
    }
}

/// Resolver over an explicit table of schema verdicts.
///
/// Unlisted schemas are `Unknown`. After loading a schema, call
/// `Pipeline::retry` with its dependency to release waiting credentials.
#[derive(Debug, Default)]
pub struct KnownSchemas {
    entries: RwLock<HashMap<Said, SchemaStatus>>,
}

impl KnownSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a schema as loaded; credentials naming it pass.
    pub fn allow(&self, schema: Said) {
        self.set(schema, SchemaStatus::Valid);
    }

    /// Mark a schema as one every credential fails.
    pub fn deny(&self, schema: Said, reason: impl Into<String>) {
        self.set(schema, SchemaStatus::Invalid(reason.into()));
    }

    fn set(&self, schema: Said, status: SchemaStatus) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(schema, status);
    }
}

impl SchemaResolver for KnownSchemas {
    fn resolve(&self, schema: &Said, _credential: &Sad) -> SchemaStatus {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(schema)
            .cloned()
            .unwrap_or(SchemaStatus::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cesr_verifier_core::DigestCode;

    #[test]
    fn test_known_schemas() {
        let schemas = KnownSchemas::new();
        let a = Said::compute(DigestCode::Blake3_256, b"a");
        let b = Said::compute(DigestCode::Blake3_256, b"b");
        let sad = Sad::new();

        assert_eq!(schemas.resolve(&a, &sad), SchemaStatus::Unknown);
        schemas.allow(a.clone());
        schemas.deny(b.clone(), "wrong shape");
        assert_eq!(schemas.resolve(&a, &sad), SchemaStatus::Valid);
        assert_eq!(schemas.resolve(&b, &sad), SchemaStatus::Invalid("wrong shape".into()));
        assert_eq!(AcceptAllSchemas.resolve(&b, &sad), SchemaStatus::Valid);
    }
}
