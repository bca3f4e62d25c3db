//! The Verifier: presentation and verification of CESR credential streams.
//!
//! Processing is synchronous; the async entry points run it on the blocking
//! pool so concurrent requests proceed on separate threads. Each request
//! sees only the cues its own body produced.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use cesr_verifier_core::{Dater, Said};
use cesr_verifier_eventing::{
    AcceptAllSchemas, EventingError, ParseReport, Pipeline, SchemaResolver,
};
use cesr_verifier_store::Store;

use crate::config::VerifierConfig;
use crate::error::{Result, VerifierError};

/// Response to an accepted presentation.
#[derive(Debug, Clone, Serialize)]
pub struct Presentation {
    pub said: Said,
    pub msg: String,
    /// When the presentation was recorded, ISO-8601.
    pub presented_at: String,
}

/// Credentials verified from one body, in the order they were saved.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Verification {
    pub credentials: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub msg: String,
}

/// The main Verifier struct.
///
/// Provides:
/// - Processing raw CESR streams into key state, registries and credentials
/// - Presenting a credential by SAID
/// - Verifying a bundle and listing the credentials it contained
pub struct Verifier<S: Store + 'static> {
    pipeline: Arc<Pipeline<S>>,
    config: VerifierConfig,
}

impl<S: Store + 'static> Verifier<S> {
    /// Create a verifier that accepts every schema.
    pub fn new(store: Arc<S>, config: VerifierConfig) -> Self {
        Self::with_schema_resolver(store, config, Arc::new(AcceptAllSchemas))
    }

    pub fn with_schema_resolver(
        store: Arc<S>,
        config: VerifierConfig,
        schemas: Arc<dyn SchemaResolver>,
    ) -> Self {
        let pipeline = Pipeline::new(store, config.pipeline()).with_schema_resolver(schemas);
        Self {
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    pub fn pipeline(&self) -> &Pipeline<S> {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<S> {
        self.pipeline.store()
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Process a stream on the current thread.
    pub fn process(&self, body: &[u8]) -> ParseReport {
        self.pipeline.process(body)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Boundary Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Present the credential `said`, together with whatever it depends on.
    ///
    /// Accepted only if processing `body` saves a credential with exactly
    /// this SAID. The presentation time is then recorded against it.
    pub async fn present(&self, said: &str, body: Bytes, content_type: &str) -> Result<Presentation> {
        self.check_request(&body, content_type)?;
        let report = self.run(body).await?;

        let Some(credential) = report
            .cues
            .saved_credentials()
            .find(|c| c.said.qb64() == said)
        else {
            tracing::warn!(
                said,
                accepted = report.accepted(),
                escrowed = report.escrowed(),
                rejected = report.rejected(),
                "presentation did not verify"
            );
            return Err(VerifierError::NotVerified(said.to_string()));
        };

        let said = credential.said.clone();
        let presented_at = Dater::now();
        let store = self.store().clone();
        let (pinned, at) = (said.clone(), presented_at.clone());
        tokio::task::spawn_blocking(move || store.pin_presentation(&pinned, &at)).await??;

        tracing::info!(said = %said, at = presented_at.iso(), "credential presented");
        Ok(Presentation {
            msg: format!("{said} is a valid credential "),
            said,
            presented_at: presented_at.iso().to_string(),
        })
    }

    /// Process `body` and return every credential it verified.
    ///
    /// A body that verifies nothing yields an empty list, not an error.
    pub async fn verify(&self, body: Bytes, content_type: &str) -> Result<Verification> {
        self.check_request(&body, content_type)?;
        let report = self.run(body).await?;
        let credentials = report
            .cues
            .saved_credentials()
            .map(|c| serde_json::from_str(&c.content))
            .collect::<std::result::Result<Vec<Value>, _>>()?;
        tracing::debug!(count = credentials.len(), "verified bundle");
        Ok(Verification { credentials })
    }

    /// Liveness. Never fails and touches nothing.
    pub fn health(&self) -> Health {
        Health {
            status: "healthy",
            msg: "CESR credential verification service is healthy".to_string(),
        }
    }

    fn check_request(&self, body: &[u8], content_type: &str) -> Result<()> {
        if content_type != self.config.media_type {
            return Err(VerifierError::InvalidContentType(content_type.to_string()));
        }
        if body.len() > self.config.max_body_bytes {
            return Err(VerifierError::BodyTooLarge {
                size: body.len(),
                limit: self.config.max_body_bytes,
            });
        }
        Ok(())
    }

    /// Run the pipeline over `body` on the blocking pool.
    ///
    /// A store failure fails the request. A parse failure only ends the
    /// stream early; whatever was verified before it still counts.
    async fn run(&self, body: Bytes) -> Result<ParseReport> {
        let pipeline = self.pipeline.clone();
        let mut report = tokio::task::spawn_blocking(move || pipeline.process(&body)).await?;
        match report.failure.take() {
            Some(EventingError::Store(err)) => return Err(err.into()),
            Some(err) => {
                tracing::warn!(error = %err, "stream processing stopped early");
                report.failure = Some(err);
            }
            None => {}
        }
        Ok(report)
    }
}
