//! Verifier configuration.

use std::time::Duration;

use cesr_verifier_eventing::PipelineConfig;

/// Media type every presented or verified body must carry.
pub const CESR_MEDIA_TYPE: &str = "application/json+cesr";

/// Configuration for the Verifier.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Required content type of request bodies.
    pub media_type: String,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Emit a cue for every accepted key event.
    pub cue_key_events: bool,
    /// Emit a cue for every accepted key event this node could receipt.
    pub cue_receipts: bool,
    /// How long a message group may wait in escrow.
    pub escrow_timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            media_type: CESR_MEDIA_TYPE.to_string(),
            max_body_bytes: 4 * 1024 * 1024,
            cue_key_events: false,
            cue_receipts: false,
            escrow_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl VerifierConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            cue_key_events: self.cue_key_events,
            cue_receipts: self.cue_receipts,
            escrow_timeout: self.escrow_timeout,
        }
    }
}
