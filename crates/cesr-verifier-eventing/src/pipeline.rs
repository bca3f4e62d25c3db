//! The processing pipeline.
//!
//! Feeds every group of a stream through the key event, transaction event
//! and credential rules, files undecidable groups in escrow, and re-runs
//! escrowed groups as soon as something they wait for is accepted.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cesr_verifier_core::{parse, Message, MessageGroup};
use cesr_verifier_store::Store;

use crate::error::{EventingError, Halt, Rejection, Result, Step};
use crate::escrow::{Dependency, Escrow};
use crate::kever::Kever;
use crate::locks::KeyedLocks;
use crate::report::{Accepted, Disposition, GroupOutcome, ParseReport};
use crate::schema::{AcceptAllSchemas, SchemaResolver};
use crate::tever::Tever;
use crate::verifier::CredentialVerifier;

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Emit a cue for every accepted key event.
    pub cue_key_events: bool,
    /// Emit a cue for every accepted key event this node could receipt.
    pub cue_receipts: bool,
    /// How long a group may wait in escrow.
    pub escrow_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cue_key_events: false,
            cue_receipts: false,
            escrow_timeout: Duration::from_secs(60 * 60),
        }
    }
}

pub struct Pipeline<S: Store> {
    store: Arc<S>,
    escrow: Escrow<S>,
    locks: KeyedLocks,
    notifications: Notifications,
    schemas: Arc<dyn SchemaResolver>,
    config: PipelineConfig,
}

impl<S: Store> Pipeline<S> {
    /// Create a pipeline that accepts every schema.
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            escrow: Escrow::new(store.clone(), config.escrow_timeout),
            store,
            locks: KeyedLocks::new(),
            notifications: Notifications::new(),
            schemas: Arc::new(AcceptAllSchemas),
            config,
        }
    }

    /// Use `schemas` to decide whether credentials fit their schema.
    pub fn with_schema_resolver(mut self, schemas: Arc<dyn SchemaResolver>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn escrow(&self) -> &Escrow<S> {
        &self.escrow
    }

    /// Process every message group in `buf`.
    ///
    /// Groups are handled in stream order. A rejected group does not stop
    /// the stream; a parse or store failure stops it and is reported in
    /// [`ParseReport::failure`], with earlier groups keeping their effects.
    pub fn process(&self, buf: &[u8]) -> ParseReport {
        let mut report = ParseReport::default();
        if let Err(err) = self.escrow.purge_expired() {
            report.failure = Some(err.into());
            return report;
        }

        for item in parse(buf) {
            let group = match item {
                Ok(group) => group,
                Err(err) => {
                    tracing::warn!(offset = err.offset(), error = %err, "stream parse failed");
                    report.failure = Some(EventingError::Parse(err));
                    break;
                }
            };
            if let Err(err) = self.handle_and_drain(&group, &mut report) {
                report.failure = Some(err);
                break;
            }
        }

        tracing::debug!(
            accepted = report.accepted(),
            escrowed = report.escrowed(),
            rejected = report.rejected(),
            cues = report.cues.len(),
            "processed stream"
        );
        report
    }

    /// Re-run every group escrowed on `dependency`.
    ///
    /// Dependencies the pipeline cannot observe itself, such as a schema
    /// becoming available, are released this way.
    pub fn retry(&self, dependency: &Dependency) -> ParseReport {
        let mut report = ParseReport::default();
        self.notifications.record(dependency);
        let pending = VecDeque::from([dependency.clone()]);
        if let Err(err) = self.drain(pending, &mut report) {
            report.failure = Some(err);
        }
        report
    }

    fn handle_and_drain(&self, group: &MessageGroup, report: &mut ParseReport) -> Result<()> {
        let notify = self.handle(group, None, report)?;
        self.drain(notify.into(), report)
    }

    /// Release escrowed groups for each satisfied dependency, following
    /// any further dependencies their acceptance satisfies.
    fn drain(&self, mut pending: VecDeque<Dependency>, report: &mut ParseReport) -> Result<()> {
        while let Some(dependency) = pending.pop_front() {
            for entry in self.escrow.release(&dependency)? {
                let group = match parse(&entry.raw).next() {
                    Some(Ok(group)) => group,
                    Some(Err(err)) => {
                        tracing::warn!(entry = %entry.id, error = %err, "dropped unreadable escrow entry");
                        continue;
                    }
                    None => continue,
                };
                tracing::debug!(dependency = %dependency, entry = %entry.id, "retrying escrowed group");
                pending.extend(self.handle(&group, Some(entry.escrowed_at), report)?);
            }
        }
        Ok(())
    }

    /// Decide one group and record its outcome.
    ///
    /// `since` is set for groups coming out of escrow. Returns the
    /// dependencies satisfied by accepting the group.
    fn handle(
        &self,
        group: &MessageGroup,
        since: Option<i64>,
        report: &mut ParseReport,
    ) -> Result<Vec<Dependency>> {
        let retried = since.is_some();
        let message = match Message::from_serder(&group.serder) {
            Ok(message) => message,
            Err(err) => {
                let label = group.serder.ilk().unwrap_or("acdc").to_string();
                let rejection = Rejection::from(err);
                tracing::warn!(group = %label, offset = group.offset(), reason = %rejection, "rejected message group");
                report.outcomes.push(GroupOutcome {
                    label,
                    disposition: Disposition::Rejected(rejection),
                    retried,
                });
                return Ok(Vec::new());
            }
        };

        let label = message.label();
        let generation = self.notifications.current();
        let step = self
            .locks
            .with_lock(&lock_key(&message), || self.dispatch(&message, group));

        match step {
            Ok(accepted) => {
                for dependency in &accepted.notify {
                    self.notifications.record(dependency);
                }
                report.cues.extend(accepted.cues);
                report.outcomes.push(GroupOutcome {
                    label,
                    disposition: Disposition::Accepted,
                    retried,
                });
                Ok(accepted.notify)
            }
            Err(Halt::Escrow(dependency)) => {
                self.escrow.park(&dependency, group.raw(), since)?;
                let mut wake = Vec::new();
                // Satisfied between the check and the park: nobody else
                // will release this group.
                if self.notifications.since(&dependency, generation) {
                    wake.push(dependency.clone());
                }
                if !retried {
                    wake.extend(dependency.wakes());
                    tracing::debug!(group = %label, dependency = %dependency, "escrowed message group");
                    report.outcomes.push(GroupOutcome {
                        label,
                        disposition: Disposition::Escrowed(dependency),
                        retried,
                    });
                }
                Ok(wake)
            }
            Err(Halt::Reject(rejection)) => {
                tracing::warn!(group = %label, reason = %rejection, "rejected message group");
                report.outcomes.push(GroupOutcome {
                    label,
                    disposition: Disposition::Rejected(rejection),
                    retried,
                });
                Ok(Vec::new())
            }
            Err(Halt::Store(err)) => Err(err.into()),
        }
    }

    fn dispatch(&self, message: &Message, group: &MessageGroup) -> Step<Accepted> {
        let store = self.store.as_ref();
        let serder = &group.serder;
        let attachments = &group.attachments;
        match message {
            Message::Inception(event) | Message::Rotation(event) | Message::Interaction(event) => {
                Kever::new(store, &self.config).process_event(event, serder, attachments)
            }
            Message::Receipt(receipt) => {
                Kever::new(store, &self.config).process_receipt(receipt, attachments)
            }
            Message::RegistryInception(event) => {
                Tever::new(store).incept(event, serder, attachments)
            }
            Message::RegistryRotation(event) => Tever::new(store).rotate(event, serder, attachments),
            Message::Issuance(event) => Tever::new(store).issue(event, serder, attachments),
            Message::Revocation(event) => Tever::new(store).revoke(event, serder, attachments),
            Message::Credential(credential) => {
                CredentialVerifier::new(store, self.schemas.as_ref()).verify(credential, group)
            }
        }
    }
}

const STRIPES: usize = 64;

/// Generation of the latest notification per stripe of dependencies.
///
/// A group parked after its dependency was notified is retried at once.
/// Stripes shared by unrelated dependencies only cost an extra retry.
struct Notifications {
    generation: AtomicU64,
    stripes: Vec<AtomicU64>,
}

impl Notifications {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            stripes: (0..STRIPES).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn record(&self, dependency: &Dependency) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stripe(dependency).fetch_max(generation, Ordering::SeqCst);
    }

    /// Whether `dependency` may have been notified after `generation`.
    fn since(&self, dependency: &Dependency, generation: u64) -> bool {
        self.stripe(dependency).load(Ordering::SeqCst) > generation
    }

    fn stripe(&self, dependency: &Dependency) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        dependency.hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % STRIPES]
    }
}

/// State a message mutates, serialized across concurrent callers.
fn lock_key(message: &Message) -> String {
    match message {
        Message::Inception(e) | Message::Rotation(e) | Message::Interaction(e) => {
            format!("kel:{}", e.prefix)
        }
        Message::Receipt(r) => format!("kel:{}", r.prefix),
        // Status events read the registry's backers, so they share its lock.
        Message::RegistryInception(e)
        | Message::RegistryRotation(e)
        | Message::Issuance(e)
        | Message::Revocation(e) => format!("tel:{}", e.registry),
        Message::Credential(c) => format!("acdc:{}", c.said),
    }
}
