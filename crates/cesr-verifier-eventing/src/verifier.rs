//! Credential verification.
//!
//! A credential is accepted only once its issuer, its issuance status, its
//! schema and every edge source are known and check out. Anything still
//! missing escrows it on that dependency.

use cesr_verifier_core::{Attachments, Credential, Dater, MessageGroup, VerifiedCredential};
use cesr_verifier_store::{InsertResult, Store};

use crate::cue::Cue;
use crate::error::{failed, Halt, Rejection, Step};
use crate::escrow::Dependency;
use crate::report::Accepted;
use crate::schema::{SchemaResolver, SchemaStatus};

pub(crate) struct CredentialVerifier<'a, S: Store> {
    store: &'a S,
    schemas: &'a dyn SchemaResolver,
}

impl<'a, S: Store> CredentialVerifier<'a, S> {
    pub fn new(store: &'a S, schemas: &'a dyn SchemaResolver) -> Self {
        Self { store, schemas }
    }

    /// Verify a credential whose SAIDs were already checked when it was read.
    pub fn verify(&self, credential: &Credential, group: &MessageGroup) -> Step<Accepted> {
        if self.store.get_credential(&credential.said)?.is_some() {
            return Err(failed(format!(
                "credential {} is already verified",
                credential.said
            )));
        }
        if self.store.get_key_state(&credential.issuer)?.is_none() {
            return Err(Halt::Escrow(Dependency::KeyState(credential.issuer.clone())));
        }

        self.check_sources(credential, &group.attachments)?;
        self.check_status(credential)?;
        self.check_schema(credential)?;
        self.check_edges(credential)?;

        let content = serde_json::to_string(&credential.sad)
            .map_err(|e| Halt::Reject(Rejection::Malformed(e.to_string())))?;
        let verified = VerifiedCredential {
            said: credential.said.clone(),
            issuer: credential.issuer.clone(),
            recipient: credential.recipient.clone(),
            schema: credential.schema.clone(),
            registry: credential.registry.clone(),
            content,
            raw: group.raw().clone(),
            verified_at: Dater::now().iso().to_string(),
        };
        if self.store.put_credential(&verified)? == InsertResult::AlreadyExists {
            return Err(failed(format!(
                "credential {} is already verified",
                credential.said
            )));
        }

        tracing::info!(
            said = %credential.said,
            issuer = %credential.issuer,
            schema = %credential.schema,
            "credential verified"
        );

        Ok(Accepted::notify(Dependency::Credential(credential.said.clone()))
            .with_cue(Cue::CredentialSaved {
                credential: verified,
            }))
    }

    /// Attached `-I` triples must name the issuer's key event or the
    /// credential's own issuance event.
    fn check_sources(&self, credential: &Credential, attachments: &Attachments) -> Step<()> {
        for triple in &attachments.source_triples {
            if triple.prefix == credential.issuer {
                let Some(event) = self.store.get_key_event(&triple.prefix, triple.sn)? else {
                    return Err(Halt::Escrow(Dependency::KeyState(triple.prefix.clone())));
                };
                if event.said != triple.said {
                    return Err(failed(format!(
                        "source seal {} sn={} does not match issuer event {}",
                        triple.said, triple.sn, event.said
                    )));
                }
            } else if triple.prefix.as_said().as_ref() == Some(&credential.said) {
                let Some(event) = self.store.get_tel_event(&credential.said, triple.sn)? else {
                    return Err(Halt::Escrow(Dependency::Issuance(credential.said.clone())));
                };
                if event.said != triple.said {
                    return Err(failed(format!(
                        "source seal {} sn={} does not match status event {}",
                        triple.said, triple.sn, event.said
                    )));
                }
            } else {
                return Err(failed(format!(
                    "source seal names {}, neither the issuer nor the credential",
                    triple.prefix
                )));
            }
        }
        Ok(())
    }

    fn check_status(&self, credential: &Credential) -> Step<()> {
        let Some(registry_id) = &credential.registry else {
            return Err(failed(format!(
                "credential {} names no registry to check its issuance against",
                credential.said
            )));
        };
        let Some(status) = self.store.get_credential_status(&credential.said)? else {
            return Err(Halt::Escrow(Dependency::Issuance(credential.said.clone())));
        };
        if status.is_revoked() {
            return Err(Halt::Reject(Rejection::CredentialRevoked(
                credential.said.to_string(),
            )));
        }
        if status.registry != *registry_id {
            return Err(failed(format!(
                "credential names registry {registry_id}, issued in {}",
                status.registry
            )));
        }
        let Some(registry) = self.store.get_registry(registry_id)? else {
            return Err(Halt::Escrow(Dependency::Registry(registry_id.clone())));
        };
        if registry.issuer != credential.issuer {
            return Err(failed(format!(
                "registry {registry_id} belongs to {}, not {}",
                registry.issuer, credential.issuer
            )));
        }
        Ok(())
    }

    fn check_schema(&self, credential: &Credential) -> Step<()> {
        match self.schemas.resolve(&credential.schema, &credential.sad) {
            SchemaStatus::Valid => Ok(()),
            SchemaStatus::Invalid(reason) => Err(Halt::Reject(Rejection::SchemaInvalid(reason))),
            SchemaStatus::Unknown => Err(Halt::Escrow(Dependency::Schema(
                credential.schema.clone(),
            ))),
        }
    }

    fn check_edges(&self, credential: &Credential) -> Step<()> {
        for edge in &credential.edges {
            let Some(source) = self.store.get_credential(&edge.node)? else {
                return Err(Halt::Escrow(Dependency::Credential(edge.node.clone())));
            };
            if let Some(schema) = &edge.schema {
                if *schema != source.schema {
                    return Err(failed(format!(
                        "edge {} requires schema {schema}, source has {}",
                        edge.label, source.schema
                    )));
                }
            }
            if source.registry.is_some() {
                let revoked = self
                    .store
                    .get_credential_status(&source.said)?
                    .is_some_and(|s| s.is_revoked());
                if revoked {
                    return Err(failed(format!(
                        "edge {} source {} has been revoked",
                        edge.label, source.said
                    )));
                }
            }
            if edge.operator.requires_recipient_match()
                && source.recipient.as_ref() != Some(&credential.issuer)
            {
                return Err(failed(format!(
                    "edge {} source {} was not issued to {}",
                    edge.label, source.said, credential.issuer
                )));
            }
        }
        Ok(())
    }
}
