//! Transaction event log rules: registries and credential status.
//!
//! Every transaction event is anchored in its issuer's key event log: the
//! attached seal source names the issuer event whose seal list contains
//! `{i, s, d}` of the transaction event.

use cesr_verifier_core::{
    Attachments, CredentialStatus, EventSeal, Ilk, Prefix, RegistryState, Serder, SourceSeal,
    TelEvent, TelEventRecord,
};
use cesr_verifier_store::{InsertResult, Store, TelUpdate};

use crate::error::{failed, out_of_sequence, Halt, Rejection, Step};
use crate::escrow::Dependency;
use crate::report::Accepted;

/// Check that `issuer`'s key event named by `source` anchors `seal`.
///
/// An issuer event not yet accepted escrows the caller on the issuer's log.
pub(crate) fn check_anchor<S: Store>(
    store: &S,
    issuer: &Prefix,
    source: Option<&SourceSeal>,
    seal: &EventSeal,
) -> Step<()> {
    let source =
        source.ok_or_else(|| failed(format!("no seal source attached for {}", seal.said)))?;
    let Some(event) = store.get_key_event(issuer, source.sn)? else {
        return Err(Halt::Escrow(Dependency::KeyState(issuer.clone())));
    };
    if event.said != source.said {
        return Err(failed(format!(
            "seal source {} sn={} does not match accepted event {}",
            source.said, source.sn, event.said
        )));
    }
    if !event.anchors(seal) {
        return Err(failed(format!(
            "{} sn={} does not anchor {}",
            issuer, source.sn, seal.said
        )));
    }
    Ok(())
}

pub(crate) struct Tever<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> Tever<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Registry inception (`vcp`).
    pub fn incept(&self, event: &TelEvent, serder: &Serder, attachments: &Attachments) -> Step<Accepted> {
        if self.store.get_registry(&event.id)?.is_some() {
            return Err(out_of_sequence(format!("registry {} already exists", event.id)));
        }
        if event.sn != 0 {
            return Err(out_of_sequence(format!("registry inception at sn={}", event.sn)));
        }
        let issuer = event
            .issuer
            .clone()
            .ok_or_else(|| malformed("registry inception names no issuer"))?;
        if self.store.get_key_state(&issuer)?.is_none() {
            return Err(Halt::Escrow(Dependency::KeyState(issuer)));
        }

        let backers = event
            .backers
            .as_ref()
            .map(|b| b.apply(&[]))
            .transpose()
            .map_err(malformed)?
            .unwrap_or_default();
        if event.no_backers() && !backers.is_empty() {
            return Err(malformed("registry without backers lists backers"));
        }
        if event.backer_threshold > backers.len() as u64 {
            return Err(malformed(format!(
                "backer threshold {} exceeds {} backers",
                event.backer_threshold,
                backers.len()
            )));
        }

        check_anchor(self.store, &issuer, attachments.source_seals.first(), &seal_of(event))?;
        backer_support(serder, attachments, &backers, event.backer_threshold)?;

        let state = RegistryState {
            registry: event.id.clone(),
            issuer,
            sn: 0,
            said: event.said.clone(),
            backers,
            backer_threshold: event.backer_threshold,
            no_backers: event.no_backers(),
        };
        self.commit(TelUpdate::Registry(state), event, serder)?;
        Ok(Accepted::notify(Dependency::Registry(event.id.clone())))
    }

    /// Backer rotation (`vrt`).
    pub fn rotate(&self, event: &TelEvent, serder: &Serder, attachments: &Attachments) -> Step<Accepted> {
        let Some(registry) = self.store.get_registry(&event.id)? else {
            return Err(Halt::Escrow(Dependency::Registry(event.id.clone())));
        };
        if registry.no_backers {
            return Err(out_of_sequence(format!(
                "registry {} has no backers to rotate",
                event.id
            )));
        }
        if event.sn <= registry.sn {
            return Err(out_of_sequence(format!(
                "stale registry event sn={} at sn={}",
                event.sn, registry.sn
            )));
        }
        if event.sn > registry.sn + 1 {
            return Err(Halt::Escrow(Dependency::Registry(event.id.clone())));
        }
        if event.prior.as_ref() != Some(&registry.said) {
            return Err(out_of_sequence(format!(
                "prior digest of vrt sn={} does not match {}",
                event.sn, registry.said
            )));
        }

        let backers = match &event.backers {
            Some(change) => change.apply(&registry.backers).map_err(malformed)?,
            None => registry.backers.clone(),
        };
        if event.backer_threshold > backers.len() as u64 {
            return Err(malformed(format!(
                "backer threshold {} exceeds {} backers",
                event.backer_threshold,
                backers.len()
            )));
        }

        check_anchor(
            self.store,
            &registry.issuer,
            attachments.source_seals.first(),
            &seal_of(event),
        )?;
        backer_support(serder, attachments, &backers, event.backer_threshold)?;

        let state = RegistryState {
            sn: event.sn,
            said: event.said.clone(),
            backers,
            backer_threshold: event.backer_threshold,
            ..registry
        };
        self.commit(TelUpdate::Registry(state), event, serder)?;
        Ok(Accepted::notify(Dependency::Registry(event.id.clone())))
    }

    /// Credential issuance (`iss`, `bis`).
    pub fn issue(&self, event: &TelEvent, serder: &Serder, attachments: &Attachments) -> Step<Accepted> {
        let Some(registry) = self.store.get_registry(&event.registry)? else {
            return Err(Halt::Escrow(Dependency::Registry(event.registry.clone())));
        };
        if self.store.get_credential_status(&event.id)?.is_some() {
            return Err(out_of_sequence(format!("credential {} already issued", event.id)));
        }
        if event.sn != 0 {
            return Err(out_of_sequence(format!("issuance at sn={}", event.sn)));
        }
        check_kind(&registry, event)?;
        if let Some(issuer) = &event.issuer {
            if *issuer != registry.issuer {
                return Err(failed(format!(
                    "issuance names issuer {issuer}, registry belongs to {}",
                    registry.issuer
                )));
            }
        }
        self.check_registry_anchor(event)?;

        check_anchor(
            self.store,
            &registry.issuer,
            attachments.source_seals.first(),
            &seal_of(event),
        )?;
        backer_support(serder, attachments, &registry.backers, registry.backer_threshold)?;

        let status = CredentialStatus {
            credential: event.id.clone(),
            registry: registry.registry.clone(),
            issuance: event.said.clone(),
            sn: 0,
            said: event.said.clone(),
            issued_at: event.datetime.clone(),
            revoked_at: None,
        };
        self.commit(TelUpdate::Credential(status), event, serder)?;
        Ok(Accepted::notify(Dependency::Issuance(event.id.clone())))
    }

    /// Credential revocation (`rev`, `brv`).
    pub fn revoke(&self, event: &TelEvent, serder: &Serder, attachments: &Attachments) -> Step<Accepted> {
        let Some(status) = self.store.get_credential_status(&event.id)? else {
            return Err(out_of_sequence(format!(
                "revocation of {} before its issuance",
                event.id
            )));
        };
        if status.is_revoked() {
            return Err(out_of_sequence(format!("credential {} already revoked", event.id)));
        }
        if event.sn != status.sn + 1 {
            return Err(out_of_sequence(format!("revocation at sn={}", event.sn)));
        }
        if event.prior.as_ref() != Some(&status.said) {
            return Err(out_of_sequence(format!(
                "revocation of {} does not follow its issuance {}",
                event.id, status.said
            )));
        }
        if event.registry != status.registry {
            return Err(failed(format!(
                "revocation names registry {}, credential was issued in {}",
                event.registry, status.registry
            )));
        }
        let Some(registry) = self.store.get_registry(&status.registry)? else {
            return Err(Halt::Escrow(Dependency::Registry(status.registry.clone())));
        };
        check_kind(&registry, event)?;
        self.check_registry_anchor(event)?;

        check_anchor(
            self.store,
            &registry.issuer,
            attachments.source_seals.first(),
            &seal_of(event),
        )?;
        backer_support(serder, attachments, &registry.backers, registry.backer_threshold)?;

        let status = CredentialStatus {
            sn: event.sn,
            said: event.said.clone(),
            revoked_at: event.datetime.clone(),
            ..status
        };
        self.commit(TelUpdate::Credential(status), event, serder)?;
        Ok(Accepted::notify(Dependency::Issuance(event.id.clone())))
    }

    /// Backed status events name the registry event they build on in `ra`.
    fn check_registry_anchor(&self, event: &TelEvent) -> Step<()> {
        let Some(ra) = &event.registry_anchor else {
            return Ok(());
        };
        let Some(anchored) = self.store.get_tel_event(&event.registry, ra.sn)? else {
            return Err(Halt::Escrow(Dependency::Registry(event.registry.clone())));
        };
        if anchored.said != ra.said {
            return Err(failed(format!(
                "registry anchor {} sn={} does not match {}",
                ra.said, ra.sn, anchored.said
            )));
        }
        Ok(())
    }

    fn commit(&self, update: TelUpdate, event: &TelEvent, serder: &Serder) -> Step<()> {
        let record = TelEventRecord {
            id: event.id.clone(),
            sn: event.sn,
            said: event.said.clone(),
            ilk: event.ilk,
            registry: event.registry.clone(),
            raw: serder.raw().clone(),
        };
        if self.store.commit_tel_event(&update, &record)? == InsertResult::AlreadyExists {
            return Err(out_of_sequence(format!(
                "duplicate {} sn={} for {}",
                event.ilk, event.sn, event.id
            )));
        }
        tracing::debug!(
            id = %event.id,
            registry = %event.registry,
            sn = event.sn,
            ilk = %event.ilk,
            "accepted transaction event"
        );
        Ok(())
    }
}

/// `iss`/`rev` belong in registries without backers, `bis`/`brv` in
/// backed ones.
fn check_kind(registry: &RegistryState, event: &TelEvent) -> Step<()> {
    let unbacked = matches!(event.ilk, Ilk::Iss | Ilk::Rev);
    if registry.no_backers != unbacked {
        return Err(out_of_sequence(format!(
            "{} does not fit registry {}",
            event.ilk, registry.registry
        )));
    }
    Ok(())
}

fn seal_of(event: &TelEvent) -> EventSeal {
    EventSeal {
        prefix: event.id.as_prefix(),
        sn: event.sn,
        said: event.said.clone(),
    }
}

fn malformed(reason: impl Into<String>) -> Halt {
    Halt::Reject(Rejection::Malformed(reason.into()))
}

/// Require `threshold` distinct listed backers to have receipted the event.
fn backer_support(
    serder: &Serder,
    attachments: &Attachments,
    backers: &[Prefix],
    threshold: u64,
) -> Step<()> {
    if threshold == 0 {
        return Ok(());
    }
    let mut receipted: Vec<&Prefix> = attachments
        .receipt_couples
        .iter()
        .filter(|c| backers.contains(&c.witness) && c.verify(serder.raw()))
        .map(|c| &c.witness)
        .collect();
    receipted.sort();
    receipted.dedup();
    if (receipted.len() as u64) < threshold {
        return Err(failed(format!(
            "{} of {threshold} backer receipts",
            receipted.len()
        )));
    }
    Ok(())
}
