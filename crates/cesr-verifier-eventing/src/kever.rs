//! Key event log rules.
//!
//! An identifier is either unseen or active. Inception activates it;
//! rotation and interaction advance it by exactly one sequence number.
//! Anything that fails a check leaves the stored state untouched.

use std::collections::BTreeSet;

use cesr_verifier_core::{
    parse, Attachments, Establishment, Ilk, KeyEvent, KeyEventRecord, KeyState,
    LastEstablishment, Message, Prefix, ReceiptCouple, ReceiptEvent, Serder, Siger, Verfer,
};
use cesr_verifier_store::{InsertResult, Store};

use crate::cue::Cue;
use crate::error::{failed, Halt, Rejection, Step};
use crate::escrow::Dependency;
use crate::pipeline::PipelineConfig;
use crate::report::Accepted;

pub(crate) struct Kever<'a, S: Store> {
    store: &'a S,
    config: &'a PipelineConfig,
}

impl<'a, S: Store> Kever<'a, S> {
    pub fn new(store: &'a S, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Apply an inception, rotation or interaction event.
    pub fn process_event(
        &self,
        event: &KeyEvent,
        serder: &Serder,
        attachments: &Attachments,
    ) -> Step<Accepted> {
        let Some(state) = self.store.get_key_state(&event.prefix)? else {
            if event.ilk == Ilk::Icp {
                return self.incept(event, serder, attachments);
            }
            return Err(Halt::Escrow(Dependency::KeyState(event.prefix.clone())));
        };

        if event.ilk == Ilk::Icp || event.sn <= state.sn {
            return Err(failed(format!(
                "duplicate event {} sn={} for {} at sn={}",
                event.ilk, event.sn, event.prefix, state.sn
            )));
        }
        if event.sn > state.sn + 1 {
            return Err(Halt::Escrow(Dependency::KeyState(event.prefix.clone())));
        }
        if event.prior.as_ref() != Some(&state.said) {
            return Err(failed(format!(
                "prior digest of {} sn={} does not match {}",
                event.ilk, event.sn, state.said
            )));
        }

        match event.ilk {
            Ilk::Rot => self.rotate(state, event, serder, attachments),
            Ilk::Ixn => self.interact(state, event, serder, attachments),
            other => Err(Halt::Reject(Rejection::Unsupported(other.to_string()))),
        }
    }

    fn incept(&self, event: &KeyEvent, serder: &Serder, attachments: &Attachments) -> Step<Accepted> {
        let est = establishment(event)?;
        if event.sn != 0 {
            return Err(failed(format!("inception at sn={}", event.sn)));
        }
        validate_thresholds(est)?;

        if let Some(said) = event.prefix.as_said() {
            if said != event.said {
                return Err(failed("self-addressing prefix does not match event digest"));
            }
        } else {
            let [key] = est.keys.as_slice() else {
                return Err(failed("basic prefix requires exactly one key"));
            };
            if key.qb64() != event.prefix.qb64() {
                return Err(failed("basic prefix does not match its key"));
            }
            if !event.prefix.is_transferable() && !est.next_digests.is_empty() {
                return Err(failed("non-transferable prefix commits to next keys"));
            }
        }

        let witnesses = est.witnesses.apply(&[]).map_err(failed)?;
        check_witness_threshold(est.witness_threshold, witnesses.len())?;

        let signers = verified_signers(&est.keys, serder.raw(), &attachments.controller_sigs);
        if !est.signing_threshold.satisfied_by(&signers) {
            return Err(failed(format!(
                "signing threshold not met for inception of {}",
                event.prefix
            )));
        }

        let witnessed =
            self.witness_support(event, serder, attachments, &witnesses, est.witness_threshold)?;

        let state = KeyState {
            prefix: event.prefix.clone(),
            sn: 0,
            said: event.said.clone(),
            last_establishment: LastEstablishment {
                sn: 0,
                said: event.said.clone(),
            },
            keys: est.keys.clone(),
            signing_threshold: est.signing_threshold.clone(),
            next_digests: est.next_digests.clone(),
            next_threshold: est.next_threshold.clone(),
            witnesses,
            witness_threshold: est.witness_threshold,
            config: est.config.clone(),
        };
        self.commit(state, event, serder, witnessed)
    }

    fn rotate(
        &self,
        prior: KeyState,
        event: &KeyEvent,
        serder: &Serder,
        attachments: &Attachments,
    ) -> Step<Accepted> {
        let est = establishment(event)?;
        if !prior.is_transferable() {
            return Err(failed(format!("{} cannot rotate", event.prefix)));
        }
        validate_thresholds(est)?;

        let signers = verified_signers(&est.keys, serder.raw(), &attachments.controller_sigs);
        if !est.signing_threshold.satisfied_by(&signers) {
            return Err(failed(format!(
                "signing threshold not met for rotation of {} sn={}",
                event.prefix, event.sn
            )));
        }

        // Positions in the prior next list exposed by verified signers.
        let exposed: BTreeSet<usize> = attachments
            .controller_sigs
            .iter()
            .filter(|siger| signers.contains(&siger.index()))
            .filter_map(|siger| {
                let ondex = siger.ondex()?;
                let key = est.keys.get(siger.index())?;
                let digest = prior.next_digests.get(ondex)?;
                digest.verifies(key.qb64().as_bytes()).then_some(ondex)
            })
            .collect();
        if !prior.next_threshold.satisfied_by(&exposed) {
            return Err(failed(format!(
                "rotation of {} sn={} does not satisfy prior next threshold",
                event.prefix, event.sn
            )));
        }

        let witnesses = est.witnesses.apply(&prior.witnesses).map_err(failed)?;
        check_witness_threshold(est.witness_threshold, witnesses.len())?;
        let witnessed =
            self.witness_support(event, serder, attachments, &witnesses, est.witness_threshold)?;

        let state = KeyState {
            sn: event.sn,
            said: event.said.clone(),
            last_establishment: LastEstablishment {
                sn: event.sn,
                said: event.said.clone(),
            },
            keys: est.keys.clone(),
            signing_threshold: est.signing_threshold.clone(),
            next_digests: est.next_digests.clone(),
            next_threshold: est.next_threshold.clone(),
            witnesses,
            witness_threshold: est.witness_threshold,
            ..prior
        };
        self.commit(state, event, serder, witnessed)
    }

    fn interact(
        &self,
        prior: KeyState,
        event: &KeyEvent,
        serder: &Serder,
        attachments: &Attachments,
    ) -> Step<Accepted> {
        if prior.establishment_only() {
            return Err(failed(format!(
                "{} is establishment-only and accepts no interaction events",
                event.prefix
            )));
        }
        if !prior.is_transferable() {
            return Err(failed(format!("{} is non-transferable", event.prefix)));
        }

        let signers = verified_signers(&prior.keys, serder.raw(), &attachments.controller_sigs);
        if !prior.signing_threshold.satisfied_by(&signers) {
            return Err(failed(format!(
                "signing threshold not met for interaction of {} sn={}",
                event.prefix, event.sn
            )));
        }

        let witnessed = self.witness_support(
            event,
            serder,
            attachments,
            &prior.witnesses,
            prior.witness_threshold,
        )?;

        let state = KeyState {
            sn: event.sn,
            said: event.said.clone(),
            ..prior
        };
        self.commit(state, event, serder, witnessed)
    }

    /// Collect valid witness signatures for an event and check there are
    /// at least `threshold` distinct ones.
    ///
    /// Indexed witness signatures, attached couples and couples from receipts
    /// escrowed ahead of the event are returned so they can be stored with
    /// the event; receipts already on file count too.
    fn witness_support(
        &self,
        event: &KeyEvent,
        serder: &Serder,
        attachments: &Attachments,
        witnesses: &[Prefix],
        threshold: u64,
    ) -> Step<Vec<ReceiptCouple>> {
        let raw = serder.raw();
        let mut couples: Vec<ReceiptCouple> = attachments
            .witness_sigs
            .iter()
            .filter_map(|siger| {
                let witness = witnesses.get(siger.index())?;
                let couple = ReceiptCouple {
                    witness: witness.clone(),
                    signature: *siger.signature(),
                };
                couple.verify(raw).then_some(couple)
            })
            .collect();
        couples.extend(
            attachments
                .receipt_couples
                .iter()
                .filter(|c| witnesses.contains(&c.witness) && c.verify(raw))
                .cloned(),
        );
        if threshold == 0 {
            return Ok(couples);
        }

        couples.extend(
            self.early_receipts(event)?
                .into_iter()
                .filter(|c| witnesses.contains(&c.witness) && c.verify(raw)),
        );
        let stored = self.store.get_receipts(&event.prefix, &event.said)?;
        let distinct: BTreeSet<String> = couples
            .iter()
            .chain(
                stored
                    .iter()
                    .filter(|c| witnesses.contains(&c.witness) && c.verify(raw)),
            )
            .map(|c| c.witness.qb64())
            .collect();
        if (distinct.len() as u64) < threshold {
            tracing::debug!(
                prefix = %event.prefix,
                sn = event.sn,
                receipts = distinct.len(),
                threshold,
                "waiting for witness receipts"
            );
            return Err(Halt::Escrow(Dependency::WitnessReceipts(event.prefix.clone())));
        }
        Ok(couples)
    }

    /// Couples of receipts escrowed for `event` before it was accepted.
    ///
    /// They stay in escrow and are verified on their own once the event
    /// commits; here they only count towards its witness threshold.
    fn early_receipts(&self, event: &KeyEvent) -> Step<Vec<ReceiptCouple>> {
        let key = Dependency::ReceiptedEvent(event.prefix.clone()).key();
        let mut couples = Vec::new();
        for entry in self.store.escrow_peek(&key)? {
            let Some(Ok(group)) = parse(&entry.raw).next() else {
                continue;
            };
            if let Ok(Message::Receipt(receipt)) = Message::from_serder(&group.serder) {
                if receipt.sn == event.sn && receipt.said == event.said {
                    couples.extend(group.attachments.receipt_couples);
                }
            }
        }
        Ok(couples)
    }

    fn commit(
        &self,
        state: KeyState,
        event: &KeyEvent,
        serder: &Serder,
        witnessed: Vec<ReceiptCouple>,
    ) -> Step<Accepted> {
        let record = KeyEventRecord {
            prefix: event.prefix.clone(),
            sn: event.sn,
            said: event.said.clone(),
            ilk: event.ilk,
            raw: serder.raw().clone(),
            seals: event.event_seals().cloned().collect(),
        };
        if self.store.commit_key_event(&state, &record)? == InsertResult::AlreadyExists {
            return Err(failed(format!(
                "duplicate event {} sn={} for {}",
                event.ilk, event.sn, event.prefix
            )));
        }
        if !witnessed.is_empty() {
            self.store
                .add_receipts(&event.prefix, &event.said, &witnessed)?;
        }

        tracing::debug!(
            prefix = %event.prefix,
            sn = event.sn,
            said = %event.said,
            ilk = %event.ilk,
            "accepted key event"
        );

        let mut accepted = Accepted::notify(Dependency::KeyState(event.prefix.clone()))
            .and_notify(Dependency::ReceiptedEvent(event.prefix.clone()));
        if self.config.cue_key_events {
            accepted = accepted.with_cue(Cue::EventVerified {
                prefix: event.prefix.clone(),
                sn: event.sn,
                said: event.said.clone(),
            });
        }
        if self.config.cue_receipts {
            accepted = accepted.with_cue(Cue::ReceiptNeeded {
                prefix: event.prefix.clone(),
                sn: event.sn,
                said: event.said.clone(),
            });
        }
        Ok(accepted)
    }

    /// Record witness receipts for an accepted event.
    ///
    /// Only couples that verify against the event body are stored. Receipts
    /// for an event not yet accepted wait in escrow until it is.
    pub fn process_receipt(
        &self,
        receipt: &ReceiptEvent,
        attachments: &Attachments,
    ) -> Step<Accepted> {
        if attachments.receipt_couples.is_empty() {
            return Err(Halt::Reject(Rejection::Malformed(
                "receipt carries no receipt couples".into(),
            )));
        }

        let Some(record) = self.store.get_key_event(&receipt.prefix, receipt.sn)? else {
            return Err(Halt::Escrow(Dependency::ReceiptedEvent(
                receipt.prefix.clone(),
            )));
        };
        if record.said != receipt.said {
            return Err(failed(format!(
                "receipt for {} sn={} names {}, accepted event is {}",
                receipt.prefix, receipt.sn, receipt.said, record.said
            )));
        }
        let valid: Vec<ReceiptCouple> = attachments
            .receipt_couples
            .iter()
            .filter(|c| c.verify(&record.raw))
            .cloned()
            .collect();
        if valid.is_empty() {
            return Err(failed(format!(
                "no valid receipt signature for {} sn={}",
                receipt.prefix, receipt.sn
            )));
        }
        let added = self
            .store
            .add_receipts(&receipt.prefix, &receipt.said, &valid)?;
        tracing::debug!(prefix = %receipt.prefix, sn = receipt.sn, added, "stored receipts");

        Ok(Accepted::notify(Dependency::WitnessReceipts(
            receipt.prefix.clone(),
        )))
    }
}

fn establishment(event: &KeyEvent) -> Step<&Establishment> {
    event
        .establishment
        .as_ref()
        .ok_or_else(|| Halt::Reject(Rejection::Malformed(format!("{} lacks key fields", event.ilk))))
}

fn validate_thresholds(est: &Establishment) -> Step<()> {
    est.signing_threshold
        .validate(est.keys.len())
        .map_err(|e| failed(format!("kt: {e}")))?;
    est.next_threshold
        .validate(est.next_digests.len())
        .map_err(|e| failed(format!("nt: {e}")))
}

fn check_witness_threshold(threshold: u64, witnesses: usize) -> Step<()> {
    if threshold > witnesses as u64 {
        return Err(failed(format!(
            "witness threshold {threshold} exceeds {witnesses} witnesses"
        )));
    }
    if threshold == 0 && witnesses > 0 {
        return Err(failed("zero witness threshold with witnesses"));
    }
    Ok(())
}

/// Indices of `keys` with a valid signature over `raw`.
fn verified_signers(keys: &[Verfer], raw: &[u8], sigers: &[Siger]) -> BTreeSet<usize> {
    sigers
        .iter()
        .filter(|siger| {
            keys.get(siger.index())
                .is_some_and(|key| key.verify(raw, siger.signature()).is_ok())
        })
        .map(Siger::index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cesr_verifier_core::{Keypair, Tholder};

    #[test]
    fn test_verified_signers_ignores_bad_and_out_of_range() {
        let a = Keypair::from_seed(&[1; 32]);
        let b = Keypair::from_seed(&[2; 32]);
        let keys = vec![a.verfer(), b.verfer()];
        let sigers = vec![
            Siger::new(0, a.sign(b"body")),
            Siger::new(1, a.sign(b"body")),
            Siger::new(5, b.sign(b"body")),
        ];
        let signers = verified_signers(&keys, b"body", &sigers);
        assert_eq!(signers.into_iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_witness_threshold_bounds() {
        assert!(check_witness_threshold(0, 0).is_ok());
        assert!(check_witness_threshold(2, 3).is_ok());
        assert!(check_witness_threshold(4, 3).is_err());
        assert!(check_witness_threshold(0, 1).is_err());
    }

    #[test]
    fn test_threshold_validation() {
        let key = Keypair::from_seed(&[3; 32]).verfer();
        let est = Establishment {
            signing_threshold: Tholder::Unweighted(2),
            keys: vec![key],
            next_threshold: Tholder::Unweighted(0),
            next_digests: vec![],
            witness_threshold: 0,
            witnesses: cesr_verifier_core::WitnessChange::Initial(vec![]),
            config: vec![],
        };
        assert!(validate_thresholds(&est).is_err());
    }
}
