//! Typed key events, transaction events and receipts.
//!
//! [`Message`] is the single sum type the pipeline dispatches on. Building
//! one from a [`Serder`] checks field presence and types and verifies the
//! body's SAID, but applies no state rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::credential::Credential;
use crate::error::MessageError;
use crate::said::verify_said;
use crate::serder::{Protocol, Sad, Serder};
use crate::tholder::Tholder;
use crate::types::{Prefix, Said, Verfer};

// ─────────────────────────────────────────────────────────────────────────────
// Field helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn field<'a>(sad: &'a Sad, name: &str) -> Result<&'a Value, MessageError> {
    sad.get(name)
        .ok_or_else(|| MessageError::MissingField(name.to_string()))
}

pub(crate) fn str_field<'a>(sad: &'a Sad, name: &str) -> Result<&'a str, MessageError> {
    field(sad, name)?
        .as_str()
        .ok_or_else(|| MessageError::invalid(name, "expected a string"))
}

/// Lowercase hex integer, as used by `s`, `bt` and friends.
pub(crate) fn hex_field(sad: &Sad, name: &str) -> Result<u64, MessageError> {
    let text = str_field(sad, name)?;
    if text.is_empty() || !text.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(MessageError::invalid(name, "expected hex digits"));
    }
    u64::from_str_radix(text, 16).map_err(|e| MessageError::invalid(name, e.to_string()))
}

pub(crate) fn prefix_field(sad: &Sad, name: &str) -> Result<Prefix, MessageError> {
    Prefix::parse(str_field(sad, name)?).map_err(|e| MessageError::invalid(name, e.to_string()))
}

pub(crate) fn said_field(sad: &Sad, name: &str) -> Result<Said, MessageError> {
    Said::parse(str_field(sad, name)?).map_err(|e| MessageError::invalid(name, e.to_string()))
}

fn list_field<'a>(sad: &'a Sad, name: &str) -> Result<&'a Vec<Value>, MessageError> {
    field(sad, name)?
        .as_array()
        .ok_or_else(|| MessageError::invalid(name, "expected a list"))
}

fn parsed_list<T>(
    sad: &Sad,
    name: &str,
    parse: impl Fn(&str) -> Result<T, crate::error::CodecError>,
) -> Result<Vec<T>, MessageError> {
    list_field(sad, name)?
        .iter()
        .map(|v| {
            let text = v
                .as_str()
                .ok_or_else(|| MessageError::invalid(name, "expected a list of strings"))?;
            parse(text).map_err(|e| MessageError::invalid(name, e.to_string()))
        })
        .collect()
}

fn strings_field(sad: &Sad, name: &str) -> Result<Vec<String>, MessageError> {
    parsed_list(sad, name, |s| Ok(s.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Ilks and seals
// ─────────────────────────────────────────────────────────────────────────────

/// Message types the verifier understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ilk {
    Icp,
    Rot,
    Ixn,
    Rct,
    Vcp,
    Vrt,
    Iss,
    Rev,
    Bis,
    Brv,
}

impl Ilk {
    pub fn parse(text: &str) -> Option<Self> {
        let ilk = match text {
            "icp" => Ilk::Icp,
            "rot" => Ilk::Rot,
            "ixn" => Ilk::Ixn,
            "rct" => Ilk::Rct,
            "vcp" => Ilk::Vcp,
            "vrt" => Ilk::Vrt,
            "iss" => Ilk::Iss,
            "rev" => Ilk::Rev,
            "bis" => Ilk::Bis,
            "brv" => Ilk::Brv,
            _ => return None,
        };
        Some(ilk)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Ilk::Icp => "icp",
            Ilk::Rot => "rot",
            Ilk::Ixn => "ixn",
            Ilk::Rct => "rct",
            Ilk::Vcp => "vcp",
            Ilk::Vrt => "vrt",
            Ilk::Iss => "iss",
            Ilk::Rev => "rev",
            Ilk::Bis => "bis",
            Ilk::Brv => "brv",
        }
    }
}

impl fmt::Display for Ilk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seal naming one event of some log: `{i, s, d}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSeal {
    pub prefix: Prefix,
    pub sn: u64,
    pub said: Said,
}

impl EventSeal {
    fn from_map(map: &Sad) -> Result<Self, MessageError> {
        Ok(Self {
            prefix: prefix_field(map, "i")?,
            sn: hex_field(map, "s")?,
            said: said_field(map, "d")?,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut map = Sad::new();
        map.insert("i".into(), Value::String(self.prefix.qb64()));
        map.insert("s".into(), Value::String(format!("{:x}", self.sn)));
        map.insert("d".into(), Value::String(self.said.qb64()));
        Value::Object(map)
    }
}

/// Anchored data in a key event's `a` list.
#[derive(Debug, Clone, PartialEq)]
pub enum Seal {
    Event(EventSeal),
    Digest(Said),
    Other(Value),
}

impl Seal {
    fn from_value(value: &Value) -> Self {
        if let Some(map) = value.as_object() {
            if map.len() == 3 {
                if let Ok(seal) = EventSeal::from_map(map) {
                    return Seal::Event(seal);
                }
            }
            if map.len() == 1 {
                if let Ok(said) = said_field(map, "d") {
                    return Seal::Digest(said);
                }
            }
        }
        Seal::Other(value.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key events
// ─────────────────────────────────────────────────────────────────────────────

/// Witness (or backer) list, as a full list or as a rotation delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessChange {
    Initial(Vec<Prefix>),
    Delta { cuts: Vec<Prefix>, adds: Vec<Prefix> },
}

impl WitnessChange {
    /// Apply to the current list, checking the delta is consistent.
    pub fn apply(&self, current: &[Prefix]) -> Result<Vec<Prefix>, String> {
        match self {
            WitnessChange::Initial(list) => {
                if has_duplicates(list) {
                    return Err("duplicate witness".into());
                }
                Ok(list.clone())
            }
            WitnessChange::Delta { cuts, adds } => {
                if has_duplicates(cuts) || has_duplicates(adds) {
                    return Err("duplicate witness in cuts or adds".into());
                }
                if let Some(missing) = cuts.iter().find(|c| !current.contains(c)) {
                    return Err(format!("cut witness {missing} is not current"));
                }
                if cuts.iter().any(|c| adds.contains(c)) {
                    return Err("witness both cut and added".into());
                }
                let mut next: Vec<Prefix> =
                    current.iter().filter(|w| !cuts.contains(w)).cloned().collect();
                for add in adds {
                    if next.contains(add) {
                        return Err(format!("added witness {add} is already current"));
                    }
                    next.push(add.clone());
                }
                Ok(next)
            }
        }
    }
}

fn has_duplicates(list: &[Prefix]) -> bool {
    list.iter()
        .enumerate()
        .any(|(i, p)| list[..i].contains(p))
}

/// Key configuration introduced by an establishment event.
#[derive(Debug, Clone, PartialEq)]
pub struct Establishment {
    pub signing_threshold: Tholder,
    pub keys: Vec<Verfer>,
    pub next_threshold: Tholder,
    pub next_digests: Vec<Said>,
    pub witness_threshold: u64,
    pub witnesses: WitnessChange,
    pub config: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    pub ilk: Ilk,
    pub prefix: Prefix,
    pub sn: u64,
    pub said: Said,
    pub prior: Option<Said>,
    /// Present on `icp` and `rot`.
    pub establishment: Option<Establishment>,
    pub seals: Vec<Seal>,
}

impl KeyEvent {
    pub fn is_establishment(&self) -> bool {
        self.establishment.is_some()
    }

    /// Event seals anchored by this event.
    pub fn event_seals(&self) -> impl Iterator<Item = &EventSeal> {
        self.seals.iter().filter_map(|s| match s {
            Seal::Event(seal) => Some(seal),
            _ => None,
        })
    }

    fn from_sad(ilk: Ilk, serder: &Serder) -> Result<Self, MessageError> {
        let sad = serder.sad();
        let prefix = prefix_field(sad, "i")?;
        let labels: &[&str] = if ilk == Ilk::Icp && prefix.is_self_addressing() {
            &["d", "i"]
        } else {
            &["d"]
        };
        let said = verify_said(sad, serder.kind(), labels)?;
        let sn = hex_field(sad, "s")?;
        let prior = match ilk {
            Ilk::Icp => None,
            _ => Some(said_field(sad, "p")?),
        };

        let establishment = match ilk {
            Ilk::Icp | Ilk::Rot => {
                let keys = parsed_list(sad, "k", Verfer::parse)?;
                let next_digests = parsed_list(sad, "n", Said::parse)?;
                let witnesses = if ilk == Ilk::Icp {
                    WitnessChange::Initial(parsed_list(sad, "b", Prefix::parse)?)
                } else {
                    WitnessChange::Delta {
                        cuts: parsed_list(sad, "br", Prefix::parse)?,
                        adds: parsed_list(sad, "ba", Prefix::parse)?,
                    }
                };
                let config = if ilk == Ilk::Icp {
                    strings_field(sad, "c")?
                } else {
                    Vec::new()
                };
                Some(Establishment {
                    signing_threshold: Tholder::from_value("kt", field(sad, "kt")?)?,
                    keys,
                    next_threshold: Tholder::from_value("nt", field(sad, "nt")?)?,
                    next_digests,
                    witness_threshold: hex_field(sad, "bt")?,
                    witnesses,
                    config,
                })
            }
            _ => None,
        };

        let seals = list_field(sad, "a")?.iter().map(Seal::from_value).collect();

        Ok(Self {
            ilk,
            prefix,
            sn,
            said,
            prior,
            establishment,
            seals,
        })
    }
}

/// A non-transferable receipt: names the receipted event; signatures come
/// from the attached couples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptEvent {
    pub prefix: Prefix,
    pub sn: u64,
    pub said: Said,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transaction events
// ─────────────────────────────────────────────────────────────────────────────

/// A registry or credential status event.
#[derive(Debug, Clone, PartialEq)]
pub struct TelEvent {
    pub ilk: Ilk,
    /// Registry id (`vcp`, `vrt`) or credential SAID (`iss`, `rev`, ...).
    pub id: Said,
    pub sn: u64,
    pub said: Said,
    pub prior: Option<Said>,
    /// The registry this event belongs to.
    pub registry: Said,
    /// Issuer named by `vcp` (`ii`).
    pub issuer: Option<Prefix>,
    pub config: Vec<String>,
    pub backer_threshold: u64,
    pub backers: Option<WitnessChange>,
    /// Registry anchor of backed issuance events (`ra`).
    pub registry_anchor: Option<EventSeal>,
    pub datetime: Option<String>,
}

impl TelEvent {
    /// Registry inception with the "no backers" trait.
    pub fn no_backers(&self) -> bool {
        self.config.iter().any(|c| c == "NB")
    }

    pub fn is_registry_event(&self) -> bool {
        matches!(self.ilk, Ilk::Vcp | Ilk::Vrt)
    }

    fn from_sad(ilk: Ilk, serder: &Serder) -> Result<Self, MessageError> {
        let sad = serder.sad();
        let labels: &[&str] = if ilk == Ilk::Vcp { &["d", "i"] } else { &["d"] };
        let said = verify_said(sad, serder.kind(), labels)?;
        let id = said_field(sad, "i")?;
        let sn = hex_field(sad, "s")?;
        let prior = match ilk {
            Ilk::Vrt | Ilk::Rev | Ilk::Brv => Some(said_field(sad, "p")?),
            _ => None,
        };
        let registry_anchor = match ilk {
            Ilk::Bis | Ilk::Brv => {
                let ra = field(sad, "ra")?
                    .as_object()
                    .ok_or_else(|| MessageError::invalid("ra", "expected a seal"))?;
                Some(EventSeal::from_map(ra)?)
            }
            _ => None,
        };
        let registry = match ilk {
            Ilk::Vcp | Ilk::Vrt => id.clone(),
            Ilk::Iss | Ilk::Rev => said_field(sad, "ri")?,
            _ => registry_anchor
                .as_ref()
                .map(|ra| {
                    ra.prefix
                        .as_said()
                        .ok_or_else(|| MessageError::invalid("ra", "registry id is not a digest"))
                })
                .transpose()?
                .ok_or_else(|| MessageError::MissingField("ra".into()))?,
        };
        let issuer = match ilk {
            Ilk::Vcp | Ilk::Bis => Some(prefix_field(sad, "ii")?),
            _ => None,
        };
        let (config, backer_threshold, backers) = match ilk {
            Ilk::Vcp => (
                strings_field(sad, "c")?,
                hex_field(sad, "bt")?,
                Some(WitnessChange::Initial(parsed_list(sad, "b", Prefix::parse)?)),
            ),
            Ilk::Vrt => (
                Vec::new(),
                hex_field(sad, "bt")?,
                Some(WitnessChange::Delta {
                    cuts: parsed_list(sad, "br", Prefix::parse)?,
                    adds: parsed_list(sad, "ba", Prefix::parse)?,
                }),
            ),
            _ => (Vec::new(), 0, None),
        };
        let datetime = sad.get("dt").and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            ilk,
            id,
            sn,
            said,
            prior,
            registry,
            issuer,
            config,
            backer_threshold,
            backers,
            registry_anchor,
            datetime,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// Every message kind the pipeline dispatches on.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Inception(KeyEvent),
    Rotation(KeyEvent),
    Interaction(KeyEvent),
    Receipt(ReceiptEvent),
    RegistryInception(TelEvent),
    RegistryRotation(TelEvent),
    Issuance(TelEvent),
    Revocation(TelEvent),
    Credential(Box<Credential>),
}

impl Message {
    /// Interpret a framed body, verifying its SAID.
    pub fn from_serder(serder: &Serder) -> Result<Self, MessageError> {
        if serder.protocol() == Protocol::Acdc {
            return Ok(Message::Credential(Box::new(Credential::from_serder(serder)?)));
        }
        let text = str_field(serder.sad(), "t")?;
        let ilk = Ilk::parse(text).ok_or_else(|| MessageError::UnsupportedIlk(text.to_string()))?;
        let message = match ilk {
            Ilk::Icp => Message::Inception(KeyEvent::from_sad(ilk, serder)?),
            Ilk::Rot => Message::Rotation(KeyEvent::from_sad(ilk, serder)?),
            Ilk::Ixn => Message::Interaction(KeyEvent::from_sad(ilk, serder)?),
            Ilk::Rct => {
                let sad = serder.sad();
                Message::Receipt(ReceiptEvent {
                    prefix: prefix_field(sad, "i")?,
                    sn: hex_field(sad, "s")?,
                    said: said_field(sad, "d")?,
                })
            }
            Ilk::Vcp => Message::RegistryInception(TelEvent::from_sad(ilk, serder)?),
            Ilk::Vrt => Message::RegistryRotation(TelEvent::from_sad(ilk, serder)?),
            Ilk::Iss | Ilk::Bis => Message::Issuance(TelEvent::from_sad(ilk, serder)?),
            Ilk::Rev | Ilk::Brv => Message::Revocation(TelEvent::from_sad(ilk, serder)?),
        };
        Ok(message)
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> String {
        match self {
            Message::Inception(e) | Message::Rotation(e) | Message::Interaction(e) => {
                format!("{} {} sn={}", e.ilk, e.prefix, e.sn)
            }
            Message::Receipt(r) => format!("rct {} sn={}", r.prefix, r.sn),
            Message::RegistryInception(e)
            | Message::RegistryRotation(e)
            | Message::Issuance(e)
            | Message::Revocation(e) => format!("{} {} sn={}", e.ilk, e.id, e.sn),
            Message::Credential(c) => format!("acdc {}", c.said),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DigestCode, Keypair};
    use crate::said::saidify;
    use crate::serder::{Kind, Version};
    use serde_json::json;

    fn inception(keypair: &Keypair, next: &Keypair) -> Serder {
        let next_digest = Said::compute(
            DigestCode::Blake3_256,
            next.verfer().qb64().as_bytes(),
        );
        let mut sad = Sad::new();
        sad.insert("v".into(), json!(Version::new(Protocol::Keri, Kind::Json).to_string()));
        sad.insert("t".into(), json!("icp"));
        sad.insert("d".into(), json!(""));
        sad.insert("i".into(), json!(""));
        sad.insert("s".into(), json!("0"));
        sad.insert("kt".into(), json!("1"));
        sad.insert("k".into(), json!([keypair.verfer().qb64()]));
        sad.insert("nt".into(), json!("1"));
        sad.insert("n".into(), json!([next_digest.qb64()]));
        sad.insert("bt".into(), json!("0"));
        sad.insert("b".into(), json!([]));
        sad.insert("c".into(), json!([]));
        sad.insert("a".into(), json!([]));
        saidify(&mut sad, Kind::Json, &["d", "i"], DigestCode::Blake3_256).unwrap();
        Serder::from_sad(sad).unwrap()
    }

    #[test]
    fn test_inception_message() {
        let serder = inception(&Keypair::from_seed(&[1; 32]), &Keypair::from_seed(&[2; 32]));
        let Message::Inception(event) = Message::from_serder(&serder).unwrap() else {
            panic!("expected inception");
        };
        assert_eq!(event.sn, 0);
        assert_eq!(event.prefix.as_said(), Some(event.said.clone()));
        let est = event.establishment.unwrap();
        assert_eq!(est.keys.len(), 1);
        assert_eq!(est.signing_threshold, Tholder::Unweighted(1));
    }

    #[test]
    fn test_unknown_ilk() {
        let mut sad = Sad::new();
        sad.insert("v".into(), json!(Version::new(Protocol::Keri, Kind::Json).to_string()));
        sad.insert("t".into(), json!("qry"));
        crate::serder::size_version(&mut sad, Kind::Json).unwrap();
        let serder = Serder::from_sad(sad).unwrap();
        assert_eq!(
            Message::from_serder(&serder),
            Err(MessageError::UnsupportedIlk("qry".into()))
        );
    }

    #[test]
    fn test_non_hex_sequence_number() {
        let serder = inception(&Keypair::from_seed(&[1; 32]), &Keypair::from_seed(&[2; 32]));
        let mut sad = serder.sad().clone();
        sad.insert("s".into(), json!("0x"));
        saidify(&mut sad, Kind::Json, &["d", "i"], DigestCode::Blake3_256).unwrap();
        let serder = Serder::from_sad(sad).unwrap();
        assert!(matches!(
            Message::from_serder(&serder),
            Err(MessageError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_witness_delta() {
        let w = |seed: u8| Keypair::from_seed(&[seed; 32]).non_transferable_prefix();
        let current = vec![w(1), w(2)];
        let delta = WitnessChange::Delta {
            cuts: vec![w(1)],
            adds: vec![w(3)],
        };
        assert_eq!(delta.apply(&current).unwrap(), vec![w(2), w(3)]);

        let bad_cut = WitnessChange::Delta {
            cuts: vec![w(9)],
            adds: vec![],
        };
        assert!(bad_cut.apply(&current).is_err());

        let re_add = WitnessChange::Delta {
            cuts: vec![],
            adds: vec![w(2)],
        };
        assert!(re_add.apply(&current).is_err());
    }

    #[test]
    fn test_seal_forms() {
        let said = Said::compute(DigestCode::Blake3_256, b"x");
        let seal = EventSeal {
            prefix: said.as_prefix(),
            sn: 10,
            said: said.clone(),
        };
        assert_eq!(Seal::from_value(&seal.to_value()), Seal::Event(seal));
        assert_eq!(
            Seal::from_value(&json!({"d": said.qb64()})),
            Seal::Digest(said)
        );
        assert!(matches!(Seal::from_value(&json!("x")), Seal::Other(_)));
    }
}
