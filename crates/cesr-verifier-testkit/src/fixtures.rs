//! Test fixtures and helpers.
//!
//! Builders for signed key event logs, registries, status events and
//! credentials, encoded as CESR streams ready to feed a pipeline.
//!
//! Keys are derived from small integer tags so every fixture is
//! deterministic.

use serde_json::{json, Value};

use cesr_verifier_core::{
    saidify, Counter, CounterCode, DigestCode, Domain, EventSeal, Keypair, Kind, Matter, Prefix,
    Protocol, ReceiptCouple, Sad, Said, Seqner, Serder, Siger, Version,
};

/// Datetime used by every fixture that needs one.
pub const FIXTURE_DATETIME: &str = "2024-01-01T00:00:00.000000+00:00";

/// Deterministic key seed for key `index` of generation `generation`.
pub fn key_seed(tag: u8, generation: u8, index: u8) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[0] = tag;
    seed[1] = generation;
    seed[2] = index;
    seed[31] = 0x5a;
    seed
}

/// SAID standing in for a schema named `name`.
pub fn schema_said(name: &str) -> Said {
    Said::compute(DigestCode::Blake3_256, name.as_bytes())
}

/// Digest commitment to a next key.
pub fn next_digest(keypair: &Keypair) -> Said {
    Said::compute(DigestCode::Blake3_256, keypair.verfer().qb64().as_bytes())
}

fn version(protocol: Protocol, kind: Kind) -> Value {
    Value::String(Version::new(protocol, kind).to_string())
}

/// SAID a field map under `labels` and frame it.
fn finish(mut sad: Sad, kind: Kind, labels: &[&str]) -> Serder {
    saidify(&mut sad, kind, labels, DigestCode::Blake3_256).expect("fixture body saidifies");
    Serder::from_sad(sad).expect("fixture body frames")
}

fn sad_of(value: Value) -> Sad {
    match value {
        Value::Object(map) => map,
        _ => panic!("fixture body must be an object"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message groups
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Part {
    Counter(Counter),
    Matter(Matter),
    Siger(Siger),
}

impl Part {
    fn encode(&self, domain: Domain) -> Vec<u8> {
        match self {
            Part::Counter(c) => c.encode(domain),
            Part::Matter(m) => m.encode(domain),
            Part::Siger(s) => s.encode(domain),
        }
    }
}

fn counter(code: CounterCode, count: usize) -> Part {
    Part::Counter(Counter::new(code, count as u64).expect("fixture count fits"))
}

/// A message body and its attachment groups.
#[derive(Debug, Clone)]
pub struct Group {
    serder: Serder,
    parts: Vec<Part>,
}

impl Group {
    pub fn new(serder: Serder) -> Self {
        Self {
            serder,
            parts: Vec::new(),
        }
    }

    pub fn serder(&self) -> &Serder {
        &self.serder
    }

    /// The body's `d` field.
    pub fn said(&self) -> Said {
        let text = self.serder.sad()["d"].as_str().expect("fixture body has d");
        Said::parse(text).expect("fixture d is a SAID")
    }

    /// The body's `s` field, or 0 when it has none.
    pub fn sn(&self) -> u64 {
        self.serder
            .sad()
            .get("s")
            .and_then(Value::as_str)
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    }

    /// Seal naming this event: `{i, s, d}`.
    pub fn seal(&self) -> EventSeal {
        let text = self.serder.sad()["i"].as_str().expect("fixture body has i");
        EventSeal {
            prefix: Prefix::parse(text).expect("fixture i is a prefix"),
            sn: self.sn(),
            said: self.said(),
        }
    }

    pub fn with_controller_sigs(mut self, sigers: Vec<Siger>) -> Self {
        self.parts
            .push(counter(CounterCode::ControllerIdxSigs, sigers.len()));
        self.parts.extend(sigers.into_iter().map(Part::Siger));
        self
    }

    pub fn with_witness_sigs(mut self, sigers: Vec<Siger>) -> Self {
        self.parts
            .push(counter(CounterCode::WitnessIdxSigs, sigers.len()));
        self.parts.extend(sigers.into_iter().map(Part::Siger));
        self
    }

    pub fn with_receipt_couples(mut self, couples: &[ReceiptCouple]) -> Self {
        self.parts
            .push(counter(CounterCode::NonTransReceiptCouples, couples.len()));
        for couple in couples {
            self.parts.push(Part::Matter(couple.witness.matter().clone()));
            self.parts.push(Part::Matter(couple.signature.to_matter()));
        }
        self
    }

    /// Attach a `-G` couple naming the anchoring event of the issuer.
    pub fn with_seal_source(mut self, anchor: &Group) -> Self {
        self.parts.push(counter(CounterCode::SealSourceCouples, 1));
        self.parts.push(Part::Matter(Seqner(anchor.sn()).to_matter()));
        self.parts.push(Part::Matter(anchor.said().matter().clone()));
        self
    }

    /// Attach a `-I` triple naming `event`.
    pub fn with_source_triple(mut self, event: &Group) -> Self {
        let seal = event.seal();
        self.parts.push(counter(CounterCode::SealSourceTriples, 1));
        self.parts.push(Part::Matter(seal.prefix.matter().clone()));
        self.parts.push(Part::Matter(Seqner(seal.sn).to_matter()));
        self.parts.push(Part::Matter(seal.said.matter().clone()));
        self
    }

    /// Attachment bytes in `domain`.
    pub fn attachments(&self, domain: Domain) -> Vec<u8> {
        self.parts.iter().flat_map(|p| p.encode(domain)).collect()
    }

    /// Body followed by text-domain attachments.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode(Domain::Text)
    }

    pub fn encode(&self, domain: Domain) -> Vec<u8> {
        let mut out = self.serder.raw().to_vec();
        out.extend(self.attachments(domain));
        out
    }

    /// Body followed by a `-V` group framing the attachments.
    pub fn pipelined(&self, domain: Domain) -> Vec<u8> {
        let attachments = self.attachments(domain);
        let unit = match domain {
            Domain::Text => 4,
            Domain::Binary => 3,
        };
        let frame = Counter::quadlets((attachments.len() / unit) as u64)
            .expect("fixture attachments fit a -V count");
        let mut out = self.serder.raw().to_vec();
        out.extend(frame.encode(domain));
        out.extend(attachments);
        out
    }
}

/// Concatenate groups into one text-domain stream.
pub fn stream<'a>(groups: impl IntoIterator<Item = &'a Group>) -> Vec<u8> {
    groups.into_iter().flat_map(Group::to_bytes).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Witnesses
// ─────────────────────────────────────────────────────────────────────────────

/// A non-transferable witness that receipts events.
#[derive(Debug, Clone)]
pub struct Witness {
    keypair: Keypair,
}

impl Witness {
    pub fn new(tag: u8) -> Self {
        Self {
            keypair: Keypair::from_seed(&key_seed(tag, 0xff, 0)),
        }
    }

    pub fn prefix(&self) -> Prefix {
        self.keypair.non_transferable_prefix()
    }

    /// Receipt couple over an event body.
    pub fn couple(&self, event: &Group) -> ReceiptCouple {
        ReceiptCouple {
            witness: self.prefix(),
            signature: self.keypair.sign(event.serder().raw()),
        }
    }

    /// Indexed signature as witness number `index` of the event's list.
    pub fn siger(&self, index: u32, event: &Group) -> Siger {
        Siger::new(index, self.keypair.sign(event.serder().raw()))
    }

    /// A standalone `rct` message for `event`.
    pub fn receipt(&self, event: &Group) -> Group {
        receipt(event, &[self.couple(event)])
    }
}

/// A `rct` message carrying `couples` for `event`.
pub fn receipt(event: &Group, couples: &[ReceiptCouple]) -> Group {
    let seal = event.seal();
    let sad = sad_of(json!({
        "v": version(Protocol::Keri, event.serder().kind()),
        "t": "rct",
        "d": seal.said.qb64(),
        "i": seal.prefix.qb64(),
        "s": format!("{:x}", seal.sn),
    }));
    let mut sad = sad;
    cesr_verifier_core::serder::size_version(&mut sad, event.serder().kind())
        .expect("receipt sizes");
    Group::new(Serder::from_sad(sad).expect("receipt frames")).with_receipt_couples(couples)
}

// ─────────────────────────────────────────────────────────────────────────────
// Controllers
// ─────────────────────────────────────────────────────────────────────────────

/// A key event log controller with deterministic keys.
#[derive(Debug, Clone)]
pub struct Controller {
    tag: u8,
    kind: Kind,
    generation: u8,
    key_count: u8,
    signing_threshold: Value,
    witnesses: Vec<Witness>,
    witness_threshold: u64,
    config: Vec<String>,
    prefix: Option<Prefix>,
    sn: u64,
    said: Option<Said>,
}

impl Controller {
    /// Single-key, self-addressing controller.
    pub fn new(tag: u8) -> Self {
        Self {
            tag,
            kind: Kind::Json,
            generation: 0,
            key_count: 1,
            signing_threshold: json!("1"),
            witnesses: Vec::new(),
            witness_threshold: 0,
            config: Vec::new(),
            prefix: None,
            sn: 0,
            said: None,
        }
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Use `count` keys per generation under `threshold` (a `kt` value).
    pub fn with_keys(mut self, count: u8, threshold: Value) -> Self {
        self.key_count = count;
        self.signing_threshold = threshold;
        self
    }

    pub fn with_witnesses(mut self, witnesses: Vec<Witness>, threshold: u64) -> Self {
        self.witnesses = witnesses;
        self.witness_threshold = threshold;
        self
    }

    pub fn establishment_only(mut self) -> Self {
        self.config.push("EO".into());
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix.clone().expect("controller is incepted")
    }

    pub fn sn(&self) -> u64 {
        self.sn
    }

    /// SAID of the latest event.
    pub fn said(&self) -> Said {
        self.said.clone().expect("controller is incepted")
    }

    pub fn witnesses(&self) -> &[Witness] {
        &self.witnesses
    }

    fn keys(&self, generation: u8) -> Vec<Keypair> {
        (0..self.key_count)
            .map(|i| Keypair::from_seed(&key_seed(self.tag, generation, i)))
            .collect()
    }

    /// Current signing keys.
    pub fn current_keys(&self) -> Vec<Keypair> {
        self.keys(self.generation)
    }

    /// Indexed signatures over `serder` by every current key.
    pub fn sign(&self, serder: &Serder) -> Vec<Siger> {
        self.current_keys()
            .iter()
            .enumerate()
            .map(|(i, k)| Siger::new(i as u32, k.sign(serder.raw())))
            .collect()
    }

    fn key_fields(&self) -> (Value, Value) {
        let keys: Vec<String> = self.current_keys().iter().map(|k| k.verfer().qb64()).collect();
        let next: Vec<String> = self
            .keys(self.generation + 1)
            .iter()
            .map(|k| next_digest(k).qb64())
            .collect();
        (json!(keys), json!(next))
    }

    /// Inception event, signed by the controller.
    pub fn incept(&mut self) -> Group {
        let (keys, next) = self.key_fields();
        let witnesses: Vec<String> = self.witnesses.iter().map(|w| w.prefix().qb64()).collect();
        let sad = sad_of(json!({
            "v": version(Protocol::Keri, self.kind),
            "t": "icp",
            "d": "",
            "i": "",
            "s": "0",
            "kt": self.signing_threshold,
            "k": keys,
            "nt": self.signing_threshold,
            "n": next,
            "bt": format!("{:x}", self.witness_threshold),
            "b": witnesses,
            "c": self.config,
            "a": [],
        }));
        let serder = finish(sad, self.kind, &["d", "i"]);
        let group = Group::new(serder);
        self.prefix = Some(group.said().as_prefix());
        self.sn = 0;
        self.said = Some(group.said());
        let sigers = self.sign(group.serder());
        group.with_controller_sigs(sigers)
    }

    /// Interaction event anchoring `seals`.
    pub fn interact(&mut self, seals: &[EventSeal]) -> Group {
        let anchors: Vec<Value> = seals.iter().map(EventSeal::to_value).collect();
        let sad = sad_of(json!({
            "v": version(Protocol::Keri, self.kind),
            "t": "ixn",
            "d": "",
            "i": self.prefix().qb64(),
            "s": format!("{:x}", self.sn + 1),
            "p": self.said().qb64(),
            "a": anchors,
        }));
        let group = Group::new(finish(sad, self.kind, &["d"]));
        self.sn += 1;
        self.said = Some(group.said());
        let sigers = self.sign(group.serder());
        group.with_controller_sigs(sigers)
    }

    /// Rotation to the committed next keys.
    pub fn rotate(&mut self) -> Group {
        self.generation += 1;
        let (keys, next) = self.key_fields();
        let sad = sad_of(json!({
            "v": version(Protocol::Keri, self.kind),
            "t": "rot",
            "d": "",
            "i": self.prefix().qb64(),
            "s": format!("{:x}", self.sn + 1),
            "p": self.said().qb64(),
            "kt": self.signing_threshold,
            "k": keys,
            "nt": self.signing_threshold,
            "n": next,
            "bt": format!("{:x}", self.witness_threshold),
            "br": [],
            "ba": [],
            "a": [],
        }));
        let group = Group::new(finish(sad, self.kind, &["d"]));
        self.sn += 1;
        self.said = Some(group.said());
        let sigers = self.sign(group.serder());
        group.with_controller_sigs(sigers)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Issuers
// ─────────────────────────────────────────────────────────────────────────────

/// Registry lifecycle messages in stream order: the anchoring `ixn`
/// followed by the transaction event carrying its seal source.
#[derive(Debug, Clone)]
pub struct Anchored {
    pub anchor: Group,
    pub event: Group,
}

impl Anchored {
    pub fn groups(&self) -> [&Group; 2] {
        [&self.anchor, &self.event]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        stream(self.groups())
    }
}

/// A controller that runs one credential registry without backers.
#[derive(Debug, Clone)]
pub struct Issuer {
    pub controller: Controller,
    registry: Option<Said>,
}

impl Issuer {
    pub fn new(tag: u8) -> Self {
        Self::from_controller(Controller::new(tag))
    }

    pub fn from_controller(controller: Controller) -> Self {
        Self {
            controller,
            registry: None,
        }
    }

    pub fn prefix(&self) -> Prefix {
        self.controller.prefix()
    }

    pub fn registry(&self) -> Said {
        self.registry.clone().expect("registry is created")
    }

    pub fn incept(&mut self) -> Group {
        self.controller.incept()
    }

    fn anchor(&mut self, serder: Serder) -> Anchored {
        let event = Group::new(serder);
        let anchor = self.controller.interact(&[event.seal()]);
        let event = event.with_seal_source(&anchor);
        Anchored { anchor, event }
    }

    /// Registry inception (`vcp`) with the "no backers" trait.
    pub fn create_registry(&mut self) -> Anchored {
        let kind = self.controller.kind();
        let sad = sad_of(json!({
            "v": version(Protocol::Keri, kind),
            "t": "vcp",
            "d": "",
            "i": "",
            "ii": self.prefix().qb64(),
            "s": "0",
            "c": ["NB"],
            "bt": "0",
            "b": [],
            "n": format!("0A{}", "A".repeat(22)),
        }));
        let serder = finish(sad, kind, &["d", "i"]);
        let anchored = self.anchor(serder);
        self.registry = Some(anchored.event.said());
        anchored
    }

    /// Issuance (`iss`) of `credential` in this issuer's registry.
    pub fn issue(&mut self, credential: &Group) -> Anchored {
        let kind = self.controller.kind();
        let sad = sad_of(json!({
            "v": version(Protocol::Keri, kind),
            "t": "iss",
            "d": "",
            "i": credential.said().qb64(),
            "s": "0",
            "ri": self.registry().qb64(),
            "dt": FIXTURE_DATETIME,
        }));
        let serder = finish(sad, kind, &["d"]);
        self.anchor(serder)
    }

    /// Backed issuance (`bis`) naming `registry` as its registry anchor,
    /// whatever kind of registry that is.
    pub fn issue_backed(&mut self, credential: &Group, registry: &Group) -> Anchored {
        let kind = self.controller.kind();
        let sad = sad_of(json!({
            "v": version(Protocol::Keri, kind),
            "t": "bis",
            "d": "",
            "i": credential.said().qb64(),
            "ii": self.prefix().qb64(),
            "s": "0",
            "ra": registry.seal().to_value(),
            "dt": FIXTURE_DATETIME,
        }));
        let serder = finish(sad, kind, &["d"]);
        self.anchor(serder)
    }

    /// Revocation (`rev`) of a credential whose issuance is `issuance`.
    pub fn revoke(&mut self, issuance: &Group) -> Anchored {
        let kind = self.controller.kind();
        let seal = issuance.seal();
        let sad = sad_of(json!({
            "v": version(Protocol::Keri, kind),
            "t": "rev",
            "d": "",
            "i": seal.prefix.qb64(),
            "s": "1",
            "ri": self.registry().qb64(),
            "p": seal.said.qb64(),
            "dt": FIXTURE_DATETIME,
        }));
        let serder = finish(sad, kind, &["d"]);
        self.anchor(serder)
    }

    /// Start a credential issued by this issuer in its registry.
    pub fn credential(&self, schema: &str) -> CredentialBuilder {
        CredentialBuilder::new(self.prefix(), schema_said(schema))
            .registry(self.registry())
            .kind(self.controller.kind())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for ACDC credential bodies.
#[derive(Debug, Clone)]
pub struct CredentialBuilder {
    issuer: Prefix,
    schema: Said,
    registry: Option<Said>,
    recipient: Option<Prefix>,
    attributes: Vec<(String, Value)>,
    edges: Vec<(String, Value)>,
    kind: Kind,
}

impl CredentialBuilder {
    pub fn new(issuer: Prefix, schema: Said) -> Self {
        Self {
            issuer,
            schema,
            registry: None,
            recipient: None,
            attributes: Vec::new(),
            edges: Vec::new(),
            kind: Kind::Json,
        }
    }

    pub fn registry(mut self, registry: Said) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn recipient(mut self, recipient: Prefix) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.push((name.to_string(), value));
        self
    }

    /// Chain to `node`, optionally constraining its schema.
    pub fn edge(self, label: &str, node: &Said, schema: Option<&Said>) -> Self {
        self.edge_with_operator(label, node, schema, None)
    }

    pub fn edge_with_operator(
        mut self,
        label: &str,
        node: &Said,
        schema: Option<&Said>,
        operator: Option<&str>,
    ) -> Self {
        let mut edge = Sad::new();
        edge.insert("n".into(), Value::String(node.qb64()));
        if let Some(schema) = schema {
            edge.insert("s".into(), Value::String(schema.qb64()));
        }
        if let Some(operator) = operator {
            edge.insert("o".into(), Value::String(operator.to_string()));
        }
        self.edges.push((label.to_string(), Value::Object(edge)));
        self
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// The credential body, with every block SAID'd.
    pub fn build(&self) -> Group {
        let mut attrs = Sad::new();
        attrs.insert("d".into(), json!(""));
        if let Some(recipient) = &self.recipient {
            attrs.insert("i".into(), json!(recipient.qb64()));
        }
        attrs.insert("dt".into(), json!(FIXTURE_DATETIME));
        for (name, value) in &self.attributes {
            attrs.insert(name.clone(), value.clone());
        }
        saidify(&mut attrs, Kind::Json, &["d"], DigestCode::Blake3_256).expect("attributes said");

        let mut sad = Sad::new();
        sad.insert("v".into(), version(Protocol::Acdc, self.kind));
        sad.insert("d".into(), json!(""));
        sad.insert("i".into(), json!(self.issuer.qb64()));
        if let Some(registry) = &self.registry {
            sad.insert("ri".into(), json!(registry.qb64()));
        }
        sad.insert("s".into(), json!(self.schema.qb64()));
        sad.insert("a".into(), Value::Object(attrs));
        if !self.edges.is_empty() {
            let mut edges = Sad::new();
            edges.insert("d".into(), json!(""));
            for (label, edge) in &self.edges {
                edges.insert(label.clone(), edge.clone());
            }
            saidify(&mut edges, Kind::Json, &["d"], DigestCode::Blake3_256).expect("edges said");
            sad.insert("e".into(), Value::Object(edges));
        }
        Group::new(finish(sad, self.kind, &["d"]))
    }
}

/// Everything needed to verify one issued credential, in stream order.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub inception: Group,
    pub registry: Anchored,
    pub issuance: Anchored,
    pub credential: Group,
}

impl IssuedCredential {
    /// Issue a fresh credential from a fresh issuer tagged `tag`.
    pub fn new(tag: u8, schema: &str) -> (Issuer, Self) {
        let mut issuer = Issuer::new(tag);
        let inception = issuer.incept();
        let registry = issuer.create_registry();
        let credential = issuer.credential(schema).build();
        let issuance = issuer.issue(&credential);
        (
            issuer,
            Self {
                inception,
                registry,
                issuance,
                credential,
            },
        )
    }

    pub fn said(&self) -> Said {
        self.credential.said()
    }

    /// Key and transaction events the credential depends on.
    pub fn provenance(&self) -> Vec<u8> {
        let mut out = self.inception.to_bytes();
        out.extend(self.registry.to_bytes());
        out.extend(self.issuance.to_bytes());
        out
    }

    /// Provenance followed by the credential itself.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.provenance();
        out.extend(self.credential.to_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cesr_verifier_core::{parse, Message};

    #[test]
    fn test_controller_log_parses() {
        let mut controller = Controller::new(1);
        let icp = controller.incept();
        let ixn = controller.interact(&[]);
        let rot = controller.rotate();
        let bytes = stream([&icp, &ixn, &rot]);

        let groups: Vec<_> = parse(&bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].attachments.controller_sigs.len(), 1);
        assert!(matches!(
            Message::from_serder(&groups[2].serder).unwrap(),
            Message::Rotation(_)
        ));
        assert_eq!(controller.sn(), 2);
        assert_eq!(controller.said(), rot.said());
    }

    #[test]
    fn test_issued_credential_parses() {
        let (_, issued) = IssuedCredential::new(2, "badge");
        let bytes = issued.to_bytes();
        let groups: Vec<_> = parse(&bytes).collect::<Result<_, _>>().unwrap();
        // icp, ixn, vcp, ixn, iss, acdc
        assert_eq!(groups.len(), 6);
        assert_eq!(groups[2].attachments.source_seals.len(), 1);
        let Message::Credential(cred) = Message::from_serder(&groups[5].serder).unwrap() else {
            panic!("expected a credential");
        };
        assert_eq!(cred.said, issued.said());
    }

    #[test]
    fn test_pipelined_group_matches_plain() {
        let mut controller = Controller::new(3);
        let icp = controller.incept();
        for domain in [Domain::Text, Domain::Binary] {
            let bytes = icp.pipelined(domain);
            let group = parse(&bytes).next().unwrap().unwrap();
            assert_eq!(group.attachments.controller_sigs.len(), 1);
        }
    }

    #[test]
    fn test_cbor_controller() {
        let mut controller = Controller::new(4).with_kind(Kind::Cbor);
        let icp = controller.incept();
        assert_eq!(icp.serder().kind(), Kind::Cbor);
        let group = parse(&icp.to_bytes()).next().unwrap().unwrap();
        assert!(Message::from_serder(&group.serder).is_ok());
    }
}
