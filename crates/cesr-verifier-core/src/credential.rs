//! ACDC credentials.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MessageError;
use crate::event::{field, prefix_field, said_field, str_field};
use crate::said::verify_said;
use crate::serder::{Kind, Sad, Serder};
use crate::types::{Prefix, Said};

/// How an edge's source credential relates to this credential's issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EdgeOperator {
    /// Issuer-to-issuee: the source's recipient must be this issuer.
    #[default]
    I2I,
    /// Not issuer-to-issuee: any source holder is fine.
    NI2I,
    /// Delegated issuer-to-issuee; treated as `I2I` here.
    DI2I,
}

impl EdgeOperator {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "I2I" => Some(EdgeOperator::I2I),
            "NI2I" => Some(EdgeOperator::NI2I),
            "DI2I" => Some(EdgeOperator::DI2I),
            _ => None,
        }
    }

    pub fn requires_recipient_match(self) -> bool {
        !matches!(self, EdgeOperator::NI2I)
    }
}

/// One chained source credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Dotted path of the edge inside the `e` block.
    pub label: String,
    pub node: Said,
    pub schema: Option<Said>,
    pub operator: EdgeOperator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub said: Said,
    pub issuer: Prefix,
    pub registry: Option<Said>,
    pub schema: Said,
    pub recipient: Option<Prefix>,
    pub issued_at: Option<String>,
    pub edges: Vec<Edge>,
    pub sad: Sad,
    pub kind: Kind,
}

/// A `said` that may be given directly or as the `d` of an expanded block.
fn said_or_block(sad: &Sad, name: &str) -> Result<Said, MessageError> {
    match field(sad, name)? {
        Value::String(_) => said_field(sad, name),
        Value::Object(block) => said_field(block, "d"),
        _ => Err(MessageError::invalid(name, "expected a SAID or block")),
    }
}

/// Verify an expanded nested block's own SAID. Nested blocks carry no
/// version string and are always digested as JSON.
fn verify_block(block: &Sad, name: &str) -> Result<(), MessageError> {
    verify_said(block, Kind::Json, &["d"]).map_err(|e| match e {
        MessageError::SaidMismatch {
            embedded, computed, ..
        } => MessageError::SaidMismatch {
            label: format!("{name}.d"),
            embedded,
            computed,
        },
        other => other,
    })?;
    Ok(())
}

fn collect_edges(
    block: &Sad,
    path: &str,
    inherited: EdgeOperator,
    edges: &mut Vec<Edge>,
) -> Result<(), MessageError> {
    let operator = match block.get("o").and_then(Value::as_str) {
        Some(text) => EdgeOperator::parse(text)
            .ok_or_else(|| MessageError::invalid("e", format!("unknown operator {text:?}")))?,
        None => inherited,
    };
    for (key, value) in block {
        if key == "d" || key == "o" {
            continue;
        }
        let Some(map) = value.as_object() else {
            return Err(MessageError::invalid("e", format!("edge {key:?} is not a block")));
        };
        let label = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        if map.contains_key("n") {
            let node = said_field(map, "n")?;
            let schema = map.contains_key("s").then(|| said_field(map, "s")).transpose()?;
            let operator = match map.get("o").and_then(Value::as_str) {
                Some(text) => EdgeOperator::parse(text).ok_or_else(|| {
                    MessageError::invalid("e", format!("unknown operator {text:?}"))
                })?,
                None => operator,
            };
            edges.push(Edge {
                label,
                node,
                schema,
                operator,
            });
        } else {
            collect_edges(map, &label, operator, edges)?;
        }
    }
    Ok(())
}

impl Credential {
    /// Interpret an ACDC body, verifying its SAID and its expanded blocks.
    pub fn from_serder(serder: &Serder) -> Result<Self, MessageError> {
        let sad = serder.sad();
        let said = verify_said(sad, serder.kind(), &["d"])?;
        let issuer = prefix_field(sad, "i")?;
        let registry = match sad.get("ri") {
            Some(Value::String(text)) if !text.is_empty() => Some(said_field(sad, "ri")?),
            _ => None,
        };
        let schema = said_or_block(sad, "s")?;

        let (recipient, issued_at) = match field(sad, "a")? {
            Value::Object(attrs) => {
                verify_block(attrs, "a")?;
                let recipient = attrs.contains_key("i").then(|| prefix_field(attrs, "i")).transpose()?;
                let issued_at = attrs.contains_key("dt").then(|| str_field(attrs, "dt")).transpose()?;
                (recipient, issued_at.map(str::to_string))
            }
            Value::String(_) => (None, None),
            _ => return Err(MessageError::invalid("a", "expected a block or SAID")),
        };

        let mut edges = Vec::new();
        match sad.get("e") {
            None => {}
            Some(Value::Object(block)) => {
                verify_block(block, "e")?;
                collect_edges(block, "", EdgeOperator::default(), &mut edges)?;
            }
            Some(Value::String(_)) => {
                return Err(MessageError::invalid("e", "compact edge block cannot be verified"));
            }
            Some(_) => return Err(MessageError::invalid("e", "expected a block")),
        }

        Ok(Self {
            said,
            issuer,
            registry,
            schema,
            recipient,
            issued_at,
            edges,
            sad: sad.clone(),
            kind: serder.kind(),
        })
    }
}
