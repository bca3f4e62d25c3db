//! Signing thresholds.
//!
//! A threshold is either a plain count of signatures (hex text on the wire)
//! or a list of clauses of fractional weights, one weight per key. A
//! weighted threshold is satisfied when, in every clause, the weights of
//! the keys that signed add up to at least one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::MessageError;

/// A fractional key weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weight {
    pub num: u64,
    pub den: u64,
}

impl Weight {
    fn parse(text: &str) -> Option<Self> {
        let (num, den) = match text.split_once('/') {
            Some((n, d)) => (n.parse().ok()?, d.parse().ok()?),
            None => (text.parse().ok()?, 1),
        };
        (den > 0 && num <= den).then_some(Self { num, den })
    }

    fn text(&self) -> String {
        if self.den == 1 {
            self.num.to_string()
        } else {
            format!("{}/{}", self.num, self.den)
        }
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Least common denominator of a clause, or `None` when it does not fit
/// in 128 bits.
fn common_denominator(clause: &[Weight]) -> Option<u128> {
    clause.iter().try_fold(1u128, |acc, w| {
        let den = u128::from(w.den);
        (acc / gcd(acc, den)).checked_mul(den)
    })
}

/// Whether the given weights add up to at least one. `scale` is a common
/// denominator of every weight.
fn reaches_one<'a>(scale: u128, weights: impl Iterator<Item = &'a Weight>) -> bool {
    let mut sum = 0u128;
    for w in weights {
        // num <= den, so each term is at most `scale`.
        sum = sum.saturating_add(u128::from(w.num) * (scale / u128::from(w.den)));
        if sum >= scale {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tholder {
    Unweighted(u64),
    Weighted(Vec<Vec<Weight>>),
}

impl Tholder {
    pub fn from_value(field: &str, value: &Value) -> Result<Self, MessageError> {
        match value {
            Value::String(hex) => u64::from_str_radix(hex, 16)
                .ok()
                .filter(|_| !hex.is_empty() && hex.bytes().all(|c| c.is_ascii_hexdigit()))
                .map(Tholder::Unweighted)
                .ok_or_else(|| MessageError::invalid(field, "threshold is not hex")),
            Value::Array(items) => {
                // A flat list is a single clause.
                let clauses: Vec<&Value> = if items.iter().all(Value::is_string) {
                    vec![value]
                } else {
                    items.iter().collect()
                };
                let mut parsed = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    let weights = clause
                        .as_array()
                        .ok_or_else(|| MessageError::invalid(field, "clause is not a list"))?;
                    let clause = weights
                        .iter()
                        .map(|w| w.as_str().and_then(Weight::parse))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| MessageError::invalid(field, "invalid weight"))?;
                    parsed.push(clause);
                }
                if parsed.is_empty() {
                    return Err(MessageError::invalid(field, "empty weighted threshold"));
                }
                Ok(Tholder::Weighted(parsed))
            }
            _ => Err(MessageError::invalid(field, "unsupported threshold form")),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Tholder::Unweighted(n) => Value::String(format!("{n:x}")),
            Tholder::Weighted(clauses) => Value::Array(
                clauses
                    .iter()
                    .map(|c| Value::Array(c.iter().map(|w| Value::String(w.text())).collect()))
                    .collect(),
            ),
        }
    }

    /// Check the threshold against the number of keys it governs.
    pub fn validate(&self, key_count: usize) -> Result<(), String> {
        match self {
            Tholder::Unweighted(0) if key_count > 0 => {
                Err("zero threshold with a non-empty key list".into())
            }
            Tholder::Unweighted(n) if *n > key_count as u64 => {
                Err(format!("threshold {n} exceeds {key_count} keys"))
            }
            Tholder::Unweighted(_) => Ok(()),
            Tholder::Weighted(clauses) => {
                let total: usize = clauses.iter().map(Vec::len).sum();
                if total != key_count {
                    return Err(format!("{total} weights for {key_count} keys"));
                }
                for clause in clauses {
                    let Some(scale) = common_denominator(clause) else {
                        return Err("weighted clause denominators are too large".into());
                    };
                    if !reaches_one(scale, clause.iter()) {
                        return Err("weighted clause can never be satisfied".into());
                    }
                }
                Ok(())
            }
        }
    }

    /// Whether signatures from the keys at `indices` meet the threshold.
    pub fn satisfied_by(&self, indices: &BTreeSet<usize>) -> bool {
        match self {
            Tholder::Unweighted(n) => indices.len() as u64 >= *n,
            Tholder::Weighted(clauses) => {
                let mut offset = 0;
                clauses.iter().all(|clause| {
                    let start = offset;
                    offset += clause.len();
                    let Some(scale) = common_denominator(clause) else {
                        return false;
                    };
                    reaches_one(
                        scale,
                        clause
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| indices.contains(&(start + i)))
                            .map(|(_, w)| w),
                    )
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(items: &[usize]) -> BTreeSet<usize> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_unweighted() {
        let t = Tholder::from_value("kt", &json!("2")).unwrap();
        assert_eq!(t, Tholder::Unweighted(2));
        assert!(t.validate(3).is_ok());
        assert!(t.validate(1).is_err());
        assert!(!t.satisfied_by(&set(&[0])));
        assert!(t.satisfied_by(&set(&[0, 2])));
        assert_eq!(t.to_value(), json!("2"));
    }

    #[test]
    fn test_zero_threshold_needs_empty_keys() {
        let t = Tholder::from_value("nt", &json!("0")).unwrap();
        assert!(t.validate(0).is_ok());
        assert!(t.validate(1).is_err());
    }

    #[test]
    fn test_weighted_single_clause() {
        let t = Tholder::from_value("kt", &json!(["1/2", "1/2", "1/2"])).unwrap();
        assert!(t.validate(3).is_ok());
        assert!(!t.satisfied_by(&set(&[1])));
        assert!(t.satisfied_by(&set(&[0, 2])));
    }

    #[test]
    fn test_weighted_multi_clause() {
        let t = Tholder::from_value("kt", &json!([["1/2", "1/2"], ["1"]])).unwrap();
        assert!(t.validate(3).is_ok());
        assert!(!t.satisfied_by(&set(&[0, 1])));
        assert!(t.satisfied_by(&set(&[0, 1, 2])));
        assert_eq!(t.to_value(), json!([["1/2", "1/2"], ["1"]]));
    }

    #[test]
    fn test_rejects_bad_forms() {
        assert!(Tholder::from_value("kt", &json!("xyz")).is_err());
        assert!(Tholder::from_value("kt", &json!(["3/2"])).is_err());
        assert!(Tholder::from_value("kt", &json!(1)).is_err());
        let unsatisfiable = Tholder::from_value("kt", &json!(["1/3", "1/3"])).unwrap();
        assert!(unsatisfiable.validate(2).is_err());
    }

    #[test]
    fn test_weighted_large_denominators() {
        let p = 18446744073709551557u64;
        let fine = Tholder::from_value("kt", &json!([format!("1/{p}"), format!("{}/{p}", p - 1)]))
            .unwrap();
        assert!(fine.validate(2).is_ok());
        assert!(!fine.satisfied_by(&set(&[1])));
        assert!(fine.satisfied_by(&set(&[0, 1])));

        let unrepresentable = Tholder::from_value(
            "kt",
            &json!([
                "1/18446744073709551557",
                "1/18446744073709551533",
                "1/18446744073709551521"
            ]),
        )
        .unwrap();
        assert!(unrepresentable.validate(3).is_err());
        assert!(!unrepresentable.satisfied_by(&set(&[0, 1, 2])));
    }
}
