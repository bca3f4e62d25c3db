//! Strongly typed primitives used throughout the verifier.
//!
//! Each type wraps a [`Matter`] restricted to the codes that make sense for
//! its role, and serializes as its qb64 text.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::codec::{text_to_binary, Matter, MatterCode, B64_ALPHABET};
use crate::error::CodecError;

macro_rules! matter_newtype {
    ($(#[$meta:meta])* $name:ident, $what:literal, $check:expr) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) Matter);

        impl $name {
            /// Wrap a primitive, checking its code.
            pub fn from_matter(matter: Matter) -> Result<Self, CodecError> {
                let allowed: fn(MatterCode) -> bool = $check;
                if allowed(matter.code()) {
                    Ok(Self(matter))
                } else {
                    Err(CodecError::UnexpectedCode {
                        expected: $what,
                        got: matter.code().hard().to_string(),
                    })
                }
            }

            /// Parse from complete qb64 text.
            pub fn parse(text: &str) -> Result<Self, CodecError> {
                Self::from_matter(Matter::from_qb64(text)?)
            }

            pub fn matter(&self) -> &Matter {
                &self.0
            }

            pub fn qb64(&self) -> String {
                self.0.qb64()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0.qb64())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.qb64())
            }
        }

        impl FromStr for $name {
            type Err = CodecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0.qb64())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                Self::parse(&text).map_err(D::Error::custom)
            }
        }
    };
}

matter_newtype!(
    /// An autonomic identifier prefix: a basic key prefix (`B`, `D`) or a
    /// self-addressing digest prefix (`E`, `I`).
    Prefix,
    "identifier prefix",
    MatterCode::is_prefix
);

matter_newtype!(
    /// A self-addressing identifier or any other content digest.
    Said,
    "digest",
    MatterCode::is_digest
);

matter_newtype!(
    /// An Ed25519 verification key.
    Verfer,
    "verification key",
    |code| matches!(code, MatterCode::Ed25519 | MatterCode::Ed25519N)
);

impl Prefix {
    /// Non-transferable prefixes can never rotate or interact.
    pub fn is_transferable(&self) -> bool {
        self.0.code() != MatterCode::Ed25519N
    }

    /// Whether the prefix is derived from its inception event's digest.
    pub fn is_self_addressing(&self) -> bool {
        self.0.code().is_digest()
    }

    /// The verification key of a basic prefix.
    pub fn verfer(&self) -> Option<Verfer> {
        match self.0.code() {
            MatterCode::Ed25519 | MatterCode::Ed25519N => Some(Verfer(self.0.clone())),
            _ => None,
        }
    }

    /// The digest of a self-addressing prefix.
    pub fn as_said(&self) -> Option<Said> {
        self.is_self_addressing().then(|| Said(self.0.clone()))
    }
}

impl Said {
    /// Every digest is also a valid self-addressing prefix.
    pub fn as_prefix(&self) -> Prefix {
        Prefix(self.0.clone())
    }
}

/// A sequence number, carried on the wire as a `0A` primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Seqner(pub u64);

impl Seqner {
    pub fn to_matter(&self) -> Matter {
        Matter::from_sized(MatterCode::Salt128, u128::from(self.0).to_be_bytes().to_vec())
    }

    pub fn from_matter(matter: &Matter) -> Result<Self, CodecError> {
        if matter.code() != MatterCode::Salt128 {
            return Err(CodecError::UnexpectedCode {
                expected: "sequence number",
                got: matter.code().hard().to_string(),
            });
        }
        let bytes: [u8; 16] = matter
            .raw()
            .try_into()
            .map_err(|_| CodecError::InvalidValue("sequence number size".into()))?;
        u64::try_from(u128::from_be_bytes(bytes))
            .map(Seqner)
            .map_err(|_| CodecError::InvalidValue("sequence number exceeds u64".into()))
    }

    pub fn qb64(&self) -> String {
        self.to_matter().qb64()
    }
}

/// An ISO-8601 datetime with microsecond precision and a numeric offset,
/// e.g. `2024-01-02T03:04:05.678901+00:00`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dater(String);

const DATER_LEN: usize = 32;

fn to_b64_form(c: char) -> char {
    match c {
        ':' => 'c',
        '.' => 'd',
        '+' => 'p',
        other => other,
    }
}

fn from_b64_form(c: char) -> char {
    match c {
        'c' => ':',
        'd' => '.',
        'p' => '+',
        other => other,
    }
}

impl Dater {
    /// The current UTC time.
    pub fn now() -> Self {
        Self(
            chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f+00:00")
                .to_string(),
        )
    }

    /// Validate an ISO-8601 string in the fixed CESR layout.
    pub fn from_iso(iso: &str) -> Result<Self, CodecError> {
        if iso.len() != DATER_LEN {
            return Err(CodecError::InvalidValue(format!(
                "datetime must be {} characters, got {}",
                DATER_LEN,
                iso.len()
            )));
        }
        chrono::DateTime::parse_from_rfc3339(iso)
            .map_err(|e| CodecError::InvalidValue(format!("datetime {iso:?}: {e}")))?;
        if !iso
            .chars()
            .map(to_b64_form)
            .all(|c| c.is_ascii() && B64_ALPHABET.contains(&(c as u8)))
        {
            return Err(CodecError::InvalidValue(format!(
                "datetime {iso:?} is not in CESR layout"
            )));
        }
        Ok(Self(iso.to_string()))
    }

    pub fn iso(&self) -> &str {
        &self.0
    }

    pub fn datetime(&self) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        chrono::DateTime::parse_from_rfc3339(&self.0).ok()
    }

    pub fn to_matter(&self) -> Matter {
        let text: String = self.0.chars().map(to_b64_form).collect();
        Matter::from_sized(MatterCode::DateTime, text_to_binary(text.as_bytes()))
    }

    pub fn from_matter(matter: &Matter) -> Result<Self, CodecError> {
        if matter.code() != MatterCode::DateTime {
            return Err(CodecError::UnexpectedCode {
                expected: "datetime",
                got: matter.code().hard().to_string(),
            });
        }
        let text: String = URL_SAFE_NO_PAD
            .encode(matter.raw())
            .chars()
            .map(from_b64_form)
            .collect();
        Self::from_iso(&text)
    }

    pub fn qb64(&self) -> String {
        self.to_matter().qb64()
    }
}

impl fmt::Display for Dater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_code_restrictions() {
        let key = Matter::new(MatterCode::Ed25519, vec![1u8; 32]).unwrap();
        let prefix = Prefix::from_matter(key.clone()).unwrap();
        assert!(prefix.is_transferable());
        assert!(!prefix.is_self_addressing());
        assert!(prefix.verfer().is_some());
        assert!(Said::from_matter(key).is_err());

        let sig = Matter::new(MatterCode::Ed25519Sig, vec![0u8; 64]).unwrap();
        assert!(matches!(
            Prefix::from_matter(sig),
            Err(CodecError::UnexpectedCode { .. })
        ));
    }

    #[test]
    fn test_said_serde_as_text() {
        let said = Said::parse(&format!("E{}", "A".repeat(43))).unwrap();
        let json = serde_json::to_string(&said).unwrap();
        assert_eq!(json, format!("\"E{}\"", "A".repeat(43)));
        let back: Said = serde_json::from_str(&json).unwrap();
        assert_eq!(back, said);
        assert_eq!(said.as_prefix().as_said(), Some(said));
    }

    #[test]
    fn test_seqner_matter() {
        assert_eq!(Seqner(1).qb64(), "0AAAAAAAAAAAAAAAAAAAAAAB");
        let m = Seqner(300).to_matter();
        assert_eq!(Seqner::from_matter(&m).unwrap(), Seqner(300));
    }

    #[test]
    fn test_dater_vector() {
        let dater = Dater::from_iso("2020-08-22T17:50:09.988921+00:00").unwrap();
        assert_eq!(dater.qb64(), "1AAG2020-08-22T17c50c09d988921p00c00");
        let back = Dater::from_matter(&dater.to_matter()).unwrap();
        assert_eq!(back, dater);
    }

    #[test]
    fn test_dater_now_layout() {
        let now = Dater::now();
        assert_eq!(now.iso().len(), 32);
        assert!(Dater::from_iso(now.iso()).is_ok());
        assert!(now.datetime().is_some());
    }

    #[test]
    fn test_dater_rejects_other_layouts() {
        assert!(Dater::from_iso("2020-08-22T17:50:09Z").is_err());
        assert!(Dater::from_iso("not a datetime at all, 32 chars!").is_err());
    }
}
