//! Cryptographic primitives for the CESR verifier.
//!
//! Wraps Ed25519 signing, Blake3 and SHA2-256 hashing with strong types.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

use crate::codec::{Matter, MatterCode};
use crate::error::CryptoError;
use crate::types::{Prefix, Said, Verfer};

/// Digest algorithms usable for SAIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestCode {
    Blake3_256,
    Sha2_256,
}

impl DigestCode {
    /// Hash `data` with this algorithm.
    pub fn digest(self, data: &[u8]) -> [u8; 32] {
        match self {
            DigestCode::Blake3_256 => *blake3::hash(data).as_bytes(),
            DigestCode::Sha2_256 => Sha256::digest(data).into(),
        }
    }

    pub fn matter_code(self) -> MatterCode {
        match self {
            DigestCode::Blake3_256 => MatterCode::Blake3_256,
            DigestCode::Sha2_256 => MatterCode::Sha2_256,
        }
    }

    pub fn from_matter_code(code: MatterCode) -> Option<Self> {
        match code {
            MatterCode::Blake3_256 => Some(DigestCode::Blake3_256),
            MatterCode::Sha2_256 => Some(DigestCode::Sha2_256),
            _ => None,
        }
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The signature as a `0B` primitive.
    pub fn to_matter(&self) -> Matter {
        Matter::from_sized(MatterCode::Ed25519Sig, self.0.to_vec())
    }

    /// Read a signature out of a `0B` primitive.
    pub fn from_matter(matter: &Matter) -> Option<Self> {
        if matter.code() != MatterCode::Ed25519Sig {
            return None;
        }
        matter.raw().try_into().ok().map(Self)
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Sig({}...)", &self.to_hex()[..16])
    }
}

impl Verfer {
    /// Verify an Ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CryptoError> {
        let key: [u8; 32] = self
            .matter()
            .raw()
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let verifying_key = VerifyingKey::from_bytes(&key).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = Signature::from_bytes(&signature.0);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl Said {
    /// Digest `data`, producing a self-addressing identifier.
    pub fn compute(code: DigestCode, data: &[u8]) -> Self {
        Said(Matter::from_sized(code.matter_code(), code.digest(data).to_vec()))
    }

    /// The algorithm this digest was made with.
    pub fn digest_code(&self) -> DigestCode {
        DigestCode::from_matter_code(self.matter().code()).unwrap_or(DigestCode::Blake3_256)
    }

    /// Whether `data` digests to this value with the same algorithm.
    pub fn verifies(&self, data: &[u8]) -> bool {
        self.digest_code().digest(data).as_slice() == self.matter().raw()
    }
}

/// A keypair for signing events.
///
/// This wraps ed25519-dalek's SigningKey.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    fn public_bytes(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    /// Transferable verification key (`D` code).
    pub fn verfer(&self) -> Verfer {
        Verfer(Matter::from_sized(MatterCode::Ed25519, self.public_bytes()))
    }

    /// Non-transferable identifier for this key (`B` code), as used by witnesses.
    pub fn non_transferable_prefix(&self) -> Prefix {
        Prefix(Matter::from_sized(MatterCode::Ed25519N, self.public_bytes()))
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let sig = self.signing_key.sign(message);
        Ed25519Signature(sig.to_bytes())
    }

    /// Get the raw seed bytes (secret key material).
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.verfer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_sign_verify() {
        let keypair = Keypair::generate();
        let message = b"hello world";
        let signature = keypair.sign(message);

        keypair
            .verfer()
            .verify(message, &signature)
            .expect("valid signature should verify");

        let tampered = b"hello worlD";
        assert!(keypair.verfer().verify(tampered, &signature).is_err());
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let seed = [0x42u8; 32];
        let kp1 = Keypair::from_seed(&seed);
        let kp2 = Keypair::from_seed(&seed);
        assert_eq!(kp1.verfer(), kp2.verfer());
        assert_eq!(kp1.seed(), seed);
    }

    #[test]
    fn test_non_transferable_prefix_verifies() {
        let keypair = Keypair::from_seed(&[7u8; 32]);
        let prefix = keypair.non_transferable_prefix();
        assert!(prefix.to_string().starts_with('B'));
        let verfer = prefix.verfer().expect("basic prefix carries a key");
        let sig = keypair.sign(b"receipt");
        assert!(verfer.verify(b"receipt", &sig).is_ok());
    }

    #[test]
    fn test_said_compute_and_verify() {
        let blake = Said::compute(DigestCode::Blake3_256, b"test data");
        assert!(blake.to_string().starts_with('E'));
        assert!(blake.verifies(b"test data"));
        assert!(!blake.verifies(b"other data"));

        let sha = Said::compute(DigestCode::Sha2_256, b"test data");
        assert!(sha.to_string().starts_with('I'));
        assert_eq!(sha.digest_code(), DigestCode::Sha2_256);
        assert_ne!(blake.matter().raw(), sha.matter().raw());
    }

    #[test]
    fn test_signature_matter_roundtrip() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let sig = keypair.sign(b"msg");
        let matter = sig.to_matter();
        assert_eq!(matter.qb64().len(), 88);
        assert_eq!(Ed25519Signature::from_matter(&matter), Some(sig));
    }
}
