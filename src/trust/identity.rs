// trust/identity.rs - Peer Identifiers and Ed25519 Keys

use derive_more::{Display, From};
use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{PkiError, Result};

/// Opaque identifier of a peer in the messaging network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Signature algorithms a certificate may name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    Ed25519,
}

impl SigningAlgorithm {
    pub const ED25519_NAME: &'static str = "Ed25519";

    pub fn name(&self) -> &'static str {
        match self {
            SigningAlgorithm::Ed25519 => Self::ED25519_NAME,
        }
    }

    /// Parse an algorithm name as carried on the wire
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            Self::ED25519_NAME => Some(SigningAlgorithm::Ed25519),
            _ => None,
        }
    }
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        SigningAlgorithm::Ed25519
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A subject's public key: the key algorithm name plus its encoded form.
///
/// The encoding is kept opaque so certificates naming an algorithm this
/// build cannot use still parse, store and forward; they just never verify.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    pub algorithm: String,
    pub encoded: Vec<u8>,
}

impl PublicKey {
    pub const ED25519: &'static str = "Ed25519";

    pub fn new(algorithm: impl Into<String>, encoded: Vec<u8>) -> Self {
        Self {
            algorithm: algorithm.into(),
            encoded,
        }
    }

    pub fn ed25519(key: &VerifyingKey) -> Self {
        Self::new(Self::ED25519, key.to_bytes().to_vec())
    }

    /// SHA-256 of the encoded key
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.algorithm.as_bytes());
        hasher.update(&self.encoded);
        hasher.finalize().into()
    }

    /// Short form for display (first 8 bytes as hex)
    pub fn short_fingerprint(&self) -> String {
        hex::encode(&self.fingerprint()[..8])
    }

    /// Decode into an Ed25519 verifying key if this is one.
    pub fn to_ed25519(&self) -> Result<VerifyingKey> {
        if self.algorithm != Self::ED25519 {
            return Err(PkiError::VerificationFailed(format!(
                "unsupported key algorithm {}",
                self.algorithm
            )));
        }
        let bytes: [u8; PUBLIC_KEY_LENGTH] =
            self.encoded.as_slice().try_into().map_err(|_| {
                PkiError::VerificationFailed(format!(
                    "Ed25519 key must be {PUBLIC_KEY_LENGTH} bytes, got {}",
                    self.encoded.len()
                ))
            })?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| PkiError::VerificationFailed(format!("invalid Ed25519 key: {e}")))
    }

    /// Check `signature` over `data` with this key.
    pub fn verify(&self, algorithm: SigningAlgorithm, data: &[u8], signature: &[u8]) -> Result<()> {
        match algorithm {
            SigningAlgorithm::Ed25519 => {
                let key = self.to_ed25519()?;
                let sig_bytes: [u8; SIGNATURE_LENGTH] = signature.try_into().map_err(|_| {
                    PkiError::VerificationFailed(format!(
                        "signature must be {SIGNATURE_LENGTH} bytes, got {}",
                        signature.len()
                    ))
                })?;
                key.verify(data, &Signature::from_bytes(&sig_bytes))
                    .map_err(|e| PkiError::VerificationFailed(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}:{})", self.algorithm, self.short_fingerprint())
    }
}

/// Signing key pair.
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; SECRET_KEY_LENGTH];
        rand::rng().fill_bytes(&mut secret_bytes);
        let signing_key = SigningKey::from_bytes(&secret_bytes);
        Self {
            verifying_key: signing_key.verifying_key(),
            signing_key,
        }
    }

    pub fn from_secret_key(secret_bytes: &[u8]) -> Result<Self> {
        let key_bytes: [u8; SECRET_KEY_LENGTH] = secret_bytes.try_into().map_err(|_| {
            PkiError::MalformedRecord(format!(
                "secret key must be {SECRET_KEY_LENGTH} bytes, got {}",
                secret_bytes.len()
            ))
        })?;
        let signing_key = SigningKey::from_bytes(&key_bytes);
        Ok(Self {
            verifying_key: signing_key.verifying_key(),
            signing_key,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::ed25519(&self.verifying_key)
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Ed25519
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    fn secret_key_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({})", self.public_key().short_fingerprint())
    }
}

/// The local peer: trust root of every score this crate computes.
#[derive(Debug)]
pub struct OwnerIdentity {
    id: PeerId,
    name: String,
    keys: KeyPair,
}

impl OwnerIdentity {
    pub fn new(id: impl Into<PeerId>, name: impl Into<String>, keys: KeyPair) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            keys,
        }
    }

    pub fn generate(id: impl Into<PeerId>, name: impl Into<String>) -> Self {
        Self::new(id, name, KeyPair::generate())
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    /// Export to serializable format (includes the secret key)
    pub fn export(&self) -> ExportedIdentity {
        ExportedIdentity {
            id: self.id.clone(),
            name: self.name.clone(),
            secret_key: self.keys.secret_key_bytes().to_vec(),
        }
    }

    pub fn import(exported: &ExportedIdentity) -> Result<Self> {
        Ok(Self::new(
            exported.id.clone(),
            exported.name.clone(),
            KeyPair::from_secret_key(&exported.secret_key)?,
        ))
    }
}

/// Exportable owner identity
#[derive(Serialize, Deserialize)]
pub struct ExportedIdentity {
    pub id: PeerId,
    pub name: String,
    pub secret_key: Vec<u8>,
}
