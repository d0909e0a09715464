// trust/certificate.rs - Signed Identity Certificates

use chrono::Utc;
use std::fmt;
use tracing::debug;

use super::identity::{KeyPair, PeerId, PublicKey, SigningAlgorithm};
use crate::error::{PkiError, Result};
use crate::transport::StorageAddress;
use crate::wire::{WireReader, WireWriter};

/// Validity period of every issued certificate: one year, in milliseconds.
pub const VALIDITY_PERIOD_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Statement by an issuer that a subject owns a public key.
///
/// Immutable once issued. The signature covers every field except the
/// storage address, laid out exactly as in [`Certificate::as_bytes`].
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    issuer_id: PeerId,
    issuer_name: String,
    subject_id: PeerId,
    subject_name: String,
    public_key: PublicKey,
    valid_since: i64,
    valid_until: i64,
    signing_algorithm: String,
    signature: Vec<u8>,
    storage_address: Option<StorageAddress>,
}

impl Certificate {
    /// Create and sign a certificate.
    ///
    /// A `valid_since` in the future is clamped to now: a not-yet-valid
    /// signature could not be checked until that time.
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        issuer_id: &PeerId,
        issuer_name: &str,
        issuer_keys: &KeyPair,
        subject_id: &PeerId,
        subject_name: &str,
        subject_public_key: &PublicKey,
        valid_since: i64,
        signing_algorithm: SigningAlgorithm,
    ) -> Result<Self> {
        let valid_since = valid_since.min(now_millis());
        let mut cert = Certificate {
            issuer_id: issuer_id.clone(),
            issuer_name: issuer_name.to_string(),
            subject_id: subject_id.clone(),
            subject_name: subject_name.to_string(),
            public_key: subject_public_key.clone(),
            valid_since,
            valid_until: valid_since + VALIDITY_PERIOD_MS,
            signing_algorithm: signing_algorithm.name().to_string(),
            signature: Vec::new(),
            storage_address: None,
        };

        let data = cert.signable_bytes()?;
        cert.signature = issuer_keys.sign(&data);
        Ok(cert)
    }

    /// Canonical byte sequence covered by the signature
    fn signable_bytes(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::new();
        self.write_signed_fields(&mut w)?;
        Ok(w.into_vec())
    }

    fn write_signed_fields(&self, w: &mut WireWriter) -> Result<()> {
        w.put_str(self.issuer_id.as_str())?;
        w.put_str(&self.issuer_name)?;
        w.put_str(self.subject_id.as_str())?;
        w.put_str(&self.subject_name)?;
        w.put_i64(self.valid_since);
        w.put_i64(self.valid_until);
        w.put_str(&self.signing_algorithm)?;
        w.put_str(&self.public_key.algorithm)?;
        w.put_block(&self.public_key.encoded)?;
        Ok(())
    }

    /// Check the signature against `candidate`, the key believed to belong
    /// to the issuer.
    ///
    /// Never fails loudly: a foreign, malformed or wrong key yields `false`.
    pub fn verify(&self, candidate: &PublicKey) -> bool {
        let Some(algorithm) = SigningAlgorithm::from_name(&self.signing_algorithm) else {
            debug!(
                issuer = %self.issuer_id,
                subject = %self.subject_id,
                algorithm = %self.signing_algorithm,
                "Unsupported signing algorithm"
            );
            return false;
        };

        let outcome = self
            .signable_bytes()
            .and_then(|data| candidate.verify(algorithm, &data, &self.signature));

        match outcome {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    issuer = %self.issuer_id,
                    subject = %self.subject_id,
                    error = %e,
                    "Certificate did not verify"
                );
                false
            }
        }
    }

    /// Same issuer, subject, validity window and key.
    pub fn is_identical(&self, other: &Certificate) -> bool {
        self.subject_id == other.subject_id
            && self.issuer_id == other.issuer_id
            && self.valid_since == other.valid_since
            && self.valid_until == other.valid_until
            && self.public_key == other.public_key
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.valid_until < now_ms
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::new();
        self.write_signed_fields(&mut w)?;
        w.put_block(&self.signature)?;
        Ok(w.into_vec())
    }

    /// Parse a stored record. The address is where it was read from.
    pub fn parse(bytes: &[u8], storage_address: Option<StorageAddress>) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let issuer_id = PeerId::new(r.get_str("issuer id")?);
        let issuer_name = r.get_str("issuer name")?;
        let subject_id = PeerId::new(r.get_str("subject id")?);
        let subject_name = r.get_str("subject name")?;
        let valid_since = r.get_i64("valid since")?;
        let valid_until = r.get_i64("valid until")?;
        let signing_algorithm = r.get_str("signing algorithm")?;
        let key_algorithm = r.get_str("key algorithm")?;
        let key_bytes = r.get_block("public key")?;
        let signature = r.get_block("signature")?;
        r.finish("certificate")?;

        if valid_since >= valid_until {
            return Err(PkiError::MalformedRecord(format!(
                "certificate for {subject_id} has empty validity window"
            )));
        }

        Ok(Certificate {
            issuer_id,
            issuer_name,
            subject_id,
            subject_name,
            public_key: PublicKey::new(key_algorithm, key_bytes),
            valid_since,
            valid_until,
            signing_algorithm,
            signature,
            storage_address,
        })
    }

    pub fn with_storage_address(mut self, address: StorageAddress) -> Self {
        self.storage_address = Some(address);
        self
    }

    pub fn issuer_id(&self) -> &PeerId {
        &self.issuer_id
    }

    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    pub fn subject_id(&self) -> &PeerId {
        &self.subject_id
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn valid_since(&self) -> i64 {
        self.valid_since
    }

    pub fn valid_until(&self) -> i64 {
        self.valid_until
    }

    pub fn signing_algorithm(&self) -> &str {
        &self.signing_algorithm
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn storage_address(&self) -> Option<&StorageAddress> {
        self.storage_address.as_ref()
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("issuer", &self.issuer_id)
            .field("subject", &self.subject_id)
            .field("key", &self.public_key)
            .field("valid_since", &self.valid_since)
            .field("valid_until", &self.valid_until)
            .finish()
    }
}
