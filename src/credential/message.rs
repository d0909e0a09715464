// credential/message.rs - Credential Wire Message

use rand::Rng;
use std::fmt;

use crate::error::{PkiError, Result};
use crate::trust::{OwnerIdentity, PeerId, PublicKey};
use crate::wire::{WireReader, WireWriter};

/// Exclusive upper bound of a confirmation code (six decimal digits)
pub const CONFIRMATION_CODE_LIMIT: i32 = 1_000_000;

/// A peer's request to be certified: who it is, its key, and a code the two
/// humans compare out of band before the receiver signs.
///
/// Travels unstored; never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialMessage {
    subject_id: PeerId,
    subject_name: String,
    public_key: PublicKey,
    valid_since: i64,
    confirmation_code: i32,
    extra_data: Option<Vec<u8>>,

    /// Connection class that delivered the message, set on receipt
    received_via: Option<String>,
}

impl CredentialMessage {
    /// Build a message with a fresh random confirmation code.
    pub fn new(
        subject_id: PeerId,
        subject_name: impl Into<String>,
        public_key: PublicKey,
        valid_since: i64,
        extra_data: Option<Vec<u8>>,
    ) -> Self {
        Self {
            subject_id,
            subject_name: subject_name.into(),
            public_key,
            valid_since,
            confirmation_code: rand::rng().random_range(0..CONFIRMATION_CODE_LIMIT),
            extra_data,
            received_via: None,
        }
    }

    /// The owner's own credential
    pub fn for_owner(owner: &OwnerIdentity, valid_since: i64, extra_data: Option<Vec<u8>>) -> Self {
        Self::new(
            owner.id().clone(),
            owner.name(),
            owner.public_key(),
            valid_since,
            extra_data,
        )
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::new();
        w.put_str(self.subject_id.as_str())?;
        w.put_str(&self.subject_name)?;
        w.put_i32(self.confirmation_code);
        w.put_i64(self.valid_since);
        w.put_str(&self.public_key.algorithm)?;
        w.put_block(&self.public_key.encoded)?;
        if let Some(extra) = &self.extra_data {
            w.put_block(extra)?;
        }
        Ok(w.into_vec())
    }

    /// Parse a received message. `received_via` is the connection class the
    /// transport reports for it.
    pub fn parse(bytes: &[u8], received_via: Option<String>) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let subject_id = PeerId::new(r.get_str("subject id")?);
        let subject_name = r.get_str("subject name")?;
        let confirmation_code = r.get_i32("confirmation code")?;
        let valid_since = r.get_i64("valid since")?;
        let key_algorithm = r.get_str("key algorithm")?;
        let key_bytes = r.get_block("public key")?;
        let extra_data = if r.has_remaining() {
            Some(r.get_block("extra data")?)
        } else {
            None
        };
        r.finish("credential message")?;

        if !(0..CONFIRMATION_CODE_LIMIT).contains(&confirmation_code) {
            return Err(PkiError::MalformedRecord(format!(
                "confirmation code {confirmation_code} is not six digits"
            )));
        }

        Ok(Self {
            subject_id,
            subject_name,
            public_key: PublicKey::new(key_algorithm, key_bytes),
            valid_since,
            confirmation_code,
            extra_data,
            received_via,
        })
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

    pub fn confirmation_code(&self) -> i32 {
        self.confirmation_code
    }

    /// Zero-padded form shown to the humans, e.g. `004217`
    pub fn display_code(&self) -> String {
        format!("{:06}", self.confirmation_code)
    }

    pub fn extra_data(&self) -> Option<&[u8]> {
        self.extra_data.as_deref()
    }

    pub fn received_via(&self) -> Option<&str> {
        self.received_via.as_deref()
    }
}

impl fmt::Debug for CredentialMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMessage")
            .field("subject", &self.subject_id)
            .field("name", &self.subject_name)
            .field("key", &self.public_key)
            .field("code", &self.display_code())
            .field("received_via", &self.received_via)
            .finish()
    }
}
