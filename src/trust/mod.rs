// trust/mod.rs - Certificates and Identity Assurance

//! Peer-local certificate handling.
//!
//! - **Identity**: peer IDs and Ed25519 keys for the owner and its contacts
//! - **Certificate**: signed issuer/subject/key statements with a one-year window
//! - **Store**: certificates persisted on a transport channel, indexed by subject
//! - **Assurance**: 0..=10 confidence scores over chains of certificates
//!
//! # Example
//!
//! ```ignore
//! use peer_pki::trust::*;
//!
//! let owner = OwnerIdentity::generate("peer-a", "Alice");
//! let mut store = CertificateStore::new(transport, "pki.certificates");
//!
//! let owner_key = owner.public_key();
//! let anchor = TrustAnchor { id: owner.id(), public_key: &owner_key };
//! let assurance = store.identity_assurance(anchor, &registry, &subject)?;
//! ```

mod assurance;
mod certificate;
mod identity;
mod store;

pub use identity::{ExportedIdentity, KeyPair, OwnerIdentity, PeerId, PublicKey, SigningAlgorithm};

pub use certificate::{now_millis, Certificate, VALIDITY_PERIOD_MS};

pub use store::{CertificateStore, SubjectIndex, SyncMarker};

pub use assurance::{
    best_path_to_issuer, compute_assurance, score_from_probability, AssuranceCache, ChainSource,
    CertificationPath, FailureRates, IdentityAssurance, TrustAnchor, MAX_ASSURANCE,
};
