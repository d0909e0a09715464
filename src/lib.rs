// lib.rs - Peer-Local PKI
//
// Certificates, identity assurance over certificate chains, and credential
// exchange for delay-tolerant peer-to-peer messaging.

#![doc = include_str!("../README.md")]

pub mod config;
pub mod credential;
pub mod error;
pub mod observability;
pub mod peer;
pub mod registry;
pub mod transport;
pub mod trust;
pub mod wire;

// Re-export commonly used types
pub use config::PkiConfig;

pub use credential::{CredentialDecision, CredentialMessage, CredentialPolicy};

pub use error::{PkiError, Result};

pub use peer::{
    load_or_create_owner, open_extra_data_store, CredentialFailure, CredentialOutcome, PeerPki,
    SharedPeerPki,
};

pub use registry::{ExtraDataStore, Person, PersonRegistry};

pub use transport::{Epoch, ReachabilityFeed, StorageAddress, Transport};

pub use trust::{
    Certificate, CertificateStore, IdentityAssurance, KeyPair, OwnerIdentity, PeerId, PublicKey,
    SigningAlgorithm,
};

pub use observability::{init_metrics, init_tracing, MetricsConfig, MetricsHandle, TracingConfig, TracingFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::credential::{
        AcceptAll, CredentialDecision, CredentialMessage, CredentialPolicy, MatchConfirmationCode,
        RejectAll,
    };
    pub use crate::peer::{CredentialOutcome, PeerPki, SharedPeerPki};
    pub use crate::registry::{ExtraDataStore, MemoryExtraDataStore, SledExtraDataStore};
    pub use crate::transport::{MemoryNetwork, MemoryTransport, Transport};
    pub use crate::trust::{Certificate, IdentityAssurance, OwnerIdentity, PeerId, PublicKey};
    pub use crate::{PkiConfig, PkiError};
}
