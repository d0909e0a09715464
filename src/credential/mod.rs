// credential/mod.rs - Credential Exchange

//! Messages one peer sends another to ask for a certificate, and the policy
//! hook that decides whether to grant it.
//!
//! ```text
//!  peer A                                   peer B
//!    | -- CredentialMessage (unstored) -->   |
//!    |                                   policy: accept?
//!    |                                   issue + store certificate
//!    | <-- certificate (pushed unit) ------  |
//!  incorporate_received_certificates
//! ```

mod message;
mod policy;

pub use message::{CredentialMessage, CONFIRMATION_CODE_LIMIT};

pub use policy::{AcceptAll, CredentialDecision, CredentialPolicy, MatchConfirmationCode, RejectAll};
