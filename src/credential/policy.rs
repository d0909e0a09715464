// credential/policy.rs - Credential Acceptance Policy

use super::message::CredentialMessage;
use crate::trust::IdentityAssurance;

/// Outcome of reviewing a received credential
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialDecision {
    /// Sign the credential and broadcast the certificate
    Accept,
    Reject,
}

/// Decides whether the owner signs a received credential.
///
/// In a deployed peer this is a person comparing the confirmation code with
/// the sender face to face. `current` is what the owner already believes
/// about the sender, for display.
pub trait CredentialPolicy {
    fn decide(&mut self, message: &CredentialMessage, current: &IdentityAssurance) -> CredentialDecision;
}

impl<F> CredentialPolicy for F
where
    F: FnMut(&CredentialMessage, &IdentityAssurance) -> CredentialDecision,
{
    fn decide(&mut self, message: &CredentialMessage, current: &IdentityAssurance) -> CredentialDecision {
        self(message, current)
    }
}

/// Accept everything (for testing)
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl CredentialPolicy for AcceptAll {
    fn decide(&mut self, _: &CredentialMessage, _: &IdentityAssurance) -> CredentialDecision {
        CredentialDecision::Accept
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

impl CredentialPolicy for RejectAll {
    fn decide(&mut self, _: &CredentialMessage, _: &IdentityAssurance) -> CredentialDecision {
        CredentialDecision::Reject
    }
}

/// Accept only when the code matches one read out by the sender
#[derive(Debug, Clone)]
pub struct MatchConfirmationCode {
    expected: String,
}

impl MatchConfirmationCode {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl CredentialPolicy for MatchConfirmationCode {
    fn decide(&mut self, message: &CredentialMessage, _: &IdentityAssurance) -> CredentialDecision {
        if message.display_code() == self.expected {
            CredentialDecision::Accept
        } else {
            CredentialDecision::Reject
        }
    }
}
