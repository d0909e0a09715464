// peer.rs - Owner-Facing PKI Facade

//! One owner's PKI: its identity, certificate store, person registry and
//! credential exchange, behind a single entry point.
//!
//! Calls that mutate take `&mut self`; share between threads through
//! [`SharedPeerPki`].

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PkiConfig;
use crate::credential::{CredentialDecision, CredentialMessage, CredentialPolicy};
use crate::error::{PkiError, Result};
use crate::observability::{
    record_certificate_issued, record_certificates_evicted, record_credential_decision,
    record_credential_received, record_credential_sent, record_malformed_record,
};
use crate::registry::{
    get_decoded, put_encoded, ExtraDataStore, MemoryExtraDataStore, PersonRegistry,
    SledExtraDataStore,
};
use crate::transport::{ReachabilityFeed, Transport};
use crate::trust::{
    now_millis, Certificate, CertificateStore, ExportedIdentity, IdentityAssurance, OwnerIdentity,
    PeerId, PublicKey, SyncMarker, TrustAnchor,
};

const ROSTER_KEY: &str = "roster";
const SYNC_MARKER_KEY: &str = "sync_marker";
const OWNER_KEY: &str = "owner";

/// A [`PeerPki`] behind one lock
pub type SharedPeerPki<T> = Arc<Mutex<PeerPki<T>>>;

/// Open the extra-data store named by `config`: sled under `data_dir`, or
/// memory when no directory is set.
pub fn open_extra_data_store(config: &PkiConfig) -> Result<Arc<dyn ExtraDataStore>> {
    match &config.data_dir {
        Some(dir) => Ok(Arc::new(SledExtraDataStore::open(dir)?)),
        None => Ok(Arc::new(MemoryExtraDataStore::new())),
    }
}

/// Load the owner identity saved under `config`'s prefix, generating and
/// saving a new one on first run.
pub fn load_or_create_owner(
    extra: &dyn ExtraDataStore,
    config: &PkiConfig,
    id: impl Into<PeerId>,
    name: impl Into<String>,
) -> Result<OwnerIdentity> {
    let key = config.extra_key(OWNER_KEY);
    if let Some(exported) = get_decoded::<ExportedIdentity>(extra, &key)? {
        let owner = OwnerIdentity::import(&exported)?;
        debug!(owner = %owner.id(), "Loaded owner identity");
        return Ok(owner);
    }

    let owner = OwnerIdentity::generate(id, name);
    put_encoded(extra, &key, &owner.export())?;
    info!(
        owner = %owner.id(),
        fingerprint = %owner.public_key().short_fingerprint(),
        "Generated owner identity"
    );
    Ok(owner)
}

/// An accepted credential that could not be signed or stored.
#[derive(Debug)]
pub struct CredentialFailure {
    pub message: CredentialMessage,
    pub error: PkiError,
}

/// Result of one pass over the credential inbox.
#[derive(Debug, Default)]
pub struct CredentialOutcome {
    /// Certificates issued for accepted credentials
    pub signed: Vec<Certificate>,

    /// Credentials the policy turned down
    pub rejected: usize,

    pub failed: Vec<CredentialFailure>,
}

/// PKI state of a single owner.
pub struct PeerPki<T: Transport> {
    owner: OwnerIdentity,
    owner_key: PublicKey,
    store: CertificateStore<T>,
    registry: PersonRegistry,
    extra: Arc<dyn ExtraDataStore>,
    config: PkiConfig,
    sync_marker: SyncMarker,

    /// Reachable set at the last notification, for first-encounter sends
    reachable: HashSet<PeerId>,
}

impl<T: Transport> PeerPki<T> {
    /// Assemble the PKI, restoring the roster and sync marker from `extra`.
    pub fn new(
        owner: OwnerIdentity,
        transport: T,
        extra: Arc<dyn ExtraDataStore>,
        config: PkiConfig,
    ) -> Result<Self> {
        let registry = match extra.get(&config.extra_key(ROSTER_KEY))? {
            Some(memento) => PersonRegistry::from_memento(owner.id(), owner.name(), &memento)?,
            None => PersonRegistry::new(owner.id(), owner.name()),
        };
        let sync_marker =
            get_decoded::<SyncMarker>(extra.as_ref(), &config.extra_key(SYNC_MARKER_KEY))?
                .unwrap_or_default();

        info!(
            owner = %owner.id(),
            people = registry.len(),
            sync_marker = sync_marker.0,
            "Peer PKI ready"
        );

        Ok(Self {
            owner_key: owner.public_key(),
            store: CertificateStore::new(transport, config.certificate_channel.clone()),
            owner,
            registry,
            extra,
            config,
            sync_marker,
            reachable: HashSet::new(),
        })
    }

    pub fn owner(&self) -> &OwnerIdentity {
        &self.owner
    }

    pub fn registry(&self) -> &PersonRegistry {
        &self.registry
    }

    pub fn store(&self) -> &CertificateStore<T> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CertificateStore<T> {
        &mut self.store
    }

    pub fn config(&self) -> &PkiConfig {
        &self.config
    }

    pub fn into_shared(self) -> SharedPeerPki<T> {
        Arc::new(Mutex::new(self))
    }

    /// Full assurance result for `subject`: score plus supporting path.
    pub fn assurance(&mut self, subject: &PeerId) -> Result<IdentityAssurance> {
        let anchor = TrustAnchor {
            id: self.owner.id(),
            public_key: &self.owner_key,
        };
        self.store.identity_assurance(anchor, &self.registry, subject)
    }

    /// 0..=10 confidence that `subject` is who it claims to be
    pub fn identity_assurance(&mut self, subject: &PeerId) -> Result<u8> {
        Ok(self.assurance(subject)?.score)
    }

    /// The chain behind the current score, owner first; empty when no
    /// verified path exists.
    pub fn identity_assurance_path(&mut self, subject: &PeerId) -> Result<Vec<PeerId>> {
        Ok(self.assurance(subject)?.path)
    }

    /// Vouch for `subject_id` owning `public_key`.
    ///
    /// Replaces any certificate the owner issued for the subject before, so
    /// at most one owner-issued certificate per subject is live.
    pub fn add_and_sign_person(
        &mut self,
        subject_id: &PeerId,
        subject_name: &str,
        public_key: &PublicKey,
        valid_since: i64,
    ) -> Result<Certificate> {
        if subject_id == self.owner.id() {
            return Err(PkiError::SelfReferenceDenied(
                "the owner cannot certify itself".into(),
            ));
        }

        if self.registry.add_if_absent(subject_id, subject_name) {
            self.save_roster()?;
        }

        let previous: Vec<Certificate> = self
            .store
            .certificates_by_subject(subject_id)?
            .into_iter()
            .filter(|c| c.issuer_id() == self.owner.id())
            .collect();
        if !previous.is_empty() {
            self.store.remove(&previous)?;
            record_certificates_evicted("superseded", previous.len());
        }

        let certificate = Certificate::issue(
            self.owner.id(),
            self.owner.name(),
            self.owner.keys(),
            subject_id,
            subject_name,
            public_key,
            valid_since,
            self.owner.keys().algorithm(),
        )?;
        let address = self.store.store(&certificate)?;
        record_certificate_issued();

        info!(
            subject = %subject_id,
            key = %public_key.short_fingerprint(),
            replaced = previous.len(),
            "Issued certificate"
        );
        Ok(certificate.with_storage_address(address))
    }

    /// Sign a credential the owner has approved and hand the certificate to
    /// every reachable peer. Failing to push is logged, not returned.
    pub fn accept_and_sign_credential(&mut self, message: &CredentialMessage) -> Result<Certificate> {
        let certificate = self.add_and_sign_person(
            message.subject_id(),
            message.subject_name(),
            message.public_key(),
            message.valid_since(),
        )?;

        if let Some(address) = certificate.storage_address() {
            match self.store.transport().push_to_reachable(address) {
                Ok(peers) => debug!(subject = %message.subject_id(), peers, "Broadcast certificate"),
                Err(e) => warn!(subject = %message.subject_id(), error = %e, "Certificate broadcast failed"),
            }
        }
        Ok(certificate)
    }

    /// Register the subjects of certificates received since the last call.
    ///
    /// Returns whether anyone new was added.
    pub fn incorporate_received_certificates(&mut self) -> Result<bool> {
        let (fresh, marker) = self.store.newly_received_since(self.sync_marker)?;

        let mut added = 0usize;
        for cert in &fresh {
            if cert.subject_id() == self.owner.id() {
                continue;
            }
            if self.registry.add_if_absent(cert.subject_id(), cert.subject_name()) {
                added += 1;
            }
        }

        if added > 0 {
            self.save_roster()?;
        }
        if marker != self.sync_marker {
            self.sync_marker = marker;
            put_encoded(
                self.extra.as_ref(),
                &self.config.extra_key(SYNC_MARKER_KEY),
                &self.sync_marker,
            )?;
        }

        debug!(received = fresh.len(), added, "Incorporated received certificates");
        Ok(added > 0)
    }

    pub fn set_signing_failure_rate(&mut self, person: &PeerId, rate: i32) -> Result<()> {
        self.registry.set_failure_rate(person, rate)?;
        self.store.invalidate_assurance();
        self.save_roster()
    }

    /// Send the owner's credential to `peer` as an unstored message.
    ///
    /// The returned message carries the confirmation code to show the user.
    pub fn send_credential(&self, peer: &PeerId, extra_data: Option<Vec<u8>>) -> Result<CredentialMessage> {
        let message = CredentialMessage::for_owner(&self.owner, now_millis(), extra_data);
        self.store
            .transport()
            .send_unstored(peer, &self.config.credential_channel, message.as_bytes()?)?;
        record_credential_sent();
        info!(to = %peer, code = %message.display_code(), "Sent credential");
        Ok(message)
    }

    /// Review every credential waiting in the inbox with `policy` and sign
    /// the accepted ones.
    ///
    /// Malformed messages and ones naming the owner are dropped. Each
    /// message is handled on its own: one that cannot be scored or signed
    /// lands in [`CredentialOutcome::failed`] with its error, and the rest
    /// of the inbox is still processed. Nothing is retried here; pass a
    /// failed message to [`accept_and_sign_credential`](Self::accept_and_sign_credential)
    /// to try again.
    pub fn process_incoming_credentials(&mut self, policy: &mut dyn CredentialPolicy) -> CredentialOutcome {
        let inbound = self
            .store
            .transport()
            .drain_unstored(&self.config.credential_channel);

        let mut outcome = CredentialOutcome::default();
        for msg in inbound {
            let message = match CredentialMessage::parse(&msg.payload, Some(msg.connection.clone())) {
                Ok(message) => message,
                Err(e) => {
                    warn!(from = %msg.from, error = %e, "Dropping malformed credential");
                    record_malformed_record("credential");
                    continue;
                }
            };
            record_credential_received(&msg.connection);

            if message.subject_id() == self.owner.id() {
                warn!(from = %msg.from, "Dropping credential that names the owner");
                continue;
            }

            match self.review_credential(policy, &message) {
                Ok(Some(certificate)) => outcome.signed.push(certificate),
                Ok(None) => outcome.rejected += 1,
                Err(error) => {
                    warn!(subject = %message.subject_id(), %error, "Credential not signed");
                    outcome.failed.push(CredentialFailure { message, error });
                }
            }
        }

        debug!(
            signed = outcome.signed.len(),
            rejected = outcome.rejected,
            failed = outcome.failed.len(),
            "Credential inbox processed"
        );
        outcome
    }

    fn review_credential(
        &mut self,
        policy: &mut dyn CredentialPolicy,
        message: &CredentialMessage,
    ) -> Result<Option<Certificate>> {
        let current = self.assurance(message.subject_id())?;
        let decision = policy.decide(message, &current);
        record_credential_decision(decision == CredentialDecision::Accept);
        debug!(
            subject = %message.subject_id(),
            via = message.received_via().unwrap_or("unknown"),
            code = %message.display_code(),
            ?decision,
            "Credential reviewed"
        );

        match decision {
            CredentialDecision::Accept => self.accept_and_sign_credential(message).map(Some),
            CredentialDecision::Reject => Ok(None),
        }
    }

    /// React to a new reachable set. With first-encounter enabled, each
    /// newly reachable peer that has not certified the owner is sent the
    /// owner's credential. Returns how many were sent.
    ///
    /// A peer whose lookup or send fails is not remembered as reachable, so
    /// the next notification that lists it tries again.
    pub fn handle_peers_changed(&mut self, peers: &[PeerId]) -> Result<usize> {
        let mut now: HashSet<PeerId> = peers.iter().cloned().collect();
        let newly: Vec<PeerId> = now.difference(&self.reachable).cloned().collect();

        if !self.config.first_encounter {
            self.reachable = now;
            return Ok(0);
        }

        let mut sent = 0;
        for peer in newly.iter().filter(|p| *p != self.owner.id()) {
            match self.store.certificate_by_issuer_and_subject(peer, self.owner.id()) {
                Ok(_) => continue,
                Err(PkiError::NotFound(_)) => {}
                Err(e) => {
                    warn!(peer = %peer, error = %e, "First-encounter lookup failed");
                    now.remove(peer);
                    continue;
                }
            }
            match self.send_credential(peer, None) {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!(to = %peer, error = %e, "First-encounter credential not sent");
                    now.remove(peer);
                }
            }
        }

        self.reachable = now;
        Ok(sent)
    }

    /// Drop the subject index and assurance cache; the next query reloads
    /// from the transport.
    pub fn sync(&mut self) {
        self.store.drop_cache();
    }

    /// Certificates the owner has issued, for roster display
    pub fn certificates_issued_by_owner(&mut self) -> Result<Vec<Certificate>> {
        let owner = self.owner.id().clone();
        self.store.certificates_by_issuer(&owner)
    }

    pub fn save_roster(&self) -> Result<()> {
        self.extra
            .put(&self.config.extra_key(ROSTER_KEY), &self.registry.to_memento()?)
    }
}

impl<T: Transport + 'static> PeerPki<T> {
    /// Run [`PeerPki::handle_peers_changed`] on every notification from
    /// `feed`. The registration holds only a weak reference.
    pub fn attach_first_encounter(shared: &SharedPeerPki<T>, feed: &dyn ReachabilityFeed) {
        let weak = Arc::downgrade(shared);
        feed.on_peers_changed(Box::new(move |peers| {
            let Some(pki) = weak.upgrade() else {
                return;
            };
            if let Err(e) = pki.lock().handle_peers_changed(peers) {
                warn!(error = %e, "Reachability change handling failed");
            }
        }));
    }
}
