// trust/store.rs - Epoch-Backed Certificate Store

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::assurance::AssuranceCache;
use super::certificate::{now_millis, Certificate};
use super::identity::PeerId;
use crate::error::{PkiError, Result};
use crate::observability::{record_certificates_evicted, record_index_rebuild, record_malformed_record};
use crate::transport::{StorageAddress, StoredRecord, Transport};

/// Position in the transport's arrival order up to which received
/// certificates have already been looked at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncMarker(pub u64);

/// Subject-keyed view of every live certificate on the channel.
///
/// Built lazily from the transport and dropped whole on any mutation; there
/// is no incremental update.
#[derive(Debug, Default)]
pub struct SubjectIndex {
    built: Option<BuiltIndex>,
}

#[derive(Debug, Default)]
struct BuiltIndex {
    by_subject: HashMap<PeerId, Vec<Certificate>>,
    arrivals: Vec<(u64, Certificate)>,

    /// Highest transport sequence number read while building
    high_water: u64,
}

impl SubjectIndex {
    pub fn invalidate(&mut self) {
        self.built = None;
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Number of indexed certificates, 0 if not built
    pub fn len(&self) -> usize {
        self.built.as_ref().map(|b| b.arrivals.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Certificate collection persisted on one transport channel.
pub struct CertificateStore<T: Transport> {
    transport: T,
    channel: String,
    index: SubjectIndex,
    pub(crate) assurance: AssuranceCache,
}

impl<T: Transport> CertificateStore<T> {
    pub fn new(transport: T, channel: impl Into<String>) -> Self {
        Self {
            transport,
            channel: channel.into(),
            index: SubjectIndex::default(),
            assurance: AssuranceCache::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn index(&self) -> &SubjectIndex {
        &self.index
    }

    /// Drop the subject index and every cached assurance score
    pub fn drop_cache(&mut self) {
        self.index.invalidate();
        self.assurance.invalidate();
    }

    pub fn invalidate_assurance(&mut self) {
        self.assurance.invalidate();
    }

    /// Visit every record on the channel, oldest epoch first.
    fn for_each_record(&self, mut visit: impl FnMut(StoredRecord)) -> Result<()> {
        let current = self.transport.current_epoch()?;
        let mut epoch = self.transport.oldest_epoch()?;
        loop {
            for record in self.transport.read_epoch_records(&self.channel, epoch)? {
                visit(record);
            }

            if epoch >= current {
                return Ok(());
            }
            match self.transport.next_epoch(epoch) {
                Some(next) => epoch = next,
                None => return Ok(()),
            }
        }
    }

    /// Rebuild the subject index now.
    ///
    /// Scans every live epoch oldest to newest. Records that fail to parse
    /// are skipped; expired certificates are left out and deleted from the
    /// transport.
    pub fn rebuild(&mut self) -> Result<()> {
        let now = now_millis();
        let mut built = BuiltIndex::default();
        let mut expired = Vec::new();
        let mut malformed = 0usize;

        self.for_each_record(|record| {
            built.high_water = built.high_water.max(record.sequence);
            match Certificate::parse(&record.payload, Some(record.address.clone())) {
                Ok(cert) if cert.is_expired_at(now) => {
                    debug!(subject = %cert.subject_id(), issuer = %cert.issuer_id(), "Evicting expired certificate");
                    expired.push(cert);
                }
                Ok(cert) => {
                    built
                        .by_subject
                        .entry(cert.subject_id().clone())
                        .or_default()
                        .push(cert.clone());
                    built.arrivals.push((record.sequence, cert));
                }
                Err(e) => {
                    malformed += 1;
                    warn!(address = %record.address, error = %e, "Skipping malformed certificate record");
                    record_malformed_record("certificate");
                }
            }
        })?;

        let total = built.arrivals.len();
        self.index.built = Some(built);
        record_index_rebuild(total);
        info!(
            channel = %self.channel,
            certificates = total,
            expired = expired.len(),
            malformed,
            "Certificate index rebuilt"
        );

        if !expired.is_empty() {
            self.delete_from_transport(&expired)?;
            record_certificates_evicted("expired", expired.len());
        }
        Ok(())
    }

    fn built(&mut self) -> Result<&BuiltIndex> {
        if !self.index.is_built() {
            self.rebuild()?;
        }
        self.index
            .built
            .as_ref()
            .ok_or_else(|| PkiError::StorageUnavailable("certificate index unavailable".into()))
    }

    /// Live certificates naming `subject`; empty when the subject is unknown.
    pub fn certificates_by_subject(&mut self, subject: &PeerId) -> Result<Vec<Certificate>> {
        Ok(self
            .built()?
            .by_subject
            .get(subject)
            .cloned()
            .unwrap_or_default())
    }

    /// Live certificates signed by `issuer`. Scans the whole index.
    pub fn certificates_by_issuer(&mut self, issuer: &PeerId) -> Result<Vec<Certificate>> {
        Ok(self
            .built()?
            .by_subject
            .values()
            .flatten()
            .filter(|c| c.issuer_id() == issuer)
            .cloned()
            .collect())
    }

    pub fn certificate_by_issuer_and_subject(
        &mut self,
        issuer: &PeerId,
        subject: &PeerId,
    ) -> Result<Certificate> {
        self.built()?
            .by_subject
            .get(subject)
            .and_then(|certs| certs.iter().find(|c| c.issuer_id() == issuer))
            .cloned()
            .ok_or_else(|| PkiError::NotFound(format!("no certificate from {issuer} for {subject}")))
    }

    pub fn all_certificates(&mut self) -> Result<Vec<Certificate>> {
        Ok(self.built()?.arrivals.iter().map(|(_, c)| c.clone()).collect())
    }

    /// Certificates that arrived after `marker`, with the marker to pass
    /// next time.
    ///
    /// Reads the transport rather than the index, so certificates delivered
    /// by other peers show up without a prior [`drop_cache`](Self::drop_cache).
    /// Expired and malformed records are skipped. If anything arrived that
    /// the index has not seen, the index and assurance cache are dropped.
    pub fn newly_received_since(&mut self, marker: SyncMarker) -> Result<(Vec<Certificate>, SyncMarker)> {
        let now = now_millis();
        let mut latest = marker;
        let mut newest_seen = 0u64;
        let mut fresh: Vec<(u64, Certificate)> = Vec::new();

        self.for_each_record(|record| {
            newest_seen = newest_seen.max(record.sequence);
            if record.sequence <= marker.0 {
                return;
            }
            latest = latest.max(SyncMarker(record.sequence));
            match Certificate::parse(&record.payload, Some(record.address.clone())) {
                Ok(cert) if !cert.is_expired_at(now) => fresh.push((record.sequence, cert)),
                Ok(_) => {}
                Err(e) => debug!(address = %record.address, error = %e, "Ignoring malformed received record"),
            }
        })?;

        let stale = self
            .index
            .built
            .as_ref()
            .is_some_and(|b| newest_seen > b.high_water);
        if stale {
            debug!(channel = %self.channel, "Received certificates outdate the index");
            self.drop_cache();
        }

        fresh.sort_by_key(|(seq, _)| *seq);
        Ok((fresh.into_iter().map(|(_, c)| c).collect(), latest))
    }

    /// Persist a certificate and return where it was put.
    pub fn store(&mut self, certificate: &Certificate) -> Result<StorageAddress> {
        self.drop_cache();
        let address = self
            .transport
            .append_record(&self.channel, vec![certificate.as_bytes()?])?;
        debug!(
            subject = %certificate.subject_id(),
            issuer = %certificate.issuer_id(),
            %address,
            "Stored certificate"
        );
        Ok(address)
    }

    /// Delete certificates from the transport.
    ///
    /// Certificates without a locatable record are skipped with a warning.
    pub fn remove(&mut self, certificates: &[Certificate]) -> Result<()> {
        self.drop_cache();
        self.delete_from_transport(certificates)
    }

    fn delete_from_transport(&self, certificates: &[Certificate]) -> Result<()> {
        let mut by_address: HashMap<&StorageAddress, Vec<Vec<u8>>> = HashMap::new();
        for cert in certificates {
            match cert.storage_address() {
                Some(address) => by_address.entry(address).or_default().push(cert.as_bytes()?),
                None => warn!(
                    subject = %cert.subject_id(),
                    issuer = %cert.issuer_id(),
                    "Cannot remove certificate without a storage address"
                ),
            }
        }

        for (address, doomed) in by_address {
            let Some(held) = self.transport.read_unit(address)? else {
                warn!(%address, "Certificate record already gone");
                continue;
            };

            let mut remaining = held.clone();
            for bytes in &doomed {
                if let Some(pos) = remaining.iter().position(|r| r == bytes) {
                    remaining.remove(pos);
                }
            }

            if remaining.len() == held.len() {
                warn!(%address, "Certificate not found in its record");
            } else if remaining.is_empty() {
                self.transport.delete_record(address)?;
            } else {
                self.transport.rewrite_unit(address, remaining)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Epoch, MemoryNetwork, MemoryTransport};
    use crate::trust::certificate::VALIDITY_PERIOD_MS;
    use crate::trust::identity::{KeyPair, SigningAlgorithm};

    const CHANNEL: &str = "pki.certificates";

    fn store() -> CertificateStore<MemoryTransport> {
        CertificateStore::new(MemoryNetwork::new().join("owner"), CHANNEL)
    }

    fn cert(issuer: &str, subject: &str, valid_since: i64) -> Certificate {
        Certificate::issue(
            &PeerId::from(issuer),
            issuer,
            &KeyPair::generate(),
            &PeerId::from(subject),
            subject,
            &KeyPair::generate().public_key(),
            valid_since,
            SigningAlgorithm::Ed25519,
        )
        .unwrap()
    }

    #[test]
    fn test_store_then_lookup() {
        let mut store = store();
        let c = cert("alice", "bob", now_millis());
        let address = store.store(&c).unwrap();

        let found = store.certificates_by_subject(&PeerId::from("bob")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].storage_address(), Some(&address));
        assert!(found[0].is_identical(&c));

        assert_eq!(store.certificates_by_issuer(&PeerId::from("alice")).unwrap().len(), 1);
        assert!(store.certificates_by_issuer(&PeerId::from("bob")).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_subject_is_empty() {
        let mut store = store();
        assert!(store.certificates_by_subject(&PeerId::from("nobody")).unwrap().is_empty());
    }

    #[test]
    fn test_issuer_and_subject_not_found() {
        let mut store = store();
        store.store(&cert("alice", "bob", now_millis())).unwrap();

        assert!(store
            .certificate_by_issuer_and_subject(&PeerId::from("alice"), &PeerId::from("bob"))
            .is_ok());
        let missing =
            store.certificate_by_issuer_and_subject(&PeerId::from("carol"), &PeerId::from("bob"));
        assert!(matches!(missing, Err(PkiError::NotFound(_))));
    }

    #[test]
    fn test_store_invalidates_index() {
        let mut store = store();
        store.certificates_by_subject(&PeerId::from("bob")).unwrap();
        assert!(store.index().is_built());

        store.store(&cert("alice", "bob", now_millis())).unwrap();
        assert!(!store.index().is_built());
        assert_eq!(store.certificates_by_subject(&PeerId::from("bob")).unwrap().len(), 1);
    }

    #[test]
    fn test_expired_certificates_are_evicted() {
        let mut store = store();
        let stale = cert("alice", "bob", now_millis() - 2 * VALIDITY_PERIOD_MS);
        store.store(&stale).unwrap();
        store.store(&cert("alice", "carol", now_millis())).unwrap();
        assert_eq!(store.transport().unit_count(CHANNEL), 2);

        assert!(store.certificates_by_subject(&PeerId::from("bob")).unwrap().is_empty());
        assert_eq!(store.transport().unit_count(CHANNEL), 1);
    }

    #[test]
    fn test_rebuild_walks_every_live_epoch() {
        let mut store = store();
        store.store(&cert("alice", "bob", now_millis())).unwrap();
        store.transport().advance_epoch().unwrap();
        store.store(&cert("carol", "bob", now_millis())).unwrap();

        assert_eq!(store.certificates_by_subject(&PeerId::from("bob")).unwrap().len(), 2);

        store.transport().retire_epochs_before(Epoch(1)).unwrap();
        store.drop_cache();
        let left = store.certificates_by_subject(&PeerId::from("bob")).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].issuer_id(), &PeerId::from("carol"));
    }

    #[test]
    fn test_malformed_record_does_not_halt_rebuild() {
        let mut store = store();
        store.transport().append_record(CHANNEL, vec![vec![0, 3, 1]]).unwrap();
        store.store(&cert("alice", "bob", now_millis())).unwrap();

        assert_eq!(store.certificates_by_subject(&PeerId::from("bob")).unwrap().len(), 1);
        assert_eq!(store.index().len(), 1);
    }

    #[test]
    fn test_remove_rewrites_shared_unit() {
        let mut store = store();
        let a = cert("alice", "bob", now_millis());
        let b = cert("alice", "carol", now_millis());
        store
            .transport()
            .append_record(CHANNEL, vec![a.as_bytes().unwrap(), b.as_bytes().unwrap()])
            .unwrap();

        let bob = store.certificates_by_subject(&PeerId::from("bob")).unwrap();
        store.remove(&bob).unwrap();

        assert_eq!(store.transport().unit_count(CHANNEL), 1);
        assert!(store.certificates_by_subject(&PeerId::from("bob")).unwrap().is_empty());
        assert_eq!(store.certificates_by_subject(&PeerId::from("carol")).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_drops_single_record_unit() {
        let mut store = store();
        store.store(&cert("alice", "bob", now_millis())).unwrap();
        let bob = store.certificates_by_subject(&PeerId::from("bob")).unwrap();

        store.remove(&bob).unwrap();
        assert_eq!(store.transport().unit_count(CHANNEL), 0);
    }

    #[test]
    fn test_remove_unlocatable_is_noop() {
        let mut store = store();
        let never_stored = cert("alice", "bob", now_millis());
        store.remove(&[never_stored]).unwrap();

        store.store(&cert("alice", "bob", now_millis())).unwrap();
        let stored = store.certificates_by_subject(&PeerId::from("bob")).unwrap();
        store.remove(&stored).unwrap();
        // Second removal finds nothing at the address
        store.remove(&stored).unwrap();
    }

    #[test]
    fn test_newly_received_since() {
        let mut store = store();
        store.store(&cert("alice", "bob", now_millis())).unwrap();

        let (first, marker) = store.newly_received_since(SyncMarker::default()).unwrap();
        assert_eq!(first.len(), 1);

        let (none, same) = store.newly_received_since(marker).unwrap();
        assert!(none.is_empty());
        assert_eq!(same, marker);

        store.store(&cert("alice", "carol", now_millis())).unwrap();
        let (second, later) = store.newly_received_since(marker).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].subject_id(), &PeerId::from("carol"));
        assert!(later > marker);
    }

    #[test]
    fn test_delivered_certificates_seen_without_dropping_cache() {
        let network = MemoryNetwork::new();
        let mut local = CertificateStore::new(network.join("owner"), CHANNEL);
        let mut remote = CertificateStore::new(network.join("gloria"), CHANNEL);
        network.connect(&PeerId::from("owner"), &PeerId::from("gloria"), "wifi");

        // Warm the index before anything arrives
        assert!(local.all_certificates().unwrap().is_empty());
        let (_, marker) = local.newly_received_since(SyncMarker::default()).unwrap();
        assert!(local.index().is_built());

        let address = remote.store(&cert("gloria", "hassan", now_millis())).unwrap();
        assert_eq!(remote.transport().push_to_reachable(&address).unwrap(), 1);

        let (fresh, later) = local.newly_received_since(marker).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].subject_id(), &PeerId::from("hassan"));
        assert!(later > marker);

        // The stale index was dropped, so lookups see the delivery too
        assert!(!local.index().is_built());
        assert_eq!(local.certificates_by_subject(&PeerId::from("hassan")).unwrap().len(), 1);
    }

    #[test]
    fn test_newly_received_skips_expired_and_malformed() {
        let mut store = store();
        store.transport().append_record(CHANNEL, vec![vec![0, 3, 1]]).unwrap();
        store
            .store(&cert("alice", "bob", now_millis() - 2 * VALIDITY_PERIOD_MS))
            .unwrap();
        store.store(&cert("alice", "carol", now_millis())).unwrap();

        let (fresh, marker) = store.newly_received_since(SyncMarker::default()).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].subject_id(), &PeerId::from("carol"));
        assert_eq!(marker, SyncMarker(3));
    }
}
