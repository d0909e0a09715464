// trust/assurance.rs - Identity Assurance over Certificate Chains

//! Scores how sure the owner can be that a peer is who it claims to be.
//!
//! Certificates form a graph keyed by peer ID: an edge from issuer to
//! subject. To score subject `U`, the search walks backward from each
//! certificate naming `U`, following the issuer, looking up certificates
//! that name that issuer, and so on until it reaches a certificate the owner
//! signed. Every hop is checked with the key carried by the certificate one
//! step closer to the owner.
//!
//! A path `owner -> p1 -> ... -> pk -> U` is worth
//! `(1 - rate(p1)/10) * ... * (1 - rate(pk)/10)`; the best path wins and is
//! scaled to 0..=10.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{error, trace};

use super::certificate::Certificate;
use super::identity::{PeerId, PublicKey};
use super::store::CertificateStore;
use crate::error::Result;
use crate::observability::{record_assurance_computation, record_certificates_evicted};
use crate::transport::Transport;

/// Score given to the owner itself and to peers it certified directly
pub const MAX_ASSURANCE: u8 = 10;

/// A computed score plus the path that earned it.
///
/// The path runs from the owner to the subject and is kept for display only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAssurance {
    pub score: u8,
    pub path: Vec<PeerId>,
}

impl IdentityAssurance {
    /// No verifiable path
    pub fn none() -> Self {
        Self {
            score: 0,
            path: Vec::new(),
        }
    }
}

/// Convert a path probability to a 0..=10 score.
///
/// Scales first, then rounds half up on the scaled value: 0.25 -> 2.5 -> 3,
/// 0.45 -> 4.5 -> 5, 0.125 -> 1.25 -> 1.
///
/// The arithmetic is plain `f64`, so a product that is exactly a half step
/// on paper can land just below it. Rates 5 and 9 give
/// `0.5 * (1.0 - 0.9) * 10.0 == 0.4999999999999999`, which scores 0.
pub fn score_from_probability(probability: f64) -> u8 {
    let scaled = probability * 10.0;
    let mut score = scaled.floor();
    if scaled - score >= 0.5 {
        score += 1.0;
    }
    score.clamp(0.0, f64::from(MAX_ASSURANCE)) as u8
}

/// The owner as seen by the search: the ID chains must end at and the key
/// that must verify the final hop.
#[derive(Clone, Copy, Debug)]
pub struct TrustAnchor<'a> {
    pub id: &'a PeerId,
    pub public_key: &'a PublicKey,
}

/// Private per-peer estimate of how often a peer signs for the wrong
/// identity, 0 (never) to 10 (always).
pub trait FailureRates {
    fn failure_rate(&self, peer: &PeerId) -> u8;
}

/// What the search needs from wherever certificates live.
pub trait ChainSource {
    /// Every certificate naming `subject`
    fn certificates_for(&mut self, subject: &PeerId) -> Result<Vec<Certificate>>;

    fn failure_rate(&self, peer: &PeerId) -> u8;

    /// Called when a certificate claiming to be the owner's does not verify
    /// with the owner's key.
    fn report_corrupt(&mut self, certificate: &Certificate);
}

/// A verified chain from the owner to some issuer.
#[derive(Clone, Debug, PartialEq)]
pub struct CertificationPath {
    pub probability: f64,

    /// Owner first
    pub peers: Vec<PeerId>,
}

impl CertificationPath {
    fn beats(&self, other: &CertificationPath) -> bool {
        self.probability > other.probability
            || (self.probability == other.probability && self.peers.len() < other.peers.len())
    }
}

fn keep_best(best: &mut Option<CertificationPath>, candidate: CertificationPath) {
    if best.as_ref().is_none_or(|current| candidate.beats(current)) {
        *best = Some(candidate);
    }
}

/// Score `subject` against everything `source` knows.
pub fn compute_assurance<S: ChainSource>(
    source: &mut S,
    anchor: TrustAnchor<'_>,
    subject: &PeerId,
) -> Result<IdentityAssurance> {
    if subject == anchor.id {
        return Ok(IdentityAssurance {
            score: MAX_ASSURANCE,
            path: vec![anchor.id.clone()],
        });
    }

    let certificates = source.certificates_for(subject)?;

    for cert in certificates.iter().filter(|c| c.issuer_id() == anchor.id) {
        if cert.verify(anchor.public_key) {
            return Ok(IdentityAssurance {
                score: MAX_ASSURANCE,
                path: vec![anchor.id.clone(), subject.clone()],
            });
        }
        source.report_corrupt(cert);
    }

    let mut visited = vec![subject.clone()];
    let mut best = None;
    for cert in certificates.iter().filter(|c| c.issuer_id() != anchor.id) {
        if let Some(path) = best_path_to_issuer(source, anchor, cert, &mut visited)? {
            keep_best(&mut best, path);
        }
    }

    Ok(match best {
        Some(mut path) => {
            path.peers.push(subject.clone());
            IdentityAssurance {
                score: score_from_probability(path.probability),
                path: path.peers,
            }
        }
        None => IdentityAssurance::none(),
    })
}

/// Best verified path from the owner to the issuer of `cert`.
///
/// `visited` holds the peers already on the path being explored (the
/// subject of `cert` included); an issuer found there closes a cycle and
/// ends that branch. Entries pushed here are popped before returning.
pub fn best_path_to_issuer<S: ChainSource>(
    source: &mut S,
    anchor: TrustAnchor<'_>,
    cert: &Certificate,
    visited: &mut Vec<PeerId>,
) -> Result<Option<CertificationPath>> {
    let issuer = cert.issuer_id();

    if issuer == anchor.id {
        if cert.verify(anchor.public_key) {
            return Ok(Some(CertificationPath {
                probability: 1.0,
                peers: vec![anchor.id.clone()],
            }));
        }
        source.report_corrupt(cert);
        return Ok(None);
    }

    if visited.contains(issuer) {
        trace!(%issuer, "Cycle in certificate chain");
        return Ok(None);
    }

    let confidence = 1.0 - f64::from(source.failure_rate(issuer)) / 10.0;
    visited.push(issuer.clone());

    let mut best = None;
    for outer in source.certificates_for(issuer)? {
        if !cert.verify(outer.public_key()) {
            continue;
        }
        if let Some(mut path) = best_path_to_issuer(source, anchor, &outer, visited)? {
            path.probability *= confidence;
            path.peers.push(issuer.clone());
            keep_best(&mut best, path);
        }
    }

    visited.pop();
    Ok(best)
}

/// Per-subject cache of computed scores, cleared whole on any change.
#[derive(Debug, Default)]
pub struct AssuranceCache {
    entries: HashMap<PeerId, IdentityAssurance>,
}

impl AssuranceCache {
    pub fn get(&self, subject: &PeerId) -> Option<&IdentityAssurance> {
        self.entries.get(subject)
    }

    pub fn insert(&mut self, subject: PeerId, assurance: IdentityAssurance) {
        self.entries.insert(subject, assurance);
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Store-backed chain source. Corrupt owner certificates are collected and
/// removed once the search is over.
struct StoreChainSource<'a, T: Transport> {
    store: &'a mut CertificateStore<T>,
    rates: &'a dyn FailureRates,
    corrupt: Vec<Certificate>,
    seen_corrupt: HashSet<Vec<u8>>,
}

impl<T: Transport> ChainSource for StoreChainSource<'_, T> {
    fn certificates_for(&mut self, subject: &PeerId) -> Result<Vec<Certificate>> {
        self.store.certificates_by_subject(subject)
    }

    fn failure_rate(&self, peer: &PeerId) -> u8 {
        self.rates.failure_rate(peer)
    }

    fn report_corrupt(&mut self, certificate: &Certificate) {
        if self.seen_corrupt.insert(certificate.signature().to_vec()) {
            error!(
                subject = %certificate.subject_id(),
                address = ?certificate.storage_address(),
                "Owner-issued certificate fails verification with the owner's key"
            );
            self.corrupt.push(certificate.clone());
        }
    }
}

impl<T: Transport> CertificateStore<T> {
    /// Score `subject`, from cache when possible.
    ///
    /// Owner-issued certificates found not to verify are removed from the
    /// store as a side effect.
    pub fn identity_assurance(
        &mut self,
        anchor: TrustAnchor<'_>,
        rates: &dyn FailureRates,
        subject: &PeerId,
    ) -> Result<IdentityAssurance> {
        if let Some(hit) = self.assurance.get(subject) {
            return Ok(hit.clone());
        }

        let started = Instant::now();
        let (assurance, corrupt) = {
            let mut source = StoreChainSource {
                store: self,
                rates,
                corrupt: Vec::new(),
                seen_corrupt: HashSet::new(),
            };
            let assurance = compute_assurance(&mut source, anchor, subject)?;
            (assurance, source.corrupt)
        };

        if !corrupt.is_empty() {
            self.remove(&corrupt)?;
            record_certificates_evicted("corrupt", corrupt.len());
        }

        record_assurance_computation(started.elapsed());
        self.assurance.insert(subject.clone(), assurance.clone());
        Ok(assurance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::certificate::now_millis;
    use crate::trust::identity::{KeyPair, SigningAlgorithm};

    /// Certificates held in a plain list, rate 5 for everyone unless set.
    struct ListSource {
        certs: Vec<Certificate>,
        rates: HashMap<PeerId, u8>,
        corrupt: Vec<PeerId>,
        lookups: usize,
    }

    impl ListSource {
        fn new() -> Self {
            Self {
                certs: Vec::new(),
                rates: HashMap::new(),
                corrupt: Vec::new(),
                lookups: 0,
            }
        }
    }

    impl ChainSource for ListSource {
        fn certificates_for(&mut self, subject: &PeerId) -> Result<Vec<Certificate>> {
            self.lookups += 1;
            Ok(self
                .certs
                .iter()
                .filter(|c| c.subject_id() == subject)
                .cloned()
                .collect())
        }

        fn failure_rate(&self, peer: &PeerId) -> u8 {
            self.rates.get(peer).copied().unwrap_or(5)
        }

        fn report_corrupt(&mut self, certificate: &Certificate) {
            self.corrupt.push(certificate.subject_id().clone());
        }
    }

    struct Peer {
        id: PeerId,
        keys: KeyPair,
    }

    fn peer(name: &str) -> Peer {
        Peer {
            id: PeerId::from(name),
            keys: KeyPair::generate(),
        }
    }

    fn sign(issuer: &Peer, subject: &Peer) -> Certificate {
        Certificate::issue(
            &issuer.id,
            issuer.id.as_str(),
            &issuer.keys,
            &subject.id,
            subject.id.as_str(),
            &subject.keys.public_key(),
            now_millis(),
            SigningAlgorithm::Ed25519,
        )
        .unwrap()
    }

    fn anchor(owner: &Peer) -> (PeerId, PublicKey) {
        (owner.id.clone(), owner.keys.public_key())
    }

    #[test]
    fn test_score_rounding() {
        assert_eq!(score_from_probability(1.0), 10);
        assert_eq!(score_from_probability(0.5), 5);
        assert_eq!(score_from_probability(0.25), 3);
        assert_eq!(score_from_probability(0.125), 1);
        assert_eq!(score_from_probability(0.9 * 0.5), 5);
        assert_eq!(score_from_probability(0.9 * 0.5 * 0.5), 2);
        assert_eq!(score_from_probability(0.0), 0);
        assert_eq!(score_from_probability(0.04), 0);
        assert_eq!(score_from_probability(0.05), 1);
    }

    #[test]
    fn test_half_step_below_in_floating_point() {
        let confidence = |rate: u8| 1.0 - f64::from(rate) / 10.0;
        assert_eq!(score_from_probability(confidence(5) * confidence(9)), 0);
        assert_eq!(score_from_probability(confidence(9) * confidence(5)), 0);
        assert_eq!(score_from_probability(confidence(3) * confidence(5)), 4);

        let (owner, f, g, h) = (peer("owner"), peer("francis"), peer("gloria"), peer("hassan"));
        let mut source = ListSource::new();
        source.certs = vec![sign(&owner, &f), sign(&f, &g), sign(&g, &h)];
        source.rates.insert(g.id.clone(), 9);
        let (id, key) = anchor(&owner);

        let result = compute_assurance(&mut source, TrustAnchor { id: &id, public_key: &key }, &h.id)
            .unwrap();
        assert_eq!(result.score, 0);
        // A zero score still reports the path it came from
        assert_eq!(result.path.len(), 4);
    }

    #[test]
    fn test_owner_scores_itself_max() {
        let owner = peer("owner");
        let (id, key) = anchor(&owner);
        let mut source = ListSource::new();

        let result = compute_assurance(
            &mut source,
            TrustAnchor { id: &id, public_key: &key },
            &id,
        )
        .unwrap();
        assert_eq!(result.score, 10);
        assert_eq!(result.path, vec![id]);
    }

    #[test]
    fn test_unknown_subject_scores_zero() {
        let owner = peer("owner");
        let (id, key) = anchor(&owner);
        let mut source = ListSource::new();

        let result = compute_assurance(
            &mut source,
            TrustAnchor { id: &id, public_key: &key },
            &PeerId::from("stranger"),
        )
        .unwrap();
        assert_eq!(result, IdentityAssurance::none());
    }

    #[test]
    fn test_chain_probability_and_path() {
        let (owner, f, g, h) = (peer("owner"), peer("francis"), peer("gloria"), peer("hassan"));
        let mut source = ListSource::new();
        source.certs = vec![sign(&owner, &f), sign(&f, &g), sign(&g, &h)];
        let (id, key) = anchor(&owner);
        let a = TrustAnchor { id: &id, public_key: &key };

        let result = compute_assurance(&mut source, a, &h.id).unwrap();
        assert_eq!(result.score, 3);
        assert_eq!(result.path, vec![owner.id.clone(), f.id.clone(), g.id.clone(), h.id.clone()]);
    }

    #[test]
    fn test_best_of_several_paths_wins() {
        let (owner, f, k, g) = (peer("owner"), peer("francis"), peer("kim"), peer("gloria"));
        let mut source = ListSource::new();
        source.certs = vec![sign(&owner, &f), sign(&owner, &k), sign(&f, &g), sign(&k, &g)];
        source.rates.insert(f.id.clone(), 8);
        source.rates.insert(k.id.clone(), 2);
        let (id, key) = anchor(&owner);

        let result = compute_assurance(
            &mut source,
            TrustAnchor { id: &id, public_key: &key },
            &g.id,
        )
        .unwrap();
        assert_eq!(result.score, 8);
        assert_eq!(result.path, vec![owner.id.clone(), k.id.clone(), g.id.clone()]);
    }

    #[test]
    fn test_cycle_without_owner_scores_zero() {
        let (owner, x, y, z) = (peer("owner"), peer("x"), peer("y"), peer("z"));
        let mut source = ListSource::new();
        source.certs = vec![sign(&x, &y), sign(&y, &z), sign(&z, &x)];
        let (id, key) = anchor(&owner);

        for member in [&x, &y, &z] {
            let result = compute_assurance(
                &mut source,
                TrustAnchor { id: &id, public_key: &key },
                &member.id,
            )
            .unwrap();
            assert_eq!(result.score, 0);
        }
    }

    #[test]
    fn test_cycle_does_not_block_real_path() {
        let (owner, x, y) = (peer("owner"), peer("x"), peer("y"));
        let mut source = ListSource::new();
        source.certs = vec![sign(&x, &y), sign(&y, &x), sign(&owner, &x)];
        let (id, key) = anchor(&owner);

        let result = compute_assurance(
            &mut source,
            TrustAnchor { id: &id, public_key: &key },
            &y.id,
        )
        .unwrap();
        assert_eq!(result.score, 5);
    }

    #[test]
    fn test_visited_is_restored_after_search() {
        let (owner, f, g) = (peer("owner"), peer("francis"), peer("gloria"));
        let mut source = ListSource::new();
        source.certs = vec![sign(&owner, &f)];
        let gloria_cert = sign(&f, &g);
        let (id, key) = anchor(&owner);

        let mut visited = vec![g.id.clone()];
        let path = best_path_to_issuer(
            &mut source,
            TrustAnchor { id: &id, public_key: &key },
            &gloria_cert,
            &mut visited,
        )
        .unwrap()
        .unwrap();

        assert_eq!(visited, vec![g.id.clone()]);
        assert_eq!(path.peers, vec![owner.id.clone(), f.id.clone()]);
        assert_eq!(path.probability, 0.5);
    }

    #[test]
    fn test_hop_signed_with_wrong_key_is_abandoned() {
        let (owner, f, g) = (peer("owner"), peer("francis"), peer("gloria"));
        let impostor = Peer {
            id: f.id.clone(),
            keys: KeyPair::generate(),
        };
        let mut source = ListSource::new();
        // The owner vouches for Francis's real key, but Gloria's certificate
        // was signed by someone else claiming to be Francis.
        source.certs = vec![sign(&owner, &f), sign(&impostor, &g)];
        let (id, key) = anchor(&owner);

        let result = compute_assurance(
            &mut source,
            TrustAnchor { id: &id, public_key: &key },
            &g.id,
        )
        .unwrap();
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_forged_owner_certificate_is_reported() {
        let owner = peer("owner");
        let forger = Peer {
            id: owner.id.clone(),
            keys: KeyPair::generate(),
        };
        let victim = peer("victim");
        let mut source = ListSource::new();
        source.certs = vec![sign(&forger, &victim)];
        let (id, key) = anchor(&owner);

        let result = compute_assurance(
            &mut source,
            TrustAnchor { id: &id, public_key: &key },
            &victim.id,
        )
        .unwrap();
        assert_eq!(result.score, 0);
        assert_eq!(source.corrupt, vec![victim.id.clone()]);
    }

    #[test]
    fn test_dense_graph_terminates() {
        let owner = peer("owner");
        let peers: Vec<Peer> = (0..6).map(|i| peer(&format!("p{i}"))).collect();
        let mut source = ListSource::new();
        for a in &peers {
            for b in &peers {
                if a.id != b.id {
                    source.certs.push(sign(a, b));
                }
            }
        }
        let (id, key) = anchor(&owner);

        let result = compute_assurance(
            &mut source,
            TrustAnchor { id: &id, public_key: &key },
            &peers[0].id,
        )
        .unwrap();
        assert_eq!(result.score, 0);
        assert!(source.lookups > 1);
    }

    #[test]
    fn test_cache_invalidation() {
        let mut cache = AssuranceCache::default();
        cache.insert(PeerId::from("a"), IdentityAssurance::none());
        assert_eq!(cache.len(), 1);
        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache.get(&PeerId::from("a")).is_none());
    }
}
