// transport/memory.rs - In-Process Transport Network

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{
    Epoch, InboundMessage, PeersChangedCallback, ReachabilityFeed, StorageAddress, StoredRecord,
    Transport,
};
use crate::error::{PkiError, Result};
use crate::trust::PeerId;

const UNIT_FORMAT: &str = "memory/unit";

#[derive(Debug, Clone)]
struct Unit {
    uri: String,
    channel: String,
    payloads: Vec<Vec<u8>>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct PeerState {
    epochs: BTreeMap<i32, Vec<Unit>>,
    oldest: i32,
    current: i32,
    next_sequence: u64,
    next_unit: u64,
    inbox: Vec<(String, InboundMessage)>,
}

impl PeerState {
    fn store_unit(&mut self, owner: &PeerId, channel: &str, payloads: Vec<Vec<u8>>) -> StorageAddress {
        self.next_unit += 1;
        self.next_sequence += 1;
        let uri = format!("mem://{}/{}/{}", owner, channel, self.next_unit);
        let epoch = self.current;
        self.epochs.entry(epoch).or_default().push(Unit {
            uri: uri.clone(),
            channel: channel.to_string(),
            payloads,
            sequence: self.next_sequence,
        });
        StorageAddress::new(UNIT_FORMAT, uri, Epoch(epoch))
    }

    fn unit_mut(&mut self, address: &StorageAddress) -> Option<&mut Unit> {
        self.epochs
            .get_mut(&address.epoch.0)?
            .iter_mut()
            .find(|u| u.uri == address.uri)
    }
}

#[derive(Default)]
struct NetworkState {
    peers: HashMap<PeerId, PeerState>,

    /// Undirected links with the connection class that carries them
    links: HashMap<(PeerId, PeerId), String>,
}

impl NetworkState {
    fn link_key(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    fn peer(&mut self, id: &PeerId) -> Result<&mut PeerState> {
        self.peers
            .get_mut(id)
            .ok_or_else(|| PkiError::StorageUnavailable(format!("peer {id} left the network")))
    }

    fn reachable_from(&self, id: &PeerId) -> Vec<PeerId> {
        let mut peers: BTreeSet<PeerId> = BTreeSet::new();
        for (a, b) in self.links.keys() {
            if a == id {
                peers.insert(b.clone());
            } else if b == id {
                peers.insert(a.clone());
            }
        }
        peers.into_iter().collect()
    }
}

/// A set of peers sharing in-process transport state.
///
/// Each joined peer gets a [`MemoryTransport`]. Links between peers are
/// explicit; stored units pushed over a link land in the receiver's current
/// epoch as newly received records.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer and return its transport handle
    pub fn join(&self, peer: impl Into<PeerId>) -> MemoryTransport {
        let peer = peer.into();
        self.state.lock().peers.entry(peer.clone()).or_default();
        MemoryTransport {
            local: peer,
            state: Arc::clone(&self.state),
        }
    }

    /// Make two peers reachable from each other over `connection`
    pub fn connect(&self, a: &PeerId, b: &PeerId, connection: &str) {
        self.state
            .lock()
            .links
            .insert(NetworkState::link_key(a, b), connection.to_string());
    }

    pub fn disconnect(&self, a: &PeerId, b: &PeerId) {
        self.state.lock().links.remove(&NetworkState::link_key(a, b));
    }
}

/// One peer's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    local: PeerId,
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryTransport {
    pub fn local_peer(&self) -> &PeerId {
        &self.local
    }

    /// Start a new epoch; later appends land there
    pub fn advance_epoch(&self) -> Result<Epoch> {
        let mut state = self.state.lock();
        let peer = state.peer(&self.local)?;
        peer.current += 1;
        Ok(Epoch(peer.current))
    }

    /// Forget every epoch older than `epoch`
    pub fn retire_epochs_before(&self, epoch: Epoch) -> Result<()> {
        let mut state = self.state.lock();
        let peer = state.peer(&self.local)?;
        peer.epochs.retain(|e, _| *e >= epoch.0);
        peer.oldest = epoch.0.min(peer.current);
        Ok(())
    }

    /// Overwrite a single stored record in place, keeping its address.
    /// Simulates on-disk corruption.
    pub fn corrupt_record(&self, address: &StorageAddress, index: usize, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock();
        let unit = state
            .peer(&self.local)?
            .unit_mut(address)
            .ok_or_else(|| PkiError::NotFound(address.to_string()))?;
        let slot = unit
            .payloads
            .get_mut(index)
            .ok_or_else(|| PkiError::NotFound(format!("record {index} of {address}")))?;
        *slot = payload;
        Ok(())
    }

    /// Number of stored units on `channel` across live epochs
    pub fn unit_count(&self, channel: &str) -> usize {
        let state = self.state.lock();
        state
            .peers
            .get(&self.local)
            .map(|p| {
                p.epochs
                    .values()
                    .flatten()
                    .filter(|u| u.channel == channel)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Transport for MemoryTransport {
    fn oldest_epoch(&self) -> Result<Epoch> {
        let mut state = self.state.lock();
        Ok(Epoch(state.peer(&self.local)?.oldest))
    }

    fn current_epoch(&self) -> Result<Epoch> {
        let mut state = self.state.lock();
        Ok(Epoch(state.peer(&self.local)?.current))
    }

    fn next_epoch(&self, epoch: Epoch) -> Option<Epoch> {
        let state = self.state.lock();
        let current = state.peers.get(&self.local)?.current;
        (epoch.0 < current).then(|| Epoch(epoch.0 + 1))
    }

    fn read_epoch_records(&self, channel: &str, epoch: Epoch) -> Result<Vec<StoredRecord>> {
        let mut state = self.state.lock();
        let peer = state.peer(&self.local)?;
        let Some(units) = peer.epochs.get(&epoch.0) else {
            return Ok(Vec::new());
        };

        let records = units
            .iter()
            .filter(|u| u.channel == channel)
            .flat_map(|u| {
                let address = StorageAddress::new(UNIT_FORMAT, u.uri.clone(), epoch);
                u.payloads.iter().map(move |p| StoredRecord {
                    address: address.clone(),
                    payload: p.clone(),
                    sequence: u.sequence,
                })
            })
            .collect();
        Ok(records)
    }

    fn append_record(&self, channel: &str, payloads: Vec<Vec<u8>>) -> Result<StorageAddress> {
        let mut state = self.state.lock();
        let local = self.local.clone();
        let address = state.peer(&local)?.store_unit(&local, channel, payloads);
        trace!(peer = %self.local, %address, "Appended unit");
        Ok(address)
    }

    fn read_unit(&self, address: &StorageAddress) -> Result<Option<Vec<Vec<u8>>>> {
        let mut state = self.state.lock();
        Ok(state
            .peer(&self.local)?
            .unit_mut(address)
            .map(|u| u.payloads.clone()))
    }

    fn rewrite_unit(&self, address: &StorageAddress, payloads: Vec<Vec<u8>>) -> Result<()> {
        let mut state = self.state.lock();
        let unit = state
            .peer(&self.local)?
            .unit_mut(address)
            .ok_or_else(|| PkiError::NotFound(address.to_string()))?;
        unit.payloads = payloads;
        Ok(())
    }

    fn delete_record(&self, address: &StorageAddress) -> Result<()> {
        let mut state = self.state.lock();
        let peer = state.peer(&self.local)?;
        if let Some(units) = peer.epochs.get_mut(&address.epoch.0) {
            units.retain(|u| u.uri != address.uri);
        }
        Ok(())
    }

    fn reachable_peers(&self) -> Vec<PeerId> {
        self.state.lock().reachable_from(&self.local)
    }

    fn send_unstored(&self, peer: &PeerId, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock();
        let connection = state
            .links
            .get(&NetworkState::link_key(&self.local, peer))
            .cloned()
            .ok_or_else(|| PkiError::StorageUnavailable(format!("{peer} is not reachable")))?;
        let from = self.local.clone();
        state.peer(peer)?.inbox.push((
            channel.to_string(),
            InboundMessage {
                from,
                payload,
                connection,
            },
        ));
        Ok(())
    }

    fn drain_unstored(&self, channel: &str) -> Vec<InboundMessage> {
        let mut state = self.state.lock();
        let Some(peer) = state.peers.get_mut(&self.local) else {
            return Vec::new();
        };
        let (taken, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut peer.inbox).into_iter().partition(|(c, _)| c == channel);
        peer.inbox = kept;
        taken.into_iter().map(|(_, m)| m).collect()
    }

    fn push_to_reachable(&self, address: &StorageAddress) -> Result<usize> {
        let mut state = self.state.lock();
        let unit = state
            .peer(&self.local)?
            .unit_mut(address)
            .cloned()
            .ok_or_else(|| PkiError::NotFound(address.to_string()))?;

        let targets = state.reachable_from(&self.local);
        for target in &targets {
            let peer = state.peer(target)?;
            let received = peer.store_unit(target, &unit.channel, unit.payloads.clone());
            debug!(from = %self.local, to = %target, %received, "Forwarded stored unit");
        }
        Ok(targets.len())
    }
}

/// Reachability feed driven by hand.
#[derive(Default)]
pub struct MemoryReachabilityFeed {
    callbacks: Mutex<Vec<PeersChangedCallback>>,
}

impl MemoryReachabilityFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every registered callback with the new reachable set
    pub fn notify(&self, peers: &[PeerId]) {
        for callback in self.callbacks.lock().iter() {
            callback(peers);
        }
    }
}

impl ReachabilityFeed for MemoryReachabilityFeed {
    fn on_peers_changed(&self, callback: PeersChangedCallback) {
        self.callbacks.lock().push(callback);
    }
}
