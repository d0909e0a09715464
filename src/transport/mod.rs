// transport/mod.rs - Store-and-Forward Transport Seam

//! Narrow interface onto the store-and-forward messaging layer.
//!
//! The transport partitions history into epochs, holds stored units (one or
//! more records appended together) per channel, and delivers unstored
//! messages to reachable peers. The PKI only ever talks to it through the
//! [`Transport`] trait; [`MemoryNetwork`] is an in-process implementation
//! used by tests and simulations.

mod memory;

pub use memory::{MemoryNetwork, MemoryReachabilityFeed, MemoryTransport};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::trust::PeerId;
use crate::wire::{WireReader, WireWriter};

/// A discrete time partition of transport history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Epoch(pub i32);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch-{}", self.0)
    }
}

/// Opaque locator of a stored unit, handed back to the transport to rewrite
/// or delete it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageAddress {
    pub format: String,
    pub uri: String,
    pub epoch: Epoch,
}

impl StorageAddress {
    pub fn new(format: impl Into<String>, uri: impl Into<String>, epoch: Epoch) -> Self {
        Self {
            format: format.into(),
            uri: uri.into(),
            epoch,
        }
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::new();
        w.put_str(&self.format)?;
        w.put_str(&self.uri)?;
        w.put_i32(self.epoch.0);
        Ok(w.into_vec())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let address = Self {
            format: r.get_str("address format")?,
            uri: r.get_str("address uri")?,
            epoch: Epoch(r.get_i32("address epoch")?),
        };
        r.finish("storage address")?;
        Ok(address)
    }
}

impl fmt::Display for StorageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.format, self.uri, self.epoch)
    }
}

/// One record read back from an epoch.
#[derive(Clone, Debug)]
pub struct StoredRecord {
    /// Locator of the unit holding this record
    pub address: StorageAddress,

    pub payload: Vec<u8>,

    /// Transport-local arrival order, strictly increasing
    pub sequence: u64,
}

/// An unstored message picked up from the inbox.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub from: PeerId,
    pub payload: Vec<u8>,

    /// Connection class that carried the message (e.g. "bluetooth", "wifi")
    pub connection: String,
}

/// Operations the PKI needs from the transport.
///
/// Calls are synchronous local I/O. Failures surface as
/// `PkiError::StorageUnavailable` and are never retried by the caller.
pub trait Transport: Send + Sync {
    fn oldest_epoch(&self) -> Result<Epoch>;

    fn current_epoch(&self) -> Result<Epoch>;

    /// The epoch after `epoch`, or `None` once past the current one
    fn next_epoch(&self, epoch: Epoch) -> Option<Epoch>;

    fn read_epoch_records(&self, channel: &str, epoch: Epoch) -> Result<Vec<StoredRecord>>;

    /// Store a unit of one or more records in the current epoch.
    fn append_record(&self, channel: &str, payloads: Vec<Vec<u8>>) -> Result<StorageAddress>;

    /// Records held by the unit at `address`, `None` if it no longer exists
    fn read_unit(&self, address: &StorageAddress) -> Result<Option<Vec<Vec<u8>>>>;

    /// Replace the records held by the unit at `address`.
    fn rewrite_unit(&self, address: &StorageAddress, payloads: Vec<Vec<u8>>) -> Result<()>;

    /// Drop the whole unit at `address`.
    fn delete_record(&self, address: &StorageAddress) -> Result<()>;

    fn reachable_peers(&self) -> Vec<PeerId>;

    /// Fire-and-forget delivery that is not kept in the epoch history.
    fn send_unstored(&self, peer: &PeerId, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Take every unstored message waiting on `channel`.
    fn drain_unstored(&self, channel: &str) -> Vec<InboundMessage>;

    /// Forward the stored unit at `address` to every reachable peer,
    /// returning how many peers it was handed to.
    fn push_to_reachable(&self, address: &StorageAddress) -> Result<usize>;
}

pub type PeersChangedCallback = Box<dyn Fn(&[PeerId]) + Send + Sync>;

/// Source of "set of reachable peers changed" notifications.
pub trait ReachabilityFeed {
    fn on_peers_changed(&self, callback: PeersChangedCallback);
}
