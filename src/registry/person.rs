// registry/person.rs - Known Peers and Their Failure Rates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{PkiError, Result};
use crate::trust::{FailureRates, PeerId};
use crate::wire::{WireReader, WireWriter};

/// Rate given to a peer until the owner says otherwise
pub const DEFAULT_FAILURE_RATE: u8 = 5;

/// The owner never signs for the wrong identity
pub const OWNER_FAILURE_RATE: u8 = 0;

pub const MIN_FAILURE_RATE: i32 = 1;
pub const MAX_FAILURE_RATE: i32 = 10;

/// A peer the owner knows about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    user_id: PeerId,
    name: String,
    signing_failure_rate: u8,
}

impl Person {
    pub fn user_id(&self) -> &PeerId {
        &self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// How often, out of 10, this peer is believed to sign for the wrong
    /// identity. Private to the owner; never sent anywhere.
    pub fn signing_failure_rate(&self) -> u8 {
        self.signing_failure_rate
    }
}

/// Every person the owner has issued or received a certificate about.
///
/// Records are never deleted. The owner's own record is always present with
/// rate 0.
#[derive(Debug, Clone)]
pub struct PersonRegistry {
    owner: PeerId,
    people: BTreeMap<PeerId, Person>,
}

impl PersonRegistry {
    pub fn new(owner_id: &PeerId, owner_name: &str) -> Self {
        let mut people = BTreeMap::new();
        people.insert(
            owner_id.clone(),
            Person {
                user_id: owner_id.clone(),
                name: owner_name.to_string(),
                signing_failure_rate: OWNER_FAILURE_RATE,
            },
        );
        Self {
            owner: owner_id.clone(),
            people,
        }
    }

    pub fn owner(&self) -> &PeerId {
        &self.owner
    }

    /// Create a record at the default rate unless one exists. Returns whether
    /// a record was created.
    pub fn add_if_absent(&mut self, user_id: &PeerId, name: &str) -> bool {
        if self.people.contains_key(user_id) {
            return false;
        }
        self.people.insert(
            user_id.clone(),
            Person {
                user_id: user_id.clone(),
                name: name.to_string(),
                signing_failure_rate: DEFAULT_FAILURE_RATE,
            },
        );
        debug!(%user_id, name, "Added person");
        true
    }

    pub fn get(&self, user_id: &PeerId) -> Option<&Person> {
        self.people.get(user_id)
    }

    pub fn contains(&self, user_id: &PeerId) -> bool {
        self.people.contains_key(user_id)
    }

    pub fn rename(&mut self, user_id: &PeerId, name: &str) -> Result<()> {
        let person = self
            .people
            .get_mut(user_id)
            .ok_or_else(|| PkiError::NotFound(format!("person {user_id}")))?;
        person.name = name.to_string();
        Ok(())
    }

    /// Everyone, owner included, ordered by ID
    pub fn list(&self) -> Vec<&Person> {
        self.people.values().collect()
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    pub fn set_failure_rate(&mut self, user_id: &PeerId, rate: i32) -> Result<()> {
        if *user_id == self.owner {
            return Err(PkiError::SelfReferenceDenied(
                "the owner's failure rate is fixed at 0".into(),
            ));
        }
        if !(MIN_FAILURE_RATE..=MAX_FAILURE_RATE).contains(&rate) {
            return Err(PkiError::OutOfRange { rate });
        }
        let person = self
            .people
            .get_mut(user_id)
            .ok_or_else(|| PkiError::NotFound(format!("person {user_id}")))?;

        person.signing_failure_rate = rate as u8;
        info!(%user_id, rate, "Signing failure rate updated");
        Ok(())
    }

    /// Serialize as a roster memento: count, then id, name and rate per person.
    pub fn to_memento(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::new();
        w.put_i32(self.people.len() as i32);
        for person in self.people.values() {
            w.put_str(person.user_id.as_str())?;
            w.put_str(&person.name)?;
            w.put_i32(i32::from(person.signing_failure_rate));
        }
        Ok(w.into_vec())
    }

    /// Rebuild from a memento. The owner record is re-pinned whatever the
    /// memento says about it.
    pub fn from_memento(owner_id: &PeerId, owner_name: &str, bytes: &[u8]) -> Result<Self> {
        let mut registry = Self::new(owner_id, owner_name);
        let mut r = WireReader::new(bytes);

        let count = r.get_i32("roster count")?;
        if count < 0 {
            return Err(PkiError::MalformedRecord(format!("negative roster count {count}")));
        }

        for _ in 0..count {
            let user_id = PeerId::new(r.get_str("person id")?);
            let name = r.get_str("person name")?;
            let rate = r.get_i32("failure rate")?;

            if user_id == registry.owner {
                continue;
            }
            if !(MIN_FAILURE_RATE..=MAX_FAILURE_RATE).contains(&rate) {
                return Err(PkiError::MalformedRecord(format!(
                    "failure rate {rate} for {user_id} outside 1..=10"
                )));
            }
            registry.people.insert(
                user_id.clone(),
                Person {
                    user_id,
                    name,
                    signing_failure_rate: rate as u8,
                },
            );
        }
        r.finish("roster memento")?;
        Ok(registry)
    }
}

impl FailureRates for PersonRegistry {
    fn failure_rate(&self, peer: &PeerId) -> u8 {
        if *peer == self.owner {
            return OWNER_FAILURE_RATE;
        }
        self.people
            .get(peer)
            .map(|p| p.signing_failure_rate)
            .unwrap_or(DEFAULT_FAILURE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PersonRegistry {
        PersonRegistry::new(&PeerId::from("owner"), "Olive")
    }

    #[test]
    fn test_owner_is_pinned() {
        let mut reg = registry();
        let owner = PeerId::from("owner");

        assert_eq!(reg.failure_rate(&owner), 0);
        assert!(!reg.add_if_absent(&owner, "Someone"));
        assert!(matches!(
            reg.set_failure_rate(&owner, 3),
            Err(PkiError::SelfReferenceDenied(_))
        ));
    }

    #[test]
    fn test_defaults_and_updates() {
        let mut reg = registry();
        let francis = PeerId::from("francis");

        assert_eq!(reg.failure_rate(&francis), DEFAULT_FAILURE_RATE);
        assert!(reg.add_if_absent(&francis, "Francis"));
        assert!(!reg.add_if_absent(&francis, "Frank"));
        assert_eq!(reg.get(&francis).unwrap().name(), "Francis");

        reg.set_failure_rate(&francis, 1).unwrap();
        assert_eq!(reg.failure_rate(&francis), 1);

        reg.rename(&francis, "Frankie").unwrap();
        assert_eq!(reg.get(&francis).unwrap().name(), "Frankie");
        assert_eq!(reg.get(&francis).unwrap().signing_failure_rate(), 1);
    }

    #[test]
    fn test_rate_bounds() {
        let mut reg = registry();
        let gloria = PeerId::from("gloria");
        reg.add_if_absent(&gloria, "Gloria");

        for rate in [0, 11, -1] {
            assert!(matches!(
                reg.set_failure_rate(&gloria, rate),
                Err(PkiError::OutOfRange { rate: r }) if r == rate
            ));
        }
        reg.set_failure_rate(&gloria, 10).unwrap();
        assert!(matches!(
            reg.set_failure_rate(&PeerId::from("nobody"), 4),
            Err(PkiError::NotFound(_))
        ));
        assert!(matches!(
            reg.rename(&PeerId::from("nobody"), "x"),
            Err(PkiError::NotFound(_))
        ));
    }

    #[test]
    fn test_memento_round_trip() {
        let mut reg = registry();
        let hassan = PeerId::from("hassan");
        reg.add_if_absent(&hassan, "Hassan");
        reg.set_failure_rate(&hassan, 8).unwrap();
        reg.add_if_absent(&PeerId::from("iris"), "Iris");

        let restored =
            PersonRegistry::from_memento(&PeerId::from("owner"), "Olive", &reg.to_memento().unwrap())
                .unwrap();

        assert_eq!(restored.len(), 3);
        assert_eq!(restored.failure_rate(&hassan), 8);
        assert_eq!(restored.get(&PeerId::from("iris")).unwrap().name(), "Iris");
        assert_eq!(restored.list(), reg.list());
    }

    #[test]
    fn test_memento_layout() {
        let reg = registry();
        let bytes = reg.to_memento().unwrap();
        // count, "owner", "Olive", rate 0
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(bytes.len(), 4 + 2 + 5 + 2 + 5 + 4);
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_malformed_memento() {
        let owner = PeerId::from("owner");
        assert!(PersonRegistry::from_memento(&owner, "Olive", &[0, 0, 0, 2, 0]).is_err());
        assert!(PersonRegistry::from_memento(&owner, "Olive", &[0xff, 0xff, 0xff, 0xff]).is_err());

        let mut w = WireWriter::new();
        w.put_i32(1);
        w.put_str("x").unwrap();
        w.put_str("X").unwrap();
        w.put_i32(42);
        assert!(matches!(
            PersonRegistry::from_memento(&owner, "Olive", w.as_slice()),
            Err(PkiError::MalformedRecord(_))
        ));
    }
}
