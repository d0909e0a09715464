// registry/mod.rs - Person Registry and Extra-Data Persistence

//! The owner's roster of known peers and the key/value store it is saved to.

mod extra;
mod person;

pub use extra::{
    get_decoded, put_encoded, ExtraDataStore, MemoryExtraDataStore, SledExtraDataStore,
};

pub use person::{
    Person, PersonRegistry, DEFAULT_FAILURE_RATE, MAX_FAILURE_RATE, MIN_FAILURE_RATE,
    OWNER_FAILURE_RATE,
};
