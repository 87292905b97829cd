//! Beacon storage and duplicate suppression.
//!
//! - [`beacon_store`] - bounded arena of observed beacons with staleness
//!   sweep and relay eligibility
//! - [`dedup`] - per-beacon sequence-history ring

mod beacon_store;
mod dedup;

pub use beacon_store::{BeaconRecord, BeaconStore, SlotIndex, StoreFull, UpsertOutcome};
pub use dedup::{SequenceHistory, SEQUENCE_HISTORY_SIZE};
