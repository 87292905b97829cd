//! Bounded beacon store.
//!
//! A fixed-capacity arena of observed beacons, one slot per unique radio
//! address. The store owns identity (address uniqueness), freshness
//! (staleness sweep at twice the stale threshold) and relay eligibility
//! (TTL, settle age, drain state). Lookup is a linear scan; at the target
//! scale of ≤ 128 entries that beats maintaining an index.
//!
//! Sightings are best-effort: an upsert against a full store fails with
//! [`StoreFull`] and the caller drops the sighting.

use std::time::Instant;

use log::debug;

use super::dedup::SequenceHistory;
use crate::config::{DrainPolicy, RelayConfig, SignalPolicy};
use crate::sighting::{BeaconAddress, Provenance, Sighting, Telemetry};

/// Index of a record slot inside the store.
pub type SlotIndex = usize;

/// One tracked beacon.
#[derive(Debug, Clone)]
pub struct BeaconRecord {
    /// Radio address, unique among live records.
    pub address: BeaconAddress,
    /// Signal strength in dBm, refreshed per the configured policy.
    pub signal_dbm: i8,
    /// When this beacon was last sighted.
    pub last_seen: Instant,
    /// Remaining relay hops. 0 means stored for local use only.
    pub ttl: u8,
    /// Recent sequence values for duplicate suppression.
    pub sequences: SequenceHistory,
    /// Telemetry from the latest sighting that carried any.
    pub telemetry: Option<Telemetry>,
    /// Set when the record has been packed into a payload under the
    /// `Retain` drain policy; cleared by the next fresh sighting.
    relayed: bool,
}

impl BeaconRecord {
    fn from_sighting(sighting: &Sighting, initial_ttl: u8, now: Instant) -> Self {
        Self {
            address: sighting.address,
            signal_dbm: sighting.signal_dbm,
            last_seen: now,
            ttl: sighting.ttl(initial_ttl),
            sequences: SequenceHistory::new(sighting.sequence),
            telemetry: sighting.telemetry,
            relayed: false,
        }
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "ignoring the outcome loses dedup information"]
pub enum UpsertOutcome {
    /// New beacon, stored in the given slot.
    Inserted(SlotIndex),
    /// Known beacon refreshed in place.
    Refreshed(SlotIndex),
    /// Sequence already seen; the record was left untouched.
    Duplicate(SlotIndex),
}

impl UpsertOutcome {
    /// The slot the sighting landed in (or matched).
    pub fn slot(&self) -> SlotIndex {
        match *self {
            Self::Inserted(i) | Self::Refreshed(i) | Self::Duplicate(i) => i,
        }
    }
}

/// The store is at capacity; the sighting was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreFull;

impl std::fmt::Display for StoreFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "beacon store full")
    }
}

impl std::error::Error for StoreFull {}

/// Fixed-capacity store of observed beacons.
pub struct BeaconStore {
    slots: Vec<Option<BeaconRecord>>,
    config: RelayConfig,
    evicted_total: usize,
}

impl BeaconStore {
    /// Create an empty store sized and tuned by `config`.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            slots: vec![None; config.capacity],
            config,
            evicted_total: 0,
        }
    }

    /// Insert a new beacon or refresh an existing one.
    ///
    /// A sighting whose sequence is already in the beacon's history is an
    /// idempotent no-op reported as [`UpsertOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreFull`] for a new address when no slot is free.
    pub fn upsert(&mut self, sighting: &Sighting, now: Instant) -> Result<UpsertOutcome, StoreFull> {
        let mut free_slot = None;
        let mut existing = None;

        for (i, slot) in self.slots.iter().enumerate() {
            match slot {
                None => {
                    if free_slot.is_none() {
                        free_slot = Some(i);
                    }
                }
                Some(record) => {
                    if record.address == sighting.address {
                        existing = Some(i);
                        break;
                    }
                }
            }
        }

        let signal_policy = self.config.signal_policy;
        let initial_ttl = self.config.initial_ttl;

        if let Some(i) = existing {
            if let Some(record) = self.slots[i].as_mut() {
                if record.sequences.is_duplicate(sighting.sequence) {
                    return Ok(UpsertOutcome::Duplicate(i));
                }

                record.last_seen = now;
                record.signal_dbm = match signal_policy {
                    SignalPolicy::LastWins => sighting.signal_dbm,
                    SignalPolicy::MaxObserved => record.signal_dbm.max(sighting.signal_dbm),
                };
                // TTL only resets on a direct observation; relayed reports
                // can tighten the remaining hop budget but never widen it.
                record.ttl = match sighting.provenance {
                    Provenance::Direct => initial_ttl,
                    Provenance::Relayed { ttl } => record.ttl.min(ttl),
                };
                if let Some(telemetry) = sighting.telemetry {
                    record.telemetry = Some(telemetry);
                }
                record.sequences.record(sighting.sequence);
                record.relayed = false;
                return Ok(UpsertOutcome::Refreshed(i));
            }
        }

        match free_slot {
            Some(i) => {
                self.slots[i] = Some(BeaconRecord::from_sighting(
                    sighting,
                    self.config.initial_ttl,
                    now,
                ));
                Ok(UpsertOutcome::Inserted(i))
            }
            None => Err(StoreFull),
        }
    }

    /// Evict records not refreshed within the eviction age.
    ///
    /// Returns the number of records evicted. Called once per scheduler
    /// cycle before flush decisions.
    pub fn sweep_stale(&mut self, now: Instant) -> usize {
        let eviction_age = self.config.eviction_age();
        let mut evicted = 0;

        for slot in &mut self.slots {
            if let Some(record) = slot {
                if now.duration_since(record.last_seen) >= eviction_age {
                    debug!("evicting stale beacon {}", record.address);
                    *slot = None;
                    evicted += 1;
                }
            }
        }

        self.evicted_total += evicted;
        evicted
    }

    /// Cumulative staleness evictions since construction.
    pub fn evicted_total(&self) -> usize {
        self.evicted_total
    }

    fn is_eligible(&self, record: &BeaconRecord, now: Instant) -> bool {
        let age = now.duration_since(record.last_seen);
        record.ttl > 0
            && !record.relayed
            && age < self.config.eviction_age()
            && age >= self.config.min_relay_age
    }

    /// Number of records currently eligible for relay.
    pub fn count_eligible(&self, now: Instant) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|r| self.is_eligible(r, now))
            .count()
    }

    /// Slot indices eligible for relay, in slot order.
    pub fn eligible_indices(&self, now: Instant) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|r| (i, r)))
            .filter(|(_, r)| self.is_eligible(r, now))
            .map(|(i, _)| i)
            .collect()
    }

    /// Apply the drain policy to records just packed into a payload.
    pub fn mark_relayed(&mut self, indices: &[SlotIndex]) {
        for &i in indices {
            match self.config.drain_policy {
                DrainPolicy::Discard => {
                    if let Some(record) = self.slots.get_mut(i).and_then(Option::take) {
                        debug!("relayed and discarded beacon {}", record.address);
                    }
                }
                DrainPolicy::Retain => {
                    if let Some(record) = self.slots.get_mut(i).and_then(Option::as_mut) {
                        record.relayed = true;
                    }
                }
            }
        }
    }

    /// Look up a record by slot index.
    pub fn get(&self, index: SlotIndex) -> Option<&BeaconRecord> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drop every record. Used by tests and diagnostics, never by
    /// recovery, which keeps non-stale entries.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}
