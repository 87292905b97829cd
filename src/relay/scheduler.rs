//! Flush scheduling.
//!
//! The scheduler decides when accumulated beacons become outbound
//! broadcasts. It runs the machine
//!
//! ```text
//! IDLE -> READY_TO_FLUSH -> FLUSHING -> IDLE
//! ```
//!
//! entering READY_TO_FLUSH when enough beacons are eligible (batch
//! trigger) or when eligible beacons have waited too long (time trigger).
//! A flush drains eligible records into payloads, one per free broadcast
//! slot; when slots run out the flush stops early and the remainder stays
//! in the store for the next cycle. That early stop is the engine's
//! backpressure against transport capacity, not an error.
//!
//! The scheduler never touches the transport itself: it returns
//! [`SchedulerAction`]s for the caller to execute, which keeps the whole
//! machine testable without a radio.

use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use super::payload::{OutboundBuffer, PayloadSerializer};
use super::slots::{SlotId, SlotPool};
use crate::config::RelayConfig;
use crate::store::BeaconStore;

/// Scheduler state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Accumulating sightings.
    Idle,
    /// A flush trigger fired; drain on the next evaluation.
    ReadyToFlush,
    /// Draining eligible beacons into slots.
    Flushing,
}

/// An effect for the caller to apply to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "dropping scheduler actions strands buffers and slots"]
pub enum SchedulerAction {
    /// Hand `buffer` to the transport on `slot` for one broadcast of
    /// `duration`.
    Send {
        /// Slot leased for this broadcast.
        slot: SlotId,
        /// Serialized payload, ownership passes to the transport.
        buffer: OutboundBuffer,
        /// Broadcast duration.
        duration: Duration,
    },
    /// Ask the transport to stop broadcasting on `slot`; the slot has
    /// already been returned to the pool.
    Stop {
        /// Slot whose broadcast duration elapsed.
        slot: SlotId,
    },
}

/// Decides when to serialize and broadcast accumulated beacons.
pub struct FlushScheduler {
    config: RelayConfig,
    state: FlushState,
    slots: SlotPool,
    serializer: PayloadSerializer,
    /// Time of the last successful pack-and-send; anchored at the first
    /// evaluation so the time trigger measures a real wait.
    last_flush: Option<Instant>,
}

impl FlushScheduler {
    /// Create a scheduler over `slot_count` broadcast slots.
    pub fn new(config: RelayConfig, slot_count: usize) -> Self {
        Self {
            config,
            state: FlushState::Idle,
            slots: SlotPool::new(slot_count),
            serializer: PayloadSerializer::new(&config),
            last_flush: None,
        }
    }

    /// Current state machine position.
    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Number of slots currently broadcasting.
    pub fn active_slots(&self) -> usize {
        self.slots.active_count()
    }

    /// Evaluate triggers and, when one fires, drain eligible beacons into
    /// free slots.
    ///
    /// Called after every accepted sighting and from every tick. Returns
    /// the send actions for the caller to execute; an empty vec means no
    /// trigger fired or every slot was busy.
    pub fn poll(&mut self, store: &mut BeaconStore, now: Instant) -> Vec<SchedulerAction> {
        let last_flush = *self.last_flush.get_or_insert(now);

        // Staleness is swept before every flush decision
        let evicted = store.sweep_stale(now);
        if evicted > 0 {
            debug!("swept {} stale beacons", evicted);
        }

        if self.state == FlushState::Idle {
            let eligible = store.count_eligible(now);
            let batch_met = eligible >= self.config.batch_size;
            let waited_out =
                eligible > 0 && now.duration_since(last_flush) >= self.config.max_wait;

            if batch_met || waited_out {
                trace!(
                    "flush trigger: eligible={} batch_met={} waited_out={}",
                    eligible,
                    batch_met,
                    waited_out
                );
                self.state = FlushState::ReadyToFlush;
            }
        }

        if self.state != FlushState::ReadyToFlush {
            return Vec::new();
        }

        self.state = FlushState::Flushing;
        let actions = self.drain(store, now);
        self.state = FlushState::Idle;
        actions
    }

    /// Drain eligible beacons into payloads while slots remain.
    fn drain(&mut self, store: &mut BeaconStore, now: Instant) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();
        let mut sent_any = false;

        loop {
            let candidates = store.eligible_indices(now);
            if candidates.is_empty() {
                break;
            }
            let deadline = now + self.config.adv_duration;
            let Some(slot) = self.slots.acquire_free(deadline) else {
                debug!(
                    "{} beacons deferred: all {} slots busy",
                    candidates.len(),
                    self.slots.len()
                );
                break;
            };

            let (buffer, consumed) = self.serializer.pack(store, &candidates);
            if consumed.is_empty() {
                // Nothing actually fit; give the slot back.
                let _ = self.slots.release(slot);
                break;
            }
            store.mark_relayed(&consumed);
            sent_any = true;

            debug!(
                "flushing {} beacons ({} bytes, seq {}) on slot {}",
                consumed.len(),
                buffer.len(),
                self.serializer.last_sequence(),
                slot
            );
            actions.push(SchedulerAction::Send {
                slot,
                buffer,
                duration: self.config.adv_duration,
            });
        }

        if sent_any {
            self.last_flush = Some(now);
        }
        actions
    }

    /// Periodic tick: stop slots whose broadcast duration elapsed and, if
    /// eligible beacons were waiting on those slots, flush again
    /// immediately instead of waiting for the next trigger.
    pub fn on_tick(&mut self, store: &mut BeaconStore, now: Instant) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();
        let mut released = false;

        for slot in self.slots.expired(now) {
            let _ = self.slots.release(slot);
            released = true;
            actions.push(SchedulerAction::Stop { slot });
        }

        if released && store.count_eligible(now) > 0 {
            self.state = FlushState::ReadyToFlush;
        }

        actions.extend(self.poll(store, now));
        actions
    }

    /// The transport reported a broadcast finished on its own.
    ///
    /// Release is idempotent: this may race with a stop we requested for
    /// the same slot.
    pub fn on_slot_complete(&mut self, slot: SlotId) {
        if !self.slots.release(slot) {
            trace!("completion for already-free slot {}", slot);
        }
    }

    /// A send handed to the transport failed; reclaim the slot.
    pub fn on_send_failed(&mut self, slot: SlotId) {
        warn!("send failed on slot {}, reclaiming", slot);
        let _ = self.slots.release(slot);
    }

    /// Watchdog recovery: back to IDLE with every slot freed and
    /// transient counters cleared.
    ///
    /// Returns the slots that were active so the caller can issue
    /// best-effort stops for them.
    pub fn reset(&mut self, now: Instant) -> Vec<SlotId> {
        self.state = FlushState::Idle;
        self.serializer.reset();
        self.last_flush = Some(now);
        self.slots.release_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sighting::{BeaconAddress, Sighting};

    fn config() -> RelayConfig {
        RelayConfig {
            batch_size: 5,
            ..Default::default()
        }
    }

    fn insert(store: &mut BeaconStore, id: u8, now: Instant) {
        let sighting = Sighting::direct(BeaconAddress::random([id, 0, 0, 0, 0, 1]), -50, 0);
        let _ = store.upsert(&sighting, now).unwrap();
    }

    fn send_count(actions: &[SchedulerAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, SchedulerAction::Send { .. }))
            .count()
    }

    #[test]
    fn test_batch_trigger_flushes_exactly_batch() {
        let cfg = config();
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 2);
        let now = Instant::now();

        for id in 0..4 {
            insert(&mut store, id, now);
            assert!(scheduler.poll(&mut store, now).is_empty());
        }
        insert(&mut store, 4, now);

        let actions = scheduler.poll(&mut store, now);
        assert_eq!(send_count(&actions), 1);
        let SchedulerAction::Send { buffer, .. } = &actions[0] else {
            panic!("expected send");
        };
        assert_eq!(buffer.entry_count(), 5);
        assert_eq!(store.count_eligible(now), 0);
        assert_eq!(scheduler.state(), FlushState::Idle);
    }

    #[test]
    fn test_time_trigger_flushes_partial_batch() {
        let cfg = config();
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 2);
        let t0 = Instant::now();

        for id in 0..3 {
            insert(&mut store, id, t0);
        }
        // Anchors the wait and does not flush: batch not met, no wait yet
        assert!(scheduler.poll(&mut store, t0).is_empty());

        let later = t0 + cfg.max_wait;
        let actions = scheduler.poll(&mut store, later);
        assert_eq!(send_count(&actions), 1);
        let SchedulerAction::Send { buffer, .. } = &actions[0] else {
            panic!("expected send");
        };
        assert_eq!(buffer.entry_count(), 3);
    }

    #[test]
    fn test_time_trigger_needs_eligible_beacons() {
        let cfg = config();
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 2);
        let t0 = Instant::now();

        assert!(scheduler.poll(&mut store, t0).is_empty());
        assert!(scheduler
            .poll(&mut store, t0 + cfg.max_wait * 3)
            .is_empty());
    }

    #[test]
    fn test_backpressure_when_all_slots_busy() {
        let cfg = config();
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 1);
        let now = Instant::now();

        for id in 0..5 {
            insert(&mut store, id, now);
        }
        let first = scheduler.poll(&mut store, now);
        assert_eq!(send_count(&first), 1);
        assert_eq!(scheduler.active_slots(), 1);

        // New batch arrives while the only slot is still broadcasting
        for id in 5..10 {
            insert(&mut store, id, now);
        }
        let occupancy = store.len();
        let second = scheduler.poll(&mut store, now);
        assert!(second.is_empty());
        assert_eq!(store.len(), occupancy);
        assert_eq!(store.count_eligible(now), 5);
    }

    #[test]
    fn test_tick_stops_expired_and_flushes_remainder() {
        let cfg = RelayConfig {
            batch_size: 5,
            max_beacons_per_message: 4,
            ..Default::default()
        };
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 1);
        let t0 = Instant::now();

        for id in 0..8 {
            insert(&mut store, id, t0);
        }
        let first = scheduler.poll(&mut store, t0);
        assert_eq!(send_count(&first), 1);
        assert_eq!(store.count_eligible(t0), 4);

        // Before the deadline the tick does nothing
        let early = t0 + cfg.adv_duration - Duration::from_millis(1);
        assert!(scheduler.on_tick(&mut store, early).is_empty());

        // At the deadline: stop the slot, then immediately reuse it
        let actions = scheduler.on_tick(&mut store, t0 + cfg.adv_duration);
        assert!(matches!(actions[0], SchedulerAction::Stop { slot: 0 }));
        assert_eq!(send_count(&actions), 1);
        assert_eq!(store.count_eligible(t0 + cfg.adv_duration), 0);
    }

    #[test]
    fn test_multiple_buffers_across_free_slots() {
        let cfg = RelayConfig {
            batch_size: 5,
            max_beacons_per_message: 4,
            ..Default::default()
        };
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 2);
        let now = Instant::now();

        for id in 0..8 {
            insert(&mut store, id, now);
        }
        let actions = scheduler.poll(&mut store, now);
        assert_eq!(send_count(&actions), 2);
        assert_eq!(scheduler.active_slots(), 2);
        assert_eq!(store.count_eligible(now), 0);
    }

    #[test]
    fn test_slot_complete_releases_idempotently() {
        let cfg = config();
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 1);
        let now = Instant::now();

        for id in 0..5 {
            insert(&mut store, id, now);
        }
        let _ = scheduler.poll(&mut store, now);
        assert_eq!(scheduler.active_slots(), 1);

        scheduler.on_slot_complete(0);
        scheduler.on_slot_complete(0); // racing stop/complete
        assert_eq!(scheduler.active_slots(), 0);
    }

    #[test]
    fn test_send_failure_reclaims_slot() {
        let cfg = config();
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 1);
        let now = Instant::now();

        for id in 0..5 {
            insert(&mut store, id, now);
        }
        let _ = scheduler.poll(&mut store, now);
        scheduler.on_send_failed(0);
        assert_eq!(scheduler.active_slots(), 0);
    }

    #[test]
    fn test_reset_frees_slots_and_reports_them() {
        let cfg = config();
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 2);
        let now = Instant::now();

        for id in 0..5 {
            insert(&mut store, id, now);
        }
        let _ = scheduler.poll(&mut store, now);
        assert_eq!(scheduler.active_slots(), 1);

        assert_eq!(scheduler.reset(now), vec![0]);
        assert_eq!(scheduler.active_slots(), 0);
        assert_eq!(scheduler.state(), FlushState::Idle);
    }

    #[test]
    fn test_last_flush_not_advanced_by_empty_cycle() {
        let cfg = config();
        let mut store = BeaconStore::new(cfg);
        let mut scheduler = FlushScheduler::new(cfg, 0);
        let t0 = Instant::now();

        for id in 0..5 {
            insert(&mut store, id, t0);
        }
        // Zero slots: trigger fires but nothing can be sent
        assert!(scheduler.poll(&mut store, t0).is_empty());
        assert_eq!(scheduler.last_flush, Some(t0));

        // Time trigger still armed relative to t0
        let later = t0 + cfg.max_wait;
        assert!(scheduler.poll(&mut store, later).is_empty());
        assert_eq!(scheduler.last_flush, Some(t0));
    }
}
