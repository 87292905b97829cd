//! Broadcast slot pool.
//!
//! The transport exposes a small fixed pool of concurrent broadcast
//! contexts. This pool mirrors their lifecycle on the engine side: a slot
//! is `Free` or `Active` until a deadline (the broadcast duration), and
//! exactly one outbound buffer occupies an active slot.
//!
//! Release is idempotent: a stop request racing with a completion event
//! must not corrupt the pool, so releasing a free slot is a no-op.

use std::time::Instant;

/// Identifier of one broadcast slot.
pub type SlotId = usize;

/// Lifecycle state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Active { deadline: Instant },
}

/// Fixed pool of broadcast slots.
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<SlotState>,
}

impl SlotPool {
    /// Create a pool of `count` free slots.
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![SlotState::Free; count],
        }
    }

    /// Claim the first free slot and mark it active until `deadline`.
    ///
    /// Returns `None` when every slot is busy; the caller defers the rest
    /// of the flush to a later cycle.
    pub fn acquire_free(&mut self, deadline: Instant) -> Option<SlotId> {
        let id = self
            .slots
            .iter()
            .position(|state| *state == SlotState::Free)?;
        self.slots[id] = SlotState::Active { deadline };
        Some(id)
    }

    /// Return a slot to the pool.
    ///
    /// Returns `true` if the slot was active. Releasing an already-free or
    /// unknown slot is a no-op returning `false`.
    pub fn release(&mut self, id: SlotId) -> bool {
        match self.slots.get_mut(id) {
            Some(state @ SlotState::Active { .. }) => {
                *state = SlotState::Free;
                true
            }
            _ => false,
        }
    }

    /// Free every slot (watchdog recovery). Returns the ids that were
    /// active.
    pub fn release_all(&mut self) -> Vec<SlotId> {
        let mut released = Vec::new();
        for (id, state) in self.slots.iter_mut().enumerate() {
            if matches!(state, SlotState::Active { .. }) {
                *state = SlotState::Free;
                released.push(id);
            }
        }
        released
    }

    /// Active slots whose broadcast duration has elapsed.
    pub fn expired(&self, now: Instant) -> Vec<SlotId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, state)| match state {
                SlotState::Active { deadline } if now >= *deadline => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Whether the slot is currently active.
    pub fn is_active(&self, id: SlotId) -> bool {
        matches!(self.slots.get(id), Some(SlotState::Active { .. }))
    }

    /// Number of active slots.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|state| matches!(state, SlotState::Active { .. }))
            .count()
    }

    /// Number of free slots.
    pub fn free_count(&self) -> usize {
        self.slots.len() - self.active_count()
    }

    /// Total pool size.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
