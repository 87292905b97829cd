//! External transport boundary.
//!
//! The radio is not part of this crate. The engine consumes a small
//! surface: start/stop scanning, a fixed pool of broadcast slots to send
//! payloads on, and a reset used by watchdog recovery. Sightings and
//! broadcast completions flow back asynchronously over an event channel
//! rather than a callback, so the node's single consumer task serializes
//! them with its own tick.
//!
//! [`SimTransport`] is the in-process implementation used by the demo
//! binary and tests.

mod sim;

pub use sim::{SentBroadcast, SimHandle, SimTransport};

use std::time::Duration;

use crate::relay::SlotId;
use crate::sighting::Sighting;

/// Event delivered by the transport to the engine.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A beacon advertisement was observed while scanning.
    Sighting(Sighting),
    /// A broadcast finished on its own (duration elapsed transport-side).
    SendComplete(SlotId),
    /// A broadcast failed after being accepted.
    SendFailed(SlotId),
}

/// Error type for transport calls.
///
/// Transport failures are absorbed locally: logged, retried on a later
/// cycle, and escalated to watchdog recovery only when sends stay silent
/// past the recovery timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The slot id is outside the advertised pool.
    InvalidSlot(SlotId),
    /// The backend rejected or failed the request.
    Backend(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSlot(id) => write!(f, "invalid broadcast slot {}", id),
            Self::Backend(msg) => write!(f, "transport backend error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// The radio surface consumed by the relay engine.
///
/// All methods are non-blocking requests; completion of sends and stops
/// is reported through [`TransportEvent`]s, never awaited in-line.
pub trait Transport: Send {
    /// Begin delivering [`TransportEvent::Sighting`] events.
    fn scan_start(&mut self) -> Result<(), TransportError>;

    /// Stop delivering sightings.
    fn scan_stop(&mut self) -> Result<(), TransportError>;

    /// Number of concurrent broadcast slots the radio offers.
    fn slot_count(&self) -> usize;

    /// Broadcast `payload` on `slot` for `duration`.
    fn slot_send(
        &mut self,
        slot: SlotId,
        payload: &[u8],
        duration: Duration,
    ) -> Result<(), TransportError>;

    /// Stop an in-progress broadcast. May race with its natural
    /// completion; callers treat the release as idempotent.
    fn slot_stop(&mut self, slot: SlotId) -> Result<(), TransportError>;

    /// Tear down and reinitialize the radio (watchdog recovery).
    /// Scanning must be restarted afterwards.
    fn reset(&mut self) -> Result<(), TransportError>;
}
