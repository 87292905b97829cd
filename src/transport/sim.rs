//! In-process simulated transport.
//!
//! Stands in for the radio on the host: records every broadcast it is
//! handed, delivers injected sightings over the event channel, and can be
//! told to fail sends so recovery paths are exercisable in tests. The
//! demo binary drives it with synthetic beacon traffic.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc;

use super::{Transport, TransportError, TransportEvent};
use crate::relay::SlotId;
use crate::sighting::Sighting;

/// One broadcast accepted by the simulated radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBroadcast {
    /// Slot the payload went out on.
    pub slot: SlotId,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Requested broadcast duration.
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct SimState {
    scanning: bool,
    fail_sends: bool,
    resets: u32,
    sent: Vec<SentBroadcast>,
    stopped: Vec<SlotId>,
}

/// Simulated transport.
pub struct SimTransport {
    slot_count: usize,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Arc<Mutex<SimState>>,
}

impl SimTransport {
    /// Create a simulated radio with `slot_count` broadcast slots.
    ///
    /// Returns the transport and the receiving end of its event channel.
    pub fn new(slot_count: usize) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            slot_count,
            events,
            state: Arc::new(Mutex::new(SimState::default())),
        };
        (transport, rx)
    }

    /// A handle for injecting events and inspecting the radio from
    /// outside the node.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            events: self.events.clone(),
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim transport state lock")
    }
}

impl Transport for SimTransport {
    fn scan_start(&mut self) -> Result<(), TransportError> {
        self.state().scanning = true;
        info!("sim transport: scanning started");
        Ok(())
    }

    fn scan_stop(&mut self) -> Result<(), TransportError> {
        self.state().scanning = false;
        Ok(())
    }

    fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn slot_send(
        &mut self,
        slot: SlotId,
        payload: &[u8],
        duration: Duration,
    ) -> Result<(), TransportError> {
        if slot >= self.slot_count {
            return Err(TransportError::InvalidSlot(slot));
        }
        let mut state = self.state();
        if state.fail_sends {
            return Err(TransportError::Backend("simulated send failure".into()));
        }
        debug!(
            "sim transport: broadcasting {} bytes on slot {} for {:?}",
            payload.len(),
            slot,
            duration
        );
        state.sent.push(SentBroadcast {
            slot,
            payload: payload.to_vec(),
            duration,
        });
        Ok(())
    }

    fn slot_stop(&mut self, slot: SlotId) -> Result<(), TransportError> {
        if slot >= self.slot_count {
            return Err(TransportError::InvalidSlot(slot));
        }
        self.state().stopped.push(slot);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.resets += 1;
        state.scanning = false;
        // A reset brings a wedged radio back
        state.fail_sends = false;
        info!("sim transport: reset #{}", state.resets);
        Ok(())
    }
}

/// Cloneable handle onto a [`SimTransport`].
#[derive(Clone)]
pub struct SimHandle {
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim transport state lock")
    }

    /// Deliver a sighting to the engine, as the radio would from a scan
    /// report. Dropped silently if the node is gone.
    pub fn inject(&self, sighting: Sighting) {
        let _ = self.events.send(TransportEvent::Sighting(sighting));
    }

    /// Report a broadcast as finished on its own.
    pub fn complete_slot(&self, slot: SlotId) {
        let _ = self.events.send(TransportEvent::SendComplete(slot));
    }

    /// Report an accepted broadcast as failed after the fact.
    pub fn fail_slot(&self, slot: SlotId) {
        let _ = self.events.send(TransportEvent::SendFailed(slot));
    }

    /// Make subsequent `slot_send` calls fail until the next reset.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    /// Whether scanning is currently on.
    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    /// Broadcasts accepted so far.
    pub fn sent(&self) -> Vec<SentBroadcast> {
        self.state().sent.clone()
    }

    /// Number of broadcasts accepted so far.
    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }

    /// Slots the engine asked to stop, in order.
    pub fn stopped_slots(&self) -> Vec<SlotId> {
        self.state().stopped.clone()
    }

    /// Number of resets performed.
    pub fn resets(&self) -> u32 {
        self.state().resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sighting::BeaconAddress;

    #[test]
    fn test_scan_state_toggles() {
        let (mut transport, _rx) = SimTransport::new(2);
        let handle = transport.handle();

        assert!(!handle.is_scanning());
        transport.scan_start().unwrap();
        assert!(handle.is_scanning());
        transport.scan_stop().unwrap();
        assert!(!handle.is_scanning());
    }

    #[test]
    fn test_send_is_recorded() {
        let (mut transport, _rx) = SimTransport::new(2);
        let handle = transport.handle();

        transport
            .slot_send(1, &[0x59, 0x00, 0x08], Duration::from_secs(2))
            .unwrap();

        let sent = handle.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].slot, 1);
        assert_eq!(sent[0].payload, vec![0x59, 0x00, 0x08]);
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let (mut transport, _rx) = SimTransport::new(2);
        assert_eq!(
            transport.slot_send(2, &[], Duration::from_secs(1)),
            Err(TransportError::InvalidSlot(2))
        );
        assert_eq!(transport.slot_stop(9), Err(TransportError::InvalidSlot(9)));
    }

    #[test]
    fn test_failing_sends_until_reset() {
        let (mut transport, _rx) = SimTransport::new(1);
        let handle = transport.handle();

        handle.set_fail_sends(true);
        assert!(matches!(
            transport.slot_send(0, &[], Duration::from_secs(1)),
            Err(TransportError::Backend(_))
        ));

        transport.reset().unwrap();
        assert_eq!(handle.resets(), 1);
        assert!(transport.slot_send(0, &[], Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn test_injected_sighting_arrives_on_channel() {
        let (transport, mut rx) = SimTransport::new(1);
        let handle = transport.handle();

        let sighting = Sighting::direct(BeaconAddress::random([1, 2, 3, 4, 5, 6]), -60, 9);
        handle.inject(sighting);

        match rx.recv().await {
            Some(TransportEvent::Sighting(got)) => assert_eq!(got, sighting),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
