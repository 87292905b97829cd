//! Beacon aggregation and multi-hop relay engine.
//!
//! Collects short-range beacon sightings delivered by a radio transport,
//! deduplicates them by per-sender sequence numbers, stores them in a
//! bounded queue, and re-broadcasts them in batches as single outbound
//! advertisements so a distant collector can observe beacons outside its
//! own radio range. Relays are TTL-bounded for multi-hop operation, and a
//! watchdog recovers the transport when sends stall.
//!
//! The radio itself is external: implement [`transport::Transport`] and
//! feed [`transport::TransportEvent`]s to a [`node::RelayNode`]. Every
//! core component is testable on the host without a radio.

pub mod config;
pub mod network;
pub mod node;
pub mod relay;
pub mod sighting;
pub mod store;
pub mod transport;

// Re-export commonly used items
pub use config::{DrainPolicy, RelayConfig, SignalPolicy};
pub use network::{NodeStats, StatsServer, DEFAULT_STATS_PORT};
pub use node::{NodeError, RelayCore, RelayNode};
pub use relay::{FlushScheduler, OutboundBuffer, PayloadSerializer, SchedulerAction, Watchdog};
pub use sighting::{BeaconAddress, Sighting, Telemetry};
pub use store::{BeaconStore, UpsertOutcome};
pub use transport::{SimTransport, Transport, TransportError, TransportEvent};
