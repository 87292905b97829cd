//! Outbound relay machinery.
//!
//! - [`payload`] - wire format, packing serializer and decoder
//! - [`slots`] - broadcast slot pool
//! - [`scheduler`] - flush state machine
//! - [`watchdog`] - stall detection

pub mod payload;
pub mod scheduler;
pub mod slots;
pub mod watchdog;

pub use payload::{OutboundBuffer, PayloadSerializer, RelayHeader};
pub use scheduler::{FlushScheduler, FlushState, SchedulerAction};
pub use slots::{SlotId, SlotPool};
pub use watchdog::Watchdog;
