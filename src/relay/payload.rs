//! Outbound payload format and packing.
//!
//! One relay broadcast is a single manufacturer-data payload:
//!
//! ```text
//! [company id LSB][company id MSB][format byte][sequence][initial ttl]
//! [entry 0][entry 1]...
//! ```
//!
//! Each entry is fixed-width (12 bytes):
//!
//! ```text
//! [address: 6][signal dBm: 1][ttl: 1][temperature LE: 2][voltage LE: 2]
//! ```
//!
//! Entry fields are little-endian; Eddystone TLM inputs are big-endian and
//! converted at parse time. Packing is greedy and bounded: the remaining-
//! space check is the loop precondition, so an entry is either written
//! whole or not at all, and the output never exceeds the configured
//! maximum payload length.

use crate::config::RelayConfig;
use crate::sighting::{BeaconAddress, Telemetry};
use crate::store::{BeaconStore, SlotIndex};

/// Company identifier, least significant byte (0x0059, Nordic Semiconductor).
pub const COMPANY_ID_LSB: u8 = 0x59;

/// Company identifier, most significant byte.
pub const COMPANY_ID_MSB: u8 = 0x00;

/// Format/version byte distinguishing relay payloads from other uses of
/// the company id.
pub const FORMAT_VERSION: u8 = 0x08;

/// Fixed header length in bytes.
pub const HEADER_SIZE: usize = 5;

/// Packed beacon entry length in bytes.
pub const ENTRY_SIZE: usize = 12;

/// A serialized relay payload.
///
/// Owned by the flush scheduler from creation until handed to the
/// transport for one broadcast slot lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundBuffer {
    bytes: Vec<u8>,
}

impl OutboundBuffer {
    /// The serialized payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total payload length, header included.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// A payload is never empty; the header is always present.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of beacon entries packed after the header.
    pub fn entry_count(&self) -> usize {
        self.bytes.len().saturating_sub(HEADER_SIZE) / ENTRY_SIZE
    }
}

/// Decoded payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayHeader {
    /// Outbound sequence number of the sending relay.
    pub sequence: u8,
    /// TTL the sending relay assigns to fresh observations.
    pub initial_ttl: u8,
}

/// One beacon entry decoded from a relay payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadEntry {
    /// Beacon address. The wire carries only raw bytes; random kind is
    /// assumed on decode.
    pub address: BeaconAddress,
    /// Signal strength at the relaying node, dBm.
    pub signal_dbm: i8,
    /// Remaining relay hops for this report.
    pub ttl: u8,
    /// Telemetry fields (zeros when the beacon carried none).
    pub telemetry: Telemetry,
}

/// Error type for payload decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload shorter than the fixed header.
    TooShort,
    /// Company id bytes do not match ours.
    UnknownCompany([u8; 2]),
    /// Format byte is not a version this decoder understands.
    UnknownVersion(u8),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "payload shorter than header"),
            Self::UnknownCompany(id) => {
                write!(f, "unknown company id {:02X}{:02X}", id[1], id[0])
            }
            Self::UnknownVersion(v) => write!(f, "unknown format version 0x{:02X}", v),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Packs beacon records into bounded outbound payloads.
///
/// Holds the outbound sequence counter, incremented once per [`pack`]
/// call and wrapping at 256.
///
/// [`pack`]: PayloadSerializer::pack
#[derive(Debug)]
pub struct PayloadSerializer {
    sequence: u8,
    initial_ttl: u8,
    max_len: usize,
    max_entries: usize,
}

impl PayloadSerializer {
    /// Create a serializer from the engine configuration.
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            sequence: 0,
            initial_ttl: config.initial_ttl,
            max_len: config.max_payload_len,
            max_entries: config.max_beacons_per_message,
        }
    }

    /// Pack candidate records into one payload.
    ///
    /// `candidates` must already be filtered for eligibility; packing takes
    /// them in order until the payload or the per-message entry limit is
    /// full. The store is not mutated; the returned indices tell the
    /// caller which records were consumed so it can apply the drain
    /// policy.
    pub fn pack(
        &mut self,
        store: &BeaconStore,
        candidates: &[SlotIndex],
    ) -> (OutboundBuffer, Vec<SlotIndex>) {
        self.sequence = self.sequence.wrapping_add(1);

        let mut bytes = Vec::with_capacity(self.max_len);
        bytes.push(COMPANY_ID_LSB);
        bytes.push(COMPANY_ID_MSB);
        bytes.push(FORMAT_VERSION);
        bytes.push(self.sequence);
        bytes.push(self.initial_ttl);

        let mut consumed = Vec::new();

        for &index in candidates {
            if consumed.len() >= self.max_entries || bytes.len() + ENTRY_SIZE > self.max_len {
                break;
            }
            // A candidate may have been evicted between selection and
            // packing; skip silently.
            let Some(record) = store.get(index) else {
                continue;
            };

            let telemetry = record.telemetry.unwrap_or_default();
            bytes.extend_from_slice(record.address.as_bytes());
            bytes.push(record.signal_dbm as u8);
            bytes.push(record.ttl);
            bytes.extend_from_slice(&telemetry.temperature.to_le_bytes());
            bytes.extend_from_slice(&telemetry.voltage_mv.to_le_bytes());
            consumed.push(index);
        }

        (OutboundBuffer { bytes }, consumed)
    }

    /// The sequence number assigned to the most recent payload.
    pub fn last_sequence(&self) -> u8 {
        self.sequence
    }

    /// Clear transient counters (watchdog recovery).
    pub fn reset(&mut self) {
        self.sequence = 0;
    }
}

/// Decode a relay payload into its header and beacon entries.
///
/// Trailing bytes shorter than one entry are ignored, matching the
/// collector's tolerance for foreign padding.
///
/// # Errors
///
/// Returns a [`DecodeError`] for payloads shorter than the header or with
/// an unrecognized company id or format version.
pub fn decode(payload: &[u8]) -> Result<(RelayHeader, Vec<PayloadEntry>), DecodeError> {
    if payload.len() < HEADER_SIZE {
        return Err(DecodeError::TooShort);
    }
    if payload[0] != COMPANY_ID_LSB || payload[1] != COMPANY_ID_MSB {
        return Err(DecodeError::UnknownCompany([payload[0], payload[1]]));
    }
    if payload[2] != FORMAT_VERSION {
        return Err(DecodeError::UnknownVersion(payload[2]));
    }

    let header = RelayHeader {
        sequence: payload[3],
        initial_ttl: payload[4],
    };

    let mut entries = Vec::new();
    let mut rest = &payload[HEADER_SIZE..];
    while rest.len() >= ENTRY_SIZE {
        let mut address = [0u8; 6];
        address.copy_from_slice(&rest[..6]);
        entries.push(PayloadEntry {
            address: BeaconAddress::random(address),
            signal_dbm: rest[6] as i8,
            ttl: rest[7],
            telemetry: Telemetry {
                temperature: i16::from_le_bytes([rest[8], rest[9]]),
                voltage_mv: u16::from_le_bytes([rest[10], rest[11]]),
            },
        });
        rest = &rest[ENTRY_SIZE..];
    }

    Ok((header, entries))
}
