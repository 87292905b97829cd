//! Beacon sighting model.
//!
//! A sighting is one observation of a remote beacon, delivered
//! asynchronously by the transport. It carries the sender's radio address,
//! the received signal strength, relay provenance (was this heard directly
//! or re-broadcast by another relay?), the sender-assigned sequence number
//! used for duplicate suppression, and optional telemetry fields parsed
//! from the advertisement payload.

mod parser;

pub use parser::{parse_advertisement, AdStructures};

/// Kind tag of a beacon radio address.
///
/// Carried alongside the raw bytes while a sighting is in the store; the
/// wire format packs only the raw bytes and the receiving side assumes
/// `Random` (most beacons use static random addresses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// Public (IEEE-assigned) device address.
    Public,
    /// Random device address.
    Random,
}

/// Beacon radio address: 6 raw bytes plus a kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeaconAddress {
    kind: AddressKind,
    bytes: [u8; 6],
}

impl BeaconAddress {
    /// Create an address from raw bytes and a kind tag.
    pub const fn new(kind: AddressKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }

    /// Create a random-kind address (the common case for beacons).
    pub const fn random(bytes: [u8; 6]) -> Self {
        Self::new(AddressKind::Random, bytes)
    }

    /// The raw address bytes.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }

    /// The address kind tag.
    pub const fn kind(&self) -> AddressKind {
        self.kind
    }
}

impl std::fmt::Display for BeaconAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5], self.bytes[4], self.bytes[3], self.bytes[2], self.bytes[1],
            self.bytes[0]
        )
    }
}

/// Telemetry fields carried opaquely alongside a beacon report.
///
/// Values are the raw Eddystone TLM representations: temperature in 8.8
/// fixed point, battery voltage in millivolts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Telemetry {
    /// Beacon temperature, raw 8.8 fixed-point value.
    pub temperature: i16,
    /// Battery voltage in millivolts.
    pub voltage_mv: u16,
}

/// How a sighting reached this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Heard directly from the beacon itself.
    Direct,
    /// Extracted from another relay's broadcast. `ttl` is the remaining
    /// hop budget after decrementing for this hop (floored at 0).
    Relayed {
        /// Remaining relay hops.
        ttl: u8,
    },
}

/// One observation of a remote beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sighting {
    /// Radio address of the observed beacon.
    pub address: BeaconAddress,
    /// Received signal strength in dBm.
    pub signal_dbm: i8,
    /// Direct observation or relayed report.
    pub provenance: Provenance,
    /// Sender-assigned sequence counter for duplicate suppression.
    pub sequence: u8,
    /// Optional telemetry parsed from the advertisement.
    pub telemetry: Option<Telemetry>,
}

impl Sighting {
    /// Create a direct sighting with no telemetry.
    pub fn direct(address: BeaconAddress, signal_dbm: i8, sequence: u8) -> Self {
        Self {
            address,
            signal_dbm,
            provenance: Provenance::Direct,
            sequence,
            telemetry: None,
        }
    }

    /// The TTL this sighting should enter the store with, given the TTL
    /// assigned to fresh observations.
    pub fn ttl(&self, initial_ttl: u8) -> u8 {
        match self.provenance {
            Provenance::Direct => initial_ttl,
            Provenance::Relayed { ttl } => ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_is_reversed_hex() {
        let addr = BeaconAddress::random([0xF6, 0xE5, 0xD4, 0xC3, 0xB2, 0xA1]);
        assert_eq!(format!("{}", addr), "A1:B2:C3:D4:E5:F6");
    }

    #[test]
    fn test_address_equality_includes_kind() {
        let bytes = [1, 2, 3, 4, 5, 6];
        let public = BeaconAddress::new(AddressKind::Public, bytes);
        let random = BeaconAddress::new(AddressKind::Random, bytes);
        assert_ne!(public, random);
        assert_eq!(random, BeaconAddress::random(bytes));
    }

    #[test]
    fn test_direct_sighting_gets_initial_ttl() {
        let s = Sighting::direct(BeaconAddress::random([0; 6]), -40, 7);
        assert_eq!(s.ttl(3), 3);
    }

    #[test]
    fn test_relayed_sighting_keeps_decremented_ttl() {
        let s = Sighting {
            provenance: Provenance::Relayed { ttl: 1 },
            ..Sighting::direct(BeaconAddress::random([0; 6]), -40, 7)
        };
        assert_eq!(s.ttl(3), 1);
    }

    #[test]
    fn test_telemetry_default_is_zeroed() {
        let t = Telemetry::default();
        assert_eq!(t.temperature, 0);
        assert_eq!(t.voltage_mv, 0);
    }
}
