//! Advertisement payload parsing.
//!
//! Raw advertisement data is a sequence of length/type/value structures:
//!
//! ```text
//! [len: 1 byte][ad type: 1 byte][value: len - 1 bytes] ...
//! ```
//!
//! The parser walks these structures and classifies the advertisement:
//!
//! - Manufacturer data starting with our company id and format byte is a
//!   relay broadcast: the embedded sequence number and TTL are extracted,
//!   and the TTL is decremented for this hop (floored at 0).
//! - 16-bit service data carrying an Eddystone TLM frame yields telemetry
//!   (battery voltage and temperature, big-endian per the TLM spec).
//! - Anything else is a plain direct sighting.
//!
//! Plain beacons carry no sequence field, so direct sightings default to
//! sequence 0; the dedup filter then treats back-to-back identical reports
//! as retransmissions of one event. Malformed structures end the walk
//! early, the sighting is still produced from whatever parsed cleanly.

use super::{BeaconAddress, Provenance, Sighting, Telemetry};
use crate::relay::payload::{COMPANY_ID_LSB, COMPANY_ID_MSB, FORMAT_VERSION};

/// AD type for manufacturer-specific data.
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// AD type for 16-bit-UUID service data.
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

/// Eddystone service UUID bytes as they appear in service data.
const EDDYSTONE_UUID: [u8; 2] = [0xAA, 0xFE];

/// Eddystone TLM frame type.
const EDDYSTONE_FRAME_TLM: u8 = 0x20;

/// Minimum TLM frame length: uuid(2) + frame(1) + version(1) + vbatt(2) +
/// temp(2).
const TLM_MIN_LEN: usize = 8;

/// Iterator over the length/type/value structures of a raw advertisement.
///
/// Stops at the first structure whose declared length is zero or runs past
/// the end of the buffer.
pub struct AdStructures<'a> {
    data: &'a [u8],
}

impl<'a> AdStructures<'a> {
    /// Walk the structures of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    /// `(ad_type, value)` of one structure.
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 2 {
            return None;
        }
        let len = self.data[0] as usize;
        if len == 0 || 1 + len > self.data.len() {
            return None;
        }
        let ad_type = self.data[1];
        let value = &self.data[2..1 + len];
        self.data = &self.data[1 + len..];
        Some((ad_type, value))
    }
}

/// Parse a raw advertisement into a sighting of the advertising device.
///
/// `address` and `signal_dbm` come from the scan report; `ad` is the raw
/// advertisement payload.
pub fn parse_advertisement(address: BeaconAddress, signal_dbm: i8, ad: &[u8]) -> Sighting {
    let mut provenance = Provenance::Direct;
    let mut sequence = 0u8;
    let mut telemetry = None;

    for (ad_type, value) in AdStructures::new(ad) {
        match ad_type {
            AD_TYPE_MANUFACTURER_DATA => {
                if let Some((seq, ttl)) = parse_relay_header(value) {
                    sequence = seq;
                    provenance = Provenance::Relayed {
                        ttl: ttl.saturating_sub(1),
                    };
                }
            }
            AD_TYPE_SERVICE_DATA_16 => {
                if let Some(tlm) = parse_tlm(value) {
                    telemetry = Some(tlm);
                }
            }
            _ => {}
        }
    }

    Sighting {
        address,
        signal_dbm,
        provenance,
        sequence,
        telemetry,
    }
}

/// Extract `(sequence, ttl)` from manufacturer data if it is one of our
/// relay broadcasts.
fn parse_relay_header(value: &[u8]) -> Option<(u8, u8)> {
    if value.len() < 5 {
        return None;
    }
    if value[0] != COMPANY_ID_LSB || value[1] != COMPANY_ID_MSB || value[2] != FORMAT_VERSION {
        return None;
    }
    Some((value[3], value[4]))
}

/// Extract telemetry from 16-bit service data if it is an Eddystone TLM
/// frame.
fn parse_tlm(value: &[u8]) -> Option<Telemetry> {
    if value.len() < TLM_MIN_LEN {
        return None;
    }
    if value[..2] != EDDYSTONE_UUID || value[2] != EDDYSTONE_FRAME_TLM {
        return None;
    }
    Some(Telemetry {
        voltage_mv: u16::from_be_bytes([value[4], value[5]]),
        temperature: i16::from_be_bytes([value[6], value[7]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> BeaconAddress {
        BeaconAddress::random([0x01, 0x02, 0x03, 0x04, 0x05, 0x06])
    }

    /// Build one AD structure: length byte, type byte, value.
    fn structure(ad_type: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![(value.len() + 1) as u8, ad_type];
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn test_empty_ad_is_direct_sighting() {
        let s = parse_advertisement(addr(), -55, &[]);
        assert_eq!(s.provenance, Provenance::Direct);
        assert_eq!(s.sequence, 0);
        assert_eq!(s.telemetry, None);
        assert_eq!(s.signal_dbm, -55);
    }

    #[test]
    fn test_relay_header_extracts_sequence_and_decrements_ttl() {
        let ad = structure(
            AD_TYPE_MANUFACTURER_DATA,
            &[COMPANY_ID_LSB, COMPANY_ID_MSB, FORMAT_VERSION, 42, 3],
        );
        let s = parse_advertisement(addr(), -70, &ad);
        assert_eq!(s.sequence, 42);
        assert_eq!(s.provenance, Provenance::Relayed { ttl: 2 });
    }

    #[test]
    fn test_relay_ttl_zero_stays_zero() {
        let ad = structure(
            AD_TYPE_MANUFACTURER_DATA,
            &[COMPANY_ID_LSB, COMPANY_ID_MSB, FORMAT_VERSION, 9, 0],
        );
        let s = parse_advertisement(addr(), -70, &ad);
        assert_eq!(s.provenance, Provenance::Relayed { ttl: 0 });
    }

    #[test]
    fn test_foreign_manufacturer_data_ignored() {
        // Apple company id: not ours
        let ad = structure(AD_TYPE_MANUFACTURER_DATA, &[0x4C, 0x00, 0x02, 0x15, 0x00]);
        let s = parse_advertisement(addr(), -70, &ad);
        assert_eq!(s.provenance, Provenance::Direct);
        assert_eq!(s.sequence, 0);
    }

    #[test]
    fn test_tlm_frame_yields_big_endian_telemetry() {
        // vbatt = 0x0BB8 (3000 mV), temp = 0x1500 (21.0 in 8.8)
        let ad = structure(
            AD_TYPE_SERVICE_DATA_16,
            &[0xAA, 0xFE, 0x20, 0x00, 0x0B, 0xB8, 0x15, 0x00],
        );
        let s = parse_advertisement(addr(), -60, &ad);
        let tlm = s.telemetry.expect("TLM should parse");
        assert_eq!(tlm.voltage_mv, 3000);
        assert_eq!(tlm.temperature, 0x1500);
    }

    #[test]
    fn test_non_tlm_eddystone_frame_ignored() {
        // Eddystone UID frame (0x00), not TLM
        let ad = structure(
            AD_TYPE_SERVICE_DATA_16,
            &[0xAA, 0xFE, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04],
        );
        let s = parse_advertisement(addr(), -60, &ad);
        assert_eq!(s.telemetry, None);
    }

    #[test]
    fn test_relay_header_and_tlm_combine() {
        let mut ad = structure(
            AD_TYPE_MANUFACTURER_DATA,
            &[COMPANY_ID_LSB, COMPANY_ID_MSB, FORMAT_VERSION, 7, 2],
        );
        ad.extend(structure(
            AD_TYPE_SERVICE_DATA_16,
            &[0xAA, 0xFE, 0x20, 0x00, 0x0D, 0x48, 0x11, 0x80],
        ));
        let s = parse_advertisement(addr(), -80, &ad);
        assert_eq!(s.sequence, 7);
        assert_eq!(s.provenance, Provenance::Relayed { ttl: 1 });
        assert_eq!(s.telemetry.unwrap().voltage_mv, 3400);
    }

    #[test]
    fn test_truncated_structure_ends_walk() {
        // Declared length 10 but only 3 bytes follow
        let ad = vec![10, AD_TYPE_MANUFACTURER_DATA, 0x59, 0x00];
        let s = parse_advertisement(addr(), -50, &ad);
        assert_eq!(s.provenance, Provenance::Direct);
    }

    #[test]
    fn test_zero_length_structure_ends_walk() {
        let mut ad = vec![0u8, 0u8];
        ad.extend(structure(
            AD_TYPE_MANUFACTURER_DATA,
            &[COMPANY_ID_LSB, COMPANY_ID_MSB, FORMAT_VERSION, 1, 1],
        ));
        let s = parse_advertisement(addr(), -50, &ad);
        // Walk stopped before the relay header
        assert_eq!(s.provenance, Provenance::Direct);
    }

    #[test]
    fn test_ad_structures_iterates_all() {
        let mut ad = structure(0x01, &[0x06]); // flags
        ad.extend(structure(0x09, b"beacon")); // complete local name
        let parts: Vec<_> = AdStructures::new(&ad).collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], (0x01, &[0x06][..]));
        assert_eq!(parts[1], (0x09, &b"beacon"[..]));
    }
}
