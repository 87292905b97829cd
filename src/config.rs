//! Relay engine configuration.
//!
//! One validated configuration struct covers the whole engine: store
//! capacity, relay timing, payload packing bounds, and the two policy knobs
//! that differ between deployed variants of this engine (signal-strength
//! refresh and drained-record fate).
//!
//! Defaults match the reference firmware deployment: 100-beacon store,
//! 3-hop TTL, 191-byte extended-advertising payload, 2 broadcast slots.

use std::time::Duration;

use crate::relay::payload::{ENTRY_SIZE, HEADER_SIZE};

/// How an existing record's signal strength is refreshed on a repeat
/// sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPolicy {
    /// The most recent reading replaces the stored one.
    LastWins,
    /// Keep the strongest reading observed so far (closest-pass tracking).
    MaxObserved,
}

/// What happens to a record after it is packed into an outbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Invalidate the slot; each report is relayed exactly once.
    Discard,
    /// Keep the record for local aggregation. It is marked as relayed and
    /// becomes eligible again only after a fresh non-duplicate sighting.
    Retain,
}

/// Configuration for the beacon relay engine.
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Maximum number of beacons tracked at once.
    pub capacity: usize,
    /// TTL assigned to directly-observed sightings.
    pub initial_ttl: u8,
    /// Eligible-beacon count that triggers a flush.
    pub batch_size: usize,
    /// A flush fires anyway once this much time has passed since the last
    /// successful flush, if anything is eligible.
    pub max_wait: Duration,
    /// A record not refreshed for this long is considered stale; eviction
    /// happens at twice this age.
    pub stale_threshold: Duration,
    /// Minimum age of a record before it may be relayed. Zero relays
    /// immediately; the reference firmware used 5 s to let a beacon's own
    /// transmission burst settle.
    pub min_relay_age: Duration,
    /// How long one broadcast occupies a slot.
    pub adv_duration: Duration,
    /// Maximum outbound payload length in bytes, header included.
    pub max_payload_len: usize,
    /// Maximum beacon entries per outbound payload.
    pub max_beacons_per_message: usize,
    /// Watchdog: no successful send for this long triggers recovery.
    pub recovery_timeout: Duration,
    /// Signal-strength refresh policy.
    pub signal_policy: SignalPolicy,
    /// Fate of a record once packed into a payload.
    pub drain_policy: DrainPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            initial_ttl: 3,
            batch_size: 3,
            max_wait: Duration::from_millis(3000),
            stale_threshold: Duration::from_millis(5000),
            min_relay_age: Duration::ZERO,
            adv_duration: Duration::from_millis(2000),
            max_payload_len: 191,
            max_beacons_per_message: 24,
            recovery_timeout: Duration::from_millis(5000),
            signal_policy: SignalPolicy::LastWins,
            drain_policy: DrainPolicy::Discard,
        }
    }
}

impl RelayConfig {
    /// Record age at which the staleness sweep evicts.
    pub fn eviction_age(&self) -> Duration {
        self.stale_threshold * 2
    }

    /// Validate configuration parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if any capacity or duration is zero where the
    /// engine requires progress, or if the payload bounds cannot fit a
    /// single beacon entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than 0"));
        }
        if self.max_wait.is_zero() {
            return Err(ConfigError::Invalid("max_wait must be greater than 0"));
        }
        if self.stale_threshold.is_zero() {
            return Err(ConfigError::Invalid(
                "stale_threshold must be greater than 0",
            ));
        }
        if self.adv_duration.is_zero() {
            return Err(ConfigError::Invalid("adv_duration must be greater than 0"));
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "recovery_timeout must be greater than 0",
            ));
        }
        if self.max_beacons_per_message == 0 {
            return Err(ConfigError::Invalid(
                "max_beacons_per_message must be greater than 0",
            ));
        }
        if self.max_payload_len < HEADER_SIZE + ENTRY_SIZE {
            return Err(ConfigError::Invalid(
                "max_payload_len must fit the header plus one entry",
            ));
        }
        Ok(())
    }
}

/// Error type for configuration validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid configuration parameter.
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_matches_reference_constants() {
        let config = RelayConfig::default();
        assert_eq!(config.capacity, 100);
        assert_eq!(config.initial_ttl, 3);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.max_payload_len, 191);
        assert_eq!(config.max_beacons_per_message, 24);
        assert_eq!(config.adv_duration, Duration::from_millis(2000));
        assert_eq!(config.max_wait, Duration::from_millis(3000));
        assert_eq!(config.recovery_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_eviction_age_is_twice_stale_threshold() {
        let config = RelayConfig::default();
        assert_eq!(config.eviction_age(), config.stale_threshold * 2);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = RelayConfig {
            capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = RelayConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_durations_rejected() {
        for field in 0..4 {
            let mut config = RelayConfig::default();
            match field {
                0 => config.max_wait = Duration::ZERO,
                1 => config.stale_threshold = Duration::ZERO,
                2 => config.adv_duration = Duration::ZERO,
                _ => config.recovery_timeout = Duration::ZERO,
            }
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_payload_too_small_rejected() {
        let config = RelayConfig {
            max_payload_len: 10,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::Invalid("capacity must be greater than 0");
        assert_eq!(
            format!("{}", err),
            "invalid config: capacity must be greater than 0"
        );
    }
}
