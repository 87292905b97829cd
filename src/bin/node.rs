//! Host demo node.
//!
//! Runs the relay engine against the simulated transport with synthetic
//! beacon traffic, and serves counters at http://localhost:8080/stats.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin node
//! ```

use std::sync::Arc;
use std::time::Duration;

use beacon_relay::sighting::{BeaconAddress, Provenance, Sighting, Telemetry};
use beacon_relay::transport::SimHandle;
use beacon_relay::{NodeStats, RelayConfig, RelayNode, SimTransport, StatsServer, DEFAULT_STATS_PORT};
use log::{error, info, warn};
use rand_core::{OsRng, RngCore};

/// Simulated fleet size: distinct beacon addresses in radio range.
const FLEET_SIZE: u8 = 8;

/// Pause between synthetic sightings.
const SIGHTING_INTERVAL: Duration = Duration::from_millis(300);

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== Beacon relay node starting ===");

    let config = RelayConfig::default();
    let (transport, events) = SimTransport::new(2);
    let handle = transport.handle();

    let stats = Arc::new(NodeStats::new("relay-node".to_string()));

    // Keep the server alive for its Drop; losing it is not fatal
    let _stats_server = match StatsServer::start(None, DEFAULT_STATS_PORT, stats.clone()) {
        Ok(server) => {
            info!(
                "stats available at http://localhost:{}/stats",
                DEFAULT_STATS_PORT
            );
            Some(server)
        }
        Err(e) => {
            warn!("failed to start stats server: {}", e);
            warn!("continuing without stats");
            None
        }
    };

    let node = match RelayNode::start(config, transport, events, stats.clone()) {
        Ok(node) => node,
        Err(e) => {
            error!("failed to start relay node: {}", e);
            std::process::exit(1);
        }
    };

    let traffic = tokio::spawn(generate_traffic(handle, stats.clone()));

    info!("running, Ctrl+C to exit");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to wait for Ctrl+C: {}", e);
    }

    traffic.abort();
    node.shutdown().await;
    info!("bye");
}

/// Feed the node synthetic sightings from a small beacon fleet.
///
/// Each beacon advances its own sequence counter; one in eight sightings
/// repeats the previous sequence to exercise duplicate suppression.
async fn generate_traffic(handle: SimHandle, stats: Arc<NodeStats>) {
    let mut sequences = [0u8; FLEET_SIZE as usize];
    let mut count = 0u64;

    loop {
        tokio::time::sleep(SIGHTING_INTERVAL).await;

        let roll = OsRng.next_u32();
        let beacon = (roll % FLEET_SIZE as u32) as usize;
        let repeat = (roll >> 3) % 8 == 0;
        if !repeat {
            sequences[beacon] = sequences[beacon].wrapping_add(1);
        }

        let sighting = Sighting {
            address: BeaconAddress::random([beacon as u8, 0xBE, 0xEF, 0x00, 0x00, 0x01]),
            signal_dbm: -40 - ((roll >> 8) % 50) as i8,
            provenance: Provenance::Direct,
            sequence: sequences[beacon],
            telemetry: Some(Telemetry {
                temperature: 0x1500 + ((roll >> 16) & 0xFF) as i16,
                voltage_mv: 2800 + ((roll >> 24) & 0xFF) as u16,
            }),
        };
        handle.inject(sighting);

        count += 1;
        if count % 20 == 0 {
            info!(
                "injected {} sightings, {} broadcasts so far",
                count,
                stats
                    .relay
                    .broadcasts
                    .load(std::sync::atomic::Ordering::Relaxed)
            );
        }
    }
}
