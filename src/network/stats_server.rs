//! HTTP stats server for relay monitoring.
//!
//! Serves a `/stats` endpoint with the engine's counters as JSON. The
//! counters are plain atomics updated by the node as it works, so the
//! server never takes the engine lock.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 120,
//!   "node": "relay-node",
//!   "scan": { "sightings": 480, "duplicates": 113, "dropped_full": 2 },
//!   "relay": { "broadcasts": 41, "beacons_relayed": 197, "send_failures": 0 },
//!   "store": { "occupancy": 12, "evicted": 31 },
//!   "recoveries": 0
//! }
//! ```

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use tiny_http::{Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Counters for the scan/ingest side.
#[derive(Debug, Default)]
pub struct ScanStats {
    /// Sightings delivered by the transport.
    pub sightings: AtomicUsize,
    /// Sightings suppressed as duplicate sequences.
    pub duplicates: AtomicUsize,
    /// Sightings dropped because the store was full.
    pub dropped_full: AtomicUsize,
}

impl ScanStats {
    fn to_json(&self) -> String {
        format!(
            r#"{{"sightings":{},"duplicates":{},"dropped_full":{}}}"#,
            self.sightings.load(Ordering::Relaxed),
            self.duplicates.load(Ordering::Relaxed),
            self.dropped_full.load(Ordering::Relaxed)
        )
    }
}

/// Counters for the broadcast side.
#[derive(Debug, Default)]
pub struct BroadcastStats {
    /// Payloads handed to the transport successfully.
    pub broadcasts: AtomicUsize,
    /// Beacon entries carried by those payloads.
    pub beacons_relayed: AtomicUsize,
    /// Transport send calls that failed.
    pub send_failures: AtomicUsize,
}

impl BroadcastStats {
    fn to_json(&self) -> String {
        format!(
            r#"{{"broadcasts":{},"beacons_relayed":{},"send_failures":{}}}"#,
            self.broadcasts.load(Ordering::Relaxed),
            self.beacons_relayed.load(Ordering::Relaxed),
            self.send_failures.load(Ordering::Relaxed)
        )
    }
}

/// Store occupancy gauge and eviction counter.
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Live records right now.
    pub occupancy: AtomicUsize,
    /// Cumulative staleness evictions.
    pub evicted: AtomicUsize,
}

impl StoreStats {
    fn to_json(&self) -> String {
        format!(
            r#"{{"occupancy":{},"evicted":{}}}"#,
            self.occupancy.load(Ordering::Relaxed),
            self.evicted.load(Ordering::Relaxed)
        )
    }
}

/// All engine counters, shared between the node and the stats server.
#[derive(Debug)]
pub struct NodeStats {
    start_time: Instant,
    /// Human-readable node name.
    pub node_name: String,
    /// Ingest counters.
    pub scan: ScanStats,
    /// Broadcast counters.
    pub relay: BroadcastStats,
    /// Store counters.
    pub store: StoreStats,
    /// Watchdog recoveries performed.
    pub recoveries: AtomicUsize,
}

impl NodeStats {
    /// Create zeroed counters for a node called `node_name`.
    pub fn new(node_name: String) -> Self {
        Self {
            start_time: Instant::now(),
            node_name,
            scan: ScanStats::default(),
            relay: BroadcastStats::default(),
            store: StoreStats::default(),
            recoveries: AtomicUsize::new(0),
        }
    }

    /// Seconds since the node started.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Serialize every counter group to JSON.
    pub fn to_json(&self) -> String {
        format!(
            r#"{{"uptime_secs":{},"node":"{}","scan":{},"relay":{},"store":{},"recoveries":{}}}"#,
            self.uptime_secs(),
            self.node_name,
            self.scan.to_json(),
            self.relay.to_json(),
            self.store.to_json(),
            self.recoveries.load(Ordering::Relaxed)
        )
    }
}

impl Default for NodeStats {
    fn default() -> Self {
        Self::new("relay-node".to_string())
    }
}

/// HTTP stats server running on a background thread.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatsServer {
    /// Start serving `stats` on `bind_addr:port` (0.0.0.0 when no address
    /// is given). Drop the returned handle to stop the server.
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<NodeStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;

        info!("stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();
        let handle = thread::spawn(move || Self::serve(server, stats, shutdown_flag));

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    fn serve(server: Server, stats: Arc<NodeStats>, shutdown: Arc<AtomicBool>) {
        let content_type =
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("static header");
        let allow_get =
            tiny_http::Header::from_bytes(&b"Allow"[..], &b"GET"[..]).expect("static header");

        while !shutdown.load(Ordering::Acquire) {
            let request = match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => request,
                Ok(None) => continue, // timeout, re-check shutdown
                Err(e) => {
                    error!("stats server error: {}", e);
                    break;
                }
            };

            let response = if request.method() != &Method::Get {
                Response::from_string("Method Not Allowed")
                    .with_status_code(405)
                    .with_header(allow_get.clone())
            } else {
                match request.url() {
                    "/stats" | "/stats/" | "/" => Response::from_string(stats.to_json())
                        .with_status_code(200)
                        .with_header(content_type.clone()),
                    _ => Response::from_string("Not Found").with_status_code(404),
                }
            };

            if let Err(e) = request.respond(response) {
                warn!("failed to send stats response: {}", e);
            }
        }

        info!("stats server shutting down");
    }

    /// Stop the server. May take up to the polling interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}
