//! Node monitoring over HTTP.
//!
//! - [`stats_server`] - `/stats` endpoint serving engine counters as JSON

mod stats_server;

pub use stats_server::{
    BroadcastStats, NodeStats, ScanStats, StatsServer, StoreStats, DEFAULT_STATS_PORT,
};
