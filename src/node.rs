//! Relay node: core engine plus its runtime.
//!
//! [`RelayCore`] is the synchronous heart: store, scheduler and watchdog
//! behind one lock, every operation taking an explicit `now` so tests
//! control time. [`RelayNode`] wraps it in a background tokio task that
//! consumes the two producers the engine has - the transport's event
//! channel and a periodic tick - through a single `select!` loop, so all
//! mutation is serialized. Scheduler actions are executed against the
//! transport from that same task; transport failures are logged and
//! absorbed, and a watchdog stall runs the recovery sequence.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, RelayConfig};
use crate::network::NodeStats;
use crate::relay::{FlushScheduler, SchedulerAction, SlotId, Watchdog};
use crate::sighting::Sighting;
use crate::store::{BeaconStore, StoreFull, UpsertOutcome};
use crate::transport::{Transport, TransportError, TransportEvent};

/// Error type for node startup.
#[derive(Debug)]
pub enum NodeError {
    /// Configuration failed validation.
    Config(ConfigError),
    /// The transport refused to start scanning.
    Transport(TransportError),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<ConfigError> for NodeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// The engine proper: store, scheduler and watchdog under one owner.
pub struct RelayCore {
    store: BeaconStore,
    scheduler: FlushScheduler,
    watchdog: Watchdog,
    stats: Arc<NodeStats>,
}

impl RelayCore {
    /// Create a core over `slot_count` broadcast slots.
    pub fn new(config: RelayConfig, slot_count: usize, stats: Arc<NodeStats>, now: Instant) -> Self {
        Self {
            store: BeaconStore::new(config),
            scheduler: FlushScheduler::new(config, slot_count),
            watchdog: Watchdog::new(config.recovery_timeout, now),
            stats,
        }
    }

    /// Ingest one sighting and evaluate flush triggers.
    pub fn handle_sighting(&mut self, sighting: &Sighting, now: Instant) -> Vec<SchedulerAction> {
        self.stats.scan.sightings.fetch_add(1, Ordering::Relaxed);

        match self.store.upsert(sighting, now) {
            Ok(UpsertOutcome::Duplicate(_)) => {
                self.stats.scan.duplicates.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(StoreFull) => {
                // Sightings are best-effort; a full store drops, never blocks
                debug!("store full, dropping sighting of {}", sighting.address);
                self.stats.scan.dropped_full.fetch_add(1, Ordering::Relaxed);
            }
        }

        let actions = self.scheduler.poll(&mut self.store, now);
        self.update_gauges();
        actions
    }

    /// Periodic cycle: stop expired slots, re-evaluate triggers, check
    /// for a stall. The boolean asks the caller to run recovery.
    pub fn tick(&mut self, now: Instant) -> (Vec<SchedulerAction>, bool) {
        let actions = self.scheduler.on_tick(&mut self.store, now);
        self.update_gauges();

        let stalled = self.watchdog.check(now);
        (actions, stalled)
    }

    /// A payload of `entries` beacons was accepted by the transport.
    pub fn on_send_ok(&mut self, entries: usize, now: Instant) {
        self.watchdog.on_success(now);
        self.stats.relay.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats
            .relay
            .beacons_relayed
            .fetch_add(entries, Ordering::Relaxed);
    }

    /// A send the transport had accepted (or was just handed) failed.
    pub fn on_send_failed(&mut self, slot: SlotId) {
        self.stats.relay.send_failures.fetch_add(1, Ordering::Relaxed);
        self.scheduler.on_send_failed(slot);
    }

    /// The transport reported a broadcast finished.
    pub fn on_slot_complete(&mut self, slot: SlotId) {
        self.scheduler.on_slot_complete(slot);
    }

    /// First half of recovery: reset the scheduler and report which slots
    /// were active so the caller can stop them transport-side. The store
    /// keeps its non-stale entries.
    pub fn begin_recovery(&mut self, now: Instant) -> Vec<SlotId> {
        self.stats.recoveries.fetch_add(1, Ordering::Relaxed);
        self.scheduler.reset(now)
    }

    /// Read access to the store for diagnostics and tests.
    pub fn store(&self) -> &BeaconStore {
        &self.store
    }

    /// Read access to the scheduler for diagnostics and tests.
    pub fn scheduler(&self) -> &FlushScheduler {
        &self.scheduler
    }

    fn update_gauges(&self) {
        self.stats
            .store
            .occupancy
            .store(self.store.len(), Ordering::Relaxed);
        self.stats
            .store
            .evicted
            .store(self.store.evicted_total(), Ordering::Relaxed);
    }
}

/// A running relay node.
///
/// Owns the background task; shut down with [`RelayNode::shutdown`].
pub struct RelayNode {
    core: Arc<Mutex<RelayCore>>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
    stats: Arc<NodeStats>,
}

impl RelayNode {
    /// Validate the configuration, start scanning and spawn the engine
    /// task.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the transport refuses to
    /// start scanning.
    pub fn start<T: Transport + 'static>(
        config: RelayConfig,
        mut transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        stats: Arc<NodeStats>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        transport.scan_start().map_err(NodeError::Transport)?;

        let core = Arc::new(Mutex::new(RelayCore::new(
            config,
            transport.slot_count(),
            stats.clone(),
            Instant::now(),
        )));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            core.clone(),
            transport,
            events,
            config,
            cancel.clone(),
        ));

        info!(
            "relay node started: capacity {}, batch {}, {} byte payloads",
            config.capacity, config.batch_size, config.max_payload_len
        );

        Ok(Self {
            core,
            cancel,
            task,
            stats,
        })
    }

    /// Shared engine counters.
    pub fn stats(&self) -> Arc<NodeStats> {
        self.stats.clone()
    }

    /// The engine behind its lock, for diagnostics and tests.
    pub fn core(&self) -> Arc<Mutex<RelayCore>> {
        self.core.clone()
    }

    /// Stop the engine task and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("engine task ended abnormally: {}", e);
        }
    }
}

/// The single consumer of both producers: transport events and the tick.
async fn run_loop<T: Transport>(
    core: Arc<Mutex<RelayCore>>,
    mut transport: T,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    config: RelayConfig,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.adv_duration);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut events_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = interval.tick() => {
                let now = Instant::now();
                let (actions, stalled) = core.lock().await.tick(now);
                execute(&core, &mut transport, actions).await;
                if stalled {
                    recover(&core, &mut transport).await;
                }
            }

            event = events.recv(), if events_open => {
                match event {
                    Some(TransportEvent::Sighting(sighting)) => {
                        let now = Instant::now();
                        let actions = core.lock().await.handle_sighting(&sighting, now);
                        execute(&core, &mut transport, actions).await;
                    }
                    Some(TransportEvent::SendComplete(slot)) => {
                        core.lock().await.on_slot_complete(slot);
                    }
                    Some(TransportEvent::SendFailed(slot)) => {
                        warn!("transport reported failed broadcast on slot {}", slot);
                        core.lock().await.on_send_failed(slot);
                    }
                    None => {
                        warn!("transport event channel closed, ticking only");
                        events_open = false;
                    }
                }
            }
        }
    }

    if let Err(e) = transport.scan_stop() {
        warn!("failed to stop scanning on shutdown: {}", e);
    }
    info!("relay node stopped");
}

/// Apply scheduler actions to the transport.
async fn execute<T: Transport>(
    core: &Arc<Mutex<RelayCore>>,
    transport: &mut T,
    actions: Vec<SchedulerAction>,
) {
    for action in actions {
        match action {
            SchedulerAction::Send {
                slot,
                buffer,
                duration,
            } => match transport.slot_send(slot, buffer.as_bytes(), duration) {
                Ok(()) => {
                    core.lock()
                        .await
                        .on_send_ok(buffer.entry_count(), Instant::now());
                }
                Err(e) => {
                    error!("send on slot {} failed: {}", slot, e);
                    core.lock().await.on_send_failed(slot);
                }
            },
            SchedulerAction::Stop { slot } => {
                if let Err(e) = transport.slot_stop(slot) {
                    // The broadcast may have completed on its own already
                    debug!("stop on slot {} failed: {}", slot, e);
                }
            }
        }
    }
}

/// Watchdog recovery: free every slot, reset the transport, resume
/// scanning. Best-effort throughout; the next stall retries it.
async fn recover<T: Transport>(core: &Arc<Mutex<RelayCore>>, transport: &mut T) {
    warn!("starting watchdog recovery");

    let active = core.lock().await.begin_recovery(Instant::now());
    for slot in active {
        if let Err(e) = transport.slot_stop(slot) {
            debug!("recovery stop on slot {} failed: {}", slot, e);
        }
    }

    if let Err(e) = transport.reset() {
        error!("transport reset failed: {}", e);
    }
    match transport.scan_start() {
        Ok(()) => info!("recovery complete, scanning resumed"),
        Err(e) => error!("failed to resume scanning after recovery: {}", e),
    }
}
