//! Transport arbitration: which path delivers events right now.
//!
//! One task owns the whole decision surface. Both transports feed it one
//! merged update stream, so failover counting, recovery, routing, and
//! teardown all happen in one place with no cross-task state. The rules:
//!
//! - start on the primary when the environment supports duplex at all
//! - after `failure_threshold` consecutive primary failures inside the
//!   reset window, bring up the fallback and make it active
//! - the primary keeps retrying in the background; the moment it connects,
//!   it becomes active again and the fallback is stopped
//! - token rotation nudges every running transport to reconnect
//! - logout tears everything down and is total: no connection, timer, or
//!   task survives it

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use taskbay_session::{SessionEvent, TokenSupplier};

use crate::config::SyncConfig;
use crate::registry::{RoomOp, RoomSubscriptionRegistry};
use crate::router::EventRouter;
use crate::stats::SyncStats;
use crate::transport::{
    FallbackTransport, PrimaryTransport, TransportKind, TransportSignal, TransportStatus,
    TransportUpdate,
};

const UPDATE_CHANNEL_CAPACITY: usize = 256;
const CLIENT_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No session token yet; nothing runs.
    Inactive,
    /// Duplex socket is the event source.
    PrimaryActive,
    /// Server-push stream is the event source.
    FallbackActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCapability {
    Duplex,
    PushOnly,
}

impl TransportCapability {
    /// Native builds always support the duplex socket; the config override
    /// models restricted networks whose proxies strip websocket upgrades.
    pub fn probe(config: &SyncConfig) -> Self {
        if config.transport.force_fallback {
            Self::PushOnly
        } else {
            Self::Duplex
        }
    }
}

/// Events surfaced to the embedding app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// The refresh token was rejected: the session cannot continue. What
    /// sign-out looks like is the app's decision, not ours.
    AuthExpired,
}

/// Counts consecutive primary failures inside a sliding reset window.
#[derive(Debug)]
struct FailureTracker {
    window: Duration,
    count: u32,
    last_failure: Option<Instant>,
}

impl FailureTracker {
    fn new(window: Duration) -> Self {
        Self {
            window,
            count: 0,
            last_failure: None,
        }
    }

    /// Record a failure at `now`; returns the consecutive count. A gap
    /// longer than the window restarts the count at one.
    fn record(&mut self, now: Instant) -> u32 {
        if let Some(last) = self.last_failure {
            if now.duration_since(last) > self.window {
                self.count = 0;
            }
        }
        self.count += 1;
        self.last_failure = Some(now);
        self.count
    }

    fn reset(&mut self) {
        self.count = 0;
        self.last_failure = None;
    }
}

enum ManagerCommand {
    Logout { ack: oneshot::Sender<()> },
}

/// Handle to the manager task.
pub struct TransportManager {
    cmd_tx: mpsc::Sender<ManagerCommand>,
    state_rx: watch::Receiver<ManagerState>,
    events_tx: broadcast::Sender<ClientEvent>,
    primary_status_rx: watch::Receiver<TransportStatus>,
    fallback_status_rx: watch::Receiver<TransportStatus>,
    task: Option<JoinHandle<()>>,
}

impl TransportManager {
    pub fn start(
        config: SyncConfig,
        supplier: Arc<TokenSupplier>,
        registry: Arc<RoomSubscriptionRegistry>,
        ops_rx: mpsc::Receiver<RoomOp>,
        router: EventRouter,
        stats: Arc<SyncStats>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(ManagerState::Inactive);
        let (events_tx, _) = broadcast::channel(CLIENT_EVENT_CAPACITY);
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (primary_status_tx, primary_status_rx) = watch::channel(TransportStatus::Closed);
        let (fallback_status_tx, fallback_status_rx) = watch::channel(TransportStatus::Closed);
        let session_rx = supplier.subscribe();

        let manager_loop = ManagerLoop {
            capability: TransportCapability::probe(&config),
            tracker: FailureTracker::new(config.transport.failure_window),
            config,
            supplier,
            registry,
            router,
            stats,
            state_tx,
            events_tx: events_tx.clone(),
            updates_tx,
            primary_status: Arc::new(primary_status_tx),
            fallback_status: Arc::new(fallback_status_tx),
            primary: None,
            fallback: None,
            ops_rx: Some(ops_rx),
        };
        let task = tokio::spawn(manager_loop.run(updates_rx, session_rx, cmd_rx));

        Self {
            cmd_tx,
            state_rx,
            events_tx,
            primary_status_rx,
            fallback_status_rx,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.state_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    pub fn primary_status(&self) -> TransportStatus {
        *self.primary_status_rx.borrow()
    }

    pub fn fallback_status(&self) -> TransportStatus {
        *self.fallback_status_rx.borrow()
    }

    /// Tear down both transports and wait until every connection and retry
    /// timer is gone. Idempotent; later calls return immediately.
    pub async fn logout(&mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ManagerCommand::Logout { ack: ack_tx })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

struct ManagerLoop {
    config: SyncConfig,
    capability: TransportCapability,
    supplier: Arc<TokenSupplier>,
    registry: Arc<RoomSubscriptionRegistry>,
    router: EventRouter,
    stats: Arc<SyncStats>,
    state_tx: watch::Sender<ManagerState>,
    events_tx: broadcast::Sender<ClientEvent>,
    updates_tx: mpsc::Sender<TransportUpdate>,
    primary_status: Arc<watch::Sender<TransportStatus>>,
    fallback_status: Arc<watch::Sender<TransportStatus>>,
    tracker: FailureTracker,
    primary: Option<PrimaryTransport>,
    fallback: Option<FallbackTransport>,
    /// Consumed when the primary starts; the registry feeds it directly.
    ops_rx: Option<mpsc::Receiver<RoomOp>>,
}

impl ManagerLoop {
    async fn run(
        mut self,
        mut updates_rx: mpsc::Receiver<TransportUpdate>,
        mut session_rx: broadcast::Receiver<SessionEvent>,
        mut cmd_rx: mpsc::Receiver<ManagerCommand>,
    ) {
        if self.supplier.is_authenticated().await {
            self.activate();
        } else {
            info!("no session; transports idle until sign-in");
        }

        loop {
            tokio::select! {
                Some(update) = updates_rx.recv() => self.handle_update(update),
                event = session_rx.recv() => match event {
                    Ok(event) => self.handle_session_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "lagged behind session events");
                    }
                    // Sender lives in self.supplier, so Closed cannot occur.
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                cmd = cmd_rx.recv() => {
                    // None means the handle was dropped; same teardown.
                    self.teardown().await;
                    if let Some(ManagerCommand::Logout { ack }) = cmd {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }
    }

    fn handle_update(&mut self, update: TransportUpdate) {
        match update {
            TransportUpdate::Event { kind, event } => {
                trace!(?kind, "routing event");
                self.router.receive(event);
            }
            TransportUpdate::Signal {
                kind: TransportKind::Primary,
                signal,
            } => self.handle_primary_signal(signal),
            TransportUpdate::Signal {
                kind: TransportKind::Fallback,
                signal,
            } => self.handle_fallback_signal(signal),
        }
    }

    fn handle_primary_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Connected => {
                self.stats.record_primary_connect();
                self.tracker.reset();
                if self.state() == ManagerState::FallbackActive {
                    info!("primary transport recovered; leaving fallback mode");
                    if let Some(fallback) = self.fallback.take() {
                        fallback.stop();
                    }
                    self.set_state(ManagerState::PrimaryActive);
                }
            }
            TransportSignal::ConnectFailed | TransportSignal::Disconnected => {
                self.stats.record_primary_failure();
                let failures = self.tracker.record(Instant::now());
                debug!(failures, "primary transport failure");
                if failures >= self.config.transport.failure_threshold
                    && self.state() == ManagerState::PrimaryActive
                {
                    warn!(failures, "primary failure threshold reached; failing over");
                    self.stats.record_failover();
                    self.start_fallback();
                    self.set_state(ManagerState::FallbackActive);
                }
            }
        }
    }

    fn handle_fallback_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Connected => self.stats.record_fallback_connect(),
            TransportSignal::ConnectFailed | TransportSignal::Disconnected => {
                // Its supervisor retries on its own; nothing to arbitrate.
                debug!("fallback transport failure");
            }
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Rotated => {
                if self.state() == ManagerState::Inactive {
                    info!("session established; starting transports");
                    self.activate();
                } else {
                    info!("session tokens rotated; transports reconnecting");
                    if let Some(primary) = &self.primary {
                        primary.reconnect();
                    }
                    if let Some(fallback) = &self.fallback {
                        fallback.reconnect();
                    }
                }
            }
            SessionEvent::RefreshFailed { fatal: true } => {
                warn!("session expired; surfacing to the app");
                let _ = self.events_tx.send(ClientEvent::AuthExpired);
            }
            SessionEvent::RefreshFailed { fatal: false } => {
                debug!("transient refresh failure");
            }
        }
    }

    fn activate(&mut self) {
        match self.capability {
            TransportCapability::Duplex => {
                self.start_primary();
                self.set_state(ManagerState::PrimaryActive);
            }
            TransportCapability::PushOnly => {
                info!("duplex transport unsupported here; running fallback only");
                self.start_fallback();
                self.set_state(ManagerState::FallbackActive);
            }
        }
    }

    fn start_primary(&mut self) {
        if self.primary.is_some() {
            return;
        }
        let Some(ops_rx) = self.ops_rx.take() else {
            return;
        };
        self.primary = Some(PrimaryTransport::start(
            self.config.endpoints.ws_url(),
            self.config.transport.primary_retry,
            self.supplier.clone(),
            self.registry.clone(),
            ops_rx,
            self.updates_tx.clone(),
            self.primary_status.clone(),
        ));
    }

    fn start_fallback(&mut self) {
        if self.fallback.is_some() {
            return;
        }
        self.fallback = Some(FallbackTransport::start(
            self.config.endpoints.stream_url(),
            self.config.transport.fallback_retry,
            self.supplier.clone(),
            self.updates_tx.clone(),
            self.fallback_status.clone(),
        ));
    }

    /// Total: waits for both supervisors to finish, so no connection or
    /// retry timer survives.
    async fn teardown(&mut self) {
        if let Some(primary) = self.primary.take() {
            primary.shutdown().await;
        }
        if let Some(fallback) = self.fallback.take() {
            fallback.shutdown().await;
        }
        self.primary_status.send_replace(TransportStatus::Closed);
        self.fallback_status.send_replace(TransportStatus::Closed);
        self.set_state(ManagerState::Inactive);
        info!("transport manager shut down");
    }

    fn state(&self) -> ManagerState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ManagerState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(?state, "transport state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── FailureTracker ──────────────────────────────────────────────────

    #[test]
    fn consecutive_failures_accumulate() {
        let mut tracker = FailureTracker::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert_eq!(tracker.record(t0), 1);
        assert_eq!(tracker.record(t0 + Duration::from_secs(2)), 2);
        assert_eq!(tracker.record(t0 + Duration::from_secs(4)), 3);
    }

    #[test]
    fn gap_beyond_window_restarts_the_count() {
        let mut tracker = FailureTracker::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert_eq!(tracker.record(t0), 1);
        assert_eq!(tracker.record(t0 + Duration::from_secs(2)), 2);
        // quiet for longer than the window
        assert_eq!(tracker.record(t0 + Duration::from_secs(40)), 1);
    }

    #[test]
    fn gap_exactly_at_window_still_counts() {
        let mut tracker = FailureTracker::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert_eq!(tracker.record(t0), 1);
        assert_eq!(tracker.record(t0 + Duration::from_secs(30)), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut tracker = FailureTracker::new(Duration::from_secs(30));
        let t0 = Instant::now();

        tracker.record(t0);
        tracker.record(t0 + Duration::from_secs(1));
        tracker.reset();
        assert_eq!(tracker.record(t0 + Duration::from_secs(2)), 1);
    }

    // ── TransportCapability ─────────────────────────────────────────────

    #[test]
    fn probe_follows_the_override() {
        let mut config = SyncConfig::default();
        assert_eq!(TransportCapability::probe(&config), TransportCapability::Duplex);

        config.transport.force_fallback = true;
        assert_eq!(
            TransportCapability::probe(&config),
            TransportCapability::PushOnly
        );
    }
}
