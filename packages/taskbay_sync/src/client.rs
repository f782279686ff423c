//! Client facade: one object owning the whole delivery pipeline.
//!
//! Wiring only. The interesting decisions live in the manager; the facade
//! builds the registry, router, and manager, then delegates.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use taskbay_session::TokenSupplier;

use crate::config::SyncConfig;
use crate::manager::{ClientEvent, ManagerState, TransportManager};
use crate::registry::RoomSubscriptionRegistry;
use crate::router::EventRouter;
use crate::stats::{StatsSnapshot, SyncStats};
use crate::stores::{AlertSink, MessageStore, NotificationStore};
use crate::transport::TransportStatus;

pub struct SyncClient {
    supplier: Arc<TokenSupplier>,
    registry: Arc<RoomSubscriptionRegistry>,
    manager: TransportManager,
    stats: Arc<SyncStats>,
}

impl SyncClient {
    /// Bring up the pipeline. Transports start as soon as the supplier has a
    /// session, now or later; until then everything idles.
    pub fn start(
        config: SyncConfig,
        supplier: Arc<TokenSupplier>,
        messages: Arc<dyn MessageStore>,
        notifications: Arc<dyn NotificationStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let stats = Arc::new(SyncStats::default());
        let (registry, ops_rx) = RoomSubscriptionRegistry::new();
        let registry = Arc::new(registry);
        let router = EventRouter::new(
            &config.router,
            messages,
            notifications,
            alerts,
            stats.clone(),
        );
        let manager = TransportManager::start(
            config,
            supplier.clone(),
            registry.clone(),
            ops_rx,
            router,
            stats.clone(),
        );

        Self {
            supplier,
            registry,
            manager,
            stats,
        }
    }

    /// Declare interest in a thread. The subscription sticks across
    /// reconnects until `leave_thread`.
    pub async fn join_thread(&self, thread_id: &str) {
        self.registry.join(thread_id).await;
    }

    pub async fn leave_thread(&self, thread_id: &str) {
        self.registry.leave(thread_id).await;
    }

    pub async fn joined_threads(&self) -> Vec<String> {
        self.registry.desired_set().await
    }

    pub fn state(&self) -> ManagerState {
        self.manager.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.manager.subscribe_state()
    }

    /// App-facing events, currently just session expiry.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.manager.subscribe_events()
    }

    pub fn primary_status(&self) -> TransportStatus {
        self.manager.primary_status()
    }

    pub fn fallback_status(&self) -> TransportStatus {
        self.manager.fallback_status()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Sign out completely: transports torn down and awaited, then the
    /// stored session cleared. When this returns nothing is connected,
    /// retrying, or holding tokens.
    pub async fn logout(&mut self) {
        self.manager.logout().await;
        self.supplier.clear().await;
    }
}
