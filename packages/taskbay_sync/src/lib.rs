//! Realtime event delivery for the Taskbay client.
//!
//! Events reach the app over a duplex websocket when the network allows it
//! and over a server-push stream when it does not. The pipeline: transports
//! produce events, the manager arbitrates which transport is live, the
//! router dedupes and dispatches into app-provided stores. Subscriptions
//! are declarative; the desired set is replayed on every reconnect.

pub mod client;
pub mod config;
pub mod envelope;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod stats;
pub mod stores;
pub mod transport;

pub use client::SyncClient;
pub use config::{FileConfig, SyncConfig, load_config};
pub use manager::{ClientEvent, ManagerState, TransportCapability, TransportManager};
pub use protocol::{ClientOp, ServerEvent};
pub use registry::RoomSubscriptionRegistry;
pub use router::EventRouter;
pub use stats::{StatsSnapshot, SyncStats};
pub use stores::{
    AlertKind, AlertSink, MemoryStores, MessageStore, NotificationStore, NullAlertSink,
};
pub use transport::{TransportKind, TransportSignal, TransportStatus};
