//! Client transports for the realtime channel.
//!
//! Two ways events reach us: the primary duplex websocket (`primary`) and
//! the server-push SSE stream (`fallback`). Both run as supervised tasks
//! that own their reconnect loop and report health signals and parsed
//! events into one channel the transport manager consumes.

pub mod fallback;
pub mod primary;
pub(crate) mod sse;

pub use fallback::FallbackTransport;
pub use primary::PrimaryTransport;

use crate::protocol::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Primary,
    Fallback,
}

/// Lifecycle of one transport, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Connecting,
    Open,
    Error,
    Closed,
}

/// Health transitions the manager arbitrates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    /// Handshake complete; for the primary this includes the auth frame and
    /// the join replay.
    Connected,
    /// A connect attempt failed before reaching `Open`.
    ConnectFailed,
    /// An open connection dropped.
    Disconnected,
}

/// Everything a transport tells the manager, merged into one stream so the
/// manager loop stays single-consumer.
#[derive(Debug)]
pub enum TransportUpdate {
    Signal {
        kind: TransportKind,
        signal: TransportSignal,
    },
    Event {
        kind: TransportKind,
        event: ServerEvent,
    },
}
