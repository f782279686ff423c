//! Primary duplex transport: a supervised websocket connection.
//!
//! The supervisor owns the whole connection lifecycle: it pulls a valid
//! token from the supplier, dials, authenticates with the first frame,
//! replays the desired thread subscriptions, then pumps frames until the
//! connection drops. Reconnects on a fixed delay, forever, until cancelled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskbay_session::TokenSupplier;

use super::{TransportKind, TransportSignal, TransportStatus, TransportUpdate};
use crate::protocol::{ClientOp, ServerEvent};
use crate::registry::{RoomOp, RoomSubscriptionRegistry};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Handle to the supervisor task.
pub struct PrimaryTransport {
    cancel: CancellationToken,
    reconnect_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl PrimaryTransport {
    pub fn start(
        ws_url: String,
        retry: Duration,
        supplier: Arc<TokenSupplier>,
        registry: Arc<RoomSubscriptionRegistry>,
        ops: mpsc::Receiver<RoomOp>,
        updates: mpsc::Sender<TransportUpdate>,
        status: Arc<watch::Sender<TransportStatus>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let runner = Runner {
            ws_url,
            retry,
            supplier,
            registry,
            updates,
            status,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(runner.run(ops, reconnect_rx));
        Self {
            cancel,
            reconnect_tx,
            task,
        }
    }

    /// Drop the current connection (or cut a retry wait short) and dial
    /// again immediately with freshly supplied credentials.
    pub fn reconnect(&self) {
        let _ = self.reconnect_tx.try_send(());
    }

    /// Cancel and detach; the supervisor winds down on its own.
    pub fn stop(self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the supervisor to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

enum SessionExit {
    Cancelled,
    Reconnect,
    Dropped,
}

struct Runner {
    ws_url: String,
    retry: Duration,
    supplier: Arc<TokenSupplier>,
    registry: Arc<RoomSubscriptionRegistry>,
    updates: mpsc::Sender<TransportUpdate>,
    status: Arc<watch::Sender<TransportStatus>>,
    cancel: CancellationToken,
}

impl Runner {
    async fn run(self, mut ops: mpsc::Receiver<RoomOp>, mut reconnect_rx: mpsc::Receiver<()>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.status.send_replace(TransportStatus::Connecting);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connect_once() => result,
            };

            match connected {
                Ok((write, read)) => {
                    let conn_id = Uuid::new_v4();
                    info!(conn = %conn_id, "primary transport connected");
                    self.status.send_replace(TransportStatus::Open);
                    self.signal(TransportSignal::Connected).await;

                    match self.session(write, read, &mut ops, &mut reconnect_rx).await {
                        SessionExit::Cancelled => break,
                        SessionExit::Reconnect => {
                            info!(conn = %conn_id, "primary transport reconnecting with fresh credentials");
                            continue;
                        }
                        SessionExit::Dropped => {
                            warn!(conn = %conn_id, "primary transport connection lost");
                            self.status.send_replace(TransportStatus::Error);
                            self.signal(TransportSignal::Disconnected).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "primary transport connect failed");
                    self.status.send_replace(TransportStatus::Error);
                    self.signal(TransportSignal::ConnectFailed).await;
                }
            }

            if !self.retry_pause(&mut ops, &mut reconnect_rx).await {
                break;
            }
        }
        self.status.send_replace(TransportStatus::Closed);
        debug!("primary transport stopped");
    }

    /// Dial, authenticate, replay subscriptions. `Open` means all three
    /// succeeded; a failure anywhere counts as one connect failure.
    async fn connect_once(&self) -> Result<(WsWriter, WsReader)> {
        let token = self
            .supplier
            .get_valid_token()
            .await
            .context("no session token")?;

        let (stream, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .context("websocket connect failed")?;
        let (mut write, read) = stream.split();

        let auth = serde_json::to_string(&ClientOp::Auth {
            token: token.as_str().to_string(),
        })?;
        write
            .send(Message::Text(auth.into()))
            .await
            .context("auth frame send failed")?;

        for thread_id in self.registry.desired_set().await {
            debug!(thread_id = %thread_id, "replaying thread join");
            let join = serde_json::to_string(&ClientOp::ThreadJoin { thread_id })?;
            write
                .send(Message::Text(join.into()))
                .await
                .context("join replay send failed")?;
        }

        Ok((write, read))
    }

    async fn session(
        &self,
        mut write: WsWriter,
        mut read: WsReader,
        ops: &mut mpsc::Receiver<RoomOp>,
        reconnect_rx: &mut mpsc::Receiver<()>,
    ) -> SessionExit {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionExit::Cancelled,
                Some(_) = reconnect_rx.recv() => return SessionExit::Reconnect,
                Some(op) = ops.recv() => {
                    let frame = match op {
                        RoomOp::Join { thread_id } => ClientOp::ThreadJoin { thread_id },
                        RoomOp::Leave { thread_id } => ClientOp::ThreadLeave { thread_id },
                    };
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "failed to encode room op");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        warn!(error = %e, "primary transport write failed");
                        return SessionExit::Dropped;
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(Message::Close(_))) | None => return SessionExit::Dropped,
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(e)) => {
                        warn!(error = %e, "primary transport read error");
                        return SessionExit::Dropped;
                    }
                },
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                self.forward(TransportUpdate::Event {
                    kind: TransportKind::Primary,
                    event,
                })
                .await;
            }
            // Unknown frame types from newer servers; drop, keep the stream.
            Err(e) => debug!(error = %e, "ignoring unparseable frame"),
        }
    }

    /// Wait out the retry delay. Returns false when cancelled. Room ops that
    /// arrive while disconnected are discarded here; the replay on the next
    /// connect restores the desired set. A reconnect nudge cuts the wait
    /// short.
    async fn retry_pause(
        &self,
        ops: &mut mpsc::Receiver<RoomOp>,
        reconnect_rx: &mut mpsc::Receiver<()>,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + self.retry;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(deadline) => return true,
                Some(_) = reconnect_rx.recv() => return true,
                Some(op) = ops.recv() => {
                    debug!(?op, "dropping room op while disconnected");
                }
            }
        }
    }

    async fn signal(&self, signal: TransportSignal) {
        self.forward(TransportUpdate::Signal {
            kind: TransportKind::Primary,
            signal,
        })
        .await;
    }

    /// The manager stops draining updates once teardown starts, so a full
    /// channel must not keep the supervisor parked past cancellation.
    async fn forward(&self, update: TransportUpdate) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.updates.send(update) => {}
        }
    }
}
