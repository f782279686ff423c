//! Fallback transport: the server-push notification stream.
//!
//! One long-lived `GET /notifications/stream` per session, token in the
//! query string because EventSource-style endpoints take no headers. The
//! server names every frame: `notification` carries an event JSON identical
//! to the duplex wire format, `heartbeat` only proves liveness and is
//! discarded here. Receive-only; thread subscriptions do not exist on this
//! path, the server streams everything for the authenticated identity.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use taskbay_session::TokenSupplier;

use super::sse::{SseEvent, SseParser};
use super::{TransportKind, TransportSignal, TransportStatus, TransportUpdate};
use crate::protocol::ServerEvent;

/// Handle to the supervisor task.
pub struct FallbackTransport {
    cancel: CancellationToken,
    reconnect_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl FallbackTransport {
    pub fn start(
        stream_url: String,
        retry: Duration,
        supplier: Arc<TokenSupplier>,
        updates: mpsc::Sender<TransportUpdate>,
        status: Arc<watch::Sender<TransportStatus>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let runner = Runner {
            stream_url,
            retry,
            http: reqwest::Client::new(),
            supplier,
            updates,
            status,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(runner.run(reconnect_rx));
        Self {
            cancel,
            reconnect_tx,
            task,
        }
    }

    /// Drop the current stream (or cut a retry wait short) and reconnect
    /// immediately with freshly supplied credentials.
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

enum StreamExit {
    Cancelled,
    Reconnect,
    Dropped,
}

struct Runner {
    stream_url: String,
    retry: Duration,
    http: reqwest::Client,
    supplier: Arc<TokenSupplier>,
    updates: mpsc::Sender<TransportUpdate>,
    status: Arc<watch::Sender<TransportStatus>>,
    cancel: CancellationToken,
}

impl Runner {
    async fn run(self, mut reconnect_rx: mpsc::Receiver<()>) {
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
                Ok(response) => {
                    let conn_id = Uuid::new_v4();
                    info!(conn = %conn_id, "fallback stream connected");
                    self.status.send_replace(TransportStatus::Open);
                    self.signal(TransportSignal::Connected).await;

                    match self.pump(response, &mut reconnect_rx).await {
                        StreamExit::Cancelled => break,
                        StreamExit::Reconnect => {
                            info!(conn = %conn_id, "fallback stream reconnecting with fresh credentials");
                            continue;
                        }
                        StreamExit::Dropped => {
                            warn!(conn = %conn_id, "fallback stream lost");
                            self.status.send_replace(TransportStatus::Error);
                            self.signal(TransportSignal::Disconnected).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "fallback stream connect failed");
                    self.status.send_replace(TransportStatus::Error);
                    self.signal(TransportSignal::ConnectFailed).await;
                }
            }

            if !self.retry_pause(&mut reconnect_rx).await {
                break;
            }
        }
        self.status.send_replace(TransportStatus::Closed);
        debug!("fallback transport stopped");
    }

    async fn connect_once(&self) -> Result<reqwest::Response> {
        let token = self
            .supplier
            .get_valid_token()
            .await
            .context("no session token")?;

        let response = self
            .http
            .get(&self.stream_url)
            .query(&[("token", token.as_str())])
            .send()
            .await
            .context("stream request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("stream rejected (http {status})");
        }
        Ok(response)
    }

    async fn pump(
        &self,
        response: reqwest::Response,
        reconnect_rx: &mut mpsc::Receiver<()>,
    ) -> StreamExit {
        let mut body = response.bytes_stream();
        let mut parser = SseParser::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return StreamExit::Cancelled,
                Some(_) = reconnect_rx.recv() => return StreamExit::Reconnect,
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for event in parser.feed(&bytes) {
                            self.handle_event(event).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "fallback stream read error");
                        return StreamExit::Dropped;
                    }
                    None => return StreamExit::Dropped,
                },
            }
        }
    }

    async fn handle_event(&self, event: SseEvent) {
        match event.name.as_deref() {
            Some("heartbeat") => trace!("fallback heartbeat"),
            Some("notification") => match serde_json::from_str::<ServerEvent>(&event.data) {
                Ok(event) => {
                    self.forward(TransportUpdate::Event {
                        kind: TransportKind::Fallback,
                        event,
                    })
                    .await;
                }
                Err(e) => debug!(error = %e, "ignoring unparseable stream event"),
            },
            other => debug!(name = ?other, "ignoring unknown stream event"),
        }
    }

    /// Wait out the retry delay. Returns false when cancelled; a reconnect
    /// nudge cuts the wait short.
    async fn retry_pause(&self, reconnect_rx: &mut mpsc::Receiver<()>) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.retry) => true,
            Some(_) = reconnect_rx.recv() => true,
        }
    }

    async fn signal(&self, signal: TransportSignal) {
        self.forward(TransportUpdate::Signal {
            kind: TransportKind::Fallback,
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
