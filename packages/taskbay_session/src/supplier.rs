//! Token supplier: the single authority for session credentials.
//!
//! Transports never read tokens from anywhere else. The supplier hands out
//! the current access token, refreshes it proactively when a caller asks
//! within the refresh margin, collapses concurrent refreshes into one
//! in-flight request, and broadcasts rotation so transports can reconnect
//! with the new credential.

use crate::api::AuthApi;
use crate::error::SessionError;
use crate::storage::TokenStorage;
use crate::token::{AccessToken, TokenPair};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Session lifecycle notifications, delivered over a broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new pair is installed (sign-in or refresh). Connected transports
    /// should reconnect so the server sees the new credential.
    Rotated,
    /// A refresh attempt failed. `fatal` means the server rejected the
    /// refresh token outright and the session cannot recover on its own.
    RefreshFailed { fatal: bool },
}

pub struct TokenSupplier {
    pair: Mutex<Option<TokenPair>>,
    /// Held for the duration of one network refresh; queues later callers.
    refresh_flight: Mutex<()>,
    api: AuthApi,
    storage: Option<TokenStorage>,
    margin: Duration,
    degraded: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl TokenSupplier {
    /// Restores a persisted session from `storage` when one exists.
    pub fn new(api: AuthApi, storage: Option<TokenStorage>, margin: Duration) -> Self {
        let restored = storage.as_ref().and_then(|s| s.load());
        if restored.is_some() {
            info!("restored session tokens from disk");
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pair: Mutex::new(restored),
            refresh_flight: Mutex::new(()),
            api,
            storage,
            margin,
            degraded: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.pair.lock().await.is_some()
    }

    /// True after a refresh failure, until a refresh or install succeeds.
    /// Degraded sessions keep serving the previous token.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Install a pair obtained outside the refresh path (sign-in, OAuth
    /// link). Notifies subscribers exactly like a rotation.
    pub async fn install(&self, pair: TokenPair) {
        *self.pair.lock().await = Some(pair.clone());
        self.degraded.store(false, Ordering::Relaxed);
        self.persist(&pair);
        info!("session tokens installed");
        let _ = self.events.send(SessionEvent::Rotated);
    }

    /// Drop the session entirely. Does not notify subscribers; logout
    /// teardown is driven synchronously by the caller.
    pub async fn clear(&self) {
        *self.pair.lock().await = None;
        self.degraded.store(false, Ordering::Relaxed);
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.clear() {
                warn!(error = %e, "failed to remove persisted session");
            }
        }
        info!("session tokens cleared");
    }

    /// Current access token, refreshed first when it expires within the
    /// margin. On refresh failure the previous token is returned anyway;
    /// the server-side rejection that follows is handled like any other
    /// connect failure. Returns `None` only when signed out.
    pub async fn get_valid_token(&self) -> Option<AccessToken> {
        let access = self.pair.lock().await.as_ref().map(TokenPair::access)?;
        if !access.expires_within(self.margin) {
            return Some(access);
        }
        debug!("access token inside refresh margin");
        if let Err(e) = self.refresh_now().await {
            debug!(error = %e, "refresh failed, serving previous token");
        }
        self.pair.lock().await.as_ref().map(TokenPair::access)
    }

    /// Refresh the pair via the auth API. Concurrent callers collapse onto
    /// one network request: whoever holds the flight lock refreshes, the
    /// rest find a fresh token on re-check and return immediately.
    pub async fn refresh_now(&self) -> Result<(), SessionError> {
        let _flight = self.refresh_flight.lock().await;

        let refresh_token = {
            let pair = self.pair.lock().await;
            let Some(pair) = pair.as_ref() else {
                return Err(SessionError::NotAuthenticated);
            };
            if !pair.access().expires_within(self.margin) {
                // Another flight landed while we waited for the lock.
                return Ok(());
            }
            pair.refresh_token.clone()
        };

        match self.api.refresh(&refresh_token).await {
            Ok(pair) => {
                *self.pair.lock().await = Some(pair.clone());
                self.degraded.store(false, Ordering::Relaxed);
                self.persist(&pair);
                info!("session tokens rotated");
                let _ = self.events.send(SessionEvent::Rotated);
                Ok(())
            }
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                warn!(error = %e, fatal = e.is_fatal(), "token refresh failed");
                let _ = self.events.send(SessionEvent::RefreshFailed {
                    fatal: e.is_fatal(),
                });
                Err(e)
            }
        }
    }

    fn persist(&self, pair: &TokenPair) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save(pair) {
                warn!(error = %e, "failed to persist session tokens");
            }
        }
    }
}

impl std::fmt::Debug for TokenSupplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSupplier")
            .field("margin", &self.margin)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplier() -> TokenSupplier {
        TokenSupplier::new(
            AuthApi::new("http://127.0.0.1:9"),
            None,
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn starts_signed_out() {
        let s = supplier();
        assert!(!s.is_authenticated().await);
        assert!(s.get_valid_token().await.is_none());
        assert!(!s.is_degraded());
    }

    #[tokio::test]
    async fn install_makes_token_available_and_notifies() {
        let s = supplier();
        let mut events = s.subscribe();
        s.install(TokenPair {
            access_token: "opaque-token".to_string(),
            refresh_token: "refresh".to_string(),
        })
        .await;

        assert!(s.is_authenticated().await);
        let token = s.get_valid_token().await.unwrap();
        assert_eq!(token.as_str(), "opaque-token");
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Rotated);
    }

    #[tokio::test]
    async fn refresh_without_session_is_not_authenticated() {
        let s = supplier();
        assert!(matches!(
            s.refresh_now().await,
            Err(SessionError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn clear_drops_the_session() {
        let s = supplier();
        s.install(TokenPair {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
        })
        .await;
        s.clear().await;
        assert!(!s.is_authenticated().await);
        assert!(s.get_valid_token().await.is_none());
    }
}
