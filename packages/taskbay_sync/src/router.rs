//! Event router: dedupe then dispatch.
//!
//! Every routable event passes through here exactly once per dedupe id,
//! no matter which transport delivered it or how many times. Events the
//! envelope derivation rejects are dropped and logged, never delivered
//! in partial form.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::RouterConfig;
use crate::envelope::{EnvelopeBody, EventEnvelope};
use crate::protocol::ServerEvent;
use crate::stats::SyncStats;
use crate::stores::{AlertKind, AlertSink, MessageStore, NotificationStore};

/// Sliding window of recently seen dedupe ids, bounded by entry count and
/// age. Oldest entries fall out first; an id that ages out would be treated
/// as new again, which is why the window comfortably exceeds any plausible
/// transport-overlap interval.
struct DedupeCache {
    seen: HashSet<String>,
    order: VecDeque<(String, Instant)>,
    max_entries: usize,
    max_age: Duration,
}

impl DedupeCache {
    fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            max_entries,
            max_age,
        }
    }

    /// Record `id`; returns false when it was already in the window.
    fn insert(&mut self, id: &str) -> bool {
        self.evict_expired();
        if self.seen.contains(id) {
            return false;
        }
        while self.order.len() >= self.max_entries {
            if let Some((evicted, _)) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(id.to_string());
        self.order.push_back((id.to_string(), Instant::now()));
        true
    }

    fn evict_expired(&mut self) {
        // Compare ages rather than subtracting from `now`: the configured
        // window may exceed the host's uptime, which would underflow Instant.
        let now = Instant::now();
        while let Some((_, timestamp)) = self.order.front() {
            if now.duration_since(*timestamp) > self.max_age {
                if let Some((evicted, _)) = self.order.pop_front() {
                    self.seen.remove(&evicted);
                }
            } else {
                break;
            }
        }
    }

    #[allow(dead_code)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct EventRouter {
    cache: DedupeCache,
    messages: Arc<dyn MessageStore>,
    notifications: Arc<dyn NotificationStore>,
    alerts: Arc<dyn AlertSink>,
    stats: Arc<SyncStats>,
}

impl EventRouter {
    pub fn new(
        config: &RouterConfig,
        messages: Arc<dyn MessageStore>,
        notifications: Arc<dyn NotificationStore>,
        alerts: Arc<dyn AlertSink>,
        stats: Arc<SyncStats>,
    ) -> Self {
        Self {
            cache: DedupeCache::new(config.dedupe_max_entries, config.dedupe_max_age),
            messages,
            notifications,
            alerts,
            stats,
        }
    }

    /// Route one event: derive its envelope, absorb duplicates, dispatch
    /// the rest. Malformed events are dropped here and never reach a store.
    pub fn receive(&mut self, event: ServerEvent) {
        if let ServerEvent::Status { status } = &event {
            debug!(status = %status, "server status advisory");
            return;
        }

        let envelope = match EventEnvelope::from_event(event) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.record_malformed();
                warn!(error = %e, "dropping malformed event");
                return;
            }
        };

        if !self.cache.insert(&envelope.dedupe_id) {
            self.stats.record_duplicate();
            debug!(dedupe_id = %envelope.dedupe_id, "absorbing duplicate event");
            return;
        }

        self.deliver(envelope);
    }

    fn deliver(&self, envelope: EventEnvelope) {
        self.stats.record_delivered();
        match envelope.body {
            EnvelopeBody::MessageNew { thread_id, message } => {
                self.messages.append(&thread_id, &message);
                self.alerts.notify(AlertKind::Message);
            }
            EnvelopeBody::MessageRead { thread_id, user_id } => {
                // Read receipts are silent; no alert.
                self.messages.mark_read(&thread_id, &user_id);
            }
            EnvelopeBody::Notification { event, data } => {
                self.notifications.append(&event, &data);
                self.alerts.notify(AlertKind::Notification);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStores;
    use serde_json::json;

    fn router_with_stores() -> (EventRouter, Arc<MemoryStores>, Arc<SyncStats>) {
        let stores = Arc::new(MemoryStores::new());
        let stats = Arc::new(SyncStats::new());
        let router = EventRouter::new(
            &RouterConfig {
                dedupe_max_entries: 500,
                dedupe_max_age: Duration::from_secs(300),
            },
            stores.clone(),
            stores.clone(),
            stores.clone(),
            stats.clone(),
        );
        (router, stores, stats)
    }

    fn message_event(thread: &str, id: &str) -> ServerEvent {
        ServerEvent::MessageNew {
            thread_id: thread.to_string(),
            message: json!({"id": id, "body": "hi"}),
        }
    }

    #[test]
    fn delivers_each_event_once() {
        let (mut router, stores, stats) = router_with_stores();

        router.receive(message_event("thread-1", "m-1"));
        router.receive(message_event("thread-1", "m-1"));
        router.receive(message_event("thread-1", "m-1"));

        assert_eq!(stores.messages_in("thread-1").len(), 1);
        assert_eq!(stats.snapshot().events_delivered, 1);
        assert_eq!(stats.snapshot().duplicates_absorbed, 2);
        assert_eq!(stores.alerts(), vec![AlertKind::Message]);
    }

    #[test]
    fn same_message_id_in_different_threads_is_distinct() {
        let (mut router, stores, _) = router_with_stores();

        router.receive(message_event("thread-1", "m-1"));
        router.receive(message_event("thread-2", "m-1"));

        assert_eq!(stores.messages_in("thread-1").len(), 1);
        assert_eq!(stores.messages_in("thread-2").len(), 1);
    }

    #[test]
    fn malformed_events_are_dropped() {
        let (mut router, stores, stats) = router_with_stores();

        router.receive(ServerEvent::MessageNew {
            thread_id: "thread-1".to_string(),
            message: json!({"body": "no id"}),
        });
        router.receive(ServerEvent::Notification {
            event: "order:created".to_string(),
            data: json!({}),
        });

        assert!(stores.messages_in("thread-1").is_empty());
        assert!(stores.notifications().is_empty());
        assert_eq!(stats.snapshot().malformed_dropped, 2);
        assert_eq!(stats.snapshot().events_delivered, 0);
    }

    #[test]
    fn status_events_route_nowhere() {
        let (mut router, stores, stats) = router_with_stores();

        router.receive(ServerEvent::Status {
            status: "degraded".to_string(),
        });

        assert!(stores.notifications().is_empty());
        assert_eq!(stats.snapshot().events_delivered, 0);
        assert_eq!(stats.snapshot().malformed_dropped, 0);
    }

    #[test]
    fn notifications_and_reads_dispatch_to_their_stores() {
        let (mut router, stores, _) = router_with_stores();

        router.receive(ServerEvent::Notification {
            event: "order:created".to_string(),
            data: json!({"id": "n-1", "orderId": "o-9"}),
        });
        router.receive(ServerEvent::MessageRead {
            thread_id: "thread-1".to_string(),
            user_id: "user-2".to_string(),
        });

        assert_eq!(stores.notifications()[0].0, "order:created");
        assert_eq!(
            stores.reads(),
            vec![("thread-1".to_string(), "user-2".to_string())]
        );
        // notification alerts, read receipt stays silent
        assert_eq!(stores.alerts(), vec![AlertKind::Notification]);
    }

    // ── DedupeCache ─────────────────────────────────────────────────────

    #[test]
    fn cache_capacity_eviction_forgets_oldest() {
        let mut cache = DedupeCache::new(3, Duration::from_secs(300));

        assert!(cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(cache.insert("c"));
        assert!(cache.insert("d")); // evicts "a"

        assert_eq!(cache.len(), 3);
        assert!(cache.insert("a"), "evicted id reads as new again");
        assert!(!cache.insert("c"));
    }

    #[test]
    fn cache_age_eviction() {
        let mut cache = DedupeCache::new(500, Duration::from_millis(10));

        assert!(cache.insert("a"));
        assert!(!cache.insert("a"));
        std::thread::sleep(Duration::from_millis(20));
        // past max_age the id has aged out and reads as new
        assert!(cache.insert("a"));
    }

    #[test]
    fn cache_rejects_within_window() {
        let mut cache = DedupeCache::new(500, Duration::from_secs(300));

        assert!(cache.insert("msg:t-1:m-1"));
        assert!(!cache.insert("msg:t-1:m-1"));
        assert!(cache.insert("msg:t-1:m-2"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn age_window_longer_than_host_uptime_is_harmless() {
        // A window wider than the monotonic clock's history must not
        // underflow during eviction.
        let mut cache = DedupeCache::new(500, Duration::from_secs(u64::MAX));

        assert!(cache.insert("msg:t-1:m-1"));
        assert!(!cache.insert("msg:t-1:m-1"));
        assert_eq!(cache.len(), 1);
    }
}
