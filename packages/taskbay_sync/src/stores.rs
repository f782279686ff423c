//! Collaborator traits the router dispatches into.
//!
//! The sync crate owns delivery, not state: message history, notification
//! lists, and alert side effects live in the embedding app. Implementations
//! must be cheap and non-blocking; they are called on the manager loop.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Per-thread message state.
pub trait MessageStore: Send + Sync {
    /// A new message arrived in `thread_id`.
    fn append(&self, thread_id: &str, message: &Value);
    /// `user_id` read `thread_id` up to now.
    fn mark_read(&self, thread_id: &str, user_id: &str);
}

/// Account-level notification feed.
pub trait NotificationStore: Send + Sync {
    fn append(&self, event: &str, data: &Value);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Message,
    Notification,
}

/// Audio/visual alert hook. Rate limiting and visibility rules belong to the
/// implementation, not the router.
pub trait AlertSink: Send + Sync {
    fn notify(&self, kind: AlertKind);
}

/// No-op sink for embedders without alerting.
#[derive(Debug, Default)]
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn notify(&self, _kind: AlertKind) {}
}

/// In-memory store implementing all three traits. Reference implementation
/// for embedders and the backing store for tests.
#[derive(Debug, Default)]
pub struct MemoryStores {
    messages: Mutex<HashMap<String, Vec<Value>>>,
    reads: Mutex<Vec<(String, String)>>,
    notifications: Mutex<Vec<(String, Value)>>,
    alerts: Mutex<Vec<AlertKind>>,
}

/// Poisoning is ignored: every write here is a single push, so a panicked
/// writer cannot leave a half-updated entry behind.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages_in(&self, thread_id: &str) -> Vec<Value> {
        lock(&self.messages)
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn reads(&self) -> Vec<(String, String)> {
        lock(&self.reads).clone()
    }

    pub fn notifications(&self) -> Vec<(String, Value)> {
        lock(&self.notifications).clone()
    }

    pub fn alerts(&self) -> Vec<AlertKind> {
        lock(&self.alerts).clone()
    }
}

impl MessageStore for MemoryStores {
    fn append(&self, thread_id: &str, message: &Value) {
        lock(&self.messages)
            .entry(thread_id.to_string())
            .or_default()
            .push(message.clone());
    }

    fn mark_read(&self, thread_id: &str, user_id: &str) {
        lock(&self.reads).push((thread_id.to_string(), user_id.to_string()));
    }
}

impl NotificationStore for MemoryStores {
    fn append(&self, event: &str, data: &Value) {
        lock(&self.notifications).push((event.to_string(), data.clone()));
    }
}

impl AlertSink for MemoryStores {
    fn notify(&self, kind: AlertKind) {
        lock(&self.alerts).push(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_records_per_thread() {
        let stores = MemoryStores::new();
        MessageStore::append(&stores, "thread-1", &json!({"id": "m-1"}));
        MessageStore::append(&stores, "thread-1", &json!({"id": "m-2"}));
        MessageStore::append(&stores, "thread-2", &json!({"id": "m-3"}));

        assert_eq!(stores.messages_in("thread-1").len(), 2);
        assert_eq!(stores.messages_in("thread-2").len(), 1);
        assert!(stores.messages_in("thread-3").is_empty());
    }

    #[test]
    fn memory_store_records_reads_and_alerts() {
        let stores = MemoryStores::new();
        stores.mark_read("thread-1", "user-2");
        NotificationStore::append(&stores, "order:created", &json!({"id": "n-1"}));
        stores.notify(AlertKind::Notification);

        assert_eq!(
            stores.reads(),
            vec![("thread-1".to_string(), "user-2".to_string())]
        );
        assert_eq!(stores.notifications().len(), 1);
        assert_eq!(stores.alerts(), vec![AlertKind::Notification]);
    }
}
