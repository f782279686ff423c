//! Delivery counters for the sync pipeline.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for event delivery and transport health. Shared between the
/// manager loop, the router, and the embedding app via `Arc`.
#[derive(Debug, Default)]
pub struct SyncStats {
    /// Events dispatched to a store
    pub events_delivered: AtomicU64,
    /// Events absorbed by the dedupe cache
    pub duplicates_absorbed: AtomicU64,
    /// Events dropped because no dedupe id could be derived
    pub malformed_dropped: AtomicU64,
    /// Successful primary connects (incl. reconnects)
    pub primary_connects: AtomicU64,
    /// Primary connect failures and disconnects
    pub primary_failures: AtomicU64,
    /// Transitions from primary to fallback
    pub failovers: AtomicU64,
    /// Successful fallback connects
    pub fallback_connects: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_absorbed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_primary_connect(&self) {
        self.primary_connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_primary_failure(&self) {
        self.primary_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_connect(&self) {
        self.fallback_connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            duplicates_absorbed: self.duplicates_absorbed.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            primary_connects: self.primary_connects.load(Ordering::Relaxed),
            primary_failures: self.primary_failures.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            fallback_connects: self.fallback_connects.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sync stats (for serialization/logging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_delivered: u64,
    pub duplicates_absorbed: u64,
    pub malformed_dropped: u64,
    pub primary_connects: u64,
    pub primary_failures: u64,
    pub failovers: u64,
    pub fallback_connects: u64,
}
