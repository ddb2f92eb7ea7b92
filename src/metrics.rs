// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Narrow metrics sink. The core records counts, gauges and durations
//! through this trait; wiring them into an exporter is the embedder's
//! business.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

// Metric names recorded by the core.
pub const SEQ_NEW: &str = "sequence_new";
pub const SEQ_REPLAY: &str = "sequence_replay";
pub const SEQ_MISORDERED: &str = "sequence_misordered";
pub const SEQ_BAD_SLOT: &str = "sequence_bad_slot";
pub const SEQ_BAD_SESSION: &str = "sequence_bad_session";
pub const SEQ_DELAY: &str = "sequence_delay";
pub const SEQ_RETRY_UNCACHED: &str = "sequence_retry_uncached";
pub const REPLAY_CACHE_BYTES: &str = "replay_cache_bytes";
pub const SLOTS_IN_USE: &str = "slots_in_use";
pub const SESSIONS_CREATED: &str = "sessions_created";
pub const SESSIONS_DESTROYED: &str = "sessions_destroyed";
pub const CLIENTS_EVICTED: &str = "clients_evicted";
pub const CONNS_BOUND: &str = "connections_bound";
pub const CONNS_UNBOUND: &str = "connections_unbound";
pub const CB_SENT: &str = "callbacks_sent";
pub const CB_FAILED: &str = "callbacks_failed";
pub const CB_RETRIES: &str = "callback_retries";
pub const CB_DURATION_MS: &str = "callback_duration_ms";

pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    fn incr(&self, name: &'static str, delta: u64);
    fn gauge(&self, name: &'static str, value: i64);
    fn observe_ms(&self, name: &'static str, ms: u64);
}

/// In-process implementation backed by atomic cells. Durations are kept
/// as (count, sum) so an exporter can derive an average.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    counters: DashMap<&'static str, AtomicU64>,
    gauges: DashMap<&'static str, AtomicI64>,
    durations: DashMap<&'static str, (AtomicU64, AtomicU64)>,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &'static str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn gauge_value(&self, name: &'static str) -> i64 {
        self.gauges
            .get(name)
            .map_or(0, |g| g.load(Ordering::Relaxed))
    }

    pub fn duration_stats(&self, name: &'static str) -> (u64, u64) {
        self.durations.get(name).map_or((0, 0), |d| {
            (d.0.load(Ordering::Relaxed), d.1.load(Ordering::Relaxed))
        })
    }
}

impl MetricsSink for AtomicMetrics {
    fn incr(&self, name: &'static str, delta: u64) {
        self.counters
            .entry(name)
            .or_default()
            .fetch_add(delta, Ordering::Relaxed);
    }

    fn gauge(&self, name: &'static str, value: i64) {
        self.gauges
            .entry(name)
            .or_default()
            .store(value, Ordering::Relaxed);
    }

    fn observe_ms(&self, name: &'static str, ms: u64) {
        let entry = self.durations.entry(name).or_default();
        entry.0.fetch_add(1, Ordering::Relaxed);
        entry.1.fetch_add(ms, Ordering::Relaxed);
    }
}
