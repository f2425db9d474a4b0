// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cumulative counters, indexed by a fixed set of statistic codes.
//!
//! Mutated only from the ingest thread; other threads may read atomically.

use std::sync::atomic::{AtomicU64, Ordering};

/// One field per named statistic rather than a map — the set is fixed and
/// small, so a struct of atomics is both cheaper and harder to typo than a
/// `HashMap<&str, AtomicU64>`.
#[derive(Debug, Default)]
pub struct Stats {
    pub source_packets_discarded: AtomicU64,
    pub source_cksum_errors: AtomicU64,
    pub receiver_packets_discarded: AtomicU64,
    pub receiver_bytes_received: AtomicU64,
    pub receiver_apdus_delivered: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr_source_packets_discarded(&self) {
        self.source_packets_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_source_cksum_errors(&self) {
        self.source_cksum_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_receiver_packets_discarded(&self) {
        self.receiver_packets_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_receiver_bytes_received(&self, n: u64) {
        self.receiver_bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_receiver_apdus_delivered(&self, n: u64) {
        self.receiver_apdus_delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            source_packets_discarded: self.source_packets_discarded.load(Ordering::Relaxed),
            source_cksum_errors: self.source_cksum_errors.load(Ordering::Relaxed),
            receiver_packets_discarded: self.receiver_packets_discarded.load(Ordering::Relaxed),
            receiver_bytes_received: self.receiver_bytes_received.load(Ordering::Relaxed),
            receiver_apdus_delivered: self.receiver_apdus_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`], cheap to hand to a caller or log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub source_packets_discarded: u64,
    pub source_cksum_errors: u64,
    pub receiver_packets_discarded: u64,
    pub receiver_bytes_received: u64,
    pub receiver_apdus_delivered: u64,
}
