// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer state and the peer table.
//!
//! Keyed by [`Tsi`], protected by a reader/writer lock: the fast path
//! (well-known sender) takes a reader lock; the slow path (first downstream
//! packet from an unknown TSI) promotes to a writer lock and inserts
//! idempotently (check-then-insert), matching the registry pattern used
//! elsewhere in this codebase for exactly this reason — tolerating races
//! against concurrent readers even though the reference ingest loop is
//! single-threaded.

use crate::nak::PeerNakState;
use crate::stats::Stats;
use crate::tsi::Tsi;
use crate::window::{ReceiveWindow, SimpleWindow};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Observed SPM state for a peer: the last SPM sequence number seen and, if
/// the SPM's destination was multicast, the group network-layer address
/// peer-directed repair requests should target.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpmState {
    pub last_spm_seq: Option<u32>,
    pub observed_group_nla: Option<SocketAddr>,
}

/// Per-peer state, created lazily on the first well-formed downstream
/// packet from an unknown TSI. Interior fields are mutated only from the
/// ingest thread; the `Mutex` exists so the table itself stays cheap to
/// read-lock even while a handler mutates one peer's state, not to support
/// genuine cross-thread contention.
pub struct PeerState {
    pub tsi: Tsi,
    pub src_addr: SocketAddr,
    pub dst_addr: SocketAddr,
    pub last_packet_at: Mutex<Instant>,
    pub stats: Stats,
    pub spm: Mutex<SpmState>,
    pub nak: Mutex<PeerNakState>,
    pub window: Mutex<Box<dyn ReceiveWindow>>,
    /// Mirrors membership in the transport-wide `peers_pending` list;
    /// mutated only under `pending_mutex` (see `endpoint.rs`).
    pending: AtomicBool,
}

impl PeerState {
    pub fn new(tsi: Tsi, src_addr: SocketAddr, dst_addr: SocketAddr, now: Instant) -> Self {
        Self {
            tsi,
            src_addr,
            dst_addr,
            last_packet_at: Mutex::new(now),
            stats: Stats::new(),
            spm: Mutex::new(SpmState::default()),
            nak: Mutex::new(PeerNakState::new()),
            window: Mutex::new(Box::new(SimpleWindow::new(0))),
            pending: AtomicBool::new(false),
        }
    }

    pub fn touch(&self, now: Instant) {
        *self.last_packet_at.lock() = now;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn set_pending(&self, v: bool) {
        self.pending.store(v, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerState")
            .field("tsi", &self.tsi)
            .field("src_addr", &self.src_addr)
            .field("dst_addr", &self.dst_addr)
            .field("pending", &self.has_pending())
            .finish()
    }
}

/// Reader/writer-locked map from [`Tsi`] to peer state.
#[derive(Default)]
pub struct PeerTable {
    inner: RwLock<HashMap<Tsi, Arc<PeerState>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fast path: look up a well-known sender under a reader lock.
    pub fn get(&self, tsi: &Tsi) -> Option<Arc<PeerState>> {
        self.read().get(tsi).cloned()
    }

    /// Slow path: create a peer for `tsi` if one does not already exist.
    /// Idempotent under the writer lock — a racing caller that loses the
    /// check-then-insert gets the winner's entry back, never a duplicate.
    pub fn get_or_create(
        &self,
        tsi: Tsi,
        src_addr: SocketAddr,
        dst_addr: SocketAddr,
        now: Instant,
    ) -> Arc<PeerState> {
        if let Some(existing) = self.get(&tsi) {
            return existing;
        }
        let mut guard = self.write();
        if let Some(existing) = guard.get(&tsi) {
            return Arc::clone(existing);
        }
        let peer = Arc::new(PeerState::new(tsi, src_addr, dst_addr, now));
        guard.insert(tsi, Arc::clone(&peer));
        log::info!("[PGM-PEER] created peer entry tsi={tsi} src={src_addr}");
        peer
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Iterate every known peer under a reader lock. Used by the reference
    /// timer wheel to drive per-peer NAK retry dispatch.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<PeerState>)) {
        for peer in self.read().values() {
            f(peer);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Tsi, Arc<PeerState>>> {
        match self.inner.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("[PGM-PEER] peer table read lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Tsi, Arc<PeerState>>> {
        match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("[PGM-PEER] peer table write lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsi::Gsi;

    fn addr() -> SocketAddr {
        "127.0.0.1:7500".parse().unwrap()
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let table = PeerTable::new();
        let tsi = Tsi::new(Gsi::from_bytes([1; 6]), 2000);
        let now = Instant::now();
        let a = table.get_or_create(tsi, addr(), addr(), now);
        let b = table.get_or_create(tsi, addr(), addr(), now);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_tsi_misses_without_creating() {
        let table = PeerTable::new();
        let tsi = Tsi::new(Gsi::from_bytes([1; 6]), 2000);
        assert!(table.get(&tsi).is_none());
        assert_eq!(table.len(), 0);
    }
}
