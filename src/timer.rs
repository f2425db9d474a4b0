// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The protocol timer wheel (`timer_check`, `timer_dispatch`,
//! `timer_prepare`, `timer_expiration`), consumed by the ingest loop but
//! owned externally to the core: a protocol timer state owned by an
//! external timer module, not embedded in the transport itself.
//!
//! [`SimpleTimerWheel`] is the bundled reference implementation: it drives
//! each peer's [`crate::nak::PeerNakState`] retry schedule and runs a
//! periodic session-keepalive tick so a blocking ingest call always regains
//! control at a bounded interval even with no peers and no outstanding NAK
//! state. Real NAK back-off randomisation and SPM rate computation remain
//! out of scope.

use crate::peer::PeerTable;
use std::time::{Duration, Instant};

/// The timer wheel contract the ingest loop (`endpoint.rs`) depends on.
pub trait TimerWheel: Send {
    /// Has the wheel's next expiration already passed?
    fn check(&self, now: Instant) -> bool;

    /// Run whatever protocol actions are due, then the caller must call
    /// `prepare` to recompute the next expiration.
    fn dispatch(&mut self, now: Instant, peers: &PeerTable);

    /// Recompute `expiration()` from current state.
    fn prepare(&mut self, now: Instant, peers: &PeerTable);

    /// Absolute time of the next scheduled action, used to bound the wait
    /// stage.
    fn expiration(&self) -> Instant;
}

/// Reference timer wheel: on each dispatch, walks every known peer's NAK
/// state and advances it, and runs a session-keepalive tick at
/// `keepalive_interval`. `expiration()` is the earliest of the keepalive
/// deadline and every peer's NAK retry deadline, so the wait stage never
/// blocks longer than one keepalive interval even when nothing is
/// outstanding.
pub struct SimpleTimerWheel {
    next_expiration: Instant,
    next_keepalive: Instant,
    keepalive_interval: Duration,
}

impl SimpleTimerWheel {
    /// Uses [`crate::config::DEFAULT_SPM_AMBIENT_INTERVAL`] as the keepalive
    /// bound.
    pub fn new(now: Instant) -> Self {
        Self::with_keepalive_interval(now, crate::config::DEFAULT_SPM_AMBIENT_INTERVAL)
    }

    pub fn with_keepalive_interval(now: Instant, keepalive_interval: Duration) -> Self {
        let next_keepalive = now + keepalive_interval;
        Self {
            next_expiration: next_keepalive,
            next_keepalive,
            keepalive_interval,
        }
    }
}

impl TimerWheel for SimpleTimerWheel {
    fn check(&self, now: Instant) -> bool {
        now >= self.next_expiration
    }

    fn dispatch(&mut self, now: Instant, peers: &PeerTable) {
        peers.for_each(|peer| {
            let due = peer.nak.lock().timer_dispatch(now);
            if !due.is_empty() {
                log::debug!(
                    "[PGM-NAK] peer={} re-requesting {} outstanding sequence(s)",
                    peer.tsi,
                    due.len()
                );
            }
        });
        if now >= self.next_keepalive {
            log::trace!("[PGM-TIMER] session keepalive tick");
            self.next_keepalive = now + self.keepalive_interval;
        }
    }

    fn prepare(&mut self, now: Instant, peers: &PeerTable) {
        let mut earliest = self.next_keepalive;
        peers.for_each(|peer| {
            if let Some(deadline) = peer.nak.lock().next_deadline() {
                earliest = earliest.min(deadline);
            }
        });
        self.next_expiration = earliest;
    }

    fn expiration(&self) -> Instant {
        self.next_expiration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsi::{Gsi, Tsi};
    use std::time::Duration;

    #[test]
    fn expiration_bounded_by_keepalive_interval_with_no_peers() {
        let now = Instant::now();
        let wheel = SimpleTimerWheel::with_keepalive_interval(now, Duration::from_secs(30));
        assert!(!wheel.check(now));
        assert!(wheel.expiration() <= now + Duration::from_secs(30));
        assert!(wheel.expiration() > now + Duration::from_secs(1));
    }

    #[test]
    fn dispatch_advances_keepalive_deadline_once_due() {
        let now = Instant::now();
        let peers = PeerTable::new();
        let mut wheel = SimpleTimerWheel::with_keepalive_interval(now, Duration::from_millis(50));
        let later = now + Duration::from_millis(60);
        assert!(wheel.check(later));
        wheel.dispatch(later, &peers);
        wheel.prepare(later, &peers);
        assert!(wheel.expiration() > later);
    }

    #[test]
    fn prepare_tracks_earliest_peer_deadline() {
        let now = Instant::now();
        let peers = PeerTable::new();
        let addr: std::net::SocketAddr = "127.0.0.1:7500".parse().unwrap();
        let tsi = Tsi::new(Gsi::from_bytes([1; 6]), 2000);
        let peer = peers.get_or_create(tsi, addr, addr, now);
        peer.nak.lock().mark_missing(1, now);

        let mut wheel = SimpleTimerWheel::new(now);
        wheel.prepare(now, &peers);
        assert!(wheel.expiration() <= now + crate::config::DEFAULT_NAK_RETRY_BACKOFF);
    }
}
