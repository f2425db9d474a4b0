// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer NAK/repair state, cleared by NCF and driven by the reference
//! timer wheel (`timer_check`/`timer_dispatch`).
//!
//! State machine:
//!
//! ```text
//!        append(seq)            ncf(seq)
//!   IDLE --------------> PENDING --------> IDLE
//!                            |
//!                            | backoff elapsed, retries remain
//!                            v
//!                         RETRY ----> (retries exhausted) ----> GIVEN_UP
//! ```
//!
//! The randomised back-off interval itself and the actual NAK wire send are
//! out of scope here; this only tracks which sequence numbers are
//! outstanding and when the reference timer should next act on them.

use crate::config::{DEFAULT_NAK_RETRY_BACKOFF, DEFAULT_NAK_RETRY_COUNT};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NakState {
    Pending,
    Retry(u32),
    GivenUp,
}

#[derive(Debug)]
struct Outstanding {
    state: NakState,
    next_action_at: Instant,
}

/// Tracks outstanding repair requests for one peer, keyed by sequence
/// number. Not a clock source itself — `now` is passed in by the caller
/// (the reference timer wheel), keeping this testable without sleeping.
#[derive(Debug, Default)]
pub struct PeerNakState {
    outstanding: HashMap<u32, Outstanding>,
}

impl PeerNakState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gap was observed for `seq`; begin tracking it if not already.
    pub fn mark_missing(&mut self, seq: u32, now: Instant) {
        self.outstanding.entry(seq).or_insert(Outstanding {
            state: NakState::Pending,
            next_action_at: now + DEFAULT_NAK_RETRY_BACKOFF,
        });
    }

    /// NCF arrived confirming `seq` is being repaired (or has been repaired);
    /// clears it from outstanding tracking.
    pub fn on_ncf(&mut self, seq: u32) {
        self.outstanding.remove(&seq);
    }

    /// Driven by the reference timer wheel: advance any outstanding entry
    /// whose backoff has elapsed, returning the sequence numbers that should
    /// be re-requested now. Entries that exhaust their retry budget move to
    /// `GivenUp` and are no longer returned or re-armed.
    pub fn timer_dispatch(&mut self, now: Instant) -> Vec<u32> {
        let mut due = Vec::new();
        for (&seq, entry) in self.outstanding.iter_mut() {
            if entry.state == NakState::GivenUp || now < entry.next_action_at {
                continue;
            }
            entry.state = match entry.state {
                NakState::Pending => NakState::Retry(1),
                NakState::Retry(n) if n + 1 >= DEFAULT_NAK_RETRY_COUNT => NakState::GivenUp,
                NakState::Retry(n) => NakState::Retry(n + 1),
                NakState::GivenUp => NakState::GivenUp,
            };
            if entry.state != NakState::GivenUp {
                entry.next_action_at = now + DEFAULT_NAK_RETRY_BACKOFF;
                due.push(seq);
            }
        }
        due
    }

    /// Sequence numbers this peer's repair state has given up on — the
    /// receive window should treat these as unrecoverable loss.
    pub fn given_up(&self) -> impl Iterator<Item = u32> + '_ {
        self.outstanding
            .iter()
            .filter(|(_, e)| e.state == NakState::GivenUp)
            .map(|(&seq, _)| seq)
    }

    /// Earliest deadline across all outstanding entries, used by the timer
    /// wheel to compute the next wake-up bound for `wait_for_event`.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.outstanding
            .values()
            .filter(|e| e.state != NakState::GivenUp)
            .map(|e| e.next_action_at)
            .min()
    }
}
