// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The transport endpoint and its ingest loop.
//!
//! [`Transport`] is the root object; [`Transport::recvmsgv`] is the
//! single-threaded cooperative dispatcher described by the system overview.
//! Everything else in this crate exists to be driven by this one state
//! machine.

use crate::classify::{self, Classification};
use crate::config::{EncapMode, PGM_HEADER_LEN};
use crate::error::{Error, Result};
use crate::handlers;
use crate::nak::PeerNakState;
use crate::packet::PacketBuf;
use crate::peer::{PeerState, PeerTable};
use crate::stats::{Stats, StatsSnapshot};
use crate::timer::TimerWheel;
use crate::transport::{RecvOutcome, Socket};
use crate::tsi::Tsi;
use crate::wire::{self, PgmType};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Flags recognised by `recvmsgv`. The end-of-stream flag is stripped by
/// `recvfrom`/`recv` before they delegate down to `recvmsg`, so it never
/// reaches this struct.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvFlags {
    pub non_blocking: bool,
    pub error_queue: bool,
}

/// Outcome of a successful `recvmsgv` call. Syscall-level failures are
/// `Err(Error)` instead, per this codebase's error-propagation convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    Normal,
    Again,
    Eof,
}

/// One delivered APDU, or the reset sentinel populated when the caller asked
/// for the error queue.
#[derive(Debug, Clone)]
pub struct DeliveredApdu {
    pub tsi: Tsi,
    pub data: Vec<u8>,
    pub is_reset_sentinel: bool,
}

impl DeliveredApdu {
    fn reset_sentinel(tsi: Tsi) -> Self {
        Self {
            tsi,
            data: Vec::new(),
            is_reset_sentinel: true,
        }
    }
}

enum WaitOutcome {
    /// The data socket was the source of readiness.
    Again,
    /// A timer or internal wakeup (notify channel) was the source.
    Intr,
}

enum FlushOutcome {
    /// `peers_pending` drained to empty without filling the caller's vector.
    Drained,
    /// The caller's vector filled before `peers_pending` was exhausted.
    Filled,
    /// A peer reported unrecoverable loss; it stays at the head of
    /// `peers_pending` and `is_reset` was set.
    Reset,
}

/// Everything `pending_mutex` guards: `peers_pending`, `is_pending_read`,
/// `is_reset`, and the timer state.
struct PendingState {
    peers_pending: VecDeque<Arc<PeerState>>,
    is_pending_read: bool,
    is_reset: bool,
    timer: Box<dyn TimerWheel>,
}

/// The transport endpoint. Constructed and bound by external setup; the
/// core here only operates between bind and destroy.
pub struct Transport {
    socket: Socket,
    encap_mode: EncapMode,
    max_tpdu: usize,
    tsi: Tsi,
    dport: u16,
    can_send_data: bool,
    can_recv_data: bool,
    peers: PeerTable,
    pending: Mutex<PendingState>,
    notify: crate::notify::NotifyChannel,
    edge_triggered: bool,
    abort_on_reset: bool,
    rx_buffer: Mutex<PacketBuf>,
    stats: Stats,
}

impl Transport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: Socket,
        encap_mode: EncapMode,
        max_tpdu: usize,
        tsi: Tsi,
        dport: u16,
        can_send_data: bool,
        can_recv_data: bool,
        edge_triggered: bool,
        abort_on_reset: bool,
        timer: Box<dyn TimerWheel>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            socket,
            encap_mode,
            max_tpdu,
            tsi,
            dport,
            can_send_data,
            can_recv_data,
            peers: PeerTable::new(),
            pending: Mutex::new(PendingState {
                peers_pending: VecDeque::new(),
                is_pending_read: false,
                is_reset: false,
                timer,
            }),
            notify: crate::notify::NotifyChannel::new()?,
            edge_triggered,
            abort_on_reset,
            rx_buffer: Mutex::new(PacketBuf::alloc(max_tpdu)),
            stats: Stats::new(),
        })
    }

    pub fn tsi(&self) -> Tsi {
        self.tsi
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Look up a known peer by TSI. Exposed for diagnostics and for tests
    /// that need to drive a peer's receive window directly (e.g. forcing
    /// unrecoverable loss).
    pub fn peer(&self, tsi: &Tsi) -> Option<Arc<PeerState>> {
        self.peers.get(tsi)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The top-level ingest loop. Drives the pending-delivery flush, the
    /// socket reader, the classifier and handlers, and the wait stage,
    /// filling `out` with up to `max` delivered APDUs.
    pub fn recvmsgv(
        &self,
        out: &mut Vec<DeliveredApdu>,
        max: usize,
        flags: RecvFlags,
    ) -> Result<(RecvStatus, usize)> {
        if max == 0 {
            return Err(Error::Inval("recvmsgv requires a nonzero vector length"));
        }

        // Reset check, ahead of taking the main lock: a latched reset is
        // reported (and, unless abort_on_reset, cleared) before anything
        // else runs.
        {
            let mut pending = self.pending.lock();
            if pending.is_reset {
                if flags.error_queue {
                    if let Some(peer) = pending.peers_pending.front() {
                        out.push(DeliveredApdu::reset_sentinel(peer.tsi));
                    }
                }
                if self.abort_on_reset {
                    return Err(Error::ConnReset);
                }
                pending.is_reset = false;
                return Ok((RecvStatus::Eof, 0));
            }
        }

        // Hold pending_mutex for the remainder, except around the blocking
        // wait (released explicitly inside `wait_for_event`).
        let mut pending = self.pending.lock();
        let mut bytes_read = 0usize;
        let mut delivered_any = false;
        let mut last_read_would_block = false;

        loop {
            let now = Instant::now();
            if pending.timer.check(now) {
                pending.timer.dispatch(now, &self.peers);
                pending.timer.prepare(now, &self.peers);
            }

            // Flush whatever is already queued before touching the socket.
            if !pending.peers_pending.is_empty() {
                match self.flush(&mut pending, out, max, &mut bytes_read, &mut delivered_any) {
                    FlushOutcome::Filled => break,
                    FlushOutcome::Reset => break,
                    FlushOutcome::Drained => {}
                }
            }
            if out.len() >= max {
                break;
            }

            // One non-blocking read.
            {
                let mut buf = self.rx_buffer.lock();
                match self.socket.recv_one(&mut buf) {
                    Ok(RecvOutcome::Data(_)) => {
                        last_read_would_block = false;
                        self.dispatch_one(&mut buf, &mut pending);
                        buf.reset_for_reuse();
                    }
                    Ok(RecvOutcome::WouldBlock) => {
                        last_read_would_block = true;
                    }
                    Ok(RecvOutcome::Closed) => {
                        drop(buf);
                        break;
                    }
                    Ok(RecvOutcome::MissingDestination) => {
                        self.stats.incr_receiver_packets_discarded();
                        last_read_would_block = true;
                    }
                    Err(e) => return Err(Error::from(e)),
                }
            }

            if flags.non_blocking {
                if out.len() < max && !last_read_would_block {
                    continue;
                }
                break;
            }
            if !delivered_any {
                let deadline = pending.timer.expiration();
                let (reacquired, outcome) = self.wait_for_event(pending, deadline)?;
                pending = reacquired;
                match outcome {
                    // Socket readiness: retry the read.
                    WaitOutcome::Again => continue,
                    // Timer or internal wakeup: retry the flush and timer tick.
                    WaitOutcome::Intr => continue,
                }
            } else {
                break;
            }
        }

        if pending.is_reset {
            if self.abort_on_reset {
                return Err(Error::ConnReset);
            }
            return Ok((RecvStatus::Eof, bytes_read));
        }
        if !delivered_any {
            if pending.is_pending_read {
                let _ = self.notify.clear();
                pending.is_pending_read = false;
            }
            return Ok((RecvStatus::Again, bytes_read));
        }
        // Edge/level pending-notify policy, applied only when APDUs were
        // actually delivered.
        if self.edge_triggered {
            if pending.is_pending_read {
                let _ = self.notify.clear();
                pending.is_pending_read = false;
            }
        } else if !pending.is_pending_read {
            let _ = self.notify.send();
            pending.is_pending_read = true;
        }
        Ok((RecvStatus::Normal, bytes_read))
    }

    /// Drains already-queued peers' receive windows into `out`.
    fn flush(
        &self,
        pending: &mut PendingState,
        out: &mut Vec<DeliveredApdu>,
        max: usize,
        bytes_read: &mut usize,
        delivered_any: &mut bool,
    ) -> FlushOutcome {
        loop {
            let Some(peer) = pending.peers_pending.front().cloned() else {
                return FlushOutcome::Drained;
            };
            if out.len() >= max {
                return FlushOutcome::Filled;
            }

            let mut window = peer.window.lock();
            loop {
                if out.len() >= max {
                    return FlushOutcome::Filled;
                }
                if window.is_unrecoverable() {
                    pending.is_reset = true;
                    window.acknowledge_unrecoverable();
                    log::warn!("[PGM-RX] unrecoverable loss reported by peer={}", peer.tsi);
                    return FlushOutcome::Reset;
                }
                match window.drain_next_apdu() {
                    Some(apdu) => {
                        *bytes_read += apdu.data.len();
                        *delivered_any = true;
                        peer.stats.add_receiver_apdus_delivered(1);
                        out.push(DeliveredApdu {
                            tsi: peer.tsi,
                            data: apdu.data,
                            is_reset_sentinel: false,
                        });
                    }
                    None => break,
                }
            }
            let still_deliverable = window.has_deliverable();
            drop(window);
            if still_deliverable {
                // `drain_next_apdu` only returns `None` when nothing is
                // immediately deliverable, so this should not happen; treat
                // it as "vector full" defensively rather than looping.
                return FlushOutcome::Filled;
            }
            peer.set_pending(false);
            pending.peers_pending.pop_front();
        }
    }

    /// Parse, classify and dispatch one just-read datagram.
    fn dispatch_one(&self, buf: &mut PacketBuf, pending: &mut PendingState) {
        let parsed = if self.encap_mode.is_udp_encap() {
            wire::parse_udp_encap(buf.filled())
        } else {
            wire::parse_raw(buf.filled())
        };
        let parsed = match parsed {
            Ok(p) => p,
            Err(wire::ParseError::Checksum) => {
                if self.can_send_data {
                    self.stats.incr_source_cksum_errors();
                    self.stats.incr_source_packets_discarded();
                } else {
                    self.stats.incr_receiver_packets_discarded();
                }
                return;
            }
            Err(wire::ParseError::Malformed(reason)) => {
                log::debug!("[PGM-RX] malformed packet discarded: {reason}");
                self.stats.incr_receiver_packets_discarded();
                return;
            }
        };
        buf.header = Some(parsed.header);
        buf.data_offset = parsed.payload_offset;

        match classify::classify(&parsed.header, self.tsi.sport, self.dport) {
            Classification::Downstream => self.dispatch_downstream(buf, &parsed.header, pending),
            Classification::UpstreamSelf => self.dispatch_upstream(buf, &parsed.header),
            Classification::Peer => self.dispatch_peer(buf, &parsed.header),
            Classification::Unknown => {
                log::debug!("[PGM-CLASSIFY] unknown-direction packet discarded type={:?}", parsed.header.pgm_type);
                self.stats.incr_receiver_packets_discarded();
            }
        }
    }

    /// Downstream handler: source-to-receiver traffic (ODATA/RDATA/NCF/SPM).
    fn dispatch_downstream(&self, buf: &mut PacketBuf, header: &wire::PgmHeader, pending: &mut PendingState) {
        if !self.can_recv_data || header.dport != self.dport {
            self.stats.incr_receiver_packets_discarded();
            return;
        }
        let now = Instant::now();
        let peer = self.peers.get_or_create(header.tsi, buf.src_addr, buf.dst_addr, now);
        peer.touch(now);

        let accepted = match header.pgm_type {
            PgmType::Odata | PgmType::Rdata => handlers::on_data(&peer, buf),
            PgmType::Ncf => handlers::on_ncf(&peer, buf),
            PgmType::Spm => handlers::on_spm(&peer, buf),
            _ => {
                self.stats.incr_receiver_packets_discarded();
                false
            }
        };

        let (has_deliverable, is_unrecoverable) = {
            let window = peer.window.lock();
            (window.has_deliverable(), window.is_unrecoverable())
        };
        if (accepted && has_deliverable || is_unrecoverable) && !peer.has_pending() {
            peer.set_pending(true);
            pending.peers_pending.push_back(peer);
        }
    }

    /// Upstream handler: receiver-to-source traffic (NAK/NNAK/SPMR) addressed
    /// back to this endpoint acting as a source.
    fn dispatch_upstream(&self, buf: &mut PacketBuf, header: &wire::PgmHeader) {
        if !self.can_send_data || header.sport != self.dport || header.tsi.gsi != self.tsi.gsi {
            self.stats.incr_source_packets_discarded();
            return;
        }
        match header.pgm_type {
            PgmType::Nak => {
                handlers::on_nak(&self.stats, buf);
            }
            PgmType::Nnak => {
                handlers::on_nnak(&self.stats, buf);
            }
            PgmType::Spmr => {
                handlers::on_spmr(&self.stats, buf);
            }
            _ => {
                self.stats.incr_source_packets_discarded();
            }
        }
    }

    /// Peer-to-peer handler. The classifier guarantees `pgm_type` is NAK or
    /// SPMR here; an unknown subject TSI is discarded without creating a
    /// peer entry.
    fn dispatch_peer(&self, buf: &mut PacketBuf, header: &wire::PgmHeader) {
        if !self.can_recv_data || header.sport != self.dport {
            self.stats.incr_receiver_packets_discarded();
            return;
        }
        let Some(peer) = self.peers.get(&header.tsi) else {
            log::debug!("[PGM-PEER] peer message for unknown subject tsi={} discarded", header.tsi);
            self.stats.incr_receiver_packets_discarded();
            return;
        };
        match header.pgm_type {
            PgmType::Nak => {
                handlers::on_peer_nak(&peer, buf);
            }
            PgmType::Spmr => {
                handlers::on_spmr(&peer.stats, buf);
            }
            _ => {
                self.stats.incr_receiver_packets_discarded();
            }
        }
    }

    /// Blocks until the socket or the notify channel is ready, or the timer
    /// deadline passes. Consumes and returns the `pending_mutex` guard so
    /// the mutex is genuinely released across the blocking call.
    fn wait_for_event<'a>(
        &'a self,
        mut guard: parking_lot::MutexGuard<'a, PendingState>,
        deadline: Instant,
    ) -> Result<(parking_lot::MutexGuard<'a, PendingState>, WaitOutcome)> {
        if guard.is_pending_read {
            let _ = self.notify.clear();
            guard.is_pending_read = false;
        }
        drop(guard);

        let outcome = self.block_until_ready(deadline)?;

        Ok((self.pending.lock(), outcome))
    }

    #[cfg(unix)]
    fn block_until_ready(&self, deadline: Instant) -> Result<WaitOutcome> {
        use mio::unix::SourceFd;
        use mio::{Events, Interest, Poll, Token};

        const SOCKET: Token = Token(0);
        const NOTIFY: Token = Token(1);

        let mut poll = Poll::new().map_err(Error::from)?;
        let socket_fd = self.socket.as_raw_fd();
        let notify_fd = self.notify.raw_fd();
        poll.registry()
            .register(&mut SourceFd(&socket_fd), SOCKET, Interest::READABLE)
            .map_err(Error::from)?;
        poll.registry()
            .register(&mut SourceFd(&notify_fd), NOTIFY, Interest::READABLE)
            .map_err(Error::from)?;

        let mut events = Events::with_capacity(4);
        let timeout = deadline.saturating_duration_since(Instant::now());
        match poll.poll(&mut events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(WaitOutcome::Intr),
            Err(e) => return Err(Error::Fault(e)),
        }

        if events.iter().any(|e| e.token() == SOCKET) {
            Ok(WaitOutcome::Again)
        } else {
            Ok(WaitOutcome::Intr)
        }
    }

    /// Non-Unix platforms have no raw-fd readiness primitive wired up here;
    /// this degrades to sleeping until the timer deadline, which still
    /// guarantees the loop regains control at least that often but cannot
    /// observe socket readiness early.
    #[cfg(not(unix))]
    fn block_until_ready(&self, deadline: Instant) -> Result<WaitOutcome> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(Duration::from_millis(50)));
        Ok(WaitOutcome::Intr)
    }

    /// `recvmsg(one)`: `recvmsgv` with a vector length of one.
    pub fn recvmsg(&self, flags: RecvFlags) -> Result<(RecvStatus, Option<DeliveredApdu>)> {
        let mut out = Vec::with_capacity(1);
        let (status, _bytes) = self.recvmsgv(&mut out, 1, flags)?;
        Ok((status, out.into_iter().next()))
    }

    /// `recvfrom(buf, len)`: copies the delivered APDU's bytes into `buf`,
    /// truncating (with a loud diagnostic) if it does not fit, and reports
    /// the sender's TSI.
    pub fn recvfrom(&self, buf: &mut [u8], flags: RecvFlags) -> Result<(RecvStatus, usize, Option<Tsi>)> {
        let (status, apdu) = self.recvmsg(flags)?;
        let Some(apdu) = apdu else {
            return Ok((status, 0, None));
        };
        let n = if apdu.data.len() > buf.len() {
            log::error!(
                "[PGM-RX] truncating APDU of {} bytes from tsi={} to caller buffer of {} bytes",
                apdu.data.len(),
                apdu.tsi,
                buf.len()
            );
            buf.len()
        } else {
            apdu.data.len()
        };
        buf[..n].copy_from_slice(&apdu.data[..n]);
        Ok((status, n, Some(apdu.tsi)))
    }

    /// `recv(buf, len)`: `recvfrom` with the sender TSI discarded.
    pub fn recv(&self, buf: &mut [u8], flags: RecvFlags) -> Result<(RecvStatus, usize)> {
        let (status, n, _tsi) = self.recvfrom(buf, flags)?;
        Ok((status, n))
    }
}
