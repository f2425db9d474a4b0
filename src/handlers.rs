// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-peer protocol handlers dispatched by type after classification and
//! precondition checks.
//!
//! ODATA/RDATA/NCF/SPM are the data-bearing downstream types and are fully
//! implemented against the reference [`crate::window::ReceiveWindow`] and
//! [`crate::nak::PeerNakState`]. NAK/NNAK/SPMR are send-path-adjacent
//! source-side routines (repair itself is out of scope) — here they only
//! count and log, since the dispatcher's obligation is routing them to the
//! right handler exactly once, not repairing anything.

use crate::packet::PacketBuf;
use crate::peer::PeerState;
use crate::stats::Stats;
use std::net::SocketAddr;

/// Minimal ODATA/RDATA/NCF/SPM data-specific subheader: a 4-byte sequence
/// number immediately following the PGM common header, mirroring RFC 3208's
/// "Data Packet" layout without its trailing-edge or options fields
/// (reassembly geometry beyond a flat sequence number is out of scope).
fn decode_seq(payload: &[u8]) -> Option<(u32, &[u8])> {
    if payload.len() < 4 {
        return None;
    }
    let seq = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Some((seq, &payload[4..]))
}

/// ODATA / RDATA → window append. Returns whether the packet was accepted
/// into the window.
pub fn on_data(peer: &PeerState, pkt: &PacketBuf) -> bool {
    let Some((seq, data)) = decode_seq(pkt.payload()) else {
        log::debug!("[PGM-RX] truncated data subheader from peer={}", peer.tsi);
        return false;
    };
    let accepted = peer.window.lock().append(seq, data);
    if accepted {
        peer.stats.add_receiver_bytes_received(data.len() as u64);
        log::debug!("[PGM-RX] accepted seq={seq} len={} from peer={}", data.len(), peer.tsi);
    }
    accepted
}

/// NCF → delivered to the peer's NAK state.
pub fn on_ncf(peer: &PeerState, pkt: &PacketBuf) -> bool {
    let Some((seq, _)) = decode_seq(pkt.payload()) else {
        return false;
    };
    peer.nak.lock().on_ncf(seq);
    log::debug!("[PGM-NAK] ncf confirmed seq={seq} for peer={}", peer.tsi);
    true
}

/// SPM → delivered to the peer's SPM state; if the packet's destination is
/// multicast, record the observed group NLA.
pub fn on_spm(peer: &PeerState, pkt: &PacketBuf) -> bool {
    let Some((seq, _)) = decode_seq(pkt.payload()) else {
        return false;
    };
    let mut spm = peer.spm.lock();
    spm.last_spm_seq = Some(seq);
    if is_multicast(&pkt.dst_addr) {
        spm.observed_group_nla = Some(pkt.dst_addr);
    }
    true
}

fn is_multicast(addr: &SocketAddr) -> bool {
    match addr.ip() {
        std::net::IpAddr::V4(v4) => v4.is_multicast(),
        std::net::IpAddr::V6(v6) => v6.is_multicast(),
    }
}

/// NAK routed to this endpoint as source. Repair itself is send-path and
/// out of scope; the dispatcher's obligation ends at invoking this exactly
/// once per packet.
pub fn on_nak(stats: &Stats, _pkt: &PacketBuf) -> bool {
    log::debug!("[PGM-RX] on_nak invoked (source-side repair out of scope)");
    let _ = stats;
    true
}

/// NNAK (null-NAK) routed to this endpoint as source.
pub fn on_nnak(_stats: &Stats, _pkt: &PacketBuf) -> bool {
    log::debug!("[PGM-RX] on_nnak invoked (source-side repair out of scope)");
    true
}

/// SPMR routed to this endpoint as source.
pub fn on_spmr(_stats: &Stats, _pkt: &PacketBuf) -> bool {
    log::debug!("[PGM-RX] on_spmr invoked (source-side repair out of scope)");
    true
}

/// Peer-to-peer NAK about a subject TSI this endpoint knows.
pub fn on_peer_nak(peer: &PeerState, _pkt: &PacketBuf) -> bool {
    log::debug!("[PGM-RX] on_peer_nak invoked for subject peer={}", peer.tsi);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsi::{Gsi, Tsi};
    use std::time::Instant;

    fn peer() -> PeerState {
        let addr: SocketAddr = "127.0.0.1:7500".parse().unwrap();
        PeerState::new(Tsi::new(Gsi::from_bytes([1; 6]), 2000), addr, addr, Instant::now())
    }

    fn packet_with_payload(seq: u32, data: &[u8], dst: SocketAddr) -> PacketBuf {
        let mut pkt = PacketBuf::alloc_default();
        pkt.storage[..4].copy_from_slice(&seq.to_be_bytes());
        pkt.storage[4..4 + data.len()].copy_from_slice(data);
        pkt.len = 4 + data.len();
        pkt.dst_addr = dst;
        pkt
    }

    #[test]
    fn on_data_appends_to_window_and_counts_bytes() {
        let peer = peer();
        let unicast: SocketAddr = "127.0.0.1:7500".parse().unwrap();
        let pkt = packet_with_payload(0, b"ABC", unicast);
        assert!(on_data(&peer, &pkt));
        assert_eq!(peer.stats.snapshot().receiver_bytes_received, 3);
        assert!(peer.window.lock().has_deliverable());
    }

    #[test]
    fn on_ncf_clears_nak_state() {
        let peer = peer();
        peer.nak.lock().mark_missing(7, Instant::now());
        let unicast: SocketAddr = "127.0.0.1:7500".parse().unwrap();
        let pkt = packet_with_payload(7, b"", unicast);
        assert!(on_ncf(&peer, &pkt));
        assert!(peer.nak.lock().next_deadline().is_none());
    }

    #[test]
    fn on_spm_records_multicast_group_nla() {
        let peer = peer();
        let mcast: SocketAddr = "239.255.0.1:7500".parse().unwrap();
        let pkt = packet_with_payload(1, b"", mcast);
        assert!(on_spm(&peer, &pkt));
        assert_eq!(peer.spm.lock().observed_group_nla, Some(mcast));
    }

    #[test]
    fn on_spm_unicast_does_not_record_group_nla() {
        let peer = peer();
        let unicast: SocketAddr = "127.0.0.1:7500".parse().unwrap();
        let pkt = packet_with_payload(1, b"", unicast);
        assert!(on_spm(&peer, &pkt));
        assert_eq!(peer.spm.lock().observed_group_nla, None);
    }
}
