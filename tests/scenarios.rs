//! End-to-end scenarios over real loopback UDP sockets, driving the public
//! `recvmsgv` surface exactly as a caller would.

use pgm_rx::config::{EncapMode, DEFAULT_MAX_TPDU};
use pgm_rx::timer::SimpleTimerWheel;
use pgm_rx::transport::Socket;
use pgm_rx::wire::PgmHeader;
use pgm_rx::{Gsi, RecvFlags, RecvStatus, Transport, Tsi};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

const PGM_HEADER_LEN: usize = 16;

fn build_packet(pgm_type: u8, sport: u16, dport: u16, gsi: [u8; 6], seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; PGM_HEADER_LEN + 4 + payload.len()];
    buf[0..2].copy_from_slice(&sport.to_be_bytes());
    buf[2..4].copy_from_slice(&dport.to_be_bytes());
    buf[4] = pgm_type;
    buf[8..14].copy_from_slice(&gsi);
    buf[14..16].copy_from_slice(&((4 + payload.len()) as u16).to_be_bytes());
    buf[PGM_HEADER_LEN..PGM_HEADER_LEN + 4].copy_from_slice(&seq.to_be_bytes());
    buf[PGM_HEADER_LEN + 4..].copy_from_slice(payload);
    // Checksum lives at the same offset the production parser verifies.
    let cksum = pgm_rx::wire::checksum::compute(&buf, 6);
    buf[6..8].copy_from_slice(&cksum.to_be_bytes());
    buf
}

fn new_transport(dport: u16, can_recv_data: bool, abort_on_reset: bool) -> (Transport, UdpSocket) {
    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let sock = Socket::bind(bind_addr, EncapMode::UdpEncap { unicast_port: dport }).unwrap();
    let local = sock.local_addr().unwrap();
    let peer_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    peer_sock.connect(local).unwrap();

    let tsi = Tsi::new(Gsi::from_bytes([9; 6]), 3000);
    let timer = Box::new(SimpleTimerWheel::new(Instant::now()));
    let transport = Transport::new(
        sock,
        EncapMode::UdpEncap { unicast_port: dport },
        DEFAULT_MAX_TPDU,
        tsi,
        dport,
        false,
        can_recv_data,
        true,
        abort_on_reset,
        timer,
    )
    .unwrap();
    (transport, peer_sock)
}

fn non_blocking() -> RecvFlags {
    RecvFlags { non_blocking: true, error_queue: false }
}

#[test]
fn unrecoverable_loss_latches_reset_then_resumes() {
    let (transport, peer_sock) = new_transport(7500, true, false);
    let sender_tsi = Tsi::new(Gsi::from_bytes([1; 6]), 2000);

    let first = build_packet(0x00, 2000, 7500, [1; 6], 0, b"ABC");
    peer_sock.send(&first).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let mut out = Vec::new();
    let (status, _) = transport.recvmsgv(&mut out, 16, non_blocking()).unwrap();
    assert_eq!(status, RecvStatus::Normal);
    assert_eq!(out[0].data, b"ABC");

    let peer = transport.peer(&sender_tsi).expect("peer created by the first delivery");
    peer.window.lock().force_unrecoverable();
    // There is nothing in peers_pending right now (window just drained), so
    // drive one more packet to put the peer back on the pending list and
    // surface the forced unrecoverable-loss state through flush.
    let second = build_packet(0x00, 2000, 7500, [1; 6], 5, b"XYZ");
    peer_sock.send(&second).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let mut out2 = Vec::new();
    let (status2, _) = transport.recvmsgv(&mut out2, 16, non_blocking()).unwrap();
    assert_eq!(status2, RecvStatus::Eof);

    // The latch is still set entering the next call (it was only set mid
    // call 2, past that call's own pre-check), so this call also reports
    // EOF — but, since abort_on_reset == false, it clears the latch on the
    // way out so a subsequent call can resume.
    let mut out3 = Vec::new();
    let (status3, _) = transport.recvmsgv(&mut out3, 16, non_blocking()).unwrap();
    assert_eq!(status3, RecvStatus::Eof);

    let mut out4 = Vec::new();
    let (status4, _) = transport.recvmsgv(&mut out4, 16, non_blocking()).unwrap();
    assert_ne!(status4, RecvStatus::Eof);
}

#[test]
fn blocking_call_wakes_on_keepalive_timer_with_no_traffic() {
    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let sock = Socket::bind(bind_addr, EncapMode::UdpEncap { unicast_port: 7500 }).unwrap();
    let tsi = Tsi::new(Gsi::from_bytes([9; 6]), 3000);
    let timer = Box::new(SimpleTimerWheel::with_keepalive_interval(Instant::now(), Duration::from_millis(50)));
    let transport = Transport::new(
        sock,
        EncapMode::UdpEncap { unicast_port: 7500 },
        DEFAULT_MAX_TPDU,
        tsi,
        7500,
        true,
        false,
        true,
        false,
        timer,
    )
    .unwrap();

    let started = Instant::now();
    let mut out = Vec::new();
    let (status, _) = transport
        .recvmsgv(&mut out, 16, RecvFlags { non_blocking: false, error_queue: false })
        .unwrap();
    // No packets ever arrive; the reference timer's keepalive interval still
    // bounds the wait, so the call returns instead of blocking indefinitely.
    assert_eq!(status, RecvStatus::Again);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn header_round_trips_through_public_wire_api() {
    let buf = build_packet(0x00, 2000, 7500, [1, 2, 3, 4, 5, 6], 1, b"Z");
    let header = PgmHeader::decode(&buf).expect("decodes");
    assert_eq!(header.sport, 2000);
    assert_eq!(header.dport, 7500);
}
