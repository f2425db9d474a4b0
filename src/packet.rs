// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The packet buffer: the container the socket reader fills and the
//! downstream handler strips the PGM header from in place.

use crate::config::DEFAULT_MAX_TPDU;
use crate::wire::PgmHeader;
use std::net::SocketAddr;
use std::time::Instant;

/// A received datagram plus everything decoded from it so far.
///
/// Real PGM buffers are scatter-gather (head/data/tail pointers over a
/// shared arena); this reference implementation owns a flat `Vec<u8>`
/// instead, with `data_offset` playing the role of the "data" pointer
/// advancing past the header on strip. The simplification is noted in
/// DESIGN.md — it does not change any ingest-path decision, only how the
/// bytes are stored.
pub struct PacketBuf {
    pub storage: Vec<u8>,
    pub len: usize,
    pub data_offset: usize,
    pub src_addr: SocketAddr,
    pub dst_addr: SocketAddr,
    pub received_at: Instant,
    pub header: Option<PgmHeader>,
}

impl PacketBuf {
    /// Allocate a fresh, empty buffer sized for one maximum-TPDU datagram.
    pub fn alloc(max_tpdu: usize) -> Self {
        let unspecified: SocketAddr = "0.0.0.0:0".parse().expect("valid unspecified address");
        Self {
            storage: vec![0u8; max_tpdu],
            len: 0,
            data_offset: 0,
            src_addr: unspecified,
            dst_addr: unspecified,
            received_at: Instant::now(),
            header: None,
        }
    }

    pub fn alloc_default() -> Self {
        Self::alloc(DEFAULT_MAX_TPDU)
    }

    /// The populated payload, i.e. the window into `storage` the socket
    /// reader wrote to.
    pub fn filled(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// The payload past whatever has been stripped so far (PGM common
    /// header, and for ODATA/RDATA the data-specific subheader).
    pub fn payload(&self) -> &[u8] {
        &self.storage[self.data_offset..self.len]
    }

    pub fn reset_for_reuse(&mut self) {
        self.len = 0;
        self.data_offset = 0;
        self.header = None;
    }
}
