// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PGM common header layout and the packet-type enumeration.

use crate::config::PGM_HEADER_LEN;
use crate::tsi::{Gsi, Tsi};

/// PGM packet type, as carried in the common header's `type` octet.
///
/// Represented as a total enumeration rather than matched against raw bytes
/// at every call site; "is downstream / upstream / peer" below are total
/// functions over this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgmType {
    Odata,
    Rdata,
    Nak,
    Nnak,
    Ncf,
    Spm,
    Poll,
    Polr,
    Spmr,
    /// A type octet this endpoint does not recognise.
    Unknown(u8),
}

impl PgmType {
    pub fn from_octet(b: u8) -> Self {
        match b {
            0x00 => PgmType::Odata,
            0x01 => PgmType::Rdata,
            0x08 => PgmType::Nak,
            0x09 => PgmType::Nnak,
            0x0a => PgmType::Ncf,
            0x0c => PgmType::Spm,
            0x0d => PgmType::Poll,
            0x0e => PgmType::Polr,
            0x0f => PgmType::Spmr,
            other => PgmType::Unknown(other),
        }
    }

    /// Downstream types: source → receiver.
    pub fn is_downstream(self) -> bool {
        matches!(self, PgmType::Odata | PgmType::Rdata | PgmType::Ncf | PgmType::Spm)
    }

    /// Upstream types: receiver → source. SPMR is intentionally excluded
    /// here; it is disambiguated by destination-cast, not type alone (see
    /// `is_peer`).
    pub fn is_upstream(self) -> bool {
        matches!(self, PgmType::Nak | PgmType::Nnak)
    }

    /// Peer-directed types: NAK and SPMR can both be peer-to-peer messages
    /// about a source this endpoint is not itself sourcing.
    pub fn is_peer(self) -> bool {
        matches!(self, PgmType::Nak | PgmType::Spmr)
    }
}

/// Decoded PGM common header (RFC 3208 §8.1), 16 bytes on the wire.
#[derive(Debug, Clone, Copy)]
pub struct PgmHeader {
    pub sport: u16,
    pub dport: u16,
    pub pgm_type: PgmType,
    pub options: u8,
    pub checksum: u16,
    pub tsi: Tsi,
    pub tsdu_length: u16,
}

impl PgmHeader {
    /// Decode the fixed 16-byte common header from the front of `buf`.
    /// Does not validate the checksum — see [`crate::wire::parse`].
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < PGM_HEADER_LEN {
            return None;
        }
        let sport = u16::from_be_bytes([buf[0], buf[1]]);
        let dport = u16::from_be_bytes([buf[2], buf[3]]);
        let pgm_type = PgmType::from_octet(buf[4]);
        let options = buf[5];
        let checksum = u16::from_be_bytes([buf[6], buf[7]]);
        let mut gsi_bytes = [0u8; 6];
        gsi_bytes.copy_from_slice(&buf[8..14]);
        let tsdu_length = u16::from_be_bytes([buf[14], buf[15]]);
        Some(Self {
            sport,
            dport,
            pgm_type,
            options,
            checksum,
            tsi: Tsi::new(Gsi::from_bytes(gsi_bytes), sport),
            tsdu_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header_bytes(pgm_type: u8) -> [u8; PGM_HEADER_LEN] {
        let mut b = [0u8; PGM_HEADER_LEN];
        b[0..2].copy_from_slice(&2000u16.to_be_bytes());
        b[2..4].copy_from_slice(&7500u16.to_be_bytes());
        b[4] = pgm_type;
        b[8..14].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        b[14..16].copy_from_slice(&3u16.to_be_bytes());
        b
    }

    #[test]
    fn decodes_fields_in_network_order() {
        let bytes = sample_header_bytes(0x00);
        let hdr = PgmHeader::decode(&bytes).expect("header decodes");
        assert_eq!(hdr.sport, 2000);
        assert_eq!(hdr.dport, 7500);
        assert_eq!(hdr.pgm_type, PgmType::Odata);
        assert_eq!(hdr.tsi.sport, 2000);
        assert_eq!(hdr.tsdu_length, 3);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let bytes = sample_header_bytes(0x00);
        assert!(PgmHeader::decode(&bytes[..10]).is_none());
    }

    #[test]
    fn type_direction_classification_is_total() {
        assert!(PgmType::Odata.is_downstream());
        assert!(PgmType::Rdata.is_downstream());
        assert!(PgmType::Ncf.is_downstream());
        assert!(PgmType::Spm.is_downstream());
        assert!(PgmType::Nak.is_upstream());
        assert!(PgmType::Nnak.is_upstream());
        assert!(PgmType::Nak.is_peer());
        assert!(PgmType::Spmr.is_peer());
        assert!(!PgmType::Spmr.is_upstream());
        assert!(!PgmType::Spmr.is_downstream());
        assert!(!PgmType::Poll.is_downstream());
        assert!(!PgmType::Poll.is_upstream());
        assert!(!PgmType::Poll.is_peer());
    }
}
