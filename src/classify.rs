// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The classifier: routes a parsed packet to one of three protocol
//! directions purely as a function of its type and the two port comparisons
//! against this endpoint's own TSI source port and data destination port.

use crate::wire::{PgmHeader, PgmType};

/// Classifier result, a tagged variant rather than nested conditionals at
/// call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Downstream,
    UpstreamSelf,
    Peer,
    Unknown,
}

/// Classify `header`, addressed to an endpoint whose own TSI source port is
/// `self_sport` and whose configured data destination port is `self_dport`.
///
/// This function alone decides SPMR's direction: a destination-port match
/// sends it to `UpstreamSelf`, everything else peer-eligible falls to
/// `Peer`. Do not special-case on `pgm_type` alone.
pub fn classify(header: &PgmHeader, self_sport: u16, self_dport: u16) -> Classification {
    if header.pgm_type.is_downstream() {
        return Classification::Downstream;
    }
    let addressed_to_our_source =
        header.dport == self_sport && (header.pgm_type.is_upstream() || header.pgm_type.is_peer());
    if addressed_to_our_source {
        return Classification::UpstreamSelf;
    }
    if header.pgm_type.is_peer() {
        return Classification::Peer;
    }
    Classification::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsi::Gsi;

    fn header(pgm_type: PgmType, sport: u16, dport: u16) -> PgmHeader {
        PgmHeader {
            sport,
            dport,
            pgm_type,
            options: 0,
            checksum: 0,
            tsi: Tsi::new(Gsi::from_bytes([1, 2, 3, 4, 5, 6]), sport),
            tsdu_length: 0,
        }
    }

    #[test]
    fn downstream_types_always_classify_downstream() {
        for t in [PgmType::Odata, PgmType::Rdata, PgmType::Ncf, PgmType::Spm] {
            let h = header(t, 2000, 1);
            assert_eq!(classify(&h, 3000, 7500), Classification::Downstream);
        }
    }

    #[test]
    fn nak_addressed_to_our_source_is_upstream_self() {
        let h = header(PgmType::Nak, 4000, 3000);
        assert_eq!(classify(&h, 3000, 7500), Classification::UpstreamSelf);
    }

    #[test]
    fn nak_not_addressed_to_our_source_is_peer() {
        let h = header(PgmType::Nak, 4000, 9999);
        assert_eq!(classify(&h, 3000, 7500), Classification::Peer);
    }

    #[test]
    fn spmr_disambiguates_on_destination_port_not_type_alone() {
        let upstream = header(PgmType::Spmr, 4000, 3000);
        assert_eq!(classify(&upstream, 3000, 7500), Classification::UpstreamSelf);

        let peer = header(PgmType::Spmr, 4000, 9999);
        assert_eq!(classify(&peer, 3000, 7500), Classification::Peer);
    }

    #[test]
    fn poll_is_unknown() {
        let h = header(PgmType::Poll, 4000, 9999);
        assert_eq!(classify(&h, 3000, 7500), Classification::Unknown);
    }
}
