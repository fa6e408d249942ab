//! Demultiplexing packets into destination streams

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::{error::ProtocolError, packet::PacketHeader};

/// How packets are assigned to destination streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RoutingMode {
    /// Everything goes to a single stream
    PassThrough,
    /// One stream per band (compound beam index), learned during pre-roll
    Learned,
}

#[derive(Debug)]
pub enum StreamRouter {
    PassThrough,
    /// Pre-roll, collecting band identifiers
    Learning {
        seen: BTreeSet<u8>,
        streams: usize,
    },
    /// Band identifier -> stream index, indexed by the identifier byte
    Frozen { table: Vec<Option<usize>> },
}

impl StreamRouter {
    pub fn new(mode: RoutingMode, streams: usize) -> Self {
        match mode {
            RoutingMode::PassThrough => StreamRouter::PassThrough,
            RoutingMode::Learned => StreamRouter::Learning {
                seen: BTreeSet::new(),
                streams,
            },
        }
    }

    /// Record the band of a pre-roll packet
    pub fn observe(&mut self, header: &PacketHeader) {
        if let StreamRouter::Learning { seen, .. } = self {
            seen.insert(header.beam);
        }
    }

    /// Stop learning and build the lookup table. Lowest band is stream 0.
    pub fn freeze(&mut self) -> Result<(), ProtocolError> {
        let StreamRouter::Learning { seen, streams } = self else {
            return Ok(());
        };
        if seen.len() != *streams {
            return Err(ProtocolError::StreamCount {
                found: seen.len(),
                expected: *streams,
            });
        }
        let bands: Vec<u8> = seen.iter().copied().collect();
        // BTreeSet iteration is ascending, and `bands` is non-empty because streams >= 1
        let (low, high) = (bands[0], bands[bands.len() - 1]);
        if (high - low) as usize + 1 != bands.len() {
            warn!(?bands, "Band numbers are not contiguous");
        }
        let mut table = vec![None; u8::MAX as usize + 1];
        for (stream, band) in bands.iter().enumerate() {
            table[*band as usize] = Some(stream);
        }
        info!(?bands, "Band mapping frozen");
        *self = StreamRouter::Frozen { table };
        Ok(())
    }

    /// Destination stream of a packet
    pub fn route(&self, header: &PacketHeader) -> Result<usize, ProtocolError> {
        match self {
            StreamRouter::PassThrough => Ok(0),
            StreamRouter::Learning { .. } => Err(ProtocolError::UnknownBand(header.beam)),
            StreamRouter::Frozen { table } => table
                .get(header.beam as usize)
                .copied()
                .flatten()
                .ok_or(ProtocolError::UnknownBand(header.beam)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(beam: u8) -> PacketHeader {
        PacketHeader {
            beam,
            ..Default::default()
        }
    }

    #[test]
    fn test_sorted_mapping_independent_of_arrival() {
        let arrival = [50, 20, 80, 10, 70, 30, 60, 40, 20, 10, 80];
        let mut router = StreamRouter::new(RoutingMode::Learned, 8);
        for b in arrival {
            router.observe(&band(b));
        }
        router.freeze().unwrap();
        for (i, b) in [10, 20, 30, 40, 50, 60, 70, 80].into_iter().enumerate() {
            assert_eq!(router.route(&band(b)), Ok(i));
        }
    }

    #[test]
    fn test_unknown_band() {
        let mut router = StreamRouter::new(RoutingMode::Learned, 2);
        router.observe(&band(1));
        router.observe(&band(2));
        router.freeze().unwrap();
        assert_eq!(router.route(&band(3)), Err(ProtocolError::UnknownBand(3)));
        assert_eq!(router.route(&band(255)), Err(ProtocolError::UnknownBand(255)));
    }

    #[test]
    fn test_stream_count_mismatch() {
        let mut router = StreamRouter::new(RoutingMode::Learned, 8);
        for b in [10, 20, 30] {
            router.observe(&band(b));
        }
        assert_eq!(
            router.freeze(),
            Err(ProtocolError::StreamCount {
                found: 3,
                expected: 8
            })
        );
    }

    #[test]
    fn test_pass_through() {
        let mut router = StreamRouter::new(RoutingMode::PassThrough, 1);
        router.observe(&band(9));
        router.freeze().unwrap();
        assert_eq!(router.route(&band(9)), Ok(0));
        assert_eq!(router.route(&band(200)), Ok(0));
    }
}
