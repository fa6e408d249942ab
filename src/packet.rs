//! Decoding and encoding of the beamformer packet format.
//!
//! Every packet starts with a fixed 48 byte header, multi-byte fields big-endian:
//!
//! ```text
//! 0      marker byte       (science case and mode)
//! 1      format version
//! 2      compound beam index
//! 3      tab index
//! 4..6   channel index
//! 6..8   payload size
//! 8..16  timestamp         (1.28 us ticks since 1970-01-01)
//! 16     sequence number   (position within the segment)
//! 17..24 reserved
//! 24..48 flags
//! ```
//!
//! followed by the payload. Anything after the payload is ignored.

use crate::error::ProtocolError;

pub const HEADER_LEN: usize = 48;
/// The only format version we understand
pub const FORMAT_VERSION: u8 = 1;
/// Stokes I: 6250 time samples of a single tab and channel
pub const PAYLOAD_SIZE_I: usize = 6250;
/// Stokes IQUV: 500 time samples x 4 channels x 4 components
pub const PAYLOAD_SIZE_IQUV: usize = 8000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub marker: u8,
    pub version: u8,
    pub beam: u8,
    pub tab: u8,
    pub channel: u16,
    pub payload_size: u16,
    pub timestamp: u64,
    pub sequence: u8,
    pub reserved: [u8; 7],
    pub flags: [u8; 24],
}

/// A decoded view over one receive slot
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn be_u64(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(word)
}

impl PacketHeader {
    /// Pull the header fields out of the first [`HEADER_LEN`] bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                len: bytes.len(),
                needed: HEADER_LEN,
            });
        }
        let mut reserved = [0u8; 7];
        reserved.copy_from_slice(&bytes[17..24]);
        let mut flags = [0u8; 24];
        flags.copy_from_slice(&bytes[24..48]);
        Ok(Self {
            marker: bytes[0],
            version: bytes[1],
            beam: bytes[2],
            tab: bytes[3],
            channel: be_u16(bytes, 4),
            payload_size: be_u16(bytes, 6),
            timestamp: be_u64(bytes, 8),
            sequence: bytes[16],
            reserved,
            flags,
        })
    }

    /// Write the header in wire order
    pub fn encode(&self, out: &mut [u8; HEADER_LEN]) {
        out[0] = self.marker;
        out[1] = self.version;
        out[2] = self.beam;
        out[3] = self.tab;
        out[4..6].copy_from_slice(&self.channel.to_be_bytes());
        out[6..8].copy_from_slice(&self.payload_size.to_be_bytes());
        out[8..16].copy_from_slice(&self.timestamp.to_be_bytes());
        out[16] = self.sequence;
        out[17..24].copy_from_slice(&self.reserved);
        out[24..48].copy_from_slice(&self.flags);
    }
}

impl<'a> Packet<'a> {
    pub fn decode(bytes: &'a [u8]) -> Result<Self, ProtocolError> {
        let header = PacketHeader::decode(bytes)?;
        let needed = HEADER_LEN + header.payload_size as usize;
        if bytes.len() < needed {
            return Err(ProtocolError::Truncated {
                len: bytes.len(),
                needed,
            });
        }
        Ok(Self {
            header,
            payload: &bytes[HEADER_LEN..needed],
        })
    }
}

/// Build a complete datagram, used by tests and benches
pub fn encode_packet(header: &PacketHeader, payload: &[u8]) -> Vec<u8> {
    let mut head = [0u8; HEADER_LEN];
    header.encode(&mut head);
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&head);
    bytes.extend_from_slice(payload);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PacketHeader {
        PacketHeader {
            marker: 0xE0,
            version: FORMAT_VERSION,
            beam: 21,
            tab: 11,
            channel: 1535,
            payload_size: PAYLOAD_SIZE_I as u16,
            timestamp: 1_234_567_890_123,
            sequence: 3,
            reserved: [0, 1, 2, 3, 4, 5, 6],
            flags: [0xAA; 24],
        }
    }

    #[test]
    fn test_header_round_trip() {
        let header = sample_header();
        let mut bytes = [0u8; HEADER_LEN];
        header.encode(&mut bytes);
        assert_eq!(PacketHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_big_endian_fields() {
        let header = PacketHeader {
            channel: 0x0102,
            payload_size: 0x1F40,
            timestamp: 0x0102_0304_0506_0708,
            ..Default::default()
        };
        let mut bytes = [0u8; HEADER_LEN];
        header.encode(&mut bytes);
        assert_eq!(&bytes[4..6], &[0x01, 0x02]);
        assert_eq!(&bytes[6..8], &[0x1F, 0x40]);
        assert_eq!(&bytes[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_payload_view() {
        let header = sample_header();
        let payload: Vec<u8> = (0..PAYLOAD_SIZE_I).map(|i| (i % 251) as u8).collect();
        let mut bytes = encode_packet(&header, &payload);
        // Trailing bytes past the payload are ignored
        bytes.extend_from_slice(&[0xFF; 66]);
        let packet = Packet::decode(&bytes).unwrap();
        assert_eq!(packet.header, header);
        assert_eq!(packet.payload, &payload[..]);
    }

    #[test]
    fn test_encode_packet_layout() {
        let header = sample_header();
        let bytes = encode_packet(&header, &[7u8; 10]);
        assert_eq!(bytes.len(), HEADER_LEN + 10);
        let mut head = [0u8; HEADER_LEN];
        header.encode(&mut head);
        assert_eq!(&bytes[..HEADER_LEN], &head[..]);
        assert!(bytes[HEADER_LEN..].iter().all(|&b| b == 7));
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            PacketHeader::decode(&[0u8; 20]),
            Err(ProtocolError::Truncated {
                len: 20,
                needed: HEADER_LEN
            })
        );
        let header = sample_header();
        let bytes = encode_packet(&header, &[0u8; 100]);
        assert_eq!(
            Packet::decode(&bytes).unwrap_err(),
            ProtocolError::Truncated {
                len: HEADER_LEN + 100,
                needed: HEADER_LEN + PAYLOAD_SIZE_I
            }
        );
    }
}
