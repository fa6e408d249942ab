//! Placement of packet payloads into a ring buffer page.
//!
//! Stokes I pages are a `[tab][channel][time]` matrix where every channel row is
//! `padded_size` bytes long. A packet carries 6250 consecutive samples of one row,
//! so it lands as one contiguous chunk.
//!
//! Stokes IQUV pages are a `[tab][time][component][channel]` matrix. A packet carries
//! 500 samples of 4 channels as `[time][channel][component]`, so every byte moves
//! individually. This is a transpose and it runs straight from the receive slot into
//! the page.

use crate::config::{
    Geometry, SlotAddr, Stokes, IQUV_CHANNELS_PER_PACKET, IQUV_COMPONENTS,
    IQUV_SAMPLES_PER_PACKET,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    StokesI {
        channels: usize,
        /// Bytes per channel row
        padded_size: usize,
        payload_size: usize,
    },
    StokesIquv {
        channels: usize,
        /// Time samples per segment
        samples: usize,
    },
}

impl Layout {
    pub fn new(geometry: &Geometry, padded_size: usize, payload_size: usize) -> Self {
        match geometry.stokes {
            Stokes::I => Layout::StokesI {
                channels: geometry.channels,
                padded_size,
                payload_size,
            },
            Stokes::Iquv => Layout::StokesIquv {
                channels: geometry.channels,
                samples: geometry.samples,
            },
        }
    }

    /// Bytes needed to hold every tab of one segment
    pub fn page_size(&self, tabs: usize) -> usize {
        match *self {
            Layout::StokesI {
                channels,
                padded_size,
                ..
            } => tabs * channels * padded_size,
            Layout::StokesIquv { channels, samples } => {
                tabs * samples * IQUV_COMPONENTS * channels
            }
        }
    }

    /// Byte offset of the chunk a Stokes I packet occupies
    pub fn stokes_i_offset(
        channels: usize,
        padded_size: usize,
        payload_size: usize,
        slot: SlotAddr,
    ) -> usize {
        (slot.tab * channels + slot.channel) * padded_size + slot.sequence * payload_size
    }

    /// Byte offset of `[tab][time][component][0]` in a Stokes IQUV page
    pub fn iquv_offset(
        channels: usize,
        samples: usize,
        tab: usize,
        time: usize,
        component: usize,
    ) -> usize {
        ((tab * samples + time) * IQUV_COMPONENTS + component) * channels
    }

    /// Copy `payload` into its place in `page`
    pub fn write(&self, page: &mut [u8], slot: SlotAddr, payload: &[u8]) {
        match *self {
            Layout::StokesI {
                channels,
                padded_size,
                payload_size,
            } => {
                let start = Self::stokes_i_offset(channels, padded_size, payload_size, slot);
                page[start..start + payload_size].copy_from_slice(&payload[..payload_size]);
            }
            Layout::StokesIquv { channels, samples } => {
                let first = slot.sequence * IQUV_SAMPLES_PER_PACKET;
                let per_time = IQUV_CHANNELS_PER_PACKET * IQUV_COMPONENTS;
                for (t, sample) in payload.chunks_exact(per_time).enumerate() {
                    let row = Self::iquv_offset(channels, samples, slot.tab, first + t, 0);
                    for (c, components) in sample.chunks_exact(IQUV_COMPONENTS).enumerate() {
                        for (p, &byte) in components.iter().enumerate() {
                            page[row + p * channels + slot.channel + c] = byte;
                        }
                    }
                }
            }
        }
    }

    /// Set every byte a packet at `slot` would occupy to `byte`
    pub fn fill(&self, page: &mut [u8], slot: SlotAddr, byte: u8) {
        match *self {
            Layout::StokesI {
                channels,
                padded_size,
                payload_size,
            } => {
                let start = Self::stokes_i_offset(channels, padded_size, payload_size, slot);
                page[start..start + payload_size].fill(byte);
            }
            Layout::StokesIquv { channels, samples } => {
                let first = slot.sequence * IQUV_SAMPLES_PER_PACKET;
                for t in 0..IQUV_SAMPLES_PER_PACKET {
                    for p in 0..IQUV_COMPONENTS {
                        let start = Self::iquv_offset(channels, samples, slot.tab, first + t, p)
                            + slot.channel;
                        page[start..start + IQUV_CHANNELS_PER_PACKET].fill(byte);
                    }
                }
            }
        }
    }
}
