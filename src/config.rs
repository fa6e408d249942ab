//! Run configuration, derived once from the parsed settings and never mutated

use std::path::PathBuf;

use crate::{
    error::{ConfigError, ProtocolError},
    layout::Layout,
    packet::{PacketHeader, FORMAT_VERSION, PAYLOAD_SIZE_I, PAYLOAD_SIZE_IQUV},
    recovery::FillMode,
    router::RoutingMode,
    scheduler::RunWindow,
};

/// Frequency channels per compound beam
pub const CHANNELS: usize = 1536;
/// Timestamp ticks (1.28 us) per second
pub const TICKS_PER_SECOND: u64 = 781_250;
/// One segment (ring buffer page) is 1.024 s of data
pub const SEGMENT_TICKS: u64 = 800_000;
/// Time samples per packet in Stokes IQUV mode
pub const IQUV_SAMPLES_PER_PACKET: usize = 500;
/// Channels per packet in Stokes IQUV mode
pub const IQUV_CHANNELS_PER_PACKET: usize = 4;
/// I, Q, U, V
pub const IQUV_COMPONENTS: usize = 4;
/// Default socket receive buffer (32 MiB)
pub const SOCKET_BUFFER: usize = 33_554_432;

/// The process configuration surface, as handed over by the command line
#[derive(Debug, Clone)]
pub struct Settings {
    pub science_case: u8,
    pub science_mode: u8,
    /// First timestamp (in ticks) to write
    pub start: u64,
    /// Run length in seconds
    pub duration: u64,
    pub port: u16,
    /// Stride in bytes of one channel row in Stokes I mode
    pub padded_size: usize,
    /// One PSRDADA key per destination stream
    pub keys: Vec<i32>,
    /// Either one shared header file or one per key
    pub headers: Vec<PathBuf>,
    pub fill: FillMode,
    pub routing: RoutingMode,
    /// Only accept packets from this compound beam
    pub beam: Option<u8>,
    pub socket_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stokes {
    I,
    Iquv,
}

/// Where one packet lives within a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAddr {
    pub tab: usize,
    /// First channel carried by the packet
    pub channel: usize,
    pub sequence: usize,
}

/// The shape of one segment of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub stokes: Stokes,
    pub tabs: usize,
    pub channels: usize,
    pub channels_per_packet: usize,
    /// Time samples per segment
    pub samples: usize,
    pub samples_per_packet: usize,
}

impl Geometry {
    /// Distinct sequence numbers per segment
    pub fn sequences(&self) -> usize {
        self.samples / self.samples_per_packet
    }

    pub fn channel_groups(&self) -> usize {
        self.channels / self.channels_per_packet
    }

    /// Packets that make up one complete segment
    pub fn slots(&self) -> usize {
        self.tabs * self.channel_groups() * self.sequences()
    }

    pub fn slot_index(&self, slot: SlotAddr) -> usize {
        let group = slot.channel / self.channels_per_packet;
        (slot.tab * self.channel_groups() + group) * self.sequences() + slot.sequence
    }

    pub fn slot_addr(&self, index: usize) -> SlotAddr {
        let sequence = index % self.sequences();
        let rest = index / self.sequences();
        SlotAddr {
            tab: rest / self.channel_groups(),
            channel: (rest % self.channel_groups()) * self.channels_per_packet,
            sequence,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub science_case: u8,
    pub science_mode: u8,
    pub marker: u8,
    pub payload_size: usize,
    pub geometry: Geometry,
    pub padded_size: usize,
    pub start: u64,
    pub end: u64,
    pub segment_ticks: u64,
    pub streams: usize,
    pub routing: RoutingMode,
    pub fill: FillMode,
    pub beam: Option<u8>,
}

impl RunConfig {
    pub fn derive(settings: &Settings) -> Result<Self, ConfigError> {
        let (samples, marker_base) = match settings.science_case {
            3 => (12_500, 0xD0),
            4 => (25_000, 0xE0),
            c => return Err(ConfigError::ScienceCase(c)),
        };
        let (stokes, tabs) = match settings.science_mode {
            0 => (Stokes::I, 12),
            1 => (Stokes::Iquv, 12),
            2 => (Stokes::I, 1),
            3 => (Stokes::Iquv, 1),
            m => return Err(ConfigError::ScienceMode(m)),
        };
        let (payload_size, channels_per_packet, samples_per_packet) = match stokes {
            Stokes::I => (PAYLOAD_SIZE_I, 1, PAYLOAD_SIZE_I),
            Stokes::Iquv => (
                PAYLOAD_SIZE_IQUV,
                IQUV_CHANNELS_PER_PACKET,
                IQUV_SAMPLES_PER_PACKET,
            ),
        };
        if settings.duration == 0 {
            return Err(ConfigError::Duration);
        }
        // Leave room for the straggler segment past the end
        let end = settings
            .duration
            .checked_mul(TICKS_PER_SECOND)
            .and_then(|ticks| settings.start.checked_add(ticks))
            .filter(|end| end.checked_add(2 * SEGMENT_TICKS).is_some())
            .ok_or(ConfigError::RunWindow {
                start: settings.start,
                duration: settings.duration,
            })?;
        if stokes == Stokes::I && settings.padded_size < samples {
            return Err(ConfigError::PaddedSize {
                padded: settings.padded_size,
                samples,
            });
        }
        let streams = settings.keys.len();
        if streams == 0 {
            return Err(ConfigError::NoKeys);
        }
        if settings.headers.len() != 1 && settings.headers.len() != streams {
            return Err(ConfigError::HeaderCount {
                headers: settings.headers.len(),
                keys: streams,
            });
        }
        match settings.routing {
            RoutingMode::PassThrough if streams != 1 => {
                return Err(ConfigError::PassThroughKeys(streams))
            }
            RoutingMode::Learned if settings.beam.is_some() => {
                return Err(ConfigError::BeamWithLearned)
            }
            _ => (),
        }
        Ok(Self {
            science_case: settings.science_case,
            science_mode: settings.science_mode,
            marker: marker_base | settings.science_mode,
            payload_size,
            geometry: Geometry {
                stokes,
                tabs,
                channels: CHANNELS,
                channels_per_packet,
                samples,
                samples_per_packet,
            },
            padded_size: settings.padded_size,
            start: settings.start,
            end,
            segment_ticks: SEGMENT_TICKS,
            streams,
            routing: settings.routing,
            fill: settings.fill,
            beam: settings.beam,
        })
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.geometry, self.padded_size, self.payload_size)
    }

    /// Smallest ring buffer page that holds one segment
    pub fn page_size(&self) -> usize {
        self.layout().page_size(self.geometry.tabs)
    }

    /// Pages per stream, lost segments included
    pub fn pages(&self) -> u64 {
        (self.end - self.start).div_ceil(self.segment_ticks)
    }

    pub fn window(&self) -> RunWindow {
        RunWindow {
            start: self.start,
            pages: self.pages(),
            segment: self.segment_ticks,
        }
    }

    /// Check a decoded header against this run, returning where it belongs in the segment
    pub fn validate_packet(&self, header: &PacketHeader) -> Result<SlotAddr, ProtocolError> {
        if header.marker != self.marker {
            return Err(ProtocolError::Marker {
                found: header.marker,
                expected: self.marker,
            });
        }
        if header.version != FORMAT_VERSION {
            return Err(ProtocolError::Version {
                found: header.version,
                expected: FORMAT_VERSION,
            });
        }
        if header.payload_size as usize != self.payload_size {
            return Err(ProtocolError::PayloadSize {
                found: header.payload_size,
                expected: self.payload_size as u16,
            });
        }
        if let Some(beam) = self.beam {
            if header.beam != beam {
                return Err(ProtocolError::Beam {
                    found: header.beam,
                    expected: beam,
                });
            }
        }
        let geom = &self.geometry;
        if header.tab as usize >= geom.tabs {
            return Err(ProtocolError::Tab {
                tab: header.tab,
                tabs: geom.tabs,
            });
        }
        if header.channel as usize >= geom.channels {
            return Err(ProtocolError::Channel {
                channel: header.channel,
                channels: geom.channels,
            });
        }
        if header.channel as usize % geom.channels_per_packet != 0 {
            return Err(ProtocolError::ChannelAlignment {
                channel: header.channel,
                step: geom.channels_per_packet,
            });
        }
        if header.sequence as usize >= geom.sequences() {
            return Err(ProtocolError::Sequence {
                sequence: header.sequence,
                sequences: geom.sequences(),
            });
        }
        Ok(SlotAddr {
            tab: header.tab as usize,
            channel: header.channel as usize,
            sequence: header.sequence as usize,
        })
    }
}
