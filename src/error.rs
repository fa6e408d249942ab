//! Everything that can end a run early

use std::{io, path::PathBuf};

use thiserror::Error;

/// Bad settings, caught before any socket or shared memory is touched
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("science case {0} not supported (expected 3 or 4)")]
    ScienceCase(u8),
    #[error("science mode {0} not supported (expected 0 through 3)")]
    ScienceMode(u8),
    #[error("run duration must be at least one second")]
    Duration,
    #[error("a {duration} s run from {start} overflows the timestamp range")]
    RunWindow { start: u64, duration: u64 },
    #[error("padded size {padded} is smaller than the {samples} samples per segment")]
    PaddedSize { padded: usize, samples: usize },
    #[error("at least one PSRDADA key is required")]
    NoKeys,
    #[error("got {headers} header files for {keys} keys")]
    HeaderCount { headers: usize, keys: usize },
    #[error("pass-through routing takes exactly one key, got {0}")]
    PassThroughKeys(usize),
    #[error("a compound beam filter only applies to pass-through routing")]
    BeamWithLearned,
    #[error("ring buffer of stream {stream} has {actual} byte pages, need at least {required}")]
    PageTooSmall {
        stream: usize,
        actual: usize,
        required: usize,
    },
    #[error("couldn't read header file {path}: {source}")]
    HeaderFile { path: PathBuf, source: io::Error },
    #[error("malformed header entry on line {line}: {reason}")]
    HeaderEntry { line: usize, reason: &'static str },
}

/// Socket failures. The feed is real-time so none of these are retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("couldn't bind UDP port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("couldn't set socket option {option}: {source}")]
    SocketOption {
        option: &'static str,
        source: io::Error,
    },
    #[error("batched receive failed: {0}")]
    Receive(io::Error),
    #[error("batched receive returned {got} packets, requested {requested}")]
    ShortBatch { got: usize, requested: usize },
    #[error("datagram truncated to the {0} byte receive slot")]
    Truncated(usize),
    #[cfg(test)]
    #[error("packet source exhausted")]
    Exhausted,
}

/// The producer and this process disagree about the wire format
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("packet of {len} bytes is shorter than its {needed} byte header + payload")]
    Truncated { len: usize, needed: usize },
    #[error("marker byte {found:#04x}, expected {expected:#04x}")]
    Marker { found: u8, expected: u8 },
    #[error("format version {found}, expected {expected}")]
    Version { found: u8, expected: u8 },
    #[error("payload size {found}, expected {expected}")]
    PayloadSize { found: u16, expected: u16 },
    #[error("tab index {tab} out of range for {tabs} tabs")]
    Tab { tab: u8, tabs: usize },
    #[error("channel index {channel} out of range for {channels} channels")]
    Channel { channel: u16, channels: usize },
    #[error("channel index {channel} is not a multiple of {step}")]
    ChannelAlignment { channel: u16, step: usize },
    #[error("sequence number {sequence} out of range for {sequences} per segment")]
    Sequence { sequence: u8, sequences: usize },
    #[error("compound beam {found}, expected {expected}")]
    Beam { found: u8, expected: u8 },
    #[error("band {0} was not seen during pre-roll")]
    UnknownBand(u8),
    #[error("saw {found} distinct bands during pre-roll, configured for {expected} streams")]
    StreamCount { found: usize, expected: usize },
}

/// The consumer side is stalled or misconfigured
#[derive(Debug, Error)]
pub enum RingBufferError {
    #[error("couldn't connect to ring buffer {key:x}: {reason}")]
    Connect { key: i32, reason: String },
    #[error("couldn't publish header: {0}")]
    Header(String),
    #[error("couldn't acquire a page: {0}")]
    Acquire(String),
    #[error("no page in flight")]
    NoPage,
    #[error("couldn't mark page filled: {0}")]
    MarkFilled(String),
    #[error("ring buffer writer stopped: {0}")]
    Writer(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("ring buffer error: {0}")]
    RingBuffer(#[from] RingBufferError),
    #[error("first packet after pre-roll ({first}) is already past the end of the run ({end})")]
    WindowElapsed { first: u64, end: u64 },
}
