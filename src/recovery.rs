//! Bookkeeping of which packets of a segment arrived, and what to do about the rest

use crate::{config::Geometry, layout::Layout};

/// What happens to slots that never received a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FillMode {
    /// Repeat the last good payload of the stream
    Repeat,
    /// Write zeros
    Zero,
    /// Leave the page as is, only count
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Fresh,
    Duplicate,
}

/// Which slots of the current segment have been written
#[derive(Debug, Clone)]
pub struct SegmentTracker {
    seen: Vec<bool>,
    received: usize,
}

impl SegmentTracker {
    pub fn new(slots: usize) -> Self {
        Self {
            seen: vec![false; slots],
            received: 0,
        }
    }

    pub fn record(&mut self, index: usize) -> Arrival {
        if std::mem::replace(&mut self.seen[index], true) {
            Arrival::Duplicate
        } else {
            self.received += 1;
            Arrival::Fresh
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn expected(&self) -> usize {
        self.seen.len()
    }

    pub fn missing(&self) -> usize {
        self.seen.len() - self.received
    }

    pub fn missing_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.seen
            .iter()
            .enumerate()
            .filter(|(_, seen)| !**seen)
            .map(|(i, _)| i)
    }

    pub fn reset(&mut self) {
        self.seen.fill(false);
        self.received = 0;
    }
}

/// Fill policy of one destination stream
#[derive(Debug, Clone)]
pub struct Recovery {
    mode: FillMode,
    /// Last good payload, only kept when repeating
    last: Vec<u8>,
    have_last: bool,
}

impl Recovery {
    pub fn new(mode: FillMode, payload_size: usize) -> Self {
        let last = match mode {
            FillMode::Repeat => vec![0u8; payload_size],
            _ => Vec::new(),
        };
        Self {
            mode,
            last,
            have_last: false,
        }
    }

    pub fn mode(&self) -> FillMode {
        self.mode
    }

    /// Keep a freshly written payload around for repeat fill
    pub fn remember(&mut self, payload: &[u8]) {
        if self.mode == FillMode::Repeat {
            let len = self.last.len();
            self.last.copy_from_slice(&payload[..len]);
            self.have_last = true;
        }
    }

    /// Apply the fill mode to every slot `tracker` didn't see, returning the number of slots written
    pub fn close_segment(
        &self,
        tracker: &SegmentTracker,
        geometry: &Geometry,
        layout: &Layout,
        page: &mut [u8],
    ) -> usize {
        match self.mode {
            FillMode::Ignore => 0,
            FillMode::Repeat if !self.have_last => 0,
            FillMode::Repeat => {
                let mut writes = 0;
                for index in tracker.missing_slots() {
                    layout.write(page, geometry.slot_addr(index), &self.last);
                    writes += 1;
                }
                writes
            }
            FillMode::Zero => {
                let mut writes = 0;
                for index in tracker.missing_slots() {
                    layout.fill(page, geometry.slot_addr(index), 0);
                    writes += 1;
                }
                writes
            }
        }
    }
}
