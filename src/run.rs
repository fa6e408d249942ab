//! The run controller: everything from the first packet to the end-of-data page

use tracing::{debug, info, warn};

use crate::{
    capture::PacketSource,
    config::{Geometry, RunConfig, SlotAddr},
    error::{ConfigError, Error, RingBufferError},
    header::Header,
    layout::Layout,
    monitoring::{RunStats, SegmentReport},
    packet::{Packet, PacketHeader},
    recovery::{Arrival, Recovery, SegmentTracker},
    ringbuffer::RingBuffer,
    router::StreamRouter,
    scheduler::{Advance, RunWindow, SegmentScheduler, Step},
};

/// One output stream and the state of its in-flight page
pub struct Destination<R> {
    ring: R,
    scheduler: SegmentScheduler,
    tracker: SegmentTracker,
    recovery: Recovery,
    duplicates: usize,
}

impl<R: RingBuffer> Destination<R> {
    /// Repair, report and hand off the in-flight page
    fn close_page(
        &mut self,
        stream: usize,
        segment: u64,
        geometry: &Geometry,
        layout: &Layout,
        last: bool,
    ) -> Result<SegmentReport, RingBufferError> {
        let page = self.ring.page_mut()?;
        let filled = self.recovery.close_segment(&self.tracker, geometry, layout, page);
        let report = SegmentReport {
            segment,
            stream,
            received: self.tracker.received(),
            expected: self.tracker.expected(),
            duplicates: self.duplicates,
            filled,
        };
        let size = self.ring.page_size();
        if last {
            self.ring.mark_end_of_data(size)?;
        } else {
            self.ring.mark_filled(size)?;
        }
        self.tracker.reset();
        self.duplicates = 0;
        Ok(report)
    }
}

enum Flow {
    Continue,
    Finished,
}

/// Everything downstream of the packet source
struct Pipeline<R> {
    config: RunConfig,
    layout: Layout,
    router: StreamRouter,
    window: RunWindow,
    /// First segment past the run, known once the first page is open
    stop: Option<u64>,
    destinations: Vec<Destination<R>>,
    stats: RunStats,
}

impl<R: RingBuffer> Pipeline<R> {
    fn handle(&mut self, packet: &Packet) -> Result<Flow, Error> {
        let header = &packet.header;
        let slot = self.config.validate_packet(header)?;
        let ts = header.timestamp;
        let stop = match self.stop {
            Some(stop) => stop,
            None if self.window.is_pre_roll(ts) => {
                self.router.observe(header);
                self.stats.pre_roll += 1;
                return Ok(Flow::Continue);
            }
            None => self.begin(header)?,
        };
        if ts >= self.window.deadline(stop) {
            // Whatever hasn't finished by now never will
            for stream in 0..self.destinations.len() {
                if let Some(advance) = self.destinations[stream].scheduler.finish() {
                    warn!(stream, "No data up to the end of the run");
                    self.advance(stream, advance)?;
                }
            }
            info!(timestamp = ts, "End of run");
            return Ok(Flow::Finished);
        }
        let stream = self.router.route(header)?;
        match self.destinations[stream].scheduler.observe(ts) {
            Step::Write => self.write(stream, packet, slot)?,
            Step::Late => {
                debug!(timestamp = ts, stream, "Late packet");
                self.stats.late += 1;
            }
            Step::Advance(advance) => {
                self.advance(stream, advance)?;
                if !advance.finished {
                    self.write(stream, packet, slot)?;
                } else if self.destinations.iter().all(|d| d.scheduler.is_finished()) {
                    info!(timestamp = ts, "End of run");
                    return Ok(Flow::Finished);
                }
            }
            Step::Done => (),
        }
        Ok(Flow::Continue)
    }

    /// Freeze the routing and open the first page of every stream, returning where the run stops
    fn begin(&mut self, header: &PacketHeader) -> Result<u64, Error> {
        let ts = header.timestamp;
        let anchor = self.window.anchor(ts);
        let stop = self.window.stop(anchor);
        if ts >= stop {
            return Err(Error::WindowElapsed {
                first: ts,
                end: stop,
            });
        }
        if ts != anchor {
            warn!(
                timestamp = ts,
                start = self.window.start,
                "First packet is later than the configured start"
            );
        }
        self.router.observe(header);
        self.router.freeze()?;
        for dest in &mut self.destinations {
            dest.scheduler.begin(anchor, stop);
            dest.ring.acquire_page()?;
        }
        info!(
            anchor,
            stop,
            pre_roll = self.stats.pre_roll,
            "Start of run"
        );
        self.stop = Some(stop);
        Ok(stop)
    }

    fn write(&mut self, stream: usize, packet: &Packet, slot: SlotAddr) -> Result<(), Error> {
        let dest = &mut self.destinations[stream];
        match dest.tracker.record(self.config.geometry.slot_index(slot)) {
            Arrival::Duplicate => dest.duplicates += 1,
            Arrival::Fresh => {
                let page = dest.ring.page_mut()?;
                self.layout.write(page, slot, packet.payload);
                dest.recovery.remember(packet.payload);
            }
        }
        Ok(())
    }

    /// Close the current page of `stream` and any skipped ones, then open the next
    /// unless the stream is done
    fn advance(&mut self, stream: usize, advance: Advance) -> Result<(), Error> {
        let dest = &mut self.destinations[stream];
        let pages = advance.pages();
        for k in 0..pages {
            let segment = advance.closed + k * self.config.segment_ticks;
            let last = advance.finished && k + 1 == pages;
            let report =
                dest.close_page(stream, segment, &self.config.geometry, &self.layout, last)?;
            report.log();
            self.stats.add(&report);
            if !last {
                dest.ring.acquire_page()?;
            }
        }
        Ok(())
    }
}

/// Owns every resource of a run. Dropping it closes the socket and ring buffers.
pub struct RunContext<S, R> {
    source: S,
    pipeline: Pipeline<R>,
}

impl<S: PacketSource, R: RingBuffer> RunContext<S, R> {
    /// Check every ring buffer is big enough and publish the headers.
    ///
    /// `rings` holds one ring buffer per stream. `headers` holds either one header per
    /// stream, or a single header that every stream shares.
    pub fn new(
        config: RunConfig,
        source: S,
        rings: Vec<R>,
        headers: &[Header],
    ) -> Result<Self, Error> {
        if headers.is_empty() || (headers.len() != 1 && headers.len() != rings.len()) {
            return Err(ConfigError::HeaderCount {
                headers: headers.len(),
                keys: rings.len(),
            }
            .into());
        }
        let required = config.page_size();
        let slots = config.geometry.slots();
        let mut destinations = Vec::with_capacity(rings.len());
        for (stream, mut ring) in rings.into_iter().enumerate() {
            if ring.page_size() < required {
                return Err(ConfigError::PageTooSmall {
                    stream,
                    actual: ring.page_size(),
                    required,
                }
                .into());
            }
            let header = headers.get(stream).unwrap_or(&headers[0]);
            ring.publish_header(header)?;
            destinations.push(Destination {
                ring,
                tracker: SegmentTracker::new(slots),
                scheduler: SegmentScheduler::new(config.segment_ticks),
                recovery: Recovery::new(config.fill, config.payload_size),
                duplicates: 0,
            });
        }
        info!(
            streams = destinations.len(),
            page_size = required,
            packets_per_page = slots,
            pages = config.pages(),
            fill = ?config.fill,
            "Ring buffers ready"
        );
        Ok(Self {
            source,
            pipeline: Pipeline {
                layout: config.layout(),
                router: StreamRouter::new(config.routing, config.streams),
                window: config.window(),
                stop: None,
                config,
                destinations,
                stats: RunStats::default(),
            },
        })
    }

    /// Run until the end of the observation or the first fatal error.
    /// The summary is logged either way.
    pub fn run(&mut self) -> Result<RunStats, Error> {
        let result = self.stream();
        self.pipeline.stats.log_summary();
        result.map(|_| self.pipeline.stats)
    }

    fn stream(&mut self) -> Result<(), Error> {
        loop {
            let raw = self.source.next_packet()?;
            let packet = Packet::decode(raw)?;
            if let Flow::Finished = self.pipeline.handle(&packet)? {
                return Ok(());
            }
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.pipeline.stats
    }

    pub fn ring(&self, stream: usize) -> &R {
        &self.pipeline.destinations[stream].ring
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
