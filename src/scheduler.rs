//! Cutting the packet stream into ring buffer pages.
//!
//! All packets of one segment of one stream carry the same timestamp, so a newer
//! timestamp means that stream's page is done. [`RunWindow`] decides where the run
//! starts and stops; every destination stream then gets its own [`SegmentScheduler`]
//! so bands that interleave across a segment boundary don't cut each other's pages
//! short. Neither touches a page, they only tell the run controller what to do.

/// Where the run sits on the timestamp axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    /// Configured start, not necessarily on a segment boundary
    pub start: u64,
    /// Pages per stream
    pub pages: u64,
    pub segment: u64,
}

impl RunWindow {
    /// The segment starting at `timestamp` ends at or before the start of the run
    pub fn is_pre_roll(&self, timestamp: u64) -> bool {
        timestamp.saturating_add(self.segment) <= self.start
    }

    /// First page of the run, on the segment grid of `timestamp`: the segment that
    /// contains `start`. Only meaningful for timestamps that aren't pre-roll.
    pub fn anchor(&self, timestamp: u64) -> u64 {
        if timestamp <= self.start {
            return timestamp;
        }
        let back = (timestamp - self.start)
            .div_ceil(self.segment)
            .min(timestamp / self.segment);
        timestamp - back * self.segment
    }

    /// Timestamp of the first segment past the run
    pub fn stop(&self, anchor: u64) -> u64 {
        anchor + self.pages * self.segment
    }

    /// Packets this late mean no stream is going to deliver anything for the run anymore
    pub fn deadline(&self, stop: u64) -> u64 {
        stop + self.segment
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No page open yet
    Idle,
    Streaming { current: u64 },
    Finished,
}

/// Pages to close before the packet that triggered them can be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Timestamp of the segment being closed
    pub closed: u64,
    /// Whole segments after `closed` that never saw a packet
    pub skipped: u64,
    /// The last closed page ends the run
    pub finished: bool,
}

impl Advance {
    /// Pages closed by this advance
    pub fn pages(&self) -> u64 {
        1 + self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Belongs to the current page
    Write,
    /// Belongs to a page that has already been handed off
    Late,
    Advance(Advance),
    /// Not streaming, nothing to do
    Done,
}

#[derive(Debug, Clone)]
pub struct SegmentScheduler {
    segment: u64,
    stop: u64,
    phase: Phase,
}

impl SegmentScheduler {
    pub fn new(segment: u64) -> Self {
        Self {
            segment,
            stop: 0,
            phase: Phase::Idle,
        }
    }

    /// Open the first page at `anchor`. The run ends with the page before `stop`.
    pub fn begin(&mut self, anchor: u64, stop: u64) {
        self.stop = stop;
        self.phase = if anchor < stop {
            Phase::Streaming { current: anchor }
        } else {
            Phase::Finished
        };
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn observe(&mut self, timestamp: u64) -> Step {
        let Phase::Streaming { current } = self.phase else {
            return Step::Done;
        };
        if timestamp == current {
            return Step::Write;
        }
        if timestamp < current {
            return Step::Late;
        }
        // Segments strictly between the closed one and whichever comes first:
        // the new packet or the end of the run
        let horizon = timestamp.min(self.stop);
        let skipped = (horizon - current).div_ceil(self.segment) - 1;
        let finished = timestamp >= self.stop;
        self.phase = if finished {
            Phase::Finished
        } else {
            Phase::Streaming { current: timestamp }
        };
        Step::Advance(Advance {
            closed: current,
            skipped,
            finished,
        })
    }

    /// Close the open page and every page left until the end of the run
    pub fn finish(&mut self) -> Option<Advance> {
        let Phase::Streaming { current } = self.phase else {
            return None;
        };
        self.phase = Phase::Finished;
        Some(Advance {
            closed: current,
            skipped: (self.stop - current).div_ceil(self.segment) - 1,
            finished: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEG: u64 = 800_000;
    const TICKS_PER_SECOND: u64 = 781_250;

    fn window(start: u64, seconds: u64) -> RunWindow {
        RunWindow {
            start,
            pages: (seconds * TICKS_PER_SECOND).div_ceil(SEG),
            segment: SEG,
        }
    }

    /// Drive a single stream through `timestamps` the way the run controller does,
    /// returning the pages handed off and whether the last one ended the run
    fn count_pages(window: &RunWindow, timestamps: &[u64]) -> Option<(u64, bool)> {
        let mut scheduler = SegmentScheduler::new(window.segment);
        let mut pages = 0;
        let mut finished = false;
        for &ts in timestamps {
            if scheduler.phase() == Phase::Idle {
                if window.is_pre_roll(ts) {
                    continue;
                }
                let anchor = window.anchor(ts);
                if ts >= window.stop(anchor) {
                    return None;
                }
                scheduler.begin(anchor, window.stop(anchor));
            }
            match scheduler.observe(ts) {
                Step::Advance(a) => {
                    pages += a.pages();
                    finished = a.finished;
                }
                Step::Done => break,
                _ => (),
            }
        }
        Some((pages, finished))
    }

    #[test]
    fn test_phases() {
        let mut s = SegmentScheduler::new(SEG);
        assert_eq!(s.observe(10 * SEG), Step::Done);
        s.begin(10 * SEG, 13 * SEG);
        assert_eq!(s.observe(10 * SEG), Step::Write);
        assert_eq!(
            s.observe(11 * SEG),
            Step::Advance(Advance {
                closed: 10 * SEG,
                skipped: 0,
                finished: false
            })
        );
        assert_eq!(s.observe(10 * SEG), Step::Late);
        assert_eq!(s.observe(11 * SEG), Step::Write);
        assert_eq!(
            s.observe(12 * SEG),
            Step::Advance(Advance {
                closed: 11 * SEG,
                skipped: 0,
                finished: false
            })
        );
        assert_eq!(
            s.observe(13 * SEG),
            Step::Advance(Advance {
                closed: 12 * SEG,
                skipped: 0,
                finished: true
            })
        );
        assert!(s.is_finished());
        assert_eq!(s.observe(14 * SEG), Step::Done);
    }

    #[test]
    fn test_skipped_segments() {
        let mut s = SegmentScheduler::new(SEG);
        s.begin(0, 10 * SEG);
        assert_eq!(
            s.observe(4 * SEG),
            Step::Advance(Advance {
                closed: 0,
                skipped: 3,
                finished: false
            })
        );
        // Skipping past the end only counts segments inside the run
        assert_eq!(
            s.observe(50 * SEG),
            Step::Advance(Advance {
                closed: 4 * SEG,
                skipped: 5,
                finished: true
            })
        );
    }

    #[test]
    fn test_finish_closes_the_rest() {
        let mut s = SegmentScheduler::new(SEG);
        s.begin(0, 5 * SEG);
        s.observe(SEG);
        assert_eq!(
            s.finish(),
            Some(Advance {
                closed: SEG,
                skipped: 3,
                finished: true
            })
        );
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn test_pre_roll_and_anchor() {
        let start = 1_000 * SEG + 100;
        let w = window(start, 3);
        assert!(w.is_pre_roll(999 * SEG));
        assert!(!w.is_pre_roll(1_000 * SEG));
        // The segment that contains the start, whichever packet shows up first
        assert_eq!(w.anchor(1_000 * SEG), 1_000 * SEG);
        assert_eq!(w.anchor(1_001 * SEG), 1_000 * SEG);
        assert_eq!(w.anchor(1_002 * SEG), 1_000 * SEG);
        assert_eq!(w.stop(1_000 * SEG), 1_003 * SEG);
        let aligned = window(1_000 * SEG, 3);
        assert_eq!(aligned.anchor(1_000 * SEG), 1_000 * SEG);
        assert_eq!(aligned.anchor(1_002 * SEG), 1_000 * SEG);
        assert!(aligned.is_pre_roll(999 * SEG));
    }

    #[test]
    fn test_page_count_matches_run_length() {
        // 3 s of ticks is 2.9296875 segments
        for seconds in [1u64, 3, 7] {
            for offset in [0, 100, SEG / 2, SEG - 1] {
                let start = 1_000 * SEG + offset;
                let w = window(start, seconds);
                let expected = (seconds * TICKS_PER_SECOND).div_ceil(SEG);
                let timestamps: Vec<u64> = (999..1_020).map(|k| k * SEG).collect();
                assert_eq!(count_pages(&w, &timestamps), Some((expected, true)));
                // Same answer when whole segments go missing
                let sparse: Vec<u64> = timestamps
                    .iter()
                    .copied()
                    .enumerate()
                    .filter(|(k, _)| *k == 0 || k % 2 == 1)
                    .map(|(_, ts)| ts)
                    .collect();
                assert_eq!(count_pages(&w, &sparse), Some((expected, true)));
            }
        }
    }

    #[test]
    fn test_idempotent() {
        let timestamps = [5, 5, 9, SEG, SEG, 3 * SEG, SEG, 3 * SEG, 4 * SEG, 9 * SEG];
        let run = |ts: &[u64]| {
            let mut s = SegmentScheduler::new(SEG);
            s.begin(SEG, 6 * SEG);
            ts.iter().map(|&t| s.observe(t)).collect::<Vec<_>>()
        };
        assert_eq!(run(&timestamps), run(&timestamps));
    }

    #[test]
    fn test_missed_window() {
        let w = window(SEG, 1);
        assert!(w.is_pre_roll(0));
        assert_eq!(count_pages(&w, &[0, 2 * SEG]), None);
        // An unaligned start still gets its single page from the segment holding it
        let w = window(1_000 * SEG + 100, 1);
        assert_eq!(
            count_pages(&w, &[999 * SEG, 1_000 * SEG, 1_001 * SEG]),
            Some((1, true))
        );
    }
}
