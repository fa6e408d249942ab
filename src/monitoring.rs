//! In this module, we implement all the monitoring logic for the packet capture.
//! Every closed page gets a completeness report, and the whole run is summed up
//! for the end-of-run report. None of this is persisted.

use tracing::{info, warn};

/// Completeness of one page of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentReport {
    /// Timestamp of the segment
    pub segment: u64,
    pub stream: usize,
    pub received: usize,
    pub expected: usize,
    pub duplicates: usize,
    /// Slots rewritten by the fill policy
    pub filled: usize,
}

impl SegmentReport {
    pub fn missing(&self) -> usize {
        self.expected - self.received
    }

    /// Received packets as a percentage of expected
    pub fn percent(&self) -> f64 {
        100.0 * self.received as f64 / self.expected as f64
    }

    pub fn log(&self) {
        if self.missing() == 0 {
            info!(
                segment = self.segment,
                stream = self.stream,
                received = self.received,
                "Page complete (100.00%)"
            );
        } else {
            warn!(
                segment = self.segment,
                stream = self.stream,
                received = self.received,
                expected = self.expected,
                duplicates = self.duplicates,
                filled = self.filled,
                "Page {:.2}% complete",
                self.percent()
            );
        }
    }
}

/// Totals over the whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub pages: u64,
    pub received: u64,
    pub expected: u64,
    pub duplicates: u64,
    pub filled: u64,
    /// Packets for pages that were already handed off
    pub late: u64,
    /// Packets seen before the start of the run
    pub pre_roll: u64,
}

impl RunStats {
    pub fn add(&mut self, report: &SegmentReport) {
        self.pages += 1;
        self.received += report.received as u64;
        self.expected += report.expected as u64;
        self.duplicates += report.duplicates as u64;
        self.filled += report.filled as u64;
    }

    pub fn missing(&self) -> u64 {
        self.expected - self.received
    }

    pub fn log_summary(&self) {
        let percent = if self.expected == 0 {
            0.0
        } else {
            100.0 * self.received as f64 / self.expected as f64
        };
        info!(
            pages = self.pages,
            received = self.received,
            expected = self.expected,
            missing = self.missing(),
            duplicates = self.duplicates,
            filled = self.filled,
            late = self.late,
            pre_roll = self.pre_roll,
            "Run summary: {:.3}% of packets received",
            percent
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let mut stats = RunStats::default();
        let report = SegmentReport {
            segment: 0,
            stream: 0,
            received: 90,
            expected: 100,
            duplicates: 2,
            filled: 10,
        };
        assert_eq!(report.missing(), 10);
        assert!((report.percent() - 90.0).abs() < 1e-9);
        stats.add(&report);
        stats.add(&SegmentReport {
            received: 100,
            duplicates: 0,
            filled: 0,
            ..report
        });
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.missing(), 10);
        assert_eq!(stats.duplicates, 2);
        assert_eq!(stats.filled, 10);
    }
}
