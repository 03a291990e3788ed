//! # Progress — Run-Level Counters and Status Lines
//!
//! Tracks how many ranges have been handled against the collection size and
//! emits the periodic `progress` log line. Handled counts start at the size of
//! the loaded processed-set, so a resumed run reports overall completion, not
//! just this run's share.

use crate::checkpoint::RunStats;
use std::time::{Duration, Instant};
use tracing::info;

pub struct RunProgress {
    total: u64,
    handled: u64,
    report_every: u64,
    start: Instant,
}

impl RunProgress {
    pub fn new(total: u64, already_handled: u64, report_every: u32) -> Self {
        RunProgress {
            total,
            handled: already_handled,
            report_every: u64::from(report_every),
            start: Instant::now(),
        }
    }

    /// Count one dispatched range. Returns true when a status line is due.
    pub fn record_dispatch(&mut self) -> bool {
        self.handled += 1;
        self.report_every > 0 && self.handled % self.report_every == 0
    }

    pub fn handled(&self) -> u64 {
        self.handled
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.handled as f64 / self.total as f64 * 100.0
    }

    /// Whether at least `ratio` of the collection has been handled.
    pub fn near_complete(&self, ratio: f64) -> bool {
        self.handled as f64 >= self.total as f64 * ratio
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn print_status(&self, stats: &RunStats) {
        let secs = self.elapsed().as_secs();
        info!(
            handled = self.handled,
            total = self.total,
            percent = %format!("{:.1}", self.percent()),
            successful = stats.successful,
            skipped = stats.skipped,
            failed = stats.failed,
            elapsed = %format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60),
            "progress"
        );
    }
}
