//! Copy progress estimation.
//!
//! Throughput is a moving average over the completion times of the last
//! [`WINDOW_SLOTS`] blocks. Everything here is numeric; drawing a bar is the
//! caller's business.

use std::time::{Duration, Instant};

/// Number of completion timestamps kept by a [`ProgressWindow`].
pub const WINDOW_SLOTS: usize = 10;

/// Minimum wall time between two redraws of a progress display.
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Fixed-capacity ring of block completion timestamps.
///
/// Once full, each new timestamp overwrites the oldest one.
#[derive(Debug, Clone, Default)]
pub struct ProgressWindow {
    slots: [Option<Instant>; WINDOW_SLOTS],
    next: usize,
    len: usize,
}

impl ProgressWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completion timestamp.
    pub fn push(&mut self, timestamp: Instant) {
        self.slots[self.next] = Some(timestamp);
        self.next = (self.next + 1) % WINDOW_SLOTS;
        self.len = (self.len + 1).min(WINDOW_SLOTS);
    }

    /// Most recent timestamp.
    pub fn newest(&self) -> Option<Instant> {
        if self.len == 0 {
            return None;
        }
        self.slots[(self.next + WINDOW_SLOTS - 1) % WINDOW_SLOTS]
    }

    /// Oldest timestamp still in the window.
    pub fn oldest(&self) -> Option<Instant> {
        if self.len == 0 {
            return None;
        }
        self.slots[(self.next + WINDOW_SLOTS - self.len) % WINDOW_SLOTS]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Transfer rate over the current window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    BytesPerSec(f64),
    /// Too few samples, or the window closed within one clock tick.
    Indeterminate,
}

impl Rate {
    /// Bytes per second, if known.
    pub fn bytes_per_sec(&self) -> Option<f64> {
        match self {
            Rate::BytesPerSec(rate) => Some(*rate),
            Rate::Indeterminate => None,
        }
    }
}

/// Throughput and time remaining at a given block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub rate: Rate,
    /// Omitted whenever the rate is indeterminate.
    pub eta: Option<Duration>,
}

/// Moving-average rate and ETA over a copy of `block_count` blocks.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    window: ProgressWindow,
    block_count: u64,
}

impl ProgressEstimator {
    pub fn new(block_count: u64) -> Self {
        Self {
            window: ProgressWindow::new(),
            block_count,
        }
    }

    /// Record that `block_index` finished at `timestamp`.
    pub fn observe(&mut self, _block_index: u64, timestamp: Instant) {
        self.window.push(timestamp);
    }

    /// Rate and ETA after `block_index` has completed.
    pub fn rate_estimate(&self, block_index: u64, block_size: u32) -> Estimate {
        let (Some(oldest), Some(newest)) = (self.window.oldest(), self.window.newest()) else {
            return Estimate::indeterminate();
        };

        let intervals = self.window.len().saturating_sub(1);
        let delta = newest.saturating_duration_since(oldest).as_secs_f64();
        if intervals == 0 || delta <= 0.0 {
            return Estimate::indeterminate();
        }

        let blocks_per_sec = intervals as f64 / delta;
        let remaining = self.block_count.saturating_sub(block_index + 1);
        let eta_secs = (remaining as f64 / blocks_per_sec).round();

        Estimate {
            rate: Rate::BytesPerSec(blocks_per_sec * block_size as f64),
            eta: Some(Duration::from_secs(eta_secs as u64)),
        }
    }

    /// Percentage of blocks done once `block_index` has completed.
    pub fn percent_complete(&self, block_index: u64) -> f64 {
        percent_of(block_index + 1, self.block_count)
    }

    #[inline]
    pub fn block_count(&self) -> u64 {
        self.block_count
    }
}

impl Estimate {
    fn indeterminate() -> Self {
        Self {
            rate: Rate::Indeterminate,
            eta: None,
        }
    }
}

fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done.min(total) as f64 / total as f64) * 100.0
}

/// Progress snapshot handed to a [`ProgressCallback`] after each block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyProgress {
    /// Logical block that just completed.
    pub block_index: u64,
    /// Total logical blocks in the image.
    pub block_count: u64,
    /// Logical disk bytes up to the end of `block_index`.
    pub bytes_processed: u64,
    /// Logical disk size.
    pub bytes_total: u64,
    pub rate: Rate,
    pub eta: Option<Duration>,
}

impl CopyProgress {
    /// Calculate overall percentage complete.
    pub fn percent_complete(&self) -> f64 {
        percent_of(self.block_index + 1, self.block_count)
    }
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(CopyProgress) + Send>;

/// Throttle for redrawing a progress display.
#[derive(Debug, Clone)]
pub struct RefreshGate {
    interval: Duration,
    last: Option<Instant>,
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new(REFRESH_INTERVAL)
    }
}

impl RefreshGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns true, and restarts the interval, if a redraw is due at `now`.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
