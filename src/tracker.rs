//! Idle tracking for dynamic pools
//!
//! The tracker watches the smallest number of free elements seen during a rolling
//! window. If the pool never ran dry during a whole window it had at least one element
//! too many, and one release in the next window is allowed to trim.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Monotonic millisecond tick source
pub(crate) trait Clock: Send + Sync {
    fn now_ticks(&self) -> u64;
}

/// Ticks elapsed from `earlier` to `now`, correct across a counter wraparound.
pub(crate) fn elapsed_ticks(now: u64, earlier: u64) -> u64 {
    now.wrapping_sub(earlier)
}

#[derive(Debug)]
pub(crate) struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ticks(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

const NOTHING_OBSERVED: usize = usize::MAX;

#[derive(Debug)]
pub(crate) struct UsedElementTracker<C: Clock = MonotonicClock> {
    window_ticks: Option<u64>,
    window_start: AtomicU64,
    min_free: AtomicUsize,
    clock: C,
}

impl UsedElementTracker<MonotonicClock> {
    pub fn new(window: Option<Duration>) -> Self {
        Self::with_clock(window, MonotonicClock::new())
    }
}

impl<C: Clock> UsedElementTracker<C> {
    pub fn with_clock(window: Option<Duration>, clock: C) -> Self {
        let window_ticks = window
            .filter(|window| !window.is_zero())
            .map(|window| u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1));

        Self {
            window_ticks,
            window_start: AtomicU64::new(clock.now_ticks()),
            min_free: AtomicUsize::new(NOTHING_OBSERVED),
            clock,
        }
    }

    /// Record the number of free elements seen by a release.
    pub fn update_min_free(&self, free_count: usize) {
        self.min_free.fetch_min(free_count, Ordering::AcqRel);
    }

    /// Start a new window; called whenever the pool had to create an element.
    pub fn reset(&self) {
        self.min_free.store(NOTHING_OBSERVED, Ordering::Release);
        self.window_start
            .store(self.clock.now_ticks(), Ordering::Release);
    }

    /// Whether the pool may shed one element now.
    ///
    /// Approves at most once per window, and only if the pool always had a free element
    /// during the window that just ended.
    pub fn trim_approved(&self) -> bool {
        let Some(window) = self.window_ticks else {
            return false;
        };

        let start = self.window_start.load(Ordering::Acquire);
        let now = self.clock.now_ticks();
        if elapsed_ticks(now, start) < window {
            return false;
        }

        if self
            .window_start
            .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let min_free = self.min_free.swap(NOTHING_OBSERVED, Ordering::AcqRel);
        min_free > 0
    }
}
