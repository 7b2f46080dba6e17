//! High-resolution timing for the frame loop.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates frame deltas and reports an average rate once per window.
#[derive(Debug)]
pub struct FrameRateCounter {
    window: Duration,
    accumulated: Duration,
    frames: u32,
}

impl FrameRateCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accumulated: Duration::ZERO,
            frames: 0,
        }
    }

    /// Records one frame. Returns the average frames per second when the
    /// reporting window has elapsed, then starts a new window.
    pub fn record(&mut self, delta: Duration) -> Option<f64> {
        self.accumulated += delta;
        self.frames += 1;

        if self.accumulated < self.window {
            return None;
        }

        let fps = f64::from(self.frames) / self.accumulated.as_secs_f64();
        self.accumulated = Duration::ZERO;
        self.frames = 0;
        Some(fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_tick_is_monotonic() {
        let mut timer = Timer::new();
        let first = timer.tick();
        let second = timer.tick();
        assert!(first >= Duration::ZERO);
        assert!(second >= Duration::ZERO);
        assert!(timer.elapsed() >= first);
    }

    #[test]
    fn test_frame_rate_counter_reports_after_window() {
        let mut counter = FrameRateCounter::new(Duration::from_secs(1));
        for _ in 0..9 {
            assert!(counter.record(Duration::from_millis(100)).is_none());
        }
        let fps = counter.record(Duration::from_millis(100)).unwrap();
        assert!((fps - 10.0).abs() < 1e-6);

        // Window restarts after a report
        assert!(counter.record(Duration::from_millis(100)).is_none());
    }
}
