//! Frame timing and periodic throughput statistics.

use std::time::{Duration, Instant};

/// Throughput measured over one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalStats {
    /// Total frames counted since the timer started.
    pub total_frames: u64,
    /// Frames counted in this interval.
    pub frames: u64,
    /// Wall time covered by this interval.
    pub elapsed: Duration,
}

impl IntervalStats {
    /// Average frames per second over the interval.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.frames as f64 / secs } else { 0.0 }
    }

    /// Average milliseconds per frame over the interval.
    pub fn frame_time_ms(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.elapsed.as_secs_f64() * 1000.0 / self.frames as f64
    }
}

/// Counts presented frames and reports statistics every `interval` frames.
#[derive(Debug)]
pub struct FrameTimer {
    window_start: Instant,
    interval: u64,
    total_frames: u64,
    window_frames: u64,
}

impl FrameTimer {
    /// Create a timer that reports every `interval` frames (clamped to at least 1).
    pub fn new(interval: u64) -> Self {
        let now = Instant::now();
        Self {
            window_start: now,
            interval: interval.max(1),
            total_frames: 0,
            window_frames: 0,
        }
    }

    /// Total frames recorded so far.
    #[inline]
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Record one finished frame.
    ///
    /// Returns the interval statistics when this frame closes an interval.
    pub fn frame(&mut self) -> Option<IntervalStats> {
        self.frame_at(Instant::now())
    }

    fn frame_at(&mut self, now: Instant) -> Option<IntervalStats> {
        self.total_frames += 1;
        self.window_frames += 1;

        if self.window_frames < self.interval {
            return None;
        }

        let stats = IntervalStats {
            total_frames: self.total_frames,
            frames: self.window_frames,
            elapsed: now.saturating_duration_since(self.window_start),
        };
        self.window_start = now;
        self.window_frames = 0;
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_once_per_interval() {
        let mut timer = FrameTimer::new(100);
        let base = timer.window_start;

        let reports: Vec<_> = (1..=250)
            .filter_map(|i| timer.frame_at(base + Duration::from_millis(i * 10)))
            .collect();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].total_frames, 100);
        assert_eq!(reports[1].total_frames, 200);
        assert_eq!(reports[1].frames, 100);
        assert_eq!(timer.total_frames(), 250);
    }

    #[test]
    fn test_fps_from_interval() {
        let stats = IntervalStats {
            total_frames: 100,
            frames: 100,
            elapsed: Duration::from_secs(2),
        };
        assert!((stats.fps() - 50.0).abs() < f64::EPSILON);
        assert!((stats.frame_time_ms() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let mut timer = FrameTimer::new(0);
        assert!(timer.frame().is_some());
    }

    #[test]
    fn test_empty_interval_has_zero_rates() {
        let stats = IntervalStats {
            total_frames: 0,
            frames: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(stats.fps(), 0.0);
        assert_eq!(stats.frame_time_ms(), 0.0);
    }
}
