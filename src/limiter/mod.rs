//! CPU Limiter: a cooperative throttle the Executor consults between files
//! (spec §4.9). Not a hard kernel limit — a best-effort pacing loop that
//! tracks busy time in a fixed window and sleeps enough to hit the target
//! ratio.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Result of one `throttle()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleOutcome {
    /// The caller may proceed to the next file.
    Continued,
    /// A shutdown signal arrived; the caller must stop immediately.
    Cancelled,
}

/// Fixed-interval accounting throttle parameterized by `max_cpu_percent`.
pub struct CpuLimiter {
    max_cpu_percent: f64,
    window: Duration,
    window_start: parking_lot::Mutex<Instant>,
    busy_in_window: AtomicU64,
    cancelled: Arc<AtomicBool>,
}

impl CpuLimiter {
    /// Build a limiter targeting `max_cpu_percent` busy time within a fixed
    /// accounting window, cooperatively cancellable via `cancelled`.
    #[must_use]
    pub fn new(max_cpu_percent: f64, window: Duration, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            max_cpu_percent: max_cpu_percent.clamp(0.0, 100.0),
            window,
            window_start: parking_lot::Mutex::new(Instant::now()),
            busy_in_window: AtomicU64::new(0),
            cancelled,
        }
    }

    /// A limiter that never sleeps and never cancels; used in tests and
    /// whenever `max_cpu_percent` is configured at 100.
    #[must_use]
    pub fn unthrottled() -> Self {
        Self::new(100.0, Duration::from_secs(1), Arc::new(AtomicBool::new(false)))
    }

    /// Record time spent doing work since the previous call, and possibly
    /// sleep to keep busy time within `max_cpu_percent` of the window.
    /// Returns [`ThrottleOutcome::Cancelled`] immediately, without sleeping,
    /// if a shutdown has been requested.
    pub fn throttle(&self) -> ThrottleOutcome {
        if self.cancelled.load(Ordering::Relaxed) {
            return ThrottleOutcome::Cancelled;
        }
        if self.max_cpu_percent >= 100.0 {
            return ThrottleOutcome::Continued;
        }

        let mut window_start = self.window_start.lock();
        let elapsed = window_start.elapsed();

        if elapsed >= self.window {
            *window_start = Instant::now();
            self.busy_in_window.store(0, Ordering::Relaxed);
            return ThrottleOutcome::Continued;
        }

        let busy = Duration::from_micros(self.busy_in_window.load(Ordering::Relaxed));
        let busy_ratio = busy.as_secs_f64() / elapsed.as_secs_f64().max(0.000_001);

        if busy_ratio <= self.max_cpu_percent / 100.0 {
            return ThrottleOutcome::Continued;
        }

        let target_busy = elapsed.as_secs_f64() * (self.max_cpu_percent / 100.0);
        let sleep_secs = (busy.as_secs_f64() - target_busy).max(0.0);
        drop(window_start);
        if sleep_secs > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(sleep_secs));
        }

        if self.cancelled.load(Ordering::Relaxed) {
            return ThrottleOutcome::Cancelled;
        }
        ThrottleOutcome::Continued
    }

    /// Record that `duration` was spent doing real work, for the next
    /// `throttle()` call's accounting.
    pub fn record_busy(&self, duration: Duration) {
        #[allow(clippy::cast_possible_truncation)]
        self.busy_in_window.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unthrottled_never_cancels_or_sleeps() {
        let limiter = CpuLimiter::unthrottled();
        let start = Instant::now();
        for _ in 0..1000 {
            assert_eq!(limiter.throttle(), ThrottleOutcome::Continued);
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn cancellation_flag_stops_immediately() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let limiter = CpuLimiter::new(10.0, Duration::from_secs(1), Arc::clone(&cancelled));
        assert_eq!(limiter.throttle(), ThrottleOutcome::Continued);
        cancelled.store(true, Ordering::Relaxed);
        assert_eq!(limiter.throttle(), ThrottleOutcome::Cancelled);
    }

    #[test]
    fn heavy_busy_time_triggers_a_sleep() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let limiter = CpuLimiter::new(10.0, Duration::from_millis(200), cancelled);
        limiter.record_busy(Duration::from_millis(100));
        // 100ms busy against a 10% target over a fresh ~0ms elapsed window
        // is well past ratio; throttle() should sleep measurably.
        let start = Instant::now();
        limiter.throttle();
        assert!(start.elapsed() >= Duration::from_millis(1));
    }
}
