//! Output budget tracking
//!
//! Bounds a recording by cumulative output bytes and by recorded duration.
//! Both producer paths report encoder progress here; the first threshold
//! crossing raises a one-shot breach that the state machine turns into a
//! normal stop, never an error. Elapsed time excludes paused intervals:
//! completed recording segments are accumulated and only the live segment
//! counts against the clock.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Which budget limit was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetBreach {
    FileSize,
    Duration,
}

#[derive(Default)]
struct Segments {
    /// Recorded time from segments closed by pause/stop.
    completed_us: i64,
    /// Start of the currently running segment, if recording.
    current_start: Option<Instant>,
}

/// Tracks emitted bytes and recorded duration against configured maxima.
pub struct OutputBudgetMonitor {
    max_bytes: u64,
    /// 0 means unlimited.
    max_duration_us: i64,
    bytes: AtomicU64,
    exhausted: AtomicBool,
    segments: Mutex<Segments>,
}

impl OutputBudgetMonitor {
    pub fn new(max_bytes: u64, max_duration_us: i64) -> Self {
        Self {
            max_bytes,
            max_duration_us,
            bytes: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
            segments: Mutex::new(Segments::default()),
        }
    }

    /// Open the first recording segment.
    pub fn start(&self) {
        self.segments.lock().current_start = Some(Instant::now());
    }

    /// Close the running segment (pause or stop).
    pub fn pause(&self) {
        let mut segments = self.segments.lock();
        if let Some(started) = segments.current_start.take() {
            segments.completed_us += started.elapsed().as_micros() as i64;
        }
    }

    /// Open a new segment after a pause.
    pub fn resume(&self) {
        self.start();
    }

    /// Recorded duration in microseconds, paused time excluded.
    pub fn elapsed_us(&self) -> i64 {
        let segments = self.segments.lock();
        let live = segments
            .current_start
            .map(|s| s.elapsed().as_micros() as i64)
            .unwrap_or(0);
        segments.completed_us + live
    }

    /// Cumulative bytes reported so far.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Record the encoder's cumulative byte count and check both limits.
    ///
    /// Returns the breach exactly once; every later report returns None, so a
    /// crossing cannot re-trigger the stop path.
    pub fn observe_bytes(&self, total_bytes: u64) -> Option<BudgetBreach> {
        self.bytes.fetch_max(total_bytes, Ordering::Relaxed);

        let breach = if total_bytes >= self.max_bytes {
            BudgetBreach::FileSize
        } else if self.max_duration_us > 0 && self.elapsed_us() >= self.max_duration_us {
            BudgetBreach::Duration
        } else {
            return None;
        };

        // First crossing wins; the flag is terminal until reset.
        if self
            .exhausted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!("output budget exhausted: {:?}", breach);
            Some(breach)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_size_breach_signals_once() {
        let monitor = OutputBudgetMonitor::new(1_000, 0);
        monitor.start();

        assert_eq!(monitor.observe_bytes(999), None);
        assert_eq!(monitor.observe_bytes(1_000), Some(BudgetBreach::FileSize));
        assert_eq!(monitor.observe_bytes(2_000), None);
        assert_eq!(monitor.observe_bytes(3_000), None);
        assert!(monitor.exhausted());
    }

    #[test]
    fn test_duration_breach() {
        let monitor = OutputBudgetMonitor::new(u64::MAX, 5_000);
        monitor.start();
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(monitor.observe_bytes(1), Some(BudgetBreach::Duration));
        assert_eq!(monitor.observe_bytes(2), None);
    }

    #[test]
    fn test_unlimited_duration_never_breaches() {
        let monitor = OutputBudgetMonitor::new(u64::MAX, 0);
        monitor.start();
        assert_eq!(monitor.observe_bytes(u64::MAX - 1), None);
    }

    #[test]
    fn test_paused_time_excluded() {
        let monitor = OutputBudgetMonitor::new(u64::MAX, 0);
        monitor.start();
        std::thread::sleep(Duration::from_millis(5));
        monitor.pause();

        let at_pause = monitor.elapsed_us();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(monitor.elapsed_us(), at_pause);

        monitor.resume();
        std::thread::sleep(Duration::from_millis(5));
        assert!(monitor.elapsed_us() > at_pause);
    }
}
