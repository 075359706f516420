use std::time::{Duration, Instant};

/// Turns a growing count of completed work units into sampled percentages.
///
/// Reported values never decrease and stay below 100 until [`finish`] is
/// called, so consumers can treat 100 as "batch complete".
///
/// [`finish`]: ProgressTracker::finish
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    done: u64,
    interval: Duration,
    last_value: u8,
    last_report: Option<Instant>,
}

impl ProgressTracker {
    pub fn new(total: u64, interval: Duration) -> Self {
        Self {
            total,
            done: 0,
            interval,
            last_value: 0,
            last_report: None,
        }
    }

    /// Record `units` of completed work, returning a value worth reporting.
    pub fn advance(&mut self, units: u64) -> Option<u8> {
        self.done = self.done.saturating_add(units);

        let value = self.percentage();
        if value <= self.last_value && self.last_report.is_some() {
            return None;
        }

        let now = Instant::now();
        if let Some(last) = self.last_report
            && now.duration_since(last) < self.interval
        {
            return None;
        }

        self.last_value = self.last_value.max(value);
        self.last_report = Some(now);
        Some(self.last_value)
    }

    /// Grow the amount of expected work, e.g. when a pass restarts.
    pub fn extend(&mut self, units: u64) {
        self.total = self.total.saturating_add(units);
    }

    pub fn finish(&mut self) -> u8 {
        self.done = self.total;
        self.last_value = 100;
        self.last_report = Some(Instant::now());
        100
    }

    fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let value = self.done.min(self.total) * 100 / self.total;
        value.min(99) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_growing_values_without_interval() {
        let mut tracker = ProgressTracker::new(4, Duration::ZERO);
        assert_eq!(tracker.advance(1), Some(25));
        assert_eq!(tracker.advance(1), Some(50));
        assert_eq!(tracker.advance(0), None);
        assert_eq!(tracker.advance(1), Some(75));
    }

    #[test]
    fn never_reports_completion_before_finish() {
        let mut tracker = ProgressTracker::new(2, Duration::ZERO);
        tracker.advance(1);
        assert_eq!(tracker.advance(1), Some(99));
        assert_eq!(tracker.advance(5), None);
        assert_eq!(tracker.finish(), 100);
    }

    #[test]
    fn extending_total_does_not_decrease_reports() {
        let mut tracker = ProgressTracker::new(4, Duration::ZERO);
        assert_eq!(tracker.advance(2), Some(50));
        tracker.extend(4);
        assert_eq!(tracker.advance(1), None);
        assert_eq!(tracker.advance(3), Some(75));
    }

    #[test]
    fn interval_throttles_reports() {
        let mut tracker = ProgressTracker::new(100, Duration::from_secs(3600));
        assert_eq!(tracker.advance(10), Some(10));
        assert_eq!(tracker.advance(10), None);
        assert_eq!(tracker.finish(), 100);
    }

    #[test]
    fn empty_batches_only_report_on_finish() {
        let mut tracker = ProgressTracker::new(0, Duration::ZERO);
        assert_eq!(tracker.advance(1), Some(0));
        assert_eq!(tracker.advance(1), None);
        assert_eq!(tracker.finish(), 100);
    }
}
