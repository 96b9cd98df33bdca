use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// How often the realised request rate is reported.
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// `asctime`-style wall clock timestamp used in report lines.
const TIMESTAMP_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Counts requests and produces a [`RateReport`] once per interval.
#[derive(Debug, Clone)]
pub struct StatsReporter {
    interval: Duration,
    count: u64,
    last_report: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateReport {
    pub count: u64,
    pub elapsed: Duration,
    pub rate: f64,
}

impl StatsReporter {
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            count: 0,
            last_report: start,
        }
    }

    /// Records a request that completed at `now`.
    ///
    /// With a zero interval every request closes a window, except when no
    /// time has passed since the last report: a rate over zero elapsed time
    /// is undefined, so the count carries over to the next call.
    pub fn record(&mut self, now: Instant) -> Option<RateReport> {
        self.count += 1;

        let elapsed = now.saturating_duration_since(self.last_report);
        if elapsed.is_zero() || elapsed < self.interval {
            return None;
        }

        let report = RateReport {
            count: self.count,
            elapsed,
            rate: self.count as f64 / elapsed.as_secs_f64(),
        };

        self.count = 0;
        self.last_report = now;

        Some(report)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn last_report(&self) -> Instant {
        self.last_report
    }
}

impl fmt::Display for RateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: rate = {:.6}", chrono::Local::now().format(TIMESTAMP_FORMAT), self.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn reports_after_full_interval() {
        let start = Instant::now();
        let mut stats = StatsReporter::new(STATS_INTERVAL, start);

        for i in 1..30 {
            assert_eq!(stats.record(start + SEC * i), None);
        }
        assert_eq!(stats.count(), 29);

        let report = stats.record(start + STATS_INTERVAL).unwrap();
        assert_eq!(report.count, 30);
        assert_eq!(report.elapsed, STATS_INTERVAL);
        assert!((report.rate - 0.5).abs() < 1e-9);

        assert_eq!(stats.count(), 0);
        assert_eq!(stats.last_report(), start + STATS_INTERVAL);
    }

    #[test]
    fn next_window_starts_at_last_report() {
        let start = Instant::now();
        let mut stats = StatsReporter::new(SEC * 10, start);

        assert!(stats.record(start + SEC * 12).is_some());
        assert_eq!(stats.record(start + SEC * 21), None);

        let report = stats.record(start + SEC * 22).unwrap();
        assert_eq!(report.count, 2);
        assert!((report.rate - 0.2).abs() < 1e-9);
    }

    #[test]
    fn zero_interval_waits_for_time_to_pass() {
        let start = Instant::now();
        let mut stats = StatsReporter::new(Duration::ZERO, start);

        assert_eq!(stats.record(start), None);
        assert_eq!(stats.record(start), None);

        let report = stats.record(start + SEC).unwrap();
        assert_eq!(report.count, 3);
        assert!(report.rate.is_finite());
    }

    #[test]
    fn report_line_carries_rate() {
        let report = RateReport {
            count: 3,
            elapsed: SEC,
            rate: 3.0,
        };
        assert!(report.to_string().ends_with(": rate = 3.000000"));
    }
}
