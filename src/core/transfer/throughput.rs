use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Moving-average byte rate over a fixed time window.
#[derive(Debug)]
pub struct ThroughputMeter {
    window: Duration,
    started: Instant,
    samples: VecDeque<(Instant, u64)>,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ThroughputMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: Instant::now(),
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&mut self, at: Instant, bytes: u64) {
        self.samples.push_back((at, bytes));
        while let Some(&(t, _)) = self.samples.front() {
            if at.duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second.
    pub fn speed(&self) -> f64 {
        self.speed_at(Instant::now())
    }

    fn speed_at(&self, now: Instant) -> f64 {
        let span = now.duration_since(self.started).min(self.window);
        if span < Duration::from_millis(1) {
            return 0.0;
        }
        let bytes: u64 = self
            .samples
            .iter()
            .filter(|(t, _)| now.duration_since(*t) <= self.window)
            .map(|(_, b)| b)
            .sum();
        bytes as f64 / span.as_secs_f64()
    }
}

/// Time left at `speed`; `None` when the rate or the size is unknown.
pub fn estimate_remaining(downloaded: u64, total: u64, speed: f64) -> Option<Duration> {
    if speed <= 0.0 || total == 0 {
        return None;
    }
    let remaining = total.saturating_sub(downloaded) as f64;
    Some(Duration::from_secs_f64(remaining / speed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_samples_means_zero_speed() {
        let meter = ThroughputMeter::default();
        assert_eq!(meter.speed_at(meter.started + Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn averages_over_the_window() {
        let mut meter = ThroughputMeter::new(Duration::from_secs(2));
        let t0 = meter.started;
        meter.record_at(t0 + Duration::from_millis(500), 1000);
        meter.record_at(t0 + Duration::from_millis(1000), 1000);
        let speed = meter.speed_at(t0 + Duration::from_secs(1));
        assert!((speed - 2000.0).abs() < 1.0);
    }

    #[test]
    fn old_samples_fall_out_of_the_window() {
        let mut meter = ThroughputMeter::new(Duration::from_secs(1));
        let t0 = meter.started;
        meter.record_at(t0, 10_000);
        meter.record_at(t0 + Duration::from_secs(3), 500);
        let speed = meter.speed_at(t0 + Duration::from_secs(3));
        assert!((speed - 500.0).abs() < 1.0);
    }

    #[test]
    fn eta_is_unknown_without_a_rate() {
        assert_eq!(estimate_remaining(0, 1000, 0.0), None);
        assert_eq!(estimate_remaining(0, 0, 100.0), None);
        assert_eq!(estimate_remaining(500, 1000, 100.0), Some(Duration::from_secs(5)));
    }
}
