use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default trailing window over which the rate is computed.
const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// Hard cap on retained samples; updates beyond it are dropped.
const MAX_SAMPLES: usize = 100;

/// Windowed rate over a stream of timestamped value samples.
///
/// Samples older than the window are aged out on every query. The first
/// surviving sample opens the window and only anchors the time span; the
/// rate is the sum of the later samples' values divided by the span between
/// the first and last sample, in units per second.
///
/// With fewer than two surviving samples the rate is zero. Once the sample
/// cap is reached further updates are silently discarded until aging or
/// [`reset`](Self::reset) makes room.
pub struct RateEstimator {
    samples: VecDeque<(f64, Instant)>,
    window: Duration,
}

impl RateEstimator {
    /// Creates an estimator with the default 30 second window.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Creates an estimator with a caller-chosen window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Records a sample at the current time.
    pub fn update(&mut self, value: f64) {
        self.update_at(value, Instant::now());
    }

    /// Returns the current rate in units per second.
    pub fn value(&mut self) -> f64 {
        self.value_at(Instant::now())
    }

    /// Discards every sample.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn update_at(&mut self, value: f64, now: Instant) {
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push_back((value, now));
        }
    }

    fn value_at(&mut self, now: Instant) -> f64 {
        while let Some(&(_, at)) = self.samples.front() {
            if now.duration_since(at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        if self.samples.len() < 2 {
            return 0.0;
        }

        let first = self.samples.front().map(|&(_, at)| at);
        let last = self.samples.back().map(|&(_, at)| at);
        let (Some(first), Some(last)) = (first, last) else {
            return 0.0;
        };

        let span = last.duration_since(first).as_secs_f64();
        if span == 0.0 {
            return 0.0;
        }

        let total: f64 = self.samples.iter().skip(1).map(|&(value, _)| value).sum();
        total / span
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_samples_one_second_apart() {
        let base = Instant::now();
        let mut rate = RateEstimator::with_window(Duration::from_secs(5));

        rate.update_at(10.0, base);
        rate.update_at(10.0, base + Duration::from_secs(1));

        assert_eq!(rate.value_at(base + Duration::from_secs(1)), 10.0);
    }

    #[test]
    fn single_sample_is_zero() {
        let base = Instant::now();
        let mut rate = RateEstimator::new();

        rate.update_at(42.0, base);

        assert_eq!(rate.value_at(base), 0.0);
    }

    #[test]
    fn old_samples_age_out() {
        let base = Instant::now();
        let mut rate = RateEstimator::with_window(Duration::from_secs(2));

        rate.update_at(100.0, base);
        rate.update_at(100.0, base + Duration::from_secs(1));

        // Both samples fall outside the window ten seconds later.
        assert_eq!(rate.value_at(base + Duration::from_secs(10)), 0.0);
        assert!(rate.is_empty());
    }

    #[test]
    fn updates_beyond_cap_are_dropped() {
        let base = Instant::now();
        let mut rate = RateEstimator::with_window(Duration::from_secs(600));

        for i in 0..150 {
            rate.update_at(1.0, base + Duration::from_millis(i));
        }

        assert_eq!(rate.len(), 100);
    }

    #[test]
    fn reset_empties_the_estimator() {
        let base = Instant::now();
        let mut rate = RateEstimator::new();

        rate.update_at(1.0, base);
        rate.update_at(1.0, base + Duration::from_secs(1));
        rate.reset();

        assert!(rate.is_empty());
        assert_eq!(rate.value_at(base + Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn equal_timestamps_do_not_divide_by_zero() {
        let base = Instant::now();
        let mut rate = RateEstimator::new();

        rate.update_at(5.0, base);
        rate.update_at(5.0, base);

        assert_eq!(rate.value_at(base), 0.0);
    }
}
