//! Finite-difference rate estimates.
//!
//! Two estimates feed each cycle: rotor speed from the encoder position, and
//! the vertical rate of the smoothed height proxy used by the D term.

use crate::error::ControlResult;
use crate::filter::ExponentialFilter;
use crate::ring_buffer::SampleBuffer;

/// Number of smoothed-height samples required before the vertical rate is
/// estimated. Below this the D term is exactly zero.
pub const MIN_RATE_SAMPLES: usize = 5;

/// Number of adjacent sample pairs averaged into the vertical rate.
pub const RATE_WINDOW_PAIRS: usize = 2;

/// Rotor speed from successive encoder positions, smoothed by its own filter.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    last: Option<(f64, f64)>,
    filter: ExponentialFilter,
}

impl SpeedEstimator {
    pub fn new(alpha: f64) -> ControlResult<Self> {
        Ok(Self {
            last: None,
            filter: ExponentialFilter::new(alpha)?,
        })
    }

    /// Instantaneous speed between two samples.
    ///
    /// Zero when no previous sample exists or no time has elapsed.
    pub fn instantaneous(previous: Option<(f64, f64)>, time: f64, position: f64) -> f64 {
        match previous {
            Some((t0, p0)) if time - t0 > 0.0 => (position - p0) / (time - t0),
            _ => 0.0,
        }
    }

    /// Record a position sample and return the smoothed speed.
    pub fn update(&mut self, time: f64, position: f64) -> f64 {
        let speed = Self::instantaneous(self.last, time, position);
        self.last = Some((time, position));
        self.filter.update(speed)
    }
}

/// Vertical rate of the smoothed height over a short trailing window.
///
/// Keeps only the tail it needs. Pairs whose timestamps do not advance are
/// skipped rather than divided by zero.
#[derive(Debug, Clone)]
pub struct VerticalRateEstimator {
    window: SampleBuffer<(f64, f64)>,
    samples_seen: usize,
}

impl VerticalRateEstimator {
    pub fn new() -> Self {
        Self {
            window: SampleBuffer::new(RATE_WINDOW_PAIRS + 1),
            samples_seen: 0,
        }
    }

    /// Record a smoothed height at `time`.
    pub fn push(&mut self, time: f64, smoothed_height: f64) {
        self.window.push((time, smoothed_height));
        self.samples_seen = self.samples_seen.saturating_add(1);
    }

    /// True once enough samples exist for the D term to act.
    pub fn is_active(&self) -> bool {
        self.samples_seen >= MIN_RATE_SAMPLES
    }

    /// Mean of per-pair `Δheight / Δtime` over the trailing pairs.
    ///
    /// Exactly zero until [`MIN_RATE_SAMPLES`] samples have been recorded.
    pub fn mean_rate(&self) -> f64 {
        if !self.is_active() {
            return 0.0;
        }

        let mut sum = 0.0;
        let mut pairs = 0usize;
        for offset in 0..RATE_WINDOW_PAIRS {
            let (Some(&(t1, h1)), Some(&(t0, h0))) =
                (self.window.recent(offset), self.window.recent(offset + 1))
            else {
                break;
            };
            let dt = t1 - t0;
            if dt > 0.0 {
                sum += (h1 - h0) / dt;
                pairs += 1;
            }
        }

        if pairs == 0 {
            0.0
        } else {
            sum / pairs as f64
        }
    }
}

impl Default for VerticalRateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_speed_zero_until_two_samples() {
        let mut est = SpeedEstimator::new(0.65).unwrap();
        assert_eq!(est.update(0.0, 100.0), 0.0);
        // Second sample: 90 deg over 0.05 s, seeded-then-smoothed
        let speed = est.update(0.05, 190.0);
        assert_relative_eq!(speed, 0.65 * 1800.0, epsilon = 1e-9);
    }

    #[test]
    fn test_speed_zero_elapsed() {
        assert_eq!(SpeedEstimator::instantaneous(Some((1.0, 10.0)), 1.0, 50.0), 0.0);
        assert_eq!(SpeedEstimator::instantaneous(None, 1.0, 50.0), 0.0);
        assert_relative_eq!(
            SpeedEstimator::instantaneous(Some((1.0, 10.0)), 1.5, 50.0),
            80.0
        );
    }

    #[test]
    fn test_vertical_rate_suppressed_below_five_samples() {
        let mut est = VerticalRateEstimator::new();
        for i in 0..(MIN_RATE_SAMPLES - 1) {
            est.push(i as f64 * 0.05, 400.0 + 50.0 * i as f64);
            assert!(!est.is_active());
            assert_eq!(est.mean_rate(), 0.0);
        }
        est.push(0.2, 600.0);
        assert!(est.is_active());
        assert!(est.mean_rate() > 0.0);
    }

    #[test]
    fn test_vertical_rate_averages_last_two_pairs() {
        let mut est = VerticalRateEstimator::new();
        let samples = [
            (0.00, 400.0),
            (0.05, 400.0),
            (0.10, 400.0),
            (0.15, 410.0),
            (0.25, 430.0),
        ];
        for (t, h) in samples {
            est.push(t, h);
        }
        // Pairs: (0.15->0.25) = 200/s, (0.10->0.15) = 200/s
        assert_relative_eq!(est.mean_rate(), 200.0, epsilon = 1e-9);

        est.push(0.30, 430.0);
        // Pairs: (0.25->0.30) = 0/s, (0.15->0.25) = 200/s
        assert_relative_eq!(est.mean_rate(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_vertical_rate_skips_stalled_clock() {
        let mut est = VerticalRateEstimator::new();
        for (t, h) in [(0.0, 1.0), (0.1, 2.0), (0.2, 3.0), (0.3, 4.0), (0.3, 9.0)] {
            est.push(t, h);
        }
        // Last pair has dt == 0 and is skipped; previous pair is 10/s
        assert_relative_eq!(est.mean_rate(), 10.0, epsilon = 1e-9);
        assert!(est.mean_rate().is_finite());
    }
}
