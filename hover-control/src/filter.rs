//! Exponential moving average used on the height and speed channels.

use crate::error::{ControlError, ControlResult};

/// One-sided exponential smoothing filter.
///
/// The first sample seeds the filter unchanged. After that each update is
/// `(1 - alpha) * previous + alpha * x`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialFilter {
    alpha: f64,
    value: Option<f64>,
}

impl ExponentialFilter {
    /// # Errors
    /// [`ControlError::Configuration`] unless `0 < alpha <= 1`.
    pub fn new(alpha: f64) -> ControlResult<Self> {
        validate_alpha("smoothing factor", alpha)?;
        Ok(Self { alpha, value: None })
    }

    /// Feed one raw value and return the smoothed value.
    pub fn update(&mut self, x: f64) -> f64 {
        let smoothed = match self.value {
            Some(prev) => (1.0 - self.alpha) * prev + self.alpha * x,
            None => x,
        };
        self.value = Some(smoothed);
        smoothed
    }

    /// Current smoothed value, `None` before the first sample.
    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

pub(crate) fn validate_alpha(name: &str, alpha: f64) -> ControlResult<()> {
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Err(ControlError::Configuration(format!(
            "{name} must be in (0, 1], got {alpha}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_seed_is_exact() {
        let mut filter = ExponentialFilter::new(0.65).unwrap();
        assert_eq!(filter.value(), None);
        assert_eq!(filter.update(500.0), 500.0);
        assert_eq!(filter.value(), Some(500.0));
    }

    #[test]
    fn test_constant_input_does_not_drift() {
        for &alpha in &[0.05, 0.3, 0.65, 1.0] {
            let mut filter = ExponentialFilter::new(alpha).unwrap();
            for _ in 0..200 {
                assert_eq!(filter.update(437.25), 437.25);
            }
        }
    }

    #[test]
    fn test_update_rule() {
        let mut filter = ExponentialFilter::new(0.65).unwrap();
        filter.update(500.0);
        let smoothed = filter.update(600.0);
        assert_relative_eq!(smoothed, 0.35 * 500.0 + 0.65 * 600.0, epsilon = 1e-12);
    }

    #[test]
    fn test_divergence_contracts_geometrically() {
        let alpha = 0.65;
        let inputs = [410.0, 420.0, 415.0, 430.0, 425.0, 410.0, 405.0, 400.0];
        let mut perturbed = inputs;
        perturbed[2] += 80.0;

        let mut a = ExponentialFilter::new(alpha).unwrap();
        let mut b = ExponentialFilter::new(alpha).unwrap();
        let mut prev_gap: Option<f64> = None;
        for (x, y) in inputs.iter().zip(perturbed.iter()) {
            let gap = (a.update(*x) - b.update(*y)).abs();
            if let Some(prev) = prev_gap {
                if prev > 0.0 {
                    assert!(gap < prev);
                    assert_relative_eq!(gap, prev * (1.0 - alpha), epsilon = 1e-9);
                }
            }
            prev_gap = Some(gap);
        }
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        for &alpha in &[0.0, -0.1, 1.5, f64::NAN] {
            assert!(matches!(
                ExponentialFilter::new(alpha),
                Err(ControlError::Configuration(_))
            ));
        }
    }
}
