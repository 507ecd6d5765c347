//! PD feedback on the height proxy, producing a clamped pitch setpoint.
//!
//! # Control law
//!
//! ```text
//! error     = h - h_target
//! p_new     = p_base + Kp·error + Kd·ḣ
//! p_clamped = clamp(p_new, p_min, p_max)
//! ```
//!
//! With [`ControlLaw::Incremental`] `p_base` is the previous cycle's output, so
//! a sustained error keeps moving the pitch (integral-like action) until the
//! clamp stops it. With [`ControlLaw::Positional`] `p_base` is a fixed trim
//! pitch and the output is recomputed from scratch each cycle.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ControlError, ControlResult};

/// How the previous output enters the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlLaw {
    /// Accumulate corrections onto the previous pitch.
    Incremental,
    /// Apply corrections around the trim pitch.
    Positional,
}

/// Gains, clamp and law for the feedback controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Proportional gain, pitch degrees per raw height count
    pub kp: f64,
    /// Derivative gain, pitch degrees per (raw counts per second)
    pub kd: f64,
    /// Lower pitch clamp
    pub pitch_min: f64,
    /// Upper pitch clamp
    pub pitch_max: f64,
    pub law: ControlLaw,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kp: 0.025,
            kd: 0.013,
            pitch_min: 0.0,
            pitch_max: 600.0,
            law: ControlLaw::Incremental,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> ControlResult<()> {
        if !self.kp.is_finite() || !self.kd.is_finite() {
            return Err(ControlError::Configuration(format!(
                "gains must be finite, got kp={} kd={}",
                self.kp, self.kd
            )));
        }
        if !self.pitch_min.is_finite() || !self.pitch_max.is_finite() {
            return Err(ControlError::Configuration(
                "pitch clamp bounds must be finite".to_string(),
            ));
        }
        if self.pitch_min > self.pitch_max {
            return Err(ControlError::Configuration(format!(
                "pitch clamp inverted: min {} > max {}",
                self.pitch_min, self.pitch_max
            )));
        }
        Ok(())
    }

    pub fn clamp(&self, pitch: f64) -> f64 {
        pitch.clamp(self.pitch_min, self.pitch_max)
    }
}

/// Mutable controller state, owned by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// Last clamped output
    pub target_pitch_deg: f64,
    /// Height proxy setpoint in raw counts
    pub target_height_reading: f64,
    /// Error from the last accepted cycle
    pub last_height_error: f64,
}

/// One cycle's controller result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlOutput {
    pub error: f64,
    pub p_term: f64,
    pub d_term: f64,
    /// Pitch before clamping
    pub unclamped_pitch: f64,
    /// Pitch after clamping, the value to command
    pub pitch: f64,
    /// The clamp changed the output
    pub saturated: bool,
    /// The cycle was skipped and the previous pitch held
    pub held: bool,
}

/// PD controller over the height proxy.
#[derive(Debug, Clone)]
pub struct FeedbackController {
    config: ControllerConfig,
    state: ControllerState,
    trim_pitch: f64,
}

impl FeedbackController {
    /// # Errors
    /// [`ControlError::Configuration`] on invalid gains or bounds, or an
    /// initial pitch outside the clamp.
    pub fn new(
        config: ControllerConfig,
        initial_pitch: f64,
        target_height: f64,
    ) -> ControlResult<Self> {
        config.validate()?;
        if !(config.pitch_min..=config.pitch_max).contains(&initial_pitch) {
            return Err(ControlError::Configuration(format!(
                "initial pitch {initial_pitch} outside clamp [{}, {}]",
                config.pitch_min, config.pitch_max
            )));
        }
        if !target_height.is_finite() {
            return Err(ControlError::Configuration(format!(
                "target height must be finite, got {target_height}"
            )));
        }
        Ok(Self {
            config,
            state: ControllerState {
                target_pitch_deg: initial_pitch,
                target_height_reading: target_height,
                last_height_error: 0.0,
            },
            trim_pitch: initial_pitch,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn target_pitch(&self) -> f64 {
        self.state.target_pitch_deg
    }

    pub fn target_height(&self) -> f64 {
        self.state.target_height_reading
    }

    /// Run the control law on a valid measurement.
    ///
    /// Non-finite inputs are treated like an invalid sensor cycle: the
    /// previous pitch is held and nothing is accumulated.
    pub fn update(&mut self, height: f64, height_rate: f64) -> ControlOutput {
        if !height.is_finite() || !height_rate.is_finite() {
            return self.hold();
        }

        let error = height - self.state.target_height_reading;
        let p_term = self.config.kp * error;
        let d_term = self.config.kd * height_rate;
        let base = match self.config.law {
            ControlLaw::Incremental => self.state.target_pitch_deg,
            ControlLaw::Positional => self.trim_pitch,
        };
        let unclamped_pitch = base + p_term + d_term;
        let pitch = self.config.clamp(unclamped_pitch);

        trace!(
            "error {error:.1}, P {p_term:.3}, D {d_term:.3}, pitch {pitch:.2} (target height {:.1}, height {height:.1})",
            self.state.target_height_reading
        );

        self.state.target_pitch_deg = pitch;
        self.state.last_height_error = error;

        ControlOutput {
            error,
            p_term,
            d_term,
            unclamped_pitch,
            pitch,
            saturated: pitch != unclamped_pitch,
            held: false,
        }
    }

    /// Skip this cycle, keeping the previous pitch.
    pub fn hold(&self) -> ControlOutput {
        let pitch = self.state.target_pitch_deg;
        ControlOutput {
            error: self.state.last_height_error,
            p_term: 0.0,
            d_term: 0.0,
            unclamped_pitch: pitch,
            pitch,
            saturated: false,
            held: true,
        }
    }

    /// Replace the height setpoint. Returns the previous value.
    pub(crate) fn set_target_height(&mut self, target: f64) -> f64 {
        std::mem::replace(&mut self.state.target_height_reading, target)
    }

    /// Shift the pitch by `delta` within the clamp.
    ///
    /// Nudges never go below zero when the clamp admits zero. The trim pitch
    /// moves with it so that a nudge also sticks under
    /// [`ControlLaw::Positional`]. Returns `(previous, new)`.
    pub(crate) fn nudge_pitch(&mut self, delta: f64) -> (f64, f64) {
        let previous = self.state.target_pitch_deg;
        let pitch = self.nudge_bounds(previous + delta);
        self.state.target_pitch_deg = pitch;
        self.trim_pitch = self.nudge_bounds(self.trim_pitch + delta);
        (previous, pitch)
    }

    fn nudge_bounds(&self, pitch: f64) -> f64 {
        let clamped = self.config.clamp(pitch);
        if self.config.pitch_min <= 0.0 && self.config.pitch_max >= 0.0 {
            clamped.max(0.0)
        } else {
            clamped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller(initial_pitch: f64, target: f64) -> FeedbackController {
        FeedbackController::new(ControllerConfig::default(), initial_pitch, target).unwrap()
    }

    #[test]
    fn test_step_response() {
        let mut ctl = controller(100.0, 410.0);
        let out = ctl.update(600.0, 0.0);

        assert_relative_eq!(out.error, 190.0);
        assert_relative_eq!(out.p_term, 4.75, epsilon = 1e-12);
        assert_eq!(out.d_term, 0.0);
        assert_relative_eq!(out.pitch, 104.75, epsilon = 1e-12);
        assert!(!out.saturated);
        assert_relative_eq!(ctl.target_pitch(), 104.75, epsilon = 1e-12);
    }

    #[test]
    fn test_derivative_term() {
        let mut ctl = controller(100.0, 410.0);
        let out = ctl.update(410.0, -100.0);
        assert_relative_eq!(out.d_term, -1.3, epsilon = 1e-12);
        assert_relative_eq!(out.pitch, 98.7, epsilon = 1e-12);
    }

    #[test]
    fn test_clamp_saturation() {
        let mut ctl = controller(590.0, 0.0);
        let out = ctl.update(2000.0, 0.0);
        assert!(out.unclamped_pitch > 600.0);
        assert_eq!(out.pitch, 600.0);
        assert!(out.saturated);

        let mut ctl = controller(5.0, 1000.0);
        let out = ctl.update(0.0, -5000.0);
        assert_eq!(out.pitch, 0.0);
    }

    #[test]
    fn test_clamp_invariant_over_pathological_inputs() {
        let mut ctl = controller(100.0, 410.0);
        // Deterministic pseudo-random walk including huge magnitudes
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        for _ in 0..10_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let unit = (seed % 2_000_001) as f64 / 1_000_000.0 - 1.0;
            let height = 410.0 + unit * 1.0e6;
            let rate = -unit * 1.0e7;
            let out = ctl.update(height, rate);
            assert!((0.0..=600.0).contains(&out.pitch), "pitch {}", out.pitch);
        }
    }

    #[test]
    fn test_sustained_error_accumulates() {
        let mut ctl = controller(100.0, 400.0);
        let mut last = ctl.target_pitch();
        for _ in 0..10 {
            let out = ctl.update(440.0, 0.0);
            assert_relative_eq!(out.pitch - last, 1.0, epsilon = 1e-9);
            last = out.pitch;
        }
    }

    #[test]
    fn test_positional_law_does_not_accumulate() {
        let config = ControllerConfig {
            law: ControlLaw::Positional,
            ..ControllerConfig::default()
        };
        let mut ctl = FeedbackController::new(config, 100.0, 400.0).unwrap();
        for _ in 0..10 {
            let out = ctl.update(440.0, 0.0);
            assert_relative_eq!(out.pitch, 101.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_non_finite_inputs_hold() {
        let mut ctl = controller(100.0, 410.0);
        ctl.update(420.0, 0.0);
        let before = *ctl.state();

        let out = ctl.update(f64::NAN, 0.0);
        assert!(out.held);
        assert_eq!(out.pitch, before.target_pitch_deg);
        assert_eq!(*ctl.state(), before);

        let out = ctl.update(420.0, f64::INFINITY);
        assert!(out.held);
        assert_eq!(*ctl.state(), before);
    }

    #[test]
    fn test_nudge_clamps() {
        let mut ctl = controller(550.0, 410.0);
        assert_eq!(ctl.nudge_pitch(100.0), (550.0, 600.0));
        let mut ctl = controller(50.0, 410.0);
        assert_eq!(ctl.nudge_pitch(-100.0), (50.0, 0.0));

        let below_zero = ControllerConfig {
            pitch_min: -50.0,
            ..ControllerConfig::default()
        };
        let mut ctl = FeedbackController::new(below_zero, 20.0, 410.0).unwrap();
        assert_eq!(ctl.nudge_pitch(-100.0), (20.0, 0.0));
    }

    #[test]
    fn test_nudge_stays_inside_negative_clamp() {
        let config = ControllerConfig {
            pitch_min: -600.0,
            pitch_max: -10.0,
            ..ControllerConfig::default()
        };
        let mut ctl = FeedbackController::new(config, -100.0, 410.0).unwrap();

        assert_eq!(ctl.nudge_pitch(100.0), (-100.0, -10.0));
        assert_eq!(ctl.hold().pitch, -10.0);
        assert_eq!(ctl.nudge_pitch(-1000.0), (-10.0, -600.0));
        assert_eq!(ctl.hold().pitch, -600.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad_gain = ControllerConfig {
            kp: f64::NAN,
            ..ControllerConfig::default()
        };
        assert!(bad_gain.validate().is_err());

        let inverted = ControllerConfig {
            pitch_min: 10.0,
            pitch_max: 5.0,
            ..ControllerConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ControlError::Configuration(_))
        ));

        assert!(FeedbackController::new(ControllerConfig::default(), 700.0, 410.0).is_err());
    }
}
