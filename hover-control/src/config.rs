//! Control loop configuration.
//!
//! Defaults reproduce the bench tuning: a 50 ms period, α = 0.65 on both
//! channels, Kp = 0.025, Kd = 0.013, pitch clamped to [0, 600], a 410-count
//! height target and a 2000-entry history (a little over a minute and a half
//! at 50 ms).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::ControllerConfig;
use crate::error::{ControlError, ControlResult};
use crate::filter::validate_alpha;

/// Longest accepted control period.
pub const MAX_PERIOD_SECS: f64 = 1.0;

/// Longest a single sensor read may block the loop.
pub const MAX_SENSOR_TIMEOUT_SECS: f64 = 1.0;

/// Settings for one control session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Control period in seconds
    pub period_secs: f64,
    /// Stop automatically after this many seconds; `None` runs until stopped
    pub duration_secs: Option<f64>,
    /// Longest wait for one sensor read before it counts as failed
    pub sensor_timeout_secs: f64,
    /// Entries kept in each history buffer
    pub history_capacity: usize,
    /// EMA factor on the light sensor channel
    pub height_alpha: f64,
    /// EMA factor on the rotor speed channel
    pub speed_alpha: f64,
    pub controller: ControllerConfig,
    /// Pitch commanded on arming
    pub initial_pitch: f64,
    /// Height proxy setpoint on arming, raw counts
    pub initial_target_height: f64,
    /// Allowed range for the height setpoint, raw counts
    pub target_height_limits: (f64, f64),
    /// Raw counts per increase/decrease command
    pub height_step: f64,
    /// Pitch degrees per manual nudge
    pub pitch_nudge: f64,
    /// True when the light reading drops as the rotor climbs
    pub reading_falls_with_height: bool,
    /// Rotor motor power, -100..=100
    pub rotor_power: i8,
    /// Multiplier applied to the calibrated actuator angle (mounting direction)
    pub actuator_sign: f64,
    /// Pitch the blades return to on stop
    pub rest_pitch: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period_secs: 0.05,
            duration_secs: Some(60.0),
            sensor_timeout_secs: 0.1,
            history_capacity: 2000,
            height_alpha: 0.65,
            speed_alpha: 0.65,
            controller: ControllerConfig::default(),
            initial_pitch: 100.0,
            initial_target_height: 410.0,
            target_height_limits: (0.0, 1000.0),
            height_step: 20.0,
            pitch_nudge: 100.0,
            reading_falls_with_height: true,
            rotor_power: 100,
            actuator_sign: -1.0,
            rest_pitch: 0.0,
        }
    }
}

impl LoopConfig {
    /// Check every setting before the loop is armed.
    ///
    /// # Errors
    /// [`ControlError::Configuration`] naming the first offending setting.
    pub fn validate(&self) -> ControlResult<()> {
        bounded("period_secs", self.period_secs, MAX_PERIOD_SECS)?;
        bounded(
            "sensor_timeout_secs",
            self.sensor_timeout_secs,
            MAX_SENSOR_TIMEOUT_SECS,
        )?;
        if let Some(duration) = self.duration_secs {
            positive("duration_secs", duration)?;
        }
        if self.history_capacity == 0 {
            return Err(ControlError::Configuration(
                "history_capacity must be > 0".to_string(),
            ));
        }
        validate_alpha("height_alpha", self.height_alpha)?;
        validate_alpha("speed_alpha", self.speed_alpha)?;

        self.controller.validate()?;
        let clamp = self.controller.pitch_min..=self.controller.pitch_max;
        for (name, pitch) in [
            ("initial_pitch", self.initial_pitch),
            ("rest_pitch", self.rest_pitch),
        ] {
            if !clamp.contains(&pitch) {
                return Err(ControlError::Configuration(format!(
                    "{name} {pitch} outside pitch clamp [{}, {}]",
                    self.controller.pitch_min, self.controller.pitch_max
                )));
            }
        }

        let (low, high) = self.target_height_limits;
        if !low.is_finite() || !high.is_finite() || low > high {
            return Err(ControlError::Configuration(format!(
                "target_height_limits invalid: ({low}, {high})"
            )));
        }
        if !(low..=high).contains(&self.initial_target_height) {
            return Err(ControlError::Configuration(format!(
                "initial_target_height {} outside ({low}, {high})",
                self.initial_target_height
            )));
        }
        non_negative("height_step", self.height_step)?;
        non_negative("pitch_nudge", self.pitch_nudge)?;

        if !(-100..=100).contains(&self.rotor_power) {
            return Err(ControlError::Configuration(format!(
                "rotor_power must be in [-100, 100], got {}",
                self.rotor_power
            )));
        }
        if !self.actuator_sign.is_finite() || self.actuator_sign == 0.0 {
            return Err(ControlError::Configuration(format!(
                "actuator_sign must be finite and nonzero, got {}",
                self.actuator_sign
            )));
        }
        Ok(())
    }

    /// Control period, limited to [`MAX_PERIOD_SECS`]. Zero if unset or invalid.
    pub fn period(&self) -> Duration {
        secs_to_duration(self.period_secs, MAX_PERIOD_SECS)
    }

    /// Sensor read timeout, limited to [`MAX_SENSOR_TIMEOUT_SECS`].
    pub fn sensor_timeout(&self) -> Duration {
        secs_to_duration(self.sensor_timeout_secs, MAX_SENSOR_TIMEOUT_SECS)
    }

    /// Signed height-step applied by an "increase target height" request.
    pub fn height_increase_delta(&self) -> f64 {
        if self.reading_falls_with_height {
            -self.height_step
        } else {
            self.height_step
        }
    }

    /// Load from JSON file; missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn positive(name: &str, value: f64) -> ControlResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ControlError::Configuration(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

fn bounded(name: &str, value: f64, max: f64) -> ControlResult<()> {
    positive(name, value)?;
    if value <= max {
        Ok(())
    } else {
        Err(ControlError::Configuration(format!(
            "{name} must be at most {max}, got {value}"
        )))
    }
}

fn secs_to_duration(secs: f64, max: f64) -> Duration {
    if secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs.min(max)).unwrap_or(Duration::ZERO)
}

fn non_negative(name: &str, value: f64) -> ControlResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ControlError::Configuration(format!(
            "{name} must be non-negative, got {value}"
        )))
    }
}
