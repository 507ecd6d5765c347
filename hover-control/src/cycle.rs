//! One control period: filter, estimate, control, map, record.
//!
//! [`ControlCycle`] holds all per-session state except the drivers, so the
//! whole pipeline can be stepped deterministically with explicit timestamps.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::calibration::CalibrationMapper;
use crate::config::LoopConfig;
use crate::controller::{ControlOutput, ControllerState, FeedbackController};
use crate::error::{ControlError, ControlResult, DriverError, SensorChannel};
use crate::filter::ExponentialFilter;
use crate::rate::{SpeedEstimator, VerticalRateEstimator};
use crate::setpoint::{SetpointCommand, SetpointEvent, SetpointObservers};
use crate::types::{History, HistoryRecord, RawSample, SmoothedSample};

/// Result of one [`ControlCycle::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub raw: RawSample,
    pub smoothed: SmoothedSample,
    pub control: ControlOutput,
    /// Vertical rate fed to the D term
    pub height_rate: f64,
    /// Absolute actuator angle to command, sign applied
    pub actuator_angle: f64,
    /// Sensor failures substituted this cycle
    pub sensor_errors: Vec<ControlError>,
}

impl CycleReport {
    /// The height channel read correctly and the controller acted.
    pub fn height_valid(&self) -> bool {
        !self
            .sensor_errors
            .iter()
            .any(|e| matches!(e, ControlError::SensorRead { channel: SensorChannel::Height, .. }))
    }
}

/// Filters, estimators, controller and history for one session.
#[derive(Debug)]
pub struct ControlCycle {
    mapper: Arc<CalibrationMapper>,
    height_filter: ExponentialFilter,
    speed: SpeedEstimator,
    vertical_rate: VerticalRateEstimator,
    controller: FeedbackController,
    history: History,
    observers: SetpointObservers,
    last_raw_height: Option<f64>,
    last_raw_position: Option<f64>,
    height_increase_delta: f64,
    pitch_nudge: f64,
    target_height_limits: (f64, f64),
    actuator_sign: f64,
}

impl ControlCycle {
    /// # Errors
    /// [`ControlError::Configuration`] if `config` fails validation.
    pub fn new(config: &LoopConfig, mapper: Arc<CalibrationMapper>) -> ControlResult<Self> {
        config.validate()?;
        Ok(Self {
            mapper,
            height_filter: ExponentialFilter::new(config.height_alpha)?,
            speed: SpeedEstimator::new(config.speed_alpha)?,
            vertical_rate: VerticalRateEstimator::new(),
            controller: FeedbackController::new(
                config.controller,
                config.initial_pitch,
                config.initial_target_height,
            )?,
            history: History::new(config.history_capacity),
            observers: SetpointObservers::new(),
            last_raw_height: None,
            last_raw_position: None,
            height_increase_delta: config.height_increase_delta(),
            pitch_nudge: config.pitch_nudge,
            target_height_limits: config.target_height_limits,
            actuator_sign: config.actuator_sign,
        })
    }

    pub(crate) fn set_observers(&mut self, observers: SetpointObservers) {
        self.observers = observers;
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Move the history out, leaving an empty single-entry one behind.
    pub(crate) fn take_history(&mut self) -> History {
        std::mem::replace(&mut self.history, History::new(1))
    }

    pub fn controller_state(&self) -> &ControllerState {
        self.controller.state()
    }

    pub fn mapper(&self) -> &CalibrationMapper {
        &self.mapper
    }

    /// Calibrated, signed actuator angle for a pitch.
    pub fn actuator_angle(&self, pitch: f64) -> f64 {
        self.actuator_sign * self.mapper.pitch_to_actuator(pitch)
    }

    /// Apply one setpoint request and notify observers.
    pub fn apply(&mut self, command: SetpointCommand) -> Option<SetpointEvent> {
        let event = match command {
            SetpointCommand::IncreaseTargetHeight => {
                self.shift_target_height(self.height_increase_delta)
            }
            SetpointCommand::DecreaseTargetHeight => {
                self.shift_target_height(-self.height_increase_delta)
            }
            SetpointCommand::SetTargetHeight(target) => self.set_target_height(target),
            SetpointCommand::IncreasePitch => self.nudge_pitch(self.pitch_nudge),
            SetpointCommand::DecreasePitch => self.nudge_pitch(-self.pitch_nudge),
            SetpointCommand::NudgePitch(delta) => self.nudge_pitch(delta),
        }?;

        debug!("Setpoint change: {event:?}");
        self.observers.notify(&event);
        Some(event)
    }

    fn nudge_pitch(&mut self, delta: f64) -> Option<SetpointEvent> {
        if !delta.is_finite() {
            warn!("Ignoring non-finite pitch nudge {delta}");
            return None;
        }
        let (from, to) = self.controller.nudge_pitch(delta);
        Some(SetpointEvent::PitchNudged { from, to })
    }

    fn shift_target_height(&mut self, delta: f64) -> Option<SetpointEvent> {
        let target = self.controller.target_height() + delta;
        self.set_target_height(target)
    }

    fn set_target_height(&mut self, target: f64) -> Option<SetpointEvent> {
        if !target.is_finite() {
            warn!("Ignoring non-finite target height {target}");
            return None;
        }
        let (low, high) = self.target_height_limits;
        let to = target.clamp(low, high);
        let from = self.controller.set_target_height(to);
        Some(SetpointEvent::TargetHeightChanged { from, to })
    }

    /// Run one cycle on the readings taken at `time` (seconds since start).
    ///
    /// A failed or non-finite height read freezes the smoothed height, holds
    /// the pitch and leaves the rate window untouched. A failed position read
    /// substitutes the last good position (zero before the first). The cycle
    /// itself never fails and never records a non-finite value.
    pub fn step(
        &mut self,
        time: f64,
        height: Result<f64, DriverError>,
        position: Result<f64, DriverError>,
    ) -> CycleReport {
        let mut sensor_errors = Vec::new();

        let raw_position = match finite(position) {
            Ok(p) => {
                self.last_raw_position = Some(p);
                p
            }
            Err(source) => {
                let substitute = self.last_raw_position.unwrap_or(0.0);
                warn!("Rotor position read failed ({source}), using {substitute}");
                sensor_errors.push(ControlError::SensorRead {
                    channel: SensorChannel::RotorPosition,
                    source,
                });
                substitute
            }
        };

        let seeded = self.height_filter.value().is_some();
        let (raw_height, smoothed_height, height_ok) = match finite(height) {
            Ok(h) => {
                self.last_raw_height = Some(h);
                let smoothed = self.height_filter.update(h);
                self.vertical_rate.push(time, smoothed);
                (h, smoothed, true)
            }
            Err(source) => {
                let substitute = self.last_raw_height.unwrap_or(0.0);
                let frozen = self.height_filter.value().unwrap_or(substitute);
                warn!("Height read failed ({source}), holding smoothed height {frozen:.1}");
                sensor_errors.push(ControlError::SensorRead {
                    channel: SensorChannel::Height,
                    source,
                });
                (substitute, frozen, false)
            }
        };

        let smoothed_speed = self.speed.update(time, raw_position);
        let height_rate = self.vertical_rate.mean_rate();

        // The seed cycle has nothing to compare against; hold until the
        // filter has a history.
        let control = if height_ok && seeded {
            self.controller.update(smoothed_height, height_rate)
        } else {
            self.controller.hold()
        };
        if control.saturated {
            debug!(
                "Pitch clamped: {:.2} -> {:.2}",
                control.unclamped_pitch, control.pitch
            );
        }

        let actuator_angle = self.actuator_angle(control.pitch);

        let raw = RawSample::new(time, raw_height, raw_position);
        let smoothed = SmoothedSample {
            time,
            smoothed_height,
            smoothed_speed,
        };
        let record = HistoryRecord {
            time,
            raw_position,
            smoothed_speed,
            smoothed_height,
            target_height: self.controller.target_height(),
            target_pitch: control.pitch,
            lift_newtons: self.mapper.sensor_to_lift_newtons(smoothed_height),
            sensor_valid: sensor_errors.is_empty(),
        };
        self.history.push(raw, smoothed, record);

        CycleReport {
            raw,
            smoothed,
            control,
            height_rate,
            actuator_angle,
            sensor_errors,
        }
    }
}

fn finite(reading: Result<f64, DriverError>) -> Result<f64, DriverError> {
    match reading {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(v) => Err(DriverError::InvalidReading(v)),
        Err(e) => Err(e),
    }
}
