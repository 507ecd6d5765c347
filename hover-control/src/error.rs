//! Error types for the control core and the drivers it consumes.

use thiserror::Error;

use crate::control_loop::LoopState;

/// Errors reported by actuator, rotor and sensor drivers.
///
/// These cover transport problems only. The control loop decides whether a
/// given driver error is recoverable (in-loop) or fatal (during arming).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Low-level transport failure, carried as text so the error stays `Clone`.
    #[error("IO error: {0}")]
    Io(String),

    /// No answer within the allowed wait.
    #[error("Timeout waiting for driver")]
    Timeout,

    /// The device (or its reader thread) is gone.
    #[error("Driver disconnected")]
    Disconnected,

    /// The device answered with a value that cannot be used (NaN, infinite).
    #[error("Invalid reading: {0}")]
    InvalidReading(f64),

    /// Device-specific failure reported by the hardware.
    #[error("Hardware error: {0}")]
    Hardware(String),
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Io(e.to_string())
    }
}

/// Which sensor channel a read failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorChannel {
    /// Light sensor, the height proxy.
    Height,
    /// Rotor encoder.
    RotorPosition,
}

impl std::fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorChannel::Height => write!(f, "height"),
            SensorChannel::RotorPosition => write!(f, "rotor position"),
        }
    }
}

/// Errors raised by the control core.
///
/// `SensorRead` and `ActuatorCommand` are recoverable and only ever logged by
/// the running loop. The calibration and configuration variants are fatal and
/// surface from [`ControlLoop::arm`](crate::ControlLoop::arm) before the loop
/// starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    /// A sensor channel could not be read this cycle.
    #[error("Sensor read failed on {channel} channel: {source}")]
    SensorRead {
        channel: SensorChannel,
        #[source]
        source: DriverError,
    },

    /// The actuator rejected an angle command.
    #[error("Actuator command to {angle_deg:.1} deg failed: {source}")]
    ActuatorCommand {
        angle_deg: f64,
        #[source]
        source: DriverError,
    },

    /// No calibration table was supplied.
    #[error("Calibration table missing")]
    CalibrationMissing,

    /// A calibration table was supplied but has the wrong shape or values.
    #[error("Malformed calibration table: {0}")]
    CalibrationShape(String),

    /// Loop configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A driver refused to start (hardware absent or unresponsive).
    #[error("Arming failed: {0}")]
    Arming(#[source] DriverError),

    /// An operation was requested in a state that does not allow it.
    #[error("Cannot {action} while {state:?}")]
    InvalidTransition {
        state: LoopState,
        action: &'static str,
    },
}

/// Result type for control core operations.
pub type ControlResult<T> = Result<T, ControlError>;
