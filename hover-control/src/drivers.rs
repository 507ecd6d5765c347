//! Driver interfaces consumed by the control loop.
//!
//! Handles are passed into [`ControlLoop::new`](crate::ControlLoop::new)
//! explicitly, one session per physical device. Every call may fail; the loop
//! decides how to recover.

use crate::error::DriverError;

/// Pitch actuator, an encoder-positioned motor driving the blade pitch link.
pub trait ActuatorDriver: Send {
    /// Turn to an absolute encoder angle in degrees.
    fn turn_to(&mut self, angle_deg: f64) -> Result<(), DriverError>;

    /// Current encoder angle in degrees.
    fn get_position(&mut self) -> Result<f64, DriverError>;

    /// Stop any motion in progress and hold.
    ///
    /// The loop brakes on shutdown before commanding the rest angle.
    fn brake(&mut self) -> Result<(), DriverError>;

    /// Release the motor.
    ///
    /// Never called by the loop, which leaves the blades held at rest. For
    /// owners tearing the rig down after the loop has stopped.
    fn idle(&mut self) -> Result<(), DriverError>;

    /// Declare the current encoder angle to be zero.
    ///
    /// Called once while arming, with the blades horizontal.
    fn reset_position(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Rotor motor spinning the blades at a commanded power.
pub trait RotorDriver: Send {
    /// Spin at `power` percent, -100..=100.
    fn run(&mut self, power: i8) -> Result<(), DriverError>;

    /// Stop driving the rotor and let it coast.
    fn idle(&mut self) -> Result<(), DriverError>;
}

/// Light sensor and rotor encoder.
///
/// Implementations may block. The loop only reads through
/// [`TimedSensor`](crate::TimedSensor), which bounds the wait.
pub trait SensorDriver: Send + 'static {
    /// Raw light reading, the height proxy.
    fn get_lightness(&mut self) -> Result<f64, DriverError>;

    /// Rotor encoder position in degrees.
    fn get_position(&mut self) -> Result<f64, DriverError>;
}

impl<T: ActuatorDriver + ?Sized> ActuatorDriver for Box<T> {
    fn turn_to(&mut self, angle_deg: f64) -> Result<(), DriverError> {
        (**self).turn_to(angle_deg)
    }

    fn get_position(&mut self) -> Result<f64, DriverError> {
        (**self).get_position()
    }

    fn brake(&mut self) -> Result<(), DriverError> {
        (**self).brake()
    }

    fn idle(&mut self) -> Result<(), DriverError> {
        (**self).idle()
    }

    fn reset_position(&mut self) -> Result<(), DriverError> {
        (**self).reset_position()
    }
}

impl<T: RotorDriver + ?Sized> RotorDriver for Box<T> {
    fn run(&mut self, power: i8) -> Result<(), DriverError> {
        (**self).run(power)
    }

    fn idle(&mut self) -> Result<(), DriverError> {
        (**self).idle()
    }
}

impl<T: SensorDriver + ?Sized> SensorDriver for Box<T> {
    fn get_lightness(&mut self) -> Result<f64, DriverError> {
        (**self).get_lightness()
    }

    fn get_position(&mut self) -> Result<f64, DriverError> {
        (**self).get_position()
    }
}
