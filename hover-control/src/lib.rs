//! Closed-loop altitude hold for a light-sensor rotor rig.
//!
//! A rotor spins at constant power while a pitch actuator changes the blade
//! angle. A light sensor under the rig serves as the height proxy. Each cycle
//! the loop samples the sensor and rotor encoder, smooths the readings, derives
//! a vertical rate, runs an incremental PD law on pitch and commands the
//! actuator through a calibration table.
//!
//! # Layout
//! - [`ring_buffer`] - fixed-capacity sample history
//! - [`filter`] / [`rate`] - exponential smoothing and rate estimation
//! - [`controller`] - PD law with output clamp
//! - [`calibration`] - pitch/actuator/lift polynomials
//! - [`cycle`] - one sampling cycle, independent of threads and drivers
//! - [`control_loop`] - state machine, worker thread and [`LoopHandle`]
//! - [`drivers`] - hardware traits the loop is generic over
//! - [`sensor_reader`] - sensor reads with a bounded wait
//!
//! ```no_run
//! use hover_control::{CalibrationTable, ControlLoop, LoopConfig};
//! # use hover_control::{ActuatorDriver, RotorDriver, SensorDriver};
//! # fn rig() -> (Box<dyn ActuatorDriver>, Box<dyn RotorDriver>, Box<dyn SensorDriver>) {
//! #     unimplemented!()
//! # }
//! let (actuator, rotor, sensor) = rig();
//! let mut control = ControlLoop::new(
//!     LoopConfig::default(),
//!     Some(CalibrationTable::identity()),
//!     actuator,
//!     rotor,
//!     sensor,
//! );
//! control.arm()?;
//! let handle = control.spawn()?;
//! handle.increase_target_height();
//! let report = handle.stop_and_join();
//! println!("{} cycles", report.stats.cycles);
//! # Ok::<(), hover_control::ControlError>(())
//! ```

pub mod calibration;
pub mod config;
pub mod control_loop;
pub mod controller;
pub mod cycle;
pub mod drivers;
pub mod error;
pub mod filter;
pub mod rate;
pub mod ring_buffer;
pub mod sensor_reader;
pub mod setpoint;
pub mod types;

pub use calibration::{CalibrationMapper, CalibrationTable, GRAVITY_N_PER_GRAM};
pub use config::{LoopConfig, MAX_PERIOD_SECS, MAX_SENSOR_TIMEOUT_SECS};
pub use control_loop::{ControlLoop, LoopHandle, LoopReport, LoopState, LoopStats, StopReason};
pub use controller::{
    ControlLaw, ControlOutput, ControllerConfig, ControllerState, FeedbackController,
};
pub use cycle::{ControlCycle, CycleReport};
pub use drivers::{ActuatorDriver, RotorDriver, SensorDriver};
pub use error::{ControlError, ControlResult, DriverError, SensorChannel};
pub use filter::ExponentialFilter;
pub use rate::{SpeedEstimator, VerticalRateEstimator};
pub use ring_buffer::SampleBuffer;
pub use sensor_reader::{SensorReading, TimedSensor};
pub use setpoint::{SetpointCommand, SetpointEvent, SetpointObserver, SetpointObservers};
pub use types::{History, HistoryRecord, RawSample, SmoothedSample};
