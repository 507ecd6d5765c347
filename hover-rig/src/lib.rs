//! Collaborators that make the altitude-hold loop runnable without hardware.
//!
//! - [`sim`] - simulated rotor rig implementing the driver traits, with fault
//!   injection
//! - [`console`] - operator line commands
//! - [`config_storage`] - read-only loader for calibration, loop and rig
//!   settings from a config directory

pub mod config_storage;
pub mod console;
pub mod sim;

pub use config_storage::ConfigStorage;
pub use console::ConsoleCommand;
pub use sim::{FaultInjector, RigParams, SimActuator, SimRotor, SimSensor, SimulatedRig};
