//! Calibration polynomials converting raw rig units to physical units.
//!
//! Blade pitch is driven through an actuator whose encoder angle relates to
//! pitch by a cubic, fitted once in each direction. The light sensor reading
//! relates to lift force (in grams) by a quadratic. Coefficients are stored
//! highest power first, the order produced by the usual least-squares
//! polynomial fit:
//!
//! ```text
//! cubic:     y = c[0]·x³ + c[1]·x² + c[2]·x + c[3]
//! quadratic: y = c[0]·x² + c[1]·x + c[2]
//! ```
//!
//! The constant term of both cubics is exactly zero: actuator zero is defined
//! as the blades lying horizontal.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Standard gravity in newtons per gram.
pub const GRAVITY_N_PER_GRAM: f64 = 0.00980665;

const CUBIC_LEN: usize = 4;
const QUADRATIC_LEN: usize = 3;

/// Coefficient table as supplied by an external loader.
///
/// Stored as plain vectors so that a malformed file still deserializes and
/// can be rejected with a specific reason by [`CalibrationMapper::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    /// Blade pitch degrees -> actuator encoder degrees
    pub pitch_to_actuator: Vec<f64>,
    /// Actuator encoder degrees -> blade pitch degrees
    pub actuator_to_pitch: Vec<f64>,
    /// Raw light reading -> lift force in grams
    pub light_to_force: Vec<f64>,
}

impl CalibrationTable {
    /// Table that passes pitch straight through to the actuator.
    ///
    /// Useful on rigs where the controller's pitch units already are actuator
    /// degrees. Force conversion is the identity too.
    pub fn identity() -> Self {
        Self {
            pitch_to_actuator: vec![0.0, 0.0, 1.0, 0.0],
            actuator_to_pitch: vec![0.0, 0.0, 1.0, 0.0],
            light_to_force: vec![0.0, 1.0, 0.0],
        }
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Validated, read-only conversion layer.
///
/// Every conversion is a total function over finite inputs. The two pitch
/// mappings were fitted independently, so `actuator_to_pitch` is only an
/// approximate inverse of `pitch_to_actuator`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationMapper {
    pitch_to_actuator: [f64; CUBIC_LEN],
    actuator_to_pitch: [f64; CUBIC_LEN],
    light_to_force: [f64; QUADRATIC_LEN],
}

impl CalibrationMapper {
    /// Validate a table and build the mapper.
    ///
    /// # Errors
    /// [`ControlError::CalibrationShape`] if a coefficient list has the wrong
    /// length, contains a non-finite value, or a cubic has a nonzero
    /// constant term.
    pub fn new(table: &CalibrationTable) -> ControlResult<Self> {
        let pitch_to_actuator = cubic("pitch_to_actuator", &table.pitch_to_actuator)?;
        let actuator_to_pitch = cubic("actuator_to_pitch", &table.actuator_to_pitch)?;
        let light_to_force = fixed::<QUADRATIC_LEN>("light_to_force", &table.light_to_force)?;

        Ok(Self {
            pitch_to_actuator,
            actuator_to_pitch,
            light_to_force,
        })
    }

    /// Build from an optional table, as handed over by a loader.
    ///
    /// # Errors
    /// [`ControlError::CalibrationMissing`] when `table` is `None`, otherwise
    /// as [`new`](Self::new).
    pub fn from_optional(table: Option<&CalibrationTable>) -> ControlResult<Self> {
        match table {
            Some(table) => Self::new(table),
            None => Err(ControlError::CalibrationMissing),
        }
    }

    pub fn pitch_to_actuator(&self, pitch_deg: f64) -> f64 {
        horner(&self.pitch_to_actuator, pitch_deg)
    }

    pub fn actuator_to_pitch(&self, actuator_deg: f64) -> f64 {
        horner(&self.actuator_to_pitch, actuator_deg)
    }

    /// Lift force in grams for a raw light reading.
    pub fn sensor_to_force(&self, raw_reading: f64) -> f64 {
        horner(&self.light_to_force, raw_reading)
    }

    /// Lift in newtons for a raw light reading.
    pub fn sensor_to_lift_newtons(&self, raw_reading: f64) -> f64 {
        GRAVITY_N_PER_GRAM * self.sensor_to_force(raw_reading)
    }
}

fn horner(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().fold(0.0, |acc, c| acc * x + c)
}

fn cubic(name: &str, coefficients: &[f64]) -> ControlResult<[f64; CUBIC_LEN]> {
    let fixed = fixed::<CUBIC_LEN>(name, coefficients)?;
    let constant = fixed[CUBIC_LEN - 1];
    if constant != 0.0 {
        return Err(ControlError::CalibrationShape(format!(
            "{name} constant term must be 0 (actuator zero is blades horizontal), got {constant}"
        )));
    }
    Ok(fixed)
}

fn fixed<const N: usize>(name: &str, coefficients: &[f64]) -> ControlResult<[f64; N]> {
    let array: [f64; N] = coefficients.try_into().map_err(|_| {
        ControlError::CalibrationShape(format!(
            "{name} needs exactly {N} coefficients, got {}",
            coefficients.len()
        ))
    })?;
    if let Some(bad) = array.iter().find(|c| !c.is_finite()) {
        return Err(ControlError::CalibrationShape(format!(
            "{name} contains non-finite coefficient {bad}"
        )));
    }
    Ok(array)
}
