//! Simulated rotor rig.
//!
//! A point mass on a rotor whose lift grows with blade pitch and rotor power.
//! Height follows with a lag, and the light sensor reading falls linearly with
//! height. Physics advances with wall-clock time whenever a driver is called,
//! so the rig behaves like hardware under the real-time control loop.
//!
//! [`SimulatedRig`] owns the shared state and hands out one driver per device
//! plus a [`FaultInjector`] for exercising the loop's recovery paths.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use hover_control::{
    ActuatorDriver, CalibrationMapper, DriverError, RotorDriver, SensorDriver,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Longest physics step; larger gaps are integrated in pieces.
const MAX_STEP_SECS: f64 = 0.01;

/// Physical parameters of the simulated rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigParams {
    /// Pitch at which full rotor power exactly balances weight
    pub hover_pitch: f64,
    /// Vertical acceleration (mm/s²) per pitch unit of surplus
    pub lift_gain: f64,
    /// Velocity damping (1/s)
    pub drag: f64,
    /// Highest reachable height (mm)
    pub max_height: f64,
    /// Sensor reading with the rig on the ground
    pub ground_reading: f64,
    /// Reading decrease per mm of height
    pub reading_per_mm: f64,
    /// Standard deviation of sensor noise, clipped to three sigma
    pub noise_std: f64,
    /// Actuator slew rate (deg/s)
    pub actuator_slew: f64,
    /// Encoder degrees per second at 100 % rotor power
    pub rotor_deg_per_sec: f64,
    /// Must match the loop's actuator sign
    pub actuator_sign: f64,
    pub seed: u64,
}

impl Default for RigParams {
    fn default() -> Self {
        Self {
            hover_pitch: 250.0,
            lift_gain: 2.0,
            drag: 3.0,
            max_height: 400.0,
            ground_reading: 600.0,
            reading_per_mm: 1.0,
            noise_std: 1.5,
            actuator_slew: 2000.0,
            rotor_deg_per_sec: 3600.0,
            actuator_sign: -1.0,
            seed: 7,
        }
    }
}

impl RigParams {
    /// Load from JSON file; missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Pending faults, consumed as they fire.
#[derive(Debug, Clone, Default)]
struct Faults {
    sensor_reads: u32,
    actuator_commands: u32,
    stall: Option<Duration>,
    absent: bool,
}

#[derive(Debug)]
struct RigState {
    params: RigParams,
    mapper: CalibrationMapper,
    rng: StdRng,
    last_update: Instant,
    height: f64,
    velocity: f64,
    actuator_angle: f64,
    actuator_target: f64,
    actuator_braked: bool,
    actuator_zero: f64,
    rotor_power: i8,
    rotor_position: f64,
    faults: Faults,
}

impl RigState {
    fn advance(&mut self) {
        let now = Instant::now();
        let mut remaining = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        while remaining > 0.0 {
            let dt = remaining.min(MAX_STEP_SECS);
            self.integrate(dt);
            remaining -= dt;
        }
    }

    fn integrate(&mut self, dt: f64) {
        if !self.actuator_braked {
            let max_move = self.params.actuator_slew * dt;
            let delta = (self.actuator_target - self.actuator_angle).clamp(-max_move, max_move);
            self.actuator_angle += delta;
        }

        let power = f64::from(self.rotor_power) / 100.0;
        self.rotor_position += self.params.rotor_deg_per_sec * power * dt;

        let surplus = power * self.pitch() - self.params.hover_pitch;
        let accel = self.params.lift_gain * surplus - self.params.drag * self.velocity;
        self.velocity += accel * dt;
        self.height += self.velocity * dt;

        if self.height <= 0.0 {
            self.height = 0.0;
            self.velocity = self.velocity.max(0.0);
        } else if self.height >= self.params.max_height {
            self.height = self.params.max_height;
            self.velocity = self.velocity.min(0.0);
        }
    }

    /// Blade pitch implied by the current actuator angle.
    fn pitch(&self) -> f64 {
        let angle = self.actuator_angle - self.actuator_zero;
        self.mapper.actuator_to_pitch(angle / self.params.actuator_sign)
    }

    fn reading(&mut self) -> f64 {
        let sigma = self.params.noise_std;
        let noise = if sigma > 0.0 {
            let z: f64 = self.rng.sample(StandardNormal);
            (sigma * z).clamp(-3.0 * sigma, 3.0 * sigma)
        } else {
            0.0
        };
        let clean = self.params.ground_reading - self.params.reading_per_mm * self.height;
        (clean + noise).max(0.0)
    }
}

/// Shared handle to the simulated rig.
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<RigState>>,
}

impl SimulatedRig {
    /// Build a rig at rest on the ground.
    ///
    /// `mapper` converts actuator angles back to pitch; pass the same
    /// calibration the loop uses for the model to match the controller.
    pub fn new(params: RigParams, mapper: CalibrationMapper) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        let state = RigState {
            params,
            mapper,
            rng,
            last_update: Instant::now(),
            height: 0.0,
            velocity: 0.0,
            actuator_angle: 0.0,
            actuator_target: 0.0,
            actuator_braked: false,
            actuator_zero: 0.0,
            rotor_power: 0,
            rotor_position: 0.0,
            faults: Faults::default(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Drivers for the three devices, all backed by this rig.
    pub fn drivers(&self) -> (SimActuator, SimRotor, SimSensor) {
        (
            SimActuator { rig: self.clone() },
            SimRotor { rig: self.clone() },
            SimSensor { rig: self.clone() },
        )
    }

    pub fn faults(&self) -> FaultInjector {
        FaultInjector { rig: self.clone() }
    }

    /// Current height in mm.
    pub fn height(&self) -> f64 {
        let mut state = self.lock();
        state.advance();
        state.height
    }

    /// Current blade pitch.
    pub fn pitch(&self) -> f64 {
        let mut state = self.lock();
        state.advance();
        state.pitch()
    }

    pub fn rotor_power(&self) -> i8 {
        self.lock().rotor_power
    }

    /// Noise-free sensor reading at the current height.
    pub fn ideal_reading(&self) -> f64 {
        let mut state = self.lock();
        state.advance();
        state.params.ground_reading - state.params.reading_per_mm * state.height
    }

    /// Height (mm) a given reading corresponds to.
    pub fn height_for_reading(&self, reading: f64) -> f64 {
        let state = self.lock();
        (state.params.ground_reading - reading) / state.params.reading_per_mm
    }

    fn lock(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Queues faults on a [`SimulatedRig`].
#[derive(Debug, Clone)]
pub struct FaultInjector {
    rig: SimulatedRig,
}

impl FaultInjector {
    /// Fail the next `count` sensor reads with a transport error.
    pub fn fail_sensor_reads(&self, count: u32) {
        self.rig.lock().faults.sensor_reads = count;
    }

    /// Fail the next `count` actuator commands.
    pub fn fail_actuator_commands(&self, count: u32) {
        self.rig.lock().faults.actuator_commands = count;
    }

    /// Block the next light read for `duration`.
    pub fn stall_sensor(&self, duration: Duration) {
        self.rig.lock().faults.stall = Some(duration);
    }

    /// Make the rotor and actuator refuse to start, as if unplugged.
    pub fn set_absent(&self, absent: bool) {
        self.rig.lock().faults.absent = absent;
    }
}

pub struct SimActuator {
    rig: SimulatedRig,
}

impl ActuatorDriver for SimActuator {
    fn turn_to(&mut self, angle_deg: f64) -> Result<(), DriverError> {
        let mut state = self.rig.lock();
        state.advance();
        if state.faults.absent {
            return Err(DriverError::Disconnected);
        }
        if state.faults.actuator_commands > 0 {
            state.faults.actuator_commands -= 1;
            return Err(DriverError::Io("actuator did not acknowledge".to_string()));
        }
        state.actuator_target = angle_deg + state.actuator_zero;
        state.actuator_braked = false;
        trace!("Sim actuator -> {angle_deg:.1} deg");
        Ok(())
    }

    fn get_position(&mut self) -> Result<f64, DriverError> {
        let mut state = self.rig.lock();
        state.advance();
        Ok(state.actuator_angle - state.actuator_zero)
    }

    fn brake(&mut self) -> Result<(), DriverError> {
        let mut state = self.rig.lock();
        state.advance();
        state.actuator_braked = true;
        Ok(())
    }

    fn idle(&mut self) -> Result<(), DriverError> {
        self.brake()
    }

    fn reset_position(&mut self) -> Result<(), DriverError> {
        let mut state = self.rig.lock();
        state.advance();
        if state.faults.absent {
            return Err(DriverError::Disconnected);
        }
        state.actuator_zero = state.actuator_angle;
        state.actuator_target = state.actuator_angle;
        Ok(())
    }
}

pub struct SimRotor {
    rig: SimulatedRig,
}

impl RotorDriver for SimRotor {
    fn run(&mut self, power: i8) -> Result<(), DriverError> {
        let mut state = self.rig.lock();
        state.advance();
        if state.faults.absent {
            return Err(DriverError::Hardware("rotor motor not detected".to_string()));
        }
        debug!("Sim rotor running at {power}%");
        state.rotor_power = power.clamp(-100, 100);
        Ok(())
    }

    fn idle(&mut self) -> Result<(), DriverError> {
        let mut state = self.rig.lock();
        state.advance();
        state.rotor_power = 0;
        Ok(())
    }
}

pub struct SimSensor {
    rig: SimulatedRig,
}

impl SensorDriver for SimSensor {
    fn get_lightness(&mut self) -> Result<f64, DriverError> {
        let stall = self.rig.lock().faults.stall.take();
        if let Some(duration) = stall {
            thread::sleep(duration);
        }

        let mut state = self.rig.lock();
        state.advance();
        if state.faults.sensor_reads > 0 {
            state.faults.sensor_reads -= 1;
            return Err(DriverError::Io("sensor did not respond".to_string()));
        }
        Ok(state.reading())
    }

    fn get_position(&mut self) -> Result<f64, DriverError> {
        let mut state = self.rig.lock();
        state.advance();
        Ok(state.rotor_position)
    }
}
