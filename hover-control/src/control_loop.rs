//! The control loop state machine and its worker thread.
//!
//! ```text
//! Idle --arm()--> Armed --spawn()--> Running --stop / duration--> Stopped
//! ```
//!
//! `Stopped` is terminal. Arming validates configuration and calibration,
//! zeroes the actuator, starts the rotor and commands the initial pitch. The
//! running loop is the only writer of controller state and history; other
//! threads talk to it through a [`LoopHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::calibration::{CalibrationMapper, CalibrationTable};
use crate::config::LoopConfig;
use crate::cycle::ControlCycle;
use crate::drivers::{ActuatorDriver, RotorDriver, SensorDriver};
use crate::error::{ControlError, ControlResult, DriverError};
use crate::sensor_reader::TimedSensor;
use crate::setpoint::{SetpointCommand, SetpointObserver, SetpointObservers};
use crate::types::{History, HistoryRecord};

/// Live telemetry records buffered for a slow reader before new ones are dropped.
const TELEMETRY_DEPTH: usize = 256;

/// Control loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    /// Constructed, calibration not yet validated
    Idle,
    /// Calibration validated, rotor running, not yet cycling
    Armed,
    /// Cycling on the worker thread
    Running,
    /// Rotor idled, pitch returned to rest; terminal
    Stopped,
}

/// Why the loop left `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A stop was requested through the handle
    Requested,
    /// The configured run duration elapsed
    DurationElapsed,
}

/// Counters accumulated while running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub cycles: u64,
    /// Cycles with at least one substituted sensor channel
    pub sensor_failures: u64,
    /// Reads that hit the timeout (also counted in `sensor_failures`)
    pub sensor_timeouts: u64,
    pub actuator_failures: u64,
    /// Cycles whose output was limited by the pitch clamp
    pub saturated_cycles: u64,
    /// Cycles that took longer than the period
    pub overruns: u64,
}

/// Everything the loop hands back when it terminates.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub history: History,
    pub stats: LoopStats,
    pub stop_reason: StopReason,
}

/// Altitude-hold control loop over injected drivers.
pub struct ControlLoop<A, R, S> {
    state: LoopState,
    config: LoopConfig,
    calibration: Option<CalibrationTable>,
    mapper: Option<Arc<CalibrationMapper>>,
    actuator: A,
    rotor: R,
    sensor: S,
    observers: SetpointObservers,
}

impl<A, R, S> ControlLoop<A, R, S>
where
    A: ActuatorDriver + 'static,
    R: RotorDriver + 'static,
    S: SensorDriver,
{
    /// Create an idle loop. Nothing touches the hardware until [`arm`](Self::arm).
    pub fn new(
        config: LoopConfig,
        calibration: Option<CalibrationTable>,
        actuator: A,
        rotor: R,
        sensor: S,
    ) -> Self {
        Self {
            state: LoopState::Idle,
            config,
            calibration,
            mapper: None,
            actuator,
            rotor,
            sensor,
            observers: SetpointObservers::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Register a callback for applied setpoint changes.
    ///
    /// Observers run on the loop thread, between cycles.
    pub fn on_setpoint_change(&mut self, observer: SetpointObserver) {
        self.observers.register(observer);
    }

    /// Validate everything and bring the rig up.
    ///
    /// # Errors
    /// - [`ControlError::Configuration`] for invalid settings
    /// - [`ControlError::CalibrationMissing`] / [`ControlError::CalibrationShape`]
    ///   for an absent or malformed table
    /// - [`ControlError::Arming`] if a driver refuses to start; the rotor is
    ///   idled again on a best-effort basis
    /// - [`ControlError::InvalidTransition`] unless the loop is `Idle`
    pub fn arm(&mut self) -> ControlResult<()> {
        if self.state != LoopState::Idle {
            return Err(ControlError::InvalidTransition {
                state: self.state,
                action: "arm",
            });
        }

        self.config.validate()?;
        let mapper = CalibrationMapper::from_optional(self.calibration.as_ref())?;
        let initial_angle =
            self.config.actuator_sign * mapper.pitch_to_actuator(self.config.initial_pitch);

        self.actuator.reset_position().map_err(ControlError::Arming)?;
        self.rotor
            .run(self.config.rotor_power)
            .map_err(ControlError::Arming)?;
        if let Err(e) = self.actuator.turn_to(initial_angle) {
            self.idle_rotor();
            return Err(ControlError::Arming(e));
        }

        info!(
            "Armed: rotor power {}, initial pitch {:.1} (actuator {:.1} deg), target height {:.1}",
            self.config.rotor_power,
            self.config.initial_pitch,
            initial_angle,
            self.config.initial_target_height
        );
        self.mapper = Some(Arc::new(mapper));
        self.state = LoopState::Armed;
        Ok(())
    }

    /// Start cycling on a dedicated thread.
    ///
    /// If the loop cannot start after arming, the rotor is idled and the
    /// pitch returned to rest before the error is returned.
    ///
    /// # Errors
    /// - [`ControlError::InvalidTransition`] unless the loop is `Armed`
    /// - [`ControlError::Arming`] if the loop thread cannot be started
    pub fn spawn(mut self) -> ControlResult<LoopHandle> {
        let mapper = match (&self.state, &self.mapper) {
            (LoopState::Armed, Some(mapper)) => mapper.clone(),
            _ => {
                return Err(ControlError::InvalidTransition {
                    state: self.state,
                    action: "spawn",
                })
            }
        };

        let mut cycle = match ControlCycle::new(&self.config, mapper) {
            Ok(cycle) => cycle,
            Err(e) => {
                self.idle_rotor();
                return Err(e);
            }
        };
        cycle.set_observers(self.observers);

        let (command_tx, command_rx) = unbounded();
        let (telemetry_tx, telemetry_rx) = bounded(TELEMETRY_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(LoopState::Running));

        let worker = Worker {
            config: self.config.clone(),
            cycle,
            actuator: self.actuator,
            rotor: self.rotor,
            sensor: TimedSensor::spawn(self.sensor, self.config.sensor_timeout()),
            commands: command_rx,
            telemetry: telemetry_tx,
            stop: stop.clone(),
            state: state.clone(),
            stats: LoopStats::default(),
            shut_down: false,
        };

        info!(
            "Control loop running at {:.0} ms period",
            self.config.period_secs * 1000.0
        );
        // On failure the closure is dropped, and the worker's Drop brings the rig down
        let join = thread::Builder::new()
            .name("control-loop".to_string())
            .spawn(move || worker.run())
            .map_err(|e| ControlError::Arming(DriverError::from(e)))?;

        Ok(LoopHandle {
            commands: command_tx,
            telemetry: telemetry_rx,
            stop,
            state,
            join: Some(join),
        })
    }

    fn idle_rotor(&mut self) {
        if let Err(e) = self.rotor.idle() {
            warn!("Failed to idle rotor after arming: {e}");
        }
    }
}

/// Handle to a running loop.
///
/// All setpoint requests are queued and applied by the loop thread between
/// cycles. Dropping the handle requests a stop and waits for the loop to
/// finish its current cycle.
pub struct LoopHandle {
    commands: Sender<SetpointCommand>,
    telemetry: Receiver<HistoryRecord>,
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<LoopState>>,
    join: Option<JoinHandle<LoopReport>>,
}

impl LoopHandle {
    pub fn increase_target_height(&self) {
        self.send(SetpointCommand::IncreaseTargetHeight);
    }

    pub fn decrease_target_height(&self) {
        self.send(SetpointCommand::DecreaseTargetHeight);
    }

    pub fn set_target_height(&self, target: f64) {
        self.send(SetpointCommand::SetTargetHeight(target));
    }

    /// Shift the pitch setpoint by `delta` degrees, staying inside the pitch clamp.
    pub fn nudge_pitch(&self, delta: f64) {
        self.send(SetpointCommand::NudgePitch(delta));
    }

    pub fn increase_pitch(&self) {
        self.send(SetpointCommand::IncreasePitch);
    }

    pub fn decrease_pitch(&self) {
        self.send(SetpointCommand::DecreasePitch);
    }

    /// Queue an arbitrary setpoint command.
    pub fn send(&self, command: SetpointCommand) {
        if self.commands.send(command).is_err() {
            debug!("Loop already finished, dropping {command:?}");
        }
    }

    /// Ask the loop to stop after its current cycle.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn state(&self) -> LoopState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True once the loop thread has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// Poll until the loop exits or `timeout` passes. Returns `true` if it exited.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.is_finished() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.is_finished()
    }

    /// All live records published since the last poll (non-blocking).
    pub fn poll_telemetry(&self) -> Vec<HistoryRecord> {
        self.telemetry.try_iter().collect()
    }

    /// Wait for the loop to stop on its own (duration elapsed or stop requested).
    pub fn join(mut self) -> LoopReport {
        self.wait()
    }

    /// Request a stop and wait for the loop to shut down.
    pub fn stop_and_join(self) -> LoopReport {
        self.stop();
        self.join()
    }

    fn wait(&mut self) -> LoopReport {
        let handle = self.join.take();
        match handle.map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            None => unreachable!("LoopHandle joined twice"),
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.join.take() {
            self.stop.store(true, Ordering::Release);
            if handle.join().is_err() {
                warn!("Control loop thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("state", &self.state())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// State moved onto the loop thread.
///
/// Dropping a worker that never shut down (thread failed to start, or a
/// panic unwound through the cycle) still idles the rotor and rests the pitch.
struct Worker<A: ActuatorDriver, R: RotorDriver> {
    config: LoopConfig,
    cycle: ControlCycle,
    actuator: A,
    rotor: R,
    sensor: TimedSensor,
    commands: Receiver<SetpointCommand>,
    telemetry: Sender<HistoryRecord>,
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<LoopState>>,
    stats: LoopStats,
    shut_down: bool,
}

impl<A: ActuatorDriver, R: RotorDriver> Worker<A, R> {
    fn run(mut self) -> LoopReport {
        let period = self.config.period();
        let duration = self.config.duration_secs;
        let start = Instant::now();
        let mut next_deadline = start;

        let stop_reason = loop {
            if self.stop.load(Ordering::Acquire) {
                break StopReason::Requested;
            }
            let now = start.elapsed().as_secs_f64();
            if duration.is_some_and(|d| now >= d) {
                break StopReason::DurationElapsed;
            }

            self.run_cycle(now);

            next_deadline += period;
            let after = Instant::now();
            if after < next_deadline {
                thread::sleep(next_deadline - after);
            } else {
                // Free-run: timing uses measured time, so just restart the schedule
                self.stats.overruns += 1;
                trace!("Cycle overran period by {:?}", after - next_deadline);
                next_deadline = after;
            }
        };

        info!(
            "Stopping control loop ({stop_reason:?}) after {} cycles",
            self.stats.cycles
        );
        self.shutdown();
        self.set_state(LoopState::Stopped);

        LoopReport {
            history: self.cycle.take_history(),
            stats: self.stats,
            stop_reason,
        }
    }

    fn run_cycle(&mut self, now: f64) {
        for command in self.commands.try_iter() {
            self.cycle.apply(command);
        }

        let (height, position) = match self.sensor.read() {
            Ok(reading) => (reading.lightness, reading.position),
            Err(e) => {
                if e == DriverError::Timeout {
                    self.stats.sensor_timeouts += 1;
                }
                (Err(e.clone()), Err(e))
            }
        };

        let report = self.cycle.step(now, height, position);
        self.stats.cycles += 1;
        if !report.sensor_errors.is_empty() {
            self.stats.sensor_failures += 1;
        }
        if report.control.saturated {
            self.stats.saturated_cycles += 1;
        }

        // A failed command is simply reissued with the next cycle's angle
        if let Err(source) = self.actuator.turn_to(report.actuator_angle) {
            self.stats.actuator_failures += 1;
            let err = ControlError::ActuatorCommand {
                angle_deg: report.actuator_angle,
                source,
            };
            warn!("{err}; retrying next cycle");
        }

        if let Some(record) = self.cycle.history().records().back() {
            if let Err(TrySendError::Full(_)) = self.telemetry.try_send(*record) {
                trace!("Telemetry reader lagging, dropping live record");
            }
        }
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
        if let Err(e) = self.rotor.idle() {
            warn!("Failed to idle rotor: {e}");
        }
        // Stop the move in flight before re-targeting
        if let Err(e) = self.actuator.brake() {
            warn!("Failed to brake actuator: {e}");
        }
        let rest_angle = self.cycle.actuator_angle(self.config.rest_pitch);
        if let Err(e) = self.actuator.turn_to(rest_angle) {
            warn!("Failed to return pitch to rest ({rest_angle:.1} deg): {e}");
        }
        match self.actuator.get_position() {
            Ok(position) => debug!("Actuator at {position:.1} deg after stop"),
            Err(e) => debug!("Actuator position unavailable after stop: {e}"),
        }
    }

    fn set_state(&self, state: LoopState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl<A: ActuatorDriver, R: RotorDriver> Drop for Worker<A, R> {
    fn drop(&mut self) {
        if !self.shut_down {
            warn!("Control loop ended without shutting down, idling the rig");
            self.shutdown();
            self.set_state(LoopState::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct NullActuator;

    /// Counts rotor idles and actuator brakes.
    #[derive(Clone, Default)]
    struct Counters {
        rotor_idles: Arc<AtomicUsize>,
        brakes: Arc<AtomicUsize>,
        last_angle: Arc<Mutex<Option<f64>>>,
    }

    impl ActuatorDriver for Counters {
        fn turn_to(&mut self, angle_deg: f64) -> Result<(), DriverError> {
            *self.last_angle.lock().unwrap() = Some(angle_deg);
            Ok(())
        }
        fn get_position(&mut self) -> Result<f64, DriverError> {
            Ok(self.last_angle.lock().unwrap().unwrap_or(0.0))
        }
        fn brake(&mut self) -> Result<(), DriverError> {
            self.brakes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn idle(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    impl RotorDriver for Counters {
        fn run(&mut self, _power: i8) -> Result<(), DriverError> {
            Ok(())
        }
        fn idle(&mut self) -> Result<(), DriverError> {
            self.rotor_idles.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn build_worker(
        config: LoopConfig,
        rig: &Counters,
    ) -> (Worker<Counters, Counters>, Arc<Mutex<LoopState>>) {
        let mapper = CalibrationMapper::new(&CalibrationTable::identity()).unwrap();
        let cycle = ControlCycle::new(&config, Arc::new(mapper)).unwrap();
        let (_command_tx, command_rx) = unbounded();
        let (telemetry_tx, _telemetry_rx) = bounded(1);
        let state = Arc::new(Mutex::new(LoopState::Running));
        let worker = Worker {
            sensor: TimedSensor::spawn(ConstantSensor, config.sensor_timeout()),
            config,
            cycle,
            actuator: rig.clone(),
            rotor: rig.clone(),
            commands: command_rx,
            telemetry: telemetry_tx,
            stop: Arc::new(AtomicBool::new(false)),
            state: state.clone(),
            stats: LoopStats::default(),
            shut_down: false,
        };
        (worker, state)
    }

    impl ActuatorDriver for NullActuator {
        fn turn_to(&mut self, _angle_deg: f64) -> Result<(), DriverError> {
            Ok(())
        }
        fn get_position(&mut self) -> Result<f64, DriverError> {
            Ok(0.0)
        }
        fn brake(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        fn idle(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    struct AbsentRotor;

    impl RotorDriver for AbsentRotor {
        fn run(&mut self, _power: i8) -> Result<(), DriverError> {
            Err(DriverError::Disconnected)
        }
        fn idle(&mut self) -> Result<(), DriverError> {
            Err(DriverError::Disconnected)
        }
    }

    struct ConstantSensor;

    impl SensorDriver for ConstantSensor {
        fn get_lightness(&mut self) -> Result<f64, DriverError> {
            Ok(410.0)
        }
        fn get_position(&mut self) -> Result<f64, DriverError> {
            Ok(0.0)
        }
    }

    #[test]
    fn test_starts_idle_and_refuses_to_spawn() {
        let ctl = ControlLoop::new(
            LoopConfig::default(),
            Some(CalibrationTable::identity()),
            NullActuator,
            AbsentRotor,
            ConstantSensor,
        );
        assert_eq!(ctl.state(), LoopState::Idle);
        let err = ctl.spawn().unwrap_err();
        assert_eq!(
            err,
            ControlError::InvalidTransition {
                state: LoopState::Idle,
                action: "spawn"
            }
        );
    }

    #[test]
    fn test_absent_hardware_reported() {
        let mut ctl = ControlLoop::new(
            LoopConfig::default(),
            Some(CalibrationTable::identity()),
            NullActuator,
            AbsentRotor,
            ConstantSensor,
        );
        assert_eq!(
            ctl.arm(),
            Err(ControlError::Arming(DriverError::Disconnected))
        );
        assert_eq!(ctl.state(), LoopState::Idle);
    }

    #[test]
    fn test_unstarted_worker_idles_rig_on_drop() {
        let rig = Counters::default();
        let config = LoopConfig {
            rest_pitch: 20.0,
            ..LoopConfig::default()
        };
        let (worker, state) = build_worker(config, &rig);
        drop(worker);

        assert_eq!(rig.rotor_idles.load(Ordering::SeqCst), 1);
        assert_eq!(rig.brakes.load(Ordering::SeqCst), 1);
        assert_eq!(*rig.last_angle.lock().unwrap(), Some(-20.0));
        assert_eq!(*state.lock().unwrap(), LoopState::Stopped);
    }

    #[test]
    fn test_finished_worker_shuts_down_once() {
        let rig = Counters::default();
        let config = LoopConfig {
            period_secs: 0.005,
            duration_secs: Some(0.02),
            ..LoopConfig::default()
        };
        let (worker, state) = build_worker(config, &rig);
        let report = worker.run();

        assert_eq!(report.stop_reason, StopReason::DurationElapsed);
        assert!(report.stats.cycles > 0);
        assert_eq!(rig.rotor_idles.load(Ordering::SeqCst), 1);
        assert_eq!(rig.brakes.load(Ordering::SeqCst), 1);
        assert_eq!(*state.lock().unwrap(), LoopState::Stopped);
    }
}
