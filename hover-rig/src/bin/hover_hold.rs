//! Hold the rig at a target height.
//!
//! Loads calibration and loop settings, arms the loop against the simulated
//! rig and reads operator commands from stdin until stopped:
//! - `up` / `down`: move the height target one step
//! - `pitch+` / `pitch-`: nudge the pitch setpoint
//! - `height <reading>`: set the target reading directly
//! - `stop`: shut down

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use hover_control::{
    CalibrationMapper, CalibrationTable, ControlLaw, ControlLoop, LoopConfig, LoopReport,
};
use hover_rig::{ConfigStorage, ConsoleCommand, RigParams, SimulatedRig};
use tracing::{info, warn};

/// How often the console loop wakes to drain telemetry.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LawArg {
    Incremental,
    Positional,
}

impl From<LawArg> for ControlLaw {
    fn from(law: LawArg) -> Self {
        match law {
            LawArg::Incremental => ControlLaw::Incremental,
            LawArg::Positional => ControlLaw::Positional,
        }
    }
}

/// Closed-loop altitude hold on the rotor rig
#[derive(Parser, Debug)]
#[command(name = "hover_hold")]
#[command(about = "Hold a light-sensor rotor rig at a target height")]
#[command(version)]
struct Args {
    /// Config directory (defaults to ~/.hover_config)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Calibration table JSON, overrides the config directory
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Loop configuration JSON, overrides the config directory
    #[arg(long)]
    loop_config: Option<PathBuf>,

    /// Simulator parameters JSON, overrides the config directory
    #[arg(long)]
    rig_params: Option<PathBuf>,

    /// Run time in seconds (0 = until `stop`)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Control period in seconds
    #[arg(short, long)]
    period: Option<f64>,

    /// Target height reading
    #[arg(short, long)]
    target: Option<f64>,

    /// Control law
    #[arg(long, value_enum)]
    law: Option<LawArg>,

    /// Simulator noise seed
    #[arg(long)]
    seed: Option<u64>,

    /// Simulate unplugged hardware
    #[arg(long)]
    absent: bool,

    /// Write the final history as JSON records
    #[arg(long)]
    history_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let storage = args
        .config_dir
        .clone()
        .map(ConfigStorage::with_path)
        .unwrap_or_default();
    info!("Using config directory {}", storage.root_path().display());

    let calibration = load_calibration(&args, &storage)?;
    let config = load_loop_config(&args, &storage)?;
    let mut params = match (&args.rig_params, storage.get_rig_params()) {
        (Some(path), _) => RigParams::load_from_file(path)
            .with_context(|| format!("failed to load rig parameters from {}", path.display()))?,
        (None, Some(params)) => params.context("failed to load rig parameters")?,
        (None, None) => RigParams::default(),
    };
    params.actuator_sign = config.actuator_sign;
    if let Some(seed) = args.seed {
        params.seed = seed;
    }

    let sim_mapper = match calibration.as_ref().map(CalibrationMapper::new) {
        Some(Ok(mapper)) => mapper,
        // Missing or malformed tables are reported by arm()
        _ => CalibrationMapper::new(&CalibrationTable::identity())?,
    };
    let rig = SimulatedRig::new(params, sim_mapper);
    if args.absent {
        rig.faults().set_absent(true);
    }
    let (actuator, rotor, sensor) = rig.drivers();

    let mut control = ControlLoop::new(config, calibration, actuator, rotor, sensor);
    control.on_setpoint_change(Box::new(|event| info!("Setpoint changed: {event:?}")));
    control.arm().context("failed to arm control loop")?;
    let handle = control.spawn().context("failed to start control loop")?;

    let (console_tx, console_rx) = unbounded();
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(command) => {
                        if console_tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
        })
        .context("failed to start console thread")?;

    info!("Commands: up, down, pitch+, pitch-, height <reading>, stop");
    while !handle.is_finished() {
        match console_rx.recv_timeout(POLL_INTERVAL) {
            Ok(ConsoleCommand::Setpoint(command)) => handle.send(command),
            Ok(ConsoleCommand::Stop) => break,
            Err(RecvTimeoutError::Timeout) => {}
            // stdin closed; keep running until the duration elapses
            Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }
        if let Some(latest) = handle.poll_telemetry().last() {
            info!(
                "t={:.1}s height {:.1} (target {:.1}), pitch {:.1}, lift {:.3} N, rig {:.0} mm",
                latest.time,
                latest.smoothed_height,
                latest.target_height,
                latest.target_pitch,
                latest.lift_newtons,
                rig.height()
            );
        }
    }

    let report = handle.stop_and_join();
    log_summary(&report);

    if let Some(path) = &args.history_out {
        let json = serde_json::to_string_pretty(&report.history.snapshot())?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write history to {}", path.display()))?;
        info!("History written to {}", path.display());
    }

    Ok(())
}

fn load_calibration(args: &Args, storage: &ConfigStorage) -> Result<Option<CalibrationTable>> {
    if let Some(path) = &args.calibration {
        let table = CalibrationTable::load_from_file(path)
            .with_context(|| format!("failed to load calibration from {}", path.display()))?;
        return Ok(Some(table));
    }
    match storage.get_calibration() {
        Some(table) => Ok(Some(table.with_context(|| {
            format!(
                "failed to load calibration from {}",
                storage.calibration_path().display()
            )
        })?)),
        None => {
            warn!(
                "No calibration at {}",
                storage.calibration_path().display()
            );
            Ok(None)
        }
    }
}

fn load_loop_config(args: &Args, storage: &ConfigStorage) -> Result<LoopConfig> {
    let mut config = if let Some(path) = &args.loop_config {
        LoopConfig::load_from_file(path)
            .with_context(|| format!("failed to load loop config from {}", path.display()))?
    } else {
        match storage.get_loop_config() {
            Some(config) => config.context("failed to load loop config")?,
            None => LoopConfig::default(),
        }
    };

    if let Some(duration) = args.duration {
        if !duration.is_finite() || duration < 0.0 {
            bail!("duration must be a non-negative number of seconds, got {duration}");
        }
        config.duration_secs = (duration > 0.0).then_some(duration);
    }
    if let Some(period) = args.period {
        config.period_secs = period;
    }
    if let Some(target) = args.target {
        config.initial_target_height = target;
    }
    if let Some(law) = args.law {
        config.controller.law = law.into();
    }
    Ok(config)
}

fn log_summary(report: &LoopReport) {
    let stats = &report.stats;
    info!(
        "Stopped ({:?}) after {} cycles: {} sensor failures ({} timeouts), {} actuator failures, {} saturated, {} overruns",
        report.stop_reason,
        stats.cycles,
        stats.sensor_failures,
        stats.sensor_timeouts,
        stats.actuator_failures,
        stats.saturated_cycles,
        stats.overruns
    );
    match report.history.records().back() {
        Some(last) => info!(
            "Final height {:.1} (target {:.1}), pitch {:.1}, lift {:.3} N; {} records kept",
            last.smoothed_height,
            last.target_height,
            last.target_pitch,
            last.lift_newtons,
            report.history.len()
        ),
        None => info!("No cycles recorded"),
    }
}
