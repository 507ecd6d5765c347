//! The control loop flying the simulated rig.

use std::thread;
use std::time::Duration;

use hover_control::{
    CalibrationMapper, CalibrationTable, ControlError, ControlLoop, DriverError, LoopConfig,
    LoopState, StopReason,
};
use hover_rig::{ConfigStorage, RigParams, SimulatedRig};
use tempfile::TempDir;

fn rig_for(table: &CalibrationTable, config: &LoopConfig) -> SimulatedRig {
    let params = RigParams {
        actuator_sign: config.actuator_sign,
        ..RigParams::default()
    };
    SimulatedRig::new(params, CalibrationMapper::new(table).unwrap())
}

fn fast_config(duration: f64) -> LoopConfig {
    LoopConfig {
        period_secs: 0.01,
        duration_secs: Some(duration),
        sensor_timeout_secs: 0.05,
        history_capacity: 500,
        ..LoopConfig::default()
    }
}

#[test]
fn test_loop_lifts_rig_off_ground() {
    let table = CalibrationTable::identity();
    let config = fast_config(2.0);
    let rig = rig_for(&table, &config);
    let (actuator, rotor, sensor) = rig.drivers();

    let mut control = ControlLoop::new(config, Some(table), actuator, rotor, sensor);
    control.arm().unwrap();
    assert_eq!(rig.rotor_power(), 100);

    let report = control.spawn().unwrap().join();
    assert_eq!(report.stop_reason, StopReason::DurationElapsed);

    let records = report.history.snapshot();
    assert!(!records.is_empty());
    // On the ground the reading is ~600; the loop must have climbed past the noise
    assert!(records.iter().any(|r| r.smoothed_height < 590.0));
    for r in &records {
        assert!(r.smoothed_height.is_finite());
        assert!((0.0..=600.0).contains(&r.target_pitch));
        assert!(r.lift_newtons.is_finite());
    }

    // Shutdown idles the rotor and returns the blades to rest
    assert_eq!(rig.rotor_power(), 0);
    thread::sleep(Duration::from_millis(400));
    assert!(rig.pitch().abs() < 1e-6);
}

#[test]
fn test_bench_calibration_round_trips_through_rig() {
    let table = CalibrationTable {
        pitch_to_actuator: vec![-0.0014652558922855418, 0.1934999575854185, -18.44705231726227, 0.0],
        actuator_to_pitch: vec![4.556486037967993e-08, 8.482258482258921e-05, -0.04349909349909208, 0.0],
        light_to_force: vec![0.0, 1.0, 0.0],
    };
    let config = LoopConfig {
        initial_pitch: 30.0,
        actuator_sign: 1.0,
        controller: hover_control::ControllerConfig {
            pitch_max: 66.0,
            ..Default::default()
        },
        ..fast_config(0.3)
    };
    let rig = rig_for(&table, &config);
    let (actuator, rotor, sensor) = rig.drivers();

    let mut control = ControlLoop::new(config, Some(table), actuator, rotor, sensor);
    control.arm().unwrap();
    thread::sleep(Duration::from_millis(300));
    // Fitted pair is only an approximate inverse
    assert!((rig.pitch() - 30.0).abs() < 1.5, "pitch {}", rig.pitch());
}

#[test]
fn test_sensor_faults_are_counted_not_fatal() {
    let table = CalibrationTable::identity();
    let config = fast_config(0.6);
    let rig = rig_for(&table, &config);
    let faults = rig.faults();
    let (actuator, rotor, sensor) = rig.drivers();

    let mut control = ControlLoop::new(config, Some(table), actuator, rotor, sensor);
    control.arm().unwrap();
    faults.fail_sensor_reads(5);
    faults.fail_actuator_commands(3);
    let handle = control.spawn().unwrap();
    thread::sleep(Duration::from_millis(150));
    faults.stall_sensor(Duration::from_millis(200));
    let report = handle.join();

    assert!(report.stats.sensor_failures >= 5);
    assert!(report.stats.sensor_timeouts >= 1);
    assert_eq!(report.stats.actuator_failures, 3);
    assert!(report.history.snapshot().iter().any(|r| !r.sensor_valid));
    assert!(report
        .history
        .snapshot()
        .iter()
        .all(|r| r.smoothed_height.is_finite()));
}

#[test]
fn test_absent_hardware_fails_arming() {
    let table = CalibrationTable::identity();
    let config = fast_config(1.0);
    let rig = rig_for(&table, &config);
    rig.faults().set_absent(true);
    let (actuator, rotor, sensor) = rig.drivers();

    let mut control = ControlLoop::new(config, Some(table), actuator, rotor, sensor);
    assert_eq!(control.arm(), Err(ControlError::Arming(DriverError::Disconnected)));
    assert_eq!(control.state(), LoopState::Idle);
}

#[test]
fn test_config_directory_drives_loop() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("calibration.json"),
        serde_json::to_string(&CalibrationTable::identity()).unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("loop.json"),
        r#"{ "period_secs": 0.01, "duration_secs": 0.2, "history_capacity": 5 }"#,
    )
    .unwrap();

    let storage = ConfigStorage::with_path(dir.path().to_path_buf());
    let table = storage.get_calibration().unwrap().unwrap();
    let config = storage.get_loop_config().unwrap().unwrap();
    let rig = rig_for(&table, &config);
    let (actuator, rotor, sensor) = rig.drivers();

    let mut control = ControlLoop::new(config, Some(table), actuator, rotor, sensor);
    control.arm().unwrap();
    let report = control.spawn().unwrap().join();
    assert_eq!(report.history.len(), 5);
    assert!(report.stats.cycles > 5);
}

#[test]
fn test_shipped_configs_are_valid() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../config");
    let storage = ConfigStorage::with_path(root.clone());

    let table = storage.get_calibration().unwrap().unwrap();
    let config = storage.get_loop_config().unwrap().unwrap();
    config.validate().unwrap();
    CalibrationMapper::new(&table).unwrap();
    assert_eq!(config, LoopConfig::default());

    let bench_table = CalibrationTable::load_from_file(&root.join("calibration_bench.json")).unwrap();
    let bench_config = LoopConfig::load_from_file(&root.join("loop_bench.json")).unwrap();
    bench_config.validate().unwrap();
    let bench_rig = RigParams::load_from_file(&root.join("rig_bench.json")).unwrap();
    assert_eq!(bench_rig.actuator_sign, bench_config.actuator_sign);
    CalibrationMapper::new(&bench_table).unwrap();
}
