//! Configuration storage for rig calibration and loop settings.
//!
//! All config is read from ~/.hover_config/ by default:
//! - `calibration.json` - [`CalibrationTable`]
//! - `loop.json` - [`LoopConfig`]
//! - `rig.json` - [`RigParams`] for the simulator
//!
//! Storage is read-only; files are written by hand or by bench tooling.

use std::path::{Path, PathBuf};

use hover_control::{CalibrationTable, LoopConfig};

use crate::sim::RigParams;

const CALIBRATION_FILE: &str = "calibration.json";
const LOOP_CONFIG_FILE: &str = "loop.json";
const RIG_PARAMS_FILE: &str = "rig.json";

/// Configuration storage manager for the hover rig.
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    /// Root directory for all configuration (e.g., ~/.hover_config)
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.hover_config)
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        let root_path = PathBuf::from(home).join(".hover_config");
        Ok(Self { root_path })
    }

    /// Create a new config storage with custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    /// Get the root configuration path
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.root_path.join(CALIBRATION_FILE)
    }

    pub fn loop_config_path(&self) -> PathBuf {
        self.root_path.join(LOOP_CONFIG_FILE)
    }

    pub fn rig_params_path(&self) -> PathBuf {
        self.root_path.join(RIG_PARAMS_FILE)
    }

    /// Get the calibration table.
    ///
    /// Returns None if no calibration exists.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn get_calibration(&self) -> Option<std::io::Result<CalibrationTable>> {
        let path = self.calibration_path();

        if !path.exists() {
            return None;
        }

        Some(CalibrationTable::load_from_file(&path))
    }

    /// Get the loop configuration, if one is stored.
    pub fn get_loop_config(&self) -> Option<std::io::Result<LoopConfig>> {
        let path = self.loop_config_path();

        if !path.exists() {
            return None;
        }

        Some(LoopConfig::load_from_file(&path))
    }

    /// Get the simulator parameters, if stored.
    pub fn get_rig_params(&self) -> Option<std::io::Result<RigParams>> {
        let path = self.rig_params_path();

        if !path.exists() {
            return None;
        }

        Some(RigParams::load_from_file(&path))
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(PathBuf::from(".hover_config")))
    }
}
