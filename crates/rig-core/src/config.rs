//! Per-setup configuration loading.
//!
//! Configuration is TOML, loaded with figment and validated after
//! extraction. Each `[setups.<id>]` table supplies the five phase
//! durations, device addresses and slave IDs, tolerance and measurement
//! parameters, and optional calibration overrides.
//!
//! ```toml
//! [setups.sync_speed_1]
//! experiment = "synchronous_speed"
//! setpoint = 1400.0
//! tolerance = 50.0
//!
//! [setups.sync_speed_1.times]
//! initialise_s = 20
//! start_s = 15
//! run_s = 30
//! stop_s = 15
//! finalise_s = 5
//!
//! [setups.sync_speed_1.devices.ac_drive]
//! address = "10.0.1.20:502"
//! slave_id = 1
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use figment::providers::{Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::codec::RegisterDescriptor;
use crate::error::{RigError, RigResult};

/// Expected duration in seconds for each of the five phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTimes {
    pub initialise_s: u64,
    pub start_s: u64,
    pub run_s: u64,
    pub stop_s: u64,
    pub finalise_s: u64,
}

impl ExecutionTimes {
    /// Derived total run duration.
    pub fn total_s(&self) -> u64 {
        self.initialise_s + self.start_s + self.run_s + self.stop_s + self.finalise_s
    }
}

/// Network/serial endpoint of one device on the rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    /// `host:port` for Modbus/TCP.
    pub address: String,
    /// Modbus slave address on the link.
    pub slave_id: u8,
    /// Serial device path when the link is RTU instead of TCP.
    #[serde(default)]
    pub serial_port: Option<String>,
    /// Calibration overrides replacing the driver's built-in descriptors.
    #[serde(default)]
    pub calibration: Vec<CalibrationOverride>,
}

/// Replacement calibration tuple for one register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationOverride {
    pub register: String,
    pub address: u16,
    #[serde(default = "one")]
    pub words: u8,
    #[serde(default)]
    pub units: String,
    pub raw_zero: i32,
    pub raw_full: i32,
    #[serde(default)]
    pub raw_offset: i32,
    pub eng_zero: f64,
    pub eng_full: f64,
}

fn one() -> u8 {
    1
}

impl CalibrationOverride {
    /// Descriptor built from the override values.
    pub fn descriptor(&self) -> RegisterDescriptor {
        RegisterDescriptor {
            name: self.register.clone(),
            address: self.address,
            words: self.words,
            units: self.units.clone(),
            raw_zero: self.raw_zero,
            raw_full: self.raw_full,
            raw_offset: self.raw_offset,
            eng_zero: self.eng_zero,
            eng_full: self.eng_full,
        }
    }
}

/// One experiment setup as loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Experiment type resolved by the engine registry
    /// (e.g. `"synchronous_speed"`).
    pub experiment: String,
    /// Human-readable description for validation reports.
    #[serde(default)]
    pub description: String,
    pub times: ExecutionTimes,
    /// Devices keyed by role (`ac_drive`, `power_meter`, ...).
    pub devices: HashMap<String, DeviceEndpoint>,
    /// Commanded setpoint in engineering units (rpm, V, ...). Zero for
    /// experiments without one.
    #[serde(default)]
    pub setpoint: f64,
    /// Tolerance band around the setpoint.
    #[serde(default)]
    pub tolerance: f64,
    /// Number of measurement samples taken during Running.
    #[serde(default = "default_samples")]
    pub samples: u32,
    /// Seconds between samples.
    #[serde(default = "default_interval")]
    pub interval_s: u64,
    /// Whether the measured value is re-verified against the tolerance band
    /// before each sample during Running.
    #[serde(default)]
    pub verify_during_run: bool,
    /// Whether drive power is left enabled when `initialise()` fails.
    /// The two drive families on the original rigs disagreed on this, so it
    /// is an explicit setting instead of a baked-in behaviour.
    #[serde(default)]
    pub leave_power_enabled_on_init_failure: bool,
    /// Run against the simulated transport instead of hardware.
    #[serde(default)]
    pub simulated: bool,
}

fn default_samples() -> u32 {
    3
}

fn default_interval() -> u64 {
    1
}

/// Root configuration: all setups this process can execute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigConfig {
    #[serde(default)]
    pub setups: HashMap<String, SetupConfig>,
}

impl RigConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: RigConfig = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string (tests, embedded defaults).
    pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
        let config: RigConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what serde can express.
    pub fn validate(&self) -> RigResult<()> {
        for (id, setup) in &self.setups {
            if setup.devices.is_empty() {
                return Err(RigError::Config(format!(
                    "setup '{}' defines no devices",
                    id
                )));
            }
            if setup.samples == 0 {
                return Err(RigError::Config(format!(
                    "setup '{}': samples must be at least 1",
                    id
                )));
            }
            if setup.interval_s == 0 {
                return Err(RigError::Config(format!(
                    "setup '{}': interval_s must be at least 1",
                    id
                )));
            }
            if setup.tolerance < 0.0 {
                return Err(RigError::Config(format!(
                    "setup '{}': tolerance must not be negative",
                    id
                )));
            }
            for (role, dev) in &setup.devices {
                if dev.serial_port.is_none() && !dev.address.contains(':') {
                    return Err(RigError::Config(format!(
                        "setup '{}', device '{}': address '{}' is not host:port",
                        id, role, dev.address
                    )));
                }
            }
        }
        Ok(())
    }

    /// Setup lookup; an unknown id is [`RigError::InvalidSetupId`].
    pub fn setup(&self, setup_id: &str) -> RigResult<&SetupConfig> {
        self.setups
            .get(setup_id)
            .ok_or_else(|| RigError::InvalidSetupId(setup_id.to_string()))
    }
}
