//! DC machine drive driver.
//!
//! Same channel discipline as the AC drive, different command set and
//! calibrations. One behavioural difference is deliberate: by default this
//! drive family leaves power state to the caller when `initialise` fails,
//! where the AC drive powers itself down. The per-setup
//! `leave_power_enabled_on_init_failure` flag overrides either default.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use rig_channel::{DeviceChannel, KeepAlive};
use rig_core::error::{RigError, RigResult};

/// Command word: armature supply on.
pub const CMD_POWER_ON: i32 = 0x0001;
/// Command word: run, regulators released.
pub const CMD_RUN: i32 = 0x0003;
/// Command word: everything off.
pub const CMD_POWER_OFF: i32 = 0x0000;
/// Command word: fault acknowledge.
pub const CMD_FAULT_RESET: i32 = 0x0080;

const SETTLE_COMMAND: Duration = Duration::from_secs(3);
const SETTLE_ARMATURE: Duration = Duration::from_secs(8);
const SETTLE_RESET: Duration = Duration::from_secs(4);
const SETTLE_CONFIG: Duration = Duration::from_secs(3);

/// Default field current written during `initialise`.
const DEFAULT_FIELD_CURRENT_A: f64 = 1.2;

/// Driver for the DC machine drive.
pub struct DcDrive {
    channel: DeviceChannel,
    leave_power_enabled_on_init_failure: bool,
}

impl DcDrive {
    pub fn new(channel: DeviceChannel) -> Self {
        Self {
            channel,
            // This drive family historically left power handling to the
            // caller on a failed initialise.
            leave_power_enabled_on_init_failure: true,
        }
    }

    /// Override the power-down-on-init-failure behaviour.
    pub fn with_power_policy(mut self, leave_enabled_on_failure: bool) -> Self {
        self.leave_power_enabled_on_init_failure = leave_enabled_on_failure;
        self
    }

    pub fn channel(&self) -> &DeviceChannel {
        &self.channel
    }

    /// Enable power, clear faults, write the default field current.
    pub async fn initialise(&self) -> RigResult<()> {
        info!("initialising dc drive");
        self.enable_drive_power(true).await?;

        let result = self.initialise_sequence().await;
        if result.is_err() && !self.leave_power_enabled_on_init_failure {
            if let Err(e) = self.enable_drive_power(false).await {
                warn!(error = %e, "power-off after failed initialise also failed");
            }
        }
        result
    }

    async fn initialise_sequence(&self) -> RigResult<()> {
        self.reset_drive().await?;
        self.set_field_current(DEFAULT_FIELD_CURRENT_A).await?;
        Ok(())
    }

    /// Switch the armature supply.
    pub async fn enable_drive_power(&self, enable: bool) -> RigResult<()> {
        let cmd = if enable { CMD_POWER_ON } else { CMD_POWER_OFF };
        debug!(enable, "dc drive power");
        self.channel
            .write_verified_raw("control_word", cmd, SETTLE_COMMAND)
            .await
    }

    /// Release the regulators.
    pub async fn enable_run(&self) -> RigResult<()> {
        self.channel
            .write_verified_raw("control_word", CMD_RUN, SETTLE_COMMAND)
            .await
    }

    /// Two-phase fault reset, confirmed by re-reading the fault register.
    pub async fn reset_drive(&self) -> RigResult<()> {
        let fault = self.channel.read_raw("active_fault").await?;
        if fault != 0 {
            debug!(fault, "active fault before reset");
        }

        self.channel
            .write_verified_raw("control_word", CMD_FAULT_RESET, SETTLE_RESET)
            .await?;

        let fault = self.channel.read_raw("active_fault").await?;
        if fault != 0 {
            return Err(RigError::FaultResetFailed { code: fault as u16 });
        }
        Ok(())
    }

    /// Command an armature voltage setpoint in volts.
    pub async fn set_armature_voltage(&self, volts: f64) -> RigResult<()> {
        info!(volts, "commanding armature voltage");
        self.channel
            .write_verified("armature_ref", volts, SETTLE_ARMATURE)
            .await
    }

    /// Set the field current reference in amperes.
    pub async fn set_field_current(&self, amps: f64) -> RigResult<()> {
        self.channel
            .write_verified("field_ref", amps, SETTLE_CONFIG)
            .await
    }

    /// Measured armature voltage in volts.
    pub async fn get_armature_voltage(&self) -> RigResult<f64> {
        self.channel.read("armature_act").await
    }

    /// Measured armature current in amperes.
    pub async fn get_armature_current(&self) -> RigResult<f64> {
        self.channel.read("armature_current").await
    }

    /// Measured shaft speed in rpm.
    pub async fn get_speed(&self) -> RigResult<f64> {
        self.channel.read("speed_act").await
    }

    /// Measured shaft torque in Nm.
    pub async fn get_torque(&self) -> RigResult<f64> {
        self.channel.read("torque_act").await
    }

    /// Current fault code, zero when healthy.
    pub async fn get_active_fault(&self) -> RigResult<u16> {
        Ok(self.channel.read_raw("active_fault").await? as u16)
    }

    /// Fire-and-forget status read keeping the session alive.
    pub async fn keep_alive(&self) {
        self.channel.keep_alive_read("status_word").await;
    }
}

#[async_trait]
impl KeepAlive for DcDrive {
    async fn keep_alive(&self) {
        DcDrive::keep_alive(self).await;
    }
}
