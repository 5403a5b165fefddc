//! AC machine drive driver.
//!
//! Reference: drive fieldbus profile, control via holding registers.
//!
//! Protocol overview:
//! - `control_word` takes the profile command words below; state changes
//!   need a verified write followed by the drive's settle time.
//! - `active_fault` holds the current fault code, zero when healthy.
//! - References (`speed_ref`, `max_current`) are written in engineering
//!   units through the register calibration; actual values are re-read
//!   from the drive on every getter, never cached.
//!
//! The driver is stateless beyond the open channel and the register map:
//! all real state lives in the drive's registers.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use rig_channel::{DeviceChannel, KeepAlive};
use rig_core::error::{RigError, RigResult};

/// Command word: close the main contactor, drive ready to run.
pub const CMD_POWER_ON: i32 = 0x047E;
/// Command word: run enabled.
pub const CMD_RUN: i32 = 0x047F;
/// Command word: coast stop, contactor open.
pub const CMD_POWER_OFF: i32 = 0x0476;
/// Command word: fault reset edge.
pub const CMD_FAULT_RESET: i32 = 0x04FE;

/// Settle after a plain command word change.
const SETTLE_COMMAND: Duration = Duration::from_secs(3);
/// Settle after a speed reference change (mechanical ramp).
const SETTLE_SPEED: Duration = Duration::from_secs(10);
/// Settle after a fault reset.
const SETTLE_RESET: Duration = Duration::from_secs(5);
/// Settle after writing a configuration register.
const SETTLE_CONFIG: Duration = Duration::from_secs(3);

/// Default configuration written during `initialise`.
const DEFAULT_MAX_CURRENT_A: f64 = 12.5;
const DEFAULT_ACCEL_TIME_S: f64 = 10.0;
const DEFAULT_DECEL_TIME_S: f64 = 10.0;

/// Driver for the AC machine drive.
pub struct AcDrive {
    channel: DeviceChannel,
    /// Whether `initialise` leaves drive power enabled when its reset
    /// sequence fails. Off by default: this drive family powers down on a
    /// failed initialise.
    leave_power_enabled_on_init_failure: bool,
}

impl AcDrive {
    pub fn new(channel: DeviceChannel) -> Self {
        Self {
            channel,
            leave_power_enabled_on_init_failure: false,
        }
    }

    /// Override the power-down-on-init-failure behaviour (per-setup
    /// configuration).
    pub fn with_power_policy(mut self, leave_enabled_on_failure: bool) -> Self {
        self.leave_power_enabled_on_init_failure = leave_enabled_on_failure;
        self
    }

    pub fn channel(&self) -> &DeviceChannel {
        &self.channel
    }

    /// Fixed initialise macro-operation: enable power, clear any active
    /// fault, write the default configuration batch.
    ///
    /// When any step fails and the power policy says so, a power-off is
    /// still attempted before the error propagates.
    pub async fn initialise(&self) -> RigResult<()> {
        info!("initialising ac drive");
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
        self.set_maximum_current(DEFAULT_MAX_CURRENT_A).await?;
        self.channel
            .write_verified("accel_time", DEFAULT_ACCEL_TIME_S, SETTLE_CONFIG)
            .await?;
        self.channel
            .write_verified("decel_time", DEFAULT_DECEL_TIME_S, SETTLE_CONFIG)
            .await?;
        Ok(())
    }

    /// Close or open the main contactor.
    pub async fn enable_drive_power(&self, enable: bool) -> RigResult<()> {
        let cmd = if enable { CMD_POWER_ON } else { CMD_POWER_OFF };
        debug!(enable, "ac drive power");
        self.channel
            .write_verified_raw("control_word", cmd, SETTLE_COMMAND)
            .await
    }

    /// Enable the run command; the drive ramps to the active reference.
    pub async fn enable_run(&self) -> RigResult<()> {
        self.channel
            .write_verified_raw("control_word", CMD_RUN, SETTLE_COMMAND)
            .await
    }

    /// Two-phase fault reset: read the active fault, command a reset (a
    /// verified write plus its settle), then confirm the fault register
    /// reads back zero.
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

    /// Command a speed setpoint in rpm. Blocks for the mechanical ramp.
    pub async fn set_speed(&self, rpm: f64) -> RigResult<()> {
        info!(rpm, "commanding speed setpoint");
        self.channel
            .write_verified("speed_ref", rpm, SETTLE_SPEED)
            .await
    }

    /// Set the drive current limit in amperes.
    pub async fn set_maximum_current(&self, amps: f64) -> RigResult<()> {
        self.channel
            .write_verified("max_current", amps, SETTLE_CONFIG)
            .await
    }

    /// Measured shaft speed in rpm.
    pub async fn get_speed(&self) -> RigResult<f64> {
        self.channel.read("speed_act").await
    }

    /// Measured shaft torque in Nm.
    pub async fn get_torque(&self) -> RigResult<f64> {
        self.channel.read("torque_act").await
    }

    /// Measured motor current in amperes.
    pub async fn get_current(&self) -> RigResult<f64> {
        self.channel.read("current_act").await
    }

    /// Drive temperature in degrees Celsius.
    pub async fn get_temperature(&self) -> RigResult<f64> {
        self.channel.read("temperature").await
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
impl KeepAlive for AcDrive {
    async fn keep_alive(&self) {
        AcDrive::keep_alive(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::ac_drive_registers;
    use rig_channel::mock::MockOp;
    use rig_channel::MockTransport;
    use std::sync::Arc;

    fn drive_on(transport: Arc<MockTransport>) -> AcDrive {
        AcDrive::new(DeviceChannel::new(transport, ac_drive_registers().shared()))
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_fault_and_confirms() {
        let transport = Arc::new(MockTransport::new());
        transport.set_register(0x0011, 0x2310);
        // The reset command clears the fault register.
        transport.on_write_set(0x0000, 0x0011, 0);

        let drive = drive_on(transport);
        drive.reset_drive().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_fails_with_fault_code_when_fault_persists() {
        let transport = Arc::new(MockTransport::new());
        transport.set_register(0x0011, 0x2310);
        // No clear rule: the fault survives the reset command.

        let drive = drive_on(transport);
        let err = drive.reset_drive().await.unwrap_err();
        assert!(matches!(err, RigError::FaultResetFailed { code: 0x2310 }));
        assert!(err.to_string().contains("0x2310"));
    }

    #[tokio::test(start_paused = true)]
    async fn initialise_powers_down_after_reset_failure() {
        let transport = Arc::new(MockTransport::new());
        transport.set_register(0x0011, 0x0042); // persistent fault

        let drive = drive_on(transport.clone());
        let err = drive.initialise().await.unwrap_err();
        assert!(matches!(err, RigError::FaultResetFailed { code: 0x42 }));

        // The last control-word write must be the power-off command.
        let last_cmd = transport
            .log()
            .iter()
            .rev()
            .find_map(|op| match op {
                MockOp::Write { address: 0x0000, values } => Some(values[0]),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_cmd as i32, CMD_POWER_OFF);
    }

    #[tokio::test(start_paused = true)]
    async fn initialise_leaves_power_when_policy_says_so() {
        let transport = Arc::new(MockTransport::new());
        transport.set_register(0x0011, 0x0042);

        let drive = drive_on(transport.clone()).with_power_policy(true);
        drive.initialise().await.unwrap_err();

        let last_cmd = transport
            .log()
            .iter()
            .rev()
            .find_map(|op| match op {
                MockOp::Write { address: 0x0000, values } => Some(values[0]),
                _ => None,
            })
            .unwrap();
        // Fault reset was the last command; no power-off followed.
        assert_eq!(last_cmd as i32, CMD_FAULT_RESET);
    }

    #[tokio::test(start_paused = true)]
    async fn set_speed_converts_to_raw() {
        let transport = Arc::new(MockTransport::new());
        let drive = drive_on(transport.clone());

        drive.set_speed(1400.0).await.unwrap();
        // 1400 rpm of 1500 over 20000 raw counts
        let raw = transport.register(0x0001).unwrap();
        assert!((raw as i32 - 18_666).abs() <= 1, "raw {}", raw);
    }

    #[tokio::test(start_paused = true)]
    async fn getters_reread_hardware_every_time() {
        let transport = Arc::new(MockTransport::new());
        let drive = drive_on(transport.clone());

        transport.set_register(0x0066, 10_000);
        assert!((drive.get_speed().await.unwrap() - 750.0).abs() <= 1.0);

        transport.set_register(0x0066, 20_000);
        assert!((drive.get_speed().await.unwrap() - 1500.0).abs() <= 1.0);
    }

    #[tokio::test]
    async fn keep_alive_swallows_transport_errors() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_read("link down");
        let drive = drive_on(transport);
        // Must not panic or propagate.
        drive.keep_alive().await;
    }
}
