//! DC motor load experiment: DC machine under armature-voltage control
//! with a three-phase power meter on the supply.
//!
//! Starting commands the armature voltage and verifies it settled;
//! Running merges one meter pass with the drive's speed and torque into
//! each sample.

use std::time::Duration;

use tracing::{debug, warn};

use rig_core::cancel::CancelToken;
use rig_core::config::SetupConfig;
use rig_core::error::RigResult;
use rig_core::measurement::Measurement;
use rig_drivers::{DcDrive, PowerMeter};

use crate::results::ResultsSink;
use crate::state_machine::PhaseHandlers;

use super::{check_tolerance, ensure_not_cancelled, ExperimentRig, RunParams};

pub struct DcMotorLoad {
    drive: DcDrive,
    meter: PowerMeter,
    params: RunParams,
    results: ResultsSink,
}

impl DcMotorLoad {
    pub fn new(
        drive: DcDrive,
        meter: PowerMeter,
        setup: &SetupConfig,
        results: ResultsSink,
    ) -> Self {
        Self {
            drive,
            meter,
            params: RunParams::from(setup),
            results,
        }
    }

    async fn sample(&self) -> RigResult<Measurement> {
        let mut m = self.meter.read_measurement().await?;
        m.speed_rpm = self.drive.get_speed().await?;
        m.torque_nm = self.drive.get_torque().await?;
        Ok(m)
    }
}

#[async_trait::async_trait]
impl PhaseHandlers for DcMotorLoad {
    async fn initialising(&self, cancel: &CancelToken) -> RigResult<()> {
        ensure_not_cancelled(cancel)?;
        self.drive.initialise().await?;
        ensure_not_cancelled(cancel)
    }

    async fn starting(&self, cancel: &CancelToken) -> RigResult<()> {
        ensure_not_cancelled(cancel)?;
        self.drive.set_armature_voltage(self.params.setpoint).await?;
        ensure_not_cancelled(cancel)?;
        self.drive.enable_run().await?;
        ensure_not_cancelled(cancel)?;

        let measured = self.drive.get_armature_voltage().await?;
        check_tolerance(self.params.setpoint, measured, self.params.tolerance)
    }

    async fn running(&self, cancel: &CancelToken) -> RigResult<()> {
        for n in 0..self.params.samples {
            ensure_not_cancelled(cancel)?;
            tokio::time::sleep(Duration::from_secs(self.params.interval_s)).await;
            ensure_not_cancelled(cancel)?;

            if self.params.verify_during_run {
                let measured = self.drive.get_armature_voltage().await?;
                check_tolerance(self.params.setpoint, measured, self.params.tolerance)?;
            }

            let m = self.sample().await?;
            debug!(sample = n + 1, power = m.active_power_w, "sample taken");
            self.results.push(m);
        }
        self.results.finish();
        Ok(())
    }

    async fn stopping(&self) -> RigResult<()> {
        let mut first_err = None;
        if let Err(e) = self.drive.set_armature_voltage(0.0).await {
            first_err.get_or_insert(e);
        }
        if let Err(e) = self.drive.enable_drive_power(false).await {
            first_err.get_or_insert(e);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn finalising(&self) -> RigResult<()> {
        // Post-run health capture; the transports stay open for the
        // power-down bracket.
        let fault = self.drive.get_active_fault().await?;
        debug!(fault, "dc drive state at finalise");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExperimentRig for DcMotorLoad {
    async fn power_up(&self) -> RigResult<()> {
        let fault = self.drive.get_active_fault().await?;
        debug!(fault, "dc drive answered power-up probe");
        self.meter.get_frequency().await?;
        Ok(())
    }

    async fn power_down(&self) {
        if let Err(e) = self.drive.enable_drive_power(false).await {
            warn!(error = %e, "final power-down write failed");
        }
        if let Err(e) = self.drive.channel().close().await {
            warn!(error = %e, "drive channel close failed");
        }
        if let Err(e) = self.meter.channel().close().await {
            warn!(error = %e, "meter channel close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_channel::{DeviceChannel, MockTransport};
    use rig_core::config::ExecutionTimes;
    use rig_drivers::registers::{dc_drive_registers, power_meter_registers};
    use std::sync::Arc;

    fn setup() -> SetupConfig {
        SetupConfig {
            experiment: "dc_motor_load".into(),
            description: String::new(),
            times: ExecutionTimes {
                initialise_s: 1,
                start_s: 1,
                run_s: 2,
                stop_s: 1,
                finalise_s: 1,
            },
            devices: std::collections::HashMap::new(),
            setpoint: 200.0,
            tolerance: 10.0,
            samples: 2,
            interval_s: 1,
            verify_during_run: false,
            leave_power_enabled_on_init_failure: true,
            simulated: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn samples_merge_meter_and_drive_readings() {
        let drive_t = Arc::new(MockTransport::new());
        drive_t.link_registers(0x0001, 0x0020); // armature follows reference
        drive_t.set_register(0x0022, 10_000); // 750 rpm
        let meter_t = Arc::new(MockTransport::new());
        meter_t.set_register(0x0000, 4_600); // 230 V L1
        meter_t.set_register(0x0007, 5_000); // 50 Hz

        let rig = DcMotorLoad::new(
            DcDrive::new(DeviceChannel::new(drive_t, dc_drive_registers().shared())),
            PowerMeter::new(DeviceChannel::new(meter_t, power_meter_registers().shared())),
            &setup(),
            ResultsSink::new("exec-t", "dc1"),
        );

        rig.starting(&CancelToken::new()).await.unwrap();
        rig.running(&CancelToken::new()).await.unwrap();

        let avg = rig.results.snapshot().average.unwrap();
        assert!((avg.phase_voltage_v[0] - 230.0).abs() < 0.1);
        assert!((avg.frequency_hz - 50.0).abs() < 0.1);
        assert!(avg.speed_rpm > 0.0);
    }
}
