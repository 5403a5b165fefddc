//! Synchronous-speed experiment: AC machine driven to a commanded speed.
//!
//! The rig is a single AC drive. Starting commands the speed reference,
//! releases the run bit and verifies the measured speed against the
//! tolerance band; Running samples speed, torque, current and temperature.

use std::time::Duration;

use tracing::{debug, info, warn};

use rig_core::cancel::CancelToken;
use rig_core::config::SetupConfig;
use rig_core::error::RigResult;
use rig_core::measurement::Measurement;
use rig_drivers::AcDrive;

use crate::results::ResultsSink;
use crate::state_machine::PhaseHandlers;

use super::{check_tolerance, ensure_not_cancelled, ExperimentRig, RunParams};

pub struct SynchronousSpeed {
    drive: AcDrive,
    params: RunParams,
    results: ResultsSink,
}

impl SynchronousSpeed {
    pub fn new(drive: AcDrive, setup: &SetupConfig, results: ResultsSink) -> Self {
        Self {
            drive,
            params: RunParams::from(setup),
            results,
        }
    }

    async fn sample(&self) -> RigResult<Measurement> {
        let mut m = Measurement::default();
        m.speed_rpm = self.drive.get_speed().await?;
        m.torque_nm = self.drive.get_torque().await?;
        m.phase_current_a[0] = self.drive.get_current().await?;
        m.temperature_c = self.drive.get_temperature().await?;
        Ok(m)
    }
}

#[async_trait::async_trait]
impl PhaseHandlers for SynchronousSpeed {
    async fn initialising(&self, cancel: &CancelToken) -> RigResult<()> {
        ensure_not_cancelled(cancel)?;
        self.drive.initialise().await?;
        ensure_not_cancelled(cancel)
    }

    async fn starting(&self, cancel: &CancelToken) -> RigResult<()> {
        ensure_not_cancelled(cancel)?;
        self.drive.set_speed(self.params.setpoint).await?;
        ensure_not_cancelled(cancel)?;
        self.drive.enable_run().await?;
        ensure_not_cancelled(cancel)?;

        let measured = self.drive.get_speed().await?;
        info!(
            commanded = self.params.setpoint,
            measured, "speed after settle"
        );
        check_tolerance(self.params.setpoint, measured, self.params.tolerance)
    }

    async fn running(&self, cancel: &CancelToken) -> RigResult<()> {
        for n in 0..self.params.samples {
            ensure_not_cancelled(cancel)?;
            tokio::time::sleep(Duration::from_secs(self.params.interval_s)).await;
            ensure_not_cancelled(cancel)?;

            if self.params.verify_during_run {
                let measured = self.drive.get_speed().await?;
                check_tolerance(self.params.setpoint, measured, self.params.tolerance)?;
            }

            let m = self.sample().await?;
            debug!(sample = n + 1, speed = m.speed_rpm, "sample taken");
            self.results.push(m);
        }
        self.results.finish();
        Ok(())
    }

    async fn stopping(&self) -> RigResult<()> {
        let mut first_err = None;
        if let Err(e) = self.drive.set_speed(0.0).await {
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
        // Post-run health capture; the transport stays open for the
        // power-down bracket.
        let fault = self.drive.get_active_fault().await?;
        info!(fault, "drive state at finalise");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExperimentRig for SynchronousSpeed {
    async fn power_up(&self) -> RigResult<()> {
        // Admission probe: the drive has to answer before a run is accepted.
        let fault = self.drive.get_active_fault().await?;
        debug!(fault, "ac drive answered power-up probe");
        Ok(())
    }

    async fn power_down(&self) {
        if let Err(e) = self.drive.enable_drive_power(false).await {
            warn!(error = %e, "final power-down write failed");
        }
        if let Err(e) = self.drive.channel().close().await {
            warn!(error = %e, "channel close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_channel::{DeviceChannel, MockTransport};
    use rig_core::config::ExecutionTimes;
    use rig_core::error::RigError;
    use rig_drivers::registers::ac_drive_registers;
    use std::sync::Arc;

    fn setup() -> SetupConfig {
        SetupConfig {
            experiment: "synchronous_speed".into(),
            description: String::new(),
            times: ExecutionTimes {
                initialise_s: 1,
                start_s: 1,
                run_s: 3,
                stop_s: 1,
                finalise_s: 1,
            },
            devices: std::collections::HashMap::new(),
            setpoint: 1400.0,
            tolerance: 50.0,
            samples: 3,
            interval_s: 1,
            verify_during_run: false,
            leave_power_enabled_on_init_failure: false,
            simulated: true,
        }
    }

    fn rig_on(transport: Arc<MockTransport>) -> SynchronousSpeed {
        let drive = AcDrive::new(DeviceChannel::new(transport, ac_drive_registers().shared()));
        SynchronousSpeed::new(drive, &setup(), ResultsSink::new("exec-t", "s1"))
    }

    #[tokio::test(start_paused = true)]
    async fn starting_fails_outside_tolerance_band() {
        let transport = Arc::new(MockTransport::new());
        // Drive stuck at 1250 rpm: raw 1250/1500 * 20000
        transport.set_register(0x0066, 16_667);

        let rig = rig_on(transport);
        let err = rig.starting(&CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, RigError::SetpointNotReached { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn running_collects_configured_sample_count() {
        let transport = Arc::new(MockTransport::new());
        transport.link_registers(0x0001, 0x0066);
        transport.set_register(0x0067, 5_000); // zero torque
        transport.set_register(0x0069, 800); // 40 degC

        let rig = rig_on(transport);
        rig.starting(&CancelToken::new()).await.unwrap();
        rig.running(&CancelToken::new()).await.unwrap();

        let results = rig.results.snapshot();
        assert_eq!(results.samples.len(), 3);
        let avg = results.average.unwrap();
        assert!((avg.speed_rpm - 1400.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_before_a_sample_aborts_running() {
        let transport = Arc::new(MockTransport::new());
        transport.link_registers(0x0001, 0x0066);

        let rig = rig_on(transport);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = rig.running(&cancel).await.unwrap_err();
        assert!(matches!(err, RigError::Cancelled));
        assert!(rig.results.is_empty());
    }
}
