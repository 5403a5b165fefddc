//! Power-quality experiment: passive observation of the lab supply.
//!
//! The rig is the three-phase meter alone, so there is no setpoint to
//! command. When the setup specifies a nominal frequency, Starting verifies
//! the supply is present and within tolerance before any sample is taken.

use std::time::Duration;

use tracing::{debug, warn};

use rig_core::cancel::CancelToken;
use rig_core::config::SetupConfig;
use rig_core::error::RigResult;
use rig_drivers::PowerMeter;

use crate::results::ResultsSink;
use crate::state_machine::PhaseHandlers;

use super::{check_tolerance, ensure_not_cancelled, ExperimentRig, RunParams};

pub struct PowerQuality {
    meter: PowerMeter,
    params: RunParams,
    results: ResultsSink,
}

impl PowerQuality {
    pub fn new(meter: PowerMeter, setup: &SetupConfig, results: ResultsSink) -> Self {
        Self {
            meter,
            params: RunParams::from(setup),
            results,
        }
    }
}

#[async_trait::async_trait]
impl PhaseHandlers for PowerQuality {
    async fn initialising(&self, cancel: &CancelToken) -> RigResult<()> {
        ensure_not_cancelled(cancel)?;
        // Nothing to configure on a meter; one probe read proves the link.
        self.meter.get_frequency().await?;
        Ok(())
    }

    async fn starting(&self, cancel: &CancelToken) -> RigResult<()> {
        ensure_not_cancelled(cancel)?;
        // Setpoint here is the nominal supply frequency; zero disables the
        // check for unmonitored supplies.
        if self.params.setpoint > 0.0 {
            let measured = self.meter.get_frequency().await?;
            check_tolerance(self.params.setpoint, measured, self.params.tolerance)?;
        }
        Ok(())
    }

    async fn running(&self, cancel: &CancelToken) -> RigResult<()> {
        for n in 0..self.params.samples {
            ensure_not_cancelled(cancel)?;
            tokio::time::sleep(Duration::from_secs(self.params.interval_s)).await;
            ensure_not_cancelled(cancel)?;

            if self.params.verify_during_run && self.params.setpoint > 0.0 {
                let measured = self.meter.get_frequency().await?;
                check_tolerance(self.params.setpoint, measured, self.params.tolerance)?;
            }

            let m = self.meter.read_measurement().await?;
            debug!(sample = n + 1, frequency = m.frequency_hz, "sample taken");
            self.results.push(m);
        }
        self.results.finish();
        Ok(())
    }

    async fn stopping(&self) -> RigResult<()> {
        // Passive device: nothing to ramp down.
        Ok(())
    }

    async fn finalising(&self) -> RigResult<()> {
        // One last supply read; the transport stays open for the power-down
        // bracket.
        let frequency = self.meter.get_frequency().await?;
        debug!(frequency, "supply at finalise");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExperimentRig for PowerQuality {
    async fn power_up(&self) -> RigResult<()> {
        self.meter.get_frequency().await?;
        Ok(())
    }

    async fn power_down(&self) {
        // Nothing to de-energise; just release the link.
        if let Err(e) = self.meter.channel().close().await {
            warn!(error = %e, "channel close failed");
        }
    }
}
