//! Radiation-count experiment: counts against source distance.
//!
//! Initialising arms the count window for the whole Running phase;
//! Starting positions the source carriage (the setup's setpoint is the
//! distance in millimetres) and begins the count; Running polls the
//! accumulated count register.

use std::time::Duration;

use tracing::{debug, warn};

use rig_core::cancel::CancelToken;
use rig_core::config::SetupConfig;
use rig_core::error::RigResult;
use rig_core::measurement::Measurement;
use rig_drivers::RadiationCounter;

use crate::results::ResultsSink;
use crate::state_machine::PhaseHandlers;

use super::{ensure_not_cancelled, ExperimentRig, RunParams};

pub struct RadiationCount {
    counter: RadiationCounter,
    params: RunParams,
    results: ResultsSink,
}

impl RadiationCount {
    pub fn new(counter: RadiationCounter, setup: &SetupConfig, results: ResultsSink) -> Self {
        Self {
            counter,
            params: RunParams::from(setup),
            results,
        }
    }
}

#[async_trait::async_trait]
impl PhaseHandlers for RadiationCount {
    async fn initialising(&self, cancel: &CancelToken) -> RigResult<()> {
        ensure_not_cancelled(cancel)?;
        // Window covers the whole Running phase so the count never stops
        // under the sampling loop.
        self.counter
            .set_count_window(self.params.run_s as u32)
            .await?;
        ensure_not_cancelled(cancel)
    }

    async fn starting(&self, cancel: &CancelToken) -> RigResult<()> {
        ensure_not_cancelled(cancel)?;
        self.counter
            .set_source_position(self.params.setpoint)
            .await?;
        ensure_not_cancelled(cancel)?;
        self.counter.start_count().await
    }

    async fn running(&self, cancel: &CancelToken) -> RigResult<()> {
        for n in 0..self.params.samples {
            ensure_not_cancelled(cancel)?;
            tokio::time::sleep(Duration::from_secs(self.params.interval_s)).await;
            ensure_not_cancelled(cancel)?;

            let count = self.counter.get_count().await?;
            debug!(sample = n + 1, count, "count sampled");
            self.results.push(Measurement {
                counts: f64::from(count),
                ..Measurement::default()
            });
        }
        self.results.finish();
        Ok(())
    }

    async fn stopping(&self) -> RigResult<()> {
        self.counter.stop_count().await
    }

    async fn finalising(&self) -> RigResult<()> {
        // Final accumulated count; the transport stays open for the
        // power-down bracket.
        let count = self.counter.get_count().await?;
        debug!(count, "final accumulated count");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExperimentRig for RadiationCount {
    async fn power_up(&self) -> RigResult<()> {
        let volts = self.counter.get_tube_voltage().await?;
        debug!(volts, "tube voltage at power-up");
        Ok(())
    }

    async fn power_down(&self) {
        if let Err(e) = self.counter.stop_count().await {
            warn!(error = %e, "final stop-count write failed");
        }
        if let Err(e) = self.counter.channel().close().await {
            warn!(error = %e, "channel close failed");
        }
    }
}
