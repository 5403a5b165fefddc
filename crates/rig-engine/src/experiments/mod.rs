//! Experiment implementations.
//!
//! One module per experiment type, each implementing [`PhaseHandlers`] for
//! the shared state machine plus [`ExperimentRig`] for the engine-level
//! power bracket. The experiments own their drivers; the machine never sees
//! a device.

pub mod dc_motor_load;
pub mod power_quality;
pub mod radiation_count;
pub mod synchronous_speed;

pub use dc_motor_load::DcMotorLoad;
pub use power_quality::PowerQuality;
pub use radiation_count::RadiationCount;
pub use synchronous_speed::SynchronousSpeed;

use rig_core::cancel::CancelToken;
use rig_core::config::SetupConfig;
use rig_core::error::{RigError, RigResult};

use crate::state_machine::PhaseHandlers;

/// Engine-level power bracket around a run.
///
/// `power_up` is called before the state machine starts; a failure here
/// means the run never begins. `power_down` is called after the machine
/// finishes, whatever the outcome, and swallows its own errors — there is
/// nothing left to fail at that point, only hardware to leave safe. It
/// removes power first and releases the transports last, so the final
/// safe-state writes always go out over an open link.
#[async_trait::async_trait]
pub trait ExperimentRig: PhaseHandlers {
    async fn power_up(&self) -> RigResult<()>;
    async fn power_down(&self);
}

/// Measurement-loop parameters extracted from the setup.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunParams {
    pub setpoint: f64,
    pub tolerance: f64,
    pub samples: u32,
    pub interval_s: u64,
    pub verify_during_run: bool,
    pub run_s: u64,
}

impl From<&SetupConfig> for RunParams {
    fn from(setup: &SetupConfig) -> Self {
        Self {
            setpoint: setup.setpoint,
            tolerance: setup.tolerance,
            samples: setup.samples,
            interval_s: setup.interval_s,
            verify_during_run: setup.verify_during_run,
            run_s: setup.times.run_s,
        }
    }
}

/// Cancellation check between hardware steps.
pub(crate) fn ensure_not_cancelled(cancel: &CancelToken) -> RigResult<()> {
    if cancel.is_cancelled() {
        Err(RigError::Cancelled)
    } else {
        Ok(())
    }
}

/// Tolerance-band check around a commanded setpoint.
pub(crate) fn check_tolerance(commanded: f64, measured: f64, tolerance: f64) -> RigResult<()> {
    if (measured - commanded).abs() > tolerance {
        Err(RigError::SetpointNotReached {
            commanded,
            measured,
            tolerance,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_band_is_inclusive() {
        assert!(check_tolerance(1400.0, 1450.0, 50.0).is_ok());
        let err = check_tolerance(1400.0, 1451.0, 50.0).unwrap_err();
        assert!(matches!(err, RigError::SetpointNotReached { .. }));
    }
}
