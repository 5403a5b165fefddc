//! Equipment manager: the single entry point remote callers talk to.
//!
//! Validate a setup, start an execution, poll its status, fetch its
//! results, cancel it. The physical rig is a singleton, so at most one
//! execution is in flight; a second start while one is running is refused
//! with [`RigError::Busy`]. The record of the last execution, results
//! included, survives until the next start replaces it.

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use rig_core::cancel::CancelToken;
use rig_core::config::RigConfig;
use rig_core::error::{RigError, RigResult};
use rig_core::status::{ExecutionStatus, ResultPhase, StatusHandle};

use crate::engine::{EquipmentEngine, RunningExecution, ValidationReport};
use crate::results::ResultsSink;

/// Facade over the engine, owning the single-execution policy.
pub struct EquipmentManager {
    engine: EquipmentEngine,
    current: Mutex<Option<RunningExecution>>,
}

impl EquipmentManager {
    pub fn new(config: RigConfig) -> Self {
        Self {
            engine: EquipmentEngine::new(config),
            current: Mutex::new(None),
        }
    }

    /// Check a setup without running it.
    pub fn validate(&self, setup_id: &str) -> ValidationReport {
        self.engine.validate(setup_id)
    }

    /// Start an execution of the given setup.
    ///
    /// Returns the initial status snapshot carrying the new execution id.
    /// Refused with [`RigError::Busy`] while another execution is in
    /// flight — including its power-down bracket after the outcome is
    /// already recorded; a fully finished one is replaced.
    ///
    /// The execution record is installed before the rig is assembled and
    /// the lock released, so connecting and powering up never blocks
    /// status, results or cancel callers.
    pub async fn start_execution(&self, setup_id: &str) -> RigResult<ExecutionStatus> {
        let execution_id = Uuid::new_v4().to_string();
        let (status, cancel, results) = {
            let mut current = self.current.lock().await;
            if let Some(run) = current.as_ref() {
                let finished = run.status.result_phase().is_terminal()
                    && run.join.as_ref().map_or(true, |join| join.is_finished());
                if !finished {
                    return Err(RigError::Busy(run.status.execution_id().to_string()));
                }
            }

            let setup = self.engine.config().setup(setup_id)?;
            let status = StatusHandle::new(execution_id.clone(), setup.times.total_s());
            let cancel = CancelToken::new();
            let results = ResultsSink::new(execution_id.clone(), setup_id);
            *current = Some(RunningExecution {
                status: status.clone(),
                cancel: cancel.clone(),
                results: results.clone(),
                join: None,
            });
            (status, cancel, results)
        };

        info!(setup_id, execution_id, "starting execution");
        match self
            .engine
            .start(setup_id, status.clone(), cancel, results)
            .await
        {
            Ok(join) => {
                let mut current = self.current.lock().await;
                if let Some(run) = current.as_mut() {
                    if run.status.execution_id() == execution_id {
                        run.join = Some(join);
                    }
                }
                Ok(status.snapshot())
            }
            Err(e) => {
                // Close out the record so the next start is admitted.
                status.record_result(ResultPhase::Failed, Some(e.to_string()));
                status.complete();
                Err(e)
            }
        }
    }

    /// Status snapshot of the named execution.
    pub async fn execution_status(&self, execution_id: &str) -> RigResult<ExecutionStatus> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(run) if run.status.execution_id() == execution_id => Ok(run.status.snapshot()),
            _ => Err(RigError::NoSuchExecution(execution_id.to_string())),
        }
    }

    /// Collected results of the named execution as JSON.
    pub async fn experiment_results(&self, execution_id: &str) -> RigResult<serde_json::Value> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(run) if run.status.execution_id() == execution_id => Ok(run.results.to_json()),
            _ => Err(RigError::NoSuchExecution(execution_id.to_string())),
        }
    }

    /// Request cancellation of the named execution.
    ///
    /// Returns `true` when the request was delivered to a live execution;
    /// `false` when the execution had already finished. The run keeps
    /// going through its teardown phases after this returns.
    pub async fn cancel(&self, execution_id: &str) -> RigResult<bool> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(run) if run.status.execution_id() == execution_id => {
                if run.status.result_phase().is_terminal() {
                    return Ok(false);
                }
                warn!(execution_id, "cancellation requested");
                run.cancel.cancel();
                Ok(true)
            }
            _ => Err(RigError::NoSuchExecution(execution_id.to_string())),
        }
    }

    /// Wait for the current execution to finish. Used by tests and
    /// shutdown paths; polling callers use `execution_status` instead.
    pub async fn wait_for_completion(&self) {
        let join = {
            let mut current = self.current.lock().await;
            current.as_mut().and_then(|run| run.join.take())
        };
        if let Some(join) = join {
            if let Err(e) = join.await {
                warn!(error = %e, "execution task failed to join");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_core::status::{ExecutePhase, ResultPhase};

    const CONFIG: &str = r#"
        [setups.sync_sim]
        experiment = "synchronous_speed"
        setpoint = 1400.0
        tolerance = 50.0
        samples = 3
        interval_s = 1
        simulated = true

        [setups.sync_sim.times]
        initialise_s = 1
        start_s = 1
        run_s = 3
        stop_s = 1
        finalise_s = 1

        [setups.sync_sim.devices.ac_drive]
        address = "10.0.1.20:502"
        slave_id = 1
    "#;

    fn manager() -> EquipmentManager {
        EquipmentManager::new(RigConfig::from_toml(CONFIG).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn full_lifecycle_start_poll_results() {
        let manager = manager();
        let status = manager.start_execution("sync_sim").await.unwrap();
        assert!(status.time_remaining_s <= 7);

        manager.wait_for_completion().await;

        let finished = manager
            .execution_status(&status.execution_id)
            .await
            .unwrap();
        assert_eq!(finished.execute_phase, ExecutePhase::Completed);
        assert_eq!(finished.result_phase, ResultPhase::Completed);
        assert_eq!(finished.time_remaining_s, 0);

        let results = manager
            .experiment_results(&status.execution_id)
            .await
            .unwrap();
        assert_eq!(results["samples"].as_array().unwrap().len(), 3);
        assert!(results["average"]["speed_rpm"].as_f64().unwrap() > 1_300.0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_refused_while_running() {
        let manager = manager();
        let status = manager.start_execution("sync_sim").await.unwrap();

        let err = manager.start_execution("sync_sim").await.unwrap_err();
        match err {
            RigError::Busy(id) => assert_eq!(id, status.execution_id),
            other => panic!("expected Busy, got {other}"),
        }

        manager.wait_for_completion().await;
        // A finished execution no longer blocks a new start.
        manager.start_execution("sync_sim").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn admission_waits_for_the_power_down_bracket() {
        let manager = manager();
        let status = manager.start_execution("sync_sim").await.unwrap();

        // Poll until the outcome is recorded. At that moment the run task
        // is still inside the power-down bracket (the final power-off
        // write carries a multi-second settle).
        loop {
            let snap = manager
                .execution_status(&status.execution_id)
                .await
                .unwrap();
            if snap.result_phase.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }

        let err = manager.start_execution("sync_sim").await.unwrap_err();
        assert!(matches!(err, RigError::Busy(_)));

        // Once the run task has been joined, the rig is free again.
        manager.wait_for_completion().await;
        manager.start_execution("sync_sim").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_execution_id_is_an_error() {
        let manager = manager();
        let err = manager.execution_status("no-such-id").await.unwrap_err();
        assert!(matches!(err, RigError::NoSuchExecution(_)));

        let err = manager.cancel("no-such-id").await.unwrap_err();
        assert!(matches!(err, RigError::NoSuchExecution(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_execution_reports_cancelled() {
        let manager = manager();
        let status = manager.start_execution("sync_sim").await.unwrap();

        let delivered = manager.cancel(&status.execution_id).await.unwrap();
        assert!(delivered);

        manager.wait_for_completion().await;
        let finished = manager
            .execution_status(&status.execution_id)
            .await
            .unwrap();
        assert_eq!(finished.result_phase, ResultPhase::Cancelled);
        assert_eq!(finished.execute_phase, ExecutePhase::Completed);
    }
}
