//! Five-phase execution state machine.
//!
//! Every run walks Initialising → Starting → Running → Stopping →
//! Finalising. The first three are the forward path: a failure or a
//! cancellation in any of them skips the rest of the forward path. Stopping
//! and Finalising are teardown and run unconditionally, whatever happened
//! before them, because they are what returns the hardware to a safe state.
//!
//! Phase work is supplied through [`PhaseHandlers`], one implementation per
//! experiment type. The machine owns sequencing, status bookkeeping, outcome
//! recording and panic containment; the handlers own the equipment.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{error, info, warn};

use rig_core::cancel::CancelToken;
use rig_core::config::ExecutionTimes;
use rig_core::error::{RigError, RigResult};
use rig_core::status::{ExecutePhase, ResultPhase, StatusHandle};

/// Per-experiment phase behaviour, composed into the shared machine.
///
/// The forward handlers receive the cancel token and are expected to check
/// it between hardware steps, returning [`RigError::Cancelled`] when it is
/// set. `stopping` and `finalising` take no token: teardown is never
/// skipped, not even for a cancelled run.
#[async_trait::async_trait]
pub trait PhaseHandlers: Send + Sync {
    /// Bring the equipment from powered to ready (fault reset, defaults).
    async fn initialising(&self, cancel: &CancelToken) -> RigResult<()>;
    /// Command the setpoint and verify the rig reached it.
    async fn starting(&self, cancel: &CancelToken) -> RigResult<()>;
    /// Take the configured measurement samples.
    async fn running(&self, cancel: &CancelToken) -> RigResult<()>;
    /// Ramp down and disable outputs. Always runs.
    async fn stopping(&self) -> RigResult<()>;
    /// Release equipment resources. Always runs.
    async fn finalising(&self) -> RigResult<()>;
}

/// Drives one execution through its five phases, updating the shared
/// [`StatusHandle`] as it goes.
pub struct ExecutionStateMachine {
    status: StatusHandle,
    cancel: CancelToken,
    times: ExecutionTimes,
}

impl ExecutionStateMachine {
    pub fn new(status: StatusHandle, cancel: CancelToken, times: ExecutionTimes) -> Self {
        Self {
            status,
            cancel,
            times,
        }
    }

    /// Run the full phase sequence to completion.
    ///
    /// Never returns an error: every failure ends up in the status record,
    /// where the polling caller picks it up. The first failure recorded
    /// wins; teardown errors only surface when the forward path was clean.
    pub async fn run(&self, handlers: Arc<dyn PhaseHandlers>) {
        info!(execution_id = self.status.execution_id(), "execution starting");

        let mut forward_ok = true;
        for phase in [
            ExecutePhase::Initialising,
            ExecutePhase::Starting,
            ExecutePhase::Running,
        ] {
            let fut: BoxFuture<'_, RigResult<()>> = match phase {
                ExecutePhase::Initialising => handlers.initialising(&self.cancel),
                ExecutePhase::Starting => handlers.starting(&self.cancel),
                _ => handlers.running(&self.cancel),
            };
            if let Err(e) = self.exec_phase(phase, fut).await {
                self.record_failure(phase, &e);
                forward_ok = false;
                break;
            }
        }

        // Teardown runs regardless of how the forward path ended.
        for phase in [ExecutePhase::Stopping, ExecutePhase::Finalising] {
            let fut: BoxFuture<'_, RigResult<()>> = match phase {
                ExecutePhase::Stopping => handlers.stopping(),
                _ => handlers.finalising(),
            };
            if let Err(e) = self.exec_phase(phase, fut).await {
                if matches!(e, RigError::Cancelled) {
                    // A cancelled settle only shortens teardown waits; the
                    // safe-state writes have already been verified.
                    warn!(%phase, "teardown shortened by cancellation");
                } else {
                    // Write-once: ignored when the forward path already failed.
                    error!(%phase, error = %e, "teardown phase failed");
                    self.status
                        .record_result(ResultPhase::Failed, Some(e.to_string()));
                }
            }
        }

        self.status.record_result(ResultPhase::Completed, None);
        self.status.complete();
        info!(
            execution_id = self.status.execution_id(),
            outcome = ?self.status.result_phase(),
            clean = forward_ok,
            "execution finished"
        );
    }

    /// Enter the phase, run its handler, contain panics at the boundary.
    async fn exec_phase(
        &self,
        phase: ExecutePhase,
        fut: BoxFuture<'_, RigResult<()>>,
    ) -> RigResult<()> {
        self.status
            .begin_phase(phase, self.expected_s(phase), self.remaining_after_s(phase));
        info!(%phase, "entering phase");

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(RigError::Internal {
                phase: phase.to_string(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    fn record_failure(&self, phase: ExecutePhase, err: &RigError) {
        if self.cancel.is_cancelled() || matches!(err, RigError::Cancelled) {
            warn!(%phase, "execution cancelled");
            self.status.record_result(ResultPhase::Cancelled, None);
        } else {
            error!(%phase, error = %err, "phase failed");
            self.status
                .record_result(ResultPhase::Failed, Some(err.to_string()));
        }
    }

    fn expected_s(&self, phase: ExecutePhase) -> u64 {
        match phase {
            ExecutePhase::Initialising => self.times.initialise_s,
            ExecutePhase::Starting => self.times.start_s,
            ExecutePhase::Running => self.times.run_s,
            ExecutePhase::Stopping => self.times.stop_s,
            _ => self.times.finalise_s,
        }
    }

    /// Configured seconds for every phase after `phase`.
    fn remaining_after_s(&self, phase: ExecutePhase) -> u64 {
        let t = &self.times;
        match phase {
            ExecutePhase::Initialising => t.start_s + t.run_s + t.stop_s + t.finalise_s,
            ExecutePhase::Starting => t.run_s + t.stop_s + t.finalise_s,
            ExecutePhase::Running => t.stop_s + t.finalise_s,
            ExecutePhase::Stopping => t.finalise_s,
            _ => 0,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "phase handler panicked".to_string()
    }
}
