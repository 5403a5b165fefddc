//! Shared execution status between the run task and concurrent callers.
//!
//! One [`StatusHandle`] exists per execution. The state machine is the only
//! writer; status-polling callers receive snapshot copies, never a live
//! reference. The critical section is a handful of field copies, so status
//! reads never block for a meaningful time.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Ordered execution phases. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutePhase {
    Created,
    Initialising,
    Starting,
    Running,
    Stopping,
    Finalising,
    Completed,
}

impl fmt::Display for ExecutePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutePhase::Created => "created",
            ExecutePhase::Initialising => "initialising",
            ExecutePhase::Starting => "starting",
            ExecutePhase::Running => "running",
            ExecutePhase::Stopping => "stopping",
            ExecutePhase::Finalising => "finalising",
            ExecutePhase::Completed => "completed",
        };
        write!(f, "{}", label)
    }
}

/// Outcome of a run. Starts at `None` and is written at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPhase {
    None,
    Completed,
    Failed,
    Cancelled,
}

impl ResultPhase {
    /// True once a terminal outcome has been recorded.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultPhase::None)
    }
}

/// Snapshot of one execution, safe to hand to any caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: String,
    pub execute_phase: ExecutePhase,
    pub result_phase: ResultPhase,
    pub time_remaining_s: u64,
    pub error_message: Option<String>,
}

struct StatusInner {
    execute_phase: ExecutePhase,
    result_phase: ResultPhase,
    error_message: Option<String>,
    /// Expected wall-clock completion of the phase in progress.
    phase_deadline: Option<Instant>,
    /// Configured seconds for all phases after the one in progress.
    remaining_after_phase_s: u64,
}

/// Handle to the mutable status record of one execution.
///
/// Clones share the same record; the state machine holds one clone and
/// writes, the manager holds another and snapshots.
#[derive(Clone)]
pub struct StatusHandle {
    execution_id: String,
    inner: Arc<Mutex<StatusInner>>,
}

impl StatusHandle {
    /// New status record in the `Created` phase with the full configured
    /// duration still ahead of it.
    pub fn new(execution_id: impl Into<String>, total_expected_s: u64) -> Self {
        Self {
            execution_id: execution_id.into(),
            inner: Arc::new(Mutex::new(StatusInner {
                execute_phase: ExecutePhase::Created,
                result_phase: ResultPhase::None,
                error_message: None,
                phase_deadline: None,
                remaining_after_phase_s: total_expected_s,
            })),
        }
    }

    /// Execution id this handle belongs to.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Enter a phase: record the phase, its expected completion timestamp
    /// and the configured durations of all later phases.
    pub fn begin_phase(&self, phase: ExecutePhase, expected_s: u64, remaining_after_s: u64) {
        let mut inner = self.inner.lock();
        inner.execute_phase = phase;
        inner.phase_deadline =
            Some(Instant::now() + std::time::Duration::from_secs(expected_s));
        inner.remaining_after_phase_s = remaining_after_s;
    }

    /// Mark the execution terminal ([`ExecutePhase::Completed`]).
    pub fn complete(&self) {
        let mut inner = self.inner.lock();
        inner.execute_phase = ExecutePhase::Completed;
        inner.phase_deadline = None;
        inner.remaining_after_phase_s = 0;
    }

    /// Record the run outcome. Write-once: the first terminal value sticks,
    /// later calls are ignored so the user-visible failure is always the
    /// first root cause.
    pub fn record_result(&self, result: ResultPhase, error_message: Option<String>) {
        let mut inner = self.inner.lock();
        if inner.result_phase.is_terminal() {
            return;
        }
        inner.result_phase = result;
        if inner.error_message.is_none() {
            inner.error_message = error_message;
        }
    }

    /// Outcome recorded so far.
    pub fn result_phase(&self) -> ResultPhase {
        self.inner.lock().result_phase
    }

    /// Snapshot copy for a polling caller.
    ///
    /// Time remaining is the live countdown: the wall-clock distance to the
    /// current phase's expected completion (floored at 1 s while the phase
    /// is active) plus the configured durations of the later phases, or 0
    /// once the execution is terminal.
    pub fn snapshot(&self) -> ExecutionStatus {
        let inner = self.inner.lock();
        let time_remaining_s = if inner.execute_phase == ExecutePhase::Completed {
            0
        } else {
            match inner.phase_deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    let phase_left = deadline.saturating_duration_since(now).as_secs();
                    phase_left.max(1) + inner.remaining_after_phase_s
                }
                // Not started yet: the whole configured duration.
                None => inner.remaining_after_phase_s,
            }
        };
        ExecutionStatus {
            execution_id: self.execution_id.clone(),
            execute_phase: inner.execute_phase,
            result_phase: inner.result_phase,
            time_remaining_s,
            error_message: inner.error_message.clone(),
        }
    }
}
