//! Execution engine for remote-rig.
//!
//! The layering, outside in:
//!
//! - [`manager::EquipmentManager`] — the facade remote callers use:
//!   validate, start, poll status, fetch results, cancel. Enforces the
//!   one-execution-at-a-time policy of a physical rig.
//! - [`engine::EquipmentEngine`] — resolves setups to experiments,
//!   assembles channels and drivers, brackets every run with power-up and
//!   power-down.
//! - [`state_machine::ExecutionStateMachine`] — walks the five phases,
//!   guaranteeing teardown and a write-once outcome.
//! - [`experiments`] — one [`state_machine::PhaseHandlers`] implementation
//!   per experiment type.

pub mod engine;
pub mod experiments;
pub mod manager;
pub mod results;
pub mod simulation;
pub mod state_machine;

pub use engine::{EquipmentEngine, RunningExecution, ValidationReport};
pub use manager::EquipmentManager;
pub use results::{ExperimentResults, ResultsSink};
pub use state_machine::{ExecutionStateMachine, PhaseHandlers};
