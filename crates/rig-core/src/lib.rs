//! Core types for the remote-rig workspace.
//!
//! This crate is the leaf every other rig crate depends on. It carries:
//!
//! - [`error`]: the [`RigError`](error::RigError) taxonomy and the
//!   `RigResult` alias used by every fallible operation.
//! - [`codec`]: raw/engineering register conversion and the immutable
//!   per-device [`RegisterMap`](codec::RegisterMap).
//! - [`status`]: the shared [`ExecutionStatus`](status::ExecutionStatus)
//!   record read concurrently while a run executes.
//! - [`cancel`]: the cooperative [`CancelToken`](cancel::CancelToken).
//! - [`config`]: figment-backed setup configuration.
//! - [`measurement`]: the sampled-readings aggregate.

pub mod cancel;
pub mod codec;
pub mod config;
pub mod error;
pub mod measurement;
pub mod status;

pub use cancel::CancelToken;
pub use codec::{to_engineering, to_raw, RegisterDescriptor, RegisterMap, SharedRegisterMap};
pub use config::{ExecutionTimes, RigConfig, SetupConfig};
pub use error::{RigError, RigResult};
pub use measurement::Measurement;
pub use status::{ExecutePhase, ExecutionStatus, ResultPhase, StatusHandle};
