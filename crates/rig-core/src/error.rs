//! Error types shared across the rig workspace.
//!
//! Every fallible operation in the channel, driver and engine crates returns
//! `Result<T, RigError>`. The variants mirror the failure classes a remote
//! equipment run can hit, so callers can tell "hardware refused" apart from
//! "link down" without parsing message strings.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type RigResult<T> = std::result::Result<T, RigError>;

/// Primary error type for equipment control.
#[derive(Error, Debug)]
pub enum RigError {
    /// Socket or serial I/O failure while talking to a device.
    ///
    /// Always fatal to the current operation; never retried automatically
    /// beyond the single write-then-verify cycle.
    #[error("Transport error during {op}: {message}")]
    Transport { op: String, message: String },

    /// A transport call exceeded its deadline.
    ///
    /// Every channel call carries an explicit deadline so a dead link fails
    /// the phase instead of hanging it.
    #[error("Transport timeout during {op} after {timeout_ms} ms")]
    TransportTimeout { op: String, timeout_ms: u64 },

    /// A register read back a different value than was written.
    ///
    /// Detects silent write failures on noisy serial/Modbus links. Treated
    /// identically to a transport error by callers.
    #[error("Write/read-back mismatch on register '{register}': wrote {wrote:#06x}, read {read:#06x}")]
    WriteReadMismatch {
        register: String,
        wrote: u32,
        read: u32,
    },

    /// The device still reports an active fault after a reset command.
    ///
    /// Fatal to the Initialising phase. Carries the device fault code.
    #[error("Drive fault reset failed, active fault code {code:#06x}")]
    FaultResetFailed { code: u16 },

    /// A measured value did not converge into the tolerance band around the
    /// commanded setpoint within the settle cycle.
    ///
    /// Fatal to Starting/Running; distinguishable from transport errors.
    #[error(
        "Setpoint not reached: commanded {commanded}, measured {measured}, tolerance \u{b1}{tolerance}"
    )]
    SetpointNotReached {
        commanded: f64,
        measured: f64,
        tolerance: f64,
    },

    /// A register name was looked up that the device register map does not
    /// define. Surfaced as a distinct error, never a silent default.
    #[error("Unknown register '{0}'")]
    UnknownRegister(String),

    /// The setup identifier does not resolve to any registered experiment.
    /// Fatal at validation time; never reaches execution.
    #[error("Invalid setup id '{0}'")]
    InvalidSetupId(String),

    /// No execution with the given id is known to the manager.
    #[error("No execution with id '{0}'")]
    NoSuchExecution(String),

    /// A start was requested while another execution is in flight. The
    /// physical equipment is a singleton resource.
    #[error("Equipment is busy with execution '{0}'")]
    Busy(String),

    /// Configuration loading or semantic validation failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The experiment run was cancelled by a concurrent caller.
    #[error("Execution cancelled")]
    Cancelled,

    /// A phase handler panicked; the panic was contained at the phase
    /// boundary and converted into a run failure.
    #[error("Internal error in phase {phase}: {message}")]
    Internal { phase: String, message: String },
}

impl RigError {
    /// Build a transport error for the named operation.
    pub fn transport(op: impl Into<String>, message: impl std::fmt::Display) -> Self {
        RigError::Transport {
            op: op.into(),
            message: message.to_string(),
        }
    }

    /// True for errors caused by the link itself (I/O failure, deadline,
    /// readback mismatch) as opposed to the device refusing a command.
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            RigError::Transport { .. }
                | RigError::TransportTimeout { .. }
                | RigError::WriteReadMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_fault_code() {
        let err = RigError::FaultResetFailed { code: 0x2310 };
        assert!(err.to_string().contains("0x2310"));
    }

    #[test]
    fn setpoint_error_is_not_a_link_error() {
        let err = RigError::SetpointNotReached {
            commanded: 1400.0,
            measured: 1250.0,
            tolerance: 50.0,
        };
        assert!(!err.is_link_error());

        let err = RigError::WriteReadMismatch {
            register: "speed_ref".into(),
            wrote: 0x1f40,
            read: 0x0000,
        };
        assert!(err.is_link_error());
    }
}
