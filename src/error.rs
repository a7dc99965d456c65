//! Crate-wide error taxonomy.
//!
//! `ModemCtlError` is what every [`crate::modem_control::ModemControl`]
//! operation can fail with once `Busy` has been retried away internally.
//! Everything above it (the state machine, the facade) only ever sees
//! `HelperError`, `Parse`, `PinReject` or `StopRequested` — `Busy` and raw
//! I/O failures never escape the modem-control layer.

use thiserror::Error;

/// `modem_ctl` exit codes that are not `0`, `1` (not connected) or `60`
/// (busy, retried internally) are tagged here by the exit code that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HelperErrorKind {
    #[error("profile not found")]
    ProfileNotFound,
    #[error("operation not supported")]
    NotSupported,
    #[error("invalid input")]
    InvalidInput,
    #[error("module crashed")]
    ModuleCrash,
    #[error("generic helper failure")]
    Generic,
}

impl HelperErrorKind {
    /// Map a `modem_ctl` exit code to its tagged kind.
    /// Exit codes `0` and `60` never reach this function; `1` is only
    /// meaningful to `status()` and is handled by the caller, not here.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            2 => Self::ProfileNotFound,
            3 => Self::NotSupported,
            4 => Self::InvalidInput,
            99 => Self::ModuleCrash,
            _ => Self::Generic,
        }
    }
}

/// Failure of a single [`crate::modem_control::ModemControl`] invocation,
/// after busy-retry has already been applied.
#[derive(Debug, Error)]
pub enum ModemCtlError {
    /// The helper process ran past its wall-clock timeout.
    #[error("modem_ctl invocation timed out")]
    Timeout,
    /// Helper output didn't match the expected textual contract.
    /// The offending text is logged at WARN by the caller, not carried here.
    #[error("unexpected modem_ctl output")]
    Parse,
    /// Helper exited non-zero with a recognized, non-busy exit code.
    #[error("modem_ctl failed: {0}")]
    Helper(HelperErrorKind),
    /// `setPin` was rejected by the SIM.
    #[error("PIN rejected")]
    PinReject,
    /// Cooperative cancellation requested while this call was in flight
    /// or about to start.
    #[error("stop requested")]
    StopRequested,
    /// The process-wide reentrant mutex could not be acquired within its
    /// 120s timeout; treated identically to a generic helper
    /// failure by callers.
    #[error("modem_ctl lock acquisition timed out")]
    LockTimeout,
    /// This connect attempt can't proceed (missing PDP context, empty
    /// APN) but the modem itself is fine — abort the attempt and retry
    /// within the existing budget rather than escalating to a power-cycle.
    #[error("connect attempt aborted")]
    ConnectAbort,
}

impl ModemCtlError {
    /// Whether the manager should treat this as "modem unhealthy" and
    /// force a power-cycle. `StopRequested` is handled at
    /// the loop top instead, and `PinReject` is handled by the PIN policy.
    pub fn is_helper_error(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Parse | Self::Helper(_) | Self::LockTimeout
        )
    }
}

/// Schema/validation failures surfaced by the facade's `PUT` handler
///. Always reflected as a `400`-equivalent, never a panic or a
/// manager restart.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("pin code must be empty or exactly 4 digits")]
    InvalidPin,
    #[error("pdpContext.id must be >= 1")]
    InvalidPdpId,
    #[error("apn must be between 0 and 100 characters")]
    ApnTooLong,
    #[error("keepalive.intervalSec must be 0 or in 60..86399")]
    InvalidKeepaliveInterval,
    #[error("keepalive.reboot.cycles must be in 1..48")]
    InvalidRebootCycles,
    #[error("no such resource")]
    NoSuchResource,
}
