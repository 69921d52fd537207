//! Error taxonomy for the controller abstraction.
//!
//! Everything here is surfaced to the caller as a value; the only
//! fatal path in the stack is the facade's `abort`, which terminates
//! the process after diagnostics.

use thiserror::Error;

use crate::tech::Technology;

pub type Result<T> = std::result::Result<T, NfcError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NfcError {
    /// Technology mismatch, wrong endpoint state, or hardware
    /// rejection of a connect/exchange request.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The tag left the field mid-operation.
    #[error("tag lost")]
    TagLost,

    /// The tag technology is inherently not NDEF-formattable.
    #[error("{0} is not NDEF formattable")]
    NotFormattable(Technology),

    /// A routing or T3T table mutation would exceed its size bound.
    #[error("table capacity exceeded: {used} of {max} entries")]
    Capacity { used: usize, max: usize },

    /// The controller rejected a routing table commit. In-memory
    /// state has been rolled back to the last committed table.
    #[error("routing commit rejected by controller")]
    Commit,

    /// Per-technology exchange timeout exceeded.
    #[error("operation timed out after {ms} ms")]
    Timeout { ms: u64 },

    /// Malformed vendor command, or vendor transport failure.
    #[error("vendor command rejected: {0}")]
    VendorCommand(String),

    /// Operation requires `initialize()` to have succeeded first.
    #[error("controller not initialized")]
    NotInitialized,

    /// Operation issued in the wrong lifecycle phase.
    #[error("invalid lifecycle state: {0}")]
    Lifecycle(&'static str),

    /// The channel to the native controller is gone.
    #[error("controller link closed")]
    LinkDown,
}

impl NfcError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection(reason.into())
    }
}

/// Out-of-band status for a data exchange, kept separate from the
/// response payload so an empty successful response is distinguishable
/// from a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiveStatus {
    Success,
    Timeout,
    TagLost,
    ProtocolError,
}

impl TransceiveStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}
