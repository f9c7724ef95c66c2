//! Bulkhead core error types.
//!
//! Shared error handling for the worker pools, the readiness poller and
//! the deadline stream wrapper.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for bulkhead-core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO error during socket or poller operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Task could not be scheduled within the given bound
    #[error("schedule timeout after {0:?}")]
    ScheduleTimeout(Duration),

    /// Pool already closed, no new tasks accepted
    #[error("worker pool closed")]
    PoolClosed,

    /// Poller thread has been stopped
    #[error("poller stopped")]
    PollerStopped,

    /// Descriptor registration does not exist (already deregistered)
    #[error("registration not found")]
    RegistrationNotFound,
}

/// Result type alias for bulkhead-core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Check if this error is transient, i.e. worth retrying after a cooldown.
    ///
    /// Pool saturation (`ScheduleTimeout`) and temporary network conditions
    /// are transient; everything else is terminal for the caller.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ScheduleTimeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
            ),
            Self::PoolClosed | Self::PollerStopped | Self::RegistrationNotFound => false,
        }
    }
}
