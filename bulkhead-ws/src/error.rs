//! Error types for the WebSocket transport layer.

use std::io;
use std::time::Duration;

use bulkhead_core::error::CoreError;
use thiserror::Error;

/// Boxed error returned from application handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the WebSocket server and connection layer.
#[derive(Debug, Error)]
pub enum WsError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The HTTP upgrade request was malformed or unacceptable.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A frame violated the wire protocol.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A message exceeded the configured size limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The peer sent a close frame.
    #[error("connection closed by peer")]
    ClosedByPeer,

    /// The connection was already torn down locally.
    #[error("connection closed")]
    ConnectionClosed,

    /// The application handler rejected the connection or message.
    #[error("handler error: {0}")]
    Handler(#[source] HandlerError),

    /// Error bubbled up from the transport core.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// No worker accepted a task within the allowed window.
    #[error("scheduling timed out after {0:?}")]
    ScheduleTimeout(Duration),
}

impl WsError {
    /// Create a handshake error from any displayable reason.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake(reason.into())
    }

    /// Create an invalid-frame error from any displayable reason.
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame(reason.into())
    }

    /// Whether an accept-loop failure is worth retrying after a cooldown.
    ///
    /// Transient conditions (descriptor pressure, aborted connections, a
    /// saturated pool) clear on their own; anything else means the listener
    /// is broken and accepting should halt.
    #[must_use]
    pub fn is_transient_accept(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
            ),
            Self::ScheduleTimeout(_) => true,
            Self::Core(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, WsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_accept_classification() {
        let emfile = WsError::Io(io::Error::new(io::ErrorKind::Other, "too many open files"));
        assert!(!emfile.is_transient_accept());

        let aborted = WsError::Io(io::Error::from(io::ErrorKind::ConnectionAborted));
        assert!(aborted.is_transient_accept());

        assert!(WsError::ScheduleTimeout(Duration::from_millis(1)).is_transient_accept());
        assert!(!WsError::handshake("bad request").is_transient_accept());
    }

    #[test]
    fn test_display_messages() {
        let err = WsError::MessageTooLarge {
            size: 2048,
            max: 1024,
        };
        assert_eq!(err.to_string(), "message too large: 2048 bytes (max 1024)");

        assert_eq!(
            WsError::invalid_frame("reserved bits set").to_string(),
            "invalid frame: reserved bits set"
        );
    }
}
