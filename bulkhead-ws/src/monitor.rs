//! Server event monitoring.
//!
//! Provides an event stream for tracking server lifecycle events like
//! accepted connections, handshake failures, and teardowns.

use std::fmt;
use std::net::SocketAddr;

/// Server lifecycle events.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Listener bound and accepting connections.
    Listening(SocketAddr),

    /// A connection completed its handshake.
    Accepted(SocketAddr),

    /// A connection failed the upgrade handshake.
    HandshakeFailed { peer: SocketAddr, reason: String },

    /// The application handler rejected a connection.
    Rejected { peer: SocketAddr, reason: String },

    /// An accepted connection was torn down.
    Disconnected { peer: SocketAddr, reason: String },

    /// The accept loop gave up after repeated failures.
    AcceptHalted { reason: String },
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening(addr) => write!(f, "Listening on {addr}"),
            Self::Accepted(peer) => write!(f, "Accepted connection from {peer}"),
            Self::HandshakeFailed { peer, reason } => {
                write!(f, "Handshake failed for {peer}: {reason}")
            }
            Self::Rejected { peer, reason } => {
                write!(f, "Connection from {peer} rejected: {reason}")
            }
            Self::Disconnected { peer, reason } => {
                write!(f, "Disconnected {peer}: {reason}")
            }
            Self::AcceptHalted { reason } => write!(f, "Accept loop halted: {reason}"),
        }
    }
}

/// Handle for receiving server events.
///
/// This is a channel receiver that provides a stream of server lifecycle events.
pub type ServerMonitor = flume::Receiver<ServerEvent>;

/// Internal sender for server events.
pub(crate) type ServerEventSender = flume::Sender<ServerEvent>;

/// Creates a new monitoring channel pair.
pub(crate) fn create_monitor() -> (ServerEventSender, ServerMonitor) {
    flume::unbounded()
}
