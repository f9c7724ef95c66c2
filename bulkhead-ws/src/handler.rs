//! Application handler interface.

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::connection::Connection;
use crate::error::HandlerError;
use crate::frame::OpCode;

/// Callbacks the server invokes for connection lifecycle and messages.
///
/// Implementations are shared across worker threads, so they must be
/// `Send + Sync`; any per-connection state belongs in a map keyed by
/// [`Connection::id`]. Callbacks run on pool workers and may call
/// [`Connection::send`] freely.
pub trait Handler: Send + Sync {
    /// Called once after a successful handshake. Returning an error rejects
    /// the connection and tears it down without a later `on_close`.
    fn on_connect(&self, conn: &Arc<Connection>) -> Result<(), HandlerError> {
        let _ = conn;
        Ok(())
    }

    /// Called for each data frame (text, binary, or continuation).
    /// Control frames are consumed by the server and never reach this.
    fn on_message(
        &self,
        conn: &Arc<Connection>,
        opcode: OpCode,
        payload: Bytes,
    ) -> Result<(), HandlerError>;

    /// Called exactly once when an accepted connection goes away, whatever
    /// the reason. Not called for connections rejected by `on_connect`.
    fn on_close(&self, conn: &Arc<Connection>) {
        let _ = conn;
    }
}

/// Handler that logs lifecycle events and discards messages.
///
/// Useful as a smoke-test handler while wiring a server up.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl Handler for LoggingHandler {
    fn on_connect(&self, conn: &Arc<Connection>) -> Result<(), HandlerError> {
        info!(id = conn.id(), peer = %conn.peer_addr(), "connected");
        Ok(())
    }

    fn on_message(
        &self,
        conn: &Arc<Connection>,
        opcode: OpCode,
        payload: Bytes,
    ) -> Result<(), HandlerError> {
        info!(
            id = conn.id(),
            ?opcode,
            len = payload.len(),
            "message received"
        );
        Ok(())
    }

    fn on_close(&self, conn: &Arc<Connection>) {
        info!(id = conn.id(), peer = %conn.peer_addr(), "disconnected");
    }
}
