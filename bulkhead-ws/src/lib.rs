//! # Bulkhead WS
//!
//! Event-driven WebSocket (RFC 6455) server built on the bulkhead transport
//! core.
//!
//! ## Overview
//!
//! The server keeps thread usage flat under load:
//! - **One poller thread** watches the listener and every connection
//! - **One-shot readiness** means at most one read task per connection
//! - **Adaptive worker pool** absorbs bursts and shrinks back when idle
//! - **Deadline sockets** bound every read and write
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulkhead_ws::{Handler, WsConfig, WsServer};
//! use bulkhead_ws::connection::Connection;
//! use bulkhead_ws::frame::OpCode;
//! use bulkhead_ws::error::HandlerError;
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_message(
//!         &self,
//!         conn: &Arc<Connection>,
//!         opcode: OpCode,
//!         payload: Bytes,
//!     ) -> Result<(), HandlerError> {
//!         conn.send(opcode, &payload)?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = WsServer::new(WsConfig::new().with_port(9001), Echo)?;
//!     let addr = server.start()?;
//!     println!("listening on {addr}");
//!     std::thread::park();
//!     Ok(())
//! }
//! ```

// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

// Internal modules (not part of public API)
mod debug;
mod handshake;

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod monitor;
pub mod server;

// Re-export the main entry points for clean API
pub use config::WsConfig;
pub use connection::Connection;
pub use error::{HandlerError, Result, WsError};
pub use frame::OpCode;
pub use handler::{Handler, LoggingHandler};
pub use monitor::{ServerEvent, ServerMonitor};
pub use server::WsServer;

/// Prelude module for convenient imports
///
/// ```rust
/// use bulkhead_ws::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        Connection, Handler, HandlerError, LoggingHandler, OpCode, ServerEvent, ServerMonitor,
        WsConfig, WsError, WsServer,
    };
    pub use bytes::Bytes;
}
