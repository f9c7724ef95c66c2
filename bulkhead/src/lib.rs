//! # Bulkhead
//!
//! An event-driven WebSocket transport server with bounded thread usage.
//!
//! ## Architecture
//!
//! Bulkhead is structured as a **transport kernel** with clean layering:
//!
//! - **`bulkhead-core`**: readiness poller, worker pools, deadline sockets
//! - **`bulkhead-ws`**: RFC 6455 server built on the core
//! - **`bulkhead`**: Public API surface (this crate)
//!
//! A single poller thread watches every socket for readiness; frame reads
//! and handler callbacks run on a worker pool that grows under burst load
//! and shrinks back to a configured floor when idle. Registrations are
//! one-shot, so each connection has at most one read in flight regardless
//! of how fast the peer sends.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulkhead::prelude::*;
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
//!     let config = WsConfig::new().with_port(9001).with_workers(2, 64);
//!     let server = WsServer::new(config, Echo)?;
//!     let addr = server.start()?;
//!     println!("listening on {addr}");
//!     std::thread::park();
//!     Ok(())
//! }
//! ```
//!
//! ## Design notes
//!
//! - **Flat thread count**: ten thousand idle connections cost one poller
//!   thread plus the pool floor, not ten thousand blocked readers
//! - **Deadline I/O**: every read and write carries a refreshed timeout, so
//!   a stalled peer cannot pin a worker
//! - **Backpressure over collapse**: when the pool saturates, accepting
//!   slows down instead of spawning unbounded threads

#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export core types
pub use bytes::Bytes;

pub use bulkhead_core::adaptive::AdaptivePool;
pub use bulkhead_core::deadline::DeadlineStream;
pub use bulkhead_core::error::CoreError;
pub use bulkhead_core::pool::FixedPool;
pub use bulkhead_core::poller::Poller;
pub use bulkhead_core::retry::RetryBackoff;

pub use bulkhead_ws::{
    Connection, Handler, HandlerError, LoggingHandler, OpCode, ServerEvent, ServerMonitor,
    WsConfig, WsError, WsServer,
};

pub mod dev_tracing;

/// Prelude module for convenient imports
///
/// ```rust
/// use bulkhead::prelude::*;
/// ```
pub mod prelude {
    pub use bulkhead_ws::prelude::*;
}
