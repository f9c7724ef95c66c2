//! Per-connection state and framed I/O.
//!
//! A [`Connection`] owns the deadline-wrapped stream for one upgraded
//! client. It is shared between the poller callback, pool tasks, and the
//! application handler. Read and write halves sit behind separate locks
//! (over duplicated descriptors of the same socket), so an outbound `send`
//! never waits out a blocked frame read; teardown is guarded by an atomic
//! flag that makes close idempotent.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use bulkhead_core::deadline::DeadlineStream;
use parking_lot::Mutex;

use crate::error::{Result, WsError};
use crate::frame::{self, Frame, OpCode};

/// One upgraded WebSocket connection.
pub struct Connection {
    reader: Mutex<DeadlineStream>,
    writer: Mutex<DeadlineStream>,
    id: u64,
    peer: SocketAddr,
    // Cached so teardown paths never need a stream lock.
    fd: RawFd,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(stream: DeadlineStream, id: u64, peer: SocketAddr) -> io::Result<Self> {
        let fd = stream.as_raw_fd();
        // A duplicated descriptor gives the write path its own lock; both
        // halves still address the same underlying socket.
        let writer = DeadlineStream::new(stream.get_ref().try_clone()?, stream.timeout());
        Ok(Self {
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
            id,
            peer,
            fd,
            closed: AtomicBool::new(false),
        })
    }

    /// Server-assigned connection id, unique per server instance.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Remote peer address.
    #[inline]
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether teardown has begun for this connection.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send one message to the peer.
    ///
    /// Safe to call from any thread, including from inside handler
    /// callbacks; contends only with other writers, never with an in-flight
    /// frame read. Fails with [`WsError::ConnectionClosed`] once teardown
    /// has begun.
    pub fn send(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(WsError::ConnectionClosed);
        }
        let mut stream = self.writer.lock();
        frame::write_frame(&mut *stream, opcode, payload)
    }

    /// Answer a ping. Pongs echo the ping payload.
    pub(crate) fn write_pong(&self, payload: &[u8]) -> Result<()> {
        self.send(OpCode::Pong, payload)
    }

    /// Read a single frame with the configured deadline.
    pub(crate) fn read_frame(&self, max_payload: usize) -> Result<Frame> {
        if self.is_closed() {
            return Err(WsError::ConnectionClosed);
        }
        let mut stream = self.reader.lock();
        frame::read_frame(&mut *stream, max_payload)
    }

    /// Raw descriptor for poller registration.
    #[inline]
    pub(crate) const fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Mark the connection as closing. Returns `true` for the first caller
    /// only, so teardown runs exactly once.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Shut down the underlying socket in both directions. Acting on either
    /// duplicated descriptor shuts down the shared socket.
    pub(crate) fn shutdown_socket(&self) {
        let _ = self.reader.lock().shutdown();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
