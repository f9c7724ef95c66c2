//! Deadline-enforcing stream wrapper.
//!
//! Network reads and writes can block forever against an unresponsive peer.
//! [`DeadlineStream`] decorates a [`TcpStream`] so that a fresh deadline is
//! set before every read and write call; an operation that does not complete
//! within the configured duration fails with a timeout error instead of
//! blocking its worker indefinitely.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// A [`TcpStream`] decorator that refreshes the I/O deadline on every operation.
///
/// The timeout must be non-zero; `Duration::ZERO` is rejected by the
/// underlying socket options.
#[derive(Debug)]
pub struct DeadlineStream {
    inner: TcpStream,
    timeout: Duration,
}

impl DeadlineStream {
    /// Wrap `inner` so that every read/write carries `timeout` as its deadline.
    #[must_use]
    pub fn new(inner: TcpStream, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The configured per-operation deadline.
    #[inline]
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Access the wrapped stream.
    #[inline]
    #[must_use]
    pub fn get_ref(&self) -> &TcpStream {
        &self.inner
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    /// Shut down both halves of the connection.
    ///
    /// The file descriptor itself stays open until the stream is dropped, so
    /// a still-registered poller descriptor cannot be recycled underneath us.
    pub fn shutdown(&self) -> io::Result<()> {
        self.inner.shutdown(Shutdown::Both)
    }
}

impl Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.set_read_timeout(Some(self.timeout))?;
        self.inner.read(buf)
    }
}

impl Write for DeadlineStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.set_write_timeout(Some(self.timeout))?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl AsRawFd for DeadlineStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
