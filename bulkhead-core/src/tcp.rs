//! TCP socket tuning helpers.
//!
//! Protocol-agnostic socket options applied to accepted connections.
//!
//! # Safety
//!
//! Keepalive configuration borrows the raw file descriptor through a
//! temporary `socket2::Socket`. The temporary is forgotten before it can
//! close the descriptor, so the caller keeps ownership throughout.

#![allow(unsafe_code)]

use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// Enable `TCP_NODELAY` for minimal latency.
///
/// Disables Nagle's algorithm, trading bandwidth efficiency for lower
/// latency. Worthwhile for interactive message traffic.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)
}

/// Enable TCP keepalive probes with the given idle interval.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
pub fn configure_tcp_keepalive(stream: &TcpStream, interval: Duration) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let fd = stream.as_raw_fd();
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        let result = sock.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(interval));
        std::mem::forget(sock); // Don't close the fd
        result
    }

    #[cfg(not(unix))]
    {
        let _ = (stream, interval);
        Ok(())
    }
}
