//! Server configuration.
//!
//! All knobs for the WebSocket server: bind address, worker pool bounds,
//! socket timeouts, and message limits. Constructed with builder-style
//! `with_*` methods from sensible defaults.

use std::time::Duration;

/// Default I/O deadline applied to reads and writes on each connection.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle window before an adaptive worker retires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default task queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 128;

/// Default maximum message payload, 1 MiB.
pub const DEFAULT_MAX_MSG_SIZE: usize = 1024 * 1024;

/// WebSocket server configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,
    /// Workers kept alive even when idle.
    pub min_workers: usize,
    /// Hard ceiling on concurrent workers.
    pub max_workers: usize,
    /// Task queue capacity shared by all workers.
    pub queue_size: usize,
    /// Deadline applied to each socket read and write.
    pub io_timeout: Duration,
    /// Idle window before an adaptive worker retires.
    pub idle_timeout: Duration,
    /// Largest accepted message payload in bytes.
    pub max_msg_size: usize,
    /// TCP keepalive probe interval; `None` leaves keepalive off.
    pub tcp_keepalive: Option<Duration>,
    /// Optional address for the plaintext stats listener.
    pub debug_addr: Option<String>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            min_workers: 1,
            max_workers: num_cpus::get() * 2,
            queue_size: DEFAULT_QUEUE_SIZE,
            io_timeout: DEFAULT_IO_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            tcp_keepalive: None,
            debug_addr: None,
        }
    }
}

impl WsConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interface to bind.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port to bind. Zero picks an ephemeral port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the worker pool bounds.
    #[must_use]
    pub fn with_workers(mut self, min: usize, max: usize) -> Self {
        self.min_workers = min;
        self.max_workers = max;
        self
    }

    /// Set the task queue capacity.
    #[must_use]
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Set the per-operation socket deadline.
    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set the idle window before adaptive workers retire.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum accepted message payload.
    #[must_use]
    pub fn with_max_msg_size(mut self, size: usize) -> Self {
        self.max_msg_size = size;
        self
    }

    /// Enable TCP keepalive probes on accepted connections.
    #[must_use]
    pub fn with_tcp_keepalive(mut self, interval: Duration) -> Self {
        self.tcp_keepalive = Some(interval);
        self
    }

    /// Serve worker stats over plaintext HTTP at `addr`.
    #[must_use]
    pub fn with_debug_addr(mut self, addr: impl Into<String>) -> Self {
        self.debug_addr = Some(addr.into());
        self
    }

    /// Bind address in `host:port` form.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WsConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.min_workers, 1);
        assert!(config.max_workers >= 2);
        assert_eq!(config.io_timeout, DEFAULT_IO_TIMEOUT);
        assert_eq!(config.max_msg_size, DEFAULT_MAX_MSG_SIZE);
        assert!(config.tcp_keepalive.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let config = WsConfig::new()
            .with_host("0.0.0.0")
            .with_port(9001)
            .with_workers(2, 8)
            .with_queue_size(64)
            .with_io_timeout(Duration::from_secs(5))
            .with_max_msg_size(4096)
            .with_tcp_keepalive(Duration::from_secs(15));

        assert_eq!(config.addr(), "0.0.0.0:9001");
        assert_eq!(config.min_workers, 2);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.queue_size, 64);
        assert_eq!(config.max_msg_size, 4096);
        assert_eq!(config.tcp_keepalive, Some(Duration::from_secs(15)));
    }
}
