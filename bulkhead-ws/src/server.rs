//! Event-driven WebSocket server.
//!
//! One poller thread watches the listener and every upgraded connection for
//! readiness; all actual work (accepting, handshaking, frame reads, handler
//! callbacks) runs on an adaptive worker pool. Registrations are one-shot,
//! so a connection has at most one read task in flight and is re-armed only
//! after that task completes.
//!
//! Accepting is deliberately time-boxed: the listener callback gives the
//! pool one millisecond to take the accept task, and on failure backs off
//! with jittered delays before giving up entirely.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bulkhead_core::adaptive::AdaptivePool;
use bulkhead_core::deadline::DeadlineStream;
use bulkhead_core::poller::{Poller, Readiness, Registration};
use bulkhead_core::retry::RetryBackoff;
use bulkhead_core::tcp::{configure_tcp_keepalive, enable_tcp_nodelay};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WsConfig;
use crate::connection::Connection;
use crate::debug::spawn_stats_listener;
use crate::error::{Result, WsError};
use crate::frame::OpCode;
use crate::handler::Handler;
use crate::handshake;
use crate::monitor::{create_monitor, ServerEvent, ServerEventSender, ServerMonitor};

/// How long the listener callback waits for the pool to take an accept task.
const ACCEPT_SCHEDULE_TIMEOUT: Duration = Duration::from_millis(1);

const ACCEPT_RETRY_BASE: Duration = Duration::from_millis(5);
const ACCEPT_RETRY_MAX: Duration = Duration::from_millis(100);
const ACCEPT_RETRY_ATTEMPTS: u32 = 3;

/// What the accept loop should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureAction {
    /// Sleep for the given delay, then re-arm the listener.
    Cooldown(Duration),
    /// Stop accepting; the listener is unusable.
    Halt,
}

/// Classify an accept failure against the retry budget.
///
/// Transient failures consume one retry attempt and get a cooldown; fatal
/// failures and an exhausted budget halt the accept loop. A successful
/// accept elsewhere resets the budget.
fn classify_accept_failure(retry: &mut RetryBackoff, err: &WsError) -> FailureAction {
    if !err.is_transient_accept() {
        return FailureAction::Halt;
    }
    match retry.next_delay() {
        Some(delay) => FailureAction::Cooldown(delay),
        None => FailureAction::Halt,
    }
}

struct ServerInner {
    config: WsConfig,
    handler: Arc<dyn Handler>,
    poller: Poller,
    pool: Arc<AdaptivePool>,
    listener: Mutex<Option<TcpListener>>,
    listener_reg: Mutex<Option<Registration>>,
    accept_retry: Mutex<RetryBackoff>,
    monitor_tx: Mutex<Option<ServerEventSender>>,
    next_conn_id: AtomicU64,
    shutdown: AtomicBool,
}

/// Event-driven WebSocket server.
///
/// Construct with a [`WsConfig`] and a [`Handler`], then call
/// [`start`](WsServer::start). All connection processing happens on
/// background threads; `start` returns as soon as the listener is armed.
pub struct WsServer {
    inner: Arc<ServerInner>,
}

impl WsServer {
    /// Create a server. The worker pool and poller thread start immediately;
    /// nothing is bound until [`start`](WsServer::start).
    pub fn new(config: WsConfig, handler: impl Handler + 'static) -> Result<Self> {
        let poller = Poller::new()?;
        let pool = Arc::new(AdaptivePool::new(
            config.max_workers,
            config.min_workers,
            config.queue_size,
            config.idle_timeout,
        ));

        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                handler: Arc::new(handler),
                poller,
                pool,
                listener: Mutex::new(None),
                listener_reg: Mutex::new(None),
                accept_retry: Mutex::new(RetryBackoff::new(
                    ACCEPT_RETRY_BASE,
                    ACCEPT_RETRY_MAX,
                    ACCEPT_RETRY_ATTEMPTS,
                )),
                monitor_tx: Mutex::new(None),
                next_conn_id: AtomicU64::new(1),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Subscribe to server lifecycle events.
    ///
    /// Call before [`start`](WsServer::start) to observe the `Listening`
    /// event. Dropping the receiver silently stops delivery.
    #[must_use]
    pub fn monitor(&self) -> ServerMonitor {
        let (tx, rx) = create_monitor();
        *self.inner.monitor_tx.lock() = Some(tx);
        rx
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the bound address, which matters when the configured port
    /// is 0.
    pub fn start(&self) -> Result<SocketAddr> {
        if let Some(addr) = &self.inner.config.debug_addr {
            let stats_addr = spawn_stats_listener(addr, Arc::clone(&self.inner.pool))?;
            info!(%stats_addr, "stats listener running");
        }

        let listener = TcpListener::bind(self.inner.config.addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        use std::os::unix::io::AsRawFd;
        let fd = listener.as_raw_fd();
        *self.inner.listener.lock() = Some(listener);

        let inner = Arc::clone(&self.inner);
        let reg = self
            .inner
            .poller
            .register(fd, move |reg, _readiness| inner.on_listener_ready(reg))?;
        *self.inner.listener_reg.lock() = Some(reg);

        info!(%local_addr, "websocket server listening");
        self.inner.emit(ServerEvent::Listening(local_addr));
        Ok(local_addr)
    }

    /// Number of live pool workers.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.pool.active_workers()
    }

    /// Stop accepting, stop the poller, and drain the worker pool.
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down websocket server");

        if let Some(reg) = self.inner.listener_reg.lock().take() {
            let _ = self.inner.poller.deregister(&reg);
        }
        self.inner.listener.lock().take();

        self.inner.poller.shutdown();
        self.inner.pool.close();
    }
}

impl Drop for WsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ServerInner {
    fn emit(&self, event: ServerEvent) {
        if let Some(tx) = &*self.monitor_tx.lock() {
            let _ = tx.send(event);
        }
    }

    /// Listener readiness callback. Runs on the poller thread.
    ///
    /// Hands the accept to the pool with a short deadline and waits for the
    /// accept outcome (not the whole connection setup) before re-arming.
    fn on_listener_ready(self: &Arc<Self>, reg: Registration) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }

        let (done_tx, done_rx) = flume::bounded(1);
        let task_inner = Arc::clone(self);
        let scheduled = self.pool.schedule_timeout(ACCEPT_SCHEDULE_TIMEOUT, move || {
            task_inner.accept_one(&done_tx);
        });

        let outcome = match scheduled {
            Ok(()) => match done_rx.recv() {
                Ok(outcome) => outcome,
                // Pool dropped the task mid-shutdown.
                Err(_) => return,
            },
            Err(e) => Err(WsError::Core(e)),
        };

        match outcome {
            Ok(()) => {
                self.accept_retry.lock().reset();
                self.rearm_listener(&reg);
            }
            Err(e) => {
                let action = classify_accept_failure(&mut self.accept_retry.lock(), &e);
                match action {
                    FailureAction::Cooldown(delay) => {
                        warn!("accept failed: {e}; retrying in {delay:?}");
                        thread::sleep(delay);
                        self.rearm_listener(&reg);
                    }
                    FailureAction::Halt => self.halt_accept(&reg, &e),
                }
            }
        }
    }

    /// Accept one connection on a pool worker.
    ///
    /// The accept outcome is reported immediately so the listener can
    /// re-arm; the handshake and handler callbacks run afterwards on this
    /// same worker.
    fn accept_one(self: &Arc<Self>, done_tx: &flume::Sender<Result<()>>) {
        let accepted = {
            let guard = self.listener.lock();
            match guard.as_ref() {
                Some(listener) => listener.accept(),
                None => {
                    let _ = done_tx.send(Ok(()));
                    return;
                }
            }
        };

        match accepted {
            Ok((stream, peer)) => {
                let _ = done_tx.send(Ok(()));
                self.handle_connection(stream, peer);
            }
            // Readiness can be stale; nothing to accept is not a failure.
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                let _ = done_tx.send(Ok(()));
            }
            Err(e) => {
                let _ = done_tx.send(Err(WsError::Io(e)));
            }
        }
    }

    fn rearm_listener(&self, reg: &Registration) {
        if let Err(e) = self.poller.resume(reg) {
            if !self.shutdown.load(Ordering::Acquire) {
                error!("failed to re-arm listener: {e}");
            }
        }
    }

    fn halt_accept(&self, reg: &Registration, err: &WsError) {
        error!("accept loop halted: {err}");
        self.emit(ServerEvent::AcceptHalted {
            reason: err.to_string(),
        });
        if self.listener_reg.lock().take().is_some() {
            let _ = self.poller.deregister(reg);
        }
    }

    /// Upgrade a freshly accepted stream and register it with the poller.
    fn handle_connection(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = self.prepare_socket(&stream) {
            debug!(%peer, "socket setup failed: {e}");
            return;
        }

        let mut stream = DeadlineStream::new(stream, self.config.io_timeout);
        if let Err(e) = handshake::accept(&mut stream) {
            debug!(%peer, "handshake failed: {e}");
            self.emit(ServerEvent::HandshakeFailed {
                peer,
                reason: e.to_string(),
            });
            return;
        }

        self.emit(ServerEvent::Accepted(peer));

        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let conn = match Connection::new(stream, id, peer) {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                warn!(%peer, id, "connection setup failed: {e}");
                return;
            }
        };

        if let Err(e) = self.handler.on_connect(&conn) {
            debug!(%peer, id, "connection rejected by handler: {e}");
            self.emit(ServerEvent::Rejected {
                peer,
                reason: e.to_string(),
            });
            conn.begin_close();
            conn.shutdown_socket();
            return;
        }

        let cb_inner = Arc::clone(self);
        let cb_conn = Arc::clone(&conn);
        let registered = self.poller.register(conn.raw_fd(), move |reg, readiness| {
            cb_inner.on_conn_ready(reg, readiness, &cb_conn);
        });

        if let Err(e) = registered {
            warn!(%peer, id, "poller registration failed: {e}");
            self.close_connection(&conn, "registration failed");
        } else {
            debug!(%peer, id, "connection established");
        }
    }

    fn prepare_socket(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        enable_tcp_nodelay(stream)?;
        if let Some(interval) = self.config.tcp_keepalive {
            configure_tcp_keepalive(stream, interval)?;
        }
        Ok(())
    }

    /// Connection readiness callback. Runs on the poller thread; does
    /// nothing but classify the event and hand the read to the pool.
    fn on_conn_ready(self: &Arc<Self>, reg: Registration, readiness: Readiness, conn: &Arc<Connection>) {
        if readiness.is_hangup() {
            self.teardown(&reg, conn, "peer hung up");
            return;
        }

        let inner = Arc::clone(self);
        let conn = Arc::clone(conn);
        self.pool.schedule(move || match inner.read_message(&conn) {
            Ok(()) => {
                // The registration stays one-shot: re-arm only after this
                // read fully completed.
                if inner.poller.resume(&reg).is_err() {
                    inner.teardown(&reg, &conn, "poller unavailable");
                }
            }
            Err(e) => {
                let reason = e.to_string();
                inner.teardown(&reg, &conn, &reason);
            }
        });
    }

    /// Read and dispatch a single frame.
    ///
    /// Control frames are handled here: pings get an immediate pong, pongs
    /// are dropped, and a close frame ends the connection. Only data frames
    /// reach the handler.
    fn read_message(&self, conn: &Arc<Connection>) -> Result<()> {
        let frame = conn.read_frame(self.config.max_msg_size)?;
        match frame.opcode {
            OpCode::Close => Err(WsError::ClosedByPeer),
            OpCode::Ping => conn.write_pong(&frame.payload),
            OpCode::Pong => Ok(()),
            opcode => self
                .handler
                .on_message(conn, opcode, frame.payload)
                .map_err(WsError::Handler),
        }
    }

    /// Tear down a registered connection. The `begin_close` guard makes
    /// this run once even when the hangup path and a read error race.
    fn teardown(&self, reg: &Registration, conn: &Arc<Connection>, reason: &str) {
        if !conn.begin_close() {
            return;
        }
        let _ = self.poller.deregister(reg);
        self.handler.on_close(conn);
        conn.shutdown_socket();
        debug!(id = conn.id(), peer = %conn.peer_addr(), reason, "connection closed");
        self.emit(ServerEvent::Disconnected {
            peer: conn.peer_addr(),
            reason: reason.to_owned(),
        });
    }

    /// Teardown for connections that never got a poller registration.
    fn close_connection(&self, conn: &Arc<Connection>, reason: &str) {
        if !conn.begin_close() {
            return;
        }
        self.handler.on_close(conn);
        conn.shutdown_socket();
        self.emit(ServerEvent::Disconnected {
            peer: conn.peer_addr(),
            reason: reason.to_owned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn backoff() -> RetryBackoff {
        RetryBackoff::new(ACCEPT_RETRY_BASE, ACCEPT_RETRY_MAX, ACCEPT_RETRY_ATTEMPTS)
    }

    fn transient() -> WsError {
        WsError::Io(io::Error::from(io::ErrorKind::ConnectionAborted))
    }

    fn fatal() -> WsError {
        WsError::Io(io::Error::new(io::ErrorKind::Other, "too many open files"))
    }

    #[test]
    fn test_transient_failures_cool_down_then_fatal_halts() {
        let mut retry = backoff();

        assert!(matches!(
            classify_accept_failure(&mut retry, &transient()),
            FailureAction::Cooldown(_)
        ));
        assert!(matches!(
            classify_accept_failure(&mut retry, &transient()),
            FailureAction::Cooldown(_)
        ));
        assert_eq!(
            classify_accept_failure(&mut retry, &fatal()),
            FailureAction::Halt
        );
    }

    #[test]
    fn test_retry_budget_exhaustion_halts() {
        let mut retry = backoff();

        for _ in 0..ACCEPT_RETRY_ATTEMPTS {
            assert!(matches!(
                classify_accept_failure(&mut retry, &transient()),
                FailureAction::Cooldown(_)
            ));
        }
        assert_eq!(
            classify_accept_failure(&mut retry, &transient()),
            FailureAction::Halt
        );
    }

    #[test]
    fn test_reset_restores_cooldowns() {
        let mut retry = backoff();

        for _ in 0..ACCEPT_RETRY_ATTEMPTS {
            classify_accept_failure(&mut retry, &transient());
        }
        retry.reset();
        assert!(matches!(
            classify_accept_failure(&mut retry, &transient()),
            FailureAction::Cooldown(_)
        ));
    }

    #[test]
    fn test_stats_listener_binds_on_start_not_construction() {
        use crate::handler::LoggingHandler;

        // An unbindable stats address must not fail construction; the bind
        // happens in `start`, which is where the error surfaces.
        let config = WsConfig::new().with_debug_addr("999.999.999.999:0");
        let server = WsServer::new(config, LoggingHandler).unwrap();
        assert!(server.start().is_err());
        server.shutdown();
    }

    #[test]
    fn test_schedule_timeout_counts_as_transient() {
        let mut retry = backoff();
        let err = WsError::ScheduleTimeout(ACCEPT_SCHEDULE_TIMEOUT);
        assert!(matches!(
            classify_accept_failure(&mut retry, &err),
            FailureAction::Cooldown(_)
        ));
    }
}
