//! Single-threaded readiness poller.
//!
//! One dedicated thread owns the OS event queue (epoll/kqueue via [`mio`])
//! and delivers read/hangup readiness for registered descriptors through a
//! per-registration callback. Registrations are one-shot: after a callback
//! fires, the descriptor stops receiving notifications until it is
//! explicitly re-armed with [`Poller::resume`].
//!
//! Each registration carries an arm state (`Armed` / `Fired` / `Disarmed`).
//! The state transitions guarantee at most one delivery per arming, and the
//! re-arm goes through `reregister`, which re-reports readiness that is
//! still pending on the descriptor.
//!
//! Callbacks run on the poller thread and must never block on application
//! logic; they are expected to do nothing more than classify the event and
//! hand the real work to a pool.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{CoreError, Result};

/// Token reserved for the shutdown waker.
const WAKE_TOKEN: Token = Token(0);

const EVENTS_CAPACITY: usize = 1024;

/// Arm state of a registration.
///
/// `Armed` registrations deliver the next readiness event and transition to
/// `Fired`; `Fired` and `Disarmed` registrations swallow events until
/// [`Poller::resume`] re-arms them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmState {
    Armed,
    Fired,
    Disarmed,
}

/// Readiness reported for a descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub readable: bool,
    pub hangup: bool,
}

impl Readiness {
    /// True when the peer has hung up (or the descriptor errored) and a
    /// user-level read should be skipped.
    #[inline]
    #[must_use]
    pub const fn is_hangup(&self) -> bool {
        self.hangup
    }
}

/// Handle identifying one registered descriptor.
///
/// Cheap to copy; passed back into every callback invocation so the callback
/// can resume or deregister its own registration.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    token: Token,
    fd: RawFd,
}

type Callback = Arc<dyn Fn(Registration, Readiness) + Send + Sync>;

struct Entry {
    fd: RawFd,
    state: ArmState,
    callback: Callback,
}

struct PollerShared {
    registry: Registry,
    table: Mutex<HashMap<Token, Entry>>,
    next_token: AtomicUsize,
    running: AtomicBool,
}

/// Single-threaded readiness poller with one-shot registrations.
pub struct Poller {
    shared: Arc<PollerShared>,
    waker: Waker,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Create the poller and start its event-loop thread.
    pub fn new() -> Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        let shared = Arc::new(PollerShared {
            registry,
            table: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(WAKE_TOKEN.0 + 1),
            running: AtomicBool::new(true),
        });

        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("bulkhead-poller".into())
            .spawn(move || event_loop(poll, &loop_shared))
            .map_err(CoreError::Io)?;

        Ok(Self {
            shared,
            waker,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Register `fd` for read/hangup readiness in one-shot mode.
    ///
    /// The callback fires on the poller thread at most once per arming and
    /// receives its own [`Registration`] handle plus the observed readiness.
    pub fn register(
        &self,
        fd: RawFd,
        callback: impl Fn(Registration, Readiness) + Send + Sync + 'static,
    ) -> Result<Registration> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(CoreError::PollerStopped);
        }

        let token = Token(self.shared.next_token.fetch_add(1, Ordering::Relaxed));
        self.shared.table.lock().insert(
            token,
            Entry {
                fd,
                state: ArmState::Armed,
                callback: Arc::new(callback),
            },
        );

        if let Err(e) = self
            .shared
            .registry
            .register(&mut SourceFd(&fd), token, Interest::READABLE)
        {
            self.shared.table.lock().remove(&token);
            return Err(e.into());
        }

        Ok(Registration { token, fd })
    }

    /// Re-arm a fired (or disarmed) registration.
    ///
    /// Readiness that accumulated while the registration was not armed is
    /// reported again, so no event is lost between a fired callback and its
    /// resume.
    pub fn resume(&self, registration: &Registration) -> Result<()> {
        {
            let mut table = self.shared.table.lock();
            let entry = table
                .get_mut(&registration.token)
                .ok_or(CoreError::RegistrationNotFound)?;
            entry.state = ArmState::Armed;
        }

        self.shared.registry.reregister(
            &mut SourceFd(&registration.fd),
            registration.token,
            Interest::READABLE,
        )?;
        Ok(())
    }

    /// Pause a registration without removing it. Events are swallowed until
    /// the registration is resumed.
    pub fn disarm(&self, registration: &Registration) -> Result<()> {
        let mut table = self.shared.table.lock();
        let entry = table
            .get_mut(&registration.token)
            .ok_or(CoreError::RegistrationNotFound)?;
        entry.state = ArmState::Disarmed;
        Ok(())
    }

    /// Remove a registration. No callback will fire for this descriptor
    /// afterwards.
    pub fn deregister(&self, registration: &Registration) -> Result<()> {
        let removed = self.shared.table.lock().remove(&registration.token);
        if removed.is_none() {
            return Err(CoreError::RegistrationNotFound);
        }

        // The descriptor may already be closed; removal from the table alone
        // guarantees no further delivery.
        if let Err(e) = self
            .shared
            .registry
            .deregister(&mut SourceFd(&registration.fd))
        {
            debug!("deregister syscall failed: {e}");
        }
        Ok(())
    }

    /// Number of live registrations. Read-only, useful for tests and
    /// introspection.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.shared.table.lock().len()
    }

    /// Stop the event loop and wait for the poller thread to exit.
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.waker.wake() {
            error!("failed to wake poller for shutdown: {e}");
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        // Drop remaining callbacks so they cannot keep their captures alive.
        self.shared.table.lock().clear();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn event_loop(mut poll: Poll, shared: &PollerShared) {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    while shared.running.load(Ordering::Acquire) {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!("poll failed: {e}");
            break;
        }

        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }

            // Deliver at most one event per arming; the callback is invoked
            // outside the table lock because it may block on pool submission.
            let fired = {
                let mut table = shared.table.lock();
                match table.get_mut(&event.token()) {
                    Some(entry) if entry.state == ArmState::Armed => {
                        entry.state = ArmState::Fired;
                        Some((
                            Registration {
                                token: event.token(),
                                fd: entry.fd,
                            },
                            Arc::clone(&entry.callback),
                        ))
                    }
                    _ => None,
                }
            };

            if let Some((registration, callback)) = fired {
                let readiness = Readiness {
                    readable: event.is_readable(),
                    hangup: event.is_read_closed() || event.is_error(),
                };
                callback(registration, readiness);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;
    use std::time::Duration;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_one_shot_delivery_until_resumed() {
        let poller = Poller::new().unwrap();
        let (mut client, server) = socket_pair();
        let (tx, rx) = flume::unbounded();

        let reg = poller
            .register(server.as_raw_fd(), move |_reg, ev| {
                tx.send(ev.readable).unwrap();
            })
            .unwrap();

        client.write_all(b"a").unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());

        // More data while fired: swallowed.
        client.write_all(b"b").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        // Re-arming re-reports the still-pending readiness.
        poller.resume(&reg).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());

        poller.shutdown();
    }

    #[test]
    fn test_hangup_is_reported() {
        let poller = Poller::new().unwrap();
        let (client, server) = socket_pair();
        let (tx, rx) = flume::unbounded();

        poller
            .register(server.as_raw_fd(), move |_reg, ev| {
                tx.send(ev.is_hangup()).unwrap();
            })
            .unwrap();

        drop(client);
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());

        poller.shutdown();
    }

    #[test]
    fn test_disarmed_registration_swallows_events() {
        let poller = Poller::new().unwrap();
        let (mut client, server) = socket_pair();
        let (tx, rx) = flume::unbounded();

        let reg = poller
            .register(server.as_raw_fd(), move |_reg, _ev| {
                tx.send(()).unwrap();
            })
            .unwrap();
        poller.disarm(&reg).unwrap();

        client.write_all(b"a").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        poller.resume(&reg).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());

        poller.shutdown();
    }

    #[test]
    fn test_deregistered_descriptor_never_fires() {
        let poller = Poller::new().unwrap();
        let (mut client, server) = socket_pair();
        let (tx, rx) = flume::unbounded();

        let reg = poller
            .register(server.as_raw_fd(), move |_reg, _ev| {
                tx.send(()).unwrap();
            })
            .unwrap();
        assert_eq!(poller.registered(), 1);

        poller.deregister(&reg).unwrap();
        assert_eq!(poller.registered(), 0);
        assert!(matches!(
            poller.deregister(&reg),
            Err(CoreError::RegistrationNotFound)
        ));

        client.write_all(b"a").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        poller.shutdown();
    }

    #[test]
    fn test_callback_resumes_itself() {
        let poller = Arc::new(Poller::new().unwrap());
        let (mut client, server) = socket_pair();
        let (tx, rx) = flume::unbounded();

        let cb_poller = Arc::clone(&poller);
        poller
            .register(server.as_raw_fd(), move |reg, _ev| {
                tx.send(()).unwrap();
                // Consume nothing; re-arming re-reports pending readiness.
                let _ = cb_poller.resume(&reg);
            })
            .unwrap();

        client.write_all(b"a").unwrap();
        // The callback keeps resuming itself, so events keep coming.
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());

        poller.shutdown();
    }
}
