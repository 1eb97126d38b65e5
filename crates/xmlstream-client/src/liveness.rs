//! Liveness tracking.
//!
//! A blocked reader does not notice a peer that vanished without sending
//! anything, so a watcher thread probes the socket on a fixed interval and
//! publishes `StatusChanged` on every transition.

use std::io;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};
use xmlstream_transport::Readiness;

use crate::connection::ConnectionManager;
use crate::event::{ClientEvent, EventBus};
use crate::sync::{lock, CancelToken};

/// Non-consuming check of a connected socket.
pub trait LivenessProbe: Send + Sync + 'static {
    fn probe(&self, stream: &TcpStream) -> io::Result<Readiness>;
}

/// Probe backed by the platform `poll` + `MSG_PEEK` check.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketProbe;

impl LivenessProbe for SocketProbe {
    fn probe(&self, stream: &TcpStream) -> io::Result<Readiness> {
        xmlstream_transport::probe(stream)
    }
}

#[derive(Debug, Default)]
struct Status {
    alive: bool,
    generation: u64,
}

/// Last published liveness value.
///
/// Every connect or teardown starts a new generation; watcher observations
/// taken against an older generation are discarded.
#[derive(Debug, Default)]
pub(crate) struct Liveness {
    status: Mutex<Status>,
}

impl Liveness {
    pub(crate) fn is_alive(&self) -> bool {
        lock(&self.status).alive
    }

    pub(crate) fn generation(&self) -> u64 {
        lock(&self.status).generation
    }

    /// Start a new generation with a known value.
    pub(crate) fn reset(&self, alive: bool, events: &EventBus) {
        let mut status = lock(&self.status);
        status.generation += 1;
        Self::publish(&mut status, alive, events);
    }

    /// Apply a watcher observation. Returns `false` if it was stale.
    pub(crate) fn observe(&self, generation: u64, alive: bool, events: &EventBus) -> bool {
        let mut status = lock(&self.status);
        if status.generation != generation {
            trace!(generation, current = status.generation, "discarding stale liveness observation");
            return false;
        }
        if status.alive && !alive {
            debug!("peer no longer reachable");
        }
        Self::publish(&mut status, alive, events);
        true
    }

    // Emitting under the status lock keeps transitions in queue order.
    fn publish(status: &mut Status, alive: bool, events: &EventBus) {
        if status.alive != alive {
            status.alive = alive;
            events.emit(ClientEvent::StatusChanged(alive));
        }
    }
}

/// Periodic prober for one client's connection.
pub(crate) struct LivenessWatcher {
    connection: Arc<ConnectionManager>,
    probe: Arc<dyn LivenessProbe>,
}

impl LivenessWatcher {
    pub(crate) fn new(connection: Arc<ConnectionManager>, probe: Arc<dyn LivenessProbe>) -> Self {
        Self { connection, probe }
    }

    /// Probe once and publish the result. Returns the observed value.
    ///
    /// No socket means not alive. A probe error counts as not alive.
    pub(crate) fn run_cycle(&self) -> bool {
        let (generation, stream) = self.connection.snapshot();
        let alive = match stream {
            None => false,
            Some(stream) => match self.probe.probe(&stream) {
                Ok(readiness) => readiness.is_alive(),
                Err(err) => {
                    trace!(error = %err, "liveness probe failed");
                    false
                }
            },
        };

        self.connection.observe_liveness(generation, alive);
        alive
    }

    /// Run until `shutdown` is cancelled, one cycle per `interval`.
    pub(crate) fn spawn(
        self,
        interval: Duration,
        shutdown: CancelToken,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("xmlstream-liveness".to_string())
            .spawn(move || {
                debug!(?interval, "liveness watcher started");
                loop {
                    self.run_cycle();
                    if shutdown.wait_timeout(interval) {
                        break;
                    }
                }
                debug!("liveness watcher stopped");
            })
    }
}
