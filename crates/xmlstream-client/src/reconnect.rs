//! Automatic reconnect after the peer goes away.
//!
//! The controller is an [`EventSink`]: a `StatusChanged(false)` while the
//! caller still wants a connection starts one retry episode on its own
//! thread. The episode retries every interval until it connects, the caller
//! disconnects explicitly, or the client closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::event::{ClientEvent, EventSink};
use crate::sync::{lock, CancelToken};

/// State shared between the client and its reconnect episodes.
#[derive(Clone)]
pub(crate) struct ReconnectController {
    connection: Weak<ConnectionManager>,
    /// Set by a successful `connect`, cleared by `disconnect`/`close`.
    wanted: Arc<AtomicBool>,
    shutdown: CancelToken,
    interval: Duration,
    running: Arc<AtomicBool>,
    episode: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ReconnectController {
    pub(crate) fn new(
        connection: &Arc<ConnectionManager>,
        wanted: Arc<AtomicBool>,
        shutdown: CancelToken,
        interval: Duration,
    ) -> Self {
        Self {
            connection: Arc::downgrade(connection),
            wanted,
            shutdown,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            episode: Arc::default(),
        }
    }

    /// Wait for a running episode to finish. Call after cancelling shutdown.
    pub(crate) fn join(&self) {
        let handle = lock(&self.episode).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                reap(handle);
            }
        }
    }

    fn should_retry(&self, connection: &ConnectionManager) -> bool {
        self.wanted.load(Ordering::SeqCst)
            && !self.shutdown.is_cancelled()
            && !connection.is_alive()
    }

    fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("reconnect already in progress");
            return;
        }

        let controller = self.clone();
        let spawned = thread::Builder::new()
            .name("xmlstream-reconnect".to_string())
            .spawn(move || controller.run());

        match spawned {
            Ok(handle) => {
                let previous = lock(&self.episode).replace(handle);
                // A previous episode has already cleared `running`; reap it.
                if let Some(previous) = previous {
                    reap(previous);
                }
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                warn!(error = %err, "failed to start reconnect episode");
            }
        }
    }

    fn run(&self) {
        loop {
            self.retry_until_done();
            self.running.store(false, Ordering::SeqCst);

            // A loss reported while this episode was finishing was ignored
            // by `start`; pick it up here.
            let again = self
                .connection
                .upgrade()
                .is_some_and(|connection| self.should_retry(&connection));
            if !again || self.running.swap(true, Ordering::SeqCst) {
                return;
            }
        }
    }

    fn retry_until_done(&self) {
        let mut attempt = 0u32;
        loop {
            if self.shutdown.wait_timeout(self.interval) {
                debug!("reconnect cancelled by close");
                return;
            }
            let Some(connection) = self.connection.upgrade() else {
                return;
            };
            if !self.wanted.load(Ordering::SeqCst) {
                debug!("reconnect abandoned after disconnect");
                return;
            }
            if connection.is_alive() {
                debug!("connection already restored");
                return;
            }

            attempt += 1;
            info!(attempt, endpoint = %connection.endpoint(), "reconnecting");

            let wanted = || self.wanted.load(Ordering::SeqCst) && !self.shutdown.is_cancelled();
            match connection.connect_if(wanted) {
                Ok(true) => {
                    info!(attempt, endpoint = %connection.endpoint(), "reconnected");
                    return;
                }
                Ok(false) => return,
                Err(err) => {
                    warn!(attempt, error = %err, "reconnect attempt failed");
                    connection.events().emit(ClientEvent::ReconnectFailed {
                        attempt,
                        error: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Join an episode thread, logging instead of propagating a panic.
fn reap(handle: JoinHandle<()>) -> bool {
    let clean = handle.join().is_ok();
    if !clean {
        warn!("reconnect episode panicked");
    }
    clean
}

impl EventSink for ReconnectController {
    fn deliver(&mut self, event: &ClientEvent) -> bool {
        let Some(connection) = self.connection.upgrade() else {
            return false;
        };
        if *event == ClientEvent::StatusChanged(false) && self.should_retry(&connection) {
            self.start();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaping_a_panicked_episode_does_not_propagate() {
        let handle = thread::spawn(|| panic!("episode failure"));
        assert!(!reap(handle));
    }

    #[test]
    fn reaping_a_finished_episode_is_clean() {
        let handle = thread::spawn(|| {});
        assert!(reap(handle));
    }
}
