//! Connection lifecycle: connect, teardown, send.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};
use xmlstream_frame::{FrameConfig, Payload, XmlWriter};
use xmlstream_transport::{ConnectOptions, Endpoint};

use crate::error::{ConnectError, SendError};
use crate::event::EventBus;
use crate::liveness::Liveness;
use crate::reader;
use crate::sync::{lock, CancelToken};

/// Where the connection is in its lifecycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

struct Live {
    stream: Arc<TcpStream>,
    cancel: CancelToken,
    reader: Option<JoinHandle<()>>,
}

/// Owns at most one live socket and its stream reader.
///
/// Connect and teardown are serialized by a lifecycle lock, so a new reader is
/// only started after the previous one has been joined.
pub(crate) struct ConnectionManager {
    endpoint: Endpoint,
    options: ConnectOptions,
    frame: FrameConfig,
    state: AtomicU8,
    lifecycle: Mutex<()>,
    live: Mutex<Option<Live>>,
    liveness: Liveness,
    events: Arc<EventBus>,
}

impl ConnectionManager {
    pub(crate) fn new(
        endpoint: Endpoint,
        options: ConnectOptions,
        frame: FrameConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            endpoint,
            options,
            frame,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            lifecycle: Mutex::new(()),
            live: Mutex::new(None),
            liveness: Liveness::default(),
            events,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Last published liveness value.
    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Connect unless already connected to a live peer.
    ///
    /// A connection whose peer has been reported gone is torn down and
    /// replaced.
    pub fn connect(&self) -> Result<(), ConnectError> {
        self.connect_if(|| true).map(|_| ())
    }

    /// Like [`connect`](Self::connect), but re-checks `wanted` under the
    /// lifecycle lock. Returns `Ok(false)` if it no longer holds.
    pub(crate) fn connect_if(&self, wanted: impl Fn() -> bool) -> Result<bool, ConnectError> {
        let _lifecycle = lock(&self.lifecycle);
        if !wanted() {
            return Ok(false);
        }

        if self.state() == ConnectionState::Connected {
            if self.liveness.is_alive() {
                trace!(endpoint = %self.endpoint, "already connected");
                return Ok(true);
            }
            debug!(endpoint = %self.endpoint, "replacing dead connection");
            self.teardown();
        }

        self.set_state(ConnectionState::Connecting);
        debug!(endpoint = %self.endpoint, "connecting");

        let stream = match xmlstream_transport::connect(&self.endpoint, &self.options) {
            Ok(stream) => Arc::new(stream),
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(err.into());
            }
        };

        let cancel = CancelToken::new();
        {
            let mut live = lock(&self.live);
            *live = Some(Live {
                stream: Arc::clone(&stream),
                cancel: cancel.clone(),
                reader: None,
            });
            self.set_state(ConnectionState::Connected);
            self.liveness.reset(true, &self.events);
        }

        match reader::spawn(stream, cancel, self.frame.clone(), Arc::clone(&self.events)) {
            Ok(handle) => {
                if let Some(live) = lock(&self.live).as_mut() {
                    live.reader = Some(handle);
                }
            }
            Err(err) => {
                self.teardown();
                return Err(ConnectError::Spawn(err));
            }
        }

        info!(endpoint = %self.endpoint, "connected");
        Ok(true)
    }

    /// Tear down the connection if there is one. Idempotent.
    pub fn disconnect(&self) {
        let _lifecycle = lock(&self.lifecycle);
        if self.teardown() {
            info!(endpoint = %self.endpoint, "disconnected");
        }
    }

    /// Send one payload, flushing before returning.
    pub fn send(&self, payload: &Payload) -> Result<(), SendError> {
        let stream = lock(&self.live)
            .as_ref()
            .map(|live| Arc::clone(&live.stream))
            .ok_or(SendError::NotConnected)?;

        XmlWriter::new(&*stream).send(payload)?;
        trace!(endpoint = %self.endpoint, "payload sent");
        Ok(())
    }

    /// Current liveness generation and socket, read together.
    pub(crate) fn snapshot(&self) -> (u64, Option<Arc<TcpStream>>) {
        let live = lock(&self.live);
        (
            self.liveness.generation(),
            live.as_ref().map(|live| Arc::clone(&live.stream)),
        )
    }

    pub(crate) fn observe_liveness(&self, generation: u64, alive: bool) -> bool {
        self.liveness.observe(generation, alive, &self.events)
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    // Caller holds the lifecycle lock.
    fn teardown(&self) -> bool {
        let (stream, cancel, reader) = match lock(&self.live).as_mut() {
            Some(live) => (Arc::clone(&live.stream), live.cancel.clone(), live.reader.take()),
            None => return false,
        };

        cancel.cancel();
        if let Err(err) = stream.shutdown(Shutdown::Both) {
            trace!(error = %err, "socket already closed");
        }

        if let Some(reader) = reader {
            if reader.thread().id() == thread::current().id() {
                drop(reader);
            } else if reader.join().is_err() {
                warn!(endpoint = %self.endpoint, "stream reader panicked");
            }
        }

        let mut live = lock(&self.live);
        *live = None;
        self.set_state(ConnectionState::Disconnected);
        self.liveness.reset(false, &self.events);
        true
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
