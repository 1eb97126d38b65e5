use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};
use xmlstream_frame::{Element, Payload};
use xmlstream_transport::Endpoint;

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{ClientError, ConnectError, SendError};
use crate::event::{CallbackSink, ClientEvent, EventBus, EventSink};
use crate::liveness::{LivenessProbe, LivenessWatcher, SocketProbe};
use crate::reconnect::ReconnectController;
use crate::sync::{lock, CancelToken};

/// Streaming XML client for one endpoint.
///
/// Creating a client starts its event dispatcher and liveness watcher but does
/// not connect. Register sinks with [`subscribe`](Self::subscribe) or
/// [`on_event`](Self::on_event) before calling [`connect`](Self::connect) so
/// the first `StatusChanged(true)` is not missed.
///
/// All methods take `&self`; wrap the client in an `Arc` to share it. Dropping
/// the client closes it.
pub struct XmlStreamClient {
    connection: Arc<ConnectionManager>,
    config: ClientConfig,
    events: Arc<EventBus>,
    probe: Arc<dyn LivenessProbe>,
    wanted: Arc<AtomicBool>,
    shutdown: CancelToken,
    reconnect: ReconnectController,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl XmlStreamClient {
    pub fn new(endpoint: Endpoint, config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_probe(endpoint, config, SocketProbe)
    }

    /// Create a client with a custom liveness probe.
    pub fn with_probe(
        endpoint: Endpoint,
        config: ClientConfig,
        probe: impl LivenessProbe,
    ) -> Result<Self, ClientError> {
        let events = Arc::new(EventBus::start()?);
        let connection = Arc::new(ConnectionManager::new(
            endpoint,
            config.connect_options(),
            config.frame_config(),
            Arc::clone(&events),
        ));
        let probe: Arc<dyn LivenessProbe> = Arc::new(probe);
        let wanted = Arc::new(AtomicBool::new(false));
        let shutdown = CancelToken::new();

        let reconnect = ReconnectController::new(
            &connection,
            Arc::clone(&wanted),
            shutdown.clone(),
            config.reconnect_interval,
        );
        if config.auto_reconnect {
            events.add_sink(Box::new(reconnect.clone()));
        }

        let watcher = LivenessWatcher::new(Arc::clone(&connection), Arc::clone(&probe))
            .spawn(config.poll_interval, shutdown.clone());
        let watcher = match watcher {
            Ok(handle) => handle,
            Err(err) => {
                events.stop();
                return Err(err.into());
            }
        };

        debug!(endpoint = %connection.endpoint(), ?config, "client created");
        Ok(Self {
            connection,
            config,
            events,
            probe,
            wanted,
            shutdown,
            reconnect,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.connection.endpoint()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the endpoint. A no-op if already connected to a live peer.
    ///
    /// After a successful connect, peer loss triggers automatic reconnect
    /// (when enabled) until [`disconnect`](Self::disconnect) or
    /// [`close`](Self::close).
    pub fn connect(&self) -> Result<(), ConnectError> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectError::Closed);
        }

        let previously_wanted = self.wanted.swap(true, Ordering::SeqCst);
        match self.connection.connect() {
            Ok(()) => Ok(()),
            Err(err) => {
                if !previously_wanted {
                    self.wanted.store(false, Ordering::SeqCst);
                }
                Err(err)
            }
        }
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        self.wanted.store(false, Ordering::SeqCst);
        self.connection.disconnect();
    }

    /// Send an element or raw text.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<(), SendError> {
        self.connection.send(&payload.into())
    }

    /// Send text verbatim.
    pub fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.connection.send(&Payload::Text(text.to_string()))
    }

    pub fn send_element(&self, element: &Element) -> Result<(), SendError> {
        self.connection.send(&Payload::Element(element.clone()))
    }

    /// `true` while a socket is open, whether or not the peer is still there.
    pub fn is_connected(&self) -> bool {
        self.connection.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Last liveness value published as `StatusChanged`.
    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }

    /// Run one liveness probe now and publish the result.
    pub fn probe_liveness(&self) -> bool {
        LivenessWatcher::new(Arc::clone(&self.connection), Arc::clone(&self.probe)).run_cycle()
    }

    /// Receive every event produced from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel();
        self.events.add_sink(Box::new(tx));
        rx
    }

    /// Call `callback` for every event, on the dispatcher thread.
    pub fn on_event<F>(&self, callback: F)
    where
        F: FnMut(&ClientEvent) + Send + 'static,
    {
        self.events.add_sink(Box::new(CallbackSink::new(callback)));
    }

    pub fn add_sink(&self, sink: impl EventSink) {
        self.events.add_sink(Box::new(sink));
    }

    /// Disconnect and stop every background thread. Idempotent.
    ///
    /// Events queued before the call are still delivered.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.wanted.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        self.connection.disconnect();
        self.reconnect.join();

        let watcher = lock(&self.watcher).take();
        if let Some(watcher) = watcher {
            if watcher.join().is_err() {
                warn!("liveness watcher panicked");
            }
        }

        self.events.stop();
        debug!(endpoint = %self.connection.endpoint(), "client closed");
    }
}

impl Drop for XmlStreamClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for XmlStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlStreamClient")
            .field("connection", &self.connection)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
