//! Client events and their delivery.
//!
//! Events are produced on the reader, watcher and reconnect threads and
//! queued to a single dispatcher thread, which hands them to every registered
//! [`EventSink`] in production order. Sinks therefore never run while client
//! locks are held and may call back into the client freely.

use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{trace, warn};
use xmlstream_frame::Element;

use crate::sync::lock;

/// Something the client observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// One complete element arrived from the peer.
    DataReceived(Element),
    /// Liveness changed. Emitted only on transitions.
    StatusChanged(bool),
    /// A reconnect attempt failed; another follows after the interval.
    ReconnectFailed { attempt: u32, error: String },
}

/// Receiver of client events.
///
/// `deliver` runs on the dispatcher thread. Returning `false` unregisters
/// the sink.
pub trait EventSink: Send + 'static {
    fn deliver(&mut self, event: &ClientEvent) -> bool;
}

impl EventSink for mpsc::Sender<ClientEvent> {
    fn deliver(&mut self, event: &ClientEvent) -> bool {
        self.send(event.clone()).is_ok()
    }
}

/// Adapts a closure into an [`EventSink`] that stays registered.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: FnMut(&ClientEvent) + Send + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventSink for CallbackSink<F>
where
    F: FnMut(&ClientEvent) + Send + 'static,
{
    fn deliver(&mut self, event: &ClientEvent) -> bool {
        (self.callback)(event);
        true
    }
}

enum Dispatch {
    Event(ClientEvent),
    Stop,
}

type Sinks = Arc<Mutex<Vec<Box<dyn EventSink>>>>;

/// Ordered event queue drained by one dispatcher thread.
pub(crate) struct EventBus {
    queue: mpsc::Sender<Dispatch>,
    sinks: Sinks,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatcher_id: ThreadId,
}

impl EventBus {
    pub(crate) fn start() -> io::Result<Self> {
        let (queue, rx) = mpsc::channel();
        let sinks: Sinks = Arc::default();

        let handle = {
            let sinks = Arc::clone(&sinks);
            thread::Builder::new()
                .name("xmlstream-events".to_string())
                .spawn(move || dispatch_loop(rx, sinks))?
        };

        Ok(Self {
            queue,
            sinks,
            dispatcher_id: handle.thread().id(),
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn add_sink(&self, sink: Box<dyn EventSink>) {
        lock(&self.sinks).push(sink);
    }

    /// Queue an event. Never blocks.
    pub(crate) fn emit(&self, event: ClientEvent) {
        if self.queue.send(Dispatch::Event(event)).is_err() {
            trace!("event dropped after dispatcher stopped");
        }
    }

    /// Drain queued events, stop the dispatcher and drop every sink.
    pub(crate) fn stop(&self) {
        let _ = self.queue.send(Dispatch::Stop);

        let handle = lock(&self.dispatcher).take();
        if let Some(handle) = handle {
            if thread::current().id() == self.dispatcher_id {
                // Stopping from inside a sink: the loop exits once it returns.
                drop(handle);
            } else if handle.join().is_err() {
                warn!("event dispatcher panicked");
            }
        }

        lock(&self.sinks).clear();
    }
}

fn dispatch_loop(rx: mpsc::Receiver<Dispatch>, sinks: Sinks) {
    while let Ok(Dispatch::Event(event)) = rx.recv() {
        // Deliver without holding the lock so sinks can register more sinks.
        let mut active = std::mem::take(&mut *lock(&sinks));
        active.retain_mut(|sink| sink.deliver(&event));

        let mut registered = lock(&sinks);
        active.append(&mut registered);
        *registered = active;
    }
    trace!("event dispatcher exiting");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn events_reach_every_sink_in_order() {
        let bus = EventBus::start().unwrap();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        bus.add_sink(Box::new(tx_a));
        bus.add_sink(Box::new(tx_b));

        bus.emit(ClientEvent::StatusChanged(true));
        bus.emit(ClientEvent::DataReceived(Element::new("a")));

        for rx in [&rx_a, &rx_b] {
            assert_eq!(rx.recv_timeout(WAIT).unwrap(), ClientEvent::StatusChanged(true));
            assert_eq!(
                rx.recv_timeout(WAIT).unwrap(),
                ClientEvent::DataReceived(Element::new("a"))
            );
        }
        bus.stop();
    }

    #[test]
    fn dropped_receiver_unregisters_sink() {
        let bus = EventBus::start().unwrap();
        let (tx, rx) = mpsc::channel();
        bus.add_sink(Box::new(tx));
        drop(rx);

        bus.emit(ClientEvent::StatusChanged(true));
        bus.stop();

        assert!(lock(&bus.sinks).is_empty());
    }

    #[test]
    fn callback_can_register_another_sink() {
        let bus = Arc::new(EventBus::start().unwrap());
        let (tx, rx) = mpsc::channel();

        let registrar = Arc::clone(&bus);
        let mut pending = Some(tx);
        bus.add_sink(Box::new(CallbackSink::new(move |_event: &ClientEvent| {
            if let Some(tx) = pending.take() {
                registrar.add_sink(Box::new(tx));
            }
        })));

        bus.emit(ClientEvent::StatusChanged(true));
        bus.emit(ClientEvent::StatusChanged(false));

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), ClientEvent::StatusChanged(false));
        bus.stop();
    }

    #[test]
    fn emit_after_stop_is_ignored() {
        let bus = EventBus::start().unwrap();
        bus.stop();
        bus.emit(ClientEvent::StatusChanged(true));
        bus.stop();
    }
}
