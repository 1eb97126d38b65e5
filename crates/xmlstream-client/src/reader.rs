//! Stream reader thread: socket bytes in, `DataReceived` events out.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};
use xmlstream_frame::{FrameConfig, XmlError, XmlReader};

use crate::event::{ClientEvent, EventBus};
use crate::sync::CancelToken;

pub(crate) fn spawn(
    stream: Arc<TcpStream>,
    cancel: CancelToken,
    config: FrameConfig,
    events: Arc<EventBus>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("xmlstream-reader".to_string())
        .spawn(move || {
            if let Err(err) = run(&stream, &cancel, config, &events) {
                // Unrecoverable stream state: drop the socket so the watcher
                // reports the loss and reconnect takes over.
                error!(error = %err, "stream reader failed");
                if let Err(err) = stream.shutdown(Shutdown::Both) {
                    trace!(error = %err, "socket already closed");
                }
            }
        })
}

fn run(
    stream: &TcpStream,
    cancel: &CancelToken,
    config: FrameConfig,
    events: &EventBus,
) -> Result<(), XmlError> {
    let mut reader = XmlReader::with_config(stream, config);
    debug!("stream reader started");

    while !cancel.is_cancelled() {
        match reader.read_element() {
            Ok(element) => {
                trace!(name = element.name(), "element received");
                events.emit(ClientEvent::DataReceived(element));
            }
            Err(err) if err.is_noise() => {
                trace!(error = %err, "skipping stream noise");
            }
            Err(XmlError::ConnectionClosed | XmlError::Io(_)) => {
                if cancel.is_cancelled() {
                    debug!("stream reader stopped");
                } else {
                    debug!("stream closed by peer");
                }
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }

    debug!("stream reader stopped");
    Ok(())
}
