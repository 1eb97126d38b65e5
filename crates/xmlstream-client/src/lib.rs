//! Long-lived TCP client for XML fragment streams.
//!
//! This is the "just works" layer. An [`XmlStreamClient`] owns one connection
//! to a fixed [`Endpoint`], turns inbound bytes into [`Element`]s, sends
//! elements or raw text, notices when the peer goes away even if nothing is
//! being read, and reconnects on its own until told to stop.
//!
//! ```no_run
//! use xmlstream_client::{ClientConfig, ClientEvent, XmlStreamClient};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = XmlStreamClient::new("127.0.0.1:2255".parse()?, ClientConfig::default())?;
//! let events = client.subscribe();
//! client.connect()?;
//! client.send_text("hello")?;
//!
//! for event in events {
//!     if let ClientEvent::DataReceived(element) = event {
//!         println!("{element}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod liveness;
mod reader;
mod reconnect;
mod sync;

pub use client::XmlStreamClient;
pub use config::{ClientConfig, DEFAULT_POLL_INTERVAL, DEFAULT_RECONNECT_INTERVAL};
pub use connection::ConnectionState;
pub use error::{ClientError, ConnectError, SendError};
pub use event::{CallbackSink, ClientEvent, EventSink};
pub use liveness::{LivenessProbe, SocketProbe};

pub use xmlstream_frame::{Element, Node, Payload};
pub use xmlstream_transport::{Endpoint, Readiness};
