//! Streaming XML fragments over a long-lived TCP connection.
//!
//! xmlstream talks to peers that exchange a continuous stream of standalone
//! XML elements with no length prefix, no enclosing root and no delimiter. It
//! decodes that stream element by element, skips noise between elements,
//! notices a vanished peer without reading and reconnects on its own.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP endpoints, connect, socket liveness probe
//! - [`frame`]: element tree, fragment codec, blocking reader/writer
//!   (plus a `tokio_util` codec behind the `async` feature)
//! - [`client`]: the reconnecting client (behind the `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use xmlstream_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use xmlstream_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use xmlstream_client::*;
}

#[cfg(feature = "client")]
pub use xmlstream_client::{ClientConfig, ClientEvent, XmlStreamClient};
pub use xmlstream_frame::{Element, Payload};
pub use xmlstream_transport::Endpoint;
