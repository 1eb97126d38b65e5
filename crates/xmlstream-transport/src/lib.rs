//! TCP transport for xmlstream.
//!
//! This is the lowest layer of xmlstream:
//! - [`Endpoint`] names the remote peer (`host:port`)
//! - [`tcp::connect`] opens a blocking [`std::net::TcpStream`] to it
//! - [`probe::probe`] checks a socket for peer-initiated close without
//!   consuming any application data
//!
//! Everything else builds on the plain `TcpStream` returned here.

pub mod endpoint;
pub mod error;
pub mod probe;
pub mod tcp;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use probe::{probe, Readiness};
pub use tcp::{connect, ConnectOptions};
