use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// Socket options applied when connecting.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Per-address connect timeout. `None` uses the OS default.
    pub timeout: Option<Duration>,
    /// Disable Nagle's algorithm so small fragments go out immediately.
    pub nodelay: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            nodelay: true,
        }
    }
}

/// Connect to `endpoint` (blocking).
///
/// Every resolved address is tried in order; the error from the last attempt
/// is returned when none succeeds.
pub fn connect(endpoint: &Endpoint, options: &ConnectOptions) -> Result<TcpStream> {
    let addrs = endpoint.resolve()?;
    let mut last_err = None;

    for addr in addrs {
        trace!(%addr, "attempting tcp connect");
        let attempt = match options.timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };

        match attempt {
            Ok(stream) => {
                if options.nodelay {
                    stream.set_nodelay(true)?;
                }
                debug!(%endpoint, %addr, "connected");
                return Ok(stream);
            }
            Err(source) => {
                trace!(%addr, error = %source, "tcp connect failed");
                last_err = Some(TransportError::Connect { addr, source });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| TransportError::NoAddress {
        endpoint: endpoint.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());

        let stream = connect(&endpoint, &ConnectOptions::default()).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), listener.local_addr().unwrap());
        assert!(stream.nodelay().unwrap());
    }

    #[test]
    fn refused_connection_is_connect_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = connect(
            &Endpoint::new("127.0.0.1", port),
            &ConnectOptions {
                timeout: Some(Duration::from_secs(2)),
                ..ConnectOptions::default()
            },
        )
        .unwrap_err();

        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(err.io_kind(), Some(ErrorKind::ConnectionRefused));
    }
}
