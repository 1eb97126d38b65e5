use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{ElementDecoder, FrameConfig};
use crate::element::Element;
use crate::error::{Result, XmlError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete XML elements from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete elements.
/// Noise between elements surfaces as [`XmlError::Malformed`] after it has
/// been discarded, so a caller that wants to keep going just calls again.
pub struct XmlReader<T> {
    inner: T,
    buf: BytesMut,
    decoder: ElementDecoder,
}

impl<T: Read> XmlReader<T> {
    /// Create a new reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            decoder: ElementDecoder::new(config),
        }
    }

    /// Read the next complete element (blocking).
    ///
    /// Returns `Err(XmlError::ConnectionClosed)` when EOF is reached.
    pub fn read_element(&mut self) -> Result<Element> {
        loop {
            if let Some(element) = self.decoder.decode(&mut self.buf)? {
                return Ok(element);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(XmlError::Io(err)),
            };

            if read == 0 {
                return Err(XmlError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
