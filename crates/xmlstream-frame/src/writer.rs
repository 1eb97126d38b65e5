use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::encode_payload;
use crate::element::{Element, Payload};
use crate::error::{Result, XmlError};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Writes complete XML elements or raw text to any `Write` stream.
///
/// Every send writes the whole encoding and flushes before returning.
pub struct XmlWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> XmlWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Encode and send a payload (blocking).
    pub fn send(&mut self, payload: &Payload) -> Result<()> {
        self.buf.clear();
        encode_payload(payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(XmlError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(XmlError::Io(err)),
            }
        }

        self.flush()
    }

    pub fn send_element(&mut self, element: &Element) -> Result<()> {
        self.send(&Payload::Element(element.clone()))
    }

    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(&Payload::Text(text.to_string()))
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(XmlError::Io(err)),
            }
        }
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::{decode_element, DEFAULT_MAX_ELEMENT_SIZE};

    #[test]
    fn write_element_then_decode() {
        let mut writer = XmlWriter::new(Cursor::new(Vec::<u8>::new()));
        let element = Element::new("greeting").with_text("hi");

        writer.send_element(&element).unwrap();

        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        let decoded = decode_element(&mut wire, DEFAULT_MAX_ELEMENT_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, element);
    }

    #[test]
    fn consecutive_sends_do_not_share_buffered_bytes() {
        let mut writer = XmlWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send_text("hello").unwrap();
        writer.send_element(&Element::new("a")).unwrap();

        assert_eq!(writer.into_inner().into_inner(), b"hello<a/>");
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = XmlWriter::new(sink);

        writer.send_text("x").unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn short_writes_are_completed() {
        let sink = OneByteWriter::default();
        let mut writer = XmlWriter::new(sink);

        writer.send_element(&Element::new("slow")).unwrap();
        assert_eq!(writer.into_inner().written, b"<slow/>");
    }

    #[test]
    fn zero_length_write_is_connection_closed() {
        let mut writer = XmlWriter::new(ZeroWriter);
        let err = writer.send_text("lost").unwrap_err();
        assert!(matches!(err, XmlError::ConnectionClosed));
    }

    #[test]
    fn write_error_propagates() {
        let mut writer = XmlWriter::new(BrokenPipeWriter);
        let err = writer.send_text("lost").unwrap_err();
        assert!(matches!(err, XmlError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct OneByteWriter {
        written: Vec<u8>,
    }

    impl Write for OneByteWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipeWriter;

    impl Write for BrokenPipeWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
