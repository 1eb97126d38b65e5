/// Errors that can occur during XML fragment encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// Bytes between elements that do not form a well-formed element.
    ///
    /// The offending bytes have already been discarded; decoding can continue.
    #[error("malformed xml fragment ({reason}), skipped {skipped} bytes")]
    Malformed { reason: String, skipped: usize },

    /// A single element grew past the configured maximum before completing.
    #[error("element too large ({size} bytes buffered, max {max})")]
    ElementTooLarge { size: usize, max: usize },

    /// The decoder reached a state its own bookkeeping says is impossible.
    #[error("xml framing defect: {0}")]
    Framing(String),

    /// Error reported by the XML writer.
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// An I/O error occurred while reading or writing fragments.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed (EOF).
    #[error("connection closed")]
    ConnectionClosed,
}

impl XmlError {
    /// True for transport noise that was skipped; the stream is still usable.
    pub fn is_noise(&self) -> bool {
        matches!(self, XmlError::Malformed { .. })
    }

    pub(crate) fn malformed(reason: impl Into<String>, skipped: usize) -> Self {
        XmlError::Malformed {
            reason: reason.into(),
            skipped,
        }
    }
}

pub type Result<T> = std::result::Result<T, XmlError>;
