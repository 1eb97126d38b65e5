//! Self-delimiting XML fragment framing.
//!
//! The wire carries UTF-8 XML elements back to back: no length prefix, no
//! enclosing root element, no delimiter other than XML's own element syntax.
//! Whitespace between elements is ignored and anything that is not a
//! well-formed element is skipped as noise rather than ending the stream.
//!
//! - [`ElementDecoder`] / [`encode_element`] work on `BytesMut` buffers
//! - [`XmlReader`] / [`XmlWriter`] wrap any blocking `Read` / `Write`
//! - [`XmlCodec`] plugs into `tokio_util::codec` (behind the `async` feature)

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod element;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::XmlCodec;
pub use codec::{
    decode_element, encode_element, encode_payload, ElementDecoder, FrameConfig,
    DEFAULT_MAX_ELEMENT_SIZE,
};
pub use element::{Element, Node, Payload};
pub use error::{Result, XmlError};
pub use reader::XmlReader;
pub use writer::XmlWriter;
