//! `tokio_util::codec` adapter for the fragment format.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::codec::{encode_element, encode_payload, ElementDecoder, FrameConfig};
use crate::element::{Element, Payload};
use crate::error::XmlError;

/// Codec for `FramedRead` / `FramedWrite`.
///
/// A stream error would end a `Framed` stream, so noise is skipped inside
/// the decoder instead of being returned.
#[derive(Debug, Clone, Default)]
pub struct XmlCodec {
    decoder: ElementDecoder,
}

impl XmlCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            decoder: ElementDecoder::new(config),
        }
    }
}

impl Decoder for XmlCodec {
    type Item = Element;
    type Error = XmlError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Element>, XmlError> {
        loop {
            match self.decoder.decode(src) {
                Err(err) if err.is_noise() => debug!(error = %err, "skipping stream noise"),
                other => return other,
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Element>, XmlError> {
        let element = self.decode(src)?;
        if element.is_none() && !src.is_empty() {
            debug!(bytes = src.len(), "discarding incomplete element at end of stream");
            src.clear();
            self.decoder.reset();
        }
        Ok(element)
    }
}

impl Encoder<Payload> for XmlCodec {
    type Error = XmlError;

    fn encode(&mut self, item: Payload, dst: &mut BytesMut) -> Result<(), XmlError> {
        encode_payload(&item, dst)
    }
}

impl Encoder<&Element> for XmlCodec {
    type Error = XmlError;

    fn encode(&mut self, item: &Element, dst: &mut BytesMut) -> Result<(), XmlError> {
        encode_element(item, dst)
    }
}
