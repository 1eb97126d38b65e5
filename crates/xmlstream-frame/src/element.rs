use std::fmt;

use bytes::BytesMut;

use crate::codec::{decode_element, encode_element, DEFAULT_MAX_ELEMENT_SIZE};
use crate::error::{Result, XmlError};

/// One decoded XML element and its subtree.
///
/// Names are kept qualified as they appear on the wire (`prefix:local`);
/// namespace declarations are ordinary attributes. Adjacent text is merged and
/// whitespace-only text is not kept, so two trees compare equal when they
/// carry the same names, attributes, and meaningful text in the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

/// A child of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// What can be sent on the stream: a structured element or raw text.
///
/// Text is written verbatim, without escaping or wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Element(Element),
    Text(String),
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder: add an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Builder: append a child element.
    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    /// Builder: append text content.
    pub fn with_text(mut self, text: impl AsRef<str>) -> Self {
        self.push_text(text.as_ref());
        self
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Append text, merging with a preceding text node. Whitespace-only text is dropped.
    pub fn push_text(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Value of the first attribute called `name`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Direct child elements, skipping text.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// First direct child element called `name`.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|child| child.name == name)
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Parse exactly one element from `input`; surrounding whitespace is allowed.
    pub fn parse(input: &str) -> Result<Self> {
        let mut buf = BytesMut::from(input.as_bytes());
        let element = decode_element(&mut buf, DEFAULT_MAX_ELEMENT_SIZE)?
            .ok_or_else(|| XmlError::malformed("incomplete element", input.len()))?;

        if buf.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(XmlError::malformed(
                "trailing content after element",
                buf.len(),
            ));
        }
        Ok(element)
    }

    /// Serialize to a UTF-8 string.
    pub fn to_xml(&self) -> String {
        let mut buf = BytesMut::new();
        match encode_element(self, &mut buf) {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => String::new(),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

impl From<Element> for Payload {
    fn from(element: Element) -> Self {
        Payload::Element(element)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}
