use bytes::{Buf, BytesMut};
use quick_xml::errors::{IllFormedError, SyntaxError};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::trace;

use crate::element::{Element, Node, Payload};
use crate::error::{Result, XmlError};

/// Default maximum size of one buffered element: 16 MiB.
pub const DEFAULT_MAX_ELEMENT_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for the fragment codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum bytes a single element may occupy while incomplete. Default: 16 MiB.
    pub max_element_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_element_size: DEFAULT_MAX_ELEMENT_SIZE,
        }
    }
}

/// Encode an element into the wire format.
pub fn encode_element(element: &Element, dst: &mut BytesMut) -> Result<()> {
    let mut writer = Writer::new(Vec::with_capacity(128));
    write_element(&mut writer, element)?;
    dst.extend_from_slice(&writer.into_inner());
    Ok(())
}

/// Encode a payload: elements are serialized, text is copied verbatim.
pub fn encode_payload(payload: &Payload, dst: &mut BytesMut) -> Result<()> {
    match payload {
        Payload::Element(element) => encode_element(element, dst),
        Payload::Text(text) => {
            dst.extend_from_slice(text.as_bytes());
            Ok(())
        }
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name());
    for (key, value) in element.attributes() {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children().is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in element.children() {
        match child {
            Node::Element(child) => write_element(writer, child)?,
            Node::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name())))?;
    Ok(())
}

/// Decode one element from the front of a buffer.
///
/// One-shot form of [`ElementDecoder::decode`]. It keeps nothing between
/// calls, so a partial element is rescanned from its start every time; a
/// stream should hold an [`ElementDecoder`] instead.
pub fn decode_element(src: &mut BytesMut, max_element_size: usize) -> Result<Option<Element>> {
    ElementDecoder::new(FrameConfig { max_element_size }).decode(src)
}

/// Incremental element decoder for one stream.
///
/// Remembers how far into a partially received element it has scanned, so
/// every buffered byte is examined once and the element is parsed once, when
/// its outermost tag closes. Each call must see the same buffer, with new
/// bytes only appended; call [`reset`](Self::reset) after clearing it.
#[derive(Debug, Clone, Default)]
pub struct ElementDecoder {
    config: FrameConfig,
    scan: Option<Scan>,
}

impl ElementDecoder {
    pub fn new(config: FrameConfig) -> Self {
        Self { config, scan: None }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Forget any partially scanned element.
    pub fn reset(&mut self) {
        self.scan = None;
    }

    /// Decode one element from the front of `src`.
    ///
    /// Returns `Ok(None)` if the buffer doesn't contain a complete element yet.
    /// On success, consumes the element bytes (and any whitespace or prolog
    /// markup before it) from the buffer.
    ///
    /// Non-element content is discarded and reported as [`XmlError::Malformed`];
    /// the buffer is left positioned after the discarded bytes, so the caller
    /// can simply call again.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Element>> {
        if self.scan.is_none() {
            if !seek_element(src)? {
                return self.need_more(src);
            }
            self.scan = Some(Scan::default());
        }

        let Some(end) = self.scan.as_mut().and_then(|scan| scan.advance(&src[..])) else {
            return self.need_more(src);
        };
        self.scan = None;

        match parse_element(&src[..end])? {
            Parsed::Complete(element, consumed) => {
                src.advance(consumed);
                Ok(Some(element))
            }
            // Drop only the opening '<' so a well-formed element nested or
            // following inside the bad span can still be found.
            Parsed::Incomplete => {
                src.advance(1);
                Err(XmlError::malformed("element closed before all its children", 1))
            }
            Parsed::Malformed(reason) => {
                src.advance(1);
                Err(XmlError::malformed(reason, 1))
            }
        }
    }

    fn need_more(&mut self, src: &mut BytesMut) -> Result<Option<Element>> {
        let max = self.config.max_element_size;
        if src.len() > max {
            let size = src.len();
            src.clear();
            self.scan = None;
            return Err(XmlError::ElementTooLarge { size, max });
        }
        Ok(None)
    }
}

/// Discard whitespace and prolog markup up to the next element start.
///
/// Returns `Ok(true)` with `src[0]` at an element's `<`, or `Ok(false)` when
/// more bytes are needed to decide.
fn seek_element(src: &mut BytesMut) -> Result<bool> {
    loop {
        let Some(start) = src.iter().position(|b| !b.is_ascii_whitespace()) else {
            src.clear();
            return Ok(false);
        };
        src.advance(start);

        if src[0] != b'<' {
            let end = src.iter().position(|&b| b == b'<').unwrap_or(src.len());
            src.advance(end);
            return Err(XmlError::malformed("text outside of an element", end));
        }

        match classify(src) {
            Markup::NeedMore => return Ok(false),
            Markup::Skip(len) => {
                trace!(len, "skipping prolog markup between elements");
                src.advance(len);
            }
            Markup::Noise(len, reason) => {
                src.advance(len);
                return Err(XmlError::malformed(reason, len));
            }
            Markup::Element => return Ok(true),
        }
    }
}

/// Resume point of the structural scan over a partially received element.
///
/// Offsets are relative to the element's opening `<`.
#[derive(Debug, Clone, Default)]
struct Scan {
    /// First byte not yet examined.
    pos: usize,
    lex: Lex,
    /// Name offsets of the tags currently open.
    open: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Lex {
    #[default]
    Content,
    /// Just past a `<`.
    Open,
    StartTag {
        name: usize,
        quote: Option<u8>,
        slash: bool,
    },
    EndTag {
        name: usize,
    },
    /// Comment, CDATA section, processing instruction or declaration.
    Until(&'static [u8]),
}

impl Scan {
    /// Examine bytes appended since the last call. Returns the element's
    /// length once its outermost tag closes, or early at a mismatched end tag
    /// so the parser can report it.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        while self.pos < buf.len() {
            match self.lex {
                Lex::Content => {
                    let Some(lt) = buf[self.pos..].iter().position(|&b| b == b'<') else {
                        self.pos = buf.len();
                        return None;
                    };
                    self.pos += lt + 1;
                    self.lex = Lex::Open;
                }
                Lex::Open => {
                    const COMMENT: &[u8] = b"!--";
                    const CDATA: &[u8] = b"![CDATA[";

                    let rest = &buf[self.pos..];
                    self.lex = match rest[0] {
                        b'/' => {
                            self.pos += 1;
                            Lex::EndTag { name: self.pos }
                        }
                        b'?' => {
                            self.pos += 1;
                            Lex::Until(b"?>")
                        }
                        b'!' if rest.starts_with(COMMENT) => {
                            self.pos += COMMENT.len();
                            Lex::Until(b"-->")
                        }
                        b'!' if rest.starts_with(CDATA) => {
                            self.pos += CDATA.len();
                            Lex::Until(b"]]>")
                        }
                        b'!' if COMMENT.starts_with(rest) || CDATA.starts_with(rest) => {
                            return None;
                        }
                        b'!' => {
                            self.pos += 1;
                            Lex::Until(b">")
                        }
                        _ => Lex::StartTag {
                            name: self.pos,
                            quote: None,
                            slash: false,
                        },
                    };
                }
                Lex::StartTag {
                    name,
                    mut quote,
                    mut slash,
                } => {
                    let mut closed = None;
                    for (i, &b) in buf[self.pos..].iter().enumerate() {
                        match quote {
                            Some(q) if b == q => quote = None,
                            Some(_) => {}
                            None => match b {
                                b'"' | b'\'' => {
                                    quote = Some(b);
                                    slash = false;
                                }
                                b'>' => {
                                    closed = Some(i);
                                    break;
                                }
                                _ => slash = b == b'/',
                            },
                        }
                    }

                    let Some(i) = closed else {
                        self.pos = buf.len();
                        self.lex = Lex::StartTag { name, quote, slash };
                        return None;
                    };
                    self.pos += i + 1;
                    self.lex = Lex::Content;
                    if !slash {
                        self.open.push(name);
                    } else if self.open.is_empty() {
                        return Some(self.pos);
                    }
                }
                Lex::EndTag { name } => {
                    let Some(gt) = buf[self.pos..].iter().position(|&b| b == b'>') else {
                        self.pos = buf.len();
                        return None;
                    };
                    self.pos += gt + 1;
                    self.lex = Lex::Content;

                    let matched = self
                        .open
                        .pop()
                        .is_some_and(|open| tag_name(&buf[open..]) == tag_name(&buf[name..]));
                    if !matched || self.open.is_empty() {
                        return Some(self.pos);
                    }
                }
                Lex::Until(terminator) => match find(buf, terminator, self.pos) {
                    Some(at) => {
                        self.pos = at + terminator.len();
                        self.lex = Lex::Content;
                    }
                    None => {
                        // Keep a possibly split terminator in view.
                        let tail = buf.len().saturating_sub(terminator.len() - 1);
                        self.pos = self.pos.max(tail);
                        return None;
                    }
                },
            }
        }
        None
    }
}

fn tag_name(tag: &[u8]) -> &[u8] {
    let end = tag
        .iter()
        .position(|&b| b.is_ascii_whitespace() || b == b'/' || b == b'>')
        .unwrap_or(tag.len());
    &tag[..end]
}

/// What sits at a `<` between elements.
enum Markup {
    NeedMore,
    /// XML declaration, processing instruction, comment or DOCTYPE.
    Skip(usize),
    Noise(usize, &'static str),
    Element,
}

fn classify(buf: &[u8]) -> Markup {
    debug_assert_eq!(buf.first(), Some(&b'<'));
    let Some(&next) = buf.get(1) else {
        return Markup::NeedMore;
    };

    match next {
        b'?' => match find(buf, b"?>", 2) {
            Some(end) => Markup::Skip(end + 2),
            None => Markup::NeedMore,
        },
        b'!' => classify_bang(buf),
        b'/' => match find(buf, b">", 2) {
            Some(end) => Markup::Noise(end + 1, "end tag without a matching start tag"),
            None => Markup::NeedMore,
        },
        b if is_name_start(b) => Markup::Element,
        _ => Markup::Noise(1, "'<' not followed by an element name"),
    }
}

fn classify_bang(buf: &[u8]) -> Markup {
    const COMMENT: &[u8] = b"<!--";
    const CDATA: &[u8] = b"<![CDATA[";
    const DOCTYPE: &[u8] = b"<!DOCTYPE";

    if buf.starts_with(COMMENT) {
        return match find(buf, b"-->", COMMENT.len()) {
            Some(end) => Markup::Skip(end + 3),
            None => Markup::NeedMore,
        };
    }
    if buf.starts_with(CDATA) {
        return match find(buf, b"]]>", CDATA.len()) {
            Some(end) => Markup::Noise(end + 3, "character data outside of an element"),
            None => Markup::NeedMore,
        };
    }
    if COMMENT.starts_with(buf) || CDATA.starts_with(buf) || DOCTYPE.starts_with(buf) {
        return Markup::NeedMore;
    }
    if !buf.starts_with(DOCTYPE) {
        return Markup::Noise(1, "unknown markup declaration");
    }

    // DOCTYPE, possibly with an internal subset in brackets.
    let close = match (find(buf, b"[", 2), find(buf, b">", 2)) {
        (Some(open), Some(gt)) if open < gt => find(buf, b"]>", open).map(|end| end + 1),
        (_, gt) => gt,
    };
    match close {
        Some(end) => Markup::Skip(end + 1),
        None => Markup::NeedMore,
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b':' || b >= 0x80
}

enum Parsed {
    Complete(Element, usize),
    Incomplete,
    Malformed(String),
}

/// Parse one element starting at `buf[0]`.
fn parse_element(buf: &[u8]) -> Result<Parsed> {
    let mut reader = Reader::from_reader(buf);
    {
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = true;
        config.expand_empty_elements = false;
    }

    let mut stack: Vec<Element> = Vec::new();
    // Text may be cut mid-entity or mid-character at the end of the buffer, so
    // a text error only counts once the element is known to be complete.
    let mut text_error: Option<String> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(err) => return Ok(classify_error(err)),
        };

        match event {
            Event::Start(start) => match element_from_start(&start) {
                Ok(element) => stack.push(element),
                Err(reason) => return Ok(Parsed::Malformed(reason)),
            },
            Event::Empty(start) => {
                let element = match element_from_start(&start) {
                    Ok(element) => element,
                    Err(reason) => return Ok(Parsed::Malformed(reason)),
                };
                match stack.last_mut() {
                    Some(parent) => parent.push_child(element),
                    None => return complete(element, reader.buffer_position(), text_error),
                }
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    XmlError::Framing("end tag with no open element on the stack".to_string())
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.push_child(element),
                    None => return complete(element, reader.buffer_position(), text_error),
                }
            }
            Event::Text(text) => {
                let Some(parent) = stack.last_mut() else {
                    return Err(XmlError::Framing("text before the first start tag".to_string()));
                };
                let unescaped = std::str::from_utf8(&text)
                    .map_err(|_| "text is not valid UTF-8".to_string())
                    .and_then(|raw| {
                        quick_xml::escape::unescape(raw)
                            .map_err(|err| format!("bad entity in text: {err}"))
                    });
                match unescaped {
                    Ok(unescaped) => parent.push_text(&unescaped),
                    Err(reason) => {
                        text_error.get_or_insert(reason);
                    }
                }
            }
            Event::CData(cdata) => {
                let Some(parent) = stack.last_mut() else {
                    return Err(XmlError::Framing("cdata before the first start tag".to_string()));
                };
                match std::str::from_utf8(&cdata) {
                    Ok(text) => parent.push_text(text),
                    Err(_) => {
                        text_error.get_or_insert_with(|| "cdata is not valid UTF-8".to_string());
                    }
                }
            }
            Event::Eof => return Ok(Parsed::Incomplete),
            Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_) => {}
        }
    }
}

fn complete<P>(element: Element, end: P, text_error: Option<String>) -> Result<Parsed>
where
    usize: TryFrom<P>,
{
    if let Some(reason) = text_error {
        return Ok(Parsed::Malformed(reason));
    }
    let end = usize::try_from(end)
        .map_err(|_| XmlError::Framing("element end offset overflows usize".to_string()))?;
    Ok(Parsed::Complete(element, end))
}

fn classify_error(err: quick_xml::Error) -> Parsed {
    match err {
        // The slice ended inside some markup: wait for more bytes.
        quick_xml::Error::Syntax(
            SyntaxError::UnclosedTag
            | SyntaxError::UnclosedComment
            | SyntaxError::UnclosedCData
            | SyntaxError::UnclosedPIOrXmlDecl
            | SyntaxError::UnclosedDoctype,
        )
        | quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(_)) => Parsed::Incomplete,
        other => Parsed::Malformed(other.to_string()),
    }
}

fn element_from_start(start: &BytesStart<'_>) -> std::result::Result<Element, String> {
    let qname = start.name();
    let name = std::str::from_utf8(qname.as_ref())
        .map_err(|_| "element name is not valid UTF-8".to_string())?;
    let mut element = Element::new(name);

    for attr in start.attributes() {
        let attr = attr.map_err(|err| format!("bad attribute: {err}"))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|_| "attribute name is not valid UTF-8".to_string())?;
        let value = attr
            .unescape_value()
            .map_err(|err| format!("bad attribute value: {err}"))?;
        element = element.with_attr(key, value.into_owned());
    }
    Ok(element)
}
