// ── XML document tree ──
//
// Media servers answer directory requests with a `MediaContainer` document
// whose information lives almost entirely in attributes. This module turns
// the body into a small owned element tree; interpretation of attributes
// happens in the core crate.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::Error;

/// Root element names accepted as a media container.
const CONTAINER_ROOTS: [&str; 2] = ["MediaContainer", "ASContainer"];

/// One parsed XML element: name, attributes in document order, children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style attribute setter, mostly for tests and fixtures.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Builder-style child append.
    #[must_use]
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    /// Value of the first attribute called `name`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements called `name`, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Whether this element is a media container root.
    pub fn is_container(&self) -> bool {
        CONTAINER_ROOTS.contains(&self.name.as_str())
    }
}

/// Parse a response body into its root element.
///
/// The root must be a `MediaContainer` (or `ASContainer`); any other root is
/// reported as [`Error::UnexpectedRoot`], malformed input as [`Error::Xml`].
pub fn parse_document(body: &[u8]) -> Result<XmlElement, Error> {
    let root = parse_tree(body)?;
    if !root.is_container() {
        return Err(Error::UnexpectedRoot { element: root.name });
    }
    Ok(root)
}

/// Parse any well-formed document into its root element.
pub fn parse_tree(body: &[u8]) -> Result<XmlElement, Error> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_error(e.to_string(), body))?;

        match event {
            Event::Start(start) => {
                let element = element_from(&reader, &start, body)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = element_from(&reader, &start, body)?;
                attach(&mut stack, &mut root, element, body)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| xml_error("unbalanced end tag".into(), body))?;
                attach(&mut stack, &mut root, element, body)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(xml_error("unexpected end of document".into(), body));
    }
    root.ok_or_else(|| xml_error("document has no root element".into(), body))
}

fn element_from(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    body: &[u8],
) -> Result<XmlElement, Error> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));

    for attr in start.attributes() {
        let attr = attr.map_err(|e| xml_error(e.to_string(), body))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| xml_error(e.to_string(), body))?
            .into_owned();
        element.attributes.push((key, value));
    }

    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
    body: &[u8],
) -> Result<(), Error> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(xml_error("multiple root elements".into(), body))
    }
}

fn xml_error(message: String, body: &[u8]) -> Error {
    Error::Xml {
        message,
        body: String::from_utf8_lossy(body).into_owned(),
    }
}
