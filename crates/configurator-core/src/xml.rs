//! Small owned XML element tree.
//!
//! Values documents, script output and synthesized report fragments all go
//! through this module. Parsing is done with `quick-xml`'s pull reader; every
//! parsed element remembers the byte span of its markup so callers can hand
//! out the original text verbatim instead of a re-serialization.

use std::ops::Range;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::XmlError;

/// A single XML element with its attributes, text and child elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<Element>,
    span: Option<Range<usize>>,
}

impl Element {
    /// Create an empty element named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
            span: None,
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Set the text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Append a child element.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Look up an attribute value by its exact (qualified) name.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Text content. `None` when the element carries no text at all.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// First child element named `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Byte range of this element's markup in the document it was parsed
    /// from. `None` for elements built in code.
    pub fn span(&self) -> Option<Range<usize>> {
        self.span.clone()
    }

    /// Serialize this element (and its subtree) into `writer`.
    pub fn write_to<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<(), XmlError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.text.is_none() && self.children.is_empty() {
            return writer.write_event(Event::Empty(start)).map_err(write_error);
        }

        writer.write_event(Event::Start(start)).map_err(write_error)?;
        if let Some(text) = &self.text {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_error)?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(write_error)
    }

    /// Serialize this element to a compact string.
    pub fn to_xml_string(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        self.write_to(&mut writer)?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }
}

/// A parsed document: the source text plus its root element.
#[derive(Debug, Clone)]
pub struct Document {
    source: String,
    root: Element,
}

impl Document {
    /// Parse a complete document. Exactly one root element is required;
    /// declarations, comments and processing instructions are skipped.
    pub fn parse(source: impl Into<String>) -> Result<Self, XmlError> {
        let source = source.into();
        let root = parse_root(&source)?;
        Ok(Self { source, root })
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Verbatim markup of an element that belongs to this document.
    pub fn markup(&self, element: &Element) -> Option<&str> {
        element.span.as_ref().and_then(|span| self.source.get(span.clone()))
    }

    /// Verbatim markup of the root element, without any prolog.
    pub fn root_markup(&self) -> &str {
        self.markup(&self.root).unwrap_or(&self.source)
    }
}

/// Turn an arbitrary string (e.g. a file name) into a usable element name.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, and a leading character
/// that cannot start a name gets an extra `_` in front.
pub fn element_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => name.insert(0, '_'),
    }
    name
}

fn write_error(err: impl std::fmt::Display) -> XmlError {
    XmlError::Write(err.to_string())
}

fn malformed(position: usize, message: impl Into<String>) -> XmlError {
    XmlError::Malformed {
        position,
        message: message.into(),
    }
}

fn parse_root(source: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(source);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|err| malformed(reader.buffer_position() as usize, err.to_string()))?;

        match event {
            Event::Start(tag) => {
                if root.is_some() && stack.is_empty() {
                    return Err(malformed(start, "more than one root element"));
                }
                stack.push(open_element(&tag, start)?);
            }
            Event::Empty(tag) => {
                let mut element = open_element(&tag, start)?;
                element.span = Some(start..reader.buffer_position() as usize);
                attach(&mut stack, &mut root, element, start)?;
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| malformed(start, "closing tag without matching opening tag"))?;
                if let Some(span) = element.span.as_mut() {
                    span.end = reader.buffer_position() as usize;
                }
                if !element.children.is_empty()
                    && element.text.as_deref().is_some_and(|t| t.trim().is_empty())
                {
                    element.text = None;
                }
                attach(&mut stack, &mut root, element, start)?;
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|err| malformed(start, err.to_string()))?;
                push_text(&mut stack, &value, start)?;
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                push_text(&mut stack, &value, start)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(
            source.len(),
            format!("unclosed element <{}>", open.name),
        ));
    }
    root.ok_or_else(|| malformed(source.len(), "no root element"))
}

fn open_element(tag: &BytesStart<'_>, start: usize) -> Result<Element, XmlError> {
    let mut element = Element::new(String::from_utf8_lossy(tag.name().as_ref()).into_owned());
    for attr in tag.attributes() {
        let attr = attr.map_err(|err| malformed(start, err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| malformed(start, err.to_string()))?
            .into_owned();
        element.attributes.push((key, value));
    }
    element.span = Some(start..start);
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
    position: usize,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(malformed(position, "more than one root element")),
    }
    Ok(())
}

fn push_text(stack: &mut [Element], value: &str, position: usize) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(element) => {
            element.text.get_or_insert_with(String::new).push_str(value);
            Ok(())
        }
        None if value.trim().is_empty() => Ok(()),
        None => Err(malformed(position, "text outside the root element")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_document() {
        let doc = Document::parse("<config><net><host>x</host><port>80</port></net></config>")
            .expect("parse");
        let root = doc.root();
        assert_eq!(root.name(), "config");
        let net = root.child("net").expect("net");
        assert_eq!(net.children().len(), 2);
        assert_eq!(net.child("host").and_then(Element::text), Some("x"));
        assert_eq!(net.child("port").and_then(Element::text), Some("80"));
        assert_eq!(net.text(), None);
    }

    #[test]
    fn test_markup_is_verbatim() {
        let source = "<?xml version=\"1.0\"?>\n<config>\n  <net list=\"true\"><host>x</host></net>\n</config>\n";
        let doc = Document::parse(source).expect("parse");
        let net = doc.root().child("net").expect("net");
        assert_eq!(
            doc.markup(net),
            Some("<net list=\"true\"><host>x</host></net>")
        );
        assert!(doc.root_markup().starts_with("<config>"));
        assert!(doc.root_markup().ends_with("</config>"));
    }

    #[test]
    fn test_empty_element_markup() {
        let doc = Document::parse("<ok/>").expect("parse");
        assert_eq!(doc.root_markup(), "<ok/>");
        assert_eq!(doc.root().text(), None);
    }

    #[test]
    fn test_entities_and_cdata_are_decoded() {
        let doc = Document::parse("<a b=\"1 &amp; 2\">x &lt; y<![CDATA[ & z]]></a>").expect("parse");
        assert_eq!(doc.root().attribute("b"), Some("1 & 2"));
        assert_eq!(doc.root().text(), Some("x < y & z"));
    }

    #[test]
    fn test_malformed_reports_position() {
        let err = Document::parse("<a><b></a>").unwrap_err();
        match err {
            XmlError::Malformed { position, .. } => assert!(position > 0),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_missing_root_and_trailing_roots() {
        assert!(Document::parse("").is_err());
        assert!(Document::parse("   \n").is_err());
        assert!(Document::parse("not xml at all").is_err());
        assert!(Document::parse("<a/><b/>").is_err());
        assert!(Document::parse("<a>").is_err());
    }

    #[test]
    fn test_serialize_escapes_text_and_attributes() {
        let element = Element::new("error")
            .with_attribute("kind", "a\"b")
            .with_child(Element::new("detail").with_text("<boom> & 1"))
            .with_child(Element::new("extensions"));
        let xml = element.to_xml_string().expect("serialize");
        assert_eq!(
            xml,
            "<error kind=\"a&quot;b\"><detail>&lt;boom&gt; &amp; 1</detail><extensions/></error>"
        );

        let reparsed = Document::parse(xml).expect("reparse");
        assert_eq!(
            reparsed.root().child("detail").and_then(Element::text),
            Some("<boom> & 1")
        );
    }

    #[test]
    fn test_element_name_sanitizing() {
        assert_eq!(element_name("b"), "b");
        assert_eq!(element_name("net-config.sh"), "net-config.sh");
        assert_eq!(element_name("10-network"), "_10-network");
        assert_eq!(element_name("a b:c"), "a_b_c");
        assert_eq!(element_name(""), "_");
    }
}
