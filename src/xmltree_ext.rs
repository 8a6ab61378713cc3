use std::borrow::Cow;
use std::io::{Cursor, Write};

use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xml::EmitterConfig;
use xmltree::{Element, XMLNode};

use crate::errors::{DavError, DavResult};
use crate::multistatus::NS_DAV_URI;

pub(crate) trait ElementExt {
    /// Builder. `D:name` is put in the `DAV:` namespace.
    fn new2(name: &str) -> Element;
    /// Builder, append text.
    fn text<T: Into<String>>(self, t: T) -> Element;
    /// Builder, append a child element.
    fn child(self, e: Element) -> Element;
    /// Child elements, skipping text, comments etc.
    fn child_elems(&self) -> Vec<&Element>;
    /// Is this `DAV:name`.
    fn is_dav(&self, name: &str) -> bool;
    /// Concatenated text, or the serialized child elements.
    fn inner_xml(&self) -> String;
    /// Write this element to an xml-rs event writer.
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()>;
}

impl ElementExt for Element {
    fn new2(name: &str) -> Element {
        let mut e = match name.split_once(':') {
            Some((pfx, n)) => {
                let mut e = Element::new(n);
                e.prefix = Some(pfx.to_string());
                if pfx == "D" {
                    e.namespace = Some(NS_DAV_URI.to_string());
                }
                e
            }
            None => Element::new(name),
        };
        e.namespaces = None;
        e
    }

    fn text<T: Into<String>>(mut self, t: T) -> Element {
        self.children.push(XMLNode::Text(t.into()));
        self
    }

    fn child(mut self, e: Element) -> Element {
        self.children.push(XMLNode::Element(e));
        self
    }

    fn child_elems(&self) -> Vec<&Element> {
        self.children.iter().filter_map(|n| n.as_element()).collect()
    }

    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(NS_DAV_URI)
    }

    fn inner_xml(&self) -> String {
        if self.child_elems().is_empty() {
            return self.get_text().map(|t| t.into_owned()).unwrap_or_default();
        }
        let mut emitter = EventWriter::new_with_config(
            Cursor::new(Vec::new()),
            EmitterConfig {
                write_document_declaration: false,
                normalize_empty_elements: false,
                perform_indent: false,
                indent_string: Cow::Borrowed(""),
                ..Default::default()
            },
        );
        for node in &self.children {
            let res = match node {
                XMLNode::Element(e) => e.write_ev(&mut emitter),
                XMLNode::Text(t) | XMLNode::CData(t) => emitter.write(XmlWEvent::characters(t)),
                _ => Ok(()),
            };
            if res.is_err() {
                break;
            }
        }
        String::from_utf8_lossy(&emitter.into_inner().into_inner()).into_owned()
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()> {
        let ns = self.namespace.as_deref().unwrap_or("");
        let name = if ns == NS_DAV_URI {
            format!("D:{}", self.name)
        } else {
            self.name.clone()
        };
        let mut start = XmlWEvent::start_element(name.as_str());
        if !ns.is_empty() && ns != NS_DAV_URI {
            start = start.default_ns(ns);
        }
        for (k, v) in &self.attributes {
            start = start.attr(k.as_str(), v.as_str());
        }
        emitter.write(start)?;
        for node in &self.children {
            match node {
                XMLNode::Element(e) => e.write_ev(emitter)?,
                XMLNode::Text(t) | XMLNode::CData(t) => emitter.write(XmlWEvent::characters(t))?,
                _ => {}
            }
        }
        emitter.write(XmlWEvent::end_element())
    }
}

/// Parse a request body and check that the root is `DAV:<root>`.
pub(crate) fn parse_dav_body(data: &[u8], root: &str) -> DavResult<Element> {
    let elem = Element::parse(Cursor::new(data))?;
    if !elem.is_dav(root) {
        debug!("xml: expected DAV:{root}, got {}", elem.name);
        return Err(DavError::XmlParseError);
    }
    Ok(elem)
}
