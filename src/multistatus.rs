//! `207 Multi-Status` and other XML replies.
use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use http::StatusCode;
use xml::common::XmlVersion;
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xml::EmitterConfig;

use crate::backend::{DavLock, DavProp, PropName, PropPatch, PropValue};
use crate::errors::DavResult;
use crate::ls;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339, MemBuffer};
use crate::xmltree_ext::ElementExt;

pub(crate) const NS_DAV_URI: &str = "DAV:";
/// Microsoft datatypes namespace, used for the `dt` attribute on dates.
pub(crate) const NS_MS_DATATYPES: &str = "urn:uuid:c2f41010-65b3-11d1-a29f-00aa00c14882/";

/// `207 Multi-Status` etc.
pub(crate) fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

fn emitter() -> EventWriter<MemBuffer> {
    EventWriter::new_with_config(
        MemBuffer::new(),
        EmitterConfig {
            normalize_empty_elements: false,
            perform_indent: false,
            indent_string: Cow::Borrowed(""),
            ..Default::default()
        },
    )
}

// namespace URI -> prefix, for the properties in one <D:response>.
struct Prefixes {
    map: HashMap<String, String>,
    order: Vec<String>,
}

impl Prefixes {
    fn new<'a>(namespaces: impl Iterator<Item = &'a str>) -> Prefixes {
        let mut p = Prefixes {
            map: HashMap::new(),
            order: Vec::new(),
        };
        for ns in namespaces {
            if ns.is_empty() || ns == NS_DAV_URI || p.map.contains_key(ns) {
                continue;
            }
            let pfx = format!("ns{}", p.order.len() + 1);
            p.map.insert(ns.to_string(), pfx);
            p.order.push(ns.to_string());
        }
        p
    }

    fn qualify(&self, namespace: &str, name: &str) -> String {
        if namespace == NS_DAV_URI {
            return format!("D:{name}");
        }
        match self.map.get(namespace) {
            Some(pfx) => format!("{pfx}:{name}"),
            None => name.to_string(),
        }
    }
}

/// Writer for a `<D:multistatus>` document.
pub(crate) struct MultiStatus {
    emitter: EventWriter<MemBuffer>,
}

impl MultiStatus {
    pub(crate) fn new() -> DavResult<MultiStatus> {
        let mut emitter = emitter();
        emitter.write(XmlWEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })?;
        emitter.write(XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV_URI))?;
        Ok(MultiStatus { emitter })
    }

    // <D:response> with the namespace declarations, and the <D:href>.
    fn start_response(&mut self, href: &str, prefixes: &Prefixes) -> DavResult<()> {
        let mut start = XmlWEvent::start_element("D:response").ns("ns0", NS_MS_DATATYPES);
        for ns in &prefixes.order {
            start = start.ns(prefixes.map[ns].as_str(), ns.as_str());
        }
        self.emitter.write(start)?;
        self.text_elem("D:href", href)
    }

    fn text_elem(&mut self, name: &str, text: &str) -> DavResult<()> {
        self.emitter.write(XmlWEvent::start_element(name))?;
        self.emitter.write(XmlWEvent::characters(text))?;
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    fn empty_elem(&mut self, name: &str) -> DavResult<()> {
        self.emitter.write(XmlWEvent::start_element(name))?;
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    fn end(&mut self) -> DavResult<()> {
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    fn write_prop(&mut self, prop: &DavProp, prefixes: &Prefixes) -> DavResult<()> {
        let name = prefixes.qualify(&prop.namespace, &prop.name);
        let dav = prop.namespace == NS_DAV_URI;
        match &prop.value {
            PropValue::Time(t) if dav && prop.name == "creationdate" => {
                self.emitter.write(
                    XmlWEvent::start_element(name.as_str()).attr("ns0:dt", "dateTime.tz"),
                )?;
                self.emitter
                    .write(XmlWEvent::characters(&systemtime_to_rfc3339(*t)))?;
            }
            PropValue::Time(t) if dav && prop.name == "getlastmodified" => {
                self.emitter.write(
                    XmlWEvent::start_element(name.as_str()).attr("ns0:dt", "dateTime.rfc1123"),
                )?;
                self.emitter
                    .write(XmlWEvent::characters(&systemtime_to_httpdate(*t)))?;
            }
            PropValue::Time(t) => {
                self.emitter.write(XmlWEvent::start_element(name.as_str()))?;
                self.emitter
                    .write(XmlWEvent::characters(&systemtime_to_httpdate(*t)))?;
            }
            PropValue::Text(s) if dav && prop.name == "resourcetype" => {
                self.emitter.write(XmlWEvent::start_element(name.as_str()))?;
                if s == "collection" {
                    self.empty_elem("D:collection")?;
                }
            }
            PropValue::Text(s) => {
                self.emitter.write(XmlWEvent::start_element(name.as_str()))?;
                self.emitter.write(XmlWEvent::characters(s))?;
            }
            PropValue::Xml(elems) => {
                self.emitter.write(XmlWEvent::start_element(name.as_str()))?;
                for e in elems {
                    e.write_ev(&mut self.emitter)?;
                }
            }
            PropValue::Empty => {
                self.emitter.write(XmlWEvent::start_element(name.as_str()))?;
            }
        }
        self.end()
    }

    fn write_propstat_status(&mut self, status: StatusCode) -> DavResult<()> {
        self.end()?; // D:prop
        self.text_elem("D:status", &status_line(status))?;
        self.end() // D:propstat
    }

    /// One `<D:response>` of a PROPFIND. `found` go in a `200 OK` propstat,
    /// `missing` in a `404 Not Found` one.
    pub(crate) fn propfind_response(
        &mut self,
        href: &str,
        found: &[DavProp],
        missing: &[PropName],
        names_only: bool,
    ) -> DavResult<()> {
        let prefixes = Prefixes::new(
            found
                .iter()
                .map(|p| p.namespace.as_str())
                .chain(missing.iter().map(|p| p.namespace.as_str())),
        );
        self.start_response(href, &prefixes)?;

        if !found.is_empty() || missing.is_empty() {
            self.emitter.write(XmlWEvent::start_element("D:propstat"))?;
            self.emitter.write(XmlWEvent::start_element("D:prop"))?;
            for prop in found {
                if names_only {
                    self.empty_elem(&prefixes.qualify(&prop.namespace, &prop.name))?;
                } else {
                    self.write_prop(prop, &prefixes)?;
                }
            }
            self.write_propstat_status(StatusCode::OK)?;
        }

        if !missing.is_empty() {
            self.emitter.write(XmlWEvent::start_element("D:propstat"))?;
            self.emitter.write(XmlWEvent::start_element("D:prop"))?;
            for prop in missing {
                self.empty_elem(&prefixes.qualify(&prop.namespace, &prop.name))?;
            }
            self.write_propstat_status(StatusCode::NOT_FOUND)?;
        }

        self.end()
    }

    /// The `<D:response>` of a PROPPATCH, one propstat per property.
    pub(crate) fn proppatch_response(
        &mut self,
        href: &str,
        props: &[PropPatch],
        description: Option<&str>,
    ) -> DavResult<()> {
        let prefixes = Prefixes::new(props.iter().map(|p| p.namespace.as_str()));
        self.start_response(href, &prefixes)?;
        for prop in props {
            self.emitter.write(XmlWEvent::start_element("D:propstat"))?;
            self.emitter.write(XmlWEvent::start_element("D:prop"))?;
            self.empty_elem(&prefixes.qualify(&prop.namespace, &prop.name))?;
            self.write_propstat_status(prop.status)?;
        }
        if let Some(desc) = description {
            self.text_elem("D:responsedescription", desc)?;
        }
        self.end()
    }

    /// Close the document and return it.
    pub(crate) fn finish(mut self) -> DavResult<Bytes> {
        self.end()?;
        Ok(self.emitter.inner_mut().take())
    }
}

/// Body of a successful LOCK: `<D:prop><D:lockdiscovery>...`.
pub(crate) fn lock_response(lock: &DavLock) -> DavResult<Bytes> {
    let mut emitter = emitter();
    emitter.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    emitter.write(XmlWEvent::start_element("D:prop").ns("D", NS_DAV_URI))?;
    emitter.write(XmlWEvent::start_element("D:lockdiscovery"))?;
    ls::activelock(lock, ls::now_secs()).write_ev(&mut emitter)?;
    emitter.write(XmlWEvent::end_element())?;
    emitter.write(XmlWEvent::end_element())?;
    Ok(emitter.inner_mut().take())
}
