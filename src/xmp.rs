//! XMP packet handling for custom namespaces.
//!
//! Only simple properties (attribute or text element form) of a single
//! namespace are read or replaced; everything else in an existing packet is
//! streamed through unchanged.

use std::collections::{BTreeMap, HashMap};
use std::sync::{OnceLock, PoisonError, RwLock};

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const ATTITUDE_PREFIX: &str = "Attitude";
pub const ATTITUDE_URI: &str = "Attitude/";

pub const ROLL: &str = "Roll";
pub const PITCH: &str = "Pitch";
pub const YAW: &str = "Yaw";

const RDF_URI: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

const EMPTY_PACKET: &str = concat!(
    "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n",
    "<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n",
    " <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n",
    " </rdf:RDF>\n",
    "</x:xmpmeta>\n",
    "<?xpacket end=\"w\"?>",
);

/// Simple properties of one namespace, keyed by local name.
pub type Properties = BTreeMap<String, String>;

// prefix -> uri, shared by every writer in the process
fn registry() -> &'static RwLock<HashMap<String, String>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

/// Bind `prefix` to `uri` for serialization. Registering the same pair again
/// is a no-op; rebinding a prefix or uri to something else is an error.
pub fn register_namespace(prefix: &str, uri: &str) -> Result<()> {
    let mut reg = registry().write().unwrap_or_else(PoisonError::into_inner);

    let conflict = reg
        .iter()
        .any(|(p, u)| (p == prefix && u != uri) || (u == uri && p != prefix));
    if conflict {
        return Err(Error::Namespace { prefix: prefix.to_owned(), uri: uri.to_owned() });
    }

    if reg.insert(prefix.to_owned(), uri.to_owned()).is_none() {
        debug!(prefix, uri, "registered xmp namespace");
    }
    Ok(())
}

pub fn register_attitude_namespace() -> Result<()> {
    register_namespace(ATTITUDE_PREFIX, ATTITUDE_URI)
}

pub fn prefix_for(uri: &str) -> Option<String> {
    let reg = registry().read().unwrap_or_else(PoisonError::into_inner);
    reg.iter().find(|(_, u)| *u == uri).map(|(p, _)| p.clone())
}

fn is_ns(ns: &ResolveResult, uri: &str) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(n)) if *n == uri.as_bytes())
}

fn text_error<E: std::fmt::Display>(e: E) -> Error {
    Error::malformed(format!("xmp text: {}", e))
}

/// Collect the simple properties of `uri` found anywhere in the packet.
pub fn read_properties(packet: &[u8], uri: &str) -> Result<Properties> {
    let mut reader = NsReader::from_reader(packet);
    let mut buf = vec![];
    let mut props = Properties::new();
    // open property element and the text gathered for it so far
    let mut current: Option<(String, String)> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                collect_attributes(&reader, &e, uri, &mut props)?;
                let (ns, local) = reader.resolve_element(e.name());
                if is_ns(&ns, uri) {
                    let name = String::from_utf8_lossy(local.as_ref()).into_owned();
                    current = Some((name, String::new()));
                }
            }
            Event::Empty(e) => collect_attributes(&reader, &e, uri, &mut props)?,
            Event::Text(t) => {
                if let Some((_, ref mut text)) = current {
                    text.push_str(&t.unescape().map_err(text_error)?);
                }
            }
            Event::CData(t) => {
                if let Some((_, ref mut text)) = current {
                    text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(e) => {
                let (ns, local) = reader.resolve_element(e.name());
                if is_ns(&ns, uri) {
                    if let Some((name, text)) = current.take() {
                        if name.as_bytes() == local.as_ref() {
                            props.insert(name, text.trim().to_owned());
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(props)
}

fn collect_attributes<R>(
    reader: &NsReader<R>,
    e: &BytesStart,
    uri: &str,
    props: &mut Properties,
) -> Result<()> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let (ns, local) = reader.resolve_attribute(attr.key);
        if is_ns(&ns, uri) {
            let value = attr.unescape_value().map_err(text_error)?;
            let name = String::from_utf8_lossy(local.as_ref()).into_owned();
            props.insert(name, value.trim().to_owned());
        }
    }
    Ok(())
}

/// Copy of `e` without the attributes bound to `uri`.
fn strip_attributes<R>(
    reader: &NsReader<R>,
    e: &BytesStart,
    uri: &str,
) -> Result<BytesStart<'static>> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let (ns, _) = reader.resolve_attribute(attr.key);
        if !is_ns(&ns, uri) {
            out.push_attribute(attr);
        }
    }
    Ok(out)
}

/// Replace every property of `uri` in `packet` with `props`. A missing
/// packet, or one without an `rdf:RDF` element, is replaced by a fresh one.
pub fn write_properties(packet: Option<&[u8]>, uri: &str, props: &Properties) -> Result<Vec<u8>> {
    let prefix = if props.is_empty() {
        None
    } else {
        let prefix = prefix_for(uri)
            .ok_or_else(|| Error::Namespace { prefix: String::new(), uri: uri.to_owned() })?;
        Some(prefix)
    };

    if let Some(packet) = packet {
        if let Some(out) = rewrite(packet, uri, prefix.as_deref(), props)? {
            return Ok(out);
        }
        warn!("xmp packet has no rdf:RDF element, replacing it");
    }

    rewrite(EMPTY_PACKET.as_bytes(), uri, prefix.as_deref(), props)?
        .ok_or_else(|| Error::malformed("empty xmp packet template"))
}

fn rewrite(
    packet: &[u8],
    uri: &str,
    prefix: Option<&str>,
    props: &Properties,
) -> Result<Option<Vec<u8>>> {
    let mut reader = NsReader::from_reader(packet);
    let mut writer = Writer::new(Vec::with_capacity(packet.len() + 256));
    let mut buf = vec![];
    // depth inside a dropped property element
    let mut skip = 0usize;
    let mut found_rdf = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;

        if skip > 0 {
            match event {
                Event::Start(_) => skip += 1,
                Event::End(_) => skip -= 1,
                Event::Eof => return Err(Error::malformed("unterminated xmp property")),
                _ => {}
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(e) => {
                let (ns, _) = reader.resolve_element(e.name());
                if is_ns(&ns, uri) {
                    skip = 1;
                } else {
                    writer.write_event(Event::Start(strip_attributes(&reader, &e, uri)?))?;
                }
            }
            Event::Empty(e) => {
                let (ns, _) = reader.resolve_element(e.name());
                if !is_ns(&ns, uri) {
                    writer.write_event(Event::Empty(strip_attributes(&reader, &e, uri)?))?;
                }
            }
            Event::End(e) => {
                let (ns, local) = reader.resolve_element(e.name());
                let closes_rdf = !found_rdf && is_ns(&ns, RDF_URI) && local.as_ref() == b"RDF";
                if closes_rdf {
                    found_rdf = true;
                    if let Some(prefix) = prefix {
                        writer.write_event(Event::Empty(description(prefix, uri, props)))?;
                    }
                }
                writer.write_event(Event::End(e))?;
            }
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    Ok(found_rdf.then(|| writer.into_inner()))
}

fn description(prefix: &str, uri: &str, props: &Properties) -> BytesStart<'static> {
    let mut desc = BytesStart::new("rdf:Description");
    desc.push_attribute(("rdf:about", ""));
    desc.push_attribute((format!("xmlns:{}", prefix).as_str(), uri));
    for (name, value) in props {
        desc.push_attribute((format!("{}:{}", prefix, name).as_str(), value.as_str()));
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    const FOREIGN: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/"
        xmlns:att="Attitude/" att:Roll="1.5">
      <dc:title><rdf:Alt><rdf:li xml:lang="x-default">Field survey</rdf:li></rdf:Alt></dc:title>
      <att:Yaw>12.25</att:Yaw>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    #[test]
    fn reads_attribute_and_element_forms() {
        let found = read_properties(FOREIGN.as_bytes(), ATTITUDE_URI).unwrap();
        assert_eq!(found, props(&[("Roll", "1.5"), ("Yaw", "12.25")]));
    }

    #[test]
    fn ignores_other_namespaces() {
        let found = read_properties(FOREIGN.as_bytes(), "http://example.com/none/").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn fresh_packet_round_trips() {
        register_attitude_namespace().unwrap();
        let wanted = props(&[("Pitch", "234.2"), ("Roll", "123.1")]);

        let packet = write_properties(None, ATTITUDE_URI, &wanted).unwrap();
        assert_eq!(read_properties(&packet, ATTITUDE_URI).unwrap(), wanted);
        assert!(std::str::from_utf8(&packet).unwrap().contains("Attitude:Roll=\"123.1\""));
    }

    #[test]
    fn rewrite_replaces_namespace_and_keeps_the_rest() {
        register_attitude_namespace().unwrap();
        let wanted = props(&[("Roll", "123.1")]);

        let packet = write_properties(Some(FOREIGN.as_bytes()), ATTITUDE_URI, &wanted).unwrap();
        let text = String::from_utf8(packet.clone()).unwrap();

        assert_eq!(read_properties(&packet, ATTITUDE_URI).unwrap(), wanted);
        assert!(text.contains("Field survey"));
        assert!(text.contains("<?xpacket end=\"w\"?>"));
        assert!(!text.contains("12.25"));
    }

    #[test]
    fn packet_without_rdf_is_replaced() {
        register_attitude_namespace().unwrap();
        let wanted = props(&[("Yaw", "103.23")]);

        let bare = br#"<x:xmpmeta xmlns:x="adobe:ns:meta/"/>"#;
        let packet = write_properties(Some(&bare[..]), ATTITUDE_URI, &wanted).unwrap();
        assert_eq!(read_properties(&packet, ATTITUDE_URI).unwrap(), wanted);
    }

    #[test]
    fn unregistered_namespace_cannot_be_written() {
        let unknown = "http://example.com/never-registered/";
        let res = write_properties(None, unknown, &props(&[("A", "1")]));
        assert!(matches!(res, Err(Error::Namespace { .. })));
    }

    #[test]
    fn registration_is_idempotent_and_exclusive() {
        register_namespace("geotagTest", "http://example.com/geotag-test/").unwrap();
        register_namespace("geotagTest", "http://example.com/geotag-test/").unwrap();
        assert_eq!(prefix_for("http://example.com/geotag-test/").as_deref(), Some("geotagTest"));

        assert!(matches!(
            register_namespace("geotagTest", "http://example.com/other/"),
            Err(Error::Namespace { .. })
        ));
        assert!(matches!(
            register_namespace("otherTest", "http://example.com/geotag-test/"),
            Err(Error::Namespace { .. })
        ));
    }

    #[test]
    fn malformed_packet_is_an_error() {
        assert!(read_properties(b"<a><b></a>", ATTITUDE_URI).is_err());
    }
}
