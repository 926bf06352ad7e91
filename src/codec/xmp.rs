//! XMP packets: property extraction with quick-xml and packet rebuilding.

use img_parts::Bytes;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, ErrorCode, Result};

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

/// Prefixes usable in keys even when a packet does not declare them.
const KNOWN_NAMESPACES: &[(&str, &str)] = &[
    ("dc", "http://purl.org/dc/elements/1.1/"),
    ("xmp", "http://ns.adobe.com/xap/1.0/"),
    ("xmpRights", "http://ns.adobe.com/xap/1.0/rights/"),
    ("xmpMM", "http://ns.adobe.com/xap/1.0/mm/"),
    ("xmpBJ", "http://ns.adobe.com/xap/1.0/bj/"),
    ("xmpTPg", "http://ns.adobe.com/xap/1.0/t/pg/"),
    ("xmpDM", "http://ns.adobe.com/xmp/1.0/DynamicMedia/"),
    ("xmpidq", "http://ns.adobe.com/xmp/Identifier/qual/1.0/"),
    ("pdf", "http://ns.adobe.com/pdf/1.3/"),
    ("photoshop", "http://ns.adobe.com/photoshop/1.0/"),
    ("crs", "http://ns.adobe.com/camera-raw-settings/1.0/"),
    ("tiff", "http://ns.adobe.com/tiff/1.0/"),
    ("exif", "http://ns.adobe.com/exif/1.0/"),
    ("exifEX", "http://cipa.jp/exif/1.0/"),
    ("aux", "http://ns.adobe.com/exif/1.0/aux/"),
    ("lr", "http://ns.adobe.com/lightroom/1.0/"),
    ("stEvt", "http://ns.adobe.com/xap/1.0/sType/ResourceEvent#"),
    ("stRef", "http://ns.adobe.com/xap/1.0/sType/ResourceRef#"),
    ("Iptc4xmpCore", "http://iptc.org/std/Iptc4xmpCore/1.0/xmlns/"),
    ("Iptc4xmpExt", "http://iptc.org/std/Iptc4xmpExt/2008-02-29/"),
    ("plus", "http://ns.useplus.org/ldf/xmp/1.0/"),
];

/// A parsed `Xmp.<prefix>.<property>` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct XmpKey {
    prefix: String,
    name: String,
}

impl XmpKey {
    /// Parse a key; `declared` are the namespaces of the current packet.
    pub(crate) fn parse(key: &str, declared: &[(String, String)]) -> Result<Self> {
        let mut parts = key.splitn(3, '.');
        let (Some("Xmp"), Some(prefix), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::invalid_key(key));
        };
        if prefix.is_empty() || name.is_empty() {
            return Err(Error::invalid_key(key));
        }

        let known = KNOWN_NAMESPACES.iter().any(|(p, _)| *p == prefix)
            || declared.iter().any(|(p, _)| p == prefix);
        if !known {
            return Err(Error::codec(
                ErrorCode::NoNamespaceInfoForXmpPrefix,
                format!("No namespace info available for XMP prefix `{prefix}'"),
            ));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            name: name.to_string(),
        })
    }

    pub(crate) fn render(&self) -> String {
        format!("Xmp.{}.{}", self.prefix, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum XmpValue {
    Text(String),
    Bag(Vec<String>),
    Seq(Vec<String>),
    /// Language alternatives as `(lang, text)`.
    Alt(Vec<(Option<String>, String)>),
    Struct,
}

impl XmpValue {
    pub(crate) fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Bag(items) => items.join(", "),
            Self::Seq(items) => items.first().cloned().unwrap_or_default(),
            Self::Alt(items) => items
                .iter()
                .find(|(lang, _)| lang.as_deref() == Some("x-default"))
                .or_else(|| items.first())
                .map(|(_, text)| text.clone())
                .unwrap_or_default(),
            Self::Struct => "type=\"Struct\"".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Xmpdatum {
    pub(crate) key: XmpKey,
    pub(crate) value: XmpValue,
    /// Serialized property element, re-emitted verbatim on write.
    xml: String,
}

/// Properties of an XMP packet, in document order.
#[derive(Debug, Clone, Default)]
pub(crate) struct XmpMetadata {
    pub(crate) namespaces: Vec<(String, String)>,
    pub(crate) entries: Vec<Xmpdatum>,
    /// Packet as last read or written.
    pub(crate) raw: Option<Bytes>,
    pub(crate) dirty: bool,
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn split_name(qname: &str) -> Option<(&str, &str)> {
    qname.split_once(':')
}

fn attr_value(e: &BytesStart<'_>, qname: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == qname)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl XmpMetadata {
    /// Parse a packet. Malformed XML yields an empty property list; the
    /// packet itself is kept so an untouched store writes it back as is.
    pub(crate) fn decode(packet: &Bytes) -> Self {
        let mut xmp = Self {
            raw: Some(packet.clone()),
            ..Self::default()
        };
        let text = String::from_utf8_lossy(packet);
        if let Err(e) = xmp.parse(&text) {
            log::warn!("Failed to decode XMP metadata: {e}");
            xmp.namespaces.clear();
            xmp.entries.clear();
        }
        log::debug!("Decoded {} XMP properties", xmp.entries.len());
        xmp
    }

    fn declare(&mut self, e: &BytesStart<'_>) {
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let Some(prefix) = key.strip_prefix("xmlns:") else {
                continue;
            };
            if let Ok(uri) = attr.unescape_value() {
                if !self.namespaces.iter().any(|(p, _)| p == prefix) {
                    self.namespaces.push((prefix.to_string(), uri.into_owned()));
                }
            }
        }
    }

    /// Simple properties written as attributes of `rdf:Description`.
    fn attribute_properties(&mut self, e: &BytesStart<'_>) {
        for attr in e.attributes().flatten() {
            let qname = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let Some((prefix, name)) = split_name(&qname) else {
                continue;
            };
            if matches!(prefix, "xmlns" | "rdf" | "xml") {
                continue;
            }
            let Ok(value) = attr.unescape_value() else {
                continue;
            };
            let xml = format!("<{qname}>{}</{qname}>", xml_escape(&value));
            self.entries.push(Xmpdatum {
                key: XmpKey {
                    prefix: prefix.to_string(),
                    name: name.to_string(),
                },
                value: XmpValue::Text(value.into_owned()),
                xml,
            });
        }
    }

    fn parse(&mut self, text: &str) -> std::result::Result<(), quick_xml::Error> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);
        let mut in_description = false;

        loop {
            match reader.read_event()? {
                Event::Start(e) if e.local_name().as_ref() == b"Description" && !in_description => {
                    self.declare(&e);
                    self.attribute_properties(&e);
                    in_description = true;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"Description" && !in_description => {
                    self.declare(&e);
                    self.attribute_properties(&e);
                }
                Event::End(e) if e.local_name().as_ref() == b"Description" => {
                    in_description = false;
                }
                Event::Start(e) if in_description => {
                    let end = reader.buffer_position() as usize;
                    let start = text[..end].rfind('<').unwrap_or(0);
                    let inner = reader.read_to_end(e.name())?;
                    let close = reader.buffer_position() as usize;
                    let value = property_value(&e, &text[inner.start as usize..inner.end as usize]);
                    self.push_property(&e, value, &text[start..close]);
                }
                Event::Empty(e) if in_description => {
                    let end = reader.buffer_position() as usize;
                    let start = text[..end].rfind('<').unwrap_or(0);
                    let value = match attr_value(&e, b"rdf:resource") {
                        Some(uri) => XmpValue::Text(uri),
                        None if attr_value(&e, b"rdf:parseType").as_deref() == Some("Resource") => {
                            XmpValue::Struct
                        }
                        None => XmpValue::Text(String::new()),
                    };
                    self.push_property(&e, value, &text[start..end]);
                }
                Event::Start(e) | Event::Empty(e) => self.declare(&e),
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(())
    }

    fn push_property(&mut self, e: &BytesStart<'_>, value: XmpValue, xml: &str) {
        let qname = qualified_name(e);
        let Some((prefix, name)) = split_name(&qname) else {
            log::warn!("Ignoring unqualified XMP property `{qname}'");
            return;
        };
        self.entries.push(Xmpdatum {
            key: XmpKey {
                prefix: prefix.to_string(),
                name: name.to_string(),
            },
            value,
            xml: xml.to_string(),
        });
    }

    pub(crate) fn parse_key(&self, key: &str) -> Result<XmpKey> {
        XmpKey::parse(key, &self.namespaces)
    }

    pub(crate) fn position(&self, key: &XmpKey, occurrence: usize) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, d)| d.key == *key)
            .nth(occurrence)
            .map(|(i, _)| i)
    }

    /// Remove every property with `key`. Returns whether anything was removed.
    pub(crate) fn strip(&mut self, key: &str) -> Result<bool> {
        let key = self.parse_key(key)?;
        let before = self.entries.len();
        self.entries.retain(|d| d.key != key);
        let removed = self.entries.len() != before;
        self.dirty |= removed;
        Ok(removed)
    }

    /// Serialize as a complete packet. `None` when there are no properties.
    pub(crate) fn encode(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }

        let mut xmp = String::new();
        xmp.push_str("<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n");
        xmp.push_str("<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
        xmp.push_str(&format!("<rdf:RDF xmlns:rdf=\"{RDF_NS}\">\n"));
        xmp.push_str("<rdf:Description rdf:about=\"\"");
        for (prefix, uri) in self.used_namespaces() {
            xmp.push_str(&format!("\n  xmlns:{prefix}=\"{}\"", xml_escape(&uri)));
        }
        xmp.push_str(">\n");
        for datum in &self.entries {
            xmp.push_str("  ");
            xmp.push_str(&datum.xml);
            xmp.push('\n');
        }
        xmp.push_str("</rdf:Description>\n");
        xmp.push_str("</rdf:RDF>\n");
        xmp.push_str("</x:xmpmeta>\n");
        xmp.push_str("<?xpacket end=\"w\"?>");
        Some(xmp)
    }

    /// Declared namespaces plus known ones for prefixes used by properties.
    fn used_namespaces(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .namespaces
            .iter()
            .filter(|(prefix, _)| !matches!(prefix.as_str(), "x" | "rdf" | "xml"))
            .cloned()
            .collect();
        for datum in &self.entries {
            let prefix = &datum.key.prefix;
            if out.iter().any(|(p, _)| p == prefix) {
                continue;
            }
            if let Some((p, uri)) = KNOWN_NAMESPACES.iter().find(|(p, _)| p == prefix) {
                out.push(((*p).to_string(), (*uri).to_string()));
            }
        }
        out
    }
}

/// Classify the content of a property element.
fn property_value(element: &BytesStart<'_>, inner: &str) -> XmpValue {
    if attr_value(element, b"rdf:parseType").as_deref() == Some("Resource") {
        return XmpValue::Struct;
    }

    let mut reader = Reader::from_str(inner);
    reader.config_mut().trim_text(true);

    let mut container: Option<Container> = None;
    let mut items: Vec<(Option<String>, String)> = Vec::new();
    let mut lang: Option<String> = None;
    let mut text = String::new();
    let mut in_item = false;
    let mut depth = 0usize;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Malformed XMP property value: {e}");
                break;
            }
        };
        match event {
            Event::Start(e) => {
                depth += 1;
                let local = e.local_name();
                let kind = match local.as_ref() {
                    b"Bag" => Some(Container::Bag),
                    b"Seq" => Some(Container::Seq),
                    b"Alt" => Some(Container::Alt),
                    _ => None,
                };
                if depth == 1 && kind.is_some() {
                    container = kind;
                } else if depth == 2 && local.as_ref() == b"li" && container.is_some() {
                    in_item = true;
                    lang = attr_value(&e, b"xml:lang");
                    text.clear();
                } else if depth == 1 || in_item {
                    return XmpValue::Struct;
                }
            }
            Event::Empty(e) => match (depth, e.local_name().as_ref()) {
                (0, b"Bag") => return XmpValue::Bag(Vec::new()),
                (0, b"Seq") => return XmpValue::Seq(Vec::new()),
                (0, b"Alt") => return XmpValue::Alt(Vec::new()),
                (1, b"li") if container.is_some() => {
                    items.push((attr_value(&e, b"xml:lang"), String::new()));
                }
                _ => return XmpValue::Struct,
            },
            Event::Text(e) => match e.unescape() {
                Ok(value) => text.push_str(&value),
                Err(e) => log::warn!("Undecodable XMP text: {e}"),
            },
            Event::CData(e) => match e.decode() {
                Ok(value) => text.push_str(&value),
                Err(e) => log::warn!("Undecodable XMP CDATA: {e}"),
            },
            Event::End(_) => {
                if in_item && depth == 2 {
                    items.push((lang.take(), std::mem::take(&mut text)));
                    in_item = false;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match container {
        Some(Container::Bag) => XmpValue::Bag(items.into_iter().map(|(_, t)| t).collect()),
        Some(Container::Seq) => XmpValue::Seq(items.into_iter().map(|(_, t)| t).collect()),
        Some(Container::Alt) => XmpValue::Alt(items),
        None => XmpValue::Text(text),
    }
}

#[derive(Clone, Copy)]
enum Container {
    Bag,
    Seq,
    Alt,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKET: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:xmp="http://ns.adobe.com/xap/1.0/"
    xmlns:xmpMM="http://ns.adobe.com/xap/1.0/mm/"
    xmlns:stEvt="http://ns.adobe.com/xap/1.0/sType/ResourceEvent#"
    xmp:Rating="5">
   <dc:title><rdf:Alt><rdf:li xml:lang="en">Hello</rdf:li><rdf:li xml:lang="x-default">Hi &amp; bye</rdf:li></rdf:Alt></dc:title>
   <dc:subject><rdf:Bag><rdf:li>one</rdf:li><rdf:li>two</rdf:li></rdf:Bag></dc:subject>
   <dc:creator><rdf:Seq><rdf:li>Ann</rdf:li><rdf:li>Bob</rdf:li></rdf:Seq></dc:creator>
   <xmpMM:DerivedFrom rdf:parseType="Resource"><stEvt:action>saved</stEvt:action></xmpMM:DerivedFrom>
   <xmp:CreatorTool>Tool</xmp:CreatorTool>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    fn rendered(xmp: &XmpMetadata) -> Vec<(String, String)> {
        xmp.entries
            .iter()
            .map(|d| (d.key.render(), d.value.render()))
            .collect()
    }

    #[test]
    fn decodes_property_shapes() {
        let xmp = XmpMetadata::decode(&Bytes::from_static(PACKET.as_bytes()));
        assert_eq!(
            rendered(&xmp),
            vec![
                ("Xmp.xmp.Rating".to_string(), "5".to_string()),
                ("Xmp.dc.title".to_string(), "Hi & bye".to_string()),
                ("Xmp.dc.subject".to_string(), "one, two".to_string()),
                ("Xmp.dc.creator".to_string(), "Ann".to_string()),
                ("Xmp.xmpMM.DerivedFrom".to_string(), "type=\"Struct\"".to_string()),
                ("Xmp.xmp.CreatorTool".to_string(), "Tool".to_string()),
            ]
        );
    }

    #[test]
    fn entities_resolve_in_text_and_attributes() {
        let packet = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:xmp="http://ns.adobe.com/xap/1.0/" xmp:Label="R&amp;D &quot;blue&quot;">
   <dc:source>Caf&#xE9; &lt;north&gt; &#38; pier</dc:source>
   <dc:rights><![CDATA[a < b]]></dc:rights>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>"#;
        let xmp = XmpMetadata::decode(&Bytes::from_static(packet.as_bytes()));
        assert_eq!(
            rendered(&xmp),
            vec![
                ("Xmp.xmp.Label".to_string(), "R&D \"blue\"".to_string()),
                ("Xmp.dc.source".to_string(), "Caf\u{e9} <north> & pier".to_string()),
                ("Xmp.dc.rights".to_string(), "a < b".to_string()),
            ]
        );

        let again = XmpMetadata::decode(&Bytes::from(xmp.encode().unwrap().into_bytes()));
        assert_eq!(rendered(&again), rendered(&xmp));
    }

    #[test]
    fn encoded_packet_decodes_to_same_properties() {
        let xmp = XmpMetadata::decode(&Bytes::from_static(PACKET.as_bytes()));
        let packet = xmp.encode().unwrap();
        let again = XmpMetadata::decode(&Bytes::from(packet.into_bytes()));
        assert_eq!(rendered(&again), rendered(&xmp));
    }

    #[test]
    fn key_errors_carry_codes() {
        let xmp = XmpMetadata::default();
        assert_eq!(xmp.parse_key("Exif.dc.title").unwrap_err().code(), 6);
        assert_eq!(xmp.parse_key("Xmp.dc").unwrap_err().code(), 6);
        assert_eq!(xmp.parse_key("Xmp.nosuch.title").unwrap_err().code(), 35);
        assert!(xmp.parse_key("Xmp.dc.title").is_ok());
    }

    #[test]
    fn strip_and_empty_encode() {
        let mut xmp = XmpMetadata::decode(&Bytes::from_static(PACKET.as_bytes()));
        for key in [
            "Xmp.xmp.Rating",
            "Xmp.dc.title",
            "Xmp.dc.subject",
            "Xmp.dc.creator",
            "Xmp.xmpMM.DerivedFrom",
        ] {
            assert!(xmp.strip(key).unwrap());
        }
        assert!(!xmp.strip("Xmp.dc.title").unwrap());
        assert!(xmp.encode().is_some());
        assert!(xmp.strip("Xmp.xmp.CreatorTool").unwrap());
        assert!(xmp.encode().is_none());
    }

    #[test]
    fn malformed_packet_keeps_raw() {
        let xmp = XmpMetadata::decode(&Bytes::from_static(b"<x:xmpmeta><rdf:RDF></x:xmpmeta>"));
        assert!(xmp.entries.is_empty());
        assert!(xmp.raw.is_some());
    }
}
