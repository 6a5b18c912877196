//! `asx:abap` payload building and response parsing.
//!
//! ADT's CTS endpoints speak the ABAP XML envelope:
//!
//! ```text
//! <asx:abap xmlns:asx="http://www.sap.com/abapxml" version="1.0">
//!   <asx:values>
//!     <DATA> ...fields... </DATA>
//!   </asx:values>
//! </asx:abap>
//! ```
//!
//! Payloads are written through quick-xml so field values are escaped by the
//! writer, and responses are read into a small element tree that can be
//! queried by path.

use std::io::Cursor;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::AdtError;

pub const ABAPXML_NS: &str = "http://www.sap.com/abapxml";
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Build an `asx:abap` document whose `DATA` element holds `fields` in order.
pub fn abap_values_document(fields: &[(&str, &str)]) -> Result<String, AdtError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut root = BytesStart::new("asx:abap");
    root.push_attribute(("xmlns:asx", ABAPXML_NS));
    root.push_attribute(("version", "1.0"));
    emit(&mut writer, Event::Start(root))?;
    emit(&mut writer, Event::Start(BytesStart::new("asx:values")))?;
    emit(&mut writer, Event::Start(BytesStart::new("DATA")))?;

    for (name, value) in fields {
        emit(&mut writer, Event::Start(BytesStart::new(*name)))?;
        if !value.is_empty() {
            emit(&mut writer, Event::Text(BytesText::new(*value)))?;
        }
        emit(&mut writer, Event::End(BytesEnd::new(*name)))?;
    }

    emit(&mut writer, Event::End(BytesEnd::new("DATA")))?;
    emit(&mut writer, Event::End(BytesEnd::new("asx:values")))?;
    emit(&mut writer, Event::End(BytesEnd::new("asx:abap")))?;

    into_string(writer)
}

/// Atom entry announcing a new file-store folder.
pub fn folder_entry_document(name: &str, description: &str) -> Result<String, AdtError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut entry = BytesStart::new("atom:entry");
    entry.push_attribute(("xmlns:atom", ATOM_NS));
    emit(&mut writer, Event::Start(entry))?;

    let mut category = BytesStart::new("atom:category");
    category.push_attribute(("term", "folder"));
    emit(&mut writer, Event::Empty(category))?;

    for (tag, text) in [("atom:title", name), ("atom:summary", description)] {
        emit(&mut writer, Event::Start(BytesStart::new(tag)))?;
        emit(&mut writer, Event::Text(BytesText::new(text)))?;
        emit(&mut writer, Event::End(BytesEnd::new(tag)))?;
    }

    emit(&mut writer, Event::End(BytesEnd::new("atom:entry")))?;
    into_string(writer)
}

fn emit(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<(), AdtError> {
    writer
        .write_event(event)
        .map_err(|e| AdtError::protocol("xml writer", e.to_string()))
}

fn into_string(writer: Writer<Cursor<Vec<u8>>>) -> Result<String, AdtError> {
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| AdtError::protocol("xml writer", e.to_string()))
}

/// One parsed element: its qualified name, concatenated text, and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<Self, AdtError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| AdtError::protocol("xml response", e.to_string()))?;
            match event {
                Event::Start(start) => stack.push(XmlElement {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    ..Default::default()
                }),
                Event::Empty(start) => {
                    let element = XmlElement {
                        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                        ..Default::default()
                    };
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let value = text
                            .unescape()
                            .map_err(|e| AdtError::protocol("xml response", e.to_string()))?;
                        current.text.push_str(&value);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current
                            .text
                            .push_str(&String::from_utf8_lossy(data.as_ref()));
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| AdtError::protocol("xml response", "unbalanced end tag"))?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(AdtError::protocol("xml response", "unexpected end of document"));
        }
        root.ok_or_else(|| AdtError::protocol("xml response", "document has no root element"))
    }

    /// First descendant reached by following `path` from this element's children.
    pub fn find(&self, path: &[&str]) -> Option<&XmlElement> {
        let (first, rest) = path.split_first()?;
        self.children
            .iter()
            .filter(|c| c.name == *first)
            .find_map(|c| if rest.is_empty() { Some(c) } else { c.find(rest) })
    }

    /// Trimmed text at `path`, `None` when missing or blank.
    pub fn value_at(&self, path: &[&str]) -> Option<String> {
        self.find(path)
            .map(|e| e.text.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_document_escapes_field_text() {
        let xml = abap_values_document(&[
            ("OPERATION", "I"),
            ("DEVCLASS", "ZTEST"),
            ("REQUEST_TEXT", "Fix <header> & footer"),
        ])
        .unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<asx:abap xmlns:asx=\"http://www.sap.com/abapxml\" version=\"1.0\">"));
        assert!(xml.contains("<REQUEST_TEXT>Fix &lt;header&gt; &amp; footer</REQUEST_TEXT>"));

        let parsed = XmlElement::parse(&xml).unwrap();
        assert_eq!(
            parsed.value_at(&["asx:values", "DATA", "REQUEST_TEXT"]).as_deref(),
            Some("Fix <header> & footer")
        );
    }

    #[test]
    fn test_empty_fields_are_written_as_empty_elements() {
        let xml = abap_values_document(&[("PGMID", ""), ("DEVCLASS", "ZTEST")]).unwrap();
        let parsed = XmlElement::parse(&xml).unwrap();
        assert!(parsed.find(&["asx:values", "DATA", "PGMID"]).is_some());
        assert_eq!(parsed.value_at(&["asx:values", "DATA", "PGMID"]), None);
    }

    #[test]
    fn test_find_walks_past_non_matching_siblings() {
        let xml = r#"<asx:abap><asx:values><DATA>
            <CTS_REQ_HEADER><TRKORR>DEVK900001</TRKORR></CTS_REQ_HEADER>
            <CTS_REQ_HEADER><TRKORR>DEVK900002</TRKORR><AS4TEXT>App</AS4TEXT></CTS_REQ_HEADER>
        </DATA></asx:values></asx:abap>"#;
        let parsed = XmlElement::parse(xml).unwrap();
        assert_eq!(
            parsed
                .value_at(&["asx:values", "DATA", "CTS_REQ_HEADER", "AS4TEXT"])
                .as_deref(),
            Some("App")
        );
        let data = parsed.find(&["asx:values", "DATA"]).unwrap();
        assert_eq!(data.children_named("CTS_REQ_HEADER").count(), 2);
    }

    #[test]
    fn test_folder_entry_document() {
        let xml = folder_entry_document("ZAPP", "My application").unwrap();
        let parsed = XmlElement::parse(&xml).unwrap();
        assert_eq!(parsed.name, "atom:entry");
        assert!(parsed.find(&["atom:category"]).is_some());
        assert_eq!(parsed.value_at(&["atom:title"]).as_deref(), Some("ZAPP"));
    }

    #[test]
    fn test_parse_rejects_truncated_documents() {
        let err = XmlElement::parse("<asx:abap><asx:values>").unwrap_err();
        assert!(matches!(err, AdtError::Protocol { .. }));
        assert!(XmlElement::parse("").is_err());
    }
}
