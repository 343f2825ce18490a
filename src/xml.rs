//! XML documents as `serde_json::Value` trees.
//!
//! Documents map onto values the way xml2js does with `explicitArray: false`:
//!
//! - an element with only text becomes a string, an empty one becomes `""`
//! - attributes are collected under [`XML_ATTRKEY`]
//! - text next to attributes or child elements lives under the char key
//! - repeated child elements collapse into an array
//!
//! Namespace declarations are consumed by the parser and do not appear in
//! the parsed attributes; on output, `xmlns` and `xmlns:prefix` attributes
//! are written as namespace declarations.

use crate::serializer::{XmlOptions, XML_ATTRKEY};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::io::Write;
use xml::common::XmlVersion;
use xml::name::OwnedName;
use xml::reader::{ParserConfig, XmlEvent as ReaderEvent};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as WriterEvent};

const DEFAULT_ROOT_NAME: &str = "root";

struct Frame {
    name: String,
    attributes: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn into_value(self, char_key: &str) -> Value {
        let has_text = !self.text.trim().is_empty();
        if self.attributes.is_empty() && self.children.is_empty() {
            return Value::String(if has_text { self.text } else { String::new() });
        }

        let mut object = Map::new();
        if !self.attributes.is_empty() {
            object.insert(XML_ATTRKEY.to_string(), Value::Object(self.attributes));
        }
        object.extend(self.children);
        if has_text {
            object.insert(char_key.to_string(), Value::String(self.text));
        }
        Value::Object(object)
    }
}

fn qualified_name(name: &OwnedName) -> String {
    match &name.prefix {
        Some(prefix) => format!("{}:{}", prefix, name.local_name),
        None => name.local_name.clone(),
    }
}

fn append_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}

/// Parses an XML document into a value.
///
/// With `include_root` the result is an object with the root element's name
/// as its only key.
///
/// # Errors
///
/// Returns [`Error::Serialization`] for malformed or empty documents.
///
/// # Examples
///
/// ```
/// use restline::serializer::XmlOptions;
/// use restline::xml::parse_xml;
/// use serde_json::json;
///
/// let value = parse_xml(
///     r#"<Pet id="1"><Name>Rex</Name><Tag>a</Tag><Tag>b</Tag></Pet>"#,
///     &XmlOptions::default(),
/// )
/// .unwrap();
/// assert_eq!(value, json!({"$": {"id": "1"}, "Name": "Rex", "Tag": ["a", "b"]}));
/// ```
pub fn parse_xml(text: &str, options: &XmlOptions) -> Result<Value> {
    if text.trim().is_empty() {
        return Err(Error::Serialization("Document is empty".to_string()));
    }

    let reader = ParserConfig::new()
        .trim_whitespace(false)
        .cdata_to_characters(true)
        .ignore_comments(true)
        .create_reader(text.as_bytes());

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    for event in reader {
        let event = event.map_err(|e| Error::Serialization(e.to_string()))?;
        match event {
            ReaderEvent::StartElement {
                name, attributes, ..
            } => {
                let attributes = attributes
                    .into_iter()
                    .map(|a| (qualified_name(&a.name), Value::String(a.value)))
                    .collect();
                stack.push(Frame {
                    name: qualified_name(&name),
                    attributes,
                    children: Map::new(),
                    text: String::new(),
                });
            }
            ReaderEvent::Characters(chunk) | ReaderEvent::CData(chunk) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&chunk);
                }
            }
            ReaderEvent::EndElement { .. } => {
                let Some(frame) = stack.pop() else {
                    continue;
                };
                let name = frame.name.clone();
                let value = frame.into_value(&options.xml_char_key);
                match stack.last_mut() {
                    Some(parent) => append_child(&mut parent.children, name, value),
                    None => root = Some((name, value)),
                }
            }
            _ => {}
        }
    }

    let (name, value) = root.ok_or_else(|| Error::Serialization("Document is empty".to_string()))?;
    if options.include_root {
        let mut wrapped = Map::new();
        wrapped.insert(name, value);
        Ok(Value::Object(wrapped))
    } else {
        Ok(value)
    }
}

/// Writes a value as an XML document.
///
/// The root element is `options.root_name`; when that is empty, an object
/// with a single key is unwrapped into a root of that name, otherwise the
/// root is `<root>`.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the root value is an array or the
/// writer rejects the document.
///
/// # Examples
///
/// ```
/// use restline::serializer::XmlOptions;
/// use restline::xml::stringify_xml;
/// use serde_json::json;
///
/// let options = XmlOptions { root_name: "Pet".to_string(), ..Default::default() };
/// let xml = stringify_xml(&json!({"Name": "Rex"}), &options).unwrap();
/// assert!(xml.ends_with("<Pet><Name>Rex</Name></Pet>"));
/// ```
pub fn stringify_xml(value: &Value, options: &XmlOptions) -> Result<String> {
    let (root_name, content) = match value {
        Value::Object(object) if options.root_name.is_empty() && object.len() == 1 => {
            match object.iter().next() {
                Some((key, inner)) if key != XML_ATTRKEY => (key.as_str(), inner),
                _ => (DEFAULT_ROOT_NAME, value),
            }
        }
        _ if options.root_name.is_empty() => (DEFAULT_ROOT_NAME, value),
        _ => (options.root_name.as_str(), value),
    };

    if content.is_array() {
        return Err(Error::Serialization(format!(
            "Cannot write a list as the root element \"{}\"",
            root_name
        )));
    }

    let mut buffer = Vec::new();
    {
        let mut writer = EmitterConfig::new()
            .perform_indent(false)
            .write_document_declaration(false)
            .create_writer(&mut buffer);
        writer
            .write(WriterEvent::StartDocument {
                version: XmlVersion::Version10,
                encoding: Some("UTF-8"),
                standalone: Some(true),
            })
            .map_err(writer_error)?;
        write_element(&mut writer, root_name, content, &options.xml_char_key)?;
    }

    String::from_utf8(buffer).map_err(|e| Error::Serialization(e.to_string()))
}

fn write_element<W: Write>(
    writer: &mut EventWriter<W>,
    name: &str,
    value: &Value,
    char_key: &str,
) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(writer, name, item, char_key)?;
            }
            Ok(())
        }
        Value::Object(object) => {
            let attributes: Vec<(&str, String)> = match object.get(XML_ATTRKEY) {
                Some(Value::Object(attributes)) => attributes
                    .iter()
                    .map(|(key, value)| (key.as_str(), scalar_text(value)))
                    .collect(),
                _ => Vec::new(),
            };

            let mut start = WriterEvent::start_element(name);
            for (key, value) in &attributes {
                start = match key.strip_prefix("xmlns") {
                    Some("") => start.default_ns(value.as_str()),
                    Some(prefixed) if prefixed.starts_with(':') => {
                        start.ns(&prefixed[1..], value.as_str())
                    }
                    _ => start.attr(*key, value),
                };
            }
            writer.write(start).map_err(writer_error)?;

            for (key, child) in object {
                if key == XML_ATTRKEY {
                    continue;
                }
                if key == char_key {
                    writer
                        .write(WriterEvent::characters(&scalar_text(child)))
                        .map_err(writer_error)?;
                } else {
                    write_element(writer, key, child, char_key)?;
                }
            }

            writer.write(WriterEvent::end_element()).map_err(writer_error)
        }
        Value::Null => {
            writer
                .write(WriterEvent::start_element(name))
                .map_err(writer_error)?;
            writer.write(WriterEvent::end_element()).map_err(writer_error)
        }
        scalar => {
            writer
                .write(WriterEvent::start_element(name))
                .map_err(writer_error)?;
            writer
                .write(WriterEvent::characters(&scalar_text(scalar)))
                .map_err(writer_error)?;
            writer.write(WriterEvent::end_element()).map_err(writer_error)
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn writer_error(e: xml::writer::Error) -> Error {
    Error::Serialization(format!("Failed to write XML: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_text_and_empty_elements() {
        let value = parse_xml(
            "<?xml version=\"1.0\"?>\n<Pet>\n  <Name>Rex</Name>\n  <Nick/>\n</Pet>",
            &XmlOptions::default(),
        )
        .unwrap();
        assert_eq!(value, json!({"Name": "Rex", "Nick": ""}));
    }

    #[test]
    fn test_parse_mixed_text_and_cdata() {
        let value = parse_xml(
            r#"<Weight unit="kg"><![CDATA[12]]></Weight>"#,
            &XmlOptions::default(),
        )
        .unwrap();
        assert_eq!(value, json!({"$": {"unit": "kg"}, "_": "12"}));
    }

    #[test]
    fn test_parse_include_root_and_char_key() {
        let options = XmlOptions {
            include_root: true,
            xml_char_key: "#".to_string(),
            ..Default::default()
        };
        let value = parse_xml(r#"<List a="1">text<Item>x</Item></List>"#, &options).unwrap();
        assert_eq!(
            value,
            json!({"List": {"$": {"a": "1"}, "Item": "x", "#": "text"}})
        );
    }

    #[test]
    fn test_parse_prefixed_names() {
        let value = parse_xml(
            r#"<x:Root xmlns:x="urn:x"><x:Item>1</x:Item></x:Root>"#,
            &XmlOptions::default(),
        )
        .unwrap();
        assert_eq!(value, json!({"x:Item": "1"}));
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_xml("   ", &XmlOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "Document is empty");

        assert!(parse_xml("<a><b></a>", &XmlOptions::default()).is_err());
    }

    #[test]
    fn test_stringify_declaration_and_root() {
        let xml = stringify_xml(&json!({"Name": "Rex", "Age": 3}), &XmlOptions::default()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\""));
        assert!(xml.contains("standalone=\"yes\""));
        assert!(xml.ends_with("<root><Name>Rex</Name><Age>3</Age></root>"));

        let single = stringify_xml(&json!({"Pet": {"Name": "Rex"}}), &XmlOptions::default()).unwrap();
        assert!(single.ends_with("<Pet><Name>Rex</Name></Pet>"));
    }

    #[test]
    fn test_stringify_attributes_text_and_lists() {
        let options = XmlOptions {
            root_name: "Pet".to_string(),
            ..Default::default()
        };
        let value = json!({
            "$": {"id": "1"},
            "Tag": ["a", "b"],
            "Weight": {"$": {"unit": "kg"}, "_": 12}
        });
        let xml = stringify_xml(&value, &options).unwrap();
        assert!(xml.contains("<Pet id=\"1\">"));
        assert!(xml.contains("<Tag>a</Tag><Tag>b</Tag>"));
        assert!(xml.contains("<Weight unit=\"kg\">12</Weight>"));

        let back = parse_xml(&xml, &XmlOptions::default()).unwrap();
        assert_eq!(
            back,
            json!({"$": {"id": "1"}, "Tag": ["a", "b"], "Weight": {"$": {"unit": "kg"}, "_": "12"}})
        );
    }

    #[test]
    fn test_stringify_namespace_declaration() {
        let options = XmlOptions {
            root_name: "Pet".to_string(),
            ..Default::default()
        };
        let value = json!({"$": {"xmlns": "urn:pets"}, "Name": "Rex"});
        let xml = stringify_xml(&value, &options).unwrap();
        assert!(xml.contains("xmlns=\"urn:pets\""));
        assert!(xml.contains("<Name>Rex</Name>"));
    }

    #[test]
    fn test_stringify_escapes_text() {
        let options = XmlOptions {
            root_name: "Note".to_string(),
            ..Default::default()
        };
        let xml = stringify_xml(&json!({"Body": "a < b & c"}), &options).unwrap();
        let back = parse_xml(&xml, &XmlOptions::default()).unwrap();
        assert_eq!(back, json!({"Body": "a < b & c"}));
    }

    #[test]
    fn test_stringify_rejects_list_root() {
        let options = XmlOptions {
            root_name: "Items".to_string(),
            ..Default::default()
        };
        assert!(stringify_xml(&json!(["a"]), &options).is_err());
    }
}
