//! Mapper-driven conversion between in-memory values and wire values.
//!
//! Both sides are [`serde_json::Value`] trees. An absent value is `None`,
//! an explicit null is `Some(Value::Null)`; the difference matters for the
//! `required`/`nullable` rules:
//!
//! | nullable \ required | `true`          | `false`          |
//! |---------------------|-----------------|------------------|
//! | `Some(true)`        | null            | absent or null   |
//! | `Some(false)`       | neither         | absent           |
//! | `None`              | neither         | absent or null   |
//!
//! In XML mode the wire side follows the xml2js object convention used by
//! [`crate::xml`]: attributes live under [`XML_ATTRKEY`] and element text
//! under the configured char key.

use crate::mapper::{CompositeMapper, Mapper, MapperRegistry, MapperType, PolymorphicDiscriminator};
use crate::{Error, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;

/// Key under which XML attributes are kept.
pub const XML_ATTRKEY: &str = "$";

/// Default key under which XML element text is kept.
pub const XML_CHARKEY: &str = "_";

const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("uuid pattern is valid")
});

static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(-|\+)?P(?:([-+]?[0-9,.]*)Y)?(?:([-+]?[0-9,.]*)M)?(?:([-+]?[0-9,.]*)W)?(?:([-+]?[0-9,.]*)D)?(?:T(?:([-+]?[0-9,.]*)H)?(?:([-+]?[0-9,.]*)M)?(?:([-+]?[0-9,.]*)S)?)?$",
    )
    .expect("duration pattern is valid")
});

/// XML-specific serializer settings.
#[derive(Debug, Clone)]
pub struct XmlOptions {
    /// Name of the document root element. Empty means "derive it".
    pub root_name: String,
    /// Keep the root element as the single key of the parsed object.
    pub include_root: bool,
    /// Key holding element text.
    pub xml_char_key: String,
}

impl Default for XmlOptions {
    fn default() -> Self {
        Self {
            root_name: String::new(),
            include_root: false,
            xml_char_key: XML_CHARKEY.to_string(),
        }
    }
}

/// Options threaded through a serialize or deserialize call.
#[derive(Debug, Clone, Default)]
pub struct SerializerOptions {
    pub xml: XmlOptions,
}

/// Serializes and deserializes values according to [`Mapper`]s.
///
/// # Examples
///
/// ```
/// use restline::mapper::{Mapper, MapperRegistry};
/// use restline::serializer::{Serializer, SerializerOptions};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let serializer = Serializer::new(Arc::new(MapperRegistry::empty()), false);
/// let mapper = Mapper::new(restline::mapper::MapperType::Date).named("birthday");
///
/// let wire = serializer
///     .serialize(&mapper, Some(&json!("2020-02-29T10:00:00Z")), "", &SerializerOptions::default())
///     .unwrap();
/// assert_eq!(wire, Some(json!("2020-02-29")));
/// ```
#[derive(Debug, Clone)]
pub struct Serializer {
    registry: Arc<MapperRegistry>,
    is_xml: bool,
}

impl Serializer {
    /// Creates a serializer over `registry`.
    pub fn new(registry: Arc<MapperRegistry>, is_xml: bool) -> Self {
        Self { registry, is_xml }
    }

    /// The registry used to resolve model references.
    pub fn registry(&self) -> &MapperRegistry {
        &self.registry
    }

    /// Whether this serializer produces the XML object convention.
    pub fn is_xml(&self) -> bool {
        self.is_xml
    }

    /// Checks `value` against the mapper's constraints.
    ///
    /// Absent and null values always pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first violated constraint.
    pub fn validate_constraints(&self, mapper: &Mapper, value: &Value, name: &str) -> Result<()> {
        let Some(constraints) = &mapper.constraints else {
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }

        let fail = |constraint: &str, limit: String| {
            Err(Error::Validation(format!(
                "\"{}\" with value \"{}\" should satisfy the constraint \"{}\": {}.",
                name,
                display_value(value),
                constraint,
                limit
            )))
        };

        if let Some(number) = value.as_f64() {
            if let Some(max) = constraints.exclusive_maximum {
                if number >= max {
                    return fail("ExclusiveMaximum", max.to_string());
                }
            }
            if let Some(min) = constraints.exclusive_minimum {
                if number <= min {
                    return fail("ExclusiveMinimum", min.to_string());
                }
            }
            if let Some(max) = constraints.inclusive_maximum {
                if number > max {
                    return fail("InclusiveMaximum", max.to_string());
                }
            }
            if let Some(min) = constraints.inclusive_minimum {
                if number < min {
                    return fail("InclusiveMinimum", min.to_string());
                }
            }
            if let Some(step) = constraints.multiple_of {
                if number % step != 0.0 {
                    return fail("MultipleOf", step.to_string());
                }
            }
        }

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(length) = length {
            if let Some(max) = constraints.max_items {
                if length > max {
                    return fail("MaxItems", max.to_string());
                }
            }
            if let Some(max) = constraints.max_length {
                if length > max {
                    return fail("MaxLength", max.to_string());
                }
            }
            if let Some(min) = constraints.min_items {
                if length < min {
                    return fail("MinItems", min.to_string());
                }
            }
            if let Some(min) = constraints.min_length {
                if length < min {
                    return fail("MinLength", min.to_string());
                }
            }
        }

        if let Some(pattern) = &constraints.pattern {
            let matched = value.as_str().is_some_and(|s| pattern.is_match(s));
            if !matched {
                return fail("Pattern", pattern.as_str().to_string());
            }
        }

        if constraints.unique_items {
            if let Value::Array(items) = value {
                let duplicated = items
                    .iter()
                    .enumerate()
                    .any(|(i, item)| items[..i].contains(item));
                if duplicated {
                    return fail("UniqueItems", "true".to_string());
                }
            }
        }

        Ok(())
    }

    /// Converts an in-memory value into its wire shape.
    ///
    /// `name` is the path used in error messages; when empty the mapper's
    /// serialized name is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the value breaks the mapper's
    /// presence rules, type or constraints, and
    /// [`Error::ConfigurationError`] when a model reference cannot be
    /// resolved.
    pub fn serialize(
        &self,
        mapper: &Mapper,
        object: Option<&Value>,
        name: &str,
        options: &SerializerOptions,
    ) -> Result<Option<Value>> {
        let name = if name.is_empty() {
            mapper.serialized_name_or_empty()
        } else {
            name
        };
        let object = if mapper.is_constant {
            mapper.default_value.as_ref()
        } else {
            object
        };

        let nullable = mapper.nullable;
        if mapper.required && nullable == Some(true) && object.is_none() {
            return Err(Error::Validation(format!("{} cannot be undefined.", name)));
        }
        if mapper.required && nullable != Some(true) && is_absent(object) {
            return Err(Error::Validation(format!(
                "{} cannot be null or undefined.",
                name
            )));
        }
        if !mapper.required && nullable == Some(false) && matches!(object, Some(Value::Null)) {
            return Err(Error::Validation(format!("{} cannot be null.", name)));
        }

        let Some(value) = object.filter(|v| !v.is_null()) else {
            return Ok(object.cloned());
        };

        self.validate_constraints(mapper, value, name)?;

        let payload = match &mapper.kind {
            MapperType::Any => value.clone(),
            MapperType::Number
            | MapperType::String
            | MapperType::Boolean
            | MapperType::Object
            | MapperType::Stream
            | MapperType::Uuid => serialize_basic(&mapper.kind, name, value)?,
            MapperType::Enum { allowed_values } => serialize_enum(name, allowed_values, value)?,
            MapperType::Date
            | MapperType::DateTime
            | MapperType::DateTimeRfc1123
            | MapperType::UnixTime
            | MapperType::TimeSpan => serialize_date(&mapper.kind, value, name)?,
            MapperType::ByteArray => Value::String(STANDARD.encode(expect_bytes(value, name)?)),
            MapperType::Base64Url => Value::String(BASE64_URL.encode(expect_bytes(value, name)?)),
            MapperType::Sequence { element } => {
                self.serialize_sequence(element, value, name, options)?
            }
            MapperType::Dictionary { value: value_mapper } => {
                self.serialize_dictionary(mapper, value_mapper, value, name, options)?
            }
            MapperType::Composite(_) => self.serialize_composite(mapper, value, name, options)?,
        };

        Ok(Some(payload))
    }

    /// Converts a wire value back into its in-memory shape.
    ///
    /// Deserialization is lenient: values that do not parse as the mapped
    /// kind are passed through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] when a model reference cannot be
    /// resolved and [`Error::Validation`] for undecodable base64.
    pub fn deserialize(
        &self,
        mapper: &Mapper,
        response_body: Option<&Value>,
        name: &str,
        options: &SerializerOptions,
    ) -> Result<Option<Value>> {
        let Some(body) = response_body.filter(|v| !v.is_null()) else {
            let mut result = response_body.cloned();
            if self.is_xml
                && matches!(mapper.kind, MapperType::Sequence { .. })
                && !mapper.xml.is_wrapped
            {
                result = Some(Value::Array(Vec::new()));
            }
            if let Some(default) = &mapper.default_value {
                result = Some(default.clone());
            }
            return Ok(result);
        };

        let name = if name.is_empty() {
            mapper.serialized_name_or_empty()
        } else {
            name
        };

        let body = match (&mapper.kind, body.as_object()) {
            (MapperType::Composite(_), _) => body,
            (_, Some(object)) if self.is_xml && object.contains_key(XML_ATTRKEY) => {
                object.get(&options.xml.xml_char_key).unwrap_or(body)
            }
            _ => body,
        };

        let payload = match &mapper.kind {
            MapperType::Composite(_) => Some(self.deserialize_composite(mapper, body, name, options)?),
            MapperType::Number => Some(parse_number(body)),
            MapperType::Boolean => Some(match body.as_str() {
                Some("true") => Value::Bool(true),
                Some("false") => Value::Bool(false),
                _ => body.clone(),
            }),
            MapperType::Any
            | MapperType::String
            | MapperType::Enum { .. }
            | MapperType::Object
            | MapperType::Stream
            | MapperType::Uuid
            | MapperType::TimeSpan => Some(body.clone()),
            MapperType::Date | MapperType::DateTime | MapperType::DateTimeRfc1123 => {
                Some(deserialize_date(body))
            }
            MapperType::UnixTime => unix_time_to_date(body),
            MapperType::ByteArray => Some(decode_bytes(&BASE64_LENIENT, body, name)?),
            MapperType::Base64Url => {
                if is_truthy(body) {
                    Some(decode_bytes(&BASE64_URL, body, name)?)
                } else {
                    None
                }
            }
            MapperType::Sequence { element } => {
                Some(self.deserialize_sequence(element, body, name, options)?)
            }
            MapperType::Dictionary { value } => {
                Some(self.deserialize_dictionary(value, body, name, options)?)
            }
        };

        if mapper.is_constant {
            return Ok(mapper.default_value.clone());
        }
        Ok(payload)
    }

    fn serialize_sequence(
        &self,
        element: &Mapper,
        value: &Value,
        name: &str,
        options: &SerializerOptions,
    ) -> Result<Value> {
        let Value::Array(items) = value else {
            return Err(Error::Validation(format!("{} must be of type Array.", name)));
        };

        let mut serialized = Vec::with_capacity(items.len());
        for item in items {
            let value = self
                .serialize(element, Some(item), name, options)?
                .unwrap_or(Value::Null);
            let value = match (&element.xml.namespace, self.is_xml) {
                (Some(namespace), true) => {
                    let mut wrapped = match (&element.kind, value) {
                        (MapperType::Composite(_), Value::Object(object)) => object,
                        (_, other) => {
                            let mut object = Map::new();
                            object.insert(options.xml.xml_char_key.clone(), other);
                            object
                        }
                    };
                    wrapped.insert(
                        XML_ATTRKEY.to_string(),
                        namespace_attribute(element, namespace),
                    );
                    Value::Object(wrapped)
                }
                _ => value,
            };
            serialized.push(value);
        }
        Ok(Value::Array(serialized))
    }

    fn serialize_dictionary(
        &self,
        mapper: &Mapper,
        value_mapper: &Mapper,
        value: &Value,
        name: &str,
        options: &SerializerOptions,
    ) -> Result<Value> {
        let Value::Object(entries) = value else {
            return Err(Error::Validation(format!("{} must be of type object.", name)));
        };

        let mut serialized = Map::new();
        for (key, entry) in entries {
            if let Some(value) = self.serialize(value_mapper, Some(entry), name, options)? {
                serialized.insert(key.clone(), self.xml_object_value(value_mapper, value, options));
            }
        }

        if let (true, Some(namespace)) = (self.is_xml, &mapper.xml.namespace) {
            serialized.insert(XML_ATTRKEY.to_string(), namespace_attribute(mapper, namespace));
        }
        Ok(Value::Object(serialized))
    }

    fn serialize_composite(
        &self,
        mapper: &Mapper,
        value: &Value,
        name: &str,
        options: &SerializerOptions,
    ) -> Result<Value> {
        let mapper = self.polymorphic_mapper(mapper, value, |d| &d.client_name);
        let Value::Object(object) = value else {
            return Err(Error::Validation(format!("{} must be of type object.", name)));
        };

        let discriminator = self.polymorphic_discriminator(mapper).cloned();
        let properties = self.resolve_model_properties(mapper, name)?;
        let mut payload = Map::new();

        for (key, property) in properties {
            if property.read_only {
                continue;
            }

            let property_value = object.get(key);
            let (parents, property_name) = if self.is_xml {
                let property_name = if property.xml.is_wrapped {
                    property.xml.name.clone()
                } else {
                    property
                        .xml
                        .element_name
                        .clone()
                        .or_else(|| property.xml.name.clone())
                };
                let property_name = property_name.or_else(|| property.serialized_name.clone());
                (Vec::new(), property_name)
            } else {
                let mut paths = split_serialize_name(property.serialized_name_or_empty());
                let property_name = paths.pop();
                (paths, property_name)
            };

            let create = !is_absent(property_value) || property.default_value.is_some();
            let Some(parent) = parent_object(&mut payload, &parents, create) else {
                continue;
            };

            if let (true, Some(namespace)) = (self.is_xml, &mapper.xml.namespace) {
                let attributes = parent
                    .entry(XML_ATTRKEY)
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(attributes) = attributes {
                    attributes.insert(mapper.xml.namespace_key(), Value::String(namespace.clone()));
                }
            }

            let property_path = match property.serialized_name.as_deref() {
                Some("") => name.to_string(),
                Some(serialized) => format!("{}.{}", name, serialized),
                None => name.to_string(),
            };

            let substitute = match (&discriminator, &mapper.serialized_name) {
                (Some(d), Some(serialized)) if d.client_name == *key && is_absent(property_value) => {
                    Some(Value::String(serialized.clone()))
                }
                _ => None,
            };
            let to_serialize = substitute.as_ref().or(property_value);

            let Some(serialized) = self.serialize(property, to_serialize, &property_path, options)? else {
                continue;
            };
            let Some(property_name) = property_name else {
                continue;
            };

            if self.is_xml && property.xml.is_attribute {
                let attributes = parent
                    .entry(XML_ATTRKEY)
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(attributes) = attributes {
                    attributes.insert(property_name, serialized);
                }
            } else if self.is_xml && property.xml.is_wrapped {
                let value = self.xml_object_value(property, serialized, options);
                let element_name = property
                    .xml
                    .element_name
                    .clone()
                    .unwrap_or_else(|| property_name.clone());
                let mut wrapper = Map::new();
                wrapper.insert(element_name, value);
                parent.insert(property_name, Value::Object(wrapper));
            } else {
                let value = self.xml_object_value(property, serialized, options);
                parent.insert(property_name, value);
            }
        }

        if let Some(additional) = self.resolve_additional_properties(mapper, name)? {
            for (key, entry) in object {
                if properties.contains_key(key) {
                    continue;
                }
                let entry_name = format!("{}[\"{}\"]", name, key);
                if let Some(value) = self.serialize(additional, Some(entry), &entry_name, options)? {
                    payload.insert(key.clone(), value);
                }
            }
        }

        Ok(Value::Object(payload))
    }

    fn deserialize_sequence(
        &self,
        element: &Mapper,
        body: &Value,
        name: &str,
        options: &SerializerOptions,
    ) -> Result<Value> {
        if !is_truthy(body) {
            return Ok(body.clone());
        }
        // A single XML child parses as the element itself.
        let items = match body {
            Value::Array(items) => items.as_slice(),
            other => std::slice::from_ref(other),
        };

        let mut deserialized = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_name = format!("{}[{}]", name, i);
            let value = self.deserialize(element, Some(item), &item_name, options)?;
            deserialized.push(value.unwrap_or(Value::Null));
        }
        Ok(Value::Array(deserialized))
    }

    fn deserialize_dictionary(
        &self,
        value_mapper: &Mapper,
        body: &Value,
        name: &str,
        options: &SerializerOptions,
    ) -> Result<Value> {
        let Value::Object(entries) = body else {
            return Ok(body.clone());
        };

        let mut deserialized = Map::new();
        for (key, entry) in entries {
            if let Some(value) = self.deserialize(value_mapper, Some(entry), name, options)? {
                deserialized.insert(key.clone(), value);
            }
        }
        Ok(Value::Object(deserialized))
    }

    fn deserialize_composite(
        &self,
        mapper: &Mapper,
        body: &Value,
        name: &str,
        options: &SerializerOptions,
    ) -> Result<Value> {
        let mapper = self.polymorphic_mapper(mapper, body, |d| &d.serialized_name);
        let properties = self.resolve_model_properties(mapper, name)?;
        let own_discriminator = mapper
            .as_composite()
            .and_then(|c| c.polymorphic_discriminator.as_ref());

        let mut instance = Map::new();
        let mut handled: Vec<String> = Vec::new();

        for (key, property) in properties {
            let paths = split_serialize_name(property.serialized_name_or_empty());
            if let Some(first) = paths.first() {
                handled.push(first.clone());
            }

            let property_path = match property.serialized_name.as_deref() {
                Some("") | None => name.to_string(),
                Some(serialized) => format!("{}.{}", name, serialized),
            };

            if let Some(prefix) = &property.header_collection_prefix {
                let value_mapper = match &property.kind {
                    MapperType::Dictionary { value } => value.as_ref(),
                    _ => property,
                };
                let mut collected = Map::new();
                if let Value::Object(headers) = body {
                    for (header, value) in headers {
                        if let Some(suffix) = header.strip_prefix(prefix.as_str()) {
                            if let Some(value) =
                                self.deserialize(value_mapper, Some(value), &property_path, options)?
                            {
                                collected.insert(suffix.to_string(), value);
                            }
                        }
                        handled.push(header.clone());
                    }
                }
                instance.insert(key.clone(), Value::Object(collected));
            } else if self.is_xml {
                let xml_name = property
                    .xml
                    .name
                    .as_deref()
                    .or(property.serialized_name.as_deref())
                    .unwrap_or_default();
                handled.push(xml_name.to_string());
                if let Some(element) = &property.xml.element_name {
                    handled.push(element.clone());
                }
                let attributes = body.get(XML_ATTRKEY).filter(|v| is_truthy(v));
                let value = match attributes {
                    Some(attributes) if property.xml.is_attribute => {
                        self.deserialize(property, attributes.get(xml_name), &property_path, options)?
                    }
                    _ if property.xml.is_wrapped => {
                        let empty = Value::Array(Vec::new());
                        let elements = property
                            .xml
                            .element_name
                            .as_deref()
                            .and_then(|element| body.get(xml_name)?.get(element))
                            .filter(|v| !v.is_null())
                            .unwrap_or(&empty);
                        self.deserialize(property, Some(elements), &property_path, options)?
                    }
                    _ => {
                        let element = property
                            .xml
                            .element_name
                            .as_deref()
                            .or(property.xml.name.as_deref())
                            .or(property.serialized_name.as_deref())
                            .unwrap_or_default();
                        self.deserialize(property, body.get(element), &property_path, options)?
                    }
                };
                if let Some(value) = value {
                    instance.insert(key.clone(), value);
                }
            } else {
                let mut found = Some(body);
                for segment in &paths {
                    match found {
                        Some(current) if is_truthy(current) => found = current.get(segment),
                        _ => break,
                    }
                }

                let substitute = match (own_discriminator, &mapper.serialized_name) {
                    (Some(d), Some(serialized)) if d.client_name == *key && is_absent(found) => {
                        Some(Value::String(serialized.clone()))
                    }
                    _ => None,
                };
                let found = substitute.as_ref().or(found);

                let page = body
                    .get(key)
                    .filter(|v| v.is_array() && property.serialized_name.as_deref() == Some(""));
                if let Some(page) = page {
                    if let Some(value) = self.deserialize(property, Some(page), &property_path, options)? {
                        instance.insert(key.clone(), value);
                    }
                } else if found.is_some() || property.default_value.is_some() {
                    if let Some(value) = self.deserialize(property, found, &property_path, options)? {
                        instance.insert(key.clone(), value);
                    }
                }
            }
        }

        let additional = mapper
            .as_composite()
            .and_then(|c| c.additional_properties.as_deref());
        match (additional, body) {
            (Some(additional), Value::Object(entries)) => {
                for (key, entry) in entries {
                    let claimed = properties.values().any(|property| {
                        split_serialize_name(property.serialized_name_or_empty())
                            .first()
                            .is_some_and(|first| first == key)
                    });
                    if claimed {
                        continue;
                    }
                    let entry_name = format!("{}[\"{}\"]", name, key);
                    if let Some(value) = self.deserialize(additional, Some(entry), &entry_name, options)? {
                        instance.insert(key.clone(), value);
                    }
                }
            }
            (None, Value::Object(entries)) => {
                for (key, entry) in entries {
                    if instance.contains_key(key)
                        || handled.contains(key)
                        || key == XML_ATTRKEY
                        || *key == options.xml.xml_char_key
                    {
                        continue;
                    }
                    instance.insert(key.clone(), entry.clone());
                }
            }
            _ => {}
        }

        Ok(Value::Object(instance))
    }

    /// Wraps a namespaced value so the XML writer can emit its `xmlns`.
    fn xml_object_value(&self, property: &Mapper, value: Value, options: &SerializerOptions) -> Value {
        let Some(namespace) = property.xml.namespace.as_ref().filter(|_| self.is_xml) else {
            return value;
        };

        match (&property.kind, value) {
            (MapperType::Composite(_), Value::Object(object))
                if object.get(XML_ATTRKEY).is_some_and(is_truthy) =>
            {
                Value::Object(object)
            }
            (MapperType::Composite(_), Value::Object(mut object)) => {
                object.insert(XML_ATTRKEY.to_string(), namespace_attribute(property, namespace));
                Value::Object(object)
            }
            (_, other) => {
                let mut wrapped = Map::new();
                wrapped.insert(options.xml.xml_char_key.clone(), other);
                wrapped.insert(XML_ATTRKEY.to_string(), namespace_attribute(property, namespace));
                Value::Object(wrapped)
            }
        }
    }

    fn resolve_referenced_mapper(&self, composite: &CompositeMapper, name: &str) -> Result<Option<&Mapper>> {
        let class_name = composite.class_name.as_deref().ok_or_else(|| {
            Error::ConfigurationError(format!(
                "Class name for model \"{}\" is not provided in the mapper.",
                name
            ))
        })?;
        Ok(self.registry.get(class_name))
    }

    fn resolve_model_properties<'a>(
        &'a self,
        mapper: &'a Mapper,
        name: &str,
    ) -> Result<&'a IndexMap<String, Mapper>> {
        let Some(composite) = mapper.as_composite() else {
            return Err(Error::ConfigurationError(format!(
                "Mapper for \"{}\" is not a composite.",
                name
            )));
        };
        if let Some(properties) = &composite.model_properties {
            return Ok(properties);
        }

        let class_name = composite.class_name.as_deref().unwrap_or_default();
        let model = self.resolve_referenced_mapper(composite, name)?.ok_or_else(|| {
            Error::ConfigurationError(format!(
                "mapper() cannot be null or undefined for model \"{}\".",
                class_name
            ))
        })?;
        model
            .as_composite()
            .and_then(|c| c.model_properties.as_ref())
            .ok_or_else(|| {
                Error::ConfigurationError(format!(
                    "modelProperties cannot be null or undefined in the mapper of type \"{}\" for object \"{}\".",
                    class_name, name
                ))
            })
    }

    fn resolve_additional_properties<'a>(
        &'a self,
        mapper: &'a Mapper,
        name: &str,
    ) -> Result<Option<&'a Mapper>> {
        let Some(composite) = mapper.as_composite() else {
            return Ok(None);
        };
        if let Some(additional) = &composite.additional_properties {
            return Ok(Some(additional));
        }
        if composite.class_name.is_none() {
            return Ok(None);
        }
        Ok(self
            .resolve_referenced_mapper(composite, name)?
            .and_then(Mapper::as_composite)
            .and_then(|c| c.additional_properties.as_deref()))
    }

    fn polymorphic_discriminator<'a>(&'a self, mapper: &'a Mapper) -> Option<&'a PolymorphicDiscriminator> {
        let composite = mapper.as_composite()?;
        let registered = |type_name: Option<&String>| {
            self.registry
                .get(type_name?)?
                .as_composite()?
                .polymorphic_discriminator
                .as_ref()
        };
        composite
            .polymorphic_discriminator
            .as_ref()
            .or_else(|| registered(composite.uber_parent.as_ref()))
            .or_else(|| registered(composite.class_name.as_ref()))
    }

    /// Picks the subtype mapper named by the discriminator property of `object`.
    fn polymorphic_mapper<'a>(
        &'a self,
        mapper: &'a Mapper,
        object: &Value,
        property: impl Fn(&PolymorphicDiscriminator) -> &String,
    ) -> &'a Mapper {
        let Some(discriminator) = self.polymorphic_discriminator(mapper) else {
            return mapper;
        };
        let property = property(discriminator);
        if property.is_empty() {
            return mapper;
        }
        let Some(value) = object.get(property).filter(|v| !v.is_null()) else {
            return mapper;
        };
        let Some(composite) = mapper.as_composite() else {
            return mapper;
        };

        let type_name = composite
            .uber_parent
            .as_deref()
            .or(composite.class_name.as_deref())
            .unwrap_or_default();
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let key = if value == type_name {
            value
        } else {
            format!("{}.{}", type_name, value)
        };
        self.registry.discriminator(&key).unwrap_or(mapper)
    }
}

fn serialize_basic(kind: &MapperType, name: &str, value: &Value) -> Result<Value> {
    match kind {
        MapperType::Number if !value.is_number() => Err(Error::Validation(format!(
            "{} with value {} must be of type number.",
            name,
            display_value(value)
        ))),
        MapperType::String if !value.is_string() => Err(Error::Validation(format!(
            "{} with value \"{}\" must be of type string.",
            name,
            display_value(value)
        ))),
        MapperType::Uuid if !value.as_str().is_some_and(|s| UUID_PATTERN.is_match(s)) => {
            Err(Error::Validation(format!(
                "{} with value \"{}\" must be of type string and a valid uuid.",
                name,
                display_value(value)
            )))
        }
        MapperType::Boolean if !value.is_boolean() => Err(Error::Validation(format!(
            "{} with value {} must be of type boolean.",
            name,
            display_value(value)
        ))),
        MapperType::Stream if !value.is_string() && as_bytes(value).is_none() => Err(
            Error::Validation(format!("{} must be a string or a byte array.", name)),
        ),
        _ => Ok(value.clone()),
    }
}

fn serialize_enum(name: &str, allowed_values: &[Value], value: &Value) -> Result<Value> {
    if allowed_values.is_empty() {
        return Err(Error::Validation(format!(
            "Please provide a set of allowedValues to validate {} as an Enum Type.",
            name
        )));
    }

    let present = allowed_values.iter().any(|allowed| match (allowed, value) {
        (Value::String(a), Value::String(v)) => a.to_lowercase() == v.to_lowercase(),
        (a, v) => a == v,
    });
    if !present {
        let valid = serde_json::to_string(allowed_values).unwrap_or_default();
        return Err(Error::Validation(format!(
            "{} is not a valid value for {}. The valid values are: {}.",
            display_value(value),
            name,
            valid
        )));
    }
    Ok(value.clone())
}

fn serialize_date(kind: &MapperType, value: &Value, name: &str) -> Result<Value> {
    if let MapperType::TimeSpan = kind {
        return match value.as_str() {
            Some(s) if DURATION_PATTERN.is_match(s) => Ok(value.clone()),
            _ => Err(Error::Validation(format!(
                "{} must be a string in ISO 8601 format. Instead was \"{}\".",
                name,
                display_value(value)
            ))),
        };
    }

    let Some(date) = value.as_str().and_then(parse_date) else {
        let message = match kind {
            MapperType::DateTimeRfc1123 => {
                format!("{} must be a date string in RFC-1123 format.", name)
            }
            MapperType::UnixTime => format!(
                "{} must be a date string in RFC-1123/ISO8601 format for it to be serialized in UnixTime/Epoch format.",
                name
            ),
            _ => format!("{} must be a date string in ISO8601 format.", name),
        };
        return Err(Error::Validation(message));
    };

    Ok(match kind {
        MapperType::Date => Value::String(date.format("%Y-%m-%d").to_string()),
        MapperType::DateTimeRfc1123 => {
            Value::String(httpdate::fmt_http_date(SystemTime::from(date)))
        }
        MapperType::UnixTime => Value::Number(date.timestamp().into()),
        _ => Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)),
    })
}

/// Parses the date formats accepted on either side of the wire.
pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(s) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(time) = httpdate::parse_http_date(s) {
        return Some(DateTime::<Utc>::from(time));
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(date.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
}

fn format_date(date: DateTime<Utc>) -> Value {
    Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn deserialize_date(body: &Value) -> Value {
    let parsed = match body {
        Value::String(s) => parse_date(s),
        Value::Number(n) => n
            .as_f64()
            .and_then(|millis| DateTime::from_timestamp_millis(millis as i64)),
        _ => None,
    };
    parsed.map(format_date).unwrap_or_else(|| body.clone())
}

fn unix_time_to_date(body: &Value) -> Option<Value> {
    if !is_truthy(body) {
        return None;
    }
    let seconds = match body {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let date = seconds.and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64));
    Some(date.map(format_date).unwrap_or_else(|| body.clone()))
}

fn parse_number(body: &Value) -> Value {
    let Some(s) = body.as_str() else {
        return body.clone();
    };
    match s.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => number_value(n),
        _ => body.clone(),
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

pub(crate) fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect()
}

fn expect_bytes(value: &Value, name: &str) -> Result<Vec<u8>> {
    as_bytes(value).ok_or_else(|| Error::Validation(format!("{} must be a byte array.", name)))
}

fn decode_bytes(engine: &GeneralPurpose, body: &Value, name: &str) -> Result<Value> {
    let Some(encoded) = body.as_str() else {
        return Ok(body.clone());
    };
    let bytes = engine
        .decode(encoded.trim())
        .map_err(|e| Error::Validation(format!("{} is not valid base64: {}", name, e)))?;
    Ok(Value::Array(bytes.into_iter().map(Value::from).collect()))
}

fn namespace_attribute(mapper: &Mapper, namespace: &str) -> Value {
    let mut attribute = Map::new();
    attribute.insert(mapper.xml.namespace_key(), Value::String(namespace.to_string()));
    Value::Object(attribute)
}

/// Walks (and optionally creates) the nested objects named by `paths`.
fn parent_object<'a>(
    payload: &'a mut Map<String, Value>,
    paths: &[String],
    create: bool,
) -> Option<&'a mut Map<String, Value>> {
    let mut current = payload;
    for segment in paths {
        if matches!(current.get(segment), None | Some(Value::Null)) {
            if !create {
                return None;
            }
            current.insert(segment.clone(), Value::Object(Map::new()));
        }
        current = current.get_mut(segment)?.as_object_mut()?;
    }
    Some(current)
}

/// Splits a dotted serialized name, honouring `\.` escapes.
pub(crate) fn split_serialize_name(name: &str) -> Vec<String> {
    let mut classes = Vec::new();
    if name.is_empty() {
        return classes;
    }
    let mut partial = String::new();
    for word in name.split('.') {
        if let Some(escaped) = word.strip_suffix('\\') {
            partial.push_str(escaped);
            partial.push('.');
        } else {
            partial.push_str(word);
            classes.push(std::mem::take(&mut partial));
        }
    }
    classes
}

fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// JavaScript-style truthiness, used where wire shapes are loosely typed.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Renders a value the way it appears inside error messages.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{CompositeMapper, MapperConstraints};
    use serde_json::json;

    fn json_serializer(registry: MapperRegistry) -> Serializer {
        Serializer::new(Arc::new(registry), false)
    }

    fn xml_serializer(registry: MapperRegistry) -> Serializer {
        Serializer::new(Arc::new(registry), true)
    }

    fn opts() -> SerializerOptions {
        SerializerOptions::default()
    }

    fn zoo() -> MapperRegistry {
        let animal = Mapper::composite(
            CompositeMapper::new("Animal")
                .discriminator("kind", "kind")
                .property("kind", Mapper::string().named("kind").required())
                .property("name", Mapper::string().named("name")),
        )
        .named("Animal");
        let dog = Mapper::composite(
            CompositeMapper::new("Dog")
                .uber_parent("Animal")
                .property("kind", Mapper::string().named("kind").required())
                .property("name", Mapper::string().named("name"))
                .property("good_boy", Mapper::boolean().named("properties.goodBoy")),
        )
        .named("dog");
        MapperRegistry::builder()
            .mapper("Animal", animal)
            .mapper("Dog", dog)
            .build()
            .unwrap()
    }

    #[test]
    fn test_presence_rules() {
        let s = json_serializer(MapperRegistry::empty());

        let required = Mapper::string().named("id").required();
        let err = s.serialize(&required, None, "", &opts()).unwrap_err();
        assert_eq!(err.to_string(), "id cannot be null or undefined.");

        let required_nullable = Mapper::string().named("id").required().nullable(true);
        let err = s.serialize(&required_nullable, None, "", &opts()).unwrap_err();
        assert_eq!(err.to_string(), "id cannot be undefined.");
        assert_eq!(
            s.serialize(&required_nullable, Some(&Value::Null), "", &opts()).unwrap(),
            Some(Value::Null)
        );

        let not_nullable = Mapper::string().named("id").nullable(false);
        let err = s.serialize(&not_nullable, Some(&Value::Null), "", &opts()).unwrap_err();
        assert_eq!(err.to_string(), "id cannot be null.");
        assert_eq!(s.serialize(&not_nullable, None, "", &opts()).unwrap(), None);

        let optional = Mapper::string().named("id");
        assert_eq!(
            s.serialize(&optional, Some(&Value::Null), "", &opts()).unwrap(),
            Some(Value::Null)
        );
    }

    #[test]
    fn test_type_checks() {
        let s = json_serializer(MapperRegistry::empty());

        let err = s
            .serialize(&Mapper::number(), Some(&json!("12")), "count", &opts())
            .unwrap_err();
        assert_eq!(err.to_string(), "count with value 12 must be of type number.");

        let err = s
            .serialize(&Mapper::string(), Some(&json!(1)), "name", &opts())
            .unwrap_err();
        assert_eq!(err.to_string(), "name with value \"1\" must be of type string.");

        let uuid = Mapper::new(MapperType::Uuid);
        assert!(s
            .serialize(&uuid, Some(&json!("123e4567-e89b-12d3-a456-426614174000")), "id", &opts())
            .is_ok());
        assert!(s.serialize(&uuid, Some(&json!("nope")), "id", &opts()).is_err());
    }

    #[test]
    fn test_constraints() {
        let s = json_serializer(MapperRegistry::empty());
        let mapper = Mapper::number().constraints(MapperConstraints {
            inclusive_maximum: Some(10.0),
            ..Default::default()
        });

        let err = s.serialize(&mapper, Some(&json!(11)), "age", &opts()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"age\" with value \"11\" should satisfy the constraint \"InclusiveMaximum\": 10."
        );

        let pattern = Mapper::string().constraints(
            MapperConstraints::default().with_pattern("^[a-z]+$").unwrap(),
        );
        assert!(s.serialize(&pattern, Some(&json!("abc")), "p", &opts()).is_ok());
        assert!(s.serialize(&pattern, Some(&json!("ABC")), "p", &opts()).is_err());

        let unique = Mapper::sequence(Mapper::number()).constraints(MapperConstraints {
            unique_items: true,
            ..Default::default()
        });
        assert!(s.serialize(&unique, Some(&json!([1, 2, 1])), "ids", &opts()).is_err());
    }

    #[test]
    fn test_enum_is_case_insensitive() {
        let s = json_serializer(MapperRegistry::empty());
        let mapper = Mapper::enumeration(["Red", "Green"]);

        assert_eq!(
            s.serialize(&mapper, Some(&json!("red")), "color", &opts()).unwrap(),
            Some(json!("red"))
        );
        let err = s
            .serialize(&mapper, Some(&json!("blue")), "color", &opts())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "blue is not a valid value for color. The valid values are: [\"Red\",\"Green\"]."
        );
    }

    #[test]
    fn test_date_formats() {
        let s = json_serializer(MapperRegistry::empty());
        let input = json!("1994-11-06T08:49:37.5Z");

        let cases = [
            (MapperType::Date, json!("1994-11-06")),
            (MapperType::DateTime, json!("1994-11-06T08:49:37.500Z")),
            (MapperType::DateTimeRfc1123, json!("Sun, 06 Nov 1994 08:49:37 GMT")),
            (MapperType::UnixTime, json!(784111777)),
        ];
        for (kind, expected) in cases {
            let mapper = Mapper::new(kind);
            assert_eq!(s.serialize(&mapper, Some(&input), "d", &opts()).unwrap(), Some(expected));
        }

        let span = Mapper::new(MapperType::TimeSpan);
        assert!(s.serialize(&span, Some(&json!("P1DT2H")), "d", &opts()).is_ok());
        assert!(s.serialize(&span, Some(&json!("one day")), "d", &opts()).is_err());
    }

    #[test]
    fn test_date_deserialize_is_canonical() {
        let s = json_serializer(MapperRegistry::empty());
        let rfc1123 = Mapper::new(MapperType::DateTimeRfc1123);
        assert_eq!(
            s.deserialize(&rfc1123, Some(&json!("Sun, 06 Nov 1994 08:49:37 GMT")), "d", &opts())
                .unwrap(),
            Some(json!("1994-11-06T08:49:37.000Z"))
        );

        let unix = Mapper::new(MapperType::UnixTime);
        assert_eq!(
            s.deserialize(&unix, Some(&json!(784111777)), "d", &opts()).unwrap(),
            Some(json!("1994-11-06T08:49:37.000Z"))
        );
        assert_eq!(s.deserialize(&unix, Some(&json!(0)), "d", &opts()).unwrap(), None);
    }

    #[test]
    fn test_byte_arrays() {
        let s = json_serializer(MapperRegistry::empty());
        let bytes = json!([251, 255, 0]);

        let standard = Mapper::new(MapperType::ByteArray);
        assert_eq!(
            s.serialize(&standard, Some(&bytes), "b", &opts()).unwrap(),
            Some(json!("+/8A"))
        );

        let url = Mapper::new(MapperType::Base64Url);
        let encoded = s.serialize(&url, Some(&bytes), "b", &opts()).unwrap().unwrap();
        assert_eq!(encoded, json!("-_8A"));
        assert_eq!(s.deserialize(&url, Some(&encoded), "b", &opts()).unwrap(), Some(bytes));

        let padded = json!([1, 2]);
        let encoded = s.serialize(&url, Some(&padded), "b", &opts()).unwrap().unwrap();
        assert_eq!(encoded, json!("AQI"));
    }

    #[test]
    fn test_composite_nested_paths_and_read_only() {
        let registry = MapperRegistry::builder()
            .mapper(
                "Pet",
                Mapper::composite(
                    CompositeMapper::new("Pet")
                        .property("id", Mapper::number().named("id").read_only())
                        .property("name", Mapper::string().named("name"))
                        .property("color", Mapper::string().named("properties.color"))
                        .property("weight", Mapper::number().named("properties.weight"))
                        .property("escaped", Mapper::string().named("odata\\.type")),
                ),
            )
            .build()
            .unwrap();
        let s = json_serializer(registry);

        let pet = json!({"id": 7, "name": "Rex", "color": "brown", "escaped": "x"});
        let wire = s
            .serialize(&Mapper::reference("Pet"), Some(&pet), "pet", &opts())
            .unwrap()
            .unwrap();
        assert_eq!(
            wire,
            json!({"name": "Rex", "properties": {"color": "brown"}, "odata.type": "x"})
        );

        let back = s
            .deserialize(&Mapper::reference("Pet"), Some(&json!({"id": 7, "properties": {"weight": 3}})), "pet", &opts())
            .unwrap()
            .unwrap();
        assert_eq!(back, json!({"id": 7, "weight": 3}));
    }

    #[test]
    fn test_polymorphic_deserialize_uses_subtype() {
        let s = json_serializer(zoo());
        let body = json!({"kind": "dog", "name": "Rex", "properties": {"goodBoy": true}});

        let value = s
            .deserialize(&Mapper::reference("Animal"), Some(&body), "body", &opts())
            .unwrap()
            .unwrap();
        assert_eq!(value, json!({"kind": "dog", "name": "Rex", "good_boy": true}));
    }

    #[test]
    fn test_polymorphic_serialize_substitutes_discriminator() {
        let registry = zoo();
        let dog = registry.get("Dog").unwrap().clone();
        let s = json_serializer(registry);

        let wire = s
            .serialize(&dog, Some(&json!({"name": "Rex"})), "body", &opts())
            .unwrap()
            .unwrap();
        assert_eq!(wire, json!({"kind": "dog", "name": "Rex"}));
    }

    #[test]
    fn test_unclaimed_properties() {
        let s = json_serializer(MapperRegistry::empty());
        let plain = Mapper::composite(
            CompositeMapper::new("Plain").property("a", Mapper::number().named("a")),
        );
        let value = s
            .deserialize(&plain, Some(&json!({"a": 1, "extra": "x"})), "p", &opts())
            .unwrap();
        assert_eq!(value, Some(json!({"a": 1, "extra": "x"})));

        let catch_all = Mapper::composite(
            CompositeMapper::new("Open")
                .property("a", Mapper::number().named("a"))
                .additional_properties(Mapper::number()),
        );
        let value = s
            .deserialize(&catch_all, Some(&json!({"a": 1, "b": "2"})), "p", &opts())
            .unwrap();
        assert_eq!(value, Some(json!({"a": 1, "b": 2})));

        let wire = s
            .serialize(&catch_all, Some(&json!({"a": 1, "b": 2})), "p", &opts())
            .unwrap();
        assert_eq!(wire, Some(json!({"a": 1, "b": 2})));
        let err = s
            .serialize(&catch_all, Some(&json!({"a": 1, "b": "x"})), "p", &opts())
            .unwrap_err();
        assert!(err.to_string().starts_with("p[\"b\"] with value x"));
    }

    #[test]
    fn test_header_collection() {
        let s = json_serializer(MapperRegistry::empty());
        let headers = Mapper::composite(
            CompositeMapper::new("Headers")
                .property("etag", Mapper::string().named("etag"))
                .property(
                    "metadata",
                    Mapper::dictionary(Mapper::string()).header_collection_prefix("x-ms-meta-"),
                ),
        );
        let value = s
            .deserialize(
                &headers,
                Some(&json!({"etag": "abc", "x-ms-meta-color": "red", "x-ms-meta-size": "L"})),
                "headers",
                &opts(),
            )
            .unwrap();
        assert_eq!(
            value,
            Some(json!({"etag": "abc", "metadata": {"color": "red", "size": "L"}}))
        );
    }

    #[test]
    fn test_lenient_primitives() {
        let s = json_serializer(MapperRegistry::empty());
        assert_eq!(
            s.deserialize(&Mapper::number(), Some(&json!("42")), "n", &opts()).unwrap(),
            Some(json!(42))
        );
        assert_eq!(
            s.deserialize(&Mapper::number(), Some(&json!("abc")), "n", &opts()).unwrap(),
            Some(json!("abc"))
        );
        assert_eq!(
            s.deserialize(&Mapper::boolean(), Some(&json!("false")), "b", &opts()).unwrap(),
            Some(json!(false))
        );
        assert_eq!(
            s.deserialize(&Mapper::boolean(), Some(&json!("yes")), "b", &opts()).unwrap(),
            Some(json!("yes"))
        );
        let constant = Mapper::string().constant("fixed");
        assert_eq!(
            s.deserialize(&constant, Some(&json!("other")), "c", &opts()).unwrap(),
            Some(json!("fixed"))
        );
    }

    #[test]
    fn test_xml_sequences() {
        let s = xml_serializer(MapperRegistry::empty());
        let list = Mapper::sequence(Mapper::string());

        assert_eq!(s.deserialize(&list, None, "l", &opts()).unwrap(), Some(json!([])));
        assert_eq!(
            s.deserialize(&list, Some(&json!("only")), "l", &opts()).unwrap(),
            Some(json!(["only"]))
        );

        let namespaced = Mapper::sequence(Mapper::string().xml_namespace("urn:x", Some("x")));
        assert_eq!(
            s.serialize(&namespaced, Some(&json!(["a"])), "l", &opts()).unwrap(),
            Some(json!([{"_": "a", "$": {"xmlns:x": "urn:x"}}]))
        );
    }

    #[test]
    fn test_xml_composite() {
        let registry = MapperRegistry::builder()
            .mapper(
                "Container",
                Mapper::composite(
                    CompositeMapper::new("Container")
                        .property("name", Mapper::string().xml_name("Name"))
                        .property("version", Mapper::string().xml_name("version").xml_attribute())
                        .property(
                            "rules",
                            Mapper::sequence(Mapper::string())
                                .xml_name("Rules")
                                .xml_element_name("Rule")
                                .xml_wrapped(),
                        ),
                ),
            )
            .build()
            .unwrap();
        let s = xml_serializer(registry);
        let mapper = Mapper::reference("Container");

        let value = json!({"name": "box", "version": "2", "rules": ["a", "b"]});
        let wire = s.serialize(&mapper, Some(&value), "c", &opts()).unwrap().unwrap();
        assert_eq!(
            wire,
            json!({"Name": "box", "$": {"version": "2"}, "Rules": {"Rule": ["a", "b"]}})
        );

        let back = s.deserialize(&mapper, Some(&wire), "c", &opts()).unwrap().unwrap();
        assert_eq!(back, value);

        let missing = s
            .deserialize(&mapper, Some(&json!({"Name": "empty"})), "c", &opts())
            .unwrap()
            .unwrap();
        assert_eq!(missing, json!({"name": "empty", "rules": []}));
    }

    #[test]
    fn test_json_composite_round_trip() {
        let registry = MapperRegistry::builder()
            .mapper(
                "Owner",
                Mapper::composite(
                    CompositeMapper::new("Owner").property("name", Mapper::string().named("name")),
                ),
            )
            .mapper(
                "Listing",
                Mapper::composite(
                    CompositeMapper::new("Listing")
                        .property("id", Mapper::string().named("id").required())
                        .property("color", Mapper::string().named("properties.color"))
                        .property("weight", Mapper::number().named("properties.weight"))
                        .property(
                            "created",
                            Mapper::new(MapperType::DateTime).named("properties.created"),
                        )
                        .property("thumbnail", Mapper::new(MapperType::ByteArray).named("thumbnail"))
                        .property("tags", Mapper::sequence(Mapper::string()).named("tags"))
                        .property("owner", Mapper::reference("Owner").named("owner"))
                        .additional_properties(Mapper::string()),
                ),
            )
            .build()
            .unwrap();
        let s = json_serializer(registry);
        let mapper = Mapper::reference("Listing");

        let value = json!({
            "id": "1",
            "color": "brown",
            "weight": 3,
            "created": "1994-11-06T08:49:37.500Z",
            "thumbnail": [251, 255, 0],
            "tags": ["a", "b"],
            "owner": {"name": "Ann"},
            "nickname": "Rexy"
        });
        let wire = s.serialize(&mapper, Some(&value), "listing", &opts()).unwrap().unwrap();
        assert_eq!(
            wire,
            json!({
                "id": "1",
                "properties": {"color": "brown", "weight": 3, "created": "1994-11-06T08:49:37.500Z"},
                "thumbnail": "+/8A",
                "tags": ["a", "b"],
                "owner": {"name": "Ann"},
                "nickname": "Rexy"
            })
        );

        let back = s.deserialize(&mapper, Some(&wire), "listing", &opts()).unwrap().unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_xml_text_with_attributes_reduces_to_text() {
        let s = xml_serializer(MapperRegistry::empty());
        let value = s
            .deserialize(&Mapper::number(), Some(&json!({"$": {"unit": "kg"}, "_": "12"})), "w", &opts())
            .unwrap();
        assert_eq!(value, Some(json!(12)));
    }

    #[test]
    fn test_missing_model_is_configuration_error() {
        let s = json_serializer(MapperRegistry::empty());
        let err = s
            .serialize(&Mapper::reference("Ghost"), Some(&json!({})), "g", &opts())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: mapper() cannot be null or undefined for model \"Ghost\"."
        );
    }

    #[test]
    fn test_split_serialize_name() {
        assert_eq!(split_serialize_name("a.b"), vec!["a", "b"]);
        assert_eq!(split_serialize_name("a\\.b.c"), vec!["a.b", "c"]);
        assert!(split_serialize_name("").is_empty());
    }
}
