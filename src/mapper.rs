//! Declarative descriptions of how values map to and from the wire.
//!
//! A [`Mapper`] describes one value: its kind, the name it is serialized
//! under, its presence rules and constraints, and XML placement. Composite
//! mappers that only carry a class name are resolved through a
//! [`MapperRegistry`], which also owns the read-only discriminator table used
//! to pick polymorphic subtypes.
//!
//! # Examples
//!
//! ```
//! use restline::mapper::{CompositeMapper, Mapper, MapperRegistry};
//!
//! let animal = Mapper::composite(
//!     CompositeMapper::new("Animal")
//!         .discriminator("kind", "kind")
//!         .property("kind", Mapper::string().named("kind").required())
//!         .property("name", Mapper::string().named("name")),
//! )
//! .named("Animal");
//!
//! let dog = Mapper::composite(
//!     CompositeMapper::new("Dog")
//!         .uber_parent("Animal")
//!         .property("kind", Mapper::string().named("kind").required())
//!         .property("name", Mapper::string().named("name"))
//!         .property("barks", Mapper::boolean().named("barks")),
//! )
//! .named("dog");
//!
//! let registry = MapperRegistry::builder()
//!     .mapper("Animal", animal)
//!     .mapper("Dog", dog)
//!     .build()
//!     .unwrap();
//!
//! assert!(registry.discriminator("Animal.dog").is_some());
//! ```

use crate::{Error, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// The kind of value a [`Mapper`] describes.
#[derive(Debug, Clone, Default)]
pub enum MapperType {
    /// Any value, passed through untouched.
    #[default]
    Any,
    /// A JSON number.
    Number,
    /// A string.
    String,
    /// A boolean.
    Boolean,
    /// An arbitrary object, passed through untouched.
    Object,
    /// A raw body: a string or a byte array.
    Stream,
    /// A string holding a UUID.
    Uuid,
    /// One of a fixed set of values. Strings compare case-insensitively.
    Enum {
        /// The accepted values.
        allowed_values: Vec<Value>,
    },
    /// A calendar date, `YYYY-MM-DD` on the wire.
    Date,
    /// An ISO 8601 timestamp.
    DateTime,
    /// An RFC 1123 (HTTP-date) timestamp.
    DateTimeRfc1123,
    /// Seconds since the Unix epoch.
    UnixTime,
    /// An ISO 8601 duration such as `P1DT2H`.
    TimeSpan,
    /// Bytes, base64-encoded on the wire.
    ByteArray,
    /// Bytes, URL-safe base64 without padding on the wire.
    Base64Url,
    /// A list whose items are described by `element`.
    Sequence {
        /// The item mapper.
        element: Box<Mapper>,
    },
    /// A string-keyed map whose values are described by `value`.
    Dictionary {
        /// The value mapper.
        value: Box<Mapper>,
    },
    /// An object with individually mapped properties.
    Composite(CompositeMapper),
}

impl MapperType {
    /// Returns the canonical name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            MapperType::Any => "any",
            MapperType::Number => "Number",
            MapperType::String => "String",
            MapperType::Boolean => "Boolean",
            MapperType::Object => "Object",
            MapperType::Stream => "Stream",
            MapperType::Uuid => "Uuid",
            MapperType::Enum { .. } => "Enum",
            MapperType::Date => "Date",
            MapperType::DateTime => "DateTime",
            MapperType::DateTimeRfc1123 => "DateTimeRfc1123",
            MapperType::UnixTime => "UnixTime",
            MapperType::TimeSpan => "TimeSpan",
            MapperType::ByteArray => "ByteArray",
            MapperType::Base64Url => "Base64Url",
            MapperType::Sequence { .. } => "Sequence",
            MapperType::Dictionary { .. } => "Dictionary",
            MapperType::Composite(_) => "Composite",
        }
    }
}

/// Names the property that selects a polymorphic subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolymorphicDiscriminator {
    /// The property name on the wire.
    pub serialized_name: String,
    /// The property name in memory.
    pub client_name: String,
}

/// Shape of a [`MapperType::Composite`] value.
#[derive(Debug, Clone, Default)]
pub struct CompositeMapper {
    /// Registry key of the model. Used to resolve properties when
    /// `model_properties` is absent.
    pub class_name: Option<String>,
    /// Mapped properties, keyed by their in-memory name.
    pub model_properties: Option<IndexMap<String, Mapper>>,
    /// Catch-all mapper for properties the model does not declare.
    pub additional_properties: Option<Box<Mapper>>,
    /// Root of the polymorphic hierarchy this model belongs to.
    pub uber_parent: Option<String>,
    /// Present on the root of a polymorphic hierarchy.
    pub polymorphic_discriminator: Option<PolymorphicDiscriminator>,
}

impl CompositeMapper {
    /// Creates a composite with the given class name and no properties yet.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: Some(class_name.into()),
            ..Default::default()
        }
    }

    /// Adds a mapped property.
    pub fn property(mut self, name: impl Into<String>, mapper: Mapper) -> Self {
        self.model_properties
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), mapper);
        self
    }

    /// Sets the catch-all mapper for undeclared properties.
    pub fn additional_properties(mut self, mapper: Mapper) -> Self {
        self.additional_properties = Some(Box::new(mapper));
        self
    }

    /// Sets the root of the polymorphic hierarchy.
    pub fn uber_parent(mut self, parent: impl Into<String>) -> Self {
        self.uber_parent = Some(parent.into());
        self
    }

    /// Marks this model as the root of a polymorphic hierarchy.
    pub fn discriminator(
        mut self,
        serialized_name: impl Into<String>,
        client_name: impl Into<String>,
    ) -> Self {
        self.polymorphic_discriminator = Some(PolymorphicDiscriminator {
            serialized_name: serialized_name.into(),
            client_name: client_name.into(),
        });
        self
    }
}

/// Validation rules checked before a value is serialized.
#[derive(Debug, Clone, Default)]
pub struct MapperConstraints {
    pub exclusive_maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub inclusive_maximum: Option<f64>,
    pub inclusive_minimum: Option<f64>,
    pub max_items: Option<usize>,
    pub min_items: Option<usize>,
    pub max_length: Option<usize>,
    pub min_length: Option<usize>,
    pub multiple_of: Option<f64>,
    pub pattern: Option<Regex>,
    pub unique_items: bool,
}

impl MapperConstraints {
    /// Compiles `pattern` into a constraint.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is not a valid regular expression.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::ConfigurationError(format!("Invalid pattern: {}", e)))?;
        self.pattern = Some(regex);
        Ok(self)
    }
}

/// XML placement of a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlMetadata {
    /// Element (or attribute) name.
    pub name: Option<String>,
    /// Name of each item element of a wrapped list.
    pub element_name: Option<String>,
    pub namespace: Option<String>,
    pub namespace_prefix: Option<String>,
    /// Serialize as an attribute instead of an element.
    pub is_attribute: bool,
    /// Items are nested inside a wrapper element named `name`.
    pub is_wrapped: bool,
}

impl XmlMetadata {
    /// The attribute key that declares this value's namespace.
    pub(crate) fn namespace_key(&self) -> String {
        match &self.namespace_prefix {
            Some(prefix) => format!("xmlns:{}", prefix),
            None => "xmlns".to_string(),
        }
    }
}

/// Describes the wire shape of one value.
#[derive(Debug, Clone, Default)]
pub struct Mapper {
    pub serialized_name: Option<String>,
    pub kind: MapperType,
    pub required: bool,
    /// `Some(false)` forbids `null` even for optional values.
    pub nullable: Option<bool>,
    /// Read-only properties are never serialized.
    pub read_only: bool,
    /// Constant mappers always use `default_value`.
    pub is_constant: bool,
    pub default_value: Option<Value>,
    pub constraints: Option<MapperConstraints>,
    pub xml: XmlMetadata,
    /// Gathers every header starting with this prefix into a dictionary.
    pub header_collection_prefix: Option<String>,
}

impl Mapper {
    /// Creates a mapper of the given kind.
    pub fn new(kind: MapperType) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn any() -> Self {
        Self::new(MapperType::Any)
    }

    pub fn string() -> Self {
        Self::new(MapperType::String)
    }

    pub fn number() -> Self {
        Self::new(MapperType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(MapperType::Boolean)
    }

    /// An enum accepting the given values.
    pub fn enumeration<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(MapperType::Enum {
            allowed_values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// A list of `element` values.
    pub fn sequence(element: Mapper) -> Self {
        Self::new(MapperType::Sequence {
            element: Box::new(element),
        })
    }

    /// A string-keyed map of `value` values.
    pub fn dictionary(value: Mapper) -> Self {
        Self::new(MapperType::Dictionary {
            value: Box::new(value),
        })
    }

    /// An object described by `composite`.
    pub fn composite(composite: CompositeMapper) -> Self {
        Self::new(MapperType::Composite(composite))
    }

    /// A composite that is resolved through the registry by class name.
    pub fn reference(class_name: impl Into<String>) -> Self {
        Self::composite(CompositeMapper::new(class_name))
    }

    /// Sets the serialized name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.serialized_name = Some(name.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Makes this mapper always produce `value`.
    pub fn constant(mut self, value: impl Into<Value>) -> Self {
        self.is_constant = true;
        self.default_value = Some(value.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn constraints(mut self, constraints: MapperConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn xml_name(mut self, name: impl Into<String>) -> Self {
        self.xml.name = Some(name.into());
        self
    }

    pub fn xml_element_name(mut self, name: impl Into<String>) -> Self {
        self.xml.element_name = Some(name.into());
        self
    }

    pub fn xml_namespace(mut self, namespace: impl Into<String>, prefix: Option<&str>) -> Self {
        self.xml.namespace = Some(namespace.into());
        self.xml.namespace_prefix = prefix.map(str::to_string);
        self
    }

    pub fn xml_attribute(mut self) -> Self {
        self.xml.is_attribute = true;
        self
    }

    pub fn xml_wrapped(mut self) -> Self {
        self.xml.is_wrapped = true;
        self
    }

    pub fn header_collection_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.header_collection_prefix = Some(prefix.into());
        self
    }

    /// Returns the composite shape, if this is a composite mapper.
    pub fn as_composite(&self) -> Option<&CompositeMapper> {
        match &self.kind {
            MapperType::Composite(composite) => Some(composite),
            _ => None,
        }
    }

    /// The serialized name, or `""` when unset.
    pub(crate) fn serialized_name_or_empty(&self) -> &str {
        self.serialized_name.as_deref().unwrap_or_default()
    }
}

/// Immutable set of named model mappers plus the discriminator table.
///
/// Discriminator keys have the form `ParentClass.DiscriminatorValue`. Every
/// composite registered with an `uber_parent` and a serialized name gets an
/// entry automatically; explicit entries win over derived ones.
#[derive(Debug, Clone, Default)]
pub struct MapperRegistry {
    mappers: HashMap<String, Mapper>,
    discriminators: HashMap<String, Mapper>,
}

impl MapperRegistry {
    /// Creates a new builder.
    pub fn builder() -> MapperRegistryBuilder {
        MapperRegistryBuilder::default()
    }

    /// An empty registry, for operations that only use inline mappers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Looks up a model mapper by class name.
    pub fn get(&self, class_name: &str) -> Option<&Mapper> {
        self.mappers.get(class_name)
    }

    /// Looks up a subtype by `Parent.value` key.
    pub fn discriminator(&self, key: &str) -> Option<&Mapper> {
        self.discriminators.get(key)
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

/// Builder for [`MapperRegistry`].
#[derive(Debug, Default)]
pub struct MapperRegistryBuilder {
    mappers: HashMap<String, Mapper>,
    discriminators: HashMap<String, Mapper>,
}

impl MapperRegistryBuilder {
    /// Registers a model mapper under `class_name`.
    pub fn mapper(mut self, class_name: impl Into<String>, mapper: Mapper) -> Self {
        self.mappers.insert(class_name.into(), mapper);
        self
    }

    /// Registers an explicit discriminator entry.
    pub fn discriminator(mut self, key: impl Into<String>, mapper: Mapper) -> Self {
        self.discriminators.insert(key.into(), mapper);
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if any composite refers to a
    /// class name that is not registered.
    pub fn build(self) -> Result<MapperRegistry> {
        let MapperRegistryBuilder {
            mappers,
            mut discriminators,
        } = self;

        for mapper in mappers.values() {
            let Some(composite) = mapper.as_composite() else {
                continue;
            };
            if let (Some(parent), Some(name)) = (&composite.uber_parent, &mapper.serialized_name) {
                let key = if name == parent {
                    name.clone()
                } else {
                    format!("{}.{}", parent, name)
                };
                discriminators.entry(key).or_insert_with(|| mapper.clone());
            }
        }

        for (name, mapper) in mappers.iter().chain(discriminators.iter()) {
            check_references(&mappers, mapper, name)?;
        }

        tracing::debug!(
            mappers = mappers.len(),
            discriminators = discriminators.len(),
            "Built mapper registry"
        );

        Ok(MapperRegistry {
            mappers,
            discriminators,
        })
    }
}

fn check_references(mappers: &HashMap<String, Mapper>, mapper: &Mapper, owner: &str) -> Result<()> {
    match &mapper.kind {
        MapperType::Sequence { element } => check_references(mappers, element, owner),
        MapperType::Dictionary { value } => check_references(mappers, value, owner),
        MapperType::Composite(composite) => {
            if let Some(parent) = &composite.uber_parent {
                if !mappers.contains_key(parent) {
                    return Err(Error::ConfigurationError(format!(
                        "Mapper \"{}\" names unregistered uber parent \"{}\"",
                        owner, parent
                    )));
                }
            }
            match &composite.model_properties {
                Some(properties) => {
                    for property in properties.values() {
                        check_references(mappers, property, owner)?;
                    }
                }
                None => {
                    let class_name = composite.class_name.as_deref().unwrap_or_default();
                    if !mappers.contains_key(class_name) {
                        return Err(Error::ConfigurationError(format!(
                            "Mapper \"{}\" refers to unregistered model \"{}\"",
                            owner, class_name
                        )));
                    }
                }
            }
            if let Some(additional) = &composite.additional_properties {
                check_references(mappers, additional, owner)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
