//! Operation descriptions and the arguments a call is made with.
//!
//! An [`OperationSpec`] is the static description of one REST operation:
//! method, path template, where each parameter goes and which mapper
//! describes it, and how each response status is mapped. The
//! [`OperationArguments`] of a call hold the actual values.

use crate::mapper::Mapper;
use crate::request::{AbortSignal, TransferProgress};
use crate::serializer::{Serializer, SerializerOptions};
use crate::{Error, Result};
use http::{HeaderMap, Method};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Where a parameter's value is found in the argument bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterPath {
    /// A top-level argument.
    Name(String),
    /// A nested argument such as `["options", "top"]`.
    Path(Vec<String>),
    /// An object assembled from several arguments, keyed by property name.
    Composite(IndexMap<String, ParameterPath>),
}

impl ParameterPath {
    /// Builds a nested path from its segments.
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParameterPath::Path(segments.into_iter().map(Into::into).collect())
    }

    /// A path into the `options` bag.
    pub fn option(name: impl Into<String>) -> Self {
        ParameterPath::Path(vec!["options".to_string(), name.into()])
    }
}

impl From<&str> for ParameterPath {
    fn from(name: &str) -> Self {
        ParameterPath::Name(name.to_string())
    }
}

impl From<String> for ParameterPath {
    fn from(name: String) -> Self {
        ParameterPath::Name(name)
    }
}

/// How a list-valued query parameter is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionFormat {
    /// Comma separated, joined after encoding.
    Csv,
    /// Space separated, joined before encoding.
    Ssv,
    /// Tab separated, joined before encoding.
    Tsv,
    /// Pipe separated, joined after encoding.
    Pipes,
    /// One `name=value` pair per item.
    Multi,
}

impl CollectionFormat {
    pub(crate) fn delimiter(self) -> &'static str {
        match self {
            CollectionFormat::Csv => ",",
            CollectionFormat::Ssv => " ",
            CollectionFormat::Tsv => "\t",
            CollectionFormat::Pipes => "|",
            CollectionFormat::Multi => "",
        }
    }
}

/// One parameter of an operation.
#[derive(Debug, Clone)]
pub struct OperationParameter {
    pub parameter_path: ParameterPath,
    pub mapper: Mapper,
    /// Insert the value into the URL without percent-encoding it.
    pub skip_encoding: bool,
    pub collection_format: Option<CollectionFormat>,
}

impl OperationParameter {
    pub fn new(parameter_path: impl Into<ParameterPath>, mapper: Mapper) -> Self {
        Self {
            parameter_path: parameter_path.into(),
            mapper,
            skip_encoding: false,
            collection_format: None,
        }
    }

    pub fn skip_encoding(mut self) -> Self {
        self.skip_encoding = true;
        self
    }

    pub fn collection_format(mut self, format: CollectionFormat) -> Self {
        self.collection_format = Some(format);
        self
    }

    /// The parameter's path as a dotted string, used in error messages.
    pub fn path_string(&self) -> String {
        match &self.parameter_path {
            ParameterPath::Name(name) => name.clone(),
            ParameterPath::Path(segments) => segments.join("."),
            ParameterPath::Composite(_) => self.mapper.serialized_name_or_empty().to_string(),
        }
    }
}

/// How one response status is mapped.
#[derive(Debug, Clone, Default)]
pub struct OperationResponseSpec {
    pub body_mapper: Option<Mapper>,
    pub headers_mapper: Option<Mapper>,
    /// Treat this status as an error even though it is listed.
    pub is_error: bool,
}

impl OperationResponseSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(mut self, mapper: Mapper) -> Self {
        self.body_mapper = Some(mapper);
        self
    }

    pub fn headers(mut self, mapper: Mapper) -> Self {
        self.headers_mapper = Some(mapper);
        self
    }

    pub fn error(mut self) -> Self {
        self.is_error = true;
        self
    }
}

/// Static description of a REST operation.
///
/// # Examples
///
/// ```
/// use http::Method;
/// use restline::mapper::{Mapper, MapperRegistry};
/// use restline::operation::{OperationParameter, OperationResponseSpec, OperationSpec};
/// use restline::serializer::Serializer;
/// use std::sync::Arc;
///
/// let serializer = Serializer::new(Arc::new(MapperRegistry::empty()), false);
/// let spec = OperationSpec::new(Method::GET, serializer)
///     .path("/pets/{petId}")
///     .url_parameter(OperationParameter::new(
///         "petId",
///         Mapper::string().named("petId").required(),
///     ))
///     .response(200, OperationResponseSpec::new().body(Mapper::any()));
///
/// assert!(spec.response_for(200).is_some());
/// assert!(spec.response_for(404).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub http_method: Method,
    /// Path template appended to the base URL. `{name}` placeholders are
    /// replaced by URL parameters.
    pub path: Option<String>,
    /// Overrides the client's base URI.
    pub base_url: Option<String>,
    pub url_parameters: Vec<OperationParameter>,
    pub query_parameters: Vec<OperationParameter>,
    pub header_parameters: Vec<OperationParameter>,
    pub request_body: Option<OperationParameter>,
    pub form_data_parameters: Vec<OperationParameter>,
    pub content_type: Option<String>,
    /// Body encoding hint, e.g. `"json"`, `"xml"`, `"text"` or `"binary"`.
    pub media_type: Option<String>,
    pub is_xml: bool,
    pub responses: HashMap<u16, OperationResponseSpec>,
    pub default_response: Option<OperationResponseSpec>,
    pub serializer: Serializer,
}

impl OperationSpec {
    pub fn new(http_method: Method, serializer: Serializer) -> Self {
        Self {
            http_method,
            path: None,
            base_url: None,
            url_parameters: Vec::new(),
            query_parameters: Vec::new(),
            header_parameters: Vec::new(),
            request_body: None,
            form_data_parameters: Vec::new(),
            content_type: None,
            media_type: None,
            is_xml: false,
            responses: HashMap::new(),
            default_response: None,
            serializer,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn url_parameter(mut self, parameter: OperationParameter) -> Self {
        self.url_parameters.push(parameter);
        self
    }

    pub fn query_parameter(mut self, parameter: OperationParameter) -> Self {
        self.query_parameters.push(parameter);
        self
    }

    pub fn header_parameter(mut self, parameter: OperationParameter) -> Self {
        self.header_parameters.push(parameter);
        self
    }

    pub fn request_body(mut self, parameter: OperationParameter) -> Self {
        self.request_body = Some(parameter);
        self
    }

    pub fn form_data_parameter(mut self, parameter: OperationParameter) -> Self {
        self.form_data_parameters.push(parameter);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Marks the operation's bodies as XML.
    pub fn xml(mut self) -> Self {
        self.is_xml = true;
        self
    }

    pub fn response(mut self, status: u16, response: OperationResponseSpec) -> Self {
        self.responses.insert(status, response);
        self
    }

    pub fn default_response(mut self, response: OperationResponseSpec) -> Self {
        self.default_response = Some(response);
        self
    }

    /// The response for `status`, falling back to the default response.
    pub fn response_for(&self, status: u16) -> Option<&OperationResponseSpec> {
        self.responses
            .get(&status)
            .or(self.default_response.as_ref())
    }

    /// `true` when no explicit status is listed, only (at most) a default.
    pub fn has_no_expected_statuses(&self) -> bool {
        self.responses.is_empty()
    }

    /// Statuses whose body should be handed back unbuffered.
    pub fn streaming_status_codes(&self) -> HashSet<u16> {
        self.responses
            .iter()
            .filter(|(_, response)| {
                response
                    .body_mapper
                    .as_ref()
                    .is_some_and(|m| matches!(m.kind, crate::mapper::MapperType::Stream))
            })
            .map(|(status, _)| *status)
            .collect()
    }
}

/// Per-call request settings.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    /// Headers applied after all operation headers.
    pub custom_headers: HeaderMap,
    /// `Some(false)` returns the raw response without mapping it.
    pub should_deserialize: Option<bool>,
    pub allow_insecure_connection: Option<bool>,
    /// Receives upload and download progress.
    pub progress: Option<UnboundedSender<TransferProgress>>,
}

/// Options bag passed alongside the operation arguments.
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    /// Optional parameter values, addressed as `["options", name]`.
    pub values: Map<String, Value>,
    pub request_options: RequestOptions,
    pub abort_signal: Option<AbortSignal>,
    pub serializer_options: SerializerOptions,
}

impl OperationOptions {
    /// Sets an optional parameter value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `value` cannot be represented as JSON.
    pub fn with<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.values.insert(name.into(), value);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request_options.timeout = Some(timeout);
        self
    }

    pub fn abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort_signal = Some(signal);
        self
    }
}

/// The values an operation is called with.
///
/// # Examples
///
/// ```
/// use restline::operation::OperationArguments;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct NewPet { name: String }
///
/// # fn example() -> Result<(), restline::Error> {
/// let args = OperationArguments::new()
///     .with("petId", "rex")?
///     .with("pet", NewPet { name: "Rex".to_string() })?;
/// assert_eq!(args.values["petId"], "rex");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct OperationArguments {
    pub values: Map<String, Value>,
    pub options: OperationOptions,
}

impl OperationArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an argument from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `value` cannot be represented as JSON.
    pub fn with<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.values.insert(name.into(), value);
        Ok(self)
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }

    fn lookup(&self, segments: &[String]) -> Option<&Value> {
        match segments {
            [first, rest @ ..] if first == "options" && !rest.is_empty() => {
                lookup_segments(&self.options.values, rest)
            }
            [name] => self
                .values
                .get(name)
                .or_else(|| self.options.values.get(name)),
            _ => lookup_segments(&self.values, segments),
        }
    }
}

fn lookup_segments<'a>(root: &'a Map<String, Value>, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = root.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Resolves the value of `parameter` for a call.
///
/// Constant mappers always yield their default. Otherwise the path is looked
/// up in the arguments, then in `fallback` (the client's own properties).
/// A missing value falls back to the mapper's default when the parameter is
/// required or is a direct `["options", name]` path. Composite paths gather
/// each resolved property into an object.
pub fn get_operation_argument_value(
    arguments: &OperationArguments,
    parameter: &OperationParameter,
    fallback: Option<&Map<String, Value>>,
) -> Option<Value> {
    value_for_path(arguments, &parameter.parameter_path, &parameter.mapper, fallback)
}

fn value_for_path(
    arguments: &OperationArguments,
    path: &ParameterPath,
    mapper: &Mapper,
    fallback: Option<&Map<String, Value>>,
) -> Option<Value> {
    match path {
        ParameterPath::Name(name) => {
            value_for_segments(arguments, std::slice::from_ref(name), mapper, fallback)
        }
        ParameterPath::Path(segments) => value_for_segments(arguments, segments, mapper, fallback),
        ParameterPath::Composite(properties) => {
            let mut value = mapper.required.then(Map::new);
            let property_mappers = mapper
                .as_composite()
                .and_then(|c| c.model_properties.as_ref());
            let any = Mapper::any();
            for (name, property_path) in properties {
                let property_mapper = property_mappers
                    .and_then(|p| p.get(name))
                    .unwrap_or(&any);
                if let Some(property_value) =
                    value_for_path(arguments, property_path, property_mapper, fallback)
                {
                    value
                        .get_or_insert_with(Map::new)
                        .insert(name.clone(), property_value);
                }
            }
            value.map(Value::Object)
        }
    }
}

fn value_for_segments(
    arguments: &OperationArguments,
    segments: &[String],
    mapper: &Mapper,
    fallback: Option<&Map<String, Value>>,
) -> Option<Value> {
    if segments.is_empty() {
        return None;
    }
    if mapper.is_constant {
        return mapper.default_value.clone();
    }

    let found = arguments
        .lookup(segments)
        .or_else(|| fallback.and_then(|f| lookup_segments(f, segments)));
    match found {
        Some(value) => Some(value.clone()),
        None => {
            let optional_option = segments.len() == 2 && segments[0] == "options";
            if mapper.required || optional_option {
                mapper.default_value.clone()
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::CompositeMapper;
    use serde_json::json;

    #[test]
    fn test_lookup_order() {
        let args = OperationArguments::new()
            .with("a", 1)
            .unwrap()
            .options(OperationOptions::default().with("b", 2).unwrap());
        let mut fallback = Map::new();
        fallback.insert("c".to_string(), json!(3));
        fallback.insert("a".to_string(), json!(100));

        let value = |name: &str| {
            get_operation_argument_value(
                &args,
                &OperationParameter::new(name, Mapper::number()),
                Some(&fallback),
            )
        };
        assert_eq!(value("a"), Some(json!(1)));
        assert_eq!(value("b"), Some(json!(2)));
        assert_eq!(value("c"), Some(json!(3)));
        assert_eq!(value("d"), None);
    }

    #[test]
    fn test_defaults() {
        let args = OperationArguments::new().with("version", "v9").unwrap();

        let constant = OperationParameter::new("version", Mapper::string().constant("2021-01-01"));
        assert_eq!(
            get_operation_argument_value(&args, &constant, None),
            Some(json!("2021-01-01"))
        );

        let required = OperationParameter::new("top", Mapper::number().required().default_value(10));
        assert_eq!(get_operation_argument_value(&args, &required, None), Some(json!(10)));

        let optional_option = OperationParameter::new(
            ParameterPath::option("skip"),
            Mapper::number().default_value(0),
        );
        assert_eq!(
            get_operation_argument_value(&args, &optional_option, None),
            Some(json!(0))
        );

        let optional = OperationParameter::new("skip", Mapper::number().default_value(0));
        assert_eq!(get_operation_argument_value(&args, &optional, None), None);
    }

    #[test]
    fn test_nested_and_null_paths() {
        let args = OperationArguments::new()
            .with_value("outer", json!({"inner": {"leaf": "x"}}))
            .with_value("empty", Value::Null);

        let nested = OperationParameter::new(
            ParameterPath::path(["outer", "inner", "leaf"]),
            Mapper::string(),
        );
        assert_eq!(get_operation_argument_value(&args, &nested, None), Some(json!("x")));

        let null = OperationParameter::new("empty", Mapper::string());
        assert_eq!(get_operation_argument_value(&args, &null, None), Some(Value::Null));

        let through_null = OperationParameter::new(
            ParameterPath::path(["empty", "leaf"]),
            Mapper::string(),
        );
        assert_eq!(get_operation_argument_value(&args, &through_null, None), None);
    }

    #[test]
    fn test_composite_path() {
        let args = OperationArguments::new().with("ifMatch", "etag").unwrap();
        let mut properties = IndexMap::new();
        properties.insert("if_match".to_string(), ParameterPath::from("ifMatch"));
        properties.insert("if_none_match".to_string(), ParameterPath::from("ifNoneMatch"));

        let mapper = Mapper::composite(
            CompositeMapper::new("Conditions")
                .property("if_match", Mapper::string())
                .property("if_none_match", Mapper::string()),
        );
        let parameter = OperationParameter::new(ParameterPath::Composite(properties.clone()), mapper.clone());
        assert_eq!(
            get_operation_argument_value(&OperationArguments::new(), &parameter, None),
            None
        );
        assert_eq!(
            get_operation_argument_value(&args, &parameter, None),
            Some(json!({"if_match": "etag"}))
        );

        let required = OperationParameter::new(ParameterPath::Composite(properties), mapper.required());
        assert_eq!(
            get_operation_argument_value(&OperationArguments::new(), &required, None),
            Some(json!({}))
        );
    }

    #[test]
    fn test_streaming_status_codes() {
        let serializer = Serializer::new(std::sync::Arc::new(crate::mapper::MapperRegistry::empty()), false);
        let spec = OperationSpec::new(Method::GET, serializer)
            .response(200, OperationResponseSpec::new().body(Mapper::new(crate::mapper::MapperType::Stream)))
            .response(201, OperationResponseSpec::new().body(Mapper::string()))
            .default_response(OperationResponseSpec::new().error());

        assert_eq!(spec.streaming_status_codes(), HashSet::from([200]));
        assert!(spec.response_for(500).unwrap().is_error);
        assert!(!spec.has_no_expected_statuses());
        assert_eq!(
            OperationParameter::new(ParameterPath::path(["a", "b"]), Mapper::any()).path_string(),
            "a.b"
        );
    }
}
