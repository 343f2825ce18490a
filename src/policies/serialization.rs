//! Builds request headers and the request body from the attached operation.

use crate::mapper::{Mapper, MapperType};
use crate::operation::{get_operation_argument_value, OperationArguments, OperationSpec};
use crate::pipeline::{Next, Policy};
use crate::request::{FormDataValue, PipelineRequest, RequestBody};
use crate::response::PipelineResponse;
use crate::serializer::{as_bytes, display_value, SerializerOptions, XmlOptions, XML_ATTRKEY};
use crate::xml::stringify_xml;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderName, HeaderValue};
use indexmap::IndexMap;
use serde_json::{Map, Value};

pub const SERIALIZATION_POLICY_NAME: &str = "serializationPolicy";

/// Serializes the header parameters and the body (or form fields) of the
/// request's operation. Requests without an operation pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializationPolicy;

#[async_trait]
impl Policy for SerializationPolicy {
    fn name(&self) -> &str {
        SERIALIZATION_POLICY_NAME
    }

    async fn send_request(&self, mut request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        if let Some(operation) = request.operation.clone() {
            serialize_headers(&mut request, &operation.arguments, &operation.spec)?;
            serialize_request_body(&mut request, &operation.arguments, &operation.spec)?;
        }
        next.send(request).await
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::Serialization(format!("\"{}\" is not a valid header name: {}", name, e)))
}

fn header_value(name: &str, value: &Value) -> Result<HeaderValue> {
    HeaderValue::from_str(&display_value(value))
        .map_err(|e| Error::Serialization(format!("Header \"{}\" has an invalid value: {}", name, e)))
}

/// Writes every header parameter that has a value (or is required), then
/// the caller's custom headers.
pub(crate) fn serialize_headers(
    request: &mut PipelineRequest,
    arguments: &OperationArguments,
    spec: &OperationSpec,
) -> Result<()> {
    for parameter in &spec.header_parameters {
        let mapper = &parameter.mapper;
        let value = get_operation_argument_value(arguments, parameter, None);
        if value.as_ref().map_or(true, Value::is_null) && !mapper.required {
            continue;
        }

        let path = parameter.path_string();
        let serialized =
            spec.serializer
                .serialize(mapper, value.as_ref(), &path, &SerializerOptions::default())?;
        let Some(serialized) = serialized else {
            continue;
        };

        match &mapper.header_collection_prefix {
            Some(prefix) => {
                let Value::Object(entries) = &serialized else {
                    return Err(Error::Validation(format!(
                        "{} must be a dictionary of header values.",
                        path
                    )));
                };
                for (key, entry) in entries {
                    let name = format!("{}{}", prefix, key);
                    request.headers.insert(header_name(&name)?, header_value(&name, entry)?);
                }
            }
            None => {
                let name = mapper.serialized_name.clone().unwrap_or(path);
                request.headers.insert(header_name(&name)?, header_value(&name, &serialized)?);
            }
        }
    }

    let custom_headers = &arguments.options.request_options.custom_headers;
    for name in custom_headers.keys() {
        request.headers.remove(name);
        for value in custom_headers.get_all(name) {
            request.headers.append(name.clone(), value.clone());
        }
    }
    Ok(())
}

/// Serializes the body parameter into `request.body`, or the form-data
/// parameters into `request.form_data`.
pub(crate) fn serialize_request_body(
    request: &mut PipelineRequest,
    arguments: &OperationArguments,
    spec: &OperationSpec,
) -> Result<()> {
    let options = &arguments.options.serializer_options;

    if let Some(parameter) = &spec.request_body {
        let mapper = &parameter.mapper;
        let value = get_operation_argument_value(arguments, parameter, None);
        let present = match &value {
            Some(Value::Null) => mapper.nullable == Some(true),
            Some(_) => true,
            None => false,
        };
        if !present && !mapper.required {
            return Ok(());
        }

        request.body = spec
            .serializer
            .serialize(mapper, value.as_ref(), &parameter.path_string(), options)
            .and_then(|serialized| encode_body(spec, mapper, serialized, options))
            .map_err(|e| {
                let name = mapper
                    .serialized_name
                    .as_deref()
                    .map_or_else(|| "undefined".to_string(), |n| format!("{:?}", n));
                let message = format!(
                    "Error \"{}\" occurred in serializing the payload - {}.",
                    e, name
                );
                match e {
                    Error::Validation(_) => Error::Validation(message),
                    _ => Error::Serialization(message),
                }
            })?;
    } else if !spec.form_data_parameters.is_empty() {
        let mut form = IndexMap::new();
        for parameter in &spec.form_data_parameters {
            let Some(value) = get_operation_argument_value(arguments, parameter, None)
                .filter(|v| !v.is_null())
            else {
                continue;
            };
            let path = parameter.path_string();
            let name = parameter.mapper.serialized_name.clone().unwrap_or_else(|| path.clone());
            if let Some(serialized) =
                spec.serializer
                    .serialize(&parameter.mapper, Some(&value), &path, options)?
            {
                form.insert(name, form_data_value(&parameter.mapper, serialized));
            }
        }
        request.form_data = Some(form);
    }
    Ok(())
}

fn encode_body(
    spec: &OperationSpec,
    mapper: &Mapper,
    serialized: Option<Value>,
    options: &SerializerOptions,
) -> Result<RequestBody> {
    let Some(serialized) = serialized else {
        return Ok(RequestBody::Empty);
    };

    if matches!(mapper.kind, MapperType::Stream) {
        return stream_bytes(&serialized).map(RequestBody::Bytes);
    }

    if spec.is_xml {
        let xmlns_key = mapper.xml.namespace_key();
        let root_name = mapper
            .xml
            .name
            .clone()
            .or_else(|| mapper.serialized_name.clone())
            .unwrap_or_default();
        let xml_options = XmlOptions {
            root_name: root_name.clone(),
            include_root: false,
            xml_char_key: options.xml.xml_char_key.clone(),
        };

        let document = match &mapper.kind {
            MapperType::Sequence { .. } => {
                let element_name = mapper.xml.element_name.clone().unwrap_or(root_name);
                let root = xml_root_list(serialized, element_name, &xmlns_key, mapper.xml.namespace.as_deref());
                stringify_xml(&root, &xml_options)?
            }
            MapperType::Composite(_) | MapperType::Dictionary { .. } => {
                stringify_xml(&serialized, &xml_options)?
            }
            _ => {
                let value = match &mapper.xml.namespace {
                    Some(namespace) => {
                        let mut object = Map::new();
                        object.insert(options.xml.xml_char_key.clone(), serialized);
                        object.insert(XML_ATTRKEY.to_string(), namespace_attribute(&xmlns_key, namespace));
                        Value::Object(object)
                    }
                    None => serialized,
                };
                stringify_xml(&value, &xml_options)?
            }
        };
        return Ok(RequestBody::from(document));
    }

    let plain_text = spec
        .content_type
        .as_deref()
        .is_some_and(|c| c.contains("text/plain"))
        || spec.media_type.as_deref() == Some("text");
    if matches!(mapper.kind, MapperType::String) && plain_text {
        if let Value::String(text) = serialized {
            return Ok(RequestBody::from(text));
        }
    }

    serde_json::to_string(&serialized)
        .map(RequestBody::from)
        .map_err(|e| Error::Serialization(e.to_string()))
}

fn namespace_attribute(xmlns_key: &str, namespace: &str) -> Value {
    let mut attribute = Map::new();
    attribute.insert(xmlns_key.to_string(), Value::String(namespace.to_string()));
    Value::Object(attribute)
}

/// Wraps a list body as `{element_name: [...]}` so each item becomes an
/// element under the document root.
fn xml_root_list(value: Value, element_name: String, xmlns_key: &str, namespace: Option<&str>) -> Value {
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    let mut root = Map::new();
    root.insert(element_name, Value::Array(items));
    if let Some(namespace) = namespace {
        root.insert(XML_ATTRKEY.to_string(), namespace_attribute(xmlns_key, namespace));
    }
    Value::Object(root)
}

fn stream_bytes(value: &Value) -> Result<Bytes> {
    match value {
        Value::String(text) => Ok(Bytes::from(text.clone())),
        other => as_bytes(other)
            .map(Bytes::from)
            .ok_or_else(|| Error::Validation("A stream body must be a string or a byte array.".to_string())),
    }
}

fn form_data_value(mapper: &Mapper, value: Value) -> FormDataValue {
    match (&mapper.kind, value) {
        (MapperType::Stream, value) if value.is_array() => match as_bytes(&value) {
            Some(data) => FormDataValue::File {
                data: Bytes::from(data),
                file_name: None,
                content_type: None,
            },
            None => FormDataValue::Text(display_value(&value)),
        },
        (MapperType::Sequence { element }, Value::Array(items)) => FormDataValue::List(
            items
                .into_iter()
                .map(|item| form_data_value(element, item))
                .collect(),
        ),
        (_, Value::String(text)) => FormDataValue::Text(text),
        (_, other) => FormDataValue::Text(display_value(&other)),
    }
}
