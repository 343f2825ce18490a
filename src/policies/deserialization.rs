//! Parses response bodies and maps them through the operation's response
//! specs.
//!
//! Parsing picks JSON or XML from the `Content-Type` header (an absent
//! header means JSON). When the request carries an operation, the parsed
//! body and headers are then deserialized with the mappers registered for
//! the response status. Statuses the operation does not expect, and those
//! flagged as errors, become [`Error::Http`] with the code and message
//! pulled out of the error body.

use crate::mapper::{Mapper, MapperType};
use crate::operation::{OperationResponseSpec, OperationSpec};
use crate::pipeline::{Next, Policy};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::serializer::{display_value, is_truthy, SerializerOptions};
use crate::xml::parse_xml;
use crate::{Error, Result};
use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::Method;
use serde_json::Value;

pub const DESERIALIZATION_POLICY_NAME: &str = "deserializationPolicy";

/// Content types treated as JSON or XML, compared case-insensitively
/// against each `;`-separated part of `Content-Type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedContentTypes {
    pub json: Vec<String>,
    pub xml: Vec<String>,
}

impl Default for ExpectedContentTypes {
    fn default() -> Self {
        Self {
            json: vec!["application/json".to_string(), "text/json".to_string()],
            xml: vec!["application/xml".to_string(), "application/atom+xml".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeserializationPolicyOptions {
    pub expected_content_types: ExpectedContentTypes,
    pub serializer_options: SerializerOptions,
}

/// Turns raw responses into parsed, mapped ones.
///
/// # Examples
///
/// ```
/// use restline::pipeline::{AddPolicyOptions, Pipeline, PipelinePhase};
/// use restline::policies::deserialization::DeserializationPolicy;
///
/// # fn main() -> Result<(), restline::Error> {
/// let mut pipeline = Pipeline::new();
/// pipeline.add_policy(
///     DeserializationPolicy::default(),
///     AddPolicyOptions::in_phase(PipelinePhase::Deserialize),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeserializationPolicy {
    options: DeserializationPolicyOptions,
}

impl DeserializationPolicy {
    pub fn new(options: DeserializationPolicyOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Policy for DeserializationPolicy {
    fn name(&self) -> &str {
        DESERIALIZATION_POLICY_NAME
    }

    async fn send_request(&self, request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        let response = next.send(request).await?;
        deserialize_response_body(&self.options, response)
    }
}

fn deserialize_response_body(
    options: &DeserializationPolicyOptions,
    response: PipelineResponse,
) -> Result<PipelineResponse> {
    let mut response = parse(options, response)?;

    let Some(operation) = response.request.operation.clone() else {
        return Ok(response);
    };
    if operation.arguments.options.request_options.should_deserialize == Some(false) {
        return Ok(response);
    }

    let spec = &operation.spec;
    let serializer_options = &options.serializer_options;
    let status = response.status.as_u16();
    let response_spec = spec.responses.get(&status);

    let expected = if spec.has_no_expected_statuses() {
        response.status.is_success()
    } else {
        response_spec.is_some()
    };
    if !expected || response_spec.is_some_and(|r| r.is_error) {
        return Err(error_response(response, spec, response_spec, serializer_options));
    }

    let Some(response_spec) = response_spec else {
        return Ok(response);
    };

    if spec.http_method == Method::HEAD {
        response.parsed_body = Some(Value::Bool(response.status.is_success()));
    } else if let Some(mapper) = &response_spec.body_mapper {
        let value = xml_list_value(spec, mapper, response.parsed_body.as_ref());
        match spec
            .serializer
            .deserialize(mapper, value.as_ref(), "operationRes.parsedBody", serializer_options)
        {
            Ok(body) => response.parsed_body = body,
            Err(e) => {
                let message = format!(
                    "Error {} occurred in deserializing the responseBody - {}",
                    e,
                    response.body_as_text.as_deref().unwrap_or_default()
                );
                tracing::error!(status, error = %e, "Failed to deserialize response body");
                return Err(Error::http(response, message));
            }
        }
    }

    if let Some(mapper) = &response_spec.headers_mapper {
        let headers = Value::Object(response.headers_json());
        response.parsed_headers = spec.serializer.deserialize(
            mapper,
            Some(&headers),
            "operationRes.parsedHeaders",
            serializer_options,
        )?;
    }

    Ok(response)
}

/// XML list bodies arrive as `{elementName: [...]}`; the mapper wants the list.
fn xml_list_value(spec: &OperationSpec, mapper: &Mapper, body: Option<&Value>) -> Option<Value> {
    if !spec.is_xml || !matches!(mapper.kind, MapperType::Sequence { .. }) {
        return body.cloned();
    }
    match body {
        Some(Value::Object(object)) => mapper
            .xml
            .element_name
            .as_deref()
            .and_then(|name| object.get(name))
            .cloned(),
        Some(Value::Array(_)) => None,
        _ => Some(Value::Array(Vec::new())),
    }
}

fn error_response(
    mut response: PipelineResponse,
    spec: &OperationSpec,
    response_spec: Option<&OperationResponseSpec>,
    options: &SerializerOptions,
) -> Error {
    let status = response.status.as_u16();
    let body_text = response.body_as_text.clone().unwrap_or_default();
    let mut message = if response.request.stream_response_status_codes.contains(&status) {
        format!("Unexpected status code: {}", status)
    } else {
        body_text.clone()
    };

    let Some(error_spec) = response_spec.or(spec.default_response.as_ref()) else {
        return Error::http(response, message);
    };

    let mut code = None;
    if let Err(e) = map_error(&mut response, spec, error_spec, options, &mut code, &mut message) {
        message = format!(
            "Error \"{}\" occurred in deserializing the responseBody - \"{}\" for the default response.",
            e, body_text
        );
    }

    tracing::debug!(status, code = ?code, "Operation returned an error response");
    Error::Http {
        status: response.status,
        code,
        message,
        response: Box::new(response),
        details: None,
        inner_error: None,
    }
}

/// Deserializes an error body and headers, pulling `code` and `message`
/// from `body.error`, the mapped error, or the body itself.
fn map_error(
    response: &mut PipelineResponse,
    spec: &OperationSpec,
    error_spec: &OperationResponseSpec,
    options: &SerializerOptions,
    code: &mut Option<String>,
    message: &mut String,
) -> Result<()> {
    if let Some(parsed_body) = response.parsed_body.clone().filter(is_truthy) {
        let deserialized = match &error_spec.body_mapper {
            Some(mapper) => {
                let value = xml_list_value(spec, mapper, Some(&parsed_body));
                spec.serializer
                    .deserialize(mapper, value.as_ref(), "error.response.parsedBody", options)?
            }
            None => None,
        };

        let internal = parsed_body
            .get("error")
            .filter(|e| is_truthy(e))
            .or(deserialized.as_ref().filter(|d| is_truthy(d)))
            .unwrap_or(&parsed_body);
        *code = internal
            .get("code")
            .filter(|c| !c.is_null())
            .map(display_value);
        if let Some(text) = internal.get("message").filter(|m| is_truthy(m)) {
            *message = display_value(text);
        }

        if error_spec.body_mapper.is_some() {
            response.parsed_body = deserialized;
        }
    }

    if let Some(mapper) = &error_spec.headers_mapper {
        let headers = Value::Object(response.headers_json());
        response.parsed_headers =
            spec.serializer
                .deserialize(mapper, Some(&headers), "operationRes.parsedHeaders", options)?;
    }
    Ok(())
}

/// Parses the body text as JSON or XML according to `Content-Type`.
fn parse(options: &DeserializationPolicyOptions, mut response: PipelineResponse) -> Result<PipelineResponse> {
    let status = response.status.as_u16();
    if response.request.stream_response_status_codes.contains(&status) {
        return Ok(response);
    }
    let Some(text) = response.body_as_text.as_deref().filter(|t| !t.is_empty()) else {
        return Ok(response);
    };

    let components: Vec<String> = response
        .header(CONTENT_TYPE.as_str())
        .filter(|c| !c.is_empty())
        .map(|c| c.split(';').map(|part| part.trim().to_lowercase()).collect())
        .unwrap_or_default();
    let matches_any = |types: &[String]| components.iter().any(|c| types.contains(c));
    let content_types = &options.expected_content_types;

    let parsed = if components.is_empty() || matches_any(&content_types.json) {
        serde_json::from_str::<Value>(text).map_err(|e| e.to_string())
    } else if matches_any(&content_types.xml) {
        parse_xml(text, &options.serializer_options.xml).map_err(|e| e.to_string())
    } else {
        return Ok(response);
    };

    match parsed {
        Ok(body) => {
            response.parsed_body = Some(body);
            Ok(response)
        }
        Err(message) => {
            tracing::error!(status, error = %message, "Failed to parse response body");
            Err(Error::Parse {
                message,
                status: response.status,
                raw_body: text.to_string(),
            })
        }
    }
}
