//! Responses, both as they flow back through the pipeline and as they are
//! handed to callers.
//!
//! A [`PipelineResponse`] is the raw record policies see: status, headers,
//! the buffered body text (or a [`BodyStream`]), and the parsed body and
//! headers once the deserialization policy has run. The service client then
//! flattens it into a [`Response`] whose `data` merges the parsed headers and
//! body the way the operation's response spec describes.

use crate::mapper::MapperType;
use crate::operation::OperationResponseSpec;
use crate::request::PipelineRequest;
use crate::serializer::is_truthy;
use crate::{Error, Result};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// An unbuffered response body.
///
/// Returned for statuses the operation maps to a `Stream` body.
pub struct BodyStream {
    inner: Mutex<reqwest::Response>,
}

impl BodyStream {
    pub(crate) fn new(response: reqwest::Response) -> Self {
        Self {
            inner: Mutex::new(response),
        }
    }

    /// Reads the next chunk, or `None` at the end of the body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestSend`] if the connection fails mid-body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        let response = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        response
            .chunk()
            .await
            .map_err(|e| crate::transport::request_send_error(&e))
    }

    /// Reads the remaining body into memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestSend`] if the connection fails mid-body.
    pub async fn bytes(self) -> Result<Bytes> {
        let response = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        response
            .bytes()
            .await
            .map_err(|e| crate::transport::request_send_error(&e))
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream").finish_non_exhaustive()
    }
}

/// A response on its way back through the pipeline.
#[derive(Debug)]
pub struct PipelineResponse {
    /// The request that produced this response.
    pub request: PipelineRequest,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// The buffered body, absent for `HEAD` and streamed responses.
    pub body_as_text: Option<String>,
    pub body_stream: Option<BodyStream>,
    /// The body after parsing (and mapping, when an operation is attached).
    pub parsed_body: Option<Value>,
    /// The headers mapped through the operation's headers mapper.
    pub parsed_headers: Option<Value>,
}

impl PipelineResponse {
    pub fn new(request: PipelineRequest, status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            request,
            status,
            headers,
            body_as_text: None,
            body_stream: None,
            parsed_body: None,
            parsed_headers: None,
        }
    }

    /// Sets the buffered body text.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body_as_text = Some(body.into());
        self
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The headers as a JSON object with lower-case names. Repeated headers
    /// are joined with `", "`.
    pub fn headers_json(&self) -> Map<String, Value> {
        let mut object = Map::new();
        for name in self.headers.keys() {
            let joined = self
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            object.insert(name.as_str().to_string(), Value::String(joined));
        }
        object
    }
}

/// A successful operation response.
///
/// # Type Parameters
///
/// * `T` - The type of the response data
///
/// # Examples
///
/// ```no_run
/// use restline::{OperationArguments, OperationSpec, ServiceClient};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Pet {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example(client: ServiceClient, spec: OperationSpec) -> Result<(), restline::Error> {
/// let response = client
///     .send_operation_request_as::<Pet>(OperationArguments::new(), &spec)
///     .await?;
///
/// println!("Pet: {}", response.data.name);
/// println!("Request took {:?}", response.latency);
/// println!("Status: {}", response.status);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response<T> {
    /// The flattened response data.
    pub data: T,

    /// The raw response body, when it was buffered.
    pub raw_body: Option<String>,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time from sending the first attempt to receiving the final response.
    pub latency: Duration,

    /// The unbuffered body of a streamed response.
    pub body_stream: Option<BodyStream>,
}

/// The untyped result of an operation call.
pub type OperationResponse = Response<Value>;

impl<T> Response<T> {
    /// Creates a new `Response`.
    pub fn new(
        data: T,
        raw_body: Option<String>,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            body_stream: None,
        }
    }

    /// Maps the response data to a different type using the provided function.
    ///
    /// # Examples
    ///
    /// ```
    /// # use restline::Response;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response::new(
    ///     42,
    ///     Some("42".to_string()),
    ///     StatusCode::OK,
    ///     HeaderMap::new(),
    ///     Duration::from_millis(100),
    /// );
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            body_stream: self.body_stream,
        }
    }

    /// Returns a reference to a header value by name.
    ///
    /// # Examples
    ///
    /// ```
    /// # use restline::Response;
    /// # use http::{HeaderMap, StatusCode, HeaderValue};
    /// # use std::time::Duration;
    /// let mut headers = HeaderMap::new();
    /// headers.insert("content-type", HeaderValue::from_static("application/json"));
    ///
    /// let response = Response::new((), None, StatusCode::OK, headers, Duration::ZERO);
    ///
    /// assert_eq!(
    ///     response.header("content-type").unwrap(),
    ///     "application/json"
    /// );
    /// ```
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl Response<Value> {
    /// Converts the flattened data into a typed model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] if the data does not match `T`.
    pub fn into_model<T: DeserializeOwned>(self) -> Result<Response<T>> {
        let status = self.status;
        let raw_response = self
            .raw_body
            .clone()
            .unwrap_or_else(|| self.data.to_string());
        let data = self.data.clone();

        match serde_json::from_value::<T>(data) {
            Ok(model) => Ok(self.map(|_| model)),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw_response,
                    "Failed to deserialize response"
                );

                Err(Error::DeserializationFailed {
                    raw_response,
                    serde_error: e.to_string(),
                    status,
                })
            }
        }
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

fn is_primitive_body(body: Option<&Value>, kind: Option<&MapperType>) -> bool {
    if matches!(
        kind,
        Some(MapperType::Composite(_)) | Some(MapperType::Dictionary { .. })
    ) {
        return false;
    }
    let primitive_value = matches!(
        body,
        None | Some(Value::Null) | Some(Value::String(_)) | Some(Value::Number(_)) | Some(Value::Bool(_))
    );
    let primitive_kind = matches!(
        kind,
        Some(
            MapperType::Date
                | MapperType::DateTime
                | MapperType::DateTimeRfc1123
                | MapperType::UnixTime
                | MapperType::ByteArray
                | MapperType::Base64Url
        )
    );
    primitive_value || primitive_kind
}

/// Merges the parsed headers and body of `response` into the value handed
/// back to the caller.
///
/// - `HEAD` responses carry the headers plus a boolean `body`.
/// - Streamed responses carry only the headers.
/// - Sequence bodies are returned as the list itself, or under `body` when
///   there are headers to return beside them.
/// - Primitive bodies are wrapped as `body` beside the headers.
/// - Object bodies are merged with the headers.
/// - A nullable response with nothing in it collapses to `null`.
pub fn flatten_response(response: &PipelineResponse, spec: Option<&OperationResponseSpec>) -> Value {
    let headers = response
        .parsed_headers
        .as_ref()
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let body = response.parsed_body.clone();

    if response.request.method == Method::HEAD {
        let mut flattened = headers;
        flattened.insert("body".to_string(), body.unwrap_or(Value::Null));
        return Value::Object(flattened);
    }

    let mapper = spec.and_then(|s| s.body_mapper.as_ref());
    let nullable = mapper.is_some_and(|m| m.nullable == Some(true));
    let kind = mapper.map(|m| &m.kind);

    match kind {
        Some(MapperType::Stream) => return Value::Object(headers),
        Some(MapperType::Sequence { .. }) => {
            if nullable && !body.as_ref().is_some_and(is_truthy) && response.parsed_headers.is_none() {
                return Value::Null;
            }
            let items = body.unwrap_or_else(|| Value::Array(Vec::new()));
            if headers.is_empty() {
                return items;
            }
            let mut flattened = headers;
            flattened.insert("body".to_string(), items);
            return Value::Object(flattened);
        }
        _ => {}
    }

    let should_wrap = is_primitive_body(body.as_ref(), kind);
    let mut combined = headers.clone();
    if let Some(Value::Object(object)) = &body {
        combined.extend(object.clone());
    }

    if nullable && combined.is_empty() {
        return if should_wrap {
            let mut wrapped = Map::new();
            wrapped.insert("body".to_string(), Value::Null);
            Value::Object(wrapped)
        } else {
            Value::Null
        };
    }

    match body {
        Some(Value::Array(items)) if !should_wrap && headers.is_empty() => Value::Array(items),
        body if should_wrap || matches!(body, Some(Value::Array(_))) => {
            let mut flattened = headers;
            if let Some(body) = body {
                flattened.insert("body".to_string(), body);
            }
            Value::Object(flattened)
        }
        _ => Value::Object(combined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{CompositeMapper, Mapper};
    use http::HeaderValue;
    use serde::Deserialize;
    use serde_json::json;

    fn response(method: Method, body: Option<Value>, headers: Option<Value>) -> PipelineResponse {
        let mut response = PipelineResponse::new(
            PipelineRequest::new("https://example.com", method),
            StatusCode::OK,
            HeaderMap::new(),
        );
        response.parsed_body = body;
        response.parsed_headers = headers;
        response
    }

    fn spec(mapper: Mapper) -> OperationResponseSpec {
        OperationResponseSpec::new().body(mapper)
    }

    #[test]
    fn test_flatten_head() {
        let r = response(Method::HEAD, Some(json!(true)), Some(json!({"etag": "x"})));
        assert_eq!(flatten_response(&r, None), json!({"etag": "x", "body": true}));
    }

    #[test]
    fn test_flatten_composite_merges_headers() {
        let mapper = Mapper::composite(CompositeMapper::new("Pet").property("name", Mapper::string().named("name")));
        let r = response(Method::GET, Some(json!({"name": "Rex"})), Some(json!({"etag": "x"})));
        assert_eq!(
            flatten_response(&r, Some(&spec(mapper))),
            json!({"etag": "x", "name": "Rex"})
        );
    }

    #[test]
    fn test_flatten_primitive_is_wrapped() {
        let r = response(Method::GET, Some(json!("hello")), None);
        assert_eq!(
            flatten_response(&r, Some(&spec(Mapper::string()))),
            json!({"body": "hello"})
        );
    }

    #[test]
    fn test_flatten_sequence() {
        let list = Mapper::sequence(Mapper::number());
        let r = response(Method::GET, Some(json!([1, 2])), None);
        assert_eq!(flatten_response(&r, Some(&spec(list.clone()))), json!([1, 2]));

        let r = response(Method::GET, Some(json!([1, 2])), Some(json!({"etag": "x"})));
        assert_eq!(
            flatten_response(&r, Some(&spec(list.clone()))),
            json!({"etag": "x", "body": [1, 2]})
        );

        let r = response(Method::GET, None, None);
        assert_eq!(
            flatten_response(&r, Some(&spec(list.nullable(true)))),
            Value::Null
        );
    }

    #[test]
    fn test_flatten_nullable_empty() {
        let mapper = Mapper::composite(CompositeMapper::new("Pet").property("name", Mapper::string()))
            .nullable(true);
        let r = response(Method::GET, None, None);
        assert_eq!(flatten_response(&r, Some(&spec(mapper))), Value::Null);

        let r = response(Method::GET, None, None);
        assert_eq!(
            flatten_response(&r, Some(&spec(Mapper::string().nullable(true)))),
            json!({"body": null})
        );
    }

    #[test]
    fn test_headers_json_lowercases_and_joins() {
        let mut headers = HeaderMap::new();
        headers.append("X-Tag", HeaderValue::from_static("a"));
        headers.append("X-Tag", HeaderValue::from_static("b"));
        let r = PipelineResponse::new(
            PipelineRequest::new("https://example.com", Method::GET),
            StatusCode::OK,
            headers,
        );
        assert_eq!(Value::Object(r.headers_json()), json!({"x-tag": "a, b"}));
    }

    #[test]
    fn test_into_model() {
        #[derive(Debug, Deserialize)]
        struct Pet {
            name: String,
        }

        let ok = Response::new(
            json!({"name": "Rex"}),
            None,
            StatusCode::OK,
            HeaderMap::new(),
            Duration::ZERO,
        );
        assert_eq!(ok.into_model::<Pet>().unwrap().data.name, "Rex");

        let bad = Response::new(
            json!({"nom": "Rex"}),
            Some("{\"nom\":\"Rex\"}".to_string()),
            StatusCode::OK,
            HeaderMap::new(),
            Duration::ZERO,
        );
        let err = bad.into_model::<Pet>().unwrap_err();
        assert_eq!(err.raw_response(), Some("{\"nom\":\"Rex\"}"));
    }
}
