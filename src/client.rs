//! The service client that turns operation specs into pipeline calls.
//!
//! [`ServiceClient`] is the main entry point. Use [`ServiceClientBuilder`]
//! to configure and create clients.

use crate::auth::TokenCredential;
use crate::operation::{OperationArguments, OperationSpec};
use crate::pipeline::{
    create_pipeline_from_options, AddPolicyOptions, Pipeline, PipelineOptions, PipelinePhase,
};
use crate::policies::bearer::BearerTokenAuthenticationPolicy;
use crate::policies::deserialization::{DeserializationPolicy, DeserializationPolicyOptions};
use crate::policies::serialization::SerializationPolicy;
use crate::request::{OperationContext, PipelineRequest};
use crate::response::{flatten_response, OperationResponse, PipelineResponse};
use crate::transport::{HttpClient, ReqwestHttpClient};
use crate::url_builder::get_request_url;
use crate::{Error, Response, Result};
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use url::Url;

/// A credential and the scopes to request tokens for.
#[derive(Clone)]
pub struct CredentialOptions {
    pub credential: Arc<dyn TokenCredential>,
    pub credential_scopes: Vec<String>,
}

impl std::fmt::Debug for CredentialOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialOptions")
            .field("credential_scopes", &self.credential_scopes)
            .finish_non_exhaustive()
    }
}

/// Options for [`create_client_pipeline`].
#[derive(Debug, Clone, Default)]
pub struct ClientPipelineOptions {
    pub pipeline_options: PipelineOptions,
    /// Adds bearer token authentication when set.
    pub credential_options: Option<CredentialOptions>,
    pub deserialization_options: DeserializationPolicyOptions,
}

/// Builds the standard pipeline plus the policies an operation-driven
/// client needs: serialization, deserialization and, with a credential,
/// bearer token authentication.
///
/// # Examples
///
/// ```
/// use restline::client::{create_client_pipeline, ClientPipelineOptions};
///
/// # fn main() -> Result<(), restline::Error> {
/// let pipeline = create_client_pipeline(&ClientPipelineOptions::default())?;
/// let names = pipeline.policy_names()?;
/// assert_eq!(names[0], "serializationPolicy");
/// assert!(names.contains(&"deserializationPolicy".to_string()));
/// # Ok(())
/// # }
/// ```
pub fn create_client_pipeline(options: &ClientPipelineOptions) -> Result<Pipeline> {
    let mut pipeline = create_pipeline_from_options(&options.pipeline_options)?;
    if let Some(credential_options) = &options.credential_options {
        pipeline.add_policy(
            BearerTokenAuthenticationPolicy::new(
                credential_options.credential.clone(),
                credential_options.credential_scopes.clone(),
            ),
            AddPolicyOptions::default(),
        )?;
    }
    pipeline.add_policy(
        SerializationPolicy,
        AddPolicyOptions::in_phase(PipelinePhase::Serialize),
    )?;
    pipeline.add_policy(
        DeserializationPolicy::new(options.deserialization_options.clone()),
        AddPolicyOptions::in_phase(PipelinePhase::Deserialize),
    )?;
    Ok(pipeline)
}

/// A client that sends requests described by [`OperationSpec`]s.
///
/// The client is designed to be reused across multiple requests. Cloning
/// is cheap and clones share the pipeline and transport.
///
/// # Examples
///
/// ```no_run
/// use http::Method;
/// use restline::mapper::{Mapper, MapperRegistry};
/// use restline::operation::{OperationParameter, OperationResponseSpec};
/// use restline::serializer::Serializer;
/// use restline::{OperationArguments, OperationSpec, ServiceClient};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), restline::Error> {
/// let client = ServiceClient::builder()
///     .base_uri("https://pets.example.com")?
///     .build()?;
///
/// let serializer = Serializer::new(Arc::new(MapperRegistry::empty()), false);
/// let get_pet = OperationSpec::new(Method::GET, serializer)
///     .path("/pets/{petId}")
///     .url_parameter(OperationParameter::new("petId", Mapper::string().named("petId").required()))
///     .response(200, OperationResponseSpec::new().body(Mapper::any()));
///
/// let pet = client
///     .send_operation_request(OperationArguments::new().with("petId", "rex")?, &get_pet)
///     .await?;
/// println!("Pet: {}", pet.data);
/// println!("Request took {:?}", pet.latency);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ServiceClientInner>,
}

struct ServiceClientInner {
    pipeline: Pipeline,
    http_client: Arc<dyn HttpClient>,
    base_uri: Option<String>,
    request_content_type: Option<String>,
    allow_insecure_connection: bool,
    properties: Map<String, Value>,
}

impl ServiceClient {
    /// Creates a new `ServiceClientBuilder` for configuring a client.
    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder::new()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.inner.base_uri.as_deref()
    }

    /// Sends `request` through the pipeline as is.
    ///
    /// # Errors
    ///
    /// Returns whatever error the pipeline or transport produces.
    pub async fn send_request(&self, request: PipelineRequest) -> Result<PipelineResponse> {
        self.inner
            .pipeline
            .send_request(self.inner.http_client.as_ref(), request)
            .await
    }

    /// Builds a request from `spec` and `arguments`, sends it, and
    /// flattens the mapped response.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigurationError`] if neither the operation nor the client
    ///   has a base URI.
    /// - [`Error::Validation`] or [`Error::Serialization`] if an argument
    ///   does not fit its mapper.
    /// - [`Error::Http`] for unexpected statuses, with the flattened error
    ///   response attached as `details`.
    /// - Any transport or parse error from the pipeline.
    pub async fn send_operation_request(
        &self,
        arguments: OperationArguments,
        spec: &OperationSpec,
    ) -> Result<OperationResponse> {
        let request = self.operation_request(arguments, spec)?;
        let method = request.method.clone();
        let url = request.url.clone();
        let start_time = Instant::now();

        match self.send_request(request).await {
            Ok(mut raw) => {
                let latency = start_time.elapsed();
                tracing::info!(
                    status = raw.status.as_u16(),
                    latency_ms = latency.as_millis(),
                    "Received HTTP response"
                );

                let data = flatten_response(&raw, spec.responses.get(&raw.status.as_u16()));
                let body_stream = raw.body_stream.take();
                let mut response = Response::new(
                    data,
                    raw.body_as_text.take(),
                    raw.status,
                    std::mem::take(&mut raw.headers),
                    latency,
                );
                response.body_stream = body_stream;
                Ok(response)
            }
            Err(mut error) => {
                tracing::warn!(error = %error, method = %method, url = %url, "Request failed");
                if let Error::Http {
                    response, details, ..
                } = &mut error
                {
                    let response_spec = spec.response_for(response.status.as_u16());
                    *details = Some(flatten_response(response, response_spec));
                }
                Err(error)
            }
        }
    }

    /// Like [`send_operation_request`](Self::send_operation_request), then
    /// converts the flattened data into `T`.
    ///
    /// # Errors
    ///
    /// Everything `send_operation_request` returns, plus
    /// [`Error::DeserializationFailed`] if the data does not match `T`.
    pub async fn send_operation_request_as<T: DeserializeOwned>(
        &self,
        arguments: OperationArguments,
        spec: &OperationSpec,
    ) -> Result<Response<T>> {
        self.send_operation_request(arguments, spec)
            .await?
            .into_model()
    }

    fn operation_request(&self, arguments: OperationArguments, spec: &OperationSpec) -> Result<PipelineRequest> {
        let base_uri = spec
            .base_url
            .as_deref()
            .or(self.inner.base_uri.as_deref())
            .ok_or_else(|| {
                Error::ConfigurationError(
                    "If the operation has no base URL, the client must have a base URI".to_string(),
                )
            })?;

        let url = get_request_url(base_uri, spec, &arguments, Some(&self.inner.properties))?;
        let mut request = PipelineRequest::new(url, spec.http_method.clone());

        let content_type = spec
            .content_type
            .as_deref()
            .or(self.inner.request_content_type.as_deref());
        if let (Some(content_type), Some(_)) = (content_type, &spec.request_body) {
            let value = HeaderValue::from_str(content_type).map_err(|e| {
                Error::ConfigurationError(format!("Invalid content type: {}", e))
            })?;
            request.headers.insert(CONTENT_TYPE, value);
        }

        let options = &arguments.options;
        let request_options = &options.request_options;
        if let Some(timeout) = request_options.timeout {
            request.timeout = Some(timeout);
        }
        request.progress = request_options.progress.clone();
        request.allow_insecure_connection = self.inner.allow_insecure_connection
            || request_options.allow_insecure_connection.unwrap_or(false);
        request.abort_signal = options.abort_signal.clone();
        request.stream_response_status_codes = spec.streaming_status_codes();

        tracing::debug!(method = %request.method, url = %request.url, "Executing operation request");

        request.operation = Some(Arc::new(OperationContext {
            spec: Arc::new(spec.clone()),
            arguments,
        }));
        Ok(request)
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base_uri", &self.inner.base_uri)
            .field("pipeline", &self.inner.pipeline)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring and creating a [`ServiceClient`].
///
/// Without an explicit [`pipeline`](Self::pipeline), the client gets
/// [`create_client_pipeline`] built from the options set here. With a
/// credential, token scopes default to `<base_uri>/.default`.
///
/// # Examples
///
/// ```no_run
/// use restline::pipeline::PipelineOptions;
/// use restline::retry::RetryOptions;
/// use restline::ServiceClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), restline::Error> {
/// let client = ServiceClientBuilder::new()
///     .base_uri("https://pets.example.com")?
///     .request_content_type("application/json; charset=utf-8")
///     .pipeline_options(PipelineOptions {
///         retry_options: RetryOptions::builder()
///             .max_retries(3)
///             .retry_delay(Duration::from_millis(200))
///             .build(),
///         ..Default::default()
///     })
///     .property("apiVersion", "2024-01-01")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ServiceClientBuilder {
    base_uri: Option<String>,
    request_content_type: Option<String>,
    allow_insecure_connection: bool,
    http_client: Option<Arc<dyn HttpClient>>,
    pipeline: Option<Pipeline>,
    pipeline_options: PipelineOptions,
    deserialization_options: DeserializationPolicyOptions,
    credential: Option<Arc<dyn TokenCredential>>,
    credential_scopes: Option<Vec<String>>,
    properties: Map<String, Value>,
}

impl ServiceClientBuilder {
    /// Creates a new `ServiceClientBuilder` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URI operations are resolved against.
    ///
    /// The URI may contain `{name}` placeholders filled from URL
    /// parameters, so it is only checked for being absolute when it has
    /// none.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is invalid.
    pub fn base_uri(mut self, uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        if !uri.contains('{') {
            Url::parse(&uri)?;
        }
        self.base_uri = Some(uri);
        Ok(self)
    }

    /// Sets the `Content-Type` used for operations that have a body but
    /// declare no content type.
    pub fn request_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.request_content_type = Some(content_type.into());
        self
    }

    /// Allows plain `http` URLs for every request of this client.
    pub fn allow_insecure_connection(mut self, allow: bool) -> Self {
        self.allow_insecure_connection = allow;
        self
    }

    /// Sets the transport. Defaults to a new [`ReqwestHttpClient`].
    pub fn http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Uses `pipeline` as is, ignoring the pipeline, credential and
    /// deserialization options.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn pipeline_options(mut self, options: PipelineOptions) -> Self {
        self.pipeline_options = options;
        self
    }

    pub fn deserialization_options(mut self, options: DeserializationPolicyOptions) -> Self {
        self.deserialization_options = options;
        self
    }

    /// Authenticates requests with bearer tokens from `credential`.
    pub fn credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn credential_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.credential_scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    /// Registers a client-level value that parameters fall back to when the
    /// operation arguments do not carry them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `value` cannot be represented as JSON.
    pub fn property<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.properties.insert(name.into(), value);
        Ok(self)
    }

    fn credential_options(&self) -> Result<Option<CredentialOptions>> {
        let Some(credential) = &self.credential else {
            return Ok(None);
        };
        let credential_scopes = match (&self.credential_scopes, &self.base_uri) {
            (Some(scopes), _) => scopes.clone(),
            (None, Some(base_uri)) => vec![format!("{}/.default", base_uri)],
            (None, None) => {
                return Err(Error::ConfigurationError(
                    "When using credentials, the client must have either a base URI or credential scopes"
                        .to_string(),
                ))
            }
        };
        Ok(Some(CredentialOptions {
            credential: credential.clone(),
            credential_scopes,
        }))
    }

    /// Builds the configured `ServiceClient`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if a credential is set without
    /// a base URI or scopes, or if the pipeline cannot be assembled.
    pub fn build(self) -> Result<ServiceClient> {
        let pipeline = match &self.pipeline {
            Some(pipeline) => pipeline.clone(),
            None => create_client_pipeline(&ClientPipelineOptions {
                pipeline_options: self.pipeline_options.clone(),
                credential_options: self.credential_options()?,
                deserialization_options: self.deserialization_options.clone(),
            })?,
        };
        let http_client = self
            .http_client
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));

        Ok(ServiceClient {
            inner: Arc::new(ServiceClientInner {
                pipeline,
                http_client,
                base_uri: self.base_uri,
                request_content_type: self.request_content_type,
                allow_insecure_connection: self.allow_insecure_connection,
                properties: self.properties,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, GetTokenOptions};
    use crate::mapper::{Mapper, MapperRegistry};
    use crate::operation::{OperationOptions, OperationParameter, OperationResponseSpec};
    use crate::policies::testing::{reply, MockClient};
    use crate::serializer::Serializer;
    use async_trait::async_trait;
    use http::Method;
    use serde_json::json;
    use std::time::{Duration, SystemTime};

    fn serializer() -> Serializer {
        Serializer::new(Arc::new(MapperRegistry::empty()), false)
    }

    fn bare_client(mock: Arc<MockClient>) -> ServiceClient {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_policy(SerializationPolicy, AddPolicyOptions::in_phase(PipelinePhase::Serialize))
            .unwrap();
        pipeline
            .add_policy(
                DeserializationPolicy::default(),
                AddPolicyOptions::in_phase(PipelinePhase::Deserialize),
            )
            .unwrap();
        ServiceClient::builder()
            .base_uri("https://pets.test")
            .unwrap()
            .request_content_type("application/json")
            .property("apiVersion", "2024-01-01")
            .unwrap()
            .pipeline(pipeline)
            .http_client(mock)
            .build()
            .unwrap()
    }

    fn json_reply(request: &PipelineRequest, status: u16, body: &str) -> PipelineResponse {
        reply(request, status, &[("content-type", "application/json")]).with_body(body)
    }

    #[tokio::test]
    async fn test_builds_request_from_spec() {
        let mock = Arc::new(MockClient::new(|request, _| {
            Ok(json_reply(request, 200, r#"{"id":1,"name":"Rex"}"#))
        }));
        let client = bare_client(mock.clone());
        let spec = OperationSpec::new(Method::PUT, serializer())
            .path("/pets/{petId}")
            .url_parameter(OperationParameter::new("petId", Mapper::string().named("petId").required()))
            .query_parameter(OperationParameter::new(
                "apiVersion",
                Mapper::string().named("api-version").required(),
            ))
            .request_body(OperationParameter::new("pet", Mapper::any().named("pet")))
            .response(200, OperationResponseSpec::new().body(Mapper::any()));

        let args = OperationArguments::new()
            .with("petId", "rex")
            .unwrap()
            .with("pet", json!({"name": "Rex"}))
            .unwrap();
        let response = client.send_operation_request(args, &spec).await.unwrap();

        assert_eq!(response.data, json!({"id": 1, "name": "Rex"}));
        assert_eq!(response.raw_body.as_deref(), Some(r#"{"id":1,"name":"Rex"}"#));

        let sent = mock.sent();
        assert_eq!(sent[0].url, "https://pets.test/pets/rex?api-version=2024-01-01");
        assert_eq!(sent[0].headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(sent[0].body.as_text(), Some(r#"{"name":"Rex"}"#));
    }

    #[tokio::test]
    async fn test_missing_base_uri_is_a_configuration_error() {
        let client = ServiceClient::builder()
            .http_client(Arc::new(MockClient::status(200)))
            .build()
            .unwrap();
        let spec = OperationSpec::new(Method::GET, serializer()).path("/pets");
        let err = client
            .send_operation_request(OperationArguments::new(), &spec)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_spec_base_url_wins_and_options_flow_into_request() {
        let mock = Arc::new(MockClient::status(204));
        let client = bare_client(mock.clone());
        let spec = OperationSpec::new(Method::DELETE, serializer())
            .base_url("http://other.test")
            .path("/pets")
            .response(204, OperationResponseSpec::new());
        let controller = crate::AbortController::new();
        let mut options = OperationOptions::default()
            .timeout(Duration::from_secs(5))
            .abort_signal(controller.signal());
        options.request_options.allow_insecure_connection = Some(true);

        client
            .send_operation_request(OperationArguments::new().options(options), &spec)
            .await
            .unwrap();

        let sent = mock.sent();
        assert_eq!(sent[0].url, "http://other.test/pets");
        assert_eq!(sent[0].timeout, Some(Duration::from_secs(5)));
        assert!(sent[0].allow_insecure_connection);
        assert!(sent[0].abort_signal.is_some());
        assert!(sent[0].headers.get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_http_errors_carry_flattened_details() {
        let mock = Arc::new(MockClient::new(|request, _| {
            Ok(json_reply(
                request,
                404,
                r#"{"error":{"code":"PetNotFound","message":"no such pet"}}"#,
            ))
        }));
        let client = bare_client(mock);
        let spec = OperationSpec::new(Method::GET, serializer())
            .path("/pets/x")
            .response(200, OperationResponseSpec::new().body(Mapper::any()))
            .default_response(OperationResponseSpec::new().body(Mapper::any()).error());

        let err = client
            .send_operation_request(OperationArguments::new(), &spec)
            .await
            .unwrap_err();

        assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
        assert_eq!(err.code(), Some("PetNotFound"));
        assert_eq!(err.to_string(), "no such pet");
        assert_eq!(
            err.details().unwrap()["error"]["code"],
            json!("PetNotFound")
        );
    }

    #[tokio::test]
    async fn test_typed_responses() {
        #[derive(serde::Deserialize)]
        struct Pet {
            name: String,
        }

        let mock = Arc::new(MockClient::new(|request, _| Ok(json_reply(request, 200, r#"{"name":"Rex"}"#))));
        let client = bare_client(mock);
        let spec = OperationSpec::new(Method::GET, serializer())
            .path("/pets/rex")
            .response(200, OperationResponseSpec::new().body(Mapper::any()));

        let pet = client
            .send_operation_request_as::<Pet>(OperationArguments::new(), &spec)
            .await
            .unwrap();
        assert_eq!(pet.name, "Rex");

        let err = client
            .send_operation_request_as::<Vec<u32>>(OperationArguments::new(), &spec)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeserializationFailed { .. }));
    }

    struct StaticCredential;

    #[async_trait]
    impl TokenCredential for StaticCredential {
        async fn get_token(&self, _scopes: &[String], _options: &GetTokenOptions) -> Result<Option<AccessToken>> {
            Ok(Some(AccessToken::new("t", SystemTime::now() + Duration::from_secs(3600))))
        }
    }

    #[test]
    fn test_credential_scopes() {
        let builder = ServiceClient::builder()
            .base_uri("https://pets.test")
            .unwrap()
            .credential(Arc::new(StaticCredential));
        let options = builder.credential_options().unwrap().unwrap();
        assert_eq!(options.credential_scopes, vec!["https://pets.test/.default"]);

        let builder = builder.credential_scopes(["api://pets/read"]);
        let options = builder.credential_options().unwrap().unwrap();
        assert_eq!(options.credential_scopes, vec!["api://pets/read"]);

        let err = ServiceClient::builder()
            .credential(Arc::new(StaticCredential))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[test]
    fn test_default_pipeline_includes_bearer_policy() {
        let client = ServiceClient::builder()
            .base_uri("https://pets.test")
            .unwrap()
            .pipeline_options(PipelineOptions {
                proxy_settings: Some(crate::policies::proxy::ProxySettings::new("http://proxy.test", 8080)),
                ..Default::default()
            })
            .credential(Arc::new(StaticCredential))
            .build()
            .unwrap();

        let names = client.pipeline().policy_names().unwrap();
        assert!(names.contains(&"bearerTokenAuthenticationPolicy".to_string()));
        assert!(names.contains(&"serializationPolicy".to_string()));
        assert!(names.contains(&"deserializationPolicy".to_string()));
    }
}
