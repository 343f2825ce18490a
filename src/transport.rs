//! The transport at the end of every pipeline.
//!
//! [`HttpClient`] is the seam between the policies and the network.
//! [`ReqwestHttpClient`] is the implementation used by default; tests swap
//! in their own.

use crate::policies::proxy::ProxySettings;
use crate::request::{
    FormDataValue, PipelineRequest, RequestBody, TransferDirection, TransferProgress,
};
use crate::response::{BodyStream, PipelineResponse};
use crate::{Error, Result, SystemErrorKind};
use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::Method;
use reqwest::multipart::{Form, Part};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

/// Sends a request over the wire.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use http::{HeaderMap, StatusCode};
/// use restline::request::PipelineRequest;
/// use restline::response::PipelineResponse;
/// use restline::transport::HttpClient;
///
/// /// Answers every request with `204 No Content`.
/// struct NoContent;
///
/// #[async_trait]
/// impl HttpClient for NoContent {
///     async fn send_request(&self, request: PipelineRequest) -> restline::Result<PipelineResponse> {
///         Ok(PipelineResponse::new(request, StatusCode::NO_CONTENT, HeaderMap::new()))
///     }
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send_request(&self, request: PipelineRequest) -> Result<PipelineResponse>;
}

/// Classifies a `reqwest` failure by walking its source chain.
pub(crate) fn request_send_error(error: &reqwest::Error) -> Error {
    Error::RequestSend {
        kind: classify(error),
        message: error.to_string(),
        inner_error: None,
    }
}

fn classify(error: &reqwest::Error) -> SystemErrorKind {
    if error.is_timeout() {
        return SystemErrorKind::TimedOut;
    }

    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::ConnectionRefused => return SystemErrorKind::ConnectionRefused,
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => return SystemErrorKind::ConnectionReset,
                ErrorKind::TimedOut => return SystemErrorKind::TimedOut,
                ErrorKind::NotFound => return SystemErrorKind::NotFound,
                _ => {}
            }
        }
        let text = cause.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return SystemErrorKind::NotFound;
        }
        if text.contains("connection closed before message completed") {
            return SystemErrorKind::ConnectionReset;
        }
        source = cause.source();
    }
    SystemErrorKind::Other
}

fn send_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout
    } else {
        request_send_error(&error)
    }
}

fn report(progress: Option<&UnboundedSender<TransferProgress>>, loaded_bytes: u64, direction: TransferDirection) {
    if let Some(sender) = progress {
        let _ = sender.send(TransferProgress {
            loaded_bytes,
            direction,
        });
    }
}

fn add_field(form: Form, name: &str, value: &FormDataValue) -> Result<Form> {
    match value {
        FormDataValue::Text(text) => Ok(form.text(name.to_string(), text.clone())),
        FormDataValue::File {
            data,
            file_name,
            content_type,
        } => {
            let mut part = Part::bytes(data.to_vec())
                .file_name(file_name.clone().unwrap_or_else(|| "blob".to_string()));
            if let Some(content_type) = content_type {
                part = part.mime_str(content_type).map_err(|e| {
                    Error::Serialization(format!("Invalid content type for \"{}\": {}", name, e))
                })?;
            }
            Ok(form.part(name.to_string(), part))
        }
        FormDataValue::List(items) => items.iter().try_fold(form, |form, item| add_field(form, name, item)),
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<ProxySettings>,
    keep_alive: bool,
}

/// A [`HttpClient`] backed by `reqwest`.
///
/// Redirects are left to the redirect policy and proxies to the proxy
/// policy: the underlying clients follow no redirects and ignore the
/// environment's proxy variables. One `reqwest::Client` is built and kept
/// per proxy configuration, plus one without connection reuse for
/// requests that disable keep-alive.
///
/// # Examples
///
/// ```no_run
/// use http::Method;
/// use restline::request::PipelineRequest;
/// use restline::transport::{HttpClient, ReqwestHttpClient};
///
/// # async fn example() -> Result<(), restline::Error> {
/// let client = ReqwestHttpClient::new();
/// let response = client
///     .send_request(PipelineRequest::new("https://example.com", Method::GET))
///     .await?;
/// println!("{}", response.status);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ReqwestHttpClient {
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, request: &PipelineRequest) -> Result<reqwest::Client> {
        let key = ClientKey {
            proxy: request.proxy_settings.clone(),
            keep_alive: !request.disable_keep_alive,
        };
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if !key.keep_alive {
            builder = builder.pool_max_idle_per_host(0);
        }
        builder = match &key.proxy {
            Some(settings) => {
                let mut proxy = reqwest::Proxy::all(settings.url())
                    .map_err(|e| Error::ConfigurationError(format!("Invalid proxy: {}", e)))?;
                if let Some(username) = &settings.username {
                    proxy = proxy.basic_auth(username, settings.password.as_deref().unwrap_or_default());
                }
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let client = builder.build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;
        tracing::debug!(keep_alive = key.keep_alive, proxied = key.proxy.is_some(), "Built HTTP client");
        clients.insert(key, client.clone());
        Ok(client)
    }
}

impl std::fmt::Debug for ReqwestHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .clients
            .lock()
            .map(|clients| clients.len())
            .unwrap_or_default();
        f.debug_struct("ReqwestHttpClient")
            .field("cached_clients", &cached)
            .finish()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send_request(&self, request: PipelineRequest) -> Result<PipelineResponse> {
        if request.is_aborted() {
            return Err(Error::Aborted);
        }

        let url = Url::parse(&request.url)?;
        if url.scheme() != "https" && !request.allow_insecure_connection {
            return Err(Error::InsecureConnection {
                url: request.url.clone(),
            });
        }

        let client = self.client_for(&request)?;
        let mut headers = request.headers.clone();
        let mut builder = client.request(request.method.clone(), url);

        let upload_size = match &request.body {
            RequestBody::Empty => None,
            RequestBody::Bytes(bytes) => {
                builder = builder.body(bytes.clone());
                Some(bytes.len() as u64)
            }
            RequestBody::Multipart(fields) => {
                headers.remove(CONTENT_TYPE);
                let form = fields
                    .iter()
                    .try_fold(Form::new(), |form, (name, value)| add_field(form, name, value))?;
                builder = builder.multipart(form);
                None
            }
        };
        builder = builder.headers(headers);
        if let Some(timeout) = request.timeout.filter(|t| !t.is_zero()) {
            builder = builder.timeout(timeout);
        }

        tracing::debug!(method = %request.method, url = %request.url, "Sending request");

        let signal = request.abort_signal.clone();
        let sent = match &signal {
            Some(signal) => tokio::select! {
                result = builder.send() => result,
                _ = signal.aborted() => return Err(Error::Aborted),
            },
            None => builder.send().await,
        };
        let mut response = sent.map_err(send_error)?;

        let progress = request.progress.clone();
        if let Some(size) = upload_size {
            report(progress.as_ref(), size, TransferDirection::Upload);
        }

        let status = response.status();
        let headers = response.headers().clone();
        let is_head = request.method == Method::HEAD;
        let streamed = request.stream_response_status_codes.contains(&status.as_u16());
        let mut pipeline_response = PipelineResponse::new(request, status, headers);

        if is_head {
            return Ok(pipeline_response);
        }
        if streamed {
            pipeline_response.body_stream = Some(BodyStream::new(response));
            return Ok(pipeline_response);
        }

        let mut body = Vec::new();
        loop {
            let chunk = match &signal {
                Some(signal) => tokio::select! {
                    chunk = response.chunk() => chunk,
                    _ = signal.aborted() => return Err(Error::Aborted),
                },
                None => response.chunk().await,
            };
            match chunk.map_err(send_error)? {
                Some(chunk) => {
                    body.extend_from_slice(&chunk);
                    report(progress.as_ref(), body.len() as u64, TransferDirection::Download);
                }
                None => break,
            }
        }

        pipeline_response.body_as_text = Some(String::from_utf8_lossy(&body).into_owned());
        Ok(pipeline_response)
    }
}
