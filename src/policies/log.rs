//! Logs a sanitized summary of every request and response.
//!
//! Header values are replaced with `REDACTED` unless the header is on the
//! allow-list, and so are query parameter values other than `api-version`.
//! Bodies are never logged.

use crate::pipeline::{Next, Policy};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::Result;
use async_trait::async_trait;
use http::HeaderMap;
use serde_json::{Map, Value};
use std::collections::HashSet;
use url::Url;

pub const LOG_POLICY_NAME: &str = "logPolicy";

const REDACTED: &str = "REDACTED";

const DEFAULT_ALLOWED_HEADER_NAMES: &[&str] = &[
    "x-ms-client-request-id",
    "x-ms-return-client-request-id",
    "x-ms-useragent",
    "x-ms-correlation-request-id",
    "x-ms-request-id",
    "client-request-id",
    "ms-cv",
    "return-client-request-id",
    "traceparent",
    "access-control-allow-credentials",
    "access-control-allow-headers",
    "access-control-allow-methods",
    "access-control-allow-origin",
    "access-control-expose-headers",
    "access-control-max-age",
    "access-control-request-headers",
    "access-control-request-method",
    "origin",
    "accept",
    "accept-encoding",
    "cache-control",
    "connection",
    "content-length",
    "content-type",
    "date",
    "etag",
    "expires",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-unmodified-since",
    "last-modified",
    "pragma",
    "request-id",
    "retry-after",
    "server",
    "transfer-encoding",
    "user-agent",
];

const DEFAULT_ALLOWED_QUERY_PARAMETERS: &[&str] = &["api-version"];

/// Extends the logging allow-lists.
#[derive(Debug, Clone, Default)]
pub struct LogPolicyOptions {
    pub additional_allowed_header_names: Vec<String>,
    pub additional_allowed_query_parameters: Vec<String>,
}

/// Redacts header and query values that are not explicitly allowed.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    allowed_header_names: HashSet<String>,
    allowed_query_parameters: HashSet<String>,
}

impl Sanitizer {
    pub fn new(options: &LogPolicyOptions) -> Self {
        let allowed_header_names = DEFAULT_ALLOWED_HEADER_NAMES
            .iter()
            .map(|name| name.to_string())
            .chain(options.additional_allowed_header_names.iter().cloned())
            .map(|name| name.to_lowercase())
            .collect();
        let allowed_query_parameters = DEFAULT_ALLOWED_QUERY_PARAMETERS
            .iter()
            .map(|name| name.to_string())
            .chain(options.additional_allowed_query_parameters.iter().cloned())
            .map(|name| name.to_lowercase())
            .collect();
        Self {
            allowed_header_names,
            allowed_query_parameters,
        }
    }

    /// The headers as a JSON object with disallowed values redacted.
    pub fn sanitize_headers(&self, headers: &HeaderMap) -> Value {
        let mut sanitized = Map::new();
        for (name, value) in headers {
            let value = if self.allowed_header_names.contains(name.as_str()) {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            } else {
                REDACTED.to_string()
            };
            sanitized.insert(name.as_str().to_string(), Value::String(value));
        }
        Value::Object(sanitized)
    }

    /// The URL with disallowed query values redacted.
    ///
    /// # Examples
    ///
    /// ```
    /// use restline::policies::log::{LogPolicyOptions, Sanitizer};
    ///
    /// let sanitizer = Sanitizer::new(&LogPolicyOptions::default());
    /// assert_eq!(
    ///     sanitizer.sanitize_url("https://a.test/x?api-version=1&sig=secret"),
    ///     "https://a.test/x?api-version=1&sig=REDACTED"
    /// );
    /// ```
    pub fn sanitize_url(&self, value: &str) -> String {
        let Ok(mut url) = Url::parse(value) else {
            return value.to_string();
        };
        if url.query().is_none() {
            return value.to_string();
        }

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if self.allowed_query_parameters.contains(&key.to_lowercase()) {
                    value.into_owned()
                } else {
                    REDACTED.to_string()
                };
                (key.into_owned(), value)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}

/// Logs `method`, sanitized URL and headers of each request, then the
/// status and sanitized headers of its response, at `INFO`.
#[derive(Debug, Clone)]
pub struct LogPolicy {
    sanitizer: Sanitizer,
}

impl LogPolicy {
    pub fn new(options: LogPolicyOptions) -> Self {
        Self {
            sanitizer: Sanitizer::new(&options),
        }
    }
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self::new(LogPolicyOptions::default())
    }
}

#[async_trait]
impl Policy for LogPolicy {
    fn name(&self) -> &str {
        LOG_POLICY_NAME
    }

    async fn send_request(&self, request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        if !tracing::enabled!(tracing::Level::INFO) {
            return next.send(request).await;
        }

        tracing::info!(
            method = %request.method,
            url = %self.sanitizer.sanitize_url(&request.url),
            headers = %self.sanitizer.sanitize_headers(&request.headers),
            request_id = %request.request_id,
            "Request"
        );

        let response = next.send(request).await?;

        tracing::info!(
            status = response.status.as_u16(),
            headers = %self.sanitizer.sanitize_headers(&response.headers),
            "Response"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::testing::{run, MockClient};
    use http::{HeaderValue, Method};
    use serde_json::json;

    #[test]
    fn test_sanitize_headers() {
        let sanitizer = Sanitizer::new(&LogPolicyOptions {
            additional_allowed_header_names: vec!["X-Custom".to_string()],
            ..Default::default()
        });
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("x-custom", HeaderValue::from_static("visible"));

        assert_eq!(
            sanitizer.sanitize_headers(&headers),
            json!({
                "authorization": "REDACTED",
                "content-type": "application/json",
                "x-custom": "visible"
            })
        );
    }

    #[test]
    fn test_sanitize_url_without_query() {
        let sanitizer = Sanitizer::new(&LogPolicyOptions::default());
        assert_eq!(sanitizer.sanitize_url("https://a.test/x"), "https://a.test/x");
        assert_eq!(sanitizer.sanitize_url("not a url"), "not a url");
    }

    #[tokio::test]
    async fn test_passes_responses_through() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("restline=info")
            .with_test_writer()
            .try_init();

        let client = MockClient::status(204);
        let response = run(
            LogPolicy::default(),
            &client,
            PipelineRequest::new("https://a.test/?sig=abc", Method::DELETE),
        )
        .await
        .unwrap();
        assert_eq!(response.status.as_u16(), 204);
    }
}
