//! Sends the request's unique id to the service for correlation.

use crate::pipeline::{Next, Policy};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::{Error, Result};
use async_trait::async_trait;
use http::{HeaderName, HeaderValue};

pub const SET_CLIENT_REQUEST_ID_POLICY_NAME: &str = "setClientRequestIdPolicy";

/// Default correlation header.
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Copies [`PipelineRequest::request_id`] into a header unless the caller
/// already set one.
#[derive(Debug, Clone)]
pub struct SetClientRequestIdPolicy {
    header_name: HeaderName,
}

impl SetClientRequestIdPolicy {
    /// Uses `header_name` instead of `x-ms-client-request-id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if `header_name` is not a valid header name.
    pub fn new(header_name: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| Error::ConfigurationError(format!("Invalid request id header: {}", e)))?;
        Ok(Self { header_name })
    }
}

impl Default for SetClientRequestIdPolicy {
    fn default() -> Self {
        Self {
            header_name: HeaderName::from_static(DEFAULT_REQUEST_ID_HEADER),
        }
    }
}

#[async_trait]
impl Policy for SetClientRequestIdPolicy {
    fn name(&self) -> &str {
        SET_CLIENT_REQUEST_ID_POLICY_NAME
    }

    async fn send_request(&self, mut request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        if !request.headers.contains_key(&self.header_name) {
            if let Ok(value) = HeaderValue::from_str(&request.request_id) {
                request.headers.insert(self.header_name.clone(), value);
            }
        }
        next.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::testing::{run, MockClient};
    use http::Method;

    #[tokio::test]
    async fn test_sets_request_id_once() {
        let client = MockClient::status(200);
        let request = PipelineRequest::new("https://a.test", Method::GET);
        let id = request.request_id.clone();
        run(SetClientRequestIdPolicy::default(), &client, request).await.unwrap();

        let mut preset = PipelineRequest::new("https://a.test", Method::GET);
        preset
            .headers
            .insert(DEFAULT_REQUEST_ID_HEADER, HeaderValue::from_static("mine"));
        run(SetClientRequestIdPolicy::default(), &client, preset).await.unwrap();

        let sent = client.sent();
        assert_eq!(sent[0].headers[DEFAULT_REQUEST_ID_HEADER], id.as_str());
        assert_eq!(sent[1].headers[DEFAULT_REQUEST_ID_HEADER], "mine");
    }

    #[tokio::test]
    async fn test_custom_header_name() {
        let client = MockClient::status(200);
        let policy = SetClientRequestIdPolicy::new("x-correlation-id").unwrap();
        run(policy, &client, PipelineRequest::new("https://a.test", Method::GET))
            .await
            .unwrap();
        assert!(client.sent()[0].headers.contains_key("x-correlation-id"));
        assert!(SetClientRequestIdPolicy::new("bad header").is_err());
    }
}
