//! Wraps each request in a `tracing` span.

use crate::pipeline::{Next, Policy};
use crate::policies::user_agent::{user_agent_value, UserAgentOptions};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::Result;
use async_trait::async_trait;
use tracing::field::Empty;
use tracing::Instrument;
use url::Url;

pub const TRACING_POLICY_NAME: &str = "tracingPolicy";

/// Opens an `http_request` span per request, recording the method, URL,
/// path, user agent and request id up front and the status code (plus the
/// service's `x-ms-request-id`) once the response arrives.
#[derive(Debug, Clone)]
pub struct TracingPolicy {
    user_agent: String,
}

impl TracingPolicy {
    pub fn new(options: UserAgentOptions) -> Self {
        Self {
            user_agent: user_agent_value(options.user_agent_prefix.as_deref()),
        }
    }
}

impl Default for TracingPolicy {
    fn default() -> Self {
        Self::new(UserAgentOptions::default())
    }
}

#[async_trait]
impl Policy for TracingPolicy {
    fn name(&self) -> &str {
        TRACING_POLICY_NAME
    }

    async fn send_request(&self, request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        let path = Url::parse(&request.url)
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| "/".to_string());

        let span = tracing::info_span!(
            "http_request",
            http.method = %request.method,
            http.url = %request.url,
            http.path = %path,
            http.user_agent = %self.user_agent,
            request_id = %request.request_id,
            http.status_code = Empty,
            service_request_id = Empty,
        );

        let result = next.send(request).instrument(span.clone()).await;

        match &result {
            Ok(response) => {
                span.record("http.status_code", response.status.as_u16());
                if let Some(id) = response.header("x-ms-request-id") {
                    span.record("service_request_id", id);
                }
            }
            Err(e) => {
                if let Some(status) = e.status() {
                    span.record("http.status_code", status.as_u16());
                }
                span.in_scope(|| tracing::debug!(error = %e, "Request failed"));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::testing::{reply, run, MockClient};
    use crate::Error;
    use http::Method;

    #[tokio::test]
    async fn test_passes_result_through() {
        let client = MockClient::new(|request, _| Ok(reply(request, 201, &[("x-ms-request-id", "svc-1")])));
        let response = run(
            TracingPolicy::default(),
            &client,
            PipelineRequest::new("https://a.test/pets", Method::POST),
        )
        .await
        .unwrap();
        assert_eq!(response.status.as_u16(), 201);

        let client = MockClient::new(|_, _| Err(Error::Timeout));
        let result = run(
            TracingPolicy::default(),
            &client,
            PipelineRequest::new("https://a.test/pets", Method::GET),
        )
        .await;
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
