//! Retries transient server failures with exponential backoff.

use crate::pipeline::{Next, Policy};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::retry::{sleep_with_abort, RetryOptions, RetryState};
use crate::{Error, Result};
use async_trait::async_trait;
use http::header::RETRY_AFTER;

pub const EXPONENTIAL_RETRY_POLICY_NAME: &str = "exponentialRetryPolicy";

/// Retries `408` and `5xx` responses other than `501` and `505`.
///
/// A `503` carrying `Retry-After` is left to the throttling policy. A send
/// failure without a response is judged by the previous attempt's response.
///
/// # Examples
///
/// ```
/// use restline::policies::exponential_retry::ExponentialRetryPolicy;
/// use restline::retry::RetryOptions;
/// use std::time::Duration;
///
/// let policy = ExponentialRetryPolicy::new(
///     RetryOptions::builder()
///         .max_retries(3)
///         .retry_delay(Duration::from_millis(200))
///         .build(),
/// );
/// # let _ = policy;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExponentialRetryPolicy {
    options: RetryOptions,
}

impl ExponentialRetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }
}

fn is_retryable(response: &PipelineResponse) -> bool {
    let status = response.status.as_u16();
    if status == 503 && response.headers.contains_key(RETRY_AFTER) {
        return false;
    }
    (status >= 500 || status == 408) && status != 501 && status != 505
}

#[async_trait]
impl Policy for ExponentialRetryPolicy {
    fn name(&self) -> &str {
        EXPONENTIAL_RETRY_POLICY_NAME
    }

    async fn send_request(&self, request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        let mut state = RetryState::default();
        let mut previous_retryable = false;

        loop {
            let outcome = next.send(request.clone()).await;
            let retryable = match &outcome {
                Ok(response) => is_retryable(response),
                Err(e) => e.response().map_or(previous_retryable, is_retryable),
            };
            previous_retryable = retryable;
            state.retry_count += 1;

            if !retryable || state.retry_count > self.options.max_retries {
                return outcome.map_err(|e| state.chain(e));
            }
            if request.is_aborted() {
                return Err(Error::Aborted);
            }

            match outcome {
                Ok(response) => tracing::warn!(
                    status = response.status.as_u16(),
                    attempt = state.retry_count,
                    "Request failed with a retryable status"
                ),
                Err(e) => {
                    tracing::warn!(error = %e, attempt = state.retry_count, "Request failed");
                    state.record_error(e);
                }
            }

            let delay = self.options.delay_for_attempt(state.retry_count);
            tracing::info!(delay_ms = delay.as_millis() as u64, "Retrying request");
            sleep_with_abort(delay, request.abort_signal.as_ref()).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::testing::{reply, run, MockClient};
    use crate::SystemErrorKind;
    use http::Method;
    use std::time::Duration;

    fn policy(max_retries: u32) -> ExponentialRetryPolicy {
        ExponentialRetryPolicy::new(
            RetryOptions::builder()
                .max_retries(max_retries)
                .retry_delay(Duration::from_millis(10))
                .build(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let client = MockClient::new(|request, attempt| {
            let status = if attempt < 2 { 500 } else { 200 };
            Ok(reply(request, status, &[]))
        });
        let response = run(policy(5), &client, PipelineRequest::new("https://a.test", Method::GET))
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(client.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_response_when_exhausted() {
        let client = MockClient::status(503);
        let response = run(policy(3), &client, PipelineRequest::new("https://a.test", Method::GET))
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 503);
        assert_eq!(client.count(), 4);
    }

    #[tokio::test]
    async fn test_skips_non_retryable_statuses() {
        for status in [404, 501, 505] {
            let client = MockClient::status(status);
            let response = run(policy(3), &client, PipelineRequest::new("https://a.test", Method::GET))
                .await
                .unwrap();
            assert_eq!(response.status.as_u16(), status);
            assert_eq!(client.count(), 1);
        }
    }

    #[tokio::test]
    async fn test_defers_503_with_retry_after() {
        let client = MockClient::new(|request, _| Ok(reply(request, 503, &[("retry-after", "5")])));
        run(policy(3), &client, PipelineRequest::new("https://a.test", Method::GET))
            .await
            .unwrap();
        assert_eq!(client.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_after_retryable_response_is_retried() {
        let client = MockClient::new(|request, attempt| match attempt {
            0 => Ok(reply(request, 500, &[])),
            1 => Err(Error::RequestSend {
                kind: SystemErrorKind::Other,
                message: "connection closed".to_string(),
                inner_error: None,
            }),
            _ => Ok(reply(request, 200, &[])),
        });
        let response = run(policy(3), &client, PipelineRequest::new("https://a.test", Method::GET))
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(client.count(), 3);
    }

    #[tokio::test]
    async fn test_send_failure_without_response_is_not_retried() {
        let client = MockClient::new(|_, _| {
            Err(Error::RequestSend {
                kind: SystemErrorKind::Other,
                message: "connection closed".to_string(),
                inner_error: None,
            })
        });
        let err = run(policy(3), &client, PipelineRequest::new("https://a.test", Method::GET))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RequestSend { .. }), "{:?}", err);
        assert_eq!(client.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chains_errors_carrying_responses() {
        let client = MockClient::new(|request, attempt| {
            Err(Error::http(reply(request, 408, &[]), format!("attempt {}", attempt)))
        });
        let err = run(policy(2), &client, PipelineRequest::new("https://a.test", Method::GET))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "attempt 2");
        assert_eq!(err.inner_error().unwrap().to_string(), "attempt 1");
        assert_eq!(
            err.inner_error().unwrap().inner_error().unwrap().to_string(),
            "attempt 0"
        );
    }
}
