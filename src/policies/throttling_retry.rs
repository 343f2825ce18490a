//! Retries throttled requests after the delay the server asks for.

use crate::pipeline::{Next, Policy};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::retry::{parse_retry_after, retry_after, sleep_with_abort};
use crate::Result;
use async_trait::async_trait;

pub const THROTTLING_RETRY_POLICY_NAME: &str = "throttlingRetryPolicy";

/// Default number of throttled retries.
pub const DEFAULT_CLIENT_MAX_RETRY_COUNT: u32 = 3;

/// Retries `429` and `503` responses that carry a `Retry-After` header,
/// waiting the number of seconds (or until the date) it names.
///
/// Responses without a usable `Retry-After`, or with `Retry-After: 0`, are
/// returned untouched.
#[derive(Debug, Clone)]
pub struct ThrottlingRetryPolicy {
    max_retries: u32,
}

impl ThrottlingRetryPolicy {
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_CLIENT_MAX_RETRY_COUNT,
        }
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl Default for ThrottlingRetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Policy for ThrottlingRetryPolicy {
    fn name(&self) -> &str {
        THROTTLING_RETRY_POLICY_NAME
    }

    async fn send_request(&self, request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        let mut response = next.send(request.clone()).await?;

        for attempt in 1..=self.max_retries {
            let status = response.status.as_u16();
            if status != 429 && status != 503 {
                return Ok(response);
            }
            let Some(header) = retry_after(&response.headers) else {
                break;
            };
            let Some(delay) = parse_retry_after(header) else {
                break;
            };
            // "0" seconds stops; a date already in the past retries at once.
            if delay.is_zero() && header.trim().parse::<f64>().is_ok() {
                break;
            }

            tracing::info!(
                status,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Request throttled, retrying after Retry-After delay"
            );
            sleep_with_abort(delay, request.abort_signal.as_ref()).await?;
            response = next.send(request.clone()).await?;
        }

        Ok(response)
    }
}
