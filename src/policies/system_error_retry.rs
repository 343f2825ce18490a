//! Retries requests that failed in the transport layer.

use crate::pipeline::{Next, Policy};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::retry::{sleep_with_abort, RetryOptions, RetryState};
use crate::{Error, Result};
use async_trait::async_trait;

pub const SYSTEM_ERROR_RETRY_POLICY_NAME: &str = "systemErrorRetryPolicy";

/// Retries DNS failures, refused or reset connections and socket timeouts
/// (see [`Error::is_system_error`]) with exponential backoff.
///
/// Any response from the server, whatever its status, ends the loop.
#[derive(Debug, Clone, Default)]
pub struct SystemErrorRetryPolicy {
    options: RetryOptions,
}

impl SystemErrorRetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Policy for SystemErrorRetryPolicy {
    fn name(&self) -> &str {
        SYSTEM_ERROR_RETRY_POLICY_NAME
    }

    async fn send_request(&self, request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        let mut state = RetryState::default();

        loop {
            let error = match next.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            state.retry_count += 1;

            if !error.is_system_error() || state.retry_count > self.options.max_retries {
                return Err(state.chain(error));
            }
            if request.is_aborted() {
                return Err(Error::Aborted);
            }

            tracing::warn!(
                error = %error,
                attempt = state.retry_count,
                "Request failed to send"
            );
            state.record_error(error);

            let delay = self.options.delay_for_attempt(state.retry_count);
            tracing::info!(delay_ms = delay.as_millis() as u64, "Retrying request");
            sleep_with_abort(delay, request.abort_signal.as_ref()).await?;
        }
    }
}
