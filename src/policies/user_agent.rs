//! Identifies the library (and the application built on it) to the service.

use crate::pipeline::{Next, Policy};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::Result;
use async_trait::async_trait;
use http::header::USER_AGENT;
use http::HeaderValue;

pub const USER_AGENT_POLICY_NAME: &str = "userAgentPolicy";

/// Options for [`UserAgentPolicy`] and the tracing policy.
#[derive(Debug, Clone, Default)]
pub struct UserAgentOptions {
    /// Prepended to the library's own user agent, e.g. `"my-app/1.2"`.
    pub user_agent_prefix: Option<String>,
}

/// Builds `"<prefix> restline/<version> (<os>-<arch>)"`.
///
/// # Examples
///
/// ```
/// use restline::policies::user_agent::user_agent_value;
///
/// let value = user_agent_value(Some("pets/2.0"));
/// assert!(value.starts_with("pets/2.0 restline/"));
/// ```
pub fn user_agent_value(prefix: Option<&str>) -> String {
    let library = format!(
        "restline/{} ({}-{})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{} {}", prefix, library),
        None => library,
    }
}

/// Sets `User-Agent` unless the request already carries one.
#[derive(Debug, Clone)]
pub struct UserAgentPolicy {
    value: String,
}

impl UserAgentPolicy {
    pub fn new(options: UserAgentOptions) -> Self {
        Self {
            value: user_agent_value(options.user_agent_prefix.as_deref()),
        }
    }
}

#[async_trait]
impl Policy for UserAgentPolicy {
    fn name(&self) -> &str {
        USER_AGENT_POLICY_NAME
    }

    async fn send_request(&self, mut request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        if !request.headers.contains_key(USER_AGENT) {
            match HeaderValue::from_str(&self.value) {
                Ok(value) => {
                    request.headers.insert(USER_AGENT, value);
                }
                Err(e) => tracing::warn!(error = %e, user_agent = %self.value, "Skipping invalid user agent"),
            }
        }
        next.send(request).await
    }
}
