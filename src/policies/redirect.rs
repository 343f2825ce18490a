//! Follows server-side redirects.

use crate::pipeline::{Next, Policy};
use crate::request::{PipelineRequest, RequestBody};
use crate::response::PipelineResponse;
use crate::Result;
use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, LOCATION};
use http::Method;
use url::Url;

pub const REDIRECT_POLICY_NAME: &str = "redirectPolicy";

/// Default maximum number of redirects followed for one request.
pub const DEFAULT_MAX_REDIRECTS: u32 = 20;

/// Options for [`RedirectPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectOptions {
    pub max_retries: u32,
}

impl Default for RedirectOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// Follows `Location` for:
///
/// - 300 and 307, whatever the method;
/// - 301 and 302 for `GET` and `HEAD` only;
/// - 303 for `POST` only, resent as a bodyless `GET`.
///
/// Once the limit is reached the last redirect response is returned as is.
#[derive(Debug, Clone, Default)]
pub struct RedirectPolicy {
    options: RedirectOptions,
}

impl RedirectPolicy {
    pub fn new(options: RedirectOptions) -> Self {
        Self { options }
    }
}

fn should_follow(status: u16, method: &Method) -> bool {
    match status {
        300 | 307 => true,
        301 | 302 => *method == Method::GET || *method == Method::HEAD,
        303 => *method == Method::POST,
        _ => false,
    }
}

#[async_trait]
impl Policy for RedirectPolicy {
    fn name(&self) -> &str {
        REDIRECT_POLICY_NAME
    }

    async fn send_request(&self, request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        let mut response = next.send(request).await?;
        let mut redirects = 0;

        loop {
            let status = response.status.as_u16();
            let Some(location) = response.header(LOCATION.as_str()).map(str::to_string) else {
                return Ok(response);
            };
            if redirects >= self.options.max_retries || !should_follow(status, &response.request.method) {
                return Ok(response);
            }

            let mut request = response.request;
            request.url = Url::parse(&request.url)?.join(&location)?.to_string();
            if status == 303 {
                request.method = Method::GET;
                request.headers.remove(CONTENT_LENGTH);
                request.body = RequestBody::Empty;
            }

            tracing::debug!(status, location = %request.url, redirects, "Following redirect");
            response = next.send(request).await?;
            redirects += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::testing::{reply, run, MockClient};

    fn redirecting(status: u16) -> MockClient {
        MockClient::new(move |request, attempt| {
            if attempt == 0 {
                Ok(reply(request, status, &[("location", "/moved?x=1")]))
            } else {
                Ok(reply(request, 200, &[]))
            }
        })
    }

    #[tokio::test]
    async fn test_follows_relative_location() {
        let client = redirecting(302);
        let response = run(
            RedirectPolicy::default(),
            &client,
            PipelineRequest::new("https://a.test/start", Method::GET),
        )
        .await
        .unwrap();

        assert_eq!(response.status.as_u16(), 200);
        assert_eq!(client.sent()[1].url, "https://a.test/moved?x=1");
    }

    #[tokio::test]
    async fn test_post_303_becomes_get_without_body() {
        let client = redirecting(303);
        let mut request = PipelineRequest::new("https://a.test/items", Method::POST);
        request.body = RequestBody::from("payload".to_string());
        request.headers.insert(CONTENT_LENGTH, http::HeaderValue::from_static("7"));
        run(RedirectPolicy::default(), &client, request).await.unwrap();

        let second = &client.sent()[1];
        assert_eq!(second.method, Method::GET);
        assert!(second.body.is_empty());
        assert!(second.headers.get(CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn test_post_301_is_not_followed() {
        let client = redirecting(301);
        let response = run(
            RedirectPolicy::default(),
            &client,
            PipelineRequest::new("https://a.test/items", Method::POST),
        )
        .await
        .unwrap();

        assert_eq!(response.status.as_u16(), 301);
        assert_eq!(client.count(), 1);
    }

    #[tokio::test]
    async fn test_stops_at_the_limit() {
        let client = MockClient::new(|request, _| Ok(reply(request, 307, &[("location", "/loop")])));
        let policy = RedirectPolicy::new(RedirectOptions { max_retries: 3 });
        let response = run(policy, &client, PipelineRequest::new("https://a.test/", Method::PUT))
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 307);
        assert_eq!(client.count(), 4);
    }
}
