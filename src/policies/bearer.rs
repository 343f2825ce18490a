//! Attaches `Authorization: Bearer` tokens to requests.

use crate::auth::{ChallengeHandler, GetTokenOptions, TokenCredential, TokenCycler, TokenCyclerOptions};
use crate::pipeline::{Next, Policy};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::{Error, Result};
use async_trait::async_trait;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::HeaderValue;
use std::sync::Arc;

pub const BEARER_TOKEN_AUTHENTICATION_POLICY_NAME: &str = "bearerTokenAuthenticationPolicy";

/// Adds a bearer token from a [`TokenCycler`] to every request.
///
/// Requests to non-`https` URLs are rejected before a token is fetched.
/// With a [`ChallengeHandler`], a `401` answer carrying `WWW-Authenticate`
/// is handed to the handler and, if it re-authorizes the request, sent
/// once more.
///
/// # Examples
///
/// ```no_run
/// use restline::auth::TokenCredential;
/// use restline::pipeline::{AddPolicyOptions, Pipeline};
/// use restline::policies::bearer::BearerTokenAuthenticationPolicy;
/// use std::sync::Arc;
///
/// # fn example(credential: Arc<dyn TokenCredential>) -> Result<(), restline::Error> {
/// let mut pipeline = Pipeline::new();
/// pipeline.add_policy(
///     BearerTokenAuthenticationPolicy::new(credential, vec!["api://pets/.default".to_string()]),
///     AddPolicyOptions::default(),
/// )?;
/// # Ok(())
/// # }
/// ```
pub struct BearerTokenAuthenticationPolicy {
    scopes: Vec<String>,
    cycler: Option<TokenCycler>,
    challenge_handler: Option<Arc<dyn ChallengeHandler>>,
}

impl BearerTokenAuthenticationPolicy {
    pub fn new(credential: Arc<dyn TokenCredential>, scopes: Vec<String>) -> Self {
        Self::with_cycler_options(credential, scopes, TokenCyclerOptions::default())
    }

    pub fn with_cycler_options(
        credential: Arc<dyn TokenCredential>,
        scopes: Vec<String>,
        options: TokenCyclerOptions,
    ) -> Self {
        Self {
            scopes,
            cycler: Some(TokenCycler::new(credential, options)),
            challenge_handler: None,
        }
    }

    /// A policy that only answers challenges and never adds a token up front.
    pub fn without_credential(scopes: Vec<String>) -> Self {
        Self {
            scopes,
            cycler: None,
            challenge_handler: None,
        }
    }

    pub fn with_challenge_handler(mut self, handler: Arc<dyn ChallengeHandler>) -> Self {
        self.challenge_handler = Some(handler);
        self
    }

    async fn authorize(&self, request: &mut PipelineRequest) -> Result<()> {
        let Some(cycler) = &self.cycler else {
            return Ok(());
        };
        let options = GetTokenOptions {
            abort_signal: request.abort_signal.clone(),
        };
        let token = cycler.get_token(&self.scopes, &options).await?;

        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.token))
            .map_err(|e| Error::TokenRefresh(format!("token is not a valid header value: {}", e)))?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

fn is_challenge(response: &PipelineResponse) -> bool {
    response.status.as_u16() == 401
        && response
            .header(WWW_AUTHENTICATE.as_str())
            .is_some_and(|challenge| !challenge.is_empty())
}

impl std::fmt::Debug for BearerTokenAuthenticationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenAuthenticationPolicy")
            .field("scopes", &self.scopes)
            .field("has_challenge_handler", &self.challenge_handler.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Policy for BearerTokenAuthenticationPolicy {
    fn name(&self) -> &str {
        BEARER_TOKEN_AUTHENTICATION_POLICY_NAME
    }

    async fn send_request(&self, mut request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        if !request.url.to_lowercase().starts_with("https://") {
            return Err(Error::InsecureBearerToken);
        }

        self.authorize(&mut request).await?;

        let outcome = next.send(request.clone()).await;
        let Some(handler) = &self.challenge_handler else {
            return outcome;
        };

        let challenge = match &outcome {
            Ok(response) => Some(response),
            Err(e) => e.response(),
        }
        .filter(|response| is_challenge(response));
        let Some(response) = challenge else {
            return outcome;
        };

        tracing::debug!("Received an authentication challenge");
        let authorized = handler
            .authorize_request_on_challenge(&mut request, response, &self.scopes, self.cycler.as_ref())
            .await?;
        if authorized {
            return next.send(request).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessToken;
    use crate::policies::testing::{reply, run, MockClient};
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};

    #[derive(Default)]
    struct FixedCredential {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenCredential for FixedCredential {
        async fn get_token(
            &self,
            _scopes: &[String],
            _options: &GetTokenOptions,
        ) -> Result<Option<AccessToken>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(AccessToken::new(
                "abc",
                SystemTime::now() + Duration::from_secs(3600),
            )))
        }
    }

    struct ClaimsHandler;

    #[async_trait]
    impl ChallengeHandler for ClaimsHandler {
        async fn authorize_request_on_challenge(
            &self,
            request: &mut PipelineRequest,
            response: &PipelineResponse,
            _scopes: &[String],
            cycler: Option<&TokenCycler>,
        ) -> Result<bool> {
            assert!(cycler.is_some());
            let challenge = response.header("www-authenticate").unwrap_or_default();
            if !challenge.contains("claims") {
                return Ok(false);
            }
            request
                .headers
                .insert(AUTHORIZATION, HeaderValue::from_static("Bearer with-claims"));
            Ok(true)
        }
    }

    fn policy(credential: Arc<FixedCredential>) -> BearerTokenAuthenticationPolicy {
        BearerTokenAuthenticationPolicy::new(credential, vec!["scope".to_string()])
    }

    #[tokio::test]
    async fn test_rejects_plain_http() {
        let credential = Arc::new(FixedCredential::default());
        let client = MockClient::status(200);
        let err = run(
            policy(credential.clone()),
            &client,
            PipelineRequest::new("HTTP://a.test/", Method::GET),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::InsecureBearerToken));
        assert_eq!(client.count(), 0);
        assert_eq!(credential.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sets_authorization_header() {
        let client = MockClient::status(200);
        run(
            policy(Arc::default()),
            &client,
            PipelineRequest::new("HTTPS://a.test/", Method::GET),
        )
        .await
        .unwrap();

        let sent = client.sent();
        assert_eq!(sent[0].headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert!(sent[0].headers.get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[tokio::test]
    async fn test_resends_once_after_challenge() {
        let client = MockClient::new(|request, attempt| {
            if attempt == 0 {
                Ok(reply(request, 401, &[("www-authenticate", "Bearer claims=\"e30=\"")]))
            } else {
                Ok(reply(request, 200, &[]))
            }
        });
        let response = run(
            policy(Arc::default()).with_challenge_handler(Arc::new(ClaimsHandler)),
            &client,
            PipelineRequest::new("https://a.test/", Method::GET),
        )
        .await
        .unwrap();

        assert_eq!(response.status.as_u16(), 200);
        let sent = client.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].headers.get(AUTHORIZATION).unwrap(), "Bearer with-claims");
    }

    #[tokio::test]
    async fn test_unhandled_challenge_returns_original_response() {
        let client = MockClient::new(|request, _| Ok(reply(request, 401, &[("www-authenticate", "Bearer")])));
        let response = run(
            policy(Arc::default()).with_challenge_handler(Arc::new(ClaimsHandler)),
            &client,
            PipelineRequest::new("https://a.test/", Method::GET),
        )
        .await
        .unwrap();

        assert_eq!(response.status.as_u16(), 401);
        assert_eq!(client.count(), 1);

        let client = MockClient::status(401);
        run(
            policy(Arc::default()).with_challenge_handler(Arc::new(ClaimsHandler)),
            &client,
            PipelineRequest::new("https://a.test/", Method::GET),
        )
        .await
        .unwrap();
        assert_eq!(client.count(), 1);
    }
}
