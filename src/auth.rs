//! Access tokens and the cycler that keeps one fresh.
//!
//! A [`TokenCycler`] sits between the bearer-token policy and a
//! [`TokenCredential`]. It caches the last token, blocks callers only when
//! that token is missing or about to expire, refreshes in the background
//! when expiry is approaching, and makes concurrent callers share a single
//! in-flight refresh.

use crate::request::{AbortSignal, PipelineRequest};
use crate::response::PipelineResponse;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

/// Default window before expiry inside which callers wait for a new token.
pub const DEFAULT_FORCED_REFRESH_WINDOW: Duration = Duration::from_secs(1);

/// Default pause between failed fetches while refreshing.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Default window before expiry inside which a background refresh starts.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(120);

/// A bearer token and the time it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: SystemTime,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: SystemTime) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Options passed to [`TokenCredential::get_token`].
#[derive(Debug, Clone, Default)]
pub struct GetTokenOptions {
    pub abort_signal: Option<AbortSignal>,
}

/// Something that can issue access tokens for a set of scopes.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use restline::auth::{AccessToken, GetTokenOptions, TokenCredential};
/// use std::time::{Duration, SystemTime};
///
/// struct StaticCredential(String);
///
/// #[async_trait]
/// impl TokenCredential for StaticCredential {
///     async fn get_token(
///         &self,
///         _scopes: &[String],
///         _options: &GetTokenOptions,
///     ) -> restline::Result<Option<AccessToken>> {
///         let expires_on = SystemTime::now() + Duration::from_secs(3600);
///         Ok(Some(AccessToken::new(self.0.clone(), expires_on)))
///     }
/// }
/// ```
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Fetches a token. `Ok(None)` means no token is available right now.
    async fn get_token(
        &self,
        scopes: &[String],
        options: &GetTokenOptions,
    ) -> Result<Option<AccessToken>>;
}

/// Timing knobs for a [`TokenCycler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCyclerOptions {
    /// Callers wait for a refresh once the token is this close to expiry.
    pub forced_refresh_window: Duration,
    /// Pause between failed fetches during a refresh.
    pub retry_interval: Duration,
    /// A background refresh starts once the token is this close to expiry.
    pub refresh_window: Duration,
}

impl Default for TokenCyclerOptions {
    fn default() -> Self {
        Self {
            forced_refresh_window: DEFAULT_FORCED_REFRESH_WINDOW,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            refresh_window: DEFAULT_REFRESH_WINDOW,
        }
    }
}

type RefreshOutcome = Option<std::result::Result<AccessToken, String>>;

#[derive(Default)]
struct CyclerState {
    token: Option<AccessToken>,
    refresh: Option<watch::Receiver<RefreshOutcome>>,
}

/// Caches and refreshes the token of a [`TokenCredential`].
///
/// Cloning a cycler shares its cache.
///
/// # Examples
///
/// ```no_run
/// use restline::auth::{GetTokenOptions, TokenCredential, TokenCycler, TokenCyclerOptions};
/// use std::sync::Arc;
///
/// # async fn example(credential: Arc<dyn TokenCredential>) -> Result<(), restline::Error> {
/// let cycler = TokenCycler::new(credential, TokenCyclerOptions::default());
/// let scopes = vec!["https://pets.example.com/.default".to_string()];
///
/// let token = cycler.get_token(&scopes, &GetTokenOptions::default()).await?;
/// println!("expires at {:?}", token.expires_on);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TokenCycler {
    credential: Arc<dyn TokenCredential>,
    options: TokenCyclerOptions,
    state: Arc<Mutex<CyclerState>>,
}

impl TokenCycler {
    pub fn new(credential: Arc<dyn TokenCredential>, options: TokenCyclerOptions) -> Self {
        Self {
            credential,
            options,
            state: Arc::new(Mutex::new(CyclerState::default())),
        }
    }

    pub fn credential(&self) -> &Arc<dyn TokenCredential> {
        &self.credential
    }

    /// Returns a valid token, refreshing first if the cached one is missing
    /// or about to expire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenRefresh`] when the credential could not produce
    /// a token before the refresh deadline.
    pub async fn get_token(&self, scopes: &[String], options: &GetTokenOptions) -> Result<AccessToken> {
        let now = SystemTime::now();
        let (cached, should_refresh) = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let cached = state
                .token
                .clone()
                .filter(|token| !expires_within(token, self.options.forced_refresh_window, now));
            let should_refresh = state.refresh.is_none()
                && state
                    .token
                    .as_ref()
                    .map_or(true, |token| expires_within(token, self.options.refresh_window, now));
            (cached, should_refresh)
        };

        match cached {
            Some(token) => {
                if should_refresh {
                    tracing::debug!("Token is close to expiry, refreshing in the background");
                    self.start_refresh(scopes, options);
                }
                Ok(token)
            }
            None => self.refresh(scopes, options).await,
        }
    }

    /// Waits for the in-flight refresh, starting one if none is running.
    async fn refresh(&self, scopes: &[String], options: &GetTokenOptions) -> Result<AccessToken> {
        let mut receiver = self.start_refresh(scopes, options);
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::TokenRefresh("the refresh task stopped".to_string()))?;

        match &*outcome {
            Some(Ok(token)) => Ok(token.clone()),
            Some(Err(message)) => Err(Error::TokenRefresh(message.clone())),
            None => Err(Error::TokenRefresh("no token was produced".to_string())),
        }
    }

    fn start_refresh(&self, scopes: &[String], options: &GetTokenOptions) -> watch::Receiver<RefreshOutcome> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(receiver) = &state.refresh {
            return receiver.clone();
        }

        let (sender, receiver) = watch::channel(None);
        state.refresh = Some(receiver.clone());
        let deadline = state
            .token
            .as_ref()
            .map_or_else(SystemTime::now, |token| token.expires_on);
        drop(state);

        let credential = Arc::clone(&self.credential);
        let shared = Arc::clone(&self.state);
        let retry_interval = self.options.retry_interval;
        let scopes = scopes.to_vec();
        let options = options.clone();

        tokio::spawn(async move {
            let outcome =
                fetch_until(credential.as_ref(), &scopes, &options, deadline, retry_interval).await;

            {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                state.token = outcome.as_ref().ok().cloned();
                state.refresh = None;
            }

            if let Err(e) = &outcome {
                tracing::warn!(error = %e, "Token refresh failed");
            }
            sender.send_replace(Some(outcome.map_err(|e| e.to_string())));
        });

        receiver
    }
}

impl std::fmt::Debug for TokenCycler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCycler")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn expires_within(token: &AccessToken, window: Duration, now: SystemTime) -> bool {
    token
        .expires_on
        .checked_sub(window)
        .map_or(true, |threshold| threshold < now)
}

/// Polls the credential until it yields a token. Errors are swallowed until
/// `deadline`; the attempt after it is final.
async fn fetch_until(
    credential: &dyn TokenCredential,
    scopes: &[String],
    options: &GetTokenOptions,
    deadline: SystemTime,
    retry_interval: Duration,
) -> Result<AccessToken> {
    while SystemTime::now() < deadline {
        match credential.get_token(scopes, options).await {
            Ok(Some(token)) => return Ok(token),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Token fetch failed, will retry"),
        }
        tokio::time::sleep(retry_interval).await;
    }

    credential
        .get_token(scopes, options)
        .await?
        .ok_or_else(|| Error::TokenRefresh("the credential returned no token".to_string()))
}

/// Handles a `401` carrying a `WWW-Authenticate` challenge.
///
/// Return `Ok(true)` after updating `request` to have it sent once more.
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    async fn authorize_request_on_challenge(
        &self,
        request: &mut PipelineRequest,
        response: &PipelineResponse,
        scopes: &[String],
        cycler: Option<&TokenCycler>,
    ) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCredential {
        calls: AtomicUsize,
        lifetime: Duration,
        fail: bool,
    }

    impl CountingCredential {
        fn new(lifetime: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                lifetime,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                lifetime: Duration::ZERO,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenCredential for CountingCredential {
        async fn get_token(
            &self,
            _scopes: &[String],
            _options: &GetTokenOptions,
        ) -> Result<Option<AccessToken>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(Error::ConfigurationError("no credentials".to_string()));
            }
            Ok(Some(AccessToken::new(
                format!("token-{}", call),
                SystemTime::now() + self.lifetime,
            )))
        }
    }

    fn scopes() -> Vec<String> {
        vec!["scope/.default".to_string()]
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let credential = CountingCredential::new(Duration::from_secs(3600));
        let cycler = TokenCycler::new(credential.clone(), TokenCyclerOptions::default());
        let scopes = scopes();
        let options = GetTokenOptions::default();

        let (a, b) = tokio::join!(
            cycler.get_token(&scopes, &options),
            cycler.get_token(&scopes, &options)
        );

        assert_eq!(a.unwrap().token, "token-0");
        assert_eq!(b.unwrap().token, "token-0");
        assert_eq!(credential.calls(), 1);

        let cached = cycler.get_token(&scopes, &options).await.unwrap();
        assert_eq!(cached.token, "token-0");
        assert_eq!(credential.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_surfaces_as_refresh_error() {
        let credential = CountingCredential::failing();
        let cycler = TokenCycler::new(credential.clone(), TokenCyclerOptions::default());

        let err = cycler
            .get_token(&scopes(), &GetTokenOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenRefresh(_)));
        assert!(err.to_string().contains("no credentials"));
        assert_eq!(credential.calls(), 1);

        assert!(cycler.get_token(&scopes(), &GetTokenOptions::default()).await.is_err());
        assert_eq!(credential.calls(), 2);
    }

    #[tokio::test]
    async fn test_background_refresh_serves_cached_token() {
        let credential = CountingCredential::new(Duration::from_secs(60));
        let cycler = TokenCycler::new(credential.clone(), TokenCyclerOptions::default());
        let scopes = scopes();
        let options = GetTokenOptions::default();

        let first = cycler.get_token(&scopes, &options).await.unwrap();
        assert_eq!(first.token, "token-0");

        // Inside the refresh window but outside the forced window.
        let second = cycler.get_token(&scopes, &options).await.unwrap();
        assert_eq!(second.token, "token-0");

        for _ in 0..50 {
            if credential.calls() == 2 && cycler.state.lock().unwrap().refresh.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(credential.calls(), 2);
        let refreshed = cycler.get_token(&scopes, &options).await.unwrap();
        assert_eq!(refreshed.token, "token-1");
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AccessToken::new("secret", SystemTime::now());
        assert!(!format!("{:?}", token).contains("secret"));
    }
}
