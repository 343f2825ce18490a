//! Backoff math and `Retry-After` parsing shared by the retry policies.
//!
//! The exponential and system-error policies wait
//! `min(max_retry_delay, retry_delay * 2^n)` before the `n`th retry, with up
//! to half of that replaced by random jitter so that many clients retrying
//! the same service spread out. The throttling policy waits whatever the
//! server asks for in `Retry-After`.

use crate::request::AbortSignal;
use crate::{Error, Result};
use http::HeaderMap;
use rand::Rng;
use std::time::{Duration, SystemTime};

/// Default number of retries for the exponential and system-error policies.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default base delay between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on the delay between retries.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(64);

/// Configuration shared by the exponential and system-error retry policies.
///
/// # Examples
///
/// ```
/// use restline::retry::RetryOptions;
/// use std::time::Duration;
///
/// let options = RetryOptions::builder()
///     .max_retries(3)
///     .retry_delay(Duration::from_millis(100))
///     .build();
///
/// assert_eq!(options.max_retries, 3);
/// assert_eq!(options.max_retry_delay, Duration::from_secs(64));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// How many times a request may be sent again after the first attempt.
    pub max_retries: u32,

    /// The base delay, doubled for each retry.
    pub retry_delay: Duration,

    /// The largest delay ever waited between two attempts.
    pub max_retry_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }
}

impl RetryOptions {
    /// Creates a new builder for configuring retries.
    pub fn builder() -> RetryOptionsBuilder {
        RetryOptionsBuilder::default()
    }

    /// Returns the clamped exponential delay before retry number `retry_count`,
    /// without jitter.
    ///
    /// # Arguments
    ///
    /// * `retry_count` - The retry about to happen (1 = first retry)
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let multiplier = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.retry_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_retry_delay)
            .min(self.max_retry_delay)
    }

    /// Returns the delay before retry number `retry_count`, with jitter.
    ///
    /// The result lies between half of [`RetryOptions::base_delay`] and the
    /// full base delay.
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let clamped = self.base_delay(retry_count).as_millis() as u64;
        let half = clamped / 2;
        let jitter = rand::thread_rng().gen_range(0..=half);
        Duration::from_millis(half + jitter)
    }
}

/// Builder for [`RetryOptions`].
#[derive(Default)]
pub struct RetryOptionsBuilder {
    max_retries: Option<u32>,
    retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
}

impl RetryOptionsBuilder {
    /// Sets how many retries are allowed.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the base delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Sets the maximum delay.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    /// Builds the `RetryOptions`.
    pub fn build(self) -> RetryOptions {
        let default = RetryOptions::default();
        RetryOptions {
            max_retries: self.max_retries.unwrap_or(default.max_retries),
            retry_delay: self.retry_delay.unwrap_or(default.retry_delay),
            max_retry_delay: self.max_retry_delay.unwrap_or(default.max_retry_delay),
        }
    }
}

/// Per-request bookkeeping for a retry policy.
#[derive(Debug, Default)]
pub(crate) struct RetryState {
    pub(crate) retry_count: u32,
    /// The most recent failure, with earlier failures chained beneath it.
    pub(crate) error: Option<Error>,
}

impl RetryState {
    /// Records a failed attempt, chaining the previous failure beneath it.
    pub(crate) fn record_error(&mut self, error: Error) {
        let error = self.chain(error);
        self.error = Some(error);
    }

    /// Returns `error` with every recorded failure chained beneath it.
    pub(crate) fn chain(&mut self, error: Error) -> Error {
        match self.error.take() {
            Some(previous) => error.with_inner_error(previous),
            None => error,
        }
    }
}

/// Parses a `Retry-After` value given in seconds or as an HTTP date.
///
/// Dates in the past yield a zero delay. Unparseable values yield `None`.
///
/// # Examples
///
/// ```
/// use restline::retry::parse_retry_after;
/// use std::time::Duration;
///
/// assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
/// assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
        return None;
    }

    let date_time = httpdate::parse_http_date(value).ok()?;
    Some(
        date_time
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}

/// Reads the `Retry-After` header.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<&str> {
    headers.get(http::header::RETRY_AFTER)?.to_str().ok()
}

/// Sleeps for `duration`, returning [`Error::Aborted`] early if `signal` fires.
pub async fn sleep_with_abort(duration: Duration, signal: Option<&AbortSignal>) -> Result<()> {
    match signal {
        Some(signal) => {
            if signal.is_aborted() {
                return Err(Error::Aborted);
            }
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                _ = signal.aborted() => Err(Error::Aborted),
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    }
}
