//! Error types for pipeline and operation calls.
//!
//! Every failure surfaced by the pipeline is an [`Error`]. Variants keep the
//! context needed to diagnose a failed call without re-running it: the status
//! code, the raw body, the response that produced the error and, for retried
//! calls, the chain of earlier failures.

use crate::response::PipelineResponse;
use http::StatusCode;
use serde_json::Value;

/// Code attached to errors raised while sending a request.
pub const REQUEST_SEND_ERROR: &str = "REQUEST_SEND_ERROR";

/// Code attached to errors raised while parsing a response body.
pub const PARSE_ERROR: &str = "PARSE_ERROR";

/// Classification of a transport-level failure.
///
/// The system-error retry policy only retries the kinds for which
/// [`SystemErrorKind::is_retryable`] returns `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemErrorKind {
    /// The connection or socket timed out (`ETIMEDOUT`).
    TimedOut,
    /// The remote host refused the connection (`ECONNREFUSED`).
    ConnectionRefused,
    /// The connection was reset or dropped mid-flight (`ECONNRESET`).
    ConnectionReset,
    /// The host could not be resolved or the resource was missing (`ENOENT`).
    NotFound,
    /// Any other send failure.
    Other,
}

impl SystemErrorKind {
    /// Returns the conventional errno-style code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            SystemErrorKind::TimedOut => "ETIMEDOUT",
            SystemErrorKind::ConnectionRefused => "ECONNREFUSED",
            SystemErrorKind::ConnectionReset => "ECONNRESET",
            SystemErrorKind::NotFound => "ENOENT",
            SystemErrorKind::Other => REQUEST_SEND_ERROR,
        }
    }

    /// Returns `true` if a request failing this way is worth sending again.
    pub fn is_retryable(self) -> bool {
        !matches!(self, SystemErrorKind::Other)
    }
}

/// The main error type for pipeline and operation calls.
///
/// # Examples
///
/// ```no_run
/// use restline::{Error, OperationArguments, OperationSpec, ServiceClient};
///
/// # async fn example(client: ServiceClient, spec: OperationSpec) -> Result<(), Error> {
/// match client.send_operation_request(OperationArguments::new(), &spec).await {
///     Ok(response) => println!("Success: {}", response.data),
///     Err(Error::Http { status, code, message, .. }) => {
///         eprintln!("HTTP error {} ({:?}): {}", status, code, message);
///     }
///     Err(Error::Parse { raw_body, .. }) => {
///         eprintln!("Malformed body: {}", raw_body);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request could not be sent (DNS failure, refused connection, reset socket...).
    #[error("Failed to send the request ({}): {message}", kind.code())]
    RequestSend {
        /// What went wrong at the transport layer.
        kind: SystemErrorKind,
        /// The underlying error message.
        message: String,
        /// The error from the previous attempt, when the request was retried.
        inner_error: Option<Box<Error>>,
    },

    /// The response body could not be parsed as JSON or XML.
    #[error("Error \"{message}\" occurred while parsing the response body - {raw_body}.")]
    Parse {
        /// The parser's error message.
        message: String,
        /// The HTTP status code of the response.
        status: StatusCode,
        /// The raw response body.
        raw_body: String,
    },

    /// The service answered with a status the operation does not expect,
    /// or the response could not be mapped.
    #[error("{message}")]
    Http {
        /// The HTTP status code.
        status: StatusCode,
        /// The error code extracted from the body, if any.
        code: Option<String>,
        /// The error message, taken from the body when it carries one.
        message: String,
        /// The response that produced this error.
        response: Box<PipelineResponse>,
        /// The flattened error response, attached by the service client.
        details: Option<Value>,
        /// The error from the previous attempt, when the request was retried.
        inner_error: Option<Box<Error>>,
    },

    /// A value violated its mapper's contract during serialization.
    #[error("{0}")]
    Validation(String),

    /// Failed to convert the flattened response into the caller's type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The abort signal fired before the request completed.
    #[error("The operation was aborted.")]
    Aborted,

    /// The request timed out.
    #[error("Request timed out")]
    Timeout,

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The pipeline's ordering constraints contain a cycle.
    #[error("Cannot satisfy policy dependencies due to requirements cycle: {}", remaining.join(", "))]
    PolicyCycle {
        /// Names of the policies that could not be scheduled.
        remaining: Vec<String>,
    },

    /// A plain `http` URL was used without allowing insecure connections.
    #[error("Cannot connect to {url} while allowInsecureConnection is false.")]
    InsecureConnection {
        /// The rejected URL.
        url: String,
    },

    /// Bearer tokens are never sent over plain `http`.
    #[error("Bearer token authentication is not permitted for non-TLS protected (non-https) URLs.")]
    InsecureBearerToken,

    /// The credential could not produce an access token before the deadline.
    #[error("Failed to refresh access token: {0}")]
    TokenRefresh(String),

    /// The request payload could not be serialized.
    #[error("{0}")]
    Serialization(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Builds an [`Error::Http`] for `response` with the given message.
    pub fn http(response: PipelineResponse, message: impl Into<String>) -> Self {
        Error::Http {
            status: response.status,
            code: None,
            message: message.into(),
            response: Box::new(response),
            details: None,
            inner_error: None,
        }
    }

    /// Returns `true` for transport failures the system-error retry policy handles.
    ///
    /// # Examples
    ///
    /// ```
    /// use restline::{Error, SystemErrorKind};
    ///
    /// let err = Error::RequestSend {
    ///     kind: SystemErrorKind::ConnectionReset,
    ///     message: "connection reset by peer".to_string(),
    ///     inner_error: None,
    /// };
    /// assert!(err.is_system_error());
    /// assert!(!Error::Timeout.is_system_error());
    /// ```
    pub fn is_system_error(&self) -> bool {
        matches!(self, Error::RequestSend { kind, .. } if kind.is_retryable())
    }

    /// Returns the error code, if this error has one.
    ///
    /// Every transport failure carries [`REQUEST_SEND_ERROR`]; the
    /// errno-style classification is available from
    /// [`Error::system_error_code`].
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::RequestSend { .. } => Some(REQUEST_SEND_ERROR),
            Error::Parse { .. } => Some(PARSE_ERROR),
            Error::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Returns the errno-style code (`ECONNREFUSED`, `ETIMEDOUT`...) of a
    /// transport failure.
    pub fn system_error_code(&self) -> Option<&'static str> {
        match self {
            Error::RequestSend { kind, .. } => Some(kind.code()),
            _ => None,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Parse { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Http { response, .. } => response.body_as_text.as_deref(),
            Error::Parse { raw_body, .. } => Some(raw_body),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns the response attached to this error, if any.
    pub fn response(&self) -> Option<&PipelineResponse> {
        match self {
            Error::Http { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Returns the flattened error details attached by the service client.
    pub fn details(&self) -> Option<&Value> {
        match self {
            Error::Http { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    /// Returns the error from the previous attempt of a retried request.
    pub fn inner_error(&self) -> Option<&Error> {
        match self {
            Error::RequestSend { inner_error, .. } | Error::Http { inner_error, .. } => {
                inner_error.as_deref()
            }
            _ => None,
        }
    }

    /// Chains `previous` beneath this error.
    ///
    /// Variants that cannot carry an inner error are returned unchanged.
    pub fn with_inner_error(mut self, previous: Error) -> Self {
        match &mut self {
            Error::RequestSend { inner_error, .. } | Error::Http { inner_error, .. } => {
                *inner_error = Some(Box::new(previous));
            }
            _ => {}
        }
        self
    }

    /// Takes the response out of an [`Error::Http`], leaving other variants alone.
    pub(crate) fn into_response(self) -> std::result::Result<PipelineResponse, Error> {
        match self {
            Error::Http { response, .. } => Ok(*response),
            other => Err(other),
        }
    }
}

/// A specialized `Result` type for pipeline calls.
///
/// This is a convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_error_kinds() {
        for kind in [
            SystemErrorKind::TimedOut,
            SystemErrorKind::ConnectionRefused,
            SystemErrorKind::ConnectionReset,
            SystemErrorKind::NotFound,
        ] {
            assert!(kind.is_retryable(), "{:?} should be retryable", kind);
        }
        assert!(!SystemErrorKind::Other.is_retryable());
        assert_eq!(SystemErrorKind::ConnectionRefused.code(), "ECONNREFUSED");
    }

    #[test]
    fn test_inner_error_chain() {
        let first = Error::RequestSend {
            kind: SystemErrorKind::TimedOut,
            message: "first".to_string(),
            inner_error: None,
        };
        let second = Error::RequestSend {
            kind: SystemErrorKind::ConnectionReset,
            message: "second".to_string(),
            inner_error: None,
        }
        .with_inner_error(first);

        let inner = second.inner_error().unwrap();
        assert!(matches!(inner, Error::RequestSend { message, .. } if message == "first"));
        assert_eq!(second.code(), Some(REQUEST_SEND_ERROR));
        assert_eq!(second.system_error_code(), Some("ECONNRESET"));
        assert_eq!(inner.system_error_code(), Some("ETIMEDOUT"));
        assert_eq!(Error::Timeout.system_error_code(), None);
    }

    #[test]
    fn test_inner_error_ignored_for_plain_variants() {
        let err = Error::Timeout.with_inner_error(Error::Aborted);
        assert!(err.inner_error().is_none());
    }

    #[test]
    fn test_parse_error_accessors() {
        let err = Error::Parse {
            message: "expected value".to_string(),
            status: StatusCode::OK,
            raw_body: "{oops".to_string(),
        };
        assert_eq!(err.code(), Some(PARSE_ERROR));
        assert_eq!(err.status(), Some(StatusCode::OK));
        assert_eq!(err.raw_response(), Some("{oops"));
        assert!(err.to_string().contains("{oops"));
    }
}
