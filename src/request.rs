//! The request record that flows through the pipeline.

use crate::operation::{OperationArguments, OperationSpec};
use crate::policies::proxy::ProxySettings;
use bytes::Bytes;
use http::{HeaderMap, Method};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc::UnboundedSender, watch};

/// Fires an [`AbortSignal`].
///
/// # Examples
///
/// ```
/// use restline::AbortController;
///
/// let controller = AbortController::new();
/// let signal = controller.signal();
/// assert!(!signal.is_aborted());
///
/// controller.abort();
/// assert!(signal.is_aborted());
/// ```
#[derive(Debug)]
pub struct AbortController {
    sender: watch::Sender<bool>,
}

impl AbortController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Returns a signal that observes this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Aborts every request holding one of this controller's signals.
    pub fn abort(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation for a request.
///
/// Policies check the signal before starting costly work, and the transport
/// races the in-flight call against it.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    receiver: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Returns `true` once the controller has aborted.
    pub fn is_aborted(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when the controller aborts. Never resolves if the controller
    /// is dropped without aborting.
    pub async fn aborted(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Direction of a [`TransferProgress`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Cumulative byte count of an upload or download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub loaded_bytes: u64,
    pub direction: TransferDirection,
}

/// A form field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FormDataValue {
    Text(String),
    File {
        data: Bytes,
        file_name: Option<String>,
        content_type: Option<String>,
    },
    /// Sent as one part per item under the same name.
    List(Vec<FormDataValue>),
}

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Multipart parts in order; the transport writes the boundary and
    /// `Content-Type`.
    Multipart(Vec<(String, FormDataValue)>),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// The body as UTF-8 text, when it is a byte body.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestBody::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Bytes(Bytes::from(text))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(bytes))
    }
}

/// The operation a request was built for.
///
/// Attached by the service client and read by the serialization and
/// deserialization policies.
#[derive(Debug)]
pub struct OperationContext {
    pub spec: Arc<OperationSpec>,
    pub arguments: OperationArguments,
}

/// A request on its way through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Form fields, encoded into `body` by the form-data policy.
    pub form_data: Option<IndexMap<String, FormDataValue>>,
    /// Zero means no timeout.
    pub timeout: Option<Duration>,
    pub abort_signal: Option<AbortSignal>,
    /// Unique id, sent by the client-request-id policy.
    pub request_id: String,
    /// Statuses whose body is handed back as a stream instead of text.
    pub stream_response_status_codes: HashSet<u16>,
    pub allow_insecure_connection: bool,
    pub disable_keep_alive: bool,
    pub proxy_settings: Option<ProxySettings>,
    pub progress: Option<UnboundedSender<TransferProgress>>,
    pub operation: Option<Arc<OperationContext>>,
}

impl PipelineRequest {
    /// Creates a request with a fresh id and no body.
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            form_data: None,
            timeout: None,
            abort_signal: None,
            request_id: uuid::Uuid::new_v4().to_string(),
            stream_response_status_codes: HashSet::new(),
            allow_insecure_connection: false,
            disable_keep_alive: false,
            proxy_settings: None,
            progress: None,
            operation: None,
        }
    }

    /// Returns `true` if the request's abort signal has fired.
    pub fn is_aborted(&self) -> bool {
        self.abort_signal
            .as_ref()
            .is_some_and(AbortSignal::is_aborted)
    }
}
