//! Asks the server for compressed responses.

use crate::pipeline::{Next, Policy};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::Result;
use async_trait::async_trait;
use http::header::ACCEPT_ENCODING;
use http::{HeaderValue, Method};

pub const DECOMPRESS_RESPONSE_POLICY_NAME: &str = "decompressResponsePolicy";

/// Sets `Accept-Encoding: gzip,deflate` on every request except `HEAD`.
///
/// The transport decodes compressed bodies transparently.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecompressResponsePolicy;

#[async_trait]
impl Policy for DecompressResponsePolicy {
    fn name(&self) -> &str {
        DECOMPRESS_RESPONSE_POLICY_NAME
    }

    async fn send_request(&self, mut request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        if request.method != Method::HEAD {
            request
                .headers
                .insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip,deflate"));
        }
        next.send(request).await
    }
}
