//! Newline-delimited JSON request bodies.

use crate::pipeline::{Next, Policy};
use crate::request::{PipelineRequest, RequestBody};
use crate::response::PipelineResponse;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

pub const ND_JSON_POLICY_NAME: &str = "ndJsonPolicy";

/// Rewrites a JSON array body into one JSON document per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NdJsonPolicy;

fn to_nd_json(text: &str) -> Option<String> {
    if !text.starts_with('[') {
        return None;
    }
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Array(items) => Some(items.iter().map(|item| format!("{}\n", item)).collect()),
        _ => None,
    }
}

#[async_trait]
impl Policy for NdJsonPolicy {
    fn name(&self) -> &str {
        ND_JSON_POLICY_NAME
    }

    async fn send_request(&self, mut request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        if let Some(lines) = request.body.as_text().and_then(to_nd_json) {
            request.body = RequestBody::from(lines);
        }
        next.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::testing::{run, MockClient};
    use http::Method;

    #[tokio::test]
    async fn test_rewrites_array_bodies() {
        let client = MockClient::status(200);
        let mut request = PipelineRequest::new("https://a.test", Method::POST);
        request.body = RequestBody::from(r#"[{"a":1},{"b":2}]"#.to_string());
        run(NdJsonPolicy, &client, request).await.unwrap();

        assert_eq!(client.sent()[0].body.as_text(), Some("{\"a\":1}\n{\"b\":2}\n"));
    }

    #[test]
    fn test_leaves_other_bodies_alone() {
        assert_eq!(to_nd_json(r#"{"a":1}"#), None);
        assert_eq!(to_nd_json("[not json"), None);
    }
}
