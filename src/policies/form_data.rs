//! Encodes [`PipelineRequest::form_data`] into the request body.

use crate::pipeline::{Next, Policy};
use crate::request::{FormDataValue, PipelineRequest, RequestBody};
use crate::response::PipelineResponse;
use crate::Result;
use async_trait::async_trait;
use http::header::CONTENT_TYPE;

pub const FORM_DATA_POLICY_NAME: &str = "formDataPolicy";

/// Turns form fields into a multipart body, or a URL-encoded one when the
/// request's `Content-Type` is `application/x-www-form-urlencoded`.
///
/// List values become one field per item under the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormDataPolicy;

fn flatten(name: &str, value: FormDataValue, fields: &mut Vec<(String, FormDataValue)>) {
    match value {
        FormDataValue::List(items) => {
            for item in items {
                flatten(name, item, fields);
            }
        }
        other => fields.push((name.to_string(), other)),
    }
}

#[async_trait]
impl Policy for FormDataPolicy {
    fn name(&self) -> &str {
        FORM_DATA_POLICY_NAME
    }

    async fn send_request(&self, mut request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse> {
        if let Some(form) = request.form_data.take() {
            let mut fields = Vec::new();
            for (name, value) in form {
                flatten(&name, value, &mut fields);
            }

            let url_encoded = request
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.contains("application/x-www-form-urlencoded"));

            request.body = if url_encoded {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (name, value) in &fields {
                    let text = match value {
                        FormDataValue::Text(text) => text.clone(),
                        FormDataValue::File { data, .. } => String::from_utf8_lossy(data).into_owned(),
                        FormDataValue::List(_) => continue,
                    };
                    serializer.append_pair(name, &text);
                }
                RequestBody::from(serializer.finish())
            } else {
                RequestBody::Multipart(fields)
            };
        }
        next.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::testing::{run, MockClient};
    use bytes::Bytes;
    use http::{HeaderValue, Method};
    use indexmap::IndexMap;

    fn form() -> IndexMap<String, FormDataValue> {
        let mut form = IndexMap::new();
        form.insert("name".to_string(), FormDataValue::Text("Rex & co".to_string()));
        form.insert(
            "tag".to_string(),
            FormDataValue::List(vec![
                FormDataValue::Text("a".to_string()),
                FormDataValue::Text("b".to_string()),
            ]),
        );
        form
    }

    #[tokio::test]
    async fn test_url_encoded_form() {
        let client = MockClient::status(200);
        let mut request = PipelineRequest::new("https://a.test", Method::POST);
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        request.form_data = Some(form());
        run(FormDataPolicy, &client, request).await.unwrap();

        let sent = client.sent();
        assert_eq!(sent[0].body.as_text(), Some("name=Rex+%26+co&tag=a&tag=b"));
        assert!(sent[0].form_data.is_none());
    }

    #[tokio::test]
    async fn test_multipart_form() {
        let client = MockClient::status(200);
        let mut request = PipelineRequest::new("https://a.test", Method::POST);
        let mut fields = form();
        fields.insert(
            "file".to_string(),
            FormDataValue::File {
                data: Bytes::from_static(b"hello"),
                file_name: Some("hello.txt".to_string()),
                content_type: None,
            },
        );
        request.form_data = Some(fields);
        run(FormDataPolicy, &client, request).await.unwrap();

        match &client.sent()[0].body {
            RequestBody::Multipart(parts) => {
                let names: Vec<&str> = parts.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["name", "tag", "tag", "file"]);
            }
            other => panic!("expected multipart, got {:?}", other),
        }
    }
}
