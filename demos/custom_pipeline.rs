//! Example demonstrating a hand-assembled pipeline.
//!
//! This example shows how to:
//! - Write a custom policy and order it against the built-in ones
//! - Tune retries, the user agent and log redaction through `PipelineOptions`
//! - Remove a built-in policy
//! - Send raw requests without an operation spec
//! - Cancel a request with an abort signal
//!
//! Run with: `cargo run --example custom_pipeline`

use async_trait::async_trait;
use http::{HeaderValue, Method};
use restline::client::{create_client_pipeline, ClientPipelineOptions};
use restline::pipeline::{AddPolicyOptions, Next, PipelineOptions, Policy, RemovePolicyOptions};
use restline::policies::log::LogPolicyOptions;
use restline::policies::redirect::REDIRECT_POLICY_NAME;
use restline::policies::user_agent::UserAgentOptions;
use restline::retry::RetryOptions;
use restline::{
    AbortController, Error, PipelineRequest, PipelineResponse, ServiceClient,
};
use std::time::{Duration, Instant};

/// Stamps every attempt with the time it left the client.
struct SentAtPolicy;

#[async_trait]
impl Policy for SentAtPolicy {
    fn name(&self) -> &str {
        "sentAtPolicy"
    }

    async fn send_request(
        &self,
        mut request: PipelineRequest,
        next: Next<'_>,
    ) -> restline::Result<PipelineResponse> {
        let now = httpdate::fmt_http_date(std::time::SystemTime::now());
        if let Ok(value) = HeaderValue::from_str(&now) {
            request.headers.insert("x-sent-at", value);
        }
        let start = Instant::now();
        let response = next.send(request).await;
        tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "Attempt finished");
        response
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("restline=info,custom_pipeline=info")
        .init();

    let mut pipeline = create_client_pipeline(&ClientPipelineOptions {
        pipeline_options: PipelineOptions {
            retry_options: RetryOptions::builder()
                .max_retries(3)
                .retry_delay(Duration::from_millis(250))
                .max_retry_delay(Duration::from_secs(5))
                .build(),
            user_agent_options: UserAgentOptions {
                user_agent_prefix: Some("custom-pipeline-demo/1.0".to_string()),
            },
            log_options: LogPolicyOptions {
                additional_allowed_header_names: vec!["x-sent-at".to_string()],
                additional_allowed_query_parameters: vec!["userId".to_string()],
            },
            ..Default::default()
        },
        ..Default::default()
    })?;

    // Runs inside the retry loop so each attempt is stamped.
    pipeline.add_policy(
        SentAtPolicy,
        AddPolicyOptions::after_phase(restline::pipeline::PipelinePhase::Retry)
            .before_policy("logPolicy"),
    )?;

    // Let redirects surface to the caller.
    let removed = pipeline.remove_policy(&RemovePolicyOptions::by_name(REDIRECT_POLICY_NAME));
    println!("Removed {} policy", removed.len());

    println!("=== Policy order ===");
    for name in pipeline.policy_names()? {
        println!("  {}", name);
    }
    println!();

    let client = ServiceClient::builder()
        .base_uri("https://jsonplaceholder.typicode.com")?
        .pipeline(pipeline)
        .build()?;

    println!("=== Raw request ===");
    let request = PipelineRequest::new(
        "https://jsonplaceholder.typicode.com/posts?userId=1",
        Method::GET,
    );
    let response = client.send_request(request).await?;
    println!("Status: {}", response.status);
    if let Some(serde_json::Value::Array(posts)) = &response.parsed_body {
        println!("Parsed {} posts", posts.len());
    }
    println!();

    println!("=== Abort ===");
    let controller = AbortController::new();
    let mut request = PipelineRequest::new("https://jsonplaceholder.typicode.com/photos", Method::GET);
    request.abort_signal = Some(controller.signal());
    controller.abort();
    match client.send_request(request).await {
        Err(Error::Aborted) => println!("Request aborted before it was sent"),
        other => println!("Unexpected outcome: {:?}", other.map(|r| r.status)),
    }

    Ok(())
}
