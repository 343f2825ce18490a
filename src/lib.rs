//! # Restline - an operation-driven HTTP pipeline
//!
//! Restline sends REST calls described by declarative [`OperationSpec`]s
//! through a phase-ordered pipeline of named policies, built on top of
//! `reqwest`. Request and response payloads are converted by a
//! mapper-driven serializer that understands composite, polymorphic,
//! sequence and dictionary shapes on both JSON and XML wires.
//!
//! ## Quick Start
//!
//! ```no_run
//! use http::Method;
//! use restline::mapper::{CompositeMapper, Mapper, MapperRegistry};
//! use restline::operation::{OperationParameter, OperationResponseSpec};
//! use restline::serializer::Serializer;
//! use restline::{OperationArguments, OperationSpec, ServiceClient};
//! use serde::Deserialize;
//! use std::sync::Arc;
//!
//! #[derive(Deserialize)]
//! struct Pet {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), restline::Error> {
//!     let registry = MapperRegistry::builder()
//!         .mapper(
//!             "Pet",
//!             Mapper::composite(
//!                 CompositeMapper::new("Pet")
//!                     .property("id", Mapper::number().named("id"))
//!                     .property("name", Mapper::string().named("name")),
//!             )
//!             .named("Pet"),
//!         )
//!         .build()?;
//!     let serializer = Serializer::new(Arc::new(registry), false);
//!
//!     let get_pet = OperationSpec::new(Method::GET, serializer)
//!         .path("/pets/{petId}")
//!         .url_parameter(OperationParameter::new("petId", Mapper::string().named("petId").required()))
//!         .response(200, OperationResponseSpec::new().body(Mapper::reference("Pet")));
//!
//!     let client = ServiceClient::builder()
//!         .base_uri("https://pets.example.com")?
//!         .build()?;
//!
//!     let args = OperationArguments::new().with("petId", "42")?;
//!     let pet = client.send_operation_request_as::<Pet>(args, &get_pet).await?;
//!     println!("Pet {}: {}", pet.data.id, pet.data.name);
//!     println!("Request took {:?}", pet.latency);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Mapper-driven serialization** - Constraint validation, polymorphic discriminators, XML attributes and namespaces
//! - **Phase-ordered pipeline** - Policies run in `Serialize`, unphased, `Deserialize` and `Retry` order, with before/after constraints
//! - **Retries** - Exponential backoff, `Retry-After` throttling and transient network failures
//! - **Bearer authentication** - Token caching with background refresh and de-duplicated fetches
//! - **Structured logging** - `tracing` spans per request and sanitized request/response events
//! - **Cancellation** - Abort signals honoured by every policy that waits and by the transport
//!
//! ## Error Handling
//!
//! Errors keep the response that produced them:
//!
//! ```no_run
//! use restline::{Error, OperationArguments, OperationSpec, ServiceClient};
//!
//! # async fn example(client: ServiceClient, spec: OperationSpec) -> Result<(), Error> {
//! match client.send_operation_request(OperationArguments::new(), &spec).await {
//!     Ok(response) => println!("Success: {}", response.data),
//!     Err(e @ Error::Http { .. }) => {
//!         eprintln!("HTTP error {:?} ({:?}): {}", e.status(), e.code(), e);
//!         eprintln!("  Raw response: {:?}", e.raw_response());
//!     }
//!     Err(e) if e.is_system_error() => eprintln!("Network failure: {}", e),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Policies
//!
//! ```no_run
//! use restline::pipeline::{AddPolicyOptions, PipelineOptions, PipelinePhase};
//! use restline::retry::RetryOptions;
//! use restline::client::{create_client_pipeline, ClientPipelineOptions};
//! use restline::policies::nd_json::NdJsonPolicy;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), restline::Error> {
//! let mut pipeline = create_client_pipeline(&ClientPipelineOptions {
//!     pipeline_options: PipelineOptions {
//!         retry_options: RetryOptions::builder()
//!             .max_retries(5)
//!             .retry_delay(Duration::from_millis(100))
//!             .max_retry_delay(Duration::from_secs(30))
//!             .build(),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! })?;
//! pipeline.add_policy(NdJsonPolicy, AddPolicyOptions::in_phase(PipelinePhase::Serialize))?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod mapper;
pub mod operation;
pub mod pipeline;
pub mod policies;
pub mod request;
pub mod response;
pub mod retry;
pub mod serializer;
pub mod transport;
pub mod url_builder;
pub mod xml;

pub use client::{create_client_pipeline, ServiceClient, ServiceClientBuilder};
pub use error::{Error, Result, SystemErrorKind};
pub use operation::{OperationArguments, OperationOptions, OperationSpec};
pub use pipeline::{Pipeline, PipelineOptions};
pub use request::{AbortController, AbortSignal, PipelineRequest};
pub use response::{OperationResponse, PipelineResponse, Response};
pub use transport::{HttpClient, ReqwestHttpClient};
