//! Built-in pipeline policies.
//!
//! Each policy is identified by the name it reports from
//! [`Policy::name`](crate::pipeline::Policy::name); the names match the
//! `*_POLICY_NAME` constants exported by each module.

pub mod bearer;
pub mod decompress;
pub mod deserialization;
pub mod exponential_retry;
pub mod form_data;
pub mod log;
pub mod nd_json;
pub mod proxy;
pub mod redirect;
pub mod request_id;
pub mod serialization;
pub mod span;
pub mod system_error_retry;
pub mod throttling_retry;
pub mod user_agent;
