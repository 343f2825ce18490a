//! The policy pipeline.
//!
//! A [`Pipeline`] is a list of named [`Policy`] values. Before the first
//! request the list is ordered by phase (`Serialize`, unphased,
//! `Deserialize`, `Retry`) and by the explicit before/after constraints each
//! policy was added with. Each policy receives the request and a [`Next`]
//! handle to the rest of the chain, which ends in the [`HttpClient`].

use crate::policies::{
    decompress::DecompressResponsePolicy,
    exponential_retry::ExponentialRetryPolicy,
    form_data::FormDataPolicy,
    log::{LogPolicy, LogPolicyOptions},
    proxy::{ProxyPolicy, ProxySettings},
    redirect::{RedirectOptions, RedirectPolicy},
    request_id::SetClientRequestIdPolicy,
    span::TracingPolicy,
    system_error_retry::SystemErrorRetryPolicy,
    throttling_retry::ThrottlingRetryPolicy,
    user_agent::{UserAgentOptions, UserAgentPolicy},
};
use crate::request::PipelineRequest;
use crate::response::PipelineResponse;
use crate::retry::RetryOptions;
use crate::transport::HttpClient;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// A stage of the pipeline.
///
/// A policy may change the request, decide whether and how often to call
/// `next`, and inspect or replace the response.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use restline::pipeline::{Next, Policy};
/// use restline::request::PipelineRequest;
/// use restline::response::PipelineResponse;
///
/// struct ApiVersionPolicy;
///
/// #[async_trait]
/// impl Policy for ApiVersionPolicy {
///     fn name(&self) -> &str {
///         "apiVersionPolicy"
///     }
///
///     async fn send_request(
///         &self,
///         mut request: PipelineRequest,
///         next: Next<'_>,
///     ) -> restline::Result<PipelineResponse> {
///         request
///             .headers
///             .insert("x-api-version", http::HeaderValue::from_static("2024-01-01"));
///         next.send(request).await
///     }
/// }
/// ```
#[async_trait]
pub trait Policy: Send + Sync {
    /// The policy's identity inside a pipeline. Names must be unique.
    fn name(&self) -> &str;

    /// Processes `request`, usually by calling `next.send`.
    async fn send_request(&self, request: PipelineRequest, next: Next<'_>) -> Result<PipelineResponse>;
}

/// The remainder of the chain after the current policy.
///
/// `Next` is `Copy`, so a retrying policy may send as many times as it needs.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    client: &'a dyn HttpClient,
}

impl<'a> Next<'a> {
    /// Builds a chain over `policies` that ends in `client`.
    pub fn new(policies: &'a [Arc<dyn Policy>], client: &'a dyn HttpClient) -> Self {
        Self { policies, client }
    }

    /// Sends `request` through the rest of the chain.
    pub async fn send(self, request: PipelineRequest) -> Result<PipelineResponse> {
        match self.policies.split_first() {
            Some((policy, rest)) => {
                let next = Next {
                    policies: rest,
                    client: self.client,
                };
                policy.send_request(request, next).await
            }
            None => self.client.send_request(request).await,
        }
    }
}

/// A scheduling bucket for policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelinePhase {
    /// Runs first; builds the wire request.
    Serialize,
    /// Runs after unphased policies; parses the wire response.
    Deserialize,
    /// Runs closest to the transport.
    Retry,
}

impl PipelinePhase {
    fn bucket(self) -> usize {
        match self {
            PipelinePhase::Serialize => SERIALIZE,
            PipelinePhase::Deserialize => DESERIALIZE,
            PipelinePhase::Retry => RETRY,
        }
    }
}

const SERIALIZE: usize = 0;
const NO_PHASE: usize = 1;
const DESERIALIZE: usize = 2;
const RETRY: usize = 3;

/// Where a policy goes when it is added to a [`Pipeline`].
///
/// # Examples
///
/// ```
/// use restline::pipeline::{AddPolicyOptions, PipelinePhase};
///
/// let in_retry = AddPolicyOptions::in_phase(PipelinePhase::Retry);
/// let last = AddPolicyOptions::after_phase(PipelinePhase::Retry).after_policy("redirectPolicy");
/// assert_eq!(last.after_policies, vec!["redirectPolicy".to_string()]);
/// # let _ = in_retry;
/// ```
#[derive(Debug, Clone, Default)]
pub struct AddPolicyOptions {
    /// The phase the policy belongs to. `None` places it between
    /// `Serialize` and `Deserialize`.
    pub phase: Option<PipelinePhase>,
    /// Holds an unphased policy back until every policy of this phase is scheduled.
    pub after_phase: Option<PipelinePhase>,
    /// Policies that must run after this one.
    pub before_policies: Vec<String>,
    /// Policies that must run before this one.
    pub after_policies: Vec<String>,
}

impl AddPolicyOptions {
    pub fn in_phase(phase: PipelinePhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn after_phase(phase: PipelinePhase) -> Self {
        Self {
            after_phase: Some(phase),
            ..Default::default()
        }
    }

    /// Requires this policy to run before `name`.
    pub fn before_policy(mut self, name: impl Into<String>) -> Self {
        self.before_policies.push(name.into());
        self
    }

    /// Requires this policy to run after `name`.
    pub fn after_policy(mut self, name: impl Into<String>) -> Self {
        self.after_policies.push(name.into());
        self
    }
}

/// Selects policies to remove from a [`Pipeline`]. A policy matching either
/// field is removed.
#[derive(Debug, Clone, Default)]
pub struct RemovePolicyOptions {
    pub name: Option<String>,
    pub phase: Option<PipelinePhase>,
}

impl RemovePolicyOptions {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            phase: None,
        }
    }

    pub fn by_phase(phase: PipelinePhase) -> Self {
        Self {
            name: None,
            phase: Some(phase),
        }
    }
}

#[derive(Clone)]
struct PolicyDescriptor {
    policy: Arc<dyn Policy>,
    options: AddPolicyOptions,
}

/// An ordered chain of policies.
///
/// The order is computed on first use and cached until the pipeline is
/// changed again.
///
/// # Examples
///
/// ```
/// use restline::pipeline::{AddPolicyOptions, Pipeline, PipelinePhase};
/// use restline::policies::decompress::DecompressResponsePolicy;
/// use restline::policies::throttling_retry::ThrottlingRetryPolicy;
///
/// # fn main() -> Result<(), restline::Error> {
/// let mut pipeline = Pipeline::new();
/// pipeline.add_policy(
///     ThrottlingRetryPolicy::new(),
///     AddPolicyOptions::in_phase(PipelinePhase::Retry),
/// )?;
/// pipeline.add_policy(DecompressResponsePolicy, AddPolicyOptions::default())?;
///
/// assert_eq!(
///     pipeline.policy_names()?,
///     vec!["decompressResponsePolicy", "throttlingRetryPolicy"]
/// );
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    policies: Vec<PolicyDescriptor>,
    ordered: OnceLock<Arc<[Arc<dyn Policy>]>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `policy` with the given placement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if both `phase` and
    /// `after_phase` are set, or if a policy with the same name is already
    /// in the pipeline.
    pub fn add_policy<P: Policy + 'static>(&mut self, policy: P, options: AddPolicyOptions) -> Result<()> {
        self.add_shared_policy(Arc::new(policy), options)
    }

    /// Adds a policy that is shared with other pipelines.
    pub fn add_shared_policy(&mut self, policy: Arc<dyn Policy>, options: AddPolicyOptions) -> Result<()> {
        if options.phase.is_some() && options.after_phase.is_some() {
            return Err(Error::ConfigurationError(
                "Policies inside a phase cannot specify afterPhase.".to_string(),
            ));
        }
        if self
            .policies
            .iter()
            .any(|descriptor| descriptor.policy.name() == policy.name())
        {
            return Err(Error::ConfigurationError(
                "Duplicate policy names not allowed in pipeline".to_string(),
            ));
        }

        tracing::debug!(policy = policy.name(), phase = ?options.phase, "Adding policy");
        self.policies.push(PolicyDescriptor { policy, options });
        self.ordered = OnceLock::new();
        Ok(())
    }

    /// Removes every policy matching `options` and returns them.
    pub fn remove_policy(&mut self, options: &RemovePolicyOptions) -> Vec<Arc<dyn Policy>> {
        let mut removed = Vec::new();
        self.policies.retain(|descriptor| {
            let by_name = options
                .name
                .as_deref()
                .is_some_and(|name| descriptor.policy.name() == name);
            let by_phase = options.phase.is_some() && descriptor.options.phase == options.phase;
            if by_name || by_phase {
                removed.push(descriptor.policy.clone());
                false
            } else {
                true
            }
        });
        self.ordered = OnceLock::new();
        removed
    }

    /// Sends `request` through every policy and then `client`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyCycle`] if the policies cannot be ordered, or
    /// whatever error the chain produces.
    pub async fn send_request(&self, client: &dyn HttpClient, request: PipelineRequest) -> Result<PipelineResponse> {
        let policies = self.ordered_policies()?;
        Next::new(&policies, client).send(request).await
    }

    /// Returns the policies in execution order.
    pub fn ordered_policies(&self) -> Result<Arc<[Arc<dyn Policy>]>> {
        if let Some(ordered) = self.ordered.get() {
            return Ok(ordered.clone());
        }
        let ordered: Arc<[Arc<dyn Policy>]> = Scheduler::new(&self.policies).order()?.into();
        let _ = self.ordered.set(ordered.clone());
        Ok(ordered)
    }

    /// Returns the policy names in execution order.
    pub fn policy_names(&self) -> Result<Vec<String>> {
        Ok(self
            .ordered_policies()?
            .iter()
            .map(|policy| policy.name().to_string())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.policies.iter().map(|descriptor| descriptor.policy.name()))
            .finish()
    }
}

struct Node {
    depends_on: HashSet<usize>,
    after_phase: Option<usize>,
}

/// Orders policies phase by phase, scheduling a policy once everything it
/// depends on is scheduled and the phase it waits for (if any) is drained.
struct Scheduler<'a> {
    descriptors: &'a [PolicyDescriptor],
    nodes: Vec<Node>,
    buckets: [Vec<usize>; 4],
    scheduled: Vec<bool>,
    result: Vec<Arc<dyn Policy>>,
}

impl<'a> Scheduler<'a> {
    fn new(descriptors: &'a [PolicyDescriptor]) -> Self {
        let index: HashMap<&str, usize> = descriptors
            .iter()
            .enumerate()
            .map(|(i, descriptor)| (descriptor.policy.name(), i))
            .collect();

        let mut nodes: Vec<Node> = descriptors
            .iter()
            .map(|descriptor| Node {
                depends_on: HashSet::new(),
                after_phase: descriptor.options.after_phase.map(PipelinePhase::bucket),
            })
            .collect();
        let mut buckets: [Vec<usize>; 4] = Default::default();

        for (i, descriptor) in descriptors.iter().enumerate() {
            let bucket = descriptor.options.phase.map_or(NO_PHASE, PipelinePhase::bucket);
            buckets[bucket].push(i);

            // Unknown names are ignored.
            for after in &descriptor.options.after_policies {
                if let Some(&j) = index.get(after.as_str()) {
                    nodes[i].depends_on.insert(j);
                }
            }
            for before in &descriptor.options.before_policies {
                if let Some(&j) = index.get(before.as_str()) {
                    nodes[j].depends_on.insert(i);
                }
            }
        }

        Self {
            descriptors,
            nodes,
            buckets,
            scheduled: vec![false; descriptors.len()],
            result: Vec::with_capacity(descriptors.len()),
        }
    }

    fn order(mut self) -> Result<Vec<Arc<dyn Policy>>> {
        while self.result.len() < self.descriptors.len() {
            let before = self.result.len();
            self.walk_phases();
            if self.result.len() <= before {
                let remaining = self
                    .descriptors
                    .iter()
                    .zip(&self.scheduled)
                    .filter(|(_, scheduled)| !**scheduled)
                    .map(|(descriptor, _)| descriptor.policy.name().to_string())
                    .collect();
                return Err(Error::PolicyCycle { remaining });
            }
        }
        Ok(self.result)
    }

    fn walk_phases(&mut self) {
        let mut no_phase_ran = false;
        for bucket in [SERIALIZE, NO_PHASE, DESERIALIZE, RETRY] {
            self.walk_phase(bucket);
            if bucket == NO_PHASE {
                no_phase_ran = true;
            }
            if bucket != NO_PHASE && !self.buckets[bucket].is_empty() {
                // An earlier phase may be waiting on an unphased policy.
                if !no_phase_ran {
                    self.walk_phase(NO_PHASE);
                }
                return;
            }
        }
    }

    fn walk_phase(&mut self, bucket: usize) {
        let mut i = 0;
        while i < self.buckets[bucket].len() {
            let node = self.buckets[bucket][i];
            let waiting_on_phase = self.nodes[node]
                .after_phase
                .is_some_and(|phase| !self.buckets[phase].is_empty());
            let ready = self.nodes[node]
                .depends_on
                .iter()
                .all(|dependency| self.scheduled[*dependency]);

            if !waiting_on_phase && ready {
                self.scheduled[node] = true;
                self.result.push(self.descriptors[node].policy.clone());
                self.buckets[bucket].remove(i);
            } else {
                i += 1;
            }
        }
    }
}

/// Options for [`create_pipeline_from_options`].
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub retry_options: RetryOptions,
    /// Proxy to use. `None` reads `HTTPS_PROXY`, `ALL_PROXY` and `HTTP_PROXY`.
    pub proxy_settings: Option<ProxySettings>,
    pub redirect_options: RedirectOptions,
    pub user_agent_options: UserAgentOptions,
    pub log_options: LogPolicyOptions,
}

/// Builds the standard pipeline:
///
/// proxy, decompression, form data, tracing, user agent and request id
/// (unphased); throttling, system-error and exponential retries (`Retry`);
/// then redirects and logging once the retry phase is done.
///
/// # Examples
///
/// ```
/// use restline::pipeline::{create_pipeline_from_options, PipelineOptions};
///
/// # fn main() -> Result<(), restline::Error> {
/// let pipeline = create_pipeline_from_options(&PipelineOptions::default())?;
/// let names = pipeline.policy_names()?;
/// assert_eq!(names.first().map(String::as_str), Some("proxyPolicy"));
/// assert_eq!(names.last().map(String::as_str), Some("logPolicy"));
/// # Ok(())
/// # }
/// ```
pub fn create_pipeline_from_options(options: &PipelineOptions) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new();
    let proxy = match &options.proxy_settings {
        Some(settings) => ProxyPolicy::new(Some(settings.clone())),
        None => ProxyPolicy::from_env(),
    };

    pipeline.add_policy(proxy, AddPolicyOptions::default())?;
    pipeline.add_policy(DecompressResponsePolicy, AddPolicyOptions::default())?;
    pipeline.add_policy(FormDataPolicy, AddPolicyOptions::default())?;
    pipeline.add_policy(
        TracingPolicy::new(options.user_agent_options.clone()),
        AddPolicyOptions::default(),
    )?;
    pipeline.add_policy(
        UserAgentPolicy::new(options.user_agent_options.clone()),
        AddPolicyOptions::default(),
    )?;
    pipeline.add_policy(SetClientRequestIdPolicy::default(), AddPolicyOptions::default())?;
    pipeline.add_policy(
        ThrottlingRetryPolicy::new(),
        AddPolicyOptions::in_phase(PipelinePhase::Retry),
    )?;
    pipeline.add_policy(
        SystemErrorRetryPolicy::new(options.retry_options.clone()),
        AddPolicyOptions::in_phase(PipelinePhase::Retry),
    )?;
    pipeline.add_policy(
        ExponentialRetryPolicy::new(options.retry_options.clone()),
        AddPolicyOptions::in_phase(PipelinePhase::Retry),
    )?;
    pipeline.add_policy(
        RedirectPolicy::new(options.redirect_options.clone()),
        AddPolicyOptions::after_phase(PipelinePhase::Retry),
    )?;
    pipeline.add_policy(
        LogPolicy::new(options.log_options.clone()),
        AddPolicyOptions::after_phase(PipelinePhase::Retry),
    )?;

    Ok(pipeline)
}
