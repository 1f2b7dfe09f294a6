//! The capacity service.
//!
//! [`CapacityServer`] owns the directory of resources and fans each client
//! request out to one task per requested resource.
//!
//! ## Locking
//!
//! - The directory lock guards only the resource map and the current
//!   repository. It is held for a lookup-or-insert, never for a decision.
//! - Each [`Resource`] has its own lock for its leases and configuration.
//! - Reloads push new configuration to resources after the directory lock
//!   is released, serialized among themselves by a separate mutex.
//!
//! Decisions against different resources therefore run fully in parallel,
//! while decisions against one resource are serialized.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use doorman_config::ResourceRepository;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info, instrument, warn, Instrument};

use crate::algorithm::Request;
use crate::error::{CapacityError, LoadConfigError};
use crate::protocol::{GetCapacityRequest, GetCapacityResponse, LeaseMessage, ResourceResponse};
use crate::readiness::{Readiness, ServerState};
use crate::resource::{Resource, ResourceConfig, ResourceStatus};
use crate::store::Lease;

/// What to do with requests that arrive before the first configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnconfiguredPolicy {
    /// Block until configured, bounded by the caller's deadline.
    Wait,
    /// Fail immediately with [`CapacityError::NotConfigured`].
    Reject,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Lower bound on every refresh interval handed to clients.
    pub minimum_refresh_interval: Duration,
    pub unconfigured_policy: UnconfiguredPolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            minimum_refresh_interval: Duration::from_secs(5),
            unconfigured_policy: UnconfiguredPolicy::Reject,
        }
    }
}

/// Caller-supplied request scope: id for logs, deadline, and cancellation.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: String,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(ulid::Ulid::new().to_string())
    }
}

impl CallContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Default)]
struct Directory {
    resources: HashMap<String, Arc<Resource>>,
    repository: Option<Arc<ResourceRepository>>,
}

fn config_for(repository: &ResourceRepository, id: &str) -> Option<ResourceConfig> {
    let template = repository.resolve(id)?;
    match ResourceConfig::new(template.clone()) {
        Ok(config) => Some(config),
        Err(e) => {
            // Repositories are checked against the registry before they are
            // accepted, so this only fires if that check is bypassed.
            error!(resource_id = %id, error = %e, "Matched template is unusable");
            None
        }
    }
}

pub struct CapacityServer {
    id: String,
    settings: ServerSettings,
    readiness: Readiness,
    directory: RwLock<Directory>,
    reload: Mutex<()>,
}

impl CapacityServer {
    pub fn new(id: impl Into<String>, settings: ServerSettings) -> Self {
        Self {
            id: id.into(),
            settings,
            readiness: Readiness::new(),
            directory: RwLock::new(Directory::default()),
            reload: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ServerState {
        self.readiness.state()
    }

    pub fn is_configured(&self) -> bool {
        self.state() == ServerState::Configured
    }

    /// Block until the first configuration has been loaded.
    pub async fn wait_until_configured(&self) -> Result<(), CapacityError> {
        self.readiness.wait_until_configured().await
    }

    /// Shut the server down. Pending and future calls fail with `Closed`.
    pub fn close(&self) {
        if self.readiness.close() {
            info!(server_id = %self.id, "Server closed");
        }
    }

    /// Replace the configuration wholesale.
    pub async fn load_config(
        &self,
        repository: ResourceRepository,
    ) -> Result<(), LoadConfigError> {
        self.load_config_with_expiry(repository, &HashMap::new())
            .await
    }

    /// Replace the configuration, also setting per-resource staleness
    /// deadlines. Every existing resource is reconfigured in place.
    ///
    /// The directory lock is held only to swap the repository and snapshot
    /// the resource list; each resource is then updated under its own lock.
    pub async fn load_config_with_expiry(
        &self,
        repository: ResourceRepository,
        expiry_times: &HashMap<String, DateTime<Utc>>,
    ) -> Result<(), LoadConfigError> {
        if self.state() == ServerState::Closed {
            return Err(LoadConfigError::Closed);
        }

        repository.validate()?;
        for template in &repository.resources {
            ResourceConfig::new(template.clone())?;
        }

        // One reload at a time, so pushes from two loads never interleave.
        let _reload = self.reload.lock().await;

        let repository = Arc::new(repository);
        let (first_load, resources) = {
            let mut directory = self.directory.write().await;
            let first_load = directory.repository.is_none();
            directory.repository = Some(Arc::clone(&repository));
            let resources: Vec<Arc<Resource>> = directory.resources.values().cloned().collect();
            (first_load, resources)
        };

        for resource in &resources {
            let id = resource.id();
            resource
                .load_config(config_for(&repository, id), expiry_times.get(id).copied())
                .await;
        }

        info!(
            server_id = %self.id,
            templates = repository.resources.len(),
            resources = resources.len(),
            first_load,
            "Configuration loaded"
        );

        if first_load {
            self.readiness.signal_configured();
        }
        Ok(())
    }

    /// Decide every resource in `request` and return one entry per resource,
    /// in request order.
    pub async fn get_capacity(
        &self,
        request: GetCapacityRequest,
        ctx: &CallContext,
    ) -> Result<GetCapacityResponse, CapacityError> {
        let work = async {
            self.await_configured().await?;
            validate_request(&request)?;
            self.decide_all(request).await
        };

        let bounded = async {
            match ctx.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, work).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            request_id = %ctx.request_id,
                            "Capacity request exceeded its deadline"
                        );
                        Err(CapacityError::DeadlineExceeded)
                    }
                },
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                debug!(request_id = %ctx.request_id, "Capacity request cancelled");
                Err(CapacityError::Cancelled)
            }
            result = bounded => result,
        }
    }

    /// Drop a client's leases on the named resources. Unknown resources are
    /// ignored rather than created.
    pub async fn release_capacity(
        &self,
        client_id: &str,
        resource_ids: &[String],
    ) -> Result<(), CapacityError> {
        if self.state() == ServerState::Closed {
            return Err(CapacityError::Closed);
        }
        if client_id.is_empty() {
            return Err(CapacityError::InvalidRequest(
                "client_id cannot be empty".to_string(),
            ));
        }

        let resources: Vec<Arc<Resource>> = {
            let directory = self.directory.read().await;
            resource_ids
                .iter()
                .filter_map(|id| directory.resources.get(id).cloned())
                .collect()
        };

        for resource in &resources {
            resource.release(client_id).await;
        }

        info!(
            client_id = %client_id,
            requested = resource_ids.len(),
            released = resources.len(),
            "Released capacity"
        );
        Ok(())
    }

    /// Status of every known resource, sorted by id.
    pub async fn status(&self) -> Vec<ResourceStatus> {
        let mut resources: Vec<Arc<Resource>> = {
            let directory = self.directory.read().await;
            directory.resources.values().cloned().collect()
        };
        resources.sort_by(|a, b| a.id().cmp(b.id()));

        let mut statuses = Vec::with_capacity(resources.len());
        for resource in resources {
            statuses.push(resource.status().await);
        }
        statuses
    }

    async fn await_configured(&self) -> Result<(), CapacityError> {
        match self.state() {
            ServerState::Configured => Ok(()),
            ServerState::Closed => Err(CapacityError::Closed),
            ServerState::Unconfigured => match self.settings.unconfigured_policy {
                UnconfiguredPolicy::Reject => Err(CapacityError::NotConfigured),
                UnconfiguredPolicy::Wait => self.wait_until_configured().await,
            },
        }
    }

    async fn get_or_create_resource(&self, id: &str) -> Arc<Resource> {
        let mut directory = self.directory.write().await;
        if let Some(resource) = directory.resources.get(id) {
            return Arc::clone(resource);
        }

        let config = directory
            .repository
            .as_deref()
            .and_then(|repository| config_for(repository, id));
        let resource = Arc::new(Resource::new(id, config));
        directory
            .resources
            .insert(id.to_string(), Arc::clone(&resource));
        resource
    }

    #[instrument(
        skip_all,
        fields(client_id = %request.client_id, resources = request.resources.len())
    )]
    async fn decide_all(
        &self,
        request: GetCapacityRequest,
    ) -> Result<GetCapacityResponse, CapacityError> {
        let mut tasks = JoinSet::new();

        for entry in &request.resources {
            let resource = self.get_or_create_resource(&entry.resource_id).await;
            let decision = Request {
                client_id: request.client_id.clone(),
                has: entry.has.capacity,
                want: entry.want,
            };
            let span = debug_span!("decide", resource_id = %entry.resource_id);
            tasks.spawn(
                async move {
                    let lease = resource.decide(&decision).await;
                    (resource, lease)
                }
                .instrument(span),
            );
        }

        // Results are keyed by resource id; completion order is irrelevant.
        let mut decided: HashMap<String, (Arc<Resource>, Lease)> =
            HashMap::with_capacity(request.resources.len());
        while let Some(joined) = tasks.join_next().await {
            let (resource, lease) = joined
                .map_err(|e| CapacityError::Internal(format!("decision task failed: {e}")))?;
            decided.insert(resource.id().to_string(), (resource, lease));
        }

        let mut responses = Vec::with_capacity(request.resources.len());
        for entry in &request.resources {
            let Some((resource, lease)) = decided.remove(entry.resource_id.as_str()) else {
                return Err(CapacityError::Internal(format!(
                    "no decision for resource '{}'",
                    entry.resource_id
                )));
            };

            responses.push(ResourceResponse {
                resource_id: entry.resource_id.clone(),
                gets: self.grant(&lease),
                safe_capacity: resource.safe_capacity().await,
            });
        }

        Ok(GetCapacityResponse { responses })
    }

    fn grant(&self, lease: &Lease) -> LeaseMessage {
        let refresh_interval = lease
            .refresh_interval
            .max(self.settings.minimum_refresh_interval);

        LeaseMessage {
            capacity: lease.has,
            refresh_interval: i64::try_from(refresh_interval.as_secs()).unwrap_or(i64::MAX),
            expiry_time: lease.expire_time.map(|at| at.timestamp()).unwrap_or(0),
        }
    }
}

fn validate_request(request: &GetCapacityRequest) -> Result<(), CapacityError> {
    let invalid = |message: String| Err(CapacityError::InvalidRequest(message));

    if request.client_id.is_empty() {
        return invalid("client_id cannot be empty".to_string());
    }

    let mut seen = HashSet::with_capacity(request.resources.len());
    for entry in &request.resources {
        if entry.resource_id.is_empty() {
            return invalid("resource_id cannot be empty".to_string());
        }
        if entry.want < 0 || entry.has.capacity < 0 {
            return invalid(format!(
                "resource '{}': has and want must not be negative",
                entry.resource_id
            ));
        }
        if !seen.insert(entry.resource_id.as_str()) {
            return invalid(format!(
                "resource '{}' requested more than once",
                entry.resource_id
            ));
        }
    }

    Ok(())
}
