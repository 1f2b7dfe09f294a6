//! A single arbitrated resource.
//!
//! Every decision against a resource runs under that resource's own lock:
//! expired leases are purged, the policy for the current time is chosen, and
//! the algorithm runs, all in one critical section. Unrelated resources never
//! contend with each other.

use chrono::{DateTime, TimeDelta, Utc};
use doorman_config::ResourceTemplate;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::algorithm::{self, Algorithm, Constructor, Learning, Request};
use crate::error::LoadConfigError;
use crate::store::{Lease, LeaseStore};

/// A template whose algorithm kind is known to be registered.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    template: ResourceTemplate,
    constructor: Constructor,
}

impl ResourceConfig {
    pub fn new(template: ResourceTemplate) -> Result<Self, LoadConfigError> {
        let constructor = algorithm::lookup(&template.algorithm.kind).ok_or_else(|| {
            LoadConfigError::UnknownAlgorithm {
                glob: template.identifier_glob.clone(),
                kind: template.algorithm.kind.clone(),
            }
        })?;

        Ok(Self {
            template,
            constructor,
        })
    }

    pub fn template(&self) -> &ResourceTemplate {
        &self.template
    }
}

#[derive(Debug)]
struct Policy {
    template: ResourceTemplate,
    algorithm: Box<dyn Algorithm>,
    learner: Box<dyn Algorithm>,
}

impl From<ResourceConfig> for Policy {
    fn from(config: ResourceConfig) -> Self {
        let algorithm = (config.constructor)(&config.template.algorithm);
        let learner = Box::new(Learning::new(&config.template.algorithm));
        Self {
            template: config.template,
            algorithm,
            learner,
        }
    }
}

#[derive(Debug)]
struct ResourceState {
    /// `None` when no template matches the resource.
    policy: Option<Policy>,
    store: LeaseStore,
    learning_end_at: DateTime<Utc>,
    /// When the configuration itself goes stale.
    expiry_time: Option<DateTime<Utc>>,
}

impl ResourceState {
    fn capacity_at(&self, now: DateTime<Utc>) -> i32 {
        let Some(policy) = &self.policy else {
            return 0;
        };
        if self.expiry_time.is_some_and(|at| at < now) {
            return 0;
        }
        policy.template.capacity
    }

    fn in_learning_mode(&self, now: DateTime<Utc>) -> bool {
        now < self.learning_end_at
    }
}

/// Point-in-time view of a resource, for debugging.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub resource_id: String,
    pub identifier_glob: Option<String>,
    pub algorithm: Option<&'static str>,
    pub capacity: i32,
    pub sum_has: i64,
    pub sum_want: i64,
    pub clients: usize,
    pub learning_mode: bool,
    pub learning_end_at: DateTime<Utc>,
    pub config_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Resource {
    id: String,
    state: RwLock<ResourceState>,
}

impl Resource {
    /// Create a resource configured with `config`, if any.
    pub fn new(id: impl Into<String>, config: Option<ResourceConfig>) -> Self {
        Self::new_at(id, config, Utc::now())
    }

    /// The learning window is fixed here, from the configuration the
    /// resource is created with. Later reloads do not reopen it.
    pub(crate) fn new_at(
        id: impl Into<String>,
        config: Option<ResourceConfig>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        let learning_mode_length = config
            .as_ref()
            .map(|c| c.template.algorithm.learning_mode_length())
            .unwrap_or_default();
        let learning_end_at = TimeDelta::from_std(learning_mode_length)
            .ok()
            .and_then(|delta| created_at.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        info!(
            resource_id = %id,
            identifier_glob = config.as_ref().map(|c| c.template.identifier_glob.as_str()),
            learning_end_at = %learning_end_at,
            "Resource created"
        );

        Self {
            state: RwLock::new(ResourceState {
                policy: config.map(Policy::from),
                store: LeaseStore::new(id.clone()),
                learning_end_at,
                expiry_time: None,
            }),
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configured capacity, or 0 once the configuration is stale.
    pub async fn capacity(&self) -> i32 {
        self.state.read().await.capacity_at(Utc::now())
    }

    /// Decide a client's request against this resource.
    pub async fn decide(&self, request: &Request) -> Lease {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = Utc::now();

        let expired = state.store.clean();
        if expired > 0 {
            debug!(resource_id = %self.id, expired, "Purged expired leases");
        }

        let capacity = state.capacity_at(now);
        let learning = state.in_learning_mode(now);
        let Some(policy) = &state.policy else {
            debug!(
                resource_id = %self.id,
                client_id = %request.client_id,
                "No configuration for resource, granting nothing"
            );
            return Lease::default();
        };

        let algorithm = if learning {
            &policy.learner
        } else {
            &policy.algorithm
        };
        let lease = algorithm.decide(&mut state.store, capacity, request);

        debug!(
            resource_id = %self.id,
            client_id = %request.client_id,
            algorithm = algorithm.kind(),
            has = request.has,
            want = request.want,
            granted = lease.has,
            capacity,
            "Decided capacity request"
        );
        lease
    }

    /// Drop a client's lease.
    pub async fn release(&self, client_id: &str) {
        self.state.write().await.store.release(client_id);
    }

    /// Swap in a new configuration and staleness deadline.
    pub async fn load_config(
        &self,
        config: Option<ResourceConfig>,
        expiry_time: Option<DateTime<Utc>>,
    ) {
        let mut state = self.state.write().await;
        info!(
            resource_id = %self.id,
            identifier_glob = config.as_ref().map(|c| c.template.identifier_glob.as_str()),
            expiry_time = ?expiry_time,
            "Loading resource configuration"
        );
        state.policy = config.map(Policy::from);
        state.expiry_time = expiry_time;
    }

    /// Per-client capacity a client may assume without asking again.
    ///
    /// The configured `safe_capacity` if set, else capacity split evenly
    /// over current clients (the whole capacity when there are none).
    pub async fn safe_capacity(&self) -> i32 {
        let state = self.state.read().await;
        let Some(policy) = &state.policy else {
            return 0;
        };
        if policy.template.safe_capacity != 0 {
            return policy.template.safe_capacity;
        }

        let capacity = state.capacity_at(Utc::now());
        match state.store.count() {
            0 => capacity,
            clients => capacity / i32::try_from(clients).unwrap_or(i32::MAX),
        }
    }

    pub async fn status(&self) -> ResourceStatus {
        let state = self.state.read().await;
        let now = Utc::now();
        ResourceStatus {
            resource_id: self.id.clone(),
            identifier_glob: state
                .policy
                .as_ref()
                .map(|p| p.template.identifier_glob.clone()),
            algorithm: state.policy.as_ref().map(|p| p.algorithm.kind()),
            capacity: state.capacity_at(now),
            sum_has: state.store.sum_has(),
            sum_want: state.store.sum_want(),
            clients: state.store.count(),
            learning_mode: state.in_learning_mode(now),
            learning_end_at: state.learning_end_at,
            config_expires_at: state.expiry_time,
        }
    }

    /// Hold the resource lock, stalling every decision against it.
    #[cfg(test)]
    pub(crate) async fn hold(&self) -> tokio::sync::RwLockWriteGuard<'_, impl std::fmt::Debug> {
        self.state.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorman_config::AlgorithmSpec;

    use crate::algorithm::NO_ALGORITHM;

    fn config(capacity: i32, safe_capacity: i32, learning: Option<i64>) -> ResourceConfig {
        ResourceConfig::new(ResourceTemplate {
            identifier_glob: "*".to_string(),
            capacity,
            safe_capacity,
            algorithm: AlgorithmSpec {
                kind: NO_ALGORITHM.to_string(),
                lease_length: 20,
                refresh_interval: 5,
                learning_mode_length: learning,
            },
        })
        .unwrap()
    }

    fn request(client: &str, has: i32, want: i32) -> Request {
        Request {
            client_id: client.to_string(),
            has,
            want,
        }
    }

    /// A resource whose learning window closed long ago.
    fn steady(config: ResourceConfig) -> Resource {
        Resource::new_at("res", Some(config), Utc::now() - TimeDelta::hours(1))
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let mut template = config(10, 0, None).template;
        template.algorithm.kind = "FAIR_SHARE".to_string();

        match ResourceConfig::new(template) {
            Err(LoadConfigError::UnknownAlgorithm { kind, .. }) => assert_eq!(kind, "FAIR_SHARE"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_learning_mode_grants_has() {
        let resource = Resource::new("res", Some(config(100, 0, Some(60))));
        assert!(resource.status().await.learning_mode);

        let lease = resource.decide(&request("c1", 7, 50)).await;
        assert_eq!(lease.has, 7);
        assert_eq!(lease.want, 7);
        assert_eq!(resource.status().await.sum_want, 7);
    }

    #[tokio::test]
    async fn test_learning_window_defaults_to_lease_length() {
        let created_at = Utc::now();
        let resource = Resource::new_at("res", Some(config(100, 0, None)), created_at);
        let status = resource.status().await;
        assert_eq!(status.learning_end_at, created_at + TimeDelta::seconds(20));
    }

    #[tokio::test]
    async fn test_oversized_learning_window_saturates() {
        let resource = Resource::new("res", Some(config(100, 0, Some(10_000_000_000_000))));
        let status = resource.status().await;
        assert!(status.learning_mode);
        assert_eq!(status.learning_end_at, DateTime::<Utc>::MAX_UTC);

        let lease = resource.decide(&request("c1", 7, 50)).await;
        assert_eq!(lease.has, 7);
    }

    #[tokio::test]
    async fn test_steady_state_uses_configured_algorithm() {
        let resource = steady(config(100, 0, Some(60)));
        assert!(!resource.status().await.learning_mode);

        let lease = resource.decide(&request("c1", 7, 50)).await;
        assert_eq!(lease.has, 7);
        assert_eq!(lease.want, 50);
        assert_eq!(lease.refresh_interval, std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unconfigured_resource_grants_nothing() {
        let resource = Resource::new("res", None);
        assert_eq!(resource.capacity().await, 0);

        let lease = resource.decide(&request("c1", 7, 50)).await;
        assert!(lease.is_zero());
        assert_eq!(lease.has, 0);
        assert_eq!(resource.status().await.clients, 0);
        assert_eq!(resource.safe_capacity().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_zero_once_config_is_stale() {
        let resource = steady(config(100, 0, None));
        assert_eq!(resource.capacity().await, 100);

        resource
            .load_config(Some(config(100, 0, None)), Some(Utc::now() + TimeDelta::hours(1)))
            .await;
        assert_eq!(resource.capacity().await, 100);

        resource
            .load_config(Some(config(100, 0, None)), Some(Utc::now() - TimeDelta::seconds(1)))
            .await;
        assert_eq!(resource.capacity().await, 0);
    }

    #[tokio::test]
    async fn test_safe_capacity_fixed() {
        let resource = steady(config(100, 2, None));
        assert_eq!(resource.safe_capacity().await, 2);

        for i in 0..5 {
            resource.decide(&request(&format!("c{i}"), 1, 1)).await;
        }
        assert_eq!(resource.safe_capacity().await, 2);
    }

    #[tokio::test]
    async fn test_safe_capacity_divides_by_clients() {
        let resource = steady(config(100, 0, None));
        assert_eq!(resource.safe_capacity().await, 100);

        resource.decide(&request("c1", 1, 1)).await;
        assert_eq!(resource.safe_capacity().await, 100);

        resource.decide(&request("c2", 1, 1)).await;
        resource.decide(&request("c3", 1, 1)).await;
        assert_eq!(resource.safe_capacity().await, 33);

        resource.release("c3").await;
        assert_eq!(resource.safe_capacity().await, 50);
    }

    #[tokio::test]
    async fn test_load_config_replaces_policy() {
        let resource = Resource::new("res", None);
        assert_eq!(resource.capacity().await, 0);

        resource.load_config(Some(config(40, 0, None)), None).await;
        assert_eq!(resource.capacity().await, 40);
        let status = resource.status().await;
        assert_eq!(status.identifier_glob.as_deref(), Some("*"));
        assert_eq!(status.algorithm, Some(NO_ALGORITHM));

        // Created without config: no learning window to apply.
        let lease = resource.decide(&request("c1", 3, 9)).await;
        assert_eq!(lease.want, 9);

        resource.load_config(None, None).await;
        assert_eq!(resource.capacity().await, 0);
    }

    #[tokio::test]
    async fn test_release_removes_lease() {
        let resource = steady(config(100, 0, None));
        resource.decide(&request("c1", 10, 12)).await;
        resource.decide(&request("c2", 5, 5)).await;

        resource.release("c1").await;
        let status = resource.status().await;
        assert_eq!(status.clients, 1);
        assert_eq!(status.sum_has, 5);
        assert_eq!(status.sum_want, 5);
    }
}
