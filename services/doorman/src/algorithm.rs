//! Allocation policies.
//!
//! An [`Algorithm`] turns a client's request plus the resource's current
//! lease store into a lease. Steady-state algorithms are looked up by kind in
//! a registry fixed at build time; adding a kind means adding an
//! implementation and a registry entry, nothing else.

use std::fmt::Debug;
use std::time::Duration;

use doorman_config::AlgorithmSpec;

use crate::store::{Lease, LeaseStore};

/// Registry key of the pass-through algorithm.
pub const NO_ALGORITHM: &str = "NO_ALGORITHM";

/// A single client's ask against one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub client_id: String,
    /// What the client currently holds.
    pub has: i32,
    /// What the client would like to hold.
    pub want: i32,
}

/// Decision policy for one resource.
pub trait Algorithm: Debug + Send + Sync {
    /// Registry kind, for logging and status.
    fn kind(&self) -> &'static str;

    fn decide(&self, store: &mut LeaseStore, capacity: i32, request: &Request) -> Lease;
}

/// Builds an algorithm from its configured parameters.
pub type Constructor = fn(&AlgorithmSpec) -> Box<dyn Algorithm>;

const REGISTRY: &[(&str, Constructor)] = &[(NO_ALGORITHM, PassThrough::boxed)];

/// Find the constructor registered for `kind`.
pub fn lookup(kind: &str) -> Option<Constructor> {
    REGISTRY
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, constructor)| *constructor)
}

/// Every registered kind, in registration order.
pub fn registered_kinds() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    lease_length: Duration,
    refresh_interval: Duration,
}

impl From<&AlgorithmSpec> for Timing {
    fn from(spec: &AlgorithmSpec) -> Self {
        Self {
            lease_length: spec.lease_length(),
            refresh_interval: spec.refresh_interval(),
        }
    }
}

/// Records what the client reports without enforcing capacity.
#[derive(Debug)]
pub struct PassThrough {
    timing: Timing,
}

impl PassThrough {
    pub fn new(spec: &AlgorithmSpec) -> Self {
        Self {
            timing: spec.into(),
        }
    }

    fn boxed(spec: &AlgorithmSpec) -> Box<dyn Algorithm> {
        Box::new(Self::new(spec))
    }
}

impl Algorithm for PassThrough {
    fn kind(&self) -> &'static str {
        NO_ALGORITHM
    }

    fn decide(&self, store: &mut LeaseStore, _capacity: i32, request: &Request) -> Lease {
        store.assign(
            &request.client_id,
            self.timing.lease_length,
            self.timing.refresh_interval,
            request.has,
            request.want,
        )
    }
}

/// Grants exactly what the client already has, ignoring what it wants.
///
/// Used while a resource is still learning current usage, so nobody is
/// throttled before the server has heard from every client.
#[derive(Debug)]
pub struct Learning {
    timing: Timing,
}

impl Learning {
    pub fn new(spec: &AlgorithmSpec) -> Self {
        Self {
            timing: spec.into(),
        }
    }
}

impl Algorithm for Learning {
    fn kind(&self) -> &'static str {
        "LEARNING"
    }

    fn decide(&self, store: &mut LeaseStore, _capacity: i32, request: &Request) -> Lease {
        store.assign(
            &request.client_id,
            self.timing.lease_length,
            self.timing.refresh_interval,
            request.has,
            request.has,
        )
    }
}
