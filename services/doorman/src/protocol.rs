//! Request and response messages of the capacity service.

use serde::{Deserialize, Serialize};

/// A lease as seen on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseMessage {
    #[serde(default)]
    pub capacity: i32,
    /// Refresh interval in seconds.
    #[serde(default)]
    pub refresh_interval: i64,
    /// Expiry as unix seconds; 0 for no lease.
    #[serde(default)]
    pub expiry_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub resource_id: String,
    /// The lease the client currently holds, if any.
    #[serde(default)]
    pub has: LeaseMessage,
    pub want: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCapacityRequest {
    pub client_id: String,
    #[serde(default)]
    pub resources: Vec<ResourceRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub resource_id: String,
    pub gets: LeaseMessage,
    pub safe_capacity: i32,
}

/// One entry per requested resource, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCapacityResponse {
    pub responses: Vec<ResourceResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCapacityRequest {
    pub client_id: String,
    #[serde(default)]
    pub resource_ids: Vec<String>,
}
