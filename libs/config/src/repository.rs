//! Resource repository document and template resolution.

use std::collections::HashSet;
use std::time::Duration;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Path-style matching: `*` and `?` never cross a `/`.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Allocation policy parameters for a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmSpec {
    /// Registry key of the steady-state algorithm (e.g. `NO_ALGORITHM`).
    pub kind: String,

    /// Lease length in seconds.
    pub lease_length: i64,

    /// Refresh interval in seconds.
    pub refresh_interval: i64,

    /// Learning mode length in seconds. Unset or zero means "one lease length".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_mode_length: Option<i64>,
}

impl AlgorithmSpec {
    pub fn lease_length(&self) -> Duration {
        secs(self.lease_length)
    }

    pub fn refresh_interval(&self) -> Duration {
        secs(self.refresh_interval)
    }

    /// Length of the bootstrap window after a resource is created.
    ///
    /// Falls back to the lease length: a lease granted before this server
    /// started cannot outlive one full lease length.
    pub fn learning_mode_length(&self) -> Duration {
        match self.learning_mode_length {
            Some(length) if length > 0 => secs(length),
            _ => self.lease_length(),
        }
    }
}

fn secs(value: i64) -> Duration {
    Duration::from_secs(value.max(0) as u64)
}

/// Configuration for every resource whose identifier matches `identifier_glob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    pub identifier_glob: String,

    /// Total capacity of the resource.
    pub capacity: i32,

    /// Per-client safe capacity hint; 0 means "capacity / clients".
    #[serde(default)]
    pub safe_capacity: i32,

    #[serde(alias = "algo")]
    pub algorithm: AlgorithmSpec,
}

impl ResourceTemplate {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidTemplate {
            glob: self.identifier_glob.clone(),
            message: message.to_string(),
        };

        if let Err(e) = Pattern::new(&self.identifier_glob) {
            return Err(ConfigError::InvalidGlob {
                glob: self.identifier_glob.clone(),
                message: e.to_string(),
            });
        }
        if self.capacity < 0 {
            return Err(invalid("capacity must not be negative"));
        }
        if self.safe_capacity < 0 {
            return Err(invalid("safe_capacity must not be negative"));
        }
        if self.algorithm.kind.trim().is_empty() {
            return Err(invalid("algorithm.kind must be set"));
        }
        if self.algorithm.lease_length <= 0 {
            return Err(invalid("algorithm.lease_length must be positive"));
        }
        if self.algorithm.refresh_interval <= 0 {
            return Err(invalid("algorithm.refresh_interval must be positive"));
        }
        if matches!(self.algorithm.learning_mode_length, Some(length) if length < 0) {
            return Err(invalid("algorithm.learning_mode_length must not be negative"));
        }

        Ok(())
    }

    fn matches(&self, id: &str) -> bool {
        match Pattern::new(&self.identifier_glob) {
            Ok(pattern) => pattern.matches_with(id, MATCH_OPTIONS),
            Err(e) => {
                warn!(
                    resource_id = %id,
                    glob = %self.identifier_glob,
                    error = %e,
                    "Skipping template with invalid glob"
                );
                false
            }
        }
    }
}

/// The full, ordered set of resource templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRepository {
    #[serde(default)]
    pub resources: Vec<ResourceTemplate>,
}

impl ResourceRepository {
    /// Parse and validate a YAML document.
    pub fn from_yaml(data: &[u8]) -> Result<Self, ConfigError> {
        let repository: Self = serde_yaml::from_slice(data)?;
        repository.validate()?;
        Ok(repository)
    }

    /// Structural validation. Algorithm kinds are checked by the server,
    /// which owns the algorithm registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();

        for (index, template) in self.resources.iter().enumerate() {
            if template.identifier_glob.is_empty() {
                return Err(ConfigError::EmptyGlob { index });
            }
            if !seen.insert(template.identifier_glob.as_str()) {
                return Err(ConfigError::DuplicateGlob {
                    glob: template.identifier_glob.clone(),
                });
            }
            template.validate()?;
        }

        Ok(())
    }

    /// Find the template for a resource identifier.
    ///
    /// A template whose glob equals `id` literally always wins; otherwise the
    /// first template (in declared order) whose glob matches is used.
    pub fn resolve(&self, id: &str) -> Option<&ResourceTemplate> {
        self.resources
            .iter()
            .find(|template| template.identifier_glob == id)
            .or_else(|| self.resources.iter().find(|template| template.matches(id)))
    }
}
