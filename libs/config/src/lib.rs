//! # doorman-config
//!
//! Configuration model for the doorman capacity server.
//!
//! A configuration document is a [`ResourceRepository`]: an ordered list of
//! [`ResourceTemplate`]s, each keyed by a glob pattern rather than a literal
//! resource identifier. Many concrete resources may share one template.
//!
//! ## Document Format
//!
//! ```yaml
//! resources:
//!   - identifier_glob: "db/*"
//!     capacity: 100
//!     safe_capacity: 0
//!     algorithm:
//!       kind: NO_ALGORITHM
//!       lease_length: 20
//!       refresh_interval: 5
//! ```
//!
//! Documents arrive through a [`ConfigSource`]; the server only ever sees
//! parsed and validated repositories.

mod error;
mod repository;
mod source;

pub use error::{ConfigError, SourceError};
pub use repository::{AlgorithmSpec, ResourceRepository, ResourceTemplate};
pub use source::{ChannelSource, ConfigSource, FileSource, ReloadTrigger, SourceSpec};
