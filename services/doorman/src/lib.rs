//! doorman capacity server library.
//!
//! Doorman hands out capacity leases for shared, finite resources. Clients
//! periodically report what they hold and what they want; the server decides
//! how much each may use until its lease expires.
//!
//! This crate primarily ships the `doorman` binary, but we expose the library
//! surface to enable integration testing and embedding.

pub mod algorithm;
pub mod api;
pub mod config;
pub mod error;
pub mod protocol;
pub mod readiness;
pub mod reload;
pub mod resource;
pub mod server;
pub mod state;
pub mod store;

pub use error::{CapacityError, LoadConfigError};
pub use readiness::ServerState;
pub use server::{CallContext, CapacityServer, ServerSettings, UnconfiguredPolicy};
