//! Application state shared across request handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::server::CapacityServer;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    server: Arc<CapacityServer>,
    request_timeout: Duration,
}

impl AppState {
    /// Create a new application state.
    ///
    /// `request_timeout` bounds requests that carry no timeout header;
    /// zero leaves them unbounded.
    pub fn new(server: Arc<CapacityServer>, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                server,
                request_timeout,
            }),
        }
    }

    pub fn server(&self) -> &Arc<CapacityServer> {
        &self.inner.server
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }
}
