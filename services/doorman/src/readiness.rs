//! One-shot readiness latch.
//!
//! The server starts `Unconfigured`, moves to `Configured` on its first
//! successful configuration load, and to `Closed` on shutdown. Neither
//! transition ever reverses.

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::error::CapacityError;

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Unconfigured,
    Configured,
    Closed,
}

#[derive(Debug)]
pub struct Readiness {
    tx: watch::Sender<ServerState>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ServerState::Unconfigured);
        Self { tx }
    }

    pub fn state(&self) -> ServerState {
        *self.tx.borrow()
    }

    /// Move `Unconfigured -> Configured`. Returns true only for the call
    /// that performed the transition.
    pub fn signal_configured(&self) -> bool {
        let signalled = self.tx.send_if_modified(|state| {
            if *state == ServerState::Unconfigured {
                *state = ServerState::Configured;
                true
            } else {
                false
            }
        });
        if signalled {
            info!("Server is configured");
        }
        signalled
    }

    /// Move to `Closed`, releasing anyone still waiting for configuration.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ServerState::Closed {
                false
            } else {
                *state = ServerState::Closed;
                true
            }
        })
    }

    /// Block until the server is configured.
    ///
    /// Fails with [`CapacityError::Closed`] if the server closes first.
    pub async fn wait_until_configured(&self) -> Result<(), CapacityError> {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(|state| *state != ServerState::Unconfigured).await {
            Ok(state) => *state,
            Err(_) => ServerState::Closed,
        };

        match state {
            ServerState::Configured => Ok(()),
            _ => Err(CapacityError::Closed),
        }
    }
}
