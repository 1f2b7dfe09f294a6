//! Configuration reload loop.
//!
//! Pulls documents from a [`ConfigSource`] and applies each one to the
//! server. A bad document is logged and skipped; the server keeps running on
//! its previous configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use doorman_config::{ConfigSource, ResourceRepository};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::LoadConfigError;
use crate::readiness::ServerState;
use crate::server::CapacityServer;

/// Delay before asking a failed source again.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Run the reload loop until shutdown or until the source is exhausted.
///
/// A source failure before the first configuration is fatal: a server that
/// can never be configured should not keep running.
pub async fn run_config_loop<S: ConfigSource>(
    source: S,
    server: Arc<CapacityServer>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    run_with_retry_delay(source, server, shutdown, RETRY_DELAY).await
}

async fn run_with_retry_delay<S: ConfigSource>(
    mut source: S,
    server: Arc<CapacityServer>,
    mut shutdown: watch::Receiver<bool>,
    retry_delay: Duration,
) -> Result<()> {
    info!(server_id = %server.id(), "Starting config loop");

    loop {
        let next = tokio::select! {
            next = source.next_document() => next,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Config loop shutting down");
                    return Ok(());
                }
                continue;
            }
        };

        match next {
            Ok(Some(document)) => match apply(&server, &document).await {
                Err(LoadConfigError::Closed) => {
                    info!("Server closed, stopping config loop");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Rejected configuration, keeping previous configuration");
                }
                Ok(()) => {}
            },
            Ok(None) => {
                info!("Config source exhausted, stopping config loop");
                return Ok(());
            }
            Err(e) if server.state() == ServerState::Unconfigured => {
                return Err(e).context("Failed to read initial configuration");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "Failed to read configuration"
                );
                tokio::select! {
                    _ = tokio::time::sleep(retry_delay) => {}
                    _ = shutdown.changed() => {
                        info!("Config loop shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn apply(server: &CapacityServer, document: &[u8]) -> Result<(), LoadConfigError> {
    let repository = ResourceRepository::from_yaml(document)?;
    server.load_config(repository).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use doorman_config::{ChannelSource, SourceError};

    use crate::protocol::{GetCapacityRequest, ResourceRequest};
    use crate::server::{CallContext, ServerSettings};

    fn document(capacity: i32) -> Vec<u8> {
        format!(
            r#"
resources:
  - identifier_glob: "*"
    capacity: {capacity}
    algorithm:
      kind: NO_ALGORITHM
      lease_length: 60
      refresh_interval: 5
"#
        )
        .into_bytes()
    }

    fn server() -> Arc<CapacityServer> {
        Arc::new(CapacityServer::new("test:0", ServerSettings::default()))
    }

    async fn capacity_of(server: &CapacityServer, id: &str) -> i32 {
        server
            .get_capacity(
                GetCapacityRequest {
                    client_id: "observer".to_string(),
                    resources: vec![ResourceRequest {
                        resource_id: id.to_string(),
                        has: Default::default(),
                        want: 0,
                    }],
                },
                &CallContext::default(),
            )
            .await
            .unwrap();
        server
            .status()
            .await
            .into_iter()
            .find(|s| s.resource_id == id)
            .map(|s| s.capacity)
            .unwrap_or_default()
    }

    /// Replays a fixed script, then stays silent.
    struct ScriptedSource(VecDeque<Result<Option<Vec<u8>>, SourceError>>);

    #[async_trait]
    impl ConfigSource for ScriptedSource {
        async fn next_document(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
            match self.0.pop_front() {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }
    }

    fn io_error() -> SourceError {
        SourceError::Io {
            path: PathBuf::from("/etc/doorman.yml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
    }

    #[tokio::test]
    async fn test_applies_documents_in_order() {
        let server = server();
        let (tx, source) = ChannelSource::new(4);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        tx.send(document(10)).await.unwrap();
        tx.send(b"resources: [".to_vec()).await.unwrap();
        tx.send(document(30)).await.unwrap();
        drop(tx);

        run_config_loop(source, Arc::clone(&server), shutdown)
            .await
            .unwrap();

        assert!(server.is_configured());
        assert_eq!(capacity_of(&server, "r").await, 30);
    }

    #[tokio::test]
    async fn test_bad_document_keeps_previous_config() {
        let server = server();
        let (tx, source) = ChannelSource::new(4);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        tx.send(document(10)).await.unwrap();
        tx.send(
            br#"
resources:
  - identifier_glob: "*"
    capacity: 99
    algorithm: {kind: PROPORTIONAL_SHARE, lease_length: 60, refresh_interval: 5}
"#
            .to_vec(),
        )
        .await
        .unwrap();
        drop(tx);

        run_config_loop(source, Arc::clone(&server), shutdown)
            .await
            .unwrap();
        assert_eq!(capacity_of(&server, "r").await, 10);
    }

    #[tokio::test]
    async fn test_invalid_first_document_leaves_server_unconfigured() {
        let server = server();
        let (tx, source) = ChannelSource::new(1);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        tx.send(b"not: [valid".to_vec()).await.unwrap();
        drop(tx);

        run_config_loop(source, Arc::clone(&server), shutdown)
            .await
            .unwrap();
        assert!(!server.is_configured());
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let server = server();
        let (_tx, source) = ChannelSource::new(1);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let handle = tokio::spawn(run_config_loop(source, Arc::clone(&server), shutdown));
        tokio::task::yield_now().await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stops")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_initial_source_failure_is_fatal() {
        let server = server();
        let source = ScriptedSource(VecDeque::from([Err(io_error())]));
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let result = run_config_loop(source, Arc::clone(&server), shutdown).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_later_source_failure_is_retried() {
        let server = server();
        let source = ScriptedSource(VecDeque::from([
            Ok(Some(document(10))),
            Err(io_error()),
            Ok(Some(document(20))),
            Ok(None),
        ]));
        let (_shutdown_tx, shutdown) = watch::channel(false);

        run_with_retry_delay(
            source,
            Arc::clone(&server),
            shutdown,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(capacity_of(&server, "r").await, 20);
    }

    #[tokio::test]
    async fn test_stops_when_server_closed() {
        let server = server();
        server.close();
        let (tx, source) = ChannelSource::new(1);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        tx.send(document(10)).await.unwrap();
        // Sender stays alive: only the closed server can end the loop.
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_config_loop(source, Arc::clone(&server), shutdown),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
        drop(tx);
    }
}
