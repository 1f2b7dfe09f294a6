//! Doorman configuration (env-driven).
//!
//! This is process configuration only. Resource templates come from the
//! document named by `DOORMAN_CONFIG`.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use doorman_config::{ReloadTrigger, SourceSpec};

use crate::server::{ServerSettings, UnconfiguredPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    /// Where resource templates are loaded from.
    pub config_source: SourceSpec,

    /// How the config source notices changes.
    pub reload_trigger: ReloadTrigger,

    /// HTTP listen address.
    pub listen_addr: SocketAddr,

    /// Hostname used to build the server id.
    pub hostname: String,

    /// Lower bound on refresh intervals handed to clients.
    pub minimum_refresh_interval: Duration,

    /// Default per-request deadline when the caller sets none.
    pub request_timeout: Duration,

    /// Block requests until configured instead of rejecting them.
    pub wait_for_config: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let Some(config) = var("DOORMAN_CONFIG").filter(|v| !v.is_empty()) else {
            bail!("Missing config source. Set DOORMAN_CONFIG (file:<path> or a path).");
        };
        let config_source = SourceSpec::parse(&config).context("DOORMAN_CONFIG is invalid.")?;

        let reload_trigger = match parse_u64(&var, "DOORMAN_CONFIG_POLL_INTERVAL_MS")? {
            Some(ms) => ReloadTrigger::Poll(Duration::from_millis(ms.max(50))),
            None => ReloadTrigger::Hangup,
        };

        let listen_addr = var("DOORMAN_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:9091".to_string())
            .parse()
            .context("DOORMAN_LISTEN_ADDR must be a socket address (host:port).")?;

        let hostname = var("DOORMAN_HOSTNAME")
            .or_else(|| var("HOSTNAME"))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown.localhost".to_string());

        let minimum_refresh_interval = Duration::from_secs(
            parse_u64(&var, "DOORMAN_MINIMUM_REFRESH_INTERVAL")?.unwrap_or(5),
        );

        let request_timeout =
            Duration::from_millis(parse_u64(&var, "DOORMAN_REQUEST_TIMEOUT_MS")?.unwrap_or(5000));

        let wait_for_config = var("DOORMAN_WAIT_FOR_CONFIG")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let log_level = var("DOORMAN_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            config_source,
            reload_trigger,
            listen_addr,
            hostname,
            minimum_refresh_interval,
            request_timeout,
            wait_for_config,
            log_level,
        })
    }

    /// Server id: `hostname:port`.
    pub fn server_id(&self) -> String {
        format!("{}:{}", self.hostname, self.listen_addr.port())
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            minimum_refresh_interval: self.minimum_refresh_interval,
            unconfigured_policy: if self.wait_for_config {
                UnconfiguredPolicy::Wait
            } else {
                UnconfiguredPolicy::Reject
            },
        }
    }
}

fn parse_u64(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    var(name)
        .map(|v| v.parse())
        .transpose()
        .with_context(|| format!("{name} must be a non-negative integer."))
}
