//! Configuration sources.
//!
//! A source yields raw configuration documents whenever the underlying
//! configuration changes. The reload loop consumes one document at a time,
//! so a source never has more than one outstanding read.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::SourceError;

/// Produces configuration documents as they change.
#[async_trait]
pub trait ConfigSource: Send {
    /// Wait for the next document.
    ///
    /// Returns `Ok(None)` once the source is exhausted and will never
    /// produce another document.
    async fn next_document(&mut self) -> Result<Option<Vec<u8>>, SourceError>;
}

/// Parsed form of a configuration source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// A local file.
    File(PathBuf),
}

impl SourceSpec {
    /// Parse `file:<path>` or a bare path.
    pub fn parse(text: &str) -> Result<Self, SourceError> {
        match text.split_once(':') {
            Some((scheme, rest)) if is_scheme(scheme) => match scheme {
                "file" => Ok(Self::File(PathBuf::from(rest))),
                other => Err(SourceError::UnsupportedScheme(other.to_string())),
            },
            _ => Ok(Self::File(PathBuf::from(text))),
        }
    }

    /// Open the source. Must be called from within a Tokio runtime.
    pub fn open(&self, trigger: ReloadTrigger) -> Result<FileSource, SourceError> {
        match self {
            Self::File(path) => FileSource::new(path.clone(), trigger),
        }
    }
}

fn is_scheme(s: &str) -> bool {
    s.len() > 1 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+')
}

/// What causes a [`FileSource`] to re-read its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// Re-read on every `SIGHUP`.
    Hangup,
    /// Re-read whenever the file's modification time changes.
    Poll(Duration),
}

enum Waiter {
    Hangup(Signal),
    Poll(Interval),
}

/// A local file, read once on startup and again on every trigger.
pub struct FileSource {
    path: PathBuf,
    waiter: Waiter,
    primed: bool,
    last_modified: Option<SystemTime>,
}

impl FileSource {
    /// Create a file source. Must be called from within a Tokio runtime.
    pub fn new(path: impl Into<PathBuf>, trigger: ReloadTrigger) -> Result<Self, SourceError> {
        let waiter = match trigger {
            ReloadTrigger::Hangup => {
                Waiter::Hangup(signal(SignalKind::hangup()).map_err(SourceError::Signal)?)
            }
            ReloadTrigger::Poll(every) => {
                let mut interval = tokio::time::interval(every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Waiter::Poll(interval)
            }
        };

        Ok(Self {
            path: path.into(),
            waiter,
            primed: false,
            last_modified: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<u8>, SourceError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn next_document(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        if !self.primed {
            self.last_modified = modified_at(&self.path);
            let document = self.read().await?;
            self.primed = true;
            return Ok(Some(document));
        }

        match &mut self.waiter {
            Waiter::Hangup(hangup) => {
                if hangup.recv().await.is_none() {
                    return Ok(None);
                }
                info!(path = %self.path.display(), "Received SIGHUP, reloading configuration");
            }
            Waiter::Poll(interval) => loop {
                interval.tick().await;
                let modified = modified_at(&self.path);
                if modified != self.last_modified {
                    debug!(path = %self.path.display(), "Configuration file changed");
                    self.last_modified = modified;
                    break;
                }
            },
        }

        self.read().await.map(Some)
    }
}

/// Push-based source fed through a channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it. The source is exhausted
    /// once every sender is dropped.
    pub fn new(buffer: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl ConfigSource for ChannelSource {
    async fn next_document(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        Ok(self.rx.recv().await)
    }
}
