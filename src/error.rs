//! Error types shared across the deploy pipeline.
//!
//! Each layer owns its own `thiserror` enum; [`DeployError`] is the single
//! terminal failure the orchestrator hands back to the caller.

use serde::Serialize;
use thiserror::Error;

use crate::filestore::SyncOutcome;

/// Errors raised by the ADT session layer and the endpoints built on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdtError {
    /// Credentials or CSRF token rejected by the server.
    #[error("authentication rejected (HTTP {status}): {detail}")]
    Authentication { status: u16, detail: String },

    /// Non-2xx status that the caller did not handle.
    #[error("{method} {path} failed with HTTP {status}: {body}")]
    Remote {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    /// A structured response could not be parsed or lacked a required value.
    #[error("unexpected response from {context}: {detail}")]
    Protocol { context: String, detail: String },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),
}

impl AdtError {
    pub fn protocol(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Protocol {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

/// Why no usable transport could be determined.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error(transparent)]
    Adt(#[from] AdtError),

    #[error("could not successfully check existing transport lock")]
    CheckIncomplete,

    #[error("no transport found and transport creation is disabled ({policy})")]
    NoTransport { policy: &'static str },
}

/// Coarse classification of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Configuration,
    RemoteProtocol,
    TransportResolution,
    PartialSync,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Authentication => "authentication",
            Self::Configuration => "configuration",
            Self::RemoteProtocol => "remote_protocol",
            Self::TransportResolution => "transport_resolution",
            Self::PartialSync => "partial_sync",
        };
        f.write_str(name)
    }
}

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Resolution,
    Synchronization,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Resolution => write!(f, "transport resolution"),
            Self::Synchronization => write!(f, "synchronization"),
        }
    }
}

/// Terminal failure of a deploy operation.
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("invalid configuration: {}", .0.join("; "))]
    Configuration(Vec<String>),

    #[error("transport resolution failed: {0}")]
    TransportResolution(#[from] TransportError),

    #[error("failed to select resources: {0}")]
    Resources(String),

    #[error(
        "synchronization failed for {} of {total} file(s): {}",
        .failed.len(),
        failed_summary(.failed)
    )]
    PartialSync {
        total: usize,
        failed: Vec<SyncOutcome>,
    },

    /// The synchronization as a whole failed: the container was unavailable,
    /// no file went through, or the application index could not be rebuilt.
    #[error("synchronization failed: {source}")]
    Synchronization {
        source: AdtError,
        failed: Vec<SyncOutcome>,
    },
}

impl DeployError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Configuration(_) | Self::Resources(_) => Stage::Configuration,
            Self::TransportResolution(_) => Stage::Resolution,
            Self::PartialSync { .. } | Self::Synchronization { .. } => Stage::Synchronization,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Resources(_) => ErrorKind::Configuration,
            Self::TransportResolution(TransportError::Adt(AdtError::Authentication { .. })) => {
                ErrorKind::Authentication
            }
            Self::TransportResolution(TransportError::Adt(
                AdtError::Remote { .. } | AdtError::Protocol { .. },
            )) => ErrorKind::RemoteProtocol,
            Self::TransportResolution(_) => ErrorKind::TransportResolution,
            Self::PartialSync { failed, .. } => {
                let rejected = failed
                    .iter()
                    .any(|o| matches!(o.cause, Some(AdtError::Authentication { .. })));
                if rejected {
                    ErrorKind::Authentication
                } else {
                    ErrorKind::PartialSync
                }
            }
            Self::Synchronization { source, .. } => match source {
                AdtError::Authentication { .. } => ErrorKind::Authentication,
                AdtError::Remote { .. } | AdtError::Protocol { .. } | AdtError::Network(_) => {
                    ErrorKind::RemoteProtocol
                }
            },
        }
    }

    /// Files that failed, for the error variants that carry them.
    pub fn failed_files(&self) -> &[SyncOutcome] {
        match self {
            Self::PartialSync { failed, .. } | Self::Synchronization { failed, .. } => failed,
            _ => &[],
        }
    }
}

fn failed_summary(failed: &[SyncOutcome]) -> String {
    failed
        .iter()
        .map(|o| {
            format!(
                "{} ({})",
                o.path,
                o.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
