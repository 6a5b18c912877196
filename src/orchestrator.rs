//! Deploy workflow as an explicit state machine.
//!
//! ```text
//! Idle ──(needs resolution)──▶ ResolvingTransport ──▶ Synchronizing ──▶ Done
//!   │                                 │                     │
//!   └──(explicit / $TMP)──────────────┼──────────▶──────────┘
//!                                     └──▶ Failed ◀─────────┘ (any file failed)
//! ```
//!
//! `Done` and `Failed` are terminal. Nothing is retried at this level; the
//! session already retries a rejected CSRF token once. An empty file list
//! fails before the first request. When enabled, the application index is
//! recalculated as the last step of `Synchronizing`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adt::{AdtSession, HttpExchange, ReqwestExchange};
use crate::config::ResolvedDeploy;
use crate::error::DeployError;
use crate::filestore::{ArtifactSynchronizer, SyncOutcome};
use crate::model::{ContainerTarget, TransportOptions, TransportPolicy, TransportRef};
use crate::resources::collect_resources;
use crate::transport::TransportResolver;

/// Successful deploy summary.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub package: String,
    pub container: String,
    pub policy: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportRef>,
    /// Logical paths of synchronized files, in input order.
    pub synced: Vec<String>,
    pub outcomes: Vec<SyncOutcome>,
    pub app_index_calculated: bool,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub enum DeployState {
    Idle,
    ResolvingTransport,
    Synchronizing { transport: Option<TransportRef> },
    Done(DeployReport),
    Failed(DeployError),
}

impl DeployState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResolvingTransport => "resolving-transport",
            Self::Synchronizing { .. } => "synchronizing",
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// Drives one deploy operation over a single session.
pub struct Orchestrator<'a, E> {
    session: &'a AdtSession<E>,
    target: &'a ContainerTarget,
    options: &'a TransportOptions,
    concurrency: usize,
    calc_app_index: bool,
}

impl<'a, E: HttpExchange> Orchestrator<'a, E> {
    pub fn new(
        session: &'a AdtSession<E>,
        target: &'a ContainerTarget,
        options: &'a TransportOptions,
    ) -> Self {
        Self {
            session,
            target,
            options,
            concurrency: 4,
            calc_app_index: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Recalculate the application index after a fully successful sync.
    pub fn with_app_index(mut self, enabled: bool) -> Self {
        self.calc_app_index = enabled;
        self
    }

    /// Run the state machine to completion for `files` under `base_dir`.
    pub async fn run(&self, files: &[PathBuf], base_dir: &Path) -> Result<DeployReport, DeployError> {
        let start = Instant::now();
        if files.is_empty() {
            return Err(DeployError::Resources(format!(
                "no files selected under {}",
                base_dir.display()
            )));
        }
        let mut state = DeployState::Idle;

        loop {
            let next = match state {
                DeployState::Idle => self.leave_idle(),
                DeployState::ResolvingTransport => self.resolve_transport().await,
                DeployState::Synchronizing { transport } => {
                    self.synchronize(files, base_dir, transport, start).await
                }
                DeployState::Done(report) => return Ok(report),
                DeployState::Failed(err) => return Err(err),
            };
            debug!(state = next.name(), "deploy state changed");
            state = next;
        }
    }

    fn leave_idle(&self) -> DeployState {
        match &self.options.policy {
            TransportPolicy::Explicit(id) => {
                info!(transport = %id, "using configured transport");
                DeployState::Synchronizing {
                    transport: Some(id.clone()),
                }
            }
            policy if self.target.is_temporary() || !policy.needs_resolution() => {
                info!(package = %self.target.package, "package needs no transport");
                DeployState::Synchronizing { transport: None }
            }
            _ => DeployState::ResolvingTransport,
        }
    }

    async fn resolve_transport(&self) -> DeployState {
        info!(policy = self.options.policy.name(), "resolving transport");
        match TransportResolver::new(self.session)
            .resolve(self.target, self.options)
            .await
        {
            Ok(transport) => DeployState::Synchronizing { transport },
            Err(e) => {
                warn!(error = %e, "transport resolution failed");
                DeployState::Failed(DeployError::TransportResolution(e))
            }
        }
    }

    async fn synchronize(
        &self,
        files: &[PathBuf],
        base_dir: &Path,
        transport: Option<TransportRef>,
        start: Instant,
    ) -> DeployState {
        info!(
            container = %self.target.container,
            transport = transport.as_ref().map_or("-", TransportRef::as_str),
            files = files.len(),
            "synchronizing artifacts"
        );
        let synchronizer = ArtifactSynchronizer::new(self.session, self.target, transport.as_ref())
            .with_concurrency(self.concurrency);
        let result = synchronizer.sync_files(files, base_dir).await;

        if let Some(source) = result.fatal_error() {
            return DeployState::Failed(DeployError::Synchronization {
                source: source.clone(),
                failed: result.failed(),
            });
        }
        if !result.all_succeeded {
            return DeployState::Failed(DeployError::PartialSync {
                total: result.outcomes.len(),
                failed: result.failed(),
            });
        }

        if self.calc_app_index
            && let Err(e) = synchronizer.calculate_app_index().await
        {
            warn!(error = %e, "application index recalculation failed");
            return DeployState::Failed(DeployError::Synchronization {
                source: e,
                failed: Vec::new(),
            });
        }

        DeployState::Done(DeployReport {
            package: self.target.package.clone(),
            container: self.target.container.clone(),
            policy: self.options.policy.name(),
            synced: result.synced_paths(),
            outcomes: result.outcomes,
            transport,
            app_index_calculated: self.calc_app_index,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Select resources, open a session against the configured server and deploy.
pub async fn deploy(resolved: &ResolvedDeploy) -> Result<DeployReport, DeployError> {
    let files = collect_resources(&resolved.resources)
        .map_err(|e| DeployError::Resources(e.to_string()))?;

    let connection = &resolved.connection;
    let exchange = ReqwestExchange::new(&connection.server, connection.strict_ssl, connection.timeout)
        .map_err(|e| DeployError::Configuration(vec![e.to_string()]))?;
    let session = AdtSession::new(exchange, connection, &resolved.credentials)
        .with_language(resolved.target.language.as_str());

    Orchestrator::new(&session, &resolved.target, &resolved.transport)
        .with_concurrency(resolved.concurrency)
        .with_app_index(resolved.calc_app_index)
        .run(&files, &resolved.resources.base_dir)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestore::SyncAction;

    #[test]
    fn test_state_names() {
        assert_eq!(DeployState::Idle.name(), "idle");
        assert_eq!(DeployState::ResolvingTransport.name(), "resolving-transport");
        assert_eq!(
            DeployState::Synchronizing { transport: None }.name(),
            "synchronizing"
        );
        assert_eq!(
            DeployState::Failed(DeployError::Resources("x".into())).name(),
            "failed"
        );
    }

    #[test]
    fn test_report_serializes_without_transport() {
        let report = DeployReport {
            package: "$TMP".into(),
            container: "ZAPP".into(),
            policy: "none-required",
            transport: None,
            synced: vec!["index.html".into()],
            outcomes: vec![SyncOutcome::succeeded("index.html", SyncAction::Updated)],
            app_index_calculated: false,
            duration_ms: 3,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("transport").is_none());
        assert_eq!(json["synced"][0], "index.html");
        assert_eq!(json["outcomes"][0]["action"], "updated");
    }
}
