//! BSP file-store synchronizer.
//!
//! Pushes local artifacts into a BSP container through the ADT file-store
//! API (`/sap/bc/adt/filestore/ui5-bsp/objects`). The container and every
//! intermediate folder are created on demand; each file is then created or
//! updated depending on whether the backend already knows it.
//!
//! # Failure isolation
//!
//! A failing file never stops the others. Every input file gets exactly one
//! [`SyncOutcome`], reported in input order regardless of completion order.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adt::session::remote_error;
use crate::adt::xml::folder_entry_document;
use crate::adt::{AdtSession, HttpExchange, HttpRequest};
use crate::error::AdtError;
use crate::model::{ArtifactSource, ContainerTarget, TransportRef};

pub const OBJECTS_PATH: &str = "/sap/bc/adt/filestore/ui5-bsp/objects";
pub const APP_INDEX_PATH: &str = "/sap/bc/adt/filestore/ui5-bsp/appindex";

/// Extensions uploaded as text (`isBinary=false`); everything else is binary.
const TEXT_EXTENSIONS: &[&str] = &[
    "css", "csv", "htm", "html", "js", "json", "less", "map", "md", "mjs", "properties", "svg",
    "ts", "txt", "xml", "yaml", "yml",
];

/// What happened to a file on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
}

/// Result of synchronizing a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Logical `/`-separated path inside the container.
    pub path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<SyncAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Backend error behind the failure, when there was one.
    #[serde(skip)]
    pub cause: Option<AdtError>,
}

impl SyncOutcome {
    pub fn succeeded(path: impl Into<String>, action: SyncAction) -> Self {
        Self {
            path: path.into(),
            success: true,
            action: Some(action),
            error: None,
            cause: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            success: false,
            action: None,
            error: Some(error.into()),
            cause: None,
        }
    }

    /// Failure caused by `cause`, described by `error`.
    pub fn failed_by(path: impl Into<String>, error: impl Into<String>, cause: AdtError) -> Self {
        Self {
            cause: Some(cause),
            ..Self::failed(path, error)
        }
    }
}

/// Ordered per-file outcomes of one synchronization.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub outcomes: Vec<SyncOutcome>,
    pub all_succeeded: bool,
    pub duration_ms: u64,
    /// Set when the container itself could not be ensured; nothing was uploaded.
    #[serde(skip)]
    pub container_error: Option<AdtError>,
}

impl Default for SyncResult {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
            all_succeeded: true,
            duration_ms: 0,
            container_error: None,
        }
    }
}

impl SyncResult {
    pub fn add_outcome(&mut self, outcome: SyncOutcome) {
        if !outcome.success {
            self.all_succeeded = false;
        }
        self.outcomes.push(outcome);
    }

    pub fn synced_paths(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.path.clone())
            .collect()
    }

    pub fn failed(&self) -> Vec<SyncOutcome> {
        self.outcomes.iter().filter(|o| !o.success).cloned().collect()
    }

    pub fn successful_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    /// Backend error that explains the whole run failing, if any.
    ///
    /// That is the container error, or, when no file succeeded, the first
    /// authentication error and otherwise the first backend error.
    pub fn fatal_error(&self) -> Option<&AdtError> {
        if self.container_error.is_some() {
            return self.container_error.as_ref();
        }
        if self.outcomes.is_empty() || self.successful_count() > 0 {
            return None;
        }
        self.authentication_error()
            .or_else(|| self.outcomes.iter().find_map(|o| o.cause.as_ref()))
    }

    /// First authentication error among the failed files.
    pub fn authentication_error(&self) -> Option<&AdtError> {
        self.outcomes
            .iter()
            .filter_map(|o| o.cause.as_ref())
            .find(|e| matches!(e, AdtError::Authentication { .. }))
    }
}

/// Failure reason and cause of a folder that could not be created.
type FolderFailure = (String, AdtError);

/// Uploads artifacts into one BSP container under an optional transport.
pub struct ArtifactSynchronizer<'a, E> {
    session: &'a AdtSession<E>,
    target: &'a ContainerTarget,
    transport: Option<&'a TransportRef>,
    concurrency: usize,
}

impl<'a, E: HttpExchange> ArtifactSynchronizer<'a, E> {
    pub fn new(
        session: &'a AdtSession<E>,
        target: &'a ContainerTarget,
        transport: Option<&'a TransportRef>,
    ) -> Self {
        Self {
            session,
            target,
            transport,
            concurrency: 4,
        }
    }

    /// Limit how many files are in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Synchronize `files` (relative to, or located under, `base_dir`).
    pub async fn sync_files(&self, files: &[PathBuf], base_dir: &Path) -> SyncResult {
        let start = Instant::now();
        let mut result = SyncResult::default();
        if files.is_empty() {
            debug!(container = %self.target.container, "nothing to synchronize");
            return result;
        }
        let mut artifacts = Vec::with_capacity(files.len());
        let mut rejected = HashMap::new();

        for (idx, file) in files.iter().enumerate() {
            match artifact_source(base_dir, file) {
                Ok(source) => artifacts.push((idx, source)),
                Err(e) => {
                    rejected.insert(idx, SyncOutcome::failed(file.display().to_string(), e));
                }
            }
        }

        if let Err(e) = self.ensure_container().await {
            warn!(container = %self.target.container, error = %e, "container unavailable");
            for (idx, file) in files.iter().enumerate() {
                let path = artifacts
                    .iter()
                    .find(|(i, _)| *i == idx)
                    .map_or_else(|| file.display().to_string(), |(_, a)| a.logical_path.clone());
                result.add_outcome(SyncOutcome::failed_by(
                    path,
                    format!("container {} unavailable: {e}", self.target.container),
                    e.clone(),
                ));
            }
            result.container_error = Some(e);
            result.duration_ms = start.elapsed().as_millis() as u64;
            return result;
        }

        let failed_folders = self.ensure_folders(artifacts.iter().map(|(_, a)| a)).await;

        let mut uploaded: HashMap<usize, SyncOutcome> =
            futures::stream::iter(artifacts.iter().map(|(idx, artifact)| {
                let failed_folders = &failed_folders;
                async move { (*idx, self.sync_one(artifact, failed_folders).await) }
            }))
            .buffered(self.concurrency)
            .collect()
            .await;

        for idx in 0..files.len() {
            let outcome = rejected
                .remove(&idx)
                .or_else(|| uploaded.remove(&idx))
                .unwrap_or_else(|| {
                    SyncOutcome::failed(files[idx].display().to_string(), "not processed")
                });
            result.add_outcome(outcome);
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            container = %self.target.container,
            succeeded = result.successful_count(),
            failed = result.failed_count(),
            duration_ms = result.duration_ms,
            "synchronization finished"
        );
        result
    }

    async fn sync_one(
        &self,
        artifact: &ArtifactSource,
        failed_folders: &HashMap<String, FolderFailure>,
    ) -> SyncOutcome {
        let path = artifact.logical_path.as_str();

        if let Some((reason, cause)) = parent_folders(path)
            .iter()
            .find_map(|folder| failed_folders.get(folder))
        {
            return SyncOutcome::failed_by(path, reason.clone(), cause.clone());
        }

        let content = match tokio::fs::read(&artifact.local_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return SyncOutcome::failed(
                    path,
                    format!("reading {}: {e}", artifact.local_path.display()),
                );
            }
        };

        let upload = async {
            if self.exists(path).await? {
                self.update_file(path, content).await?;
                Ok::<_, AdtError>(SyncAction::Updated)
            } else {
                self.create_file(path, content).await?;
                Ok(SyncAction::Created)
            }
        };

        match upload.await {
            Ok(action) => {
                debug!(path, action = ?action, "file synchronized");
                SyncOutcome::succeeded(path, action)
            }
            Err(e) => {
                warn!(path, error = %e, "file synchronization failed");
                SyncOutcome::failed_by(path, e.to_string(), e)
            }
        }
    }

    async fn ensure_container(&self) -> Result<(), AdtError> {
        let container = self.target.container.as_str();
        let path = format!("{OBJECTS_PATH}/{}", urlencoding::encode(container));
        if self.node_exists(&path).await? {
            return Ok(());
        }

        info!(container, package = %self.target.package, "creating BSP container");
        let create_path = format!("{OBJECTS_PATH}/%24new/content");
        let request = HttpRequest::post(&create_path)
            .query("type", "folder")
            .query("isBinary", "false")
            .query("name", container)
            .query("description", self.target.description.as_str())
            .query("devclass", self.target.package.as_str())
            .query_opt("corrNr", self.transport.map(TransportRef::as_str))
            .header("Content-Type", "application/atom+xml")
            .body(folder_entry_document(container, &self.target.description)?);
        self.session.send_ok(request).await?;
        Ok(())
    }

    /// Create missing folders, parents first. Returns folder → failure.
    async fn ensure_folders(
        &self,
        artifacts: impl Iterator<Item = &ArtifactSource>,
    ) -> HashMap<String, FolderFailure> {
        let folders: BTreeSet<String> = artifacts
            .flat_map(|a| parent_folders(&a.logical_path))
            .collect();
        let mut failed: HashMap<String, FolderFailure> = HashMap::new();

        for folder in folders {
            if let Some(failure) = parent_folders(&folder)
                .iter()
                .find_map(|parent| failed.get(parent))
            {
                let failure = failure.clone();
                failed.insert(folder, failure);
                continue;
            }
            if let Err(e) = self.ensure_folder(&folder).await {
                warn!(folder = %folder, error = %e, "folder creation failed");
                let reason = format!("folder {folder} could not be created: {e}");
                failed.insert(folder, (reason, e));
            }
        }
        failed
    }

    /// Ask the backend to recalculate the UI5 application index of the container.
    pub async fn calculate_app_index(&self) -> Result<(), AdtError> {
        let container = self.target.container.as_str();
        info!(container, "recalculating application index");
        let request = HttpRequest::post(format!(
            "{APP_INDEX_PATH}/{}",
            urlencoding::encode(container)
        ))
        .header("Accept", "*/*");
        self.session.send_ok(request).await?;
        Ok(())
    }

    async fn ensure_folder(&self, folder: &str) -> Result<(), AdtError> {
        if self.exists(folder).await? {
            return Ok(());
        }
        let (parent, name) = split_parent(folder);
        debug!(folder, "creating folder");
        let request = HttpRequest::post(format!("{}/content", self.object_path(parent)))
            .query("type", "folder")
            .query("isBinary", "false")
            .query("name", name)
            .query("devclass", self.target.package.as_str())
            .query_opt("corrNr", self.transport.map(TransportRef::as_str))
            .header("Content-Type", "application/atom+xml")
            .body(folder_entry_document(name, name)?);
        self.session.send_ok(request).await?;
        Ok(())
    }

    async fn create_file(&self, path: &str, content: Vec<u8>) -> Result<(), AdtError> {
        let (parent, name) = split_parent(path);
        let request = HttpRequest::post(format!("{}/content", self.object_path(parent)))
            .query("type", "file")
            .query("isBinary", is_binary(path).to_string())
            .query("name", name)
            .query("devclass", self.target.package.as_str())
            .query("charset", "UTF-8")
            .query_opt("corrNr", self.transport.map(TransportRef::as_str))
            .header("Content-Type", "application/octet-stream")
            .body(content);
        self.session.send_ok(request).await?;
        Ok(())
    }

    async fn update_file(&self, path: &str, content: Vec<u8>) -> Result<(), AdtError> {
        let request = HttpRequest::put(format!("{}/content", self.object_path(path)))
            .query("type", "file")
            .query("isBinary", is_binary(path).to_string())
            .query("charset", "UTF-8")
            .query_opt("corrNr", self.transport.map(TransportRef::as_str))
            .header("Content-Type", "application/octet-stream")
            .header("If-Match", "*")
            .body(content);
        self.session.send_ok(request).await?;
        Ok(())
    }

    /// Whether `path` (relative to the container) exists on the backend.
    async fn exists(&self, path: &str) -> Result<bool, AdtError> {
        self.node_exists(&self.object_path(path)).await
    }

    async fn node_exists(&self, request_path: &str) -> Result<bool, AdtError> {
        let response = self
            .session
            .send(HttpRequest::get(request_path).header("Accept", "*/*"))
            .await?;
        match response.status {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(remote_error("GET", request_path, &response)),
        }
    }

    /// Request path of a node inside the container; `""` is the container.
    fn object_path(&self, path: &str) -> String {
        let full = if path.is_empty() {
            self.target.container.clone()
        } else {
            format!("{}/{path}", self.target.container)
        };
        format!("{OBJECTS_PATH}/{}", urlencoding::encode(&full))
    }
}

/// Resolve `file` against `base_dir` into a logical container path.
pub fn artifact_source(base_dir: &Path, file: &Path) -> Result<ArtifactSource, String> {
    let relative = if file.is_absolute() {
        file.strip_prefix(base_dir)
            .map_err(|_| format!("{} is outside {}", file.display(), base_dir.display()))?
            .to_path_buf()
    } else {
        file.to_path_buf()
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(format!("{} escapes the base directory", file.display())),
        }
    }
    if parts.is_empty() {
        return Err(format!("{} does not name a file", file.display()));
    }

    Ok(ArtifactSource {
        local_path: base_dir.join(&relative),
        logical_path: parts.join("/"),
    })
}

/// All ancestor folders of `path`, outermost first.
fn parent_folders(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').collect();
    (1..segments.len())
        .map(|end| segments[..end].join("/"))
        .collect()
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn is_binary(path: &str) -> bool {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    !TEXT_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_folders() {
        assert_eq!(parent_folders("index.html"), Vec::<String>::new());
        assert_eq!(
            parent_folders("view/fragments/Dialog.xml"),
            vec!["view".to_string(), "view/fragments".to_string()]
        );
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("index.html"), ("", "index.html"));
        assert_eq!(split_parent("i18n/i18n.properties"), ("i18n", "i18n.properties"));
    }

    #[test]
    fn test_binary_detection() {
        assert!(!is_binary("Component.js"));
        assert!(!is_binary("i18n/i18n.PROPERTIES"));
        assert!(!is_binary("view/Main.view.xml"));
        assert!(is_binary("img/logo.png"));
        assert!(is_binary("fonts/icons.woff2"));
        assert!(is_binary("LICENSE"));
    }

    #[test]
    fn test_artifact_source_relative_and_absolute() {
        let base = Path::new("/work/dist");
        let rel = artifact_source(base, Path::new("view/Main.view.xml")).unwrap();
        assert_eq!(rel.logical_path, "view/Main.view.xml");
        assert_eq!(rel.local_path, PathBuf::from("/work/dist/view/Main.view.xml"));

        let abs = artifact_source(base, Path::new("/work/dist/./index.html")).unwrap();
        assert_eq!(abs.logical_path, "index.html");
    }

    #[test]
    fn test_artifact_source_rejects_escapes() {
        let base = Path::new("/work/dist");
        assert!(artifact_source(base, Path::new("../secret.txt")).is_err());
        assert!(artifact_source(base, Path::new("/etc/passwd")).is_err());
        assert!(artifact_source(base, Path::new(".")).is_err());
    }

    #[test]
    fn test_sync_result_aggregation() {
        let mut result = SyncResult::default();
        assert!(result.all_succeeded);
        result.add_outcome(SyncOutcome::succeeded("index.html", SyncAction::Created));
        result.add_outcome(SyncOutcome::failed("Component.js", "HTTP 500"));
        result.add_outcome(SyncOutcome::succeeded("manifest.json", SyncAction::Updated));

        assert!(!result.all_succeeded);
        assert_eq!(result.successful_count(), 2);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.synced_paths(), vec!["index.html", "manifest.json"]);
        assert_eq!(result.failed()[0].path, "Component.js");
        assert!(result.fatal_error().is_none());
    }

    #[test]
    fn test_fatal_error_prefers_authentication_when_nothing_succeeded() {
        let auth = AdtError::Authentication {
            status: 401,
            detail: "Unauthorized".into(),
        };
        let mut result = SyncResult::default();
        result.add_outcome(SyncOutcome::failed_by(
            "index.html",
            "HTTP 500",
            AdtError::Network("reset".into()),
        ));
        result.add_outcome(SyncOutcome::failed_by("Component.js", "401", auth.clone()));

        assert_eq!(result.fatal_error(), Some(&auth));
        assert_eq!(result.authentication_error(), Some(&auth));

        result.add_outcome(SyncOutcome::succeeded("manifest.json", SyncAction::Created));
        assert!(result.fatal_error().is_none());
        assert_eq!(result.authentication_error(), Some(&auth));
    }
}
