//! Deploy configuration: TOML schema, `env:` resolution and validation.
//!
//! # Example Configuration
//!
//! ```toml
//! [connection]
//! server = "https://abap.example.com:44300"
//! client = "100"
//! strict_ssl = true
//!
//! [auth]
//! user = "DEVELOPER"
//! password = "env:ABAP_PASSWORD"
//!
//! [target]
//! package = "ZTEST"
//! container = "ZAPP"
//! container_description = "Sales dashboard"
//! create_transport = true
//! transport_text = "Sales dashboard deployment"
//! transport_use_locked = true
//! calc_appindex = true
//!
//! [resources]
//! base_dir = "dist"
//! patterns = ["**/*"]
//! ```
//!
//! Validation happens before anything touches the network; a config that
//! fails [`DeployConfig::validate`] never reaches the orchestrator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::model::{
    ContainerTarget, TEMPORARY_PACKAGE, TransportOptions, TransportPolicy, TransportRef,
    container_name_without_namespace,
};

/// Longest allowed BSP container name, namespace excluded.
pub const MAX_CONTAINER_NAME_LEN: usize = 15;

/// Environment variable consulted when `auth.password` is not set.
pub const PASSWORD_ENV: &str = "BSP_SYNC_PASSWORD";

/// Errors that can occur when loading or validating deploy configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML: {0}")]
    ParseToml(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Validation outcome, serializable for `bsp-sync validate`.
#[derive(Debug, Serialize)]
pub struct ConfigValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Root deploy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeployConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server base URL, e.g. `https://host:44300`.
    #[serde(default)]
    pub server: String,
    /// SAP client (`sap-client` query parameter).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default = "default_true")]
    pub strict_ssl: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            client: None,
            strict_ssl: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub user: String,
    /// Supports "env:VAR_NAME"; falls back to `BSP_SYNC_PASSWORD`.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub container_description: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_no: Option<String>,
    #[serde(default)]
    pub create_transport: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_text: Option<String>,
    #[serde(default)]
    pub transport_use_locked: bool,
    #[serde(default)]
    pub transport_use_user_match: bool,
    /// Recalculate the UI5 application index after a successful upload.
    #[serde(default)]
    pub calc_appindex: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            package: String::new(),
            container: String::new(),
            container_description: String::new(),
            language: default_language(),
            transport_no: None,
            create_transport: false,
            transport_text: None,
            transport_use_locked: false,
            transport_use_user_match: false,
            calc_appindex: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            patterns: default_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of files uploaded at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_language() -> String {
    "EN".to_string()
}
fn default_base_dir() -> PathBuf {
    PathBuf::from("dist")
}
fn default_patterns() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_concurrency() -> usize {
    4
}

/// Immutable connection parameters for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub server: String,
    pub client: Option<String>,
    pub strict_ssl: bool,
    pub timeout: Duration,
}

/// Basic-auth credentials. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Local files to synchronize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSelection {
    pub base_dir: PathBuf,
    pub patterns: Vec<String>,
}

/// Everything the core needs, validated and with defaults applied.
#[derive(Debug, Clone)]
pub struct ResolvedDeploy {
    pub connection: ConnectionContext,
    pub credentials: Credentials,
    pub target: ContainerTarget,
    pub transport: TransportOptions,
    pub resources: ResourceSelection,
    pub concurrency: usize,
    pub calc_app_index: bool,
}

impl DeployConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve "env:VAR" values and the password fallback variable.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(env_var) = self.auth.user.strip_prefix("env:") {
            self.auth.user = dotenvy::var(env_var)
                .map_err(|_| ConfigError::EnvVarNotFound(env_var.to_string()))?;
        }

        match self.auth.password.as_deref() {
            Some(value) => {
                if let Some(env_var) = value.strip_prefix("env:") {
                    self.auth.password = Some(
                        dotenvy::var(env_var)
                            .map_err(|_| ConfigError::EnvVarNotFound(env_var.to_string()))?,
                    );
                }
            }
            None => self.auth.password = dotenvy::var(PASSWORD_ENV).ok(),
        }

        Ok(())
    }

    /// Validate the configuration and return any errors/warnings.
    pub fn validate(&self) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let target = &self.target;

        if self.connection.server.trim().is_empty() {
            errors.push("connection.server is required.".to_string());
        } else if !self.connection.server.starts_with("http://")
            && !self.connection.server.starts_with("https://")
        {
            errors.push(format!(
                "connection.server must be an http(s) URL, got '{}'.",
                self.connection.server
            ));
        }

        if self.auth.user.trim().is_empty() || self.auth.password.as_deref().is_none_or(str::is_empty) {
            errors.push(format!(
                "auth is not fully specified (check auth.user and auth.password or {PASSWORD_ENV})."
            ));
        }

        if target.package.trim().is_empty()
            || target.container.trim().is_empty()
            || target.container_description.trim().is_empty()
        {
            errors.push(
                "target is not fully specified (check package, container and container_description)."
                    .to_string(),
            );
        }

        let container_name = container_name_without_namespace(&target.container);
        if container_name.chars().count() > MAX_CONTAINER_NAME_LEN {
            errors.push(format!(
                "target.container '{}' must not be longer than {MAX_CONTAINER_NAME_LEN} characters \
                 (excluding a customer namespace such as /YYY/).",
                target.container
            ));
        }

        let explicit = target.transport_no.as_deref().is_some_and(|t| !t.trim().is_empty());
        if !self.is_temporary_package()
            && !explicit
            && !target.create_transport
            && !target.transport_use_locked
        {
            errors.push(format!(
                "Package '{}' requires a transport: set target.transport_no, \
                 target.create_transport or target.transport_use_locked.",
                target.package
            ));
        }

        if explicit
            && (target.create_transport
                || target.transport_use_locked
                || target.transport_use_user_match)
        {
            errors.push(
                "target.transport_no cannot be combined with create_transport, \
                 transport_use_locked or transport_use_user_match."
                    .to_string(),
            );
        }

        if target.create_transport
            && target.transport_text.as_deref().is_none_or(|t| t.trim().is_empty())
        {
            errors.push(
                "target.transport_text is required when target.create_transport is enabled."
                    .to_string(),
            );
        }

        if self.resources.patterns.is_empty() {
            errors.push("resources.patterns must contain at least one glob pattern.".to_string());
        }
        for pattern in &self.resources.patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                errors.push(format!("Invalid resources pattern '{pattern}': {e}"));
            }
        }

        if self.sync.concurrency == 0 {
            errors.push("sync.concurrency must be at least 1.".to_string());
        }

        // Warnings
        if !self.connection.strict_ssl {
            warnings.push(
                "connection.strict_ssl is disabled. TLS certificates will not be verified."
                    .to_string(),
            );
        }

        if self.is_temporary_package()
            && (target.create_transport
                || target.transport_use_locked
                || target.transport_use_user_match)
        {
            warnings.push(format!(
                "Package '{}' needs no transport; transport options will be ignored.",
                target.package
            ));
        }

        if target.transport_use_locked && target.transport_use_user_match {
            warnings.push(
                "transport_use_locked takes precedence over transport_use_user_match.".to_string(),
            );
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Validate and convert into the core's immutable inputs.
    pub fn resolve(&self) -> Result<ResolvedDeploy, ConfigError> {
        let validation = self.validate();
        if !validation.valid {
            return Err(ConfigError::Invalid(validation.errors));
        }

        Ok(ResolvedDeploy {
            connection: ConnectionContext {
                server: self.connection.server.trim_end_matches('/').to_string(),
                client: self
                    .connection
                    .client
                    .clone()
                    .filter(|c| !c.trim().is_empty()),
                strict_ssl: self.connection.strict_ssl,
                timeout: Duration::from_secs(self.connection.timeout_secs),
            },
            credentials: Credentials {
                user: self.auth.user.clone(),
                password: self.auth.password.clone().unwrap_or_default(),
            },
            target: ContainerTarget {
                package: self.target.package.clone(),
                container: self.target.container.clone(),
                description: self.target.container_description.clone(),
                language: self.target.language.to_uppercase(),
            },
            transport: self.transport_options(),
            resources: ResourceSelection {
                base_dir: self.resources.base_dir.clone(),
                patterns: self.resources.patterns.clone(),
            },
            concurrency: self.sync.concurrency,
            calc_app_index: self.target.calc_appindex,
        })
    }

    /// Select the single active transport policy.
    ///
    /// Precedence: explicit number, temporary package, reuse-locked,
    /// reuse-user-owned, create-new.
    pub fn transport_options(&self) -> TransportOptions {
        let target = &self.target;
        let text = target
            .transport_text
            .clone()
            .filter(|t| !t.trim().is_empty());

        if let Some(number) = target.transport_no.as_deref().map(str::trim)
            && !number.is_empty()
        {
            return TransportOptions {
                policy: TransportPolicy::Explicit(TransportRef::new(number)),
                allow_create: false,
                text,
            };
        }

        if self.is_temporary_package() {
            return TransportOptions::none_required();
        }

        let policy = if target.transport_use_locked {
            TransportPolicy::ReuseLocked
        } else if target.transport_use_user_match {
            TransportPolicy::ReuseUserOwned
        } else {
            TransportPolicy::CreateNew
        };

        TransportOptions {
            policy,
            allow_create: target.create_transport,
            text,
        }
    }

    fn is_temporary_package(&self) -> bool {
        self.target.package.eq_ignore_ascii_case(TEMPORARY_PACKAGE)
    }
}
