//! Core value types shared by the resolver, synchronizer and orchestrator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Package that needs no transport.
pub const TEMPORARY_PACKAGE: &str = "$TMP";

/// Where synchronized artifacts land.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerTarget {
    pub package: String,
    /// BSP container name, optionally prefixed with a customer namespace (`/YYY/NAME`).
    pub container: String,
    pub description: String,
    pub language: String,
}

impl ContainerTarget {
    pub fn is_temporary(&self) -> bool {
        self.package.eq_ignore_ascii_case(TEMPORARY_PACKAGE)
    }
}

/// Container name without its customer namespace (`/YYY/ZAPP` → `ZAPP`).
pub fn container_name_without_namespace(container: &str) -> &str {
    container
        .rsplit_once('/')
        .map_or(container, |(_, name)| name)
}

/// Opaque transport request number assigned by the backend (e.g. `DEVK900123`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TransportRef(String);

impl TransportRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransportRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the transport for an operation is obtained. Exactly one is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPolicy {
    Explicit(TransportRef),
    ReuseLocked,
    ReuseUserOwned,
    CreateNew,
    NoneRequired,
}

impl TransportPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Explicit(_) => "explicit",
            Self::ReuseLocked => "reuse-locked",
            Self::ReuseUserOwned => "reuse-user-owned",
            Self::CreateNew => "create-new",
            Self::NoneRequired => "none-required",
        }
    }

    /// Whether the policy needs a round trip to the transport endpoints.
    pub fn needs_resolution(&self) -> bool {
        !matches!(self, Self::Explicit(_) | Self::NoneRequired)
    }
}

/// The active policy plus what resolution may fall back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub policy: TransportPolicy,
    /// Whether a new transport may be created when reuse finds nothing.
    pub allow_create: bool,
    /// Free-text description used to create or search for a transport.
    pub text: Option<String>,
}

impl TransportOptions {
    pub fn none_required() -> Self {
        Self {
            policy: TransportPolicy::NoneRequired,
            allow_create: false,
            text: None,
        }
    }

    pub fn explicit(id: impl Into<String>) -> Self {
        Self {
            policy: TransportPolicy::Explicit(TransportRef::new(id)),
            allow_create: false,
            text: None,
        }
    }
}

/// A local file queued for synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSource {
    pub local_path: PathBuf,
    /// `/`-separated path relative to the base directory.
    pub logical_path: String,
}
