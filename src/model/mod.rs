pub mod types;

pub use types::{
    ArtifactSource, ContainerTarget, TEMPORARY_PACKAGE, TransportOptions, TransportPolicy,
    TransportRef, container_name_without_namespace,
};
