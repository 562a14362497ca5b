//! Uniform interface to the external container CLI/daemon (§4.1).

pub mod adapter;
pub mod classify;
pub mod endpoint;

pub use adapter::{
    ContainerInspect, ContainerState, ContainerSummary, InfoProjection, MountInfo, Outcome,
    RuntimeAdapter, SandboxFeatureState, VolumeInspect,
};
pub use classify::ReasonClass;
pub use endpoint::RuntimeEndpoint;
