// ABOUTME: Sandbox provisioning for Codebox projects
// ABOUTME: One container plus one persistent volume per project, driven through a runtime boundary

pub mod project;
pub mod provisioner;
pub mod runtime;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use project::{InvalidProjectId, ProjectId};
pub use provisioner::{
    ProvisionError, ProvisionedSandbox, RestoreOutcome, RestoreStatus, SandboxProvisioner,
};
pub use runtime::{
    ContainerSpec, ContainerSummary, DockerRuntime, ExecHandle, ExecInput, ExecOutput,
    ExecStream, MountSpec, PortSpec, RuntimeClient, RuntimeError,
};
pub use settings::{InvalidNetworkMode, NetworkMode, SandboxSettings};
