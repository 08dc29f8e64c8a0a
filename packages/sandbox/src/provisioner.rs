// ABOUTME: Sandbox lifecycle manager turning project ids into running containers
// ABOUTME: Creates, restores and deletes the volume/container pair backing a project

use crate::project::{InvalidProjectId, ProjectId};
use crate::runtime::{ContainerSpec, MountSpec, RuntimeClient, RuntimeError};
use crate::settings::SandboxSettings;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Label recording which project a container or volume belongs to
pub const PROJECT_LABEL: &str = "codebox.project_id";

pub const VOLUME_MISSING_MESSAGE: &str = "Volume does not exist";

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Failed to {operation}: {source}")]
    Provision {
        operation: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidProjectId(#[from] InvalidProjectId),

    #[error("Timed out after {seconds}s waiting to {operation}")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Newly provisioned sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedSandbox {
    pub project_id: ProjectId,
    pub container_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStatus {
    /// A container with the project's name was already running
    Active,
    /// A fresh container was started on the existing volume
    Restarted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub project_id: ProjectId,
    pub container_id: String,
    pub status: RestoreStatus,
}

/// Provisions one container + one volume per project.
///
/// `restore_sandbox` checks for a running container and then creates one
/// without holding any lock, so two concurrent restores of the same project
/// can both reach the create step. The runtime rejects the second create
/// because the container name is taken, which surfaces as a
/// [`ProvisionError::Provision`] to that caller.
pub struct SandboxProvisioner {
    runtime: Arc<dyn RuntimeClient>,
    settings: SandboxSettings,
}

impl SandboxProvisioner {
    pub fn new(runtime: Arc<dyn RuntimeClient>, settings: SandboxSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn runtime(&self) -> Arc<dyn RuntimeClient> {
        self.runtime.clone()
    }

    /// Create a volume and a running container for a brand new project
    pub async fn create_sandbox(&self) -> Result<ProvisionedSandbox> {
        let project_id = ProjectId::generate();
        let volume_name = project_id.volume_name();
        info!("Provisioning sandbox for {}", project_id);

        self.call("create volume", self.runtime.create_volume(&volume_name))
            .await?;

        // TODO: remove the volume when container creation or start fails
        let container_id = self.launch_container(&project_id).await?;

        info!(
            "Provisioned sandbox for {} (container {})",
            project_id, container_id
        );

        Ok(ProvisionedSandbox {
            project_id,
            container_id,
        })
    }

    /// Bring an existing project's sandbox back to a running state
    pub async fn restore_sandbox(&self, project_id: &ProjectId) -> Result<RestoreOutcome> {
        self.ensure_volume(project_id).await?;

        let container_name = project_id.container_name();
        let containers = self
            .call("list containers", self.runtime.list_containers(true))
            .await?;

        if let Some(existing) = containers.iter().find(|c| c.name == container_name) {
            if existing.running {
                debug!("Sandbox for {} is already active", project_id);
                return Ok(RestoreOutcome {
                    project_id: *project_id,
                    container_id: existing.id.clone(),
                    status: RestoreStatus::Active,
                });
            }

            // A stopped container still holds the name
            info!(
                "Removing stopped container {} for {}",
                existing.id, project_id
            );
            self.call(
                "remove container",
                self.runtime.remove_container(&existing.id, true),
            )
            .await?;
        }

        let container_id = self.launch_container(project_id).await?;
        info!(
            "Restarted sandbox for {} (container {})",
            project_id, container_id
        );

        Ok(RestoreOutcome {
            project_id: *project_id,
            container_id,
            status: RestoreStatus::Restarted,
        })
    }

    /// Remove a project's container (if any) and its volume
    pub async fn delete_sandbox(&self, project_id: &ProjectId) -> Result<()> {
        self.ensure_volume(project_id).await?;

        let container_name = project_id.container_name();
        let containers = self
            .call("list containers", self.runtime.list_containers(true))
            .await?;

        if let Some(existing) = containers.iter().find(|c| c.name == container_name) {
            self.call(
                "remove container",
                self.runtime.remove_container(&existing.id, true),
            )
            .await?;
        }

        self.call(
            "remove volume",
            self.runtime.remove_volume(&project_id.volume_name()),
        )
        .await?;

        info!("Deleted sandbox for {}", project_id);
        Ok(())
    }

    /// Address the project's development server is reachable at
    pub async fn preview_address(&self, project_id: &ProjectId) -> Result<String> {
        self.ensure_volume(project_id).await?;
        Ok(self.settings.preview_url())
    }

    async fn ensure_volume(&self, project_id: &ProjectId) -> Result<()> {
        let volume_name = project_id.volume_name();
        let volumes = self
            .call("list volumes", self.runtime.list_volumes())
            .await?;

        if volumes.iter().any(|v| *v == volume_name) {
            Ok(())
        } else {
            warn!("Volume {} not found for {}", volume_name, project_id);
            Err(ProvisionError::NotFound(VOLUME_MISSING_MESSAGE.to_string()))
        }
    }

    async fn launch_container(&self, project_id: &ProjectId) -> Result<String> {
        let spec = self.container_spec(project_id);
        let container_id = self
            .call("create container", self.runtime.create_container(&spec))
            .await?;

        self.call(
            "start container",
            self.runtime.start_container(&container_id),
        )
        .await?;

        Ok(container_id)
    }

    fn container_spec(&self, project_id: &ProjectId) -> ContainerSpec {
        ContainerSpec {
            name: project_id.container_name(),
            image: self.settings.image.clone(),
            user: self.settings.user.clone(),
            mount: MountSpec {
                volume_name: project_id.volume_name(),
                container_path: self.settings.workspace_path.clone(),
            },
            command: self.settings.idle_command.clone(),
            port: self.settings.port_spec(),
            labels: HashMap::from([(PROJECT_LABEL.to_string(), project_id.to_string())]),
        }
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, RuntimeError>>,
    {
        match tokio::time::timeout(self.settings.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ProvisionError::Provision { operation, source }),
            Err(_) => Err(ProvisionError::Timeout {
                operation,
                seconds: self.settings.operation_timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::PortSpec;
    use crate::settings::NetworkMode;
    use crate::testing::{FakeOp, FakeRuntime};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn setup() -> (Arc<FakeRuntime>, SandboxProvisioner) {
        let runtime = Arc::new(FakeRuntime::new());
        let provisioner = SandboxProvisioner::new(runtime.clone(), SandboxSettings::default());
        (runtime, provisioner)
    }

    #[tokio::test]
    async fn test_create_sandbox_provisions_volume_and_running_container() {
        let (runtime, provisioner) = setup();

        let sandbox = provisioner.create_sandbox().await.unwrap();

        assert!(sandbox.project_id.to_string().starts_with("project_"));
        assert!(!sandbox.container_id.is_empty());
        assert_eq!(runtime.volumes(), vec![sandbox.project_id.volume_name()]);

        let containers = runtime.containers();
        assert_eq!(containers.len(), 1);
        let container = &containers[0];
        assert_eq!(container.id, sandbox.container_id);
        assert_eq!(container.name, sandbox.project_id.container_name());
        assert!(container.running);
        assert_eq!(container.spec.image, "codebox-image");
        assert_eq!(
            container.spec.mount,
            MountSpec {
                volume_name: sandbox.project_id.volume_name(),
                container_path: "/home/codebox/app".to_string(),
            }
        );
        assert_eq!(
            container.spec.command,
            vec!["/bin/bash", "-c", "tail -f /dev/null"]
        );
        assert_eq!(
            container.spec.labels.get(PROJECT_LABEL),
            Some(&sandbox.project_id.to_string())
        );
    }

    #[tokio::test]
    async fn test_create_sandbox_host_network_mode() {
        let runtime = Arc::new(FakeRuntime::new());
        let settings = SandboxSettings {
            network_mode: NetworkMode::Host,
            ..Default::default()
        };
        let provisioner = SandboxProvisioner::new(runtime.clone(), settings);

        provisioner.create_sandbox().await.unwrap();

        assert_eq!(runtime.containers()[0].spec.port, PortSpec::HostNetwork);
    }

    #[tokio::test]
    async fn test_create_sandbox_reports_failing_step() {
        let (runtime, provisioner) = setup();
        runtime.fail(FakeOp::StartContainer);

        let err = provisioner.create_sandbox().await.unwrap_err();

        match err {
            ProvisionError::Provision { operation, .. } => {
                assert_eq!(operation, "start container")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // No cleanup on failure: the volume and stopped container remain
        assert_eq!(runtime.volumes().len(), 1);
        assert_eq!(runtime.containers().len(), 1);
    }

    #[tokio::test]
    async fn test_create_sandbox_volume_failure() {
        let (runtime, provisioner) = setup();
        runtime.fail(FakeOp::CreateVolume);

        let err = provisioner.create_sandbox().await.unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Provision {
                operation: "create volume",
                ..
            }
        ));
        assert_eq!(runtime.created_containers(), 0);
    }

    #[tokio::test]
    async fn test_restore_missing_volume_is_not_found() {
        let (runtime, provisioner) = setup();

        let err = provisioner
            .restore_sandbox(&ProjectId::generate())
            .await
            .unwrap_err();

        match err {
            ProvisionError::NotFound(message) => assert_eq!(message, "Volume does not exist"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(runtime.created_containers(), 0);
    }

    #[tokio::test]
    async fn test_restore_running_sandbox_is_idempotent() {
        let (runtime, provisioner) = setup();
        let sandbox = provisioner.create_sandbox().await.unwrap();

        for _ in 0..2 {
            let outcome = provisioner
                .restore_sandbox(&sandbox.project_id)
                .await
                .unwrap();
            assert_eq!(outcome.status, RestoreStatus::Active);
            assert_eq!(outcome.container_id, sandbox.container_id);
        }

        assert_eq!(runtime.created_containers(), 1);
    }

    #[tokio::test]
    async fn test_restore_recreates_removed_container() {
        let (runtime, provisioner) = setup();
        let sandbox = provisioner.create_sandbox().await.unwrap();
        runtime.delete_container(&sandbox.project_id.container_name());

        let outcome = provisioner
            .restore_sandbox(&sandbox.project_id)
            .await
            .unwrap();

        assert_eq!(outcome.status, RestoreStatus::Restarted);
        assert_ne!(outcome.container_id, sandbox.container_id);
        assert_eq!(runtime.created_containers(), 2);
        // Storage survives the container
        assert_eq!(runtime.volumes(), vec![sandbox.project_id.volume_name()]);
    }

    #[tokio::test]
    async fn test_restore_replaces_stopped_container() {
        let (runtime, provisioner) = setup();
        let sandbox = provisioner.create_sandbox().await.unwrap();
        runtime.stop_container(&sandbox.project_id.container_name());

        let outcome = provisioner
            .restore_sandbox(&sandbox.project_id)
            .await
            .unwrap();

        assert_eq!(outcome.status, RestoreStatus::Restarted);
        let containers = runtime.containers();
        assert_eq!(containers.len(), 1);
        assert!(containers[0].running);
        assert_eq!(containers[0].id, outcome.container_id);
    }

    #[tokio::test]
    async fn test_delete_sandbox_removes_container_and_volume() {
        let (runtime, provisioner) = setup();
        let sandbox = provisioner.create_sandbox().await.unwrap();

        provisioner.delete_sandbox(&sandbox.project_id).await.unwrap();

        assert!(runtime.volumes().is_empty());
        assert!(runtime.containers().is_empty());
        let err = provisioner
            .restore_sandbox(&sandbox.project_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_project_is_not_found() {
        let (_runtime, provisioner) = setup();

        let err = provisioner
            .delete_sandbox(&ProjectId::generate())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_preview_address_requires_volume() {
        let (_runtime, provisioner) = setup();
        let sandbox = provisioner.create_sandbox().await.unwrap();

        let url = provisioner
            .preview_address(&sandbox.project_id)
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:5173");

        assert!(provisioner
            .preview_address(&ProjectId::generate())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_hung_runtime_call_times_out() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.stall(FakeOp::CreateContainer);
        let settings = SandboxSettings {
            operation_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let provisioner = SandboxProvisioner::new(runtime, settings);

        let err = provisioner.create_sandbox().await.unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Timeout {
                operation: "create container",
                ..
            }
        ));
    }
}
