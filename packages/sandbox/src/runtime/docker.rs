// ABOUTME: Docker runtime implementation for project sandboxes
// ABOUTME: Uses bollard to manage volumes, containers and TTY exec sessions

use super::{
    ContainerSpec, ContainerSummary, ExecHandle, ExecStream, PortSpec, Result, RuntimeClient,
    RuntimeError,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
        StartContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults},
    models::{HostConfig, PortBinding},
    volume::{CreateVolumeOptions, ListVolumesOptions},
    Docker,
};
use crate::project::CONTAINER_PREFIX;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Label applied to every container and volume created by Codebox
pub const MANAGED_LABEL: &str = "codebox.managed";

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect using the platform default socket or `DOCKER_HOST`
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::ConnectionError(e.to_string()))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }

    fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
        let mut labels = spec.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let mut host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                spec.mount.volume_name, spec.mount.container_path
            )]),
            auto_remove: Some(false),
            ..Default::default()
        };

        let mut exposed_ports = HashMap::new();
        match &spec.port {
            PortSpec::Published {
                container_port,
                host_port,
            } => {
                let key = format!("{}/tcp", container_port);
                exposed_ports.insert(key.clone(), HashMap::new());
                host_config.port_bindings = Some(HashMap::from([(
                    key,
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port.to_string()),
                    }]),
                )]));
            }
            PortSpec::HostNetwork => {
                host_config.network_mode = Some("host".to_string());
            }
        }

        Config {
            image: Some(spec.image.clone()),
            user: spec.user.clone(),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.mount.container_path.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: Some(labels),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    fn is_not_found(error: &BollardError) -> bool {
        matches!(
            error,
            BollardError::DockerResponseServerError {
                status_code: 404,
                ..
            }
        )
    }

    /// Match sandboxes by name so containers created without our label still count
    fn sandbox_filters() -> HashMap<String, Vec<String>> {
        HashMap::from([(
            "name".to_string(),
            vec![format!("^/{}", CONTAINER_PREFIX)],
        )])
    }

    fn summarize(containers: Vec<bollard::models::ContainerSummary>) -> Vec<ContainerSummary> {
        let mut summaries = Vec::new();
        for container in containers {
            let Some(id) = container.id else {
                continue;
            };
            let running = container.state.as_deref() == Some("running");
            // Docker reports names with a leading slash
            for name in container.names.unwrap_or_default() {
                let name = name.trim_start_matches('/');
                if !name.starts_with(CONTAINER_PREFIX) {
                    continue;
                }
                summaries.push(ContainerSummary {
                    id: id.clone(),
                    name: name.to_string(),
                    running,
                });
            }
        }
        summaries
    }

    fn container_error(error: BollardError) -> RuntimeError {
        if Self::is_not_found(&error) {
            RuntimeError::NotFound(error.to_string())
        } else {
            RuntimeError::ContainerError(error.to_string())
        }
    }

    fn exec_error(error: BollardError) -> RuntimeError {
        if Self::is_not_found(&error) {
            RuntimeError::NotFound(error.to_string())
        } else {
            RuntimeError::ExecError(error.to_string())
        }
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| RuntimeError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        info!("Creating volume: {}", name);

        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels: HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
            ..Default::default()
        };

        self.client
            .create_volume(options)
            .await
            .map_err(|e| RuntimeError::VolumeError(e.to_string()))?;

        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await
            .map_err(|e| RuntimeError::VolumeError(e.to_string()))?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|volume| volume.name)
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        info!("Removing volume: {}", name);

        self.client.remove_volume(name, None).await.map_err(|e| {
            if Self::is_not_found(&e) {
                RuntimeError::NotFound(e.to_string())
            } else {
                RuntimeError::VolumeError(e.to_string())
            }
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        info!("Creating container: {} (image: {})", spec.name, spec.image);

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), Self::to_bollard_config(spec))
            .await
            .map_err(|e| RuntimeError::ContainerError(e.to_string()))?;

        for warning in &container.warnings {
            warn!("Container {} created with warning: {}", spec.name, warning);
        }
        debug!("Created container: {}", container.id);

        Ok(container.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        info!("Starting container: {}", container_id);

        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(Self::container_error)
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        info!("Removing container: {} (force: {})", container_id, force);

        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(Self::container_error)
    }

    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions {
            all: include_stopped,
            filters: Self::sandbox_filters(),
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::ContainerError(e.to_string()))?;

        Ok(Self::summarize(containers))
    }

    async fn open_exec(
        &self,
        container_id: &str,
        command: &[String],
        tty: bool,
    ) -> Result<ExecHandle> {
        debug!("Opening exec in container {}: {:?}", container_id, command);

        let options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(tty),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, options)
            .await
            .map_err(Self::exec_error)?;

        Ok(ExecHandle {
            id: exec.id,
            container_id: container_id.to_string(),
        })
    }

    async fn start_exec_stream(&self, exec: &ExecHandle) -> Result<ExecStream> {
        let options = StartExecOptions {
            detach: false,
            tty: true,
            output_capacity: None,
        };

        match self
            .client
            .start_exec(&exec.id, Some(options))
            .await
            .map_err(Self::exec_error)?
        {
            StartExecResults::Attached { output, input } => {
                let output = output
                    .map(|chunk| {
                        chunk
                            .map(LogOutput::into_bytes)
                            .map_err(|e| RuntimeError::StreamError(e.to_string()))
                    })
                    .boxed();

                Ok(ExecStream { output, input })
            }
            StartExecResults::Detached => Err(RuntimeError::ExecError(
                "Exec was detached unexpectedly".to_string(),
            )),
        }
    }

    async fn resize_exec(&self, exec: &ExecHandle, cols: u16, rows: u16) -> Result<()> {
        debug!("Resizing exec {} to {}x{}", exec.id, cols, rows);

        self.client
            .resize_exec(
                &exec.id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await
            .map_err(Self::exec_error)
    }
}
