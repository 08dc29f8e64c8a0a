// ABOUTME: Container runtime boundary shared by sandbox provisioning and terminal sessions
// ABOUTME: Defines the narrow capability set Codebox needs from a container engine

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncWrite;

pub mod docker;

pub use docker::DockerRuntime;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Volume error: {0}")]
    VolumeError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Exec error: {0}")]
    ExecError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Named volume mounted into a sandbox container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub volume_name: String,
    pub container_path: String,
}

/// How the sandbox's development server is reachable from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    /// Publish a single container port on a fixed host port
    Published { container_port: u16, host_port: u16 },
    /// Share the host network namespace
    HostNetwork,
}

/// Container configuration for creating sandboxes
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub user: Option<String>,
    pub mount: MountSpec,
    pub command: Vec<String>,
    pub port: PortSpec,
    pub labels: HashMap<String, String>,
}

/// Container as reported by the runtime's own index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub running: bool,
}

/// Handle to a process created inside a running container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecHandle {
    pub id: String,
    pub container_id: String,
}

pub type ExecOutput = BoxStream<'static, Result<Bytes>>;
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Attached duplex stream of an exec: process output in, process stdin out
pub struct ExecStream {
    pub output: ExecOutput,
    pub input: ExecInput,
}

impl ExecStream {
    pub fn into_split(self) -> (ExecOutput, ExecInput) {
        (self.output, self.input)
    }
}

impl fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecStream").finish_non_exhaustive()
    }
}

/// Capability set the sandbox core requires from a container runtime
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Check that the runtime is reachable
    async fn ping(&self) -> Result<()>;

    async fn create_volume(&self, name: &str) -> Result<()>;

    /// Names of all volumes known to the runtime
    async fn list_volumes(&self) -> Result<Vec<String>>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Create (but do not start) a container, returning its runtime id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;

    /// List managed containers, optionally including stopped ones
    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ContainerSummary>>;

    async fn list_running_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.list_containers(false).await
    }

    /// Create a process inside a running container with stdio attached
    async fn open_exec(
        &self,
        container_id: &str,
        command: &[String],
        tty: bool,
    ) -> Result<ExecHandle>;

    /// Start an exec in attached (hijacked) mode
    async fn start_exec_stream(&self, exec: &ExecHandle) -> Result<ExecStream>;

    async fn resize_exec(&self, exec: &ExecHandle, cols: u16, rows: u16) -> Result<()>;
}
