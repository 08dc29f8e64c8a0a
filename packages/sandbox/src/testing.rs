// ABOUTME: In-memory container runtime for tests
// ABOUTME: Records runtime calls and exposes exec stream endpoints to the test body

use crate::runtime::{
    ContainerSpec, ContainerSummary, ExecHandle, ExecStream, Result, RuntimeClient, RuntimeError,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::DuplexStream;

/// Runtime operations that can be made to fail or stall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    CreateVolume,
    ListVolumes,
    RemoveVolume,
    CreateContainer,
    StartContainer,
    RemoveContainer,
    ListContainers,
    OpenExec,
    StartExec,
    ResizeExec,
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub spec: ContainerSpec,
}

/// Test-side ends of an exec stream
pub struct FakeExecIo {
    /// Push process output (or an error) to the bridge; drop to end the stream
    pub output: mpsc::UnboundedSender<Result<Bytes>>,
    /// Read what the bridge wrote to the process stdin
    pub input: DuplexStream,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    volumes: Vec<String>,
    containers: Vec<FakeContainer>,
    execs: HashMap<String, String>,
    exec_io: HashMap<String, FakeExecIo>,
    resizes: Vec<(String, u16, u16)>,
    created_containers: usize,
    failing: HashSet<FakeOp>,
    stalled: HashSet<FakeOp>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    exec_delay: Mutex<Option<Duration>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subsequent call of `op` fail
    pub fn fail(&self, op: FakeOp) {
        self.lock().failing.insert(op);
    }

    /// Make every subsequent call of `op` hang forever
    pub fn stall(&self, op: FakeOp) {
        self.lock().stalled.insert(op);
    }

    /// Delay `open_exec` to simulate a slow runtime
    pub fn set_exec_delay(&self, delay: Duration) {
        *self
            .exec_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(delay);
    }

    /// Add a running container outside of the provisioner
    pub fn add_running_container(&self, name: &str) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("fake-container-{}", state.next_id);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            running: true,
            spec: ContainerSpec {
                name: name.to_string(),
                image: "fake".to_string(),
                user: None,
                mount: crate::runtime::MountSpec {
                    volume_name: String::new(),
                    container_path: String::new(),
                },
                command: Vec::new(),
                port: crate::runtime::PortSpec::HostNetwork,
                labels: HashMap::new(),
            },
        });
        id
    }

    /// Simulate a container exiting
    pub fn stop_container(&self, name: &str) {
        let mut state = self.lock();
        for container in state.containers.iter_mut().filter(|c| c.name == name) {
            container.running = false;
        }
    }

    /// Simulate a container being removed behind our back
    pub fn delete_container(&self, name: &str) {
        self.lock().containers.retain(|c| c.name != name);
    }

    pub fn volumes(&self) -> Vec<String> {
        self.lock().volumes.clone()
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.lock().containers.clone()
    }

    /// Number of successful `create_container` calls
    pub fn created_containers(&self) -> usize {
        self.lock().created_containers
    }

    pub fn resizes(&self) -> Vec<(String, u16, u16)> {
        self.lock().resizes.clone()
    }

    /// Number of exec processes opened against a container id or name
    pub fn exec_count(&self, container: &str) -> usize {
        self.lock()
            .execs
            .values()
            .filter(|target| target.as_str() == container)
            .count()
    }

    /// Take the test-side ends of the most recently started exec for a container
    pub fn take_exec_io(&self, container: &str) -> Option<FakeExecIo> {
        let mut state = self.lock();
        let exec_id = state
            .execs
            .iter()
            .filter(|(id, target)| target.as_str() == container && state.exec_io.contains_key(*id))
            .map(|(id, _)| id.clone())
            .max_by_key(|id| id.trim_start_matches("fake-exec-").parse::<u64>().unwrap_or(0))?;
        state.exec_io.remove(&exec_id)
    }

    async fn check(&self, op: FakeOp) -> Result<()> {
        let (failing, stalled) = {
            let state = self.lock();
            (state.failing.contains(&op), state.stalled.contains(&op))
        };
        if stalled {
            futures::future::pending::<()>().await;
        }
        if failing {
            return Err(RuntimeError::ContainerError(format!("{:?} failed", op)));
        }
        Ok(())
    }

    fn find_container<'a>(state: &'a FakeState, id_or_name: &str) -> Option<&'a FakeContainer> {
        state
            .containers
            .iter()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.check(FakeOp::CreateVolume).await?;
        let mut state = self.lock();
        if !state.volumes.iter().any(|v| v == name) {
            state.volumes.push(name.to_string());
        }
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        self.check(FakeOp::ListVolumes).await?;
        Ok(self.lock().volumes.clone())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.check(FakeOp::RemoveVolume).await?;
        let mut state = self.lock();
        let before = state.volumes.len();
        state.volumes.retain(|v| v != name);
        if state.volumes.len() == before {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.check(FakeOp::CreateContainer).await?;
        let mut state = self.lock();
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::ContainerError(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        state.next_id += 1;
        let id = format!("fake-container-{}", state.next_id);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            running: false,
            spec: spec.clone(),
        });
        state.created_containers += 1;
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.check(FakeOp::StartContainer).await?;
        let mut state = self.lock();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == container_id || c.name == container_id)
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        self.check(FakeOp::RemoveContainer).await?;
        let mut state = self.lock();
        let container = Self::find_container(&state, container_id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))?;
        if container.running && !force {
            return Err(RuntimeError::ContainerError(format!(
                "container {} is running",
                container_id
            )));
        }
        state.containers.retain(|c| c.id != container.id);
        Ok(())
    }

    async fn list_containers(&self, include_stopped: bool) -> Result<Vec<ContainerSummary>> {
        self.check(FakeOp::ListContainers).await?;
        Ok(self
            .lock()
            .containers
            .iter()
            .filter(|c| include_stopped || c.running)
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                running: c.running,
            })
            .collect())
    }

    async fn open_exec(
        &self,
        container_id: &str,
        _command: &[String],
        _tty: bool,
    ) -> Result<ExecHandle> {
        self.check(FakeOp::OpenExec).await?;
        let delay = *self
            .exec_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        match Self::find_container(&state, container_id) {
            Some(container) if container.running => {}
            Some(_) => {
                return Err(RuntimeError::ExecError(format!(
                    "container {} is not running",
                    container_id
                )))
            }
            None => return Err(RuntimeError::NotFound(container_id.to_string())),
        }
        state.next_id += 1;
        let id = format!("fake-exec-{}", state.next_id);
        state.execs.insert(id.clone(), container_id.to_string());
        Ok(ExecHandle {
            id,
            container_id: container_id.to_string(),
        })
    }

    async fn start_exec_stream(&self, exec: &ExecHandle) -> Result<ExecStream> {
        self.check(FakeOp::StartExec).await?;
        let (output_tx, output_rx) = mpsc::unbounded();
        let (bridge_side, test_side) = tokio::io::duplex(64 * 1024);

        let mut state = self.lock();
        if !state.execs.contains_key(&exec.id) {
            return Err(RuntimeError::NotFound(exec.id.clone()));
        }
        state.exec_io.insert(
            exec.id.clone(),
            FakeExecIo {
                output: output_tx,
                input: test_side,
            },
        );

        Ok(ExecStream {
            output: output_rx.boxed(),
            input: Box::pin(bridge_side),
        })
    }

    async fn resize_exec(&self, exec: &ExecHandle, cols: u16, rows: u16) -> Result<()> {
        self.check(FakeOp::ResizeExec).await?;
        self.lock().resizes.push((exec.id.clone(), cols, rows));
        Ok(())
    }
}
