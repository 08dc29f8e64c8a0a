// ABOUTME: Sandbox settings applied when provisioning project containers
// ABOUTME: Image, workspace mount, dev-server exposure mode and runtime call deadlines

use crate::runtime::PortSpec;
use codebox_config as defaults;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid network mode: {0} (expected 'published' or 'host')")]
pub struct InvalidNetworkMode(pub String);

/// How a sandbox exposes its development server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Fixed host port published to the preview port inside the container
    Published,
    /// Container shares the host network stack
    Host,
}

impl FromStr for NetworkMode {
    type Err = InvalidNetworkMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "published" => Ok(NetworkMode::Published),
            "host" => Ok(NetworkMode::Host),
            _ => Err(InvalidNetworkMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub image: String,
    pub user: Option<String>,
    /// Path inside the container where the project volume is mounted
    pub workspace_path: String,
    /// Long-running command that keeps an otherwise idle container alive
    pub idle_command: Vec<String>,
    pub network_mode: NetworkMode,
    pub preview_port: u16,
    pub preview_host: String,
    /// Deadline applied to every individual runtime call
    pub operation_timeout: Duration,
}

impl SandboxSettings {
    pub fn port_spec(&self) -> PortSpec {
        match self.network_mode {
            NetworkMode::Published => PortSpec::Published {
                container_port: self.preview_port,
                host_port: self.preview_port,
            },
            NetworkMode::Host => PortSpec::HostNetwork,
        }
    }

    pub fn preview_url(&self) -> String {
        format!("http://{}:{}", self.preview_host, self.preview_port)
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: defaults::DEFAULT_SANDBOX_IMAGE.to_string(),
            user: Some(defaults::DEFAULT_SANDBOX_USER.to_string()),
            workspace_path: defaults::DEFAULT_WORKSPACE_PATH.to_string(),
            idle_command: vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                "tail -f /dev/null".to_string(),
            ],
            network_mode: NetworkMode::Published,
            preview_port: defaults::DEFAULT_PREVIEW_PORT,
            preview_host: defaults::DEFAULT_PREVIEW_HOST.to_string(),
            operation_timeout: Duration::from_secs(defaults::DEFAULT_RUNTIME_TIMEOUT_SECS),
        }
    }
}
