use codebox_config::constants as vars;
use codebox_sandbox::{InvalidNetworkMode, NetworkMode, SandboxSettings};
use codebox_terminal::BridgeSettings;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error(transparent)]
    InvalidNetworkMode(#[from] InvalidNetworkMode),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin, `*` allows any
    pub client_url: String,
    pub sandbox: SandboxSettings,
    pub terminal_shell: Vec<String>,
    pub runtime_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_var(vars::PORT, vars::DEFAULT_PORT)?;
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }
        let preview_port = parse_var(vars::SANDBOX_PREVIEW_PORT, vars::DEFAULT_PREVIEW_PORT)?;
        if preview_port == 0 {
            return Err(ConfigError::PortOutOfRange(preview_port));
        }

        let host = string_var(vars::HOST, vars::DEFAULT_HOST);
        let client_url = string_var(vars::CLIENT_URL, vars::DEFAULT_CLIENT_URL);

        let network_mode = string_var(vars::SANDBOX_NETWORK_MODE, vars::DEFAULT_NETWORK_MODE)
            .parse::<NetworkMode>()?;

        let timeout_secs =
            parse_var(vars::RUNTIME_TIMEOUT_SECS, vars::DEFAULT_RUNTIME_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: vars::RUNTIME_TIMEOUT_SECS,
                value: timeout_secs.to_string(),
            });
        }
        let runtime_timeout = Duration::from_secs(timeout_secs);

        let image = string_var(vars::SANDBOX_IMAGE, vars::DEFAULT_SANDBOX_IMAGE);
        if image.trim().is_empty() {
            return Err(ConfigError::Empty(vars::SANDBOX_IMAGE));
        }

        // An empty user runs the container as the image's default user
        let user = Some(string_var(vars::SANDBOX_USER, vars::DEFAULT_SANDBOX_USER))
            .filter(|user| !user.trim().is_empty());

        let terminal_shell: Vec<String> =
            string_var(vars::TERMINAL_SHELL, vars::DEFAULT_TERMINAL_SHELL)
                .split_whitespace()
                .map(str::to_string)
                .collect();
        if terminal_shell.is_empty() {
            return Err(ConfigError::Empty(vars::TERMINAL_SHELL));
        }

        let sandbox = SandboxSettings {
            image,
            user,
            workspace_path: string_var(
                vars::SANDBOX_WORKSPACE_PATH,
                vars::DEFAULT_WORKSPACE_PATH,
            ),
            network_mode,
            preview_port,
            preview_host: string_var(vars::PREVIEW_HOST, vars::DEFAULT_PREVIEW_HOST),
            operation_timeout: runtime_timeout,
            ..SandboxSettings::default()
        };

        Ok(Config {
            host,
            port,
            client_url,
            sandbox,
            terminal_shell,
            runtime_timeout,
        })
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            shell: self.terminal_shell.clone(),
            exec_timeout: self.runtime_timeout,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn string_var(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}
