// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Codebox

// Server Configuration
pub const PORT: &str = "PORT";
pub const HOST: &str = "HOST";

// CORS Configuration
pub const CLIENT_URL: &str = "CLIENT_URL";

// Sandbox Configuration
pub const SANDBOX_IMAGE: &str = "SANDBOX_IMAGE";
pub const SANDBOX_USER: &str = "SANDBOX_USER";
pub const SANDBOX_WORKSPACE_PATH: &str = "SANDBOX_WORKSPACE_PATH";
pub const SANDBOX_PREVIEW_PORT: &str = "SANDBOX_PREVIEW_PORT";
pub const SANDBOX_NETWORK_MODE: &str = "SANDBOX_NETWORK_MODE";
pub const PREVIEW_HOST: &str = "PREVIEW_HOST";

// Terminal Configuration
pub const TERMINAL_SHELL: &str = "TERMINAL_SHELL";

// Runtime Configuration
pub const RUNTIME_TIMEOUT_SECS: &str = "RUNTIME_TIMEOUT_SECS";

// Defaults
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_CLIENT_URL: &str = "http://localhost:5173";
pub const DEFAULT_SANDBOX_IMAGE: &str = "codebox-image";
pub const DEFAULT_SANDBOX_USER: &str = "codebox";
pub const DEFAULT_WORKSPACE_PATH: &str = "/home/codebox/app";
pub const DEFAULT_PREVIEW_PORT: u16 = 5173;
pub const DEFAULT_NETWORK_MODE: &str = "published";
pub const DEFAULT_PREVIEW_HOST: &str = "localhost";
pub const DEFAULT_TERMINAL_SHELL: &str = "/bin/bash";
pub const DEFAULT_RUNTIME_TIMEOUT_SECS: u64 = 60;
