use crate::config::{Config, ConfigError};
use codebox_config::constants as vars;
use codebox_sandbox::NetworkMode;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::time::Duration;

const ALL_VARS: [&str; 11] = [
    vars::PORT,
    vars::HOST,
    vars::CLIENT_URL,
    vars::SANDBOX_IMAGE,
    vars::SANDBOX_USER,
    vars::SANDBOX_WORKSPACE_PATH,
    vars::SANDBOX_PREVIEW_PORT,
    vars::SANDBOX_NETWORK_MODE,
    vars::PREVIEW_HOST,
    vars::TERMINAL_SHELL,
    vars::RUNTIME_TIMEOUT_SECS,
];

fn clear_env() {
    for name in ALL_VARS {
        env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    clear_env();

    let config = Config::from_env().unwrap();

    assert_eq!(config.port, 3000);
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.client_url, "http://localhost:5173");
    assert_eq!(config.sandbox.image, "codebox-image");
    assert_eq!(config.sandbox.user.as_deref(), Some("codebox"));
    assert_eq!(config.sandbox.workspace_path, "/home/codebox/app");
    assert_eq!(config.sandbox.network_mode, NetworkMode::Published);
    assert_eq!(config.sandbox.preview_port, 5173);
    assert_eq!(config.terminal_shell, vec!["/bin/bash".to_string()]);
    assert_eq!(config.runtime_timeout, Duration::from_secs(60));
    assert_eq!(config.sandbox.operation_timeout, Duration::from_secs(60));
    assert_eq!(config.bind_address(), "0.0.0.0:3000");
}

#[test]
#[serial]
fn test_config_from_env_with_overrides() {
    clear_env();
    env::set_var(vars::PORT, "8080");
    env::set_var(vars::CLIENT_URL, "https://app.example.com");
    env::set_var(vars::SANDBOX_IMAGE, "node:20");
    env::set_var(vars::SANDBOX_NETWORK_MODE, "host");
    env::set_var(vars::TERMINAL_SHELL, "/bin/zsh -l");
    env::set_var(vars::RUNTIME_TIMEOUT_SECS, "15");

    let config = Config::from_env().unwrap();

    assert_eq!(config.port, 8080);
    assert_eq!(config.client_url, "https://app.example.com");
    assert_eq!(config.sandbox.image, "node:20");
    assert_eq!(config.sandbox.network_mode, NetworkMode::Host);
    assert_eq!(
        config.terminal_shell,
        vec!["/bin/zsh".to_string(), "-l".to_string()]
    );
    assert_eq!(config.bridge_settings().exec_timeout, Duration::from_secs(15));
    assert_eq!(config.bridge_settings().shell, config.terminal_shell);

    clear_env();
}

#[test]
#[serial]
fn test_empty_user_runs_as_image_default() {
    clear_env();
    env::set_var(vars::SANDBOX_USER, "");

    let config = Config::from_env().unwrap();
    assert_eq!(config.sandbox.user, None);

    clear_env();
}

#[rstest]
#[case(vars::PORT, "not-a-number")]
#[case(vars::PORT, "70000")]
#[case(vars::SANDBOX_PREVIEW_PORT, "abc")]
#[case(vars::RUNTIME_TIMEOUT_SECS, "-5")]
#[case(vars::RUNTIME_TIMEOUT_SECS, "0")]
#[serial]
fn test_config_invalid_values(#[case] name: &str, #[case] value: &str) {
    clear_env();
    env::set_var(name, value);

    let result = Config::from_env();
    assert!(
        matches!(result, Err(ConfigError::InvalidValue { .. })),
        "{}={} should be rejected",
        name,
        value
    );

    clear_env();
}

#[test]
#[serial]
fn test_config_port_zero() {
    clear_env();
    env::set_var(vars::PORT, "0");

    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::PortOutOfRange(0))
    ));

    clear_env();
}

#[test]
#[serial]
fn test_config_invalid_network_mode() {
    clear_env();
    env::set_var(vars::SANDBOX_NETWORK_MODE, "bridge");

    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::InvalidNetworkMode(_))
    ));

    clear_env();
}

#[test]
#[serial]
fn test_config_empty_shell() {
    clear_env();
    env::set_var(vars::TERMINAL_SHELL, "   ");

    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::Empty(_))
    ));

    clear_env();
}
