mod config_tests;

use crate::config::Config;
use crate::{build_state, AppState};
use codebox_sandbox::testing::FakeRuntime;
use codebox_sandbox::SandboxSettings;
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        client_url: "*".to_string(),
        sandbox: SandboxSettings {
            operation_timeout: Duration::from_secs(5),
            ..SandboxSettings::default()
        },
        terminal_shell: vec!["/bin/bash".to_string()],
        runtime_timeout: Duration::from_secs(5),
    }
}

pub(crate) fn test_state() -> (Arc<FakeRuntime>, AppState) {
    let runtime = Arc::new(FakeRuntime::new());
    let state = build_state(runtime.clone(), &test_config());
    (runtime, state)
}
