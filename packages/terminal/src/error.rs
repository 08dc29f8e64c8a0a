// ABOUTME: Error types for terminal sessions
// ABOUTME: Every variant is scoped to a single session and never fatal to the server

use crate::protocol::ProtocolError;
use codebox_sandbox::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TerminalError {
    /// Another session already owns the container
    #[error("Terminal session already active for container {0}")]
    SessionConflict(String),

    /// Exec stream failed after the session became active
    #[error("Exec stream error: {0}")]
    Stream(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Timed out after {seconds}s waiting to {operation}")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },
}

pub type Result<T> = std::result::Result<T, TerminalError>;
