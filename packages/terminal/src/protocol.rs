// ABOUTME: Wire protocol between terminal clients and the bridge
// ABOUTME: Structured JSON messages in, raw terminal bytes and plain-text notices out

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Normal closure of the client socket
pub const CLOSE_NORMAL: u16 = 1000;
/// Server is going away
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Unexpected condition on the server side, e.g. an exec stream failure
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Close reasons must fit in a control frame
const MAX_CLOSE_REASON_BYTES: usize = 123;

const KNOWN_TYPES: [&str; 3] = ["init", "stdin", "resize"];

/// Messages sent by a terminal client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Attach to a container's shell
    Init { container_id: String },
    /// Raw input for the shell
    Stdin { container_id: String, input: String },
    /// Terminal dimensions changed
    Resize {
        container_id: String,
        cols: u16,
        rows: u16,
    },
}

impl ClientMessage {
    pub fn container_id(&self) -> &str {
        match self {
            ClientMessage::Init { container_id }
            | ClientMessage::Stdin { container_id, .. }
            | ClientMessage::Resize { container_id, .. } => container_id,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Decode a client frame into a message
pub fn decode(payload: &[u8]) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_slice::<ClientMessage>(payload).map_err(|err| {
        if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(payload) {
            if let Some(Value::String(kind)) = fields.get("type") {
                if !KNOWN_TYPES.contains(&kind.as_str()) {
                    return ProtocolError::UnknownType(kind.clone());
                }
            }
        }
        ProtocolError::Malformed(err.to_string())
    })
}

/// Frame received from the client socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Bytes),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON_BYTES {
            let mut end = MAX_CLOSE_REASON_BYTES;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        Self { code, reason }
    }
}

/// Frame to deliver to the client socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Raw pseudo-terminal output, passed through unmodified
    Output(Bytes),
    /// Plain-text status, warning or error line
    Notice(String),
    /// Close the socket, with a close frame when a reason is given
    Close(Option<CloseReason>),
}

pub mod notice {
    use super::ProtocolError;

    pub fn connected(container_id: &str) -> String {
        format!("Connected to container {}\r\n", container_id)
    }

    pub fn conflict(container_id: &str) -> String {
        format!(
            "Error: terminal session already active for container {}\r\n",
            container_id
        )
    }

    pub fn init_failed(container_id: &str, reason: &str) -> String {
        format!(
            "Error: failed to start terminal for container {}: {}\r\n",
            container_id, reason
        )
    }

    pub fn already_initialized(container_id: &str) -> String {
        format!(
            "Warning: this connection is already attached to container {}\r\n",
            container_id
        )
    }

    pub fn not_initialized() -> String {
        "Warning: no active terminal session, send an init message first\r\n".to_string()
    }

    pub fn wrong_container(container_id: &str) -> String {
        format!(
            "Warning: this connection is not attached to container {}\r\n",
            container_id
        )
    }

    pub fn rejected(error: &ProtocolError) -> String {
        format!("Warning: {}\r\n", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_init() {
        let message = decode(br#"{"type":"init","containerId":"abc"}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::Init {
                container_id: "abc".to_string()
            }
        );
        assert_eq!(message.container_id(), "abc");
    }

    #[test]
    fn test_decode_stdin_keeps_input_verbatim() {
        let message =
            decode(br#"{"type":"stdin","containerId":"abc","input":"ls -la\n\u0003"}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::Stdin {
                container_id: "abc".to_string(),
                input: "ls -la\n\u{3}".to_string()
            }
        );
    }

    #[test]
    fn test_decode_resize() {
        let message =
            decode(br#"{"type":"resize","containerId":"abc","cols":80,"rows":24}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::Resize {
                container_id: "abc".to_string(),
                cols: 80,
                rows: 24
            }
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode(br#"{"type":"exec","containerId":"abc"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("exec".to_string()));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode(b"not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"containerId":"abc"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        // Known type with missing fields is malformed, not unknown
        assert!(matches!(
            decode(br#"{"type":"resize","containerId":"abc","cols":80}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"type":"resize","containerId":"abc","cols":-1,"rows":24}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_close_reason_is_truncated_on_char_boundary() {
        let long = "é".repeat(100);
        let reason = CloseReason::new(CLOSE_INTERNAL_ERROR, long);
        assert!(reason.reason.len() <= 123);
        assert!(reason.reason.chars().all(|c| c == 'é'));
        assert_eq!(reason.code, 1011);
    }
}
