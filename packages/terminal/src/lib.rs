// ABOUTME: Interactive terminal sessions for Codebox sandboxes
// ABOUTME: Bridges client sockets to container shells with one session per container

pub mod bridge;
pub mod error;
pub mod protocol;
pub mod registry;

pub use bridge::{BridgeSettings, TerminalBridge};
pub use error::{Result, TerminalError};
pub use protocol::{
    ClientMessage, CloseReason, Inbound, Outbound, ProtocolError, CLOSE_GOING_AWAY,
    CLOSE_INTERNAL_ERROR, CLOSE_NORMAL,
};
pub use registry::{SessionHandle, SessionRegistry};
