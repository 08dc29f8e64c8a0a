use super::AppState;
use crate::error::AppError;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, Uri};
use axum::response::{IntoResponse, Response};
use codebox_terminal::{Inbound, Outbound, TerminalBridge};
use futures::{future, SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Frames queued for one client before the bridge waits on the socket
const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeRoute {
    Terminal,
    FileTreeWatch,
}

/// Map an upgrade request path to its handler
pub fn route_upgrade(path: &str) -> Option<UpgradeRoute> {
    match path {
        "/terminal" => Some(UpgradeRoute::Terminal),
        "/file-tree" => Some(UpgradeRoute::FileTreeWatch),
        _ => None,
    }
}

/// An upgrade request whose connection is dropped instead of answered
#[derive(Debug, Error)]
#[error("refused upgrade for {path}")]
pub struct RefusedUpgrade {
    pub path: String,
}

/// Let through everything except upgrades that no sub-server accepts
pub fn screen_upgrade<B>(request: &Request<B>) -> Result<(), RefusedUpgrade> {
    if !is_websocket_upgrade(request.headers()) {
        return Ok(());
    }

    let path = request.uri().path();
    match route_upgrade(path) {
        Some(UpgradeRoute::Terminal) => Ok(()),
        Some(UpgradeRoute::FileTreeWatch) => {
            info!("File tree watching is not available, dropping connection");
            Err(RefusedUpgrade {
                path: path.to_string(),
            })
        }
        None => {
            warn!("Rejected WebSocket upgrade for {}", path);
            Err(RefusedUpgrade {
                path: path.to_string(),
            })
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// Fallback for every request the route table does not match
pub async fn handle_upgrade(
    State(state): State<AppState>,
    uri: Uri,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match (upgrade, route_upgrade(uri.path())) {
        (Ok(upgrade), Some(UpgradeRoute::Terminal)) => {
            let bridge = state.bridge.clone();
            upgrade.on_upgrade(move |socket| serve_terminal(socket, bridge))
        }
        _ => AppError::NotFound(format!("No route for {}", uri.path())).into_response(),
    }
}

async fn serve_terminal(socket: WebSocket, bridge: TerminalBridge) {
    let (mut sink, stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let closing = matches!(frame, Outbound::Close(_));
            if let Err(e) = sink.send(to_message(frame)).await {
                debug!("Terminal client write failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    let inbound = stream.filter_map(|message| future::ready(to_inbound(message)));
    bridge.serve(inbound, outbound_tx).await;

    if let Err(e) = writer.await {
        warn!("Terminal writer task failed: {}", e);
    }
}

fn to_inbound(message: Result<Message, axum::Error>) -> Option<Inbound> {
    match message {
        Ok(Message::Text(text)) => Some(Inbound::Text(text.to_string())),
        Ok(Message::Binary(data)) => Some(Inbound::Binary(data)),
        Ok(Message::Close(_)) => Some(Inbound::Close),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => {
            debug!("Terminal client read failed: {}", e);
            Some(Inbound::Close)
        }
    }
}

fn to_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Output(bytes) => Message::Binary(bytes),
        Outbound::Notice(text) => Message::Text(text.into()),
        Outbound::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}
