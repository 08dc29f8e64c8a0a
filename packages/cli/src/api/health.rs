use super::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let deadline = state.provisioner.settings().operation_timeout;
    let ping = tokio::time::timeout(deadline, state.provisioner.runtime().ping()).await;

    let runtime = match ping {
        Ok(Ok(())) => "available",
        Ok(Err(e)) => {
            warn!("Container runtime unavailable: {}", e);
            "unavailable"
        }
        Err(_) => {
            warn!("Container runtime did not answer within {:?}", deadline);
            "unavailable"
        }
    };

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "codebox",
        "runtime": runtime,
        "activeSessions": state.bridge.active_sessions(),
    }))
}
