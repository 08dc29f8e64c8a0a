use axum::http::{header, HeaderValue, Method};
use axum::{
    routing::{get, post},
    Router,
};
use codebox_sandbox::SandboxProvisioner;
use codebox_terminal::TerminalBridge;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{warn, Level};

pub mod health;
pub mod projects;
pub mod upgrade;

/// Shared handles for every route
#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<SandboxProvisioner>,
    pub bridge: TerminalBridge,
}

impl AppState {
    pub fn new(provisioner: Arc<SandboxProvisioner>, bridge: TerminalBridge) -> Self {
        Self {
            provisioner,
            bridge,
        }
    }
}

pub fn create_router(state: AppState, client_url: &str) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/create-new-project", post(projects::create_project))
        .route(
            "/projects/{project_id}",
            post(projects::restore_project).delete(projects::delete_project),
        )
        .route("/projects/{project_id}/preview", get(projects::preview_project))
        // WebSocket upgrades are dispatched by path outside the route table
        .fallback(upgrade::handle_upgrade)
        .layer(build_cors_layer(client_url))
        .layer(trace_layer)
        .with_state(state)
}

fn build_cors_layer(client_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]);

    if client_url == "*" {
        return cors.allow_origin(Any);
    }

    match client_url.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            warn!(
                "CORS: invalid client origin '{}', cross-origin requests will be rejected",
                client_url
            );
            cors
        }
    }
}
