use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use codebox_sandbox::{InvalidProjectId, ProvisionError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error type returned by every HTTP handler
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A provisioning call failed while performing `action`
    #[error("Failed to {action}: {source}")]
    Sandbox {
        action: &'static str,
        #[source]
        source: ProvisionError,
    },
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

impl AppError {
    pub fn sandbox(action: &'static str) -> impl FnOnce(ProvisionError) -> AppError {
        move |source| AppError::Sandbox { action, source }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Sandbox { source, .. } => match source {
                ProvisionError::NotFound(_) => StatusCode::NOT_FOUND,
                ProvisionError::InvalidProjectId(_) => StatusCode::BAD_REQUEST,
                ProvisionError::Provision { .. } | ProvisionError::Timeout { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Message safe to show to clients; runtime details stay in the logs
    fn to_user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Sandbox { action, source } => match source {
                ProvisionError::NotFound(msg) => msg.clone(),
                ProvisionError::InvalidProjectId(err) => err.to_string(),
                ProvisionError::Provision { .. } | ProvisionError::Timeout { .. } => {
                    format!("Failed to {}", action)
                }
            },
        }
    }
}

impl From<InvalidProjectId> for AppError {
    fn from(err: InvalidProjectId) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        }

        let body = ErrorResponse {
            message: self.to_user_message(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebox_sandbox::RuntimeError;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_volume_is_not_found() {
        let err = AppError::sandbox("restore project")(ProvisionError::NotFound(
            "Volume does not exist".to_string(),
        ));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "message": "Volume does not exist" })
        );
    }

    #[tokio::test]
    async fn test_runtime_details_are_not_leaked() {
        let err = AppError::sandbox("create new project")(ProvisionError::Provision {
            operation: "create volume",
            source: RuntimeError::ConnectionError("/var/run/docker.sock refused".to_string()),
        });

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "message": "Failed to create new project" })
        );
    }

    #[tokio::test]
    async fn test_timeout_is_internal_error() {
        let err = AppError::sandbox("restore project")(ProvisionError::Timeout {
            operation: "start container",
            seconds: 60,
        });
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_project_id_is_bad_request() {
        let err: AppError = "project_nope"
            .parse::<codebox_sandbox::ProjectId>()
            .unwrap_err()
            .into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_user_message().contains("project_nope"));
    }
}
