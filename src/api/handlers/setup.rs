use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ErrorBody};
use crate::setup::SetupState;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StatusResponse {
    pub setup_complete: bool,
    pub database_ready: bool,
    pub schema_ready: bool,
    pub transport_configured: bool,
}

#[derive(ToSchema, Deserialize)]
pub struct LoginSetupRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginSetupResponse {
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Current setup status", body = StatusResponse)
    ),
    tag = "setup"
)]
pub async fn status(setup: Extension<Arc<SetupState>>) -> impl IntoResponse {
    let status = setup.status().await;
    Json(StatusResponse {
        setup_complete: status.is_complete(),
        database_ready: status.database_ready,
        schema_ready: status.schema_ready,
        transport_configured: status.transport_configured,
    })
}

#[utoipa::path(
    post,
    path = "/api/login-setup",
    request_body = LoginSetupRequest,
    responses(
        (status = 200, description = "Operator credentials accepted", body = LoginSetupResponse),
        (status = 400, description = "Missing payload", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Setup already completed", body = ErrorBody)
    ),
    tag = "setup"
)]
#[instrument(skip_all)]
pub async fn login_setup(
    setup: Extension<Arc<SetupState>>,
    payload: Option<Json<LoginSetupRequest>>,
) -> impl IntoResponse {
    if setup.status().await.is_complete() {
        return ApiError::forbidden().into_response();
    }

    let Some(Json(request)) = payload else {
        return ApiError::validation("Missing payload").into_response();
    };

    match setup.check_operator(&request.user, &request.pass) {
        Ok(true) => {
            info!("Setup login accepted");
            (
                StatusCode::OK,
                Json(LoginSetupResponse {
                    status: "success".to_string(),
                }),
            )
                .into_response()
        }
        Ok(false) => {
            warn!("Setup login rejected");
            ApiError::unauthorized().into_response()
        }
        Err(err) => {
            error!("Failed to load operator credentials: {err:#}");
            ApiError::store().into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::tests::read_json;
    use crate::setup::{SetupStatus, tests::state};
    use anyhow::Result;

    fn pending() -> Arc<SetupState> {
        Arc::new(state(SetupStatus {
            database_ready: true,
            schema_ready: true,
            transport_configured: false,
        }))
    }

    fn login(user: &str, pass: &str) -> Option<Json<LoginSetupRequest>> {
        Some(Json(LoginSetupRequest {
            user: user.to_string(),
            pass: pass.to_string(),
        }))
    }

    #[tokio::test]
    async fn status_reflects_transport_flag() -> Result<()> {
        let setup = pending();
        let body = read_json(status(Extension(setup.clone())).await.into_response()).await?;
        assert_eq!(body["setup_complete"], false);
        assert_eq!(body["database_ready"], true);

        setup.set_transport_configured(true).await;
        let body = read_json(status(Extension(setup)).await.into_response()).await?;
        assert_eq!(body["setup_complete"], true);
        assert_eq!(body["transport_configured"], true);
        Ok(())
    }

    #[tokio::test]
    async fn login_checks_credentials() -> Result<()> {
        let setup = pending();

        let response = login_setup(Extension(setup.clone()), login("admin", "nope"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = login_setup(Extension(setup), login("admin", "changeme"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await?;
        assert_eq!(body["status"], "success");
        Ok(())
    }

    #[tokio::test]
    async fn login_is_closed_once_setup_completes() -> Result<()> {
        let setup = pending();
        setup.set_transport_configured(true).await;

        let response = login_setup(Extension(setup), login("admin", "changeme"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }
}
