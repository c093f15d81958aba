//! Public reset endpoints: issue, verify and consume a code.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ErrorBody};
use crate::reset::ResetWorkflow;

#[derive(ToSchema, Deserialize, Debug)]
pub struct SendCodeRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct VerifyCodeRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
}

#[derive(ToSchema, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
    #[serde(rename = "newPassword", default)]
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

fn message(text: &str) -> Response {
    (
        StatusCode::OK,
        Json(MessageResponse {
            message: text.to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/send-code",
    request_body = SendCodeRequest,
    responses(
        (status = 200, description = "Code issued and mailed", body = MessageResponse),
        (status = 400, description = "Missing or malformed email", body = ErrorBody),
        (status = 404, description = "No account for this email", body = ErrorBody),
        (status = 500, description = "Mail transport or store failure", body = ErrorBody)
    ),
    tag = "reset"
)]
#[instrument(skip_all)]
pub async fn send_code(
    workflow: Extension<Arc<ResetWorkflow>>,
    payload: Option<Json<SendCodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::validation("Missing payload").into_response();
    };

    match workflow.issue(&request.email).await {
        Ok(_) => message("Code sent"),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/verify-code",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Code is valid for this email", body = MessageResponse),
        (status = 400, description = "Missing fields or email/code mismatch", body = ErrorBody),
        (status = 404, description = "Invalid or expired code", body = ErrorBody)
    ),
    tag = "reset"
)]
#[instrument(skip_all)]
pub async fn verify_code(
    workflow: Extension<Arc<ResetWorkflow>>,
    payload: Option<Json<VerifyCodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::validation("Missing payload").into_response();
    };

    match workflow.verify(&request.email, &request.code).await {
        Ok(_) => message("Code verified"),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Missing fields or email/code mismatch", body = ErrorBody),
        (status = 404, description = "Invalid or expired code", body = ErrorBody),
        (status = 500, description = "Store failure", body = ErrorBody)
    ),
    tag = "reset"
)]
#[instrument(skip_all)]
pub async fn reset_password(
    workflow: Extension<Arc<ResetWorkflow>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return ApiError::validation("Missing payload").into_response();
    };

    match workflow
        .consume(&request.email, &request.code, &request.new_password)
        .await
    {
        Ok(()) => message("Password updated"),
        Err(err) => ApiError::from(err).into_response(),
    }
}
