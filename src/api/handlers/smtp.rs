//! Operator endpoints for the active mail transport.
//!
//! Every route here requires `Authorization: Basic` with the operator
//! credentials. Saving a transport deactivates all others in the same
//! transaction, so at most one row is ever active.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ErrorBody, ErrorKind};
use crate::mail::{PORT_SUBMISSION, PORT_SUBMISSIONS, SmtpMailer, TransportConfig};
use crate::reset::{normalize_email, valid_email};
use crate::setup::SetupState;
use crate::store::{StoredTransport, TransportStore};

const PASSWORD_MASK: &str = "********";

/// Shared state for the transport endpoints.
pub struct SmtpAdmin {
    store: Arc<dyn TransportStore>,
    mailer: SmtpMailer,
}

impl SmtpAdmin {
    #[must_use]
    pub fn new(store: Arc<dyn TransportStore>, mailer: SmtpMailer) -> Self {
        Self { store, mailer }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportAdminError {
    #[error("Missing {0}")]
    MissingField(&'static str),
    #[error("Invalid from_email")]
    InvalidFromEmail,
    #[error("Unsupported port {0}, use 587 (STARTTLS) or 465 (implicit TLS)")]
    UnsupportedPort(i64),
}

impl From<TransportAdminError> for ApiError {
    fn from(err: TransportAdminError) -> Self {
        Self::validation(err.to_string())
    }
}

#[derive(ToSchema, Deserialize)]
pub struct TransportRequest {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_email: String,
}

impl TransportRequest {
    /// # Errors
    /// Returns the first field that fails validation.
    pub fn into_config(self) -> Result<TransportConfig, TransportAdminError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(TransportAdminError::MissingField("host"));
        }
        if self.username.trim().is_empty() {
            return Err(TransportAdminError::MissingField("username"));
        }
        if self.password.is_empty() {
            return Err(TransportAdminError::MissingField("password"));
        }

        let from_email = self.from_email.trim();
        if from_email.is_empty() {
            return Err(TransportAdminError::MissingField("from_email"));
        }
        if !valid_email(&normalize_email(from_email)) {
            return Err(TransportAdminError::InvalidFromEmail);
        }

        let port = match u16::try_from(self.port) {
            Ok(port @ (PORT_SUBMISSION | PORT_SUBMISSIONS)) => port,
            _ => return Err(TransportAdminError::UnsupportedPort(self.port)),
        };

        Ok(TransportConfig::new(
            host,
            port,
            self.username.trim(),
            SecretString::from(self.password),
            from_email,
        ))
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TransportResponse {
    pub id: i32,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Always masked.
    pub password: String,
    pub from_email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StoredTransport> for TransportResponse {
    fn from(stored: StoredTransport) -> Self {
        Self {
            id: stored.id,
            host: stored.config.host,
            port: stored.config.port,
            username: stored.config.username,
            password: PASSWORD_MASK.to_string(),
            from_email: stored.config.from_email,
            is_active: stored.is_active,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TestResponse {
    pub success: bool,
    pub message: String,
}

/// Check `Authorization: Basic` against the operator credentials.
///
/// # Errors
/// `Unauthorized` for a missing, malformed or wrong header.
pub fn verify_operator(headers: &HeaderMap, setup: &SetupState) -> Result<(), ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::unauthorized)?;

    let encoded = value
        .trim()
        .strip_prefix("Basic ")
        .or_else(|| value.trim().strip_prefix("basic "))
        .ok_or_else(ApiError::unauthorized)?
        .trim();

    let decoded = STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(ApiError::unauthorized)?;

    let (user, pass) = decoded.split_once(':').ok_or_else(ApiError::unauthorized)?;

    match setup.check_operator(user, pass) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApiError::unauthorized()),
        Err(err) => {
            error!("Failed to load operator credentials: {err:#}");
            Err(ApiError::store())
        }
    }
}

fn no_active_transport() -> ApiError {
    ApiError::new(ErrorKind::NotFoundOrExpired, "No active SMTP configuration")
}

#[utoipa::path(
    get,
    path = "/admin/smtp-config",
    responses(
        (status = 200, description = "Active transport, password masked", body = TransportResponse),
        (status = 401, description = "Missing or invalid operator credentials", body = ErrorBody),
        (status = 404, description = "No active transport", body = ErrorBody)
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn get_transport(
    headers: HeaderMap,
    admin: Extension<Arc<SmtpAdmin>>,
    setup: Extension<Arc<SetupState>>,
) -> impl IntoResponse {
    if let Err(err) = verify_operator(&headers, &setup) {
        return err.into_response();
    }

    match admin.store.active_transport().await {
        Ok(Some(stored)) => (StatusCode::OK, Json(TransportResponse::from(stored))).into_response(),
        Ok(None) => no_active_transport().into_response(),
        Err(err) => {
            error!("Failed to load SMTP configuration: {err:#}");
            ApiError::store().into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/admin/smtp-config",
    request_body = TransportRequest,
    responses(
        (status = 200, description = "Transport saved and activated", body = TransportResponse),
        (status = 400, description = "Invalid fields", body = ErrorBody),
        (status = 401, description = "Missing or invalid operator credentials", body = ErrorBody)
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn create_transport(
    headers: HeaderMap,
    admin: Extension<Arc<SmtpAdmin>>,
    setup: Extension<Arc<SetupState>>,
    payload: Option<Json<TransportRequest>>,
) -> impl IntoResponse {
    if let Err(err) = verify_operator(&headers, &setup) {
        return err.into_response();
    }

    let Some(Json(request)) = payload else {
        return ApiError::validation("Missing payload").into_response();
    };

    let config = match request.into_config() {
        Ok(config) => config,
        Err(err) => return ApiError::from(err).into_response(),
    };

    match setup
        .change_transport(admin.store.activate_transport(&config), true)
        .await
    {
        Ok(stored) => {
            info!(host = %stored.config.host, port = stored.config.port, "SMTP configuration activated");
            (StatusCode::OK, Json(TransportResponse::from(stored))).into_response()
        }
        Err(err) => {
            error!("Failed to save SMTP configuration: {err:#}");
            ApiError::store().into_response()
        }
    }
}

#[utoipa::path(
    put,
    path = "/admin/smtp-config",
    request_body = TransportRequest,
    responses(
        (status = 200, description = "Active transport updated", body = TransportResponse),
        (status = 400, description = "Invalid fields", body = ErrorBody),
        (status = 401, description = "Missing or invalid operator credentials", body = ErrorBody),
        (status = 404, description = "No active transport", body = ErrorBody)
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn update_transport(
    headers: HeaderMap,
    admin: Extension<Arc<SmtpAdmin>>,
    setup: Extension<Arc<SetupState>>,
    payload: Option<Json<TransportRequest>>,
) -> impl IntoResponse {
    if let Err(err) = verify_operator(&headers, &setup) {
        return err.into_response();
    }

    let Some(Json(request)) = payload else {
        return ApiError::validation("Missing payload").into_response();
    };

    let config = match request.into_config() {
        Ok(config) => config,
        Err(err) => return ApiError::from(err).into_response(),
    };

    match admin.store.update_active_transport(&config).await {
        Ok(Some(stored)) => {
            info!(host = %stored.config.host, port = stored.config.port, "SMTP configuration updated");
            (StatusCode::OK, Json(TransportResponse::from(stored))).into_response()
        }
        Ok(None) => no_active_transport().into_response(),
        Err(err) => {
            error!("Failed to update SMTP configuration: {err:#}");
            ApiError::store().into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/admin/smtp-config",
    responses(
        (status = 204, description = "All transports deactivated"),
        (status = 401, description = "Missing or invalid operator credentials", body = ErrorBody)
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn delete_transport(
    headers: HeaderMap,
    admin: Extension<Arc<SmtpAdmin>>,
    setup: Extension<Arc<SetupState>>,
) -> impl IntoResponse {
    if let Err(err) = verify_operator(&headers, &setup) {
        return err.into_response();
    }

    match setup
        .change_transport(admin.store.deactivate_transports(), false)
        .await
    {
        Ok(rows) => {
            info!(rows, "SMTP configuration deactivated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("Failed to deactivate SMTP configuration: {err:#}");
            ApiError::store().into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/admin/smtp-config/test",
    request_body = TransportRequest,
    responses(
        (status = 200, description = "Server accepted the connection and sender", body = TestResponse),
        (status = 400, description = "Invalid fields", body = ErrorBody),
        (status = 401, description = "Missing or invalid operator credentials", body = ErrorBody),
        (status = 500, description = "Dialogue failed, tagged with the stage", body = ErrorBody)
    ),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn test_transport(
    headers: HeaderMap,
    admin: Extension<Arc<SmtpAdmin>>,
    setup: Extension<Arc<SetupState>>,
    payload: Option<Json<TransportRequest>>,
) -> impl IntoResponse {
    if let Err(err) = verify_operator(&headers, &setup) {
        return err.into_response();
    }

    let Some(Json(request)) = payload else {
        return ApiError::validation("Missing payload").into_response();
    };

    let config = match request.into_config() {
        Ok(config) => config,
        Err(err) => return ApiError::from(err).into_response(),
    };

    match admin.mailer.test_connection(&config).await {
        Ok(()) => (
            StatusCode::OK,
            Json(TestResponse {
                success: true,
                message: "SMTP connection successful".to_string(),
            }),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
