//! JSON error responses shared by every handler.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::mail::{MailError, Stage};
use crate::reset::ResetError;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    AccountNotFound,
    NotFoundOrExpired,
    Mismatch,
    Transport,
    Store,
    Unauthorized,
    Forbidden,
}

impl ErrorKind {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::Validation | Self::Mismatch => StatusCode::BAD_REQUEST,
            Self::AccountNotFound | Self::NotFoundOrExpired => StatusCode::NOT_FOUND,
            Self::Transport | Self::Store => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stage: Option<Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    body: ErrorBody,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            body: ErrorBody {
                error: kind,
                message: message.into(),
                stage: None,
            },
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "Unauthorized")
    }

    #[must_use]
    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden, "Setup already completed")
    }

    #[must_use]
    pub fn store() -> Self {
        Self::new(ErrorKind::Store, "Internal server error")
    }

    #[must_use]
    pub fn transport(stage: Option<Stage>) -> Self {
        let message = match stage {
            Some(stage) => format!("Mail delivery failed during {stage}"),
            None => "Mail delivery failed".to_string(),
        };
        let mut err = Self::new(ErrorKind::Transport, message);
        err.body.stage = stage;
        err
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.body.error
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.body.error.status()
    }

    #[must_use]
    pub fn body(&self) -> &ErrorBody {
        &self.body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body)).into_response()
    }
}

// Details stay in the log; the response only carries the kind and the stage.
impl From<MailError> for ApiError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::UnsupportedPort(port) => {
                Self::validation(format!("Unsupported SMTP port {port}, use 587 or 465"))
            }
            MailError::InvalidMessage(detail) => Self::validation(detail),
            MailError::NoActiveTransport => {
                error!("No active mail transport configured");
                Self::transport(None)
            }
            MailError::Store(err) => {
                error!("Failed to load mail transport: {err:#}");
                Self::store()
            }
            other => {
                error!("Mail transport failure: {other}");
                Self::transport(other.stage())
            }
        }
    }
}

impl From<ResetError> for ApiError {
    fn from(err: ResetError) -> Self {
        match err {
            ResetError::Invalid(message) => Self::validation(message),
            ResetError::AccountNotFound => Self::new(ErrorKind::AccountNotFound, "User not found"),
            ResetError::NotFoundOrExpired => {
                Self::new(ErrorKind::NotFoundOrExpired, "Invalid or expired code")
            }
            ResetError::Mismatch => Self::new(ErrorKind::Mismatch, "Invalid email or code"),
            ResetError::Delivery(err) => Self::transport(err.stage()),
            ResetError::Store(err) => {
                error!("Reset store failure: {err:#}");
                Self::store()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(ErrorKind::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Mismatch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::NotFoundOrExpired.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::AccountNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorKind::Transport.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorKind::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn transport_error_carries_stage_but_not_detail() -> Result<()> {
        let err = ApiError::from(ResetError::Delivery(MailError::at(
            Stage::Auth,
            "535 bad password for mailer:hunter2",
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = serde_json::to_value(err.body())?;
        assert_eq!(json["error"], "transport");
        assert_eq!(json["stage"], "auth");
        assert!(!json.to_string().contains("hunter2"));
        Ok(())
    }

    #[test]
    fn stage_is_omitted_when_absent() -> Result<()> {
        let json = serde_json::to_value(ApiError::from(ResetError::Mismatch).body())?;
        assert_eq!(json["error"], "mismatch");
        assert!(json.get("stage").is_none());
        Ok(())
    }

    #[test]
    fn expired_and_unknown_share_one_shape() {
        let err = ApiError::from(ResetError::NotFoundOrExpired);
        assert_eq!(err.kind(), ErrorKind::NotFoundOrExpired);
        assert_eq!(err.body().message, "Invalid or expired code");
    }

    #[test]
    fn unsupported_port_is_a_validation_error() {
        let err = ApiError::from(MailError::UnsupportedPort(25));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
