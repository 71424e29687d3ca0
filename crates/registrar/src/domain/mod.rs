pub mod card;
pub mod checkin;
pub mod credential;
pub mod events;
pub mod identity;
pub mod otp;
pub mod pending;
pub mod registration;

use axum::{http::StatusCode, response::IntoResponse, Json};
use registrar_core::CoreError;
use serde::Serialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

/// Behavioral error taxonomy (spec.md §7). Transport-specific mapping lives
/// only here, at the boundary the API layer calls into — stores and
/// orchestrators never construct an HTTP status themselves.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed")]
    Validation(Vec<registrar_core::FieldViolation>),

    #[error("a team is already registered with this email")]
    EmailAlreadyRegistered,

    #[error("the pending registration for this email has expired or was already used")]
    RegistrationExpired,

    #[error("the submitted code does not match")]
    OtpInvalid,

    #[error("no live one-time code for this email")]
    OtpExpired,

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("already checked in")]
    AlreadyCheckedIn { check_in_time: OffsetDateTime },

    #[error("invalid scan payload: {0}")]
    InvalidPayload(String),

    #[error("mailer not configured: {0}")]
    Unconfigured(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl From<CoreError> for Error {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::Validation(v) => Error::Validation(v),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<registrar_core::FieldViolation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check_in_time: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let correlation_id = Uuid::now_v7().to_string();

        // Stack traces and internal detail never reach the client (spec.md
        // §7); only the taxonomy tag, a short message, and the correlation
        // id used to find the full log line do.
        let (status, tag, message, extra): (StatusCode, &'static str, String, Value) = match &self
        {
            Error::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                "ValidationError",
                "one or more fields failed validation".into(),
                json!({ "fields": fields }),
            ),
            Error::EmailAlreadyRegistered => (
                StatusCode::CONFLICT,
                "EmailAlreadyRegistered",
                self.to_string(),
                Value::Null,
            ),
            Error::RegistrationExpired => (
                StatusCode::GONE,
                "RegistrationExpired",
                self.to_string(),
                Value::Null,
            ),
            Error::OtpInvalid => (
                StatusCode::BAD_REQUEST,
                "OTPInvalid",
                self.to_string(),
                Value::Null,
            ),
            Error::OtpExpired => (
                StatusCode::GONE,
                "OTPExpired",
                self.to_string(),
                Value::Null,
            ),
            Error::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimited",
                self.to_string(),
                json!({ "retry_after_secs": retry_after_secs }),
            ),
            Error::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                self.to_string(),
                Value::Null,
            ),
            Error::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                self.to_string(),
                Value::Null,
            ),
            Error::AlreadyCheckedIn { check_in_time } => (
                StatusCode::BAD_REQUEST,
                "AlreadyCheckedIn",
                self.to_string(),
                json!({ "check_in_time": check_in_time.format(&time::format_description::well_known::Rfc3339).unwrap_or_default() }),
            ),
            Error::InvalidPayload(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidPayload",
                self.to_string(),
                Value::Null,
            ),
            Error::Unconfigured(_) => {
                log::error!(target: "operator", "mailer unconfigured: {self}, correlation_id={correlation_id}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Unconfigured",
                    "the server is misconfigured".into(),
                    Value::Null,
                )
            }
            Error::Internal(_) | Error::Db(_) => {
                log::error!("{self}, correlation_id={correlation_id}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal",
                    "an internal error occurred".into(),
                    Value::Null,
                )
            }
        };

        let fields = extra
            .get("fields")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let retry_after_secs = extra.get("retry_after_secs").and_then(|v| v.as_u64());
        let check_in_time = extra
            .get("check_in_time")
            .and_then(|v| v.as_str())
            .map(String::from);

        let body = ErrorBody {
            error: tag,
            message,
            correlation_id,
            fields,
            retry_after_secs,
            check_in_time,
        };

        (status, Json(body)).into_response()
    }
}
