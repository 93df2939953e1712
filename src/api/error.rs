//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::agenda::ScheduleError;
use crate::core_state::CoreError;
use crate::error::{FieldErrors, ServiceError};
use crate::gateway::GatewayError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Sign-in failed: {0}")]
    LoginFailed(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid input: {0}")]
    Validation(FieldErrors),
    #[error("Confirmation required")]
    ConfirmationRequired,
    #[error("No active organization selected")]
    NoActiveOrganization,
    #[error("{0}")]
    HolidayBlocked(String),
    /// Refused by a business rule; the message is for the user.
    #[error("{0}")]
    Refused(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut fields = None;
        let (status, code, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Authentication required".to_string(),
            ),
            ApiError::LoginFailed(message) => (StatusCode::UNAUTHORIZED, "LOGIN_FAILED", message),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, "FORBIDDEN", message),
            ApiError::RateLimited { retry_after } => {
                let mut response = error_response(
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMITED",
                    format!("Too many attempts. Retry after {retry_after}s"),
                    None,
                );
                if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert("Retry-After", val);
                }
                return response;
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail),
            ApiError::Validation(errors) => {
                let message = errors.to_string();
                fields = Some(errors);
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED", message)
            }
            ApiError::ConfirmationRequired => (
                StatusCode::CONFLICT,
                "CONFIRMATION_REQUIRED",
                "Confirm this action to continue".to_string(),
            ),
            ApiError::NoActiveOrganization => (
                StatusCode::CONFLICT,
                "NO_ACTIVE_ORGANIZATION",
                "No active organization selected".to_string(),
            ),
            ApiError::HolidayBlocked(message) => (StatusCode::CONFLICT, "HOLIDAY_BLOCKED", message),
            ApiError::Refused(message) => (StatusCode::CONFLICT, "REFUSED", message),
            ApiError::Upstream(message) => (StatusCode::BAD_GATEWAY, "UPSTREAM", message),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };
        error_response(status, code, message, fields)
    }
}

fn error_response(
    status: StatusCode,
    code: &'static str,
    message: String,
    fields: Option<FieldErrors>,
) -> Response {
    let body = ErrorBody {
        error: ErrorDetail { code, message, fields },
    };
    (status, Json(body)).into_response()
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotAuthenticated => ApiError::Unauthorized,
            GatewayError::Forbidden(message) => ApiError::Forbidden(message),
            GatewayError::NotFound { entity } => ApiError::NotFound(format!("{entity} not found")),
            GatewayError::Rejected(message) => ApiError::Refused(message),
            GatewayError::Database(e) => ApiError::Internal(e.to_string()),
            other => {
                tracing::warn!(error = %other, "gateway call failed");
                ApiError::Upstream(other.user_message())
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(errors) => ApiError::Validation(errors),
            ServiceError::NotConfirmed => ApiError::ConfirmationRequired,
            ServiceError::Refused(message) => ApiError::Refused(message),
            ServiceError::NoActiveOrganization => ApiError::NoActiveOrganization,
            ServiceError::NoSession => ApiError::Unauthorized,
            ServiceError::Gateway(e) => e.into(),
            ServiceError::Internal(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Validation(errors) => ApiError::Validation(errors),
            ScheduleError::NotConfirmed => ApiError::ConfirmationRequired,
            ScheduleError::NoActiveOrganization => ApiError::NoActiveOrganization,
            ScheduleError::NoSession => ApiError::Unauthorized,
            ScheduleError::Gateway(e) => e.into(),
            ScheduleError::Internal(detail) => ApiError::Internal(detail),
            blocked @ ScheduleError::HolidayBlocked { .. } => {
                ApiError::HolidayBlocked(blocked.user_message())
            }
            ScheduleError::OverrideNotPermitted => {
                ApiError::Forbidden(ScheduleError::OverrideNotPermitted.user_message())
            }
            ScheduleError::OverrideReasonRequired => {
                let mut errors = FieldErrors::new();
                errors.add("override_reason", ScheduleError::OverrideReasonRequired.user_message());
                ApiError::Validation(errors)
            }
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ServiceError::from(err).into()
    }
}

impl From<crate::db::DatabaseError> for ApiError {
    fn from(err: crate::db::DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn unconfirmed_action_is_409() {
        let response = ApiError::from(ServiceError::NotConfirmed).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "CONFIRMATION_REQUIRED");
    }

    #[tokio::test]
    async fn validation_lists_fields() {
        let mut errors = FieldErrors::new();
        errors.add("name", "Name is required");
        let response = ApiError::Validation(errors).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["error"]["fields"]["name"], "Name is required");
    }

    #[tokio::test]
    async fn holiday_block_names_the_holiday() {
        let err = ScheduleError::HolidayBlocked {
            date: chrono::NaiveDate::from_ymd_opt(2025, 11, 15).unwrap(),
            name: "Municipal Holiday".into(),
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "HOLIDAY_BLOCKED");
        assert!(json["error"]["message"].as_str().unwrap().contains("Municipal Holiday"));
    }

    #[tokio::test]
    async fn rate_limited_returns_429_with_retry_after() {
        let response = ApiError::RateLimited { retry_after: 60 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let response = ApiError::from(CoreError::LockPoisoned).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[test]
    fn gateway_errors_map_by_kind() {
        assert!(matches!(ApiError::from(GatewayError::NotAuthenticated), ApiError::Unauthorized));
        assert!(matches!(
            ApiError::from(GatewayError::Rejected("in use".into())),
            ApiError::Refused(m) if m == "in use"
        ));
        assert!(matches!(
            ApiError::from(GatewayError::Http { status: 500, body: r#"{"message":"boom"}"#.into() }),
            ApiError::Upstream(m) if m == "boom"
        ));
        assert!(matches!(
            ApiError::from(GatewayError::NotFound { entity: "plan" }),
            ApiError::NotFound(_)
        ));
    }
}
