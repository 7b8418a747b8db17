use axum::{Json, http::StatusCode, response::IntoResponse};
use questline_domain::error::DomainError;
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),
    #[error("Invalid quest type: {0}")]
    InvalidQuestType(String),
    #[error("You have already completed this quest.")]
    AlreadyCompleted,
    #[error("You have already submitted this quest and it is pending approval.")]
    AlreadyPending,
    #[error("Another submission for this quest is still being processed. Please try again.")]
    AdmissionBusy,
    #[error("Request timed out")]
    RequestTimeout,
    #[error("Too many requests")]
    RateLimited,
    #[error("{0}")]
    Store(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_)
            | ApiError::MissingRequiredFields(_)
            | ApiError::InvalidQuestType(_)
            | ApiError::AlreadyCompleted
            | ApiError::AlreadyPending => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::AdmissionBusy => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::MethodNotAllowed => "method_not_allowed",
            ApiError::MissingRequiredFields(_) => "missing_required_fields",
            ApiError::InvalidQuestType(_) => "invalid_quest_type",
            ApiError::AlreadyCompleted => "already_completed",
            ApiError::AlreadyPending => "already_pending",
            ApiError::AdmissionBusy => "admission_busy",
            ApiError::RequestTimeout => "request_timeout",
            ApiError::RateLimited => "rate_limited",
            ApiError::Store(_) => "store_error",
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidQuestType(value) => ApiError::InvalidQuestType(value),
            DomainError::MissingRequiredFields(fields) => ApiError::MissingRequiredFields(fields),
            DomainError::AlreadyCompleted => ApiError::AlreadyCompleted,
            DomainError::AlreadyPending => ApiError::AlreadyPending,
            DomainError::AdmissionBusy => ApiError::AdmissionBusy,
            DomainError::Store(message) => ApiError::Store(message),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        let mut fields = err
            .errors()
            .keys()
            .map(|field| field.to_string())
            .collect::<Vec<_>>();
        if fields.is_empty() {
            return ApiError::InvalidRequest(err.to_string());
        }
        fields.sort();
        ApiError::InvalidRequest(format!("invalid fields: {}", fields.join(", ")))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.error_code(),
        };
        (status, Json(body)).into_response()
    }
}
