use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::cookies::CookieError;
use crate::error::ErrorCode;
use crate::providers::DispatchError;
use crate::template::TemplateError;
use crate::validation::ValidationError;

/// Structured API error. Converts into the standard JSON error body with the
/// mapped HTTP status; a Retry-After header is attached for rate limiting.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
    pub retry_after_secs: Option<u64>,
    status_override: Option<StatusCode>,
}

/// Error body shared by every failing response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retry_after_secs: None,
            status_override: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    /// Override the status derived from the error code. Used by the admin
    /// reload endpoint, where an invalid new credential is a client error.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status_override = Some(status);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status_override.unwrap_or_else(|| self.code.status())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = ErrorBody {
            error_code: self.code,
            message: self.message,
            details: self.details,
            timestamp: Utc::now().to_rfc3339(),
            request_id: format!("req-{}", Uuid::new_v4()),
            suggestion: self.code.suggestion(),
        };

        tracing::warn!(
            error_code = self.code.as_str(),
            status = status.as_u16(),
            request_id = %body.request_id,
            "api_error"
        );

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        let code = match error {
            ValidationError::EmptyUrl
            | ValidationError::DangerousScheme(_)
            | ValidationError::UnsupportedScheme
            | ValidationError::MissingDomain
            | ValidationError::DomainNotAllowed(_) => ErrorCode::InvalidUrl,
            _ => ErrorCode::InvalidFormat,
        };
        ApiError::new(code, error.to_string())
    }
}

impl From<TemplateError> for ApiError {
    fn from(error: TemplateError) -> Self {
        ApiError::new(ErrorCode::InvalidFormat, error.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(error: DispatchError) -> Self {
        let code = match error {
            DispatchError::NoProvider(_) => ErrorCode::InvalidUrl,
            DispatchError::ProviderDisabled(_) => ErrorCode::ComponentUnavailable,
        };
        ApiError::new(code, error.to_string())
    }
}

impl From<CookieError> for ApiError {
    fn from(error: CookieError) -> Self {
        let code = match error {
            CookieError::NotConfigured(_) | CookieError::FileMissing(_) => ErrorCode::MissingCookie,
            // A filesystem fault is a local resource problem, not a verdict
            // on the credential itself.
            CookieError::Io(_) => ErrorCode::ComponentUnavailable,
            _ => ErrorCode::CookieExpired,
        };
        ApiError::new(code, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_client_codes() {
        let err: ApiError = ValidationError::DomainNotAllowed("evil.com".to_string()).into();
        assert_eq!(err.code, ErrorCode::InvalidUrl);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = ValidationError::FormatIdInvalidChars.into();
        assert_eq!(err.code, ErrorCode::InvalidFormat);
    }

    #[test]
    fn template_errors_are_bad_requests() {
        let err: ApiError = TemplateError::Traversal.into();
        assert_eq!(err.code, ErrorCode::InvalidFormat);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn dispatch_errors_split_between_400_and_503() {
        let err: ApiError = DispatchError::NoProvider("u".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = DispatchError::ProviderDisabled("youtube".to_string()).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn status_override_wins() {
        let err = ApiError::new(ErrorCode::CookieExpired, "invalid jar")
            .with_status(StatusCode::BAD_REQUEST);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
