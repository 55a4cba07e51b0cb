//! Machine-readable error codes shared by the API surface and the worker.
//!
//! Each code carries its HTTP status mapping and a default suggestion string
//! for the error body.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidUrl,
    InvalidFormat,
    FormatNotFound,
    FileTooLarge,
    AuthFailed,
    JobNotFound,
    RateLimitExceeded,
    VideoUnavailable,
    DownloadFailed,
    TranscodingFailed,
    MissingCookie,
    CookieExpired,
    StorageFull,
    QueueFull,
    ComponentUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::FormatNotFound => "FORMAT_NOT_FOUND",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::VideoUnavailable => "VIDEO_UNAVAILABLE",
            ErrorCode::DownloadFailed => "DOWNLOAD_FAILED",
            ErrorCode::TranscodingFailed => "TRANSCODING_FAILED",
            ErrorCode::MissingCookie => "MISSING_COOKIE",
            ErrorCode::CookieExpired => "COOKIE_EXPIRED",
            ErrorCode::StorageFull => "STORAGE_FULL",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::ComponentUnavailable => "COMPONENT_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidUrl
            | ErrorCode::InvalidFormat
            | ErrorCode::FormatNotFound
            | ErrorCode::FileTooLarge => StatusCode::BAD_REQUEST,
            ErrorCode::AuthFailed => StatusCode::UNAUTHORIZED,
            ErrorCode::JobNotFound | ErrorCode::VideoUnavailable => StatusCode::NOT_FOUND,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::DownloadFailed
            | ErrorCode::TranscodingFailed
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::MissingCookie
            | ErrorCode::CookieExpired
            | ErrorCode::StorageFull
            | ErrorCode::QueueFull
            | ErrorCode::ComponentUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ErrorCode::InvalidUrl => Some(
                "Verify the URL format and ensure it's from a supported domain \
                 (youtube.com, youtu.be)",
            ),
            ErrorCode::InvalidFormat => {
                Some("Check the format ID is valid (e.g., '22', '140', 'bestvideo+bestaudio')")
            }
            ErrorCode::FormatNotFound => Some(
                "The requested format is not available. Use GET /api/v1/formats \
                 to list available formats",
            ),
            ErrorCode::FileTooLarge => {
                Some("The file exceeds the maximum allowed size. Try a lower quality format")
            }
            ErrorCode::AuthFailed => Some("Provide a valid API key in the X-API-Key header"),
            ErrorCode::JobNotFound => {
                Some("The job ID does not exist or has expired (TTL: 24 hours)")
            }
            ErrorCode::RateLimitExceeded => {
                Some("Wait for the Retry-After period before making more requests")
            }
            ErrorCode::VideoUnavailable => {
                Some("The video may be private, deleted, age-restricted, or geo-blocked")
            }
            ErrorCode::DownloadFailed => {
                Some("The download operation failed. Check server logs for details")
            }
            ErrorCode::TranscodingFailed => {
                Some("Audio conversion failed. Try a different audio format")
            }
            ErrorCode::MissingCookie => {
                Some("Cookie file not found. Contact administrator to configure authentication")
            }
            ErrorCode::CookieExpired => Some(
                "Cookie authentication failed. Refresh the cookie file and use \
                 POST /api/v1/admin/reload-cookie",
            ),
            ErrorCode::StorageFull => {
                Some("Insufficient disk space. Contact administrator to free up storage")
            }
            ErrorCode::QueueFull => Some("Download queue is at capacity. Try again later"),
            ErrorCode::ComponentUnavailable => {
                Some("A required system component is unavailable. Check /health for status")
            }
            ErrorCode::InternalError => {
                Some("An unexpected error occurred. Contact administrator if the issue persists")
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
