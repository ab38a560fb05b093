use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - session may be expired")]
    Unauthorized,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Validation(String),

    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Background request failed: {0}")]
    TaskFailed(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Postgres error code for a row-level-security / privilege violation.
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

/// PostgREST error code for "no rows returned" on a single-row request.
const PGRST_NO_ROWS: &str = "PGRST116";

/// Error body returned by the REST and RPC surfaces.
#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        // Policy denials and empty single-row selects carry a code in the body
        // that is more precise than the status.
        if let Ok(parsed) = serde_json::from_str::<BackendErrorBody>(body) {
            let message = parsed
                .message
                .clone()
                .unwrap_or_else(|| Self::truncate_body(body));
            match parsed.code.as_deref() {
                Some(PG_INSUFFICIENT_PRIVILEGE) => return ApiError::AccessDenied(message),
                Some(PGRST_NO_ROWS) => return ApiError::NotFound(message),
                _ => {}
            }
        }

        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Owned error from one handed out by a shared request. The last holder
    /// gets the original; others get an equivalent with the same message.
    pub fn from_shared(shared: std::sync::Arc<ApiError>) -> Self {
        match std::sync::Arc::try_unwrap(shared) {
            Ok(e) => e,
            Err(shared) => match &*shared {
                ApiError::AccessDenied(m) => ApiError::AccessDenied(m.clone()),
                ApiError::Unauthorized => ApiError::Unauthorized,
                ApiError::NotAuthenticated => ApiError::NotAuthenticated,
                ApiError::NotFound(m) => ApiError::NotFound(m.clone()),
                ApiError::RateLimited => ApiError::RateLimited,
                ApiError::ServerError(m) => ApiError::ServerError(m.clone()),
                ApiError::NetworkError(e) => ApiError::TaskFailed(format!("Network error: {}", e)),
                ApiError::InvalidResponse(m) => ApiError::InvalidResponse(m.clone()),
                ApiError::Validation(m) => ApiError::Validation(m.clone()),
                ApiError::Timeout(d) => ApiError::Timeout(*d),
                ApiError::TaskFailed(m) => ApiError::TaskFailed(m.clone()),
            },
        }
    }

    /// Whether the backend refused the request on policy grounds, or reported
    /// the row as absent, which policies make indistinguishable.
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, ApiError::AccessDenied(_) | ApiError::NotFound(_))
    }
}
