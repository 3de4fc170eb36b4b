//! REST error types and error-body parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// RFC7807 Problem Details (application/problem+json)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type", default)]
    pub type_url: String,
    pub title: String,
    #[serde(default)]
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Pull a user-facing message out of an error response body.
///
/// The backend answers with FastAPI's `{"detail": "..."}` (where `detail` may
/// also be a validation-error list); RFC7807 bodies are accepted too.
/// Prefers `detail`, falls back to `title`.
pub fn try_error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;

    match value.get("detail") {
        Some(Value::String(detail)) if !detail.trim().is_empty() => {
            return Some(detail.clone());
        }
        Some(Value::Array(items)) => {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if !msgs.is_empty() {
                return Some(msgs.join("; "));
            }
        }
        _ => {}
    }

    let parsed = serde_json::from_value::<ProblemDetails>(value).ok()?;
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    Network(String),
    /// 401/403: the bearer token is missing, expired or lacks permission.
    Unauthorized { status: u16, detail: Option<String> },
    Http { status: u16, body: String },
    Deserialize(String),
}

impl ApiError {
    /// Classify a non-success response.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 401 || status == 403 {
            ApiError::Unauthorized {
                status,
                detail: try_error_detail(&body),
            }
        } else {
            ApiError::Http { status, body }
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Network(msg) => write!(f, "Network error: {}", msg),
            ApiError::Unauthorized { status, detail } => match detail {
                Some(detail) => write!(f, "Authentication required (HTTP {}): {}", status, detail),
                None => write!(f, "Authentication required (HTTP {})", status),
            },
            ApiError::Http { status, body } => match try_error_detail(body) {
                Some(detail) => write!(f, "HTTP {}: {}", status, detail),
                None => write!(f, "HTTP {}: {}", status, body),
            },
            ApiError::Deserialize(msg) => write!(f, "Deserialization error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}
