//! Error types for the API client.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Result type for API client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Shown when the server gave nothing better to say.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";
const NETWORK_ERROR_MESSAGE: &str = "Could not reach the server. Check your connection and try again.";

/// API client errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the credentials (401). Stored credentials have
    /// already been cleared when this is returned.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Any other non-2xx response.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<Value>,
    },

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Credential storage failed
    #[error("Credential store error: {0}")]
    Credentials(String),
}

/// Server error body: `{"error", "message", "details"?}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    details: Option<Value>,
}

impl ApiError {
    /// Build an error from a non-2xx status and the raw response body.
    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorBody>(body).ok();
        let (code, message, details) = match parsed {
            Some(parsed) => (parsed.error, parsed.message.unwrap_or_default(), parsed.details),
            None => (None, body.trim().to_string(), None),
        };

        if status == 401 {
            return Self::Unauthorized { message };
        }
        Self::Api {
            status,
            code,
            message,
            details,
        }
    }

    /// HTTP status, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Api { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Per-field validation messages from a 422 response.
    pub fn field_error(&self, field: &str) -> Option<&str> {
        match self {
            Self::Api {
                details: Some(details),
                ..
            } => details.get(field).and_then(Value::as_str),
            _ => None,
        }
    }

    /// Text for a toast or snackbar: the server's message when it sent one,
    /// a generic fallback otherwise.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized { message } if !message.is_empty() => message.clone(),
            Self::Unauthorized { .. } => SESSION_EXPIRED_MESSAGE.to_string(),
            // Internal error bodies are never worth showing
            Self::Api { status, .. } if *status >= 500 => GENERIC_ERROR_MESSAGE.to_string(),
            Self::Api { message, .. } if !message.is_empty() => message.clone(),
            Self::Network(_) => NETWORK_ERROR_MESSAGE.to_string(),
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}
