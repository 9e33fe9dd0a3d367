//! Error types for the HomeWidget client

use thiserror::Error;

/// Body of a failed API response, kept alongside the status so callers can
/// inspect structured error payloads (e.g. validation details).
#[derive(Debug, Clone)]
pub enum ApiBody {
    Json(serde_json::Value),
    Text(String),
    Empty,
}

impl ApiBody {
    /// Best-effort human-readable message: `detail` or `message` string keys
    /// of a JSON body, otherwise nothing.
    fn detail(&self) -> Option<&str> {
        match self {
            ApiBody::Json(value) => value
                .get("detail")
                .or_else(|| value.get("message"))
                .and_then(|v| v.as_str()),
            _ => None,
        }
    }
}

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Terminal non-2xx response (or unparseable 2xx body) after the
    /// refresh/retry protocol has already run.
    #[error("{message}")]
    Api {
        status: u16,
        body: ApiBody,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Build an `Api` error from a final response status and raw body text.
    ///
    /// The body is parsed as JSON when possible; the message is taken from a
    /// `detail`/`message` string field, falling back to `HTTP <status>`.
    pub fn from_response(status: u16, text: String) -> Self {
        let body = if text.is_empty() {
            ApiBody::Empty
        } else {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(value) => ApiBody::Json(value),
                Err(_) => ApiBody::Text(text),
            }
        };
        let message = body
            .detail()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("HTTP {status}"));
        ClientError::Api {
            status,
            body,
            message,
        }
    }

    /// HTTP status of an `Api` error, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
