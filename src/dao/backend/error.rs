//! Error types shared by the booking backend client.

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Convenient result alias returning [`ApiError`] failures.
pub type ApiResult<T> = Result<T, ApiError>;

/// Coarse classification of a backend failure, used for retry and display decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// HTTP 429.
    RateLimited,
    /// HTTP 404.
    NotFound,
    /// Any 5xx status.
    Server,
    /// Any other non-success status.
    Client,
    /// The request never produced a response (DNS, connect, reset).
    Network,
    /// The request did not complete within its time budget.
    Timeout,
    /// The backend answered 2xx but flagged the envelope as unsuccessful.
    Rejected,
    /// The response body did not match the expected shape.
    Decode,
    /// The HTTP client could not be constructed.
    Setup,
}

/// Failure talking to the booking backend, carrying the status code as structured data.
#[derive(Debug, Error)]
#[error("backend call to `{path}` failed ({kind:?}): {message}")]
pub struct ApiError {
    /// Classification of the failure.
    pub kind: ApiErrorKind,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// Backend path that was called.
    pub path: String,
    /// Human-readable message, taken from the error envelope when available.
    pub message: String,
    #[source]
    source: Option<reqwest::Error>,
}

impl ApiError {
    /// Build an error from a non-success HTTP status.
    pub fn from_status(path: impl Into<String>, status: StatusCode, message: impl Into<String>) -> Self {
        let kind = match status {
            StatusCode::TOO_MANY_REQUESTS => ApiErrorKind::RateLimited,
            StatusCode::NOT_FOUND => ApiErrorKind::NotFound,
            status if status.is_server_error() => ApiErrorKind::Server,
            _ => ApiErrorKind::Client,
        };
        Self {
            kind,
            status: Some(status.as_u16()),
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Build an error from a request that could not be sent or completed.
    pub fn send(path: impl Into<String>, source: reqwest::Error) -> Self {
        let kind = if source.is_timeout() {
            ApiErrorKind::Timeout
        } else {
            ApiErrorKind::Network
        };
        Self {
            kind,
            status: source.status().map(|status| status.as_u16()),
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Build an error from a response body that could not be decoded.
    pub fn decode(path: impl Into<String>, source: reqwest::Error) -> Self {
        Self {
            kind: ApiErrorKind::Decode,
            status: None,
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Build an error for an envelope flagged `success: false`.
    pub fn rejected(path: impl Into<String>, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Rejected,
            status: Some(status.as_u16()),
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Build an error for a call that exceeded its deadline.
    pub fn timeout(path: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Timeout,
            status: None,
            path: path.into(),
            message: "request timed out".into(),
            source: None,
        }
    }

    /// Build an error for a client that could not be constructed.
    pub fn setup(source: reqwest::Error) -> Self {
        Self {
            kind: ApiErrorKind::Setup,
            status: None,
            path: String::new(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Whether the failure is an HTTP 429 and may be retried with backoff.
    pub fn is_rate_limited(&self) -> bool {
        self.kind == ApiErrorKind::RateLimited
    }

    /// Whether the failure happened below HTTP (no usable response).
    pub fn is_network(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Network | ApiErrorKind::Timeout)
    }

    /// Copy shown to the end user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self.status {
            Some(500) => "Server error, please try again later.",
            Some(404) => "Service not found.",
            _ if self.is_network() => "Please check your connection and try again.",
            _ => "Failed to load data.",
        }
    }
}
