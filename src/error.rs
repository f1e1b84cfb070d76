use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::{
        backend::error::{ApiError, ApiErrorKind},
        payment::error::ProviderError,
    },
    state::booking::{AbortError, ApplyError, GuardViolation, PlanError, TransitionError},
};

/// Category of a failure, exposed to clients so they can pick the right copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    GuardViolation,
    RateLimited,
    Network,
    Provider,
    Backend,
    NotFound,
    InvalidState,
    Unexpected,
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input rejected locally before any network call.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A time-window guard is false.
    #[error(transparent)]
    GuardViolation(#[from] GuardViolation),
    /// The backend kept answering 429 after every retry.
    #[error("rate limited by backend")]
    RateLimited(#[source] ApiError),
    /// The backend could not be reached or did not answer in time.
    #[error("network failure")]
    Network(#[source] ApiError),
    /// The backend answered with a non-retryable failure.
    #[error("backend failure")]
    Backend(#[source] ApiError),
    /// The backend refused a mutation and said why.
    #[error("backend rejected the request: {}", .0.message)]
    Rejected(#[source] ApiError),
    /// The payment provider rejected or failed the request.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// Anything else.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ServiceError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::GuardViolation(_) => ErrorKind::GuardViolation,
            ServiceError::RateLimited(_) => ErrorKind::RateLimited,
            ServiceError::Network(_) | ServiceError::Timeout => ErrorKind::Network,
            ServiceError::Backend(_) | ServiceError::Rejected(_) => ErrorKind::Backend,
            ServiceError::Provider(_) => ErrorKind::Provider,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::InvalidState(_) => ErrorKind::InvalidState,
            ServiceError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// HTTP status of the upstream backend response, when there was one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ServiceError::RateLimited(err)
            | ServiceError::Network(err)
            | ServiceError::Backend(err)
            | ServiceError::Rejected(err) => err.status,
            _ => None,
        }
    }

    /// Copy shown to the end user.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::RateLimited(_) => "Too many requests, please wait a moment and try again.".into(),
            ServiceError::Network(err) | ServiceError::Backend(err) => err.user_message().into(),
            ServiceError::Rejected(err) => err.message.clone(),
            ServiceError::Timeout => "Please check your connection and try again.".into(),
            ServiceError::GuardViolation(violation) => format!("Not eligible yet: {}", violation.reason),
            ServiceError::Unexpected(_) => "Something went wrong, please try again.".into(),
            other => other.to_string(),
        }
    }
}

impl ServiceError {
    /// Classify the failure of a call that changes backend state.
    ///
    /// Client errors and `success: false` envelopes keep the backend's message for the user;
    /// everything else gets the same treatment as a failed load.
    pub fn from_mutation(err: ApiError) -> Self {
        match err.kind {
            ApiErrorKind::Client | ApiErrorKind::Rejected if !err.message.trim().is_empty() => {
                ServiceError::Rejected(err)
            }
            _ => err.into(),
        }
    }
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        match err.kind {
            ApiErrorKind::RateLimited => ServiceError::RateLimited(err),
            ApiErrorKind::Network | ApiErrorKind::Timeout => ServiceError::Network(err),
            ApiErrorKind::Setup => ServiceError::Unexpected(err.to_string()),
            _ => ServiceError::Backend(err),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::Validation(describe_validation(&err))
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::GuardViolation(violation) => ServiceError::GuardViolation(violation),
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("a transition is already in progress".into())
            }
            PlanError::Terminal(status) => {
                ServiceError::InvalidState(format!("booking is already {status:?}"))
            }
            PlanError::InvalidTransition(invalid) => ServiceError::InvalidState(invalid.to_string()),
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<TransitionError> for ServiceError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Plan(plan) => plan.into(),
            TransitionError::Apply(apply) => apply.into(),
        }
    }
}

/// Flatten validator output into `field: message` pairs.
fn describe_validation(errors: &ValidationErrors) -> String {
    let mut parts = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                format!("{field}: {message}")
            })
        })
        .collect::<Vec<_>>();
    parts.sort();
    parts.join("; ")
}

/// Application-level error converted to an HTTP response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    status: StatusCode,
    kind: ErrorKind,
    message: String,
    upstream_status: Option<u16>,
}

impl AppError {
    /// Bad request with invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::Validation,
            message: message.into(),
            upstream_status: None,
        }
    }

    /// Requested resource not found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: ErrorKind::NotFound,
            message: message.into(),
            upstream_status: None,
        }
    }

    /// HTTP status the error maps to.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Category carried in the response body.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::GuardViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Network(_) | ServiceError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Backend(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Rejected(_) => StatusCode::CONFLICT,
            ServiceError::Provider(_) => StatusCode::PAYMENT_REQUIRED,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidState(_) => StatusCode::CONFLICT,
            ServiceError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            kind: err.kind(),
            message: err.user_message(),
            upstream_status: err.upstream_status(),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::from(err).into()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ErrorBody {
            kind: self.kind,
            message: self.message,
            upstream_status: self.upstream_status,
        });

        (self.status, payload).into_response()
    }
}
