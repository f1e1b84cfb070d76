use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::services::sync_service::RefreshOutcome;

/// Request body to open a session for a signed-in user.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OpenSessionRequest {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    /// Bearer token forwarded to the booking backend.
    #[validate(length(min = 1, message = "access_token is required"))]
    pub access_token: String,
}

/// Identifier of a newly opened session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub user_id: String,
}

/// Request body of the refresh endpoint.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefreshRequest {
    /// Pull-to-refresh: bypass the throttle and cancel a pending retry.
    #[serde(default)]
    pub force: bool,
}

/// How a refresh request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Refreshed,
    Throttled,
    AlreadyInFlight,
    Superseded,
}

/// Result of a refresh request.
#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub status: RefreshStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dinners: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookings: Option<usize>,
    /// Bookings could not be fetched; the previous list was kept.
    pub bookings_degraded: bool,
}

impl From<&RefreshOutcome> for RefreshResponse {
    fn from(outcome: &RefreshOutcome) -> Self {
        let status = match outcome {
            RefreshOutcome::Refreshed(_) => RefreshStatus::Refreshed,
            RefreshOutcome::Throttled => RefreshStatus::Throttled,
            RefreshOutcome::AlreadyInFlight => RefreshStatus::AlreadyInFlight,
            RefreshOutcome::Superseded => RefreshStatus::Superseded,
        };
        match outcome {
            RefreshOutcome::Refreshed(snapshot) => Self {
                status,
                dinners: Some(snapshot.dinners.len()),
                bookings: (!snapshot.bookings_degraded).then_some(snapshot.bookings.len()),
                bookings_degraded: snapshot.bookings_degraded,
            },
            _ => Self {
                status,
                dinners: None,
                bookings: None,
                bookings_degraded: false,
            },
        }
    }
}
