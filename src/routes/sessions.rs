use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        booking::DinnerView,
        session::{OpenSessionRequest, RefreshRequest, RefreshResponse, SessionResponse},
    },
    error::AppError,
    services::{
        booking_service,
        sync_service::{self, RefreshMode},
    },
    state::SharedState,
};

/// Routes managing the lifecycle of user sessions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(open_session))
        .route("/sessions/{id}", delete(close_session))
        .route("/sessions/{id}/refresh", post(refresh))
        .route("/sessions/{id}/dinners", get(list_dinners))
}

/// Open a session for a signed-in user and load their dinners and bookings.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = OpenSessionRequest,
    responses(
        (status = 200, description = "Session opened", body = SessionResponse),
        (status = 400, description = "Missing credentials")
    )
)]
pub async fn open_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<OpenSessionRequest>>,
) -> Result<Json<SessionResponse>, AppError> {
    let response = booking_service::open_session(&state, payload).await?;
    Ok(Json(response))
}

/// Close a session, stopping its timers and releasing pending authorizations.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn close_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    booking_service::close_session(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Refresh dinners and bookings; `force` bypasses the throttle (pull-to-refresh).
#[utoipa::path(
    post,
    path = "/sessions/{id}/refresh",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Refresh handled", body = RefreshResponse),
        (status = 429, description = "Backend kept rate limiting after every retry"),
        (status = 503, description = "Backend unreachable")
    )
)]
pub async fn refresh(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AppError> {
    let session = state.session(id)?;
    let mode = if payload.force {
        RefreshMode::Forced
    } else {
        RefreshMode::Scheduled
    };
    let outcome = sync_service::refresh_session(&session, mode).await?;
    Ok(Json(RefreshResponse::from(&outcome)))
}

/// Dinners cached by the last successful refresh.
#[utoipa::path(
    get,
    path = "/sessions/{id}/dinners",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Available dinners", body = [DinnerView]))
)]
pub async fn list_dinners(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DinnerView>>, AppError> {
    let session = state.session(id)?;
    Ok(Json(booking_service::list_dinners(&session).await))
}
