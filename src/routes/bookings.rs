use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::booking::{BookingView, CountdownResponse, GroupMemberView, ReserveRequest},
    error::AppError,
    services::booking_service,
    state::SharedState,
};

/// Routes for reservations and booking transitions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{id}/bookings", get(list_bookings).post(reserve))
        .route("/sessions/{id}/bookings/{booking_id}/countdown", get(countdown))
        .route("/sessions/{id}/bookings/{booking_id}/check-in", post(check_in))
        .route("/sessions/{id}/bookings/{booking_id}/cancel", post(cancel))
        .route("/sessions/{id}/bookings/{booking_id}/sync", post(sync))
        .route("/sessions/{id}/bookings/{booking_id}/group", get(group))
}

/// Bookings of the session user with their countdowns and available actions.
#[utoipa::path(
    get,
    path = "/sessions/{id}/bookings",
    tag = "bookings",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Tracked bookings", body = [BookingView]))
)]
pub async fn list_bookings(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    let session = state.session(id)?;
    Ok(Json(booking_service::list_bookings(&session).await))
}

/// Reserve a seat, placing the payment hold in the same backend call.
#[utoipa::path(
    post,
    path = "/sessions/{id}/bookings",
    tag = "bookings",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = ReserveRequest,
    responses(
        (status = 200, description = "Booking placed", body = BookingView),
        (status = 400, description = "Invalid payment details"),
        (status = 402, description = "Payment provider declined"),
        (status = 409, description = "Dinner unavailable or booking refused by the backend")
    )
)]
pub async fn reserve(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ReserveRequest>>,
) -> Result<Json<BookingView>, AppError> {
    let session = state.session(id)?;
    let view = booking_service::reserve(&state, &session, payload).await?;
    Ok(Json(view))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/bookings/{booking_id}/countdown",
    tag = "bookings",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("booking_id" = String, Path, description = "Booking identifier")
    ),
    responses((status = 200, description = "Current countdown", body = CountdownResponse))
)]
/// Countdown of one booking at the current instant.
pub async fn countdown(
    State(state): State<SharedState>,
    Path((id, booking_id)): Path<(Uuid, String)>,
) -> Result<Json<CountdownResponse>, AppError> {
    let session = state.session(id)?;
    Ok(Json(booking_service::countdown(&session, &booking_id).await?))
}

/// Check in to an assigned booking; only allowed during the first 90 minutes of the dinner.
#[utoipa::path(
    post,
    path = "/sessions/{id}/bookings/{booking_id}/check-in",
    tag = "bookings",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("booking_id" = String, Path, description = "Booking identifier")
    ),
    responses(
        (status = 200, description = "Checked in", body = BookingView),
        (status = 409, description = "Booking not assigned, or check-in refused by the backend"),
        (status = 422, description = "Outside the check-in window")
    )
)]
pub async fn check_in(
    State(state): State<SharedState>,
    Path((id, booking_id)): Path<(Uuid, String)>,
) -> Result<Json<BookingView>, AppError> {
    let session = state.session(id)?;
    Ok(Json(booking_service::check_in(&state, &session, &booking_id).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/bookings/{booking_id}/cancel",
    tag = "bookings",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("booking_id" = String, Path, description = "Booking identifier")
    ),
    responses(
        (status = 200, description = "Booking cancelled", body = BookingView),
        (status = 409, description = "Booking can no longer be cancelled, or cancellation refused by the backend")
    )
)]
/// Cancel a pending or assigned booking.
pub async fn cancel(
    State(state): State<SharedState>,
    Path((id, booking_id)): Path<(Uuid, String)>,
) -> Result<Json<BookingView>, AppError> {
    let session = state.session(id)?;
    Ok(Json(
        booking_service::cancel_booking(&state, &session, &booking_id).await?,
    ))
}

/// Re-read one booking from the backend, e.g. after a push notification referencing it.
#[utoipa::path(
    post,
    path = "/sessions/{id}/bookings/{booking_id}/sync",
    tag = "bookings",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("booking_id" = String, Path, description = "Booking identifier")
    ),
    responses((status = 200, description = "Booking reconciled", body = BookingView))
)]
pub async fn sync(
    State(state): State<SharedState>,
    Path((id, booking_id)): Path<(Uuid, String)>,
) -> Result<Json<BookingView>, AppError> {
    let session = state.session(id)?;
    Ok(Json(
        booking_service::sync_booking(&state, &session, &booking_id).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/bookings/{booking_id}/group",
    tag = "bookings",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("booking_id" = String, Path, description = "Booking identifier")
    ),
    responses(
        (status = 200, description = "Group members", body = [GroupMemberView]),
        (status = 409, description = "Booking not matched to a group yet")
    )
)]
/// Members of the group a booking was matched to.
pub async fn group(
    State(state): State<SharedState>,
    Path((id, booking_id)): Path<(Uuid, String)>,
) -> Result<Json<Vec<GroupMemberView>>, AppError> {
    let session = state.session(id)?;
    Ok(Json(
        booking_service::group_members(&state, &session, &booking_id).await?,
    ))
}
