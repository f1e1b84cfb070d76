use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use uuid::Uuid;

use crate::{
    dto::payment::{PaymentMethodRefResponse, PaymentMethodView, PaymentSelectionInput},
    error::AppError,
    services::payment_service,
    state::SharedState,
};

/// Routes for saved payment methods and pending authorizations.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/sessions/{id}/payment-methods",
            get(list_payment_methods).post(add_payment_method),
        )
        .route(
            "/sessions/{id}/payment-methods/{method_id}",
            delete(remove_payment_method),
        )
        .route(
            "/sessions/{id}/payment-methods/{method_id}/default",
            post(set_default_payment_method),
        )
        .route(
            "/sessions/{id}/payment-authorization",
            delete(release_authorization),
        )
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/payment-methods",
    tag = "payment",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Saved payment methods", body = [PaymentMethodView]))
)]
/// Saved payment methods of the session user.
pub async fn list_payment_methods(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PaymentMethodView>>, AppError> {
    let session = state.session(id)?;
    Ok(Json(
        payment_service::list_payment_methods(&state, &session).await?,
    ))
}

/// Validate card details and resolve them into a payment method reference.
#[utoipa::path(
    post,
    path = "/sessions/{id}/payment-methods",
    tag = "payment",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = PaymentSelectionInput,
    responses(
        (status = 200, description = "Payment method resolved", body = PaymentMethodRefResponse),
        (status = 400, description = "Incomplete card details"),
        (status = 402, description = "Card declined by the payment provider")
    )
)]
pub async fn add_payment_method(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentSelectionInput>,
) -> Result<Json<PaymentMethodRefResponse>, AppError> {
    let session = state.session(id)?;
    Ok(Json(
        payment_service::add_payment_method(&state, &session, payload).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}/payment-methods/{method_id}",
    tag = "payment",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("method_id" = String, Path, description = "Saved payment method identifier")
    ),
    responses((status = 204, description = "Payment method removed"))
)]
/// Delete a saved payment method.
pub async fn remove_payment_method(
    State(state): State<SharedState>,
    Path((id, method_id)): Path<(Uuid, String)>,
) -> Result<StatusCode, AppError> {
    let session = state.session(id)?;
    payment_service::remove_payment_method(&state, &session, &method_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/payment-methods/{method_id}/default",
    tag = "payment",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("method_id" = String, Path, description = "Saved payment method identifier")
    ),
    responses((status = 200, description = "Default payment method updated", body = PaymentMethodView))
)]
/// Make a saved payment method the default.
pub async fn set_default_payment_method(
    State(state): State<SharedState>,
    Path((id, method_id)): Path<(Uuid, String)>,
) -> Result<Json<PaymentMethodView>, AppError> {
    let session = state.session(id)?;
    Ok(Json(
        payment_service::set_default_payment_method(&state, &session, &method_id).await?,
    ))
}

/// Discard the user's pending setup intent, if any. Idempotent.
#[utoipa::path(
    delete,
    path = "/sessions/{id}/payment-authorization",
    tag = "payment",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 204, description = "No authorization pending anymore"))
)]
pub async fn release_authorization(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let session = state.session(id)?;
    payment_service::release_authorization(&state, &session).await;
    Ok(StatusCode::NO_CONTENT)
}
