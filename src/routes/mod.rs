use axum::Router;

use crate::state::SharedState;

/// Reservation and booking transition endpoints.
pub mod bookings;
/// Swagger UI and OpenAPI document.
pub mod docs;
/// Liveness endpoint.
pub mod health;
/// Payment method endpoints.
pub mod payment;
/// Session lifecycle endpoints.
pub mod sessions;
/// Server-Sent Events endpoint.
pub mod sse;

/// Compose all route trees and bind the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(sessions::router())
        .merge(bookings::router())
        .merge(payment::router())
        .merge(sse::router())
        .merge(docs::router())
        .with_state(state)
}
