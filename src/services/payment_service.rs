use tracing::info;

use crate::{
    dto::payment::{PaymentMethodRefResponse, PaymentMethodView, PaymentSelection, PaymentSelectionInput},
    error::ServiceError,
    services::booking_service::{bounded, bounded_mutation},
    state::{SharedState, session::UserSession},
};

/// Resolve a payment selection into a method reference without booking anything.
///
/// Saving a card goes through the user's single setup intent, which is discarded once confirmed.
pub async fn add_payment_method(
    state: &SharedState,
    session: &UserSession,
    input: PaymentSelectionInput,
) -> Result<PaymentMethodRefResponse, ServiceError> {
    let selection = PaymentSelection::from(input);
    let method = state
        .holds()
        .acquire_payment_method(session.user_id(), &selection)
        .await?;

    info!(user_id = session.user_id(), payment_method_id = %method, "payment method resolved");
    Ok(PaymentMethodRefResponse {
        payment_method_id: method.into_inner(),
    })
}

/// Drop any pending authorization for the session's user. Returns whether one existed.
pub async fn release_authorization(state: &SharedState, session: &UserSession) -> bool {
    state
        .holds()
        .release_pending_authorization(session.user_id())
        .await
}

/// Saved payment methods of the session user.
pub async fn list_payment_methods(
    state: &SharedState,
    session: &UserSession,
) -> Result<Vec<PaymentMethodView>, ServiceError> {
    let methods = bounded(
        session,
        "payment-methods",
        state.backend().payment_methods(session.token()),
    )
    .await?;
    Ok(methods.into_iter().map(Into::into).collect())
}

/// Delete a saved payment method on the backend.
pub async fn remove_payment_method(
    state: &SharedState,
    session: &UserSession,
    method_id: &str,
) -> Result<(), ServiceError> {
    bounded_mutation(
        session,
        "payment-methods",
        state.backend().remove_payment_method(session.token(), method_id),
    )
    .await?;
    info!(user_id = session.user_id(), method_id, "payment method removed");
    Ok(())
}

/// Make a saved payment method the default on the backend.
pub async fn set_default_payment_method(
    state: &SharedState,
    session: &UserSession,
    method_id: &str,
) -> Result<PaymentMethodView, ServiceError> {
    let method = bounded_mutation(
        session,
        "payment-methods/default",
        state
            .backend()
            .set_default_payment_method(session.token(), method_id),
    )
    .await?;
    Ok(method.into())
}
