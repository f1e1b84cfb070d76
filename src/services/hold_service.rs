//! Payment-method acquisition and the booking call that places the hold.
//!
//! A user owns at most one live setup intent. The reuse-or-create check and the confirmation run
//! under one per-user async mutex, so overlapping "add card" attempts queue instead of each
//! opening their own intent.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dao::{
        backend::{AccessToken, BookingBackend, error::ApiError},
        models::{BookingEntity, CreateBookingRequest},
        payment::{
            PaymentProvider, SetupIntent,
            error::{ProviderError, ProviderResult},
        },
    },
    dto::payment::{CardDetails, PaymentSelection},
    error::ServiceError,
};

/// Identifier of a payment method the backend can place a hold against.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PaymentMethodRef(String);

impl PaymentMethodRef {
    /// Provider identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap the provider identifier.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for PaymentMethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PaymentMethodRef").field(&self.0).finish()
    }
}

impl fmt::Display for PaymentMethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type IntentSlot = Arc<Mutex<Option<SetupIntent>>>;

/// Coordinates setup intents with the payment provider and the booking call with the backend.
pub struct HoldCoordinator {
    provider: Arc<dyn PaymentProvider>,
    backend: Arc<dyn BookingBackend>,
    pending: DashMap<String, IntentSlot>,
    call_timeout: Duration,
}

impl HoldCoordinator {
    /// Coordinator bounding every provider and booking call by `call_timeout`.
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        backend: Arc<dyn BookingBackend>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            backend,
            pending: DashMap::new(),
            call_timeout,
        }
    }

    /// Resolve `selection` into a payment method reference.
    ///
    /// Card fields are validated before any provider call. A saved method is returned as-is.
    pub async fn acquire_payment_method(
        &self,
        user_id: &str,
        selection: &PaymentSelection,
    ) -> Result<PaymentMethodRef, ServiceError> {
        match selection {
            PaymentSelection::Saved { method_id } => {
                let method_id = method_id.trim();
                if method_id.is_empty() {
                    return Err(ServiceError::Validation(
                        "Please select a saved payment method".into(),
                    ));
                }
                Ok(PaymentMethodRef(method_id.to_owned()))
            }
            PaymentSelection::NewCard { card, save } => {
                card.validate()?;
                if *save {
                    self.confirm_with_setup_intent(user_id, card).await
                } else {
                    let id = self
                        .bounded("create_payment_method", self.provider.create_payment_method(card))
                        .await?;
                    debug!(user_id, "created one-off payment method");
                    Ok(PaymentMethodRef(id))
                }
            }
        }
    }

    async fn confirm_with_setup_intent(
        &self,
        user_id: &str,
        card: &CardDetails,
    ) -> Result<PaymentMethodRef, ServiceError> {
        let slot = self.slot(user_id);
        let mut pending = slot.lock().await;

        let intent = match pending.as_ref() {
            Some(intent) => {
                info!(user_id, intent_id = %intent.id, "reusing pending setup intent");
                intent.clone()
            }
            None => {
                let intent = self
                    .bounded("create_setup_intent", self.provider.create_setup_intent(user_id))
                    .await?;
                debug!(user_id, intent_id = %intent.id, "created setup intent");
                *pending = Some(intent.clone());
                intent
            }
        };

        let confirmed = self
            .bounded(
                "confirm_setup_intent",
                self.provider.confirm_setup_intent(&intent.client_secret, card),
            )
            .await;

        // Consumed on success, discarded on error.
        *pending = None;
        drop(pending);
        drop(slot);
        self.forget_idle_slot(user_id);

        match confirmed {
            Ok(method_id) => {
                info!(user_id, intent_id = %intent.id, "setup intent confirmed");
                Ok(PaymentMethodRef(method_id))
            }
            Err(err) => {
                warn!(user_id, intent_id = %intent.id, error = %err, "setup intent confirmation failed");
                Err(err.into())
            }
        }
    }

    /// Drop the user's pending setup intent, if any. Safe to call repeatedly.
    pub async fn release_pending_authorization(&self, user_id: &str) -> bool {
        let Some(slot) = self.pending.get(user_id).map(|entry| entry.value().clone()) else {
            return false;
        };

        let released = slot.lock().await.take();
        drop(slot);
        self.forget_idle_slot(user_id);

        if let Some(intent) = &released {
            info!(user_id, intent_id = %intent.id, "released pending setup intent");
        }
        released.is_some()
    }

    /// Whether a setup intent is currently live for `user_id`.
    pub fn has_pending_authorization(&self, user_id: &str) -> bool {
        self.pending.get(user_id).is_some_and(|entry| {
            entry
                .value()
                .try_lock()
                .map(|guard| guard.is_some())
                .unwrap_or(true)
        })
    }

    /// Create the booking and its hold in one backend call.
    pub async fn place_hold_and_book(
        &self,
        auth: &AccessToken,
        dinner_id: &str,
        method: &PaymentMethodRef,
        save: bool,
    ) -> Result<BookingEntity, ServiceError> {
        let request = CreateBookingRequest {
            dinner_id: dinner_id.to_owned(),
            payment_method_id: method.as_str().to_owned(),
            save_payment_method: save,
        };

        let booking = timeout(
            self.call_timeout,
            self.backend.create_booking_with_payment(auth, request),
        )
        .await
        .map_err(|_| ApiError::timeout("create-booking-with-payment"))?
        .map_err(ServiceError::from_mutation)?;

        info!(booking_id = %booking.id, dinner_id, status = ?booking.status, "booking placed with hold");
        Ok(booking)
    }

    fn slot(&self, user_id: &str) -> IntentSlot {
        self.pending
            .entry(user_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Remove the user's entry when nobody else holds it and it is empty.
    fn forget_idle_slot(&self, user_id: &str) {
        self.pending.remove_if(user_id, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|guard| guard.is_none())
        });
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = ProviderResult<T>>,
    ) -> ProviderResult<T> {
        timeout(self.call_timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout { operation })?
    }
}
