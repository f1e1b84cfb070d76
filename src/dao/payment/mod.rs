/// Provider errors.
pub mod error;
/// HTTP implementation of [`PaymentProvider`].
pub mod http;

use std::fmt;

use futures::future::BoxFuture;
use serde::Deserialize;

use crate::dto::payment::CardDetails;

use self::error::ProviderResult;

/// Provider-side handshake used to attach a card for later off-session holds.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetupIntent {
    /// Provider identifier of the intent.
    pub id: String,
    /// Secret used to confirm the intent; never logged.
    pub client_secret: String,
}

impl fmt::Debug for SetupIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupIntent")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Contract this service needs from the payment provider.
pub trait PaymentProvider: Send + Sync {
    /// Open a new setup intent for `user_id`.
    fn create_setup_intent(&self, user_id: &str) -> BoxFuture<'static, ProviderResult<SetupIntent>>;
    /// Confirm a setup intent with card details, returning the resulting payment method id.
    fn confirm_setup_intent(
        &self,
        client_secret: &str,
        card: &CardDetails,
    ) -> BoxFuture<'static, ProviderResult<String>>;
    /// Create a single-use payment method without attaching it to the user.
    fn create_payment_method(&self, card: &CardDetails) -> BoxFuture<'static, ProviderResult<String>>;
}
