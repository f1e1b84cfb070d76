/// Connection settings.
pub mod config;
/// Transport and envelope errors.
pub mod error;
/// HTTP implementation of [`BookingBackend`].
pub mod http;

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;

use crate::dao::models::{
    BookingEntity, CreateBookingRequest, DinnerEntity, GroupMemberEntity, PaymentMethodEntity,
};

use self::error::ApiResult;

/// Bearer credential of the user a backend call is made for.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(Arc<str>);

impl AccessToken {
    /// Wrap a raw bearer token.
    pub fn new(token: impl AsRef<str>) -> Self {
        Self(Arc::from(token.as_ref()))
    }

    /// Borrow the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Abstraction over the server that owns dinners, bookings and saved payment methods.
pub trait BookingBackend: Send + Sync {
    /// Dinners open for signup.
    fn available_dinners(&self, auth: &AccessToken) -> BoxFuture<'static, ApiResult<Vec<DinnerEntity>>>;
    /// Bookings of the user behind `auth`.
    fn my_signups(&self, auth: &AccessToken) -> BoxFuture<'static, ApiResult<Vec<BookingEntity>>>;
    /// Book a seat and place the payment hold in one call.
    fn create_booking_with_payment(
        &self,
        auth: &AccessToken,
        request: CreateBookingRequest,
    ) -> BoxFuture<'static, ApiResult<BookingEntity>>;
    /// Record that the user checked in.
    fn mark_attended(&self, auth: &AccessToken, booking_id: &str) -> BoxFuture<'static, ApiResult<BookingEntity>>;
    /// Cancel a booking.
    fn cancel_booking(&self, auth: &AccessToken, booking_id: &str) -> BoxFuture<'static, ApiResult<BookingEntity>>;
    /// Fetch one booking.
    fn booking(&self, auth: &AccessToken, booking_id: &str) -> BoxFuture<'static, ApiResult<BookingEntity>>;
    /// Members of a matched group.
    fn group_members(
        &self,
        auth: &AccessToken,
        group_id: &str,
    ) -> BoxFuture<'static, ApiResult<Vec<GroupMemberEntity>>>;
    /// Saved payment methods of the user.
    fn payment_methods(&self, auth: &AccessToken) -> BoxFuture<'static, ApiResult<Vec<PaymentMethodEntity>>>;
    /// Delete a saved payment method.
    fn remove_payment_method(&self, auth: &AccessToken, method_id: &str) -> BoxFuture<'static, ApiResult<()>>;
    /// Make a saved payment method the default.
    fn set_default_payment_method(
        &self,
        auth: &AccessToken,
        method_id: &str,
    ) -> BoxFuture<'static, ApiResult<PaymentMethodEntity>>;
    /// Cheap liveness call.
    fn health_check(&self) -> BoxFuture<'static, ApiResult<()>>;
}
