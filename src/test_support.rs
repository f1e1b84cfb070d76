//! In-memory backend and provider used by unit tests across modules.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use reqwest::StatusCode;
use tokio::time::{Instant, sleep};

use crate::{
    dao::{
        backend::{
            AccessToken, BookingBackend,
            error::{ApiError, ApiResult},
        },
        models::{
            BookingEntity, BookingStatus, CreateBookingRequest, DinnerEntity, DinnerStatus,
            GroupMemberEntity, PaymentMethodEntity,
        },
        payment::{PaymentProvider, SetupIntent, error::ProviderResult},
    },
    dto::payment::CardDetails,
};

pub fn dinner(id: &str, datetime: &str) -> DinnerEntity {
    DinnerEntity {
        id: id.into(),
        datetime: Some(datetime.into()),
        max_signups: 6,
        current_signups: 2,
        status: DinnerStatus::Open,
        dinner_type: None,
    }
}

pub fn booking(id: &str, dinner_id: &str, status: BookingStatus) -> BookingEntity {
    BookingEntity {
        id: id.into(),
        dinner_id: dinner_id.into(),
        user_id: "u1".into(),
        status,
        payment_method_id: Some("pm_1".into()),
        dinner_group: None,
        dinner: None,
    }
}

pub fn card() -> CardDetails {
    CardDetails {
        number: "4242 4242 4242 4242".into(),
        exp_month: 8,
        exp_year: 2032,
        cvc: "123".into(),
        postal_code: Some("94107".into()),
    }
}

/// Backend keeping its data in memory, with optional failure injection.
#[derive(Default)]
pub struct FakeBackend {
    pub dinners: Mutex<Vec<DinnerEntity>>,
    pub bookings: Mutex<IndexMap<String, BookingEntity>>,
    pub members: Mutex<Vec<GroupMemberEntity>>,
    pub methods: Mutex<Vec<PaymentMethodEntity>>,
    /// Status returned by every mutating booking call when set.
    pub fail_mutations: Mutex<Option<StatusCode>>,
    /// Message of a `success: false` envelope answered to every mutating booking call when set.
    pub reject_mutations: Mutex<Option<String>>,
    /// Statuses answered by the next dinners calls, front first; success once drained.
    pub dinner_failures: Mutex<VecDeque<StatusCode>>,
    /// Status answered by every bookings list call when set.
    pub bookings_failure: Mutex<Option<StatusCode>>,
    /// Delay before a dinners call answers.
    pub latency: Mutex<Duration>,
    /// Start time of every dinners call.
    pub dinner_calls: Mutex<Vec<Instant>>,
    pub created: Mutex<Vec<CreateBookingRequest>>,
    pub calls: AtomicUsize,
}

impl FakeBackend {
    pub fn with(dinners: Vec<DinnerEntity>, bookings: Vec<BookingEntity>) -> Self {
        let backend = Self::default();
        *backend.dinners.lock().unwrap() = dinners;
        *backend.bookings.lock().unwrap() = bookings
            .into_iter()
            .map(|booking| (booking.id.clone(), booking))
            .collect();
        backend
    }

    pub fn set_status(&self, booking_id: &str, status: BookingStatus) {
        if let Some(booking) = self.bookings.lock().unwrap().get_mut(booking_id) {
            booking.status = status;
        }
    }

    /// Queue failures for the next dinners calls.
    pub fn script_dinner_failures(&self, statuses: &[StatusCode]) {
        self.dinner_failures.lock().unwrap().extend(statuses.iter().copied());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Injected failure for a mutating call on `path`, if any.
    fn mutation_failure(&self, path: &str) -> Option<ApiError> {
        if let Some(message) = self.reject_mutations.lock().unwrap().clone() {
            return Some(ApiError::rejected(path, StatusCode::OK, message));
        }
        self.fail_mutations
            .lock()
            .unwrap()
            .map(|code| ApiError::from_status(path, code, "injected failure"))
    }

    fn mutate(
        &self,
        path: &str,
        booking_id: &str,
        status: BookingStatus,
    ) -> BoxFuture<'static, ApiResult<BookingEntity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = match self.mutation_failure(path) {
            Some(err) => Err(err),
            None => self
                .bookings
                .lock()
                .unwrap()
                .get_mut(booking_id)
                .map(|booking| {
                    booking.status = status;
                    booking.clone()
                })
                .ok_or_else(|| ApiError::from_status(path, StatusCode::NOT_FOUND, "no such booking")),
        };
        Box::pin(async move { result })
    }
}

impl BookingBackend for FakeBackend {
    fn available_dinners(&self, _auth: &AccessToken) -> BoxFuture<'static, ApiResult<Vec<DinnerEntity>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dinner_calls.lock().unwrap().push(Instant::now());
        let result = match self.dinner_failures.lock().unwrap().pop_front() {
            Some(code) => Err(ApiError::from_status("available-dinners", code, "scripted failure")),
            None => Ok(self.dinners.lock().unwrap().clone()),
        };
        let latency = *self.latency.lock().unwrap();
        Box::pin(async move {
            if !latency.is_zero() {
                sleep(latency).await;
            }
            result
        })
    }

    fn my_signups(&self, _auth: &AccessToken) -> BoxFuture<'static, ApiResult<Vec<BookingEntity>>> {
        let result = match *self.bookings_failure.lock().unwrap() {
            Some(code) => Err(ApiError::from_status("my-signups", code, "scripted failure")),
            None => Ok(self.bookings.lock().unwrap().values().cloned().collect()),
        };
        Box::pin(async move { result })
    }

    fn create_booking_with_payment(
        &self,
        _auth: &AccessToken,
        request: CreateBookingRequest,
    ) -> BoxFuture<'static, ApiResult<BookingEntity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.mutation_failure("create-booking-with-payment") {
            return Box::pin(async move { Err(err) });
        }

        let mut bookings = self.bookings.lock().unwrap();
        let mut booking = booking(
            &format!("b{}", bookings.len() + 1),
            &request.dinner_id,
            BookingStatus::Pending,
        );
        booking.payment_method_id = Some(request.payment_method_id.clone());
        bookings.insert(booking.id.clone(), booking.clone());
        self.created.lock().unwrap().push(request);
        Box::pin(async move { Ok(booking) })
    }

    fn mark_attended(&self, _auth: &AccessToken, booking_id: &str) -> BoxFuture<'static, ApiResult<BookingEntity>> {
        self.mutate("booking/mark-attended", booking_id, BookingStatus::Attended)
    }

    fn cancel_booking(&self, _auth: &AccessToken, booking_id: &str) -> BoxFuture<'static, ApiResult<BookingEntity>> {
        self.mutate("booking/cancel", booking_id, BookingStatus::Cancelled)
    }

    fn booking(&self, _auth: &AccessToken, booking_id: &str) -> BoxFuture<'static, ApiResult<BookingEntity>> {
        let result = self
            .bookings
            .lock()
            .unwrap()
            .get(booking_id)
            .cloned()
            .ok_or_else(|| ApiError::from_status("booking", StatusCode::NOT_FOUND, "no such booking"));
        Box::pin(async move { result })
    }

    fn group_members(
        &self,
        _auth: &AccessToken,
        _group_id: &str,
    ) -> BoxFuture<'static, ApiResult<Vec<GroupMemberEntity>>> {
        let members = self.members.lock().unwrap().clone();
        Box::pin(async move { Ok(members) })
    }

    fn payment_methods(&self, _auth: &AccessToken) -> BoxFuture<'static, ApiResult<Vec<PaymentMethodEntity>>> {
        let methods = self.methods.lock().unwrap().clone();
        Box::pin(async move { Ok(methods) })
    }

    fn remove_payment_method(&self, _auth: &AccessToken, method_id: &str) -> BoxFuture<'static, ApiResult<()>> {
        let mut methods = self.methods.lock().unwrap();
        let before = methods.len();
        methods.retain(|method| method.id != method_id);
        let result = if methods.len() < before {
            Ok(())
        } else {
            Err(ApiError::from_status("payment-methods", StatusCode::NOT_FOUND, "unknown method"))
        };
        Box::pin(async move { result })
    }

    fn set_default_payment_method(
        &self,
        _auth: &AccessToken,
        method_id: &str,
    ) -> BoxFuture<'static, ApiResult<PaymentMethodEntity>> {
        let mut methods = self.methods.lock().unwrap();
        for method in methods.iter_mut() {
            method.is_default = method.id == method_id;
        }
        let result = methods
            .iter()
            .find(|method| method.id == method_id)
            .cloned()
            .ok_or_else(|| ApiError::from_status("payment-methods", StatusCode::NOT_FOUND, "unknown method"));
        Box::pin(async move { result })
    }

    fn health_check(&self) -> BoxFuture<'static, ApiResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Provider that accepts every card.
#[derive(Default)]
pub struct AcceptingProvider {
    pub intents: AtomicUsize,
}

impl PaymentProvider for AcceptingProvider {
    fn create_setup_intent(&self, _user_id: &str) -> BoxFuture<'static, ProviderResult<SetupIntent>> {
        let n = self.intents.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            Ok(SetupIntent {
                id: format!("seti_{n}"),
                client_secret: format!("seti_{n}_secret"),
            })
        })
    }

    fn confirm_setup_intent(
        &self,
        _client_secret: &str,
        _card: &CardDetails,
    ) -> BoxFuture<'static, ProviderResult<String>> {
        Box::pin(async { Ok("pm_saved_card".to_owned()) })
    }

    fn create_payment_method(&self, _card: &CardDetails) -> BoxFuture<'static, ProviderResult<String>> {
        Box::pin(async { Ok("pm_one_off".to_owned()) })
    }
}
