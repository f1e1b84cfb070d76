use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;

use crate::dao::models::{
    BookingEntity, CreateBookingRequest, DinnerEntity, GroupMemberEntity, PaymentMethodEntity,
};

use super::{
    AccessToken, BookingBackend,
    config::BackendConfig,
    error::{ApiError, ApiResult},
};

/// Uniform `{ success, data, error }` wrapper every backend route answers with.
#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

/// Error body shape used when the envelope itself could not be produced.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Booking backend reached over HTTP.
#[derive(Clone)]
pub struct HttpBookingBackend {
    client: Client,
    base_url: Arc<str>,
}

impl HttpBookingBackend {
    /// Build the HTTP client; no request is issued until the first call.
    pub fn new(config: BackendConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ApiError::setup)?;

        Ok(Self {
            client,
            base_url: Arc::<str>::from(config.base_url.trim_end_matches('/')),
        })
    }

    fn request(&self, method: Method, path: &str, auth: Option<&AccessToken>) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match auth {
            Some(token) => builder.bearer_auth(token.as_str()),
            None => builder,
        }
    }

    /// Send a request and unwrap the envelope, requiring a `data` payload.
    async fn call<T>(&self, builder: reqwest::RequestBuilder, path: String) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        let (status, envelope) = self.exchange::<T>(builder, &path).await?;
        envelope
            .data
            .ok_or_else(|| ApiError::rejected(path, status, "response envelope carried no data"))
    }

    /// Send a request and unwrap the envelope, ignoring any `data` payload.
    async fn call_unit(&self, builder: reqwest::RequestBuilder, path: String) -> ApiResult<()> {
        self.exchange::<serde_json::Value>(builder, &path)
            .await
            .map(|_| ())
    }

    async fn exchange<T>(
        &self,
        builder: reqwest::RequestBuilder,
        path: &str,
    ) -> ApiResult<(StatusCode, Envelope<T>)>
    where
        T: DeserializeOwned,
    {
        debug!(path, "calling booking backend");
        let response = builder
            .send()
            .await
            .map_err(|source| ApiError::send(path, source))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|body| body.error.or(body.message))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            return Err(ApiError::from_status(path, status, message));
        }

        let envelope = response
            .json::<Envelope<T>>()
            .await
            .map_err(|source| ApiError::decode(path, source))?;

        if !envelope.success {
            let message = envelope
                .error
                .unwrap_or_else(|| "backend reported failure".to_string());
            return Err(ApiError::rejected(path, status, message));
        }

        Ok((status, envelope))
    }
}

fn booking_path(booking_id: &str, action: &str) -> String {
    format!("booking/{booking_id}/{action}")
}

impl BookingBackend for HttpBookingBackend {
    fn available_dinners(&self, auth: &AccessToken) -> BoxFuture<'static, ApiResult<Vec<DinnerEntity>>> {
        let backend = self.clone();
        let builder = self.request(Method::GET, "available-dinners", Some(auth));
        Box::pin(async move { backend.call(builder, "available-dinners".into()).await })
    }

    fn my_signups(&self, auth: &AccessToken) -> BoxFuture<'static, ApiResult<Vec<BookingEntity>>> {
        let backend = self.clone();
        let builder = self.request(Method::GET, "my-signups", Some(auth));
        Box::pin(async move { backend.call(builder, "my-signups".into()).await })
    }

    fn create_booking_with_payment(
        &self,
        auth: &AccessToken,
        request: CreateBookingRequest,
    ) -> BoxFuture<'static, ApiResult<BookingEntity>> {
        let backend = self.clone();
        let builder = self
            .request(Method::POST, "create-booking-with-payment", Some(auth))
            .json(&request);
        Box::pin(async move {
            backend
                .call(builder, "create-booking-with-payment".into())
                .await
        })
    }

    fn mark_attended(&self, auth: &AccessToken, booking_id: &str) -> BoxFuture<'static, ApiResult<BookingEntity>> {
        let backend = self.clone();
        let path = booking_path(booking_id, "mark-attended");
        let builder = self.request(Method::POST, &path, Some(auth));
        Box::pin(async move { backend.call(builder, path).await })
    }

    fn cancel_booking(&self, auth: &AccessToken, booking_id: &str) -> BoxFuture<'static, ApiResult<BookingEntity>> {
        let backend = self.clone();
        let path = booking_path(booking_id, "cancel");
        let builder = self.request(Method::POST, &path, Some(auth));
        Box::pin(async move { backend.call(builder, path).await })
    }

    fn booking(&self, auth: &AccessToken, booking_id: &str) -> BoxFuture<'static, ApiResult<BookingEntity>> {
        let backend = self.clone();
        let path = format!("booking/{booking_id}");
        let builder = self.request(Method::GET, &path, Some(auth));
        Box::pin(async move { backend.call(builder, path).await })
    }

    fn group_members(
        &self,
        auth: &AccessToken,
        group_id: &str,
    ) -> BoxFuture<'static, ApiResult<Vec<GroupMemberEntity>>> {
        let backend = self.clone();
        let path = format!("dinner-group/{group_id}/members");
        let builder = self.request(Method::GET, &path, Some(auth));
        Box::pin(async move { backend.call(builder, path).await })
    }

    fn payment_methods(&self, auth: &AccessToken) -> BoxFuture<'static, ApiResult<Vec<PaymentMethodEntity>>> {
        let backend = self.clone();
        let builder = self.request(Method::GET, "payment-methods", Some(auth));
        Box::pin(async move { backend.call(builder, "payment-methods".into()).await })
    }

    fn remove_payment_method(&self, auth: &AccessToken, method_id: &str) -> BoxFuture<'static, ApiResult<()>> {
        let backend = self.clone();
        let path = format!("payment-methods/{method_id}");
        let builder = self.request(Method::DELETE, &path, Some(auth));
        Box::pin(async move { backend.call_unit(builder, path).await })
    }

    fn set_default_payment_method(
        &self,
        auth: &AccessToken,
        method_id: &str,
    ) -> BoxFuture<'static, ApiResult<PaymentMethodEntity>> {
        let backend = self.clone();
        let path = format!("payment-methods/{method_id}/default");
        let builder = self.request(Method::POST, &path, Some(auth));
        Box::pin(async move { backend.call(builder, path).await })
    }

    fn health_check(&self) -> BoxFuture<'static, ApiResult<()>> {
        let backend = self.clone();
        let builder = self.request(Method::GET, "health", None);
        Box::pin(async move { backend.call_unit(builder, "health".into()).await })
    }
}
