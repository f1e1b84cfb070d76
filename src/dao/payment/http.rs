use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::dto::payment::CardDetails;

use super::{
    PaymentProvider, SetupIntent,
    error::{ProviderError, ProviderResult},
};

/// Runtime configuration describing how to reach the payment provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Secret API key sent as bearer credential.
    pub secret_key: String,
    /// Per-request timeout of the HTTP client.
    pub request_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSetupIntentBody<'a> {
    customer: &'a str,
    usage: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmSetupIntentBody<'a> {
    client_secret: &'a str,
    card: &'a CardDetails,
}

#[derive(Serialize)]
struct CreatePaymentMethodBody<'a> {
    r#type: &'static str,
    card: &'a CardDetails,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmedSetupIntent {
    payment_method_id: String,
}

#[derive(Deserialize)]
struct CreatedPaymentMethod {
    id: String,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Deserialize)]
struct ProviderErrorDetail {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

/// Payment provider reached over its JSON HTTP API.
#[derive(Clone)]
pub struct HttpPaymentProvider {
    client: Client,
    base_url: Arc<str>,
    secret_key: Arc<str>,
}

impl HttpPaymentProvider {
    /// Build the HTTP client for the provider.
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| ProviderError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::<str>::from(config.base_url.trim_end_matches('/')),
            secret_key: Arc::<str>::from(config.secret_key),
        })
    }

    async fn post<B, T>(&self, operation: &'static str, path: &str, body: &B) -> ProviderResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(operation, "calling payment provider");
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .request(Method::POST, url)
            .bearer_auth(self.secret_key.as_ref())
            .json(body)
            .send()
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    ProviderError::Timeout { operation }
                } else {
                    ProviderError::RequestSend { operation, source }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|source| ProviderError::DecodeResponse { operation, source });
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ProviderErrorBody>(&text) {
            Ok(body) => Err(ProviderError::Declined {
                code: body.error.code,
                message: body.error.message,
            }),
            Err(_) => Err(ProviderError::RequestStatus { operation, status }),
        }
    }
}

impl PaymentProvider for HttpPaymentProvider {
    fn create_setup_intent(&self, user_id: &str) -> BoxFuture<'static, ProviderResult<SetupIntent>> {
        let provider = self.clone();
        let customer = user_id.to_string();
        Box::pin(async move {
            let body = CreateSetupIntentBody {
                customer: &customer,
                usage: "off_session",
            };
            provider
                .post("create_setup_intent", "setup_intents", &body)
                .await
        })
    }

    fn confirm_setup_intent(
        &self,
        client_secret: &str,
        card: &CardDetails,
    ) -> BoxFuture<'static, ProviderResult<String>> {
        let provider = self.clone();
        let client_secret = client_secret.to_string();
        let card = card.clone();
        Box::pin(async move {
            let body = ConfirmSetupIntentBody {
                client_secret: &client_secret,
                card: &card,
            };
            let confirmed: ConfirmedSetupIntent = provider
                .post("confirm_setup_intent", "setup_intents/confirm", &body)
                .await?;
            Ok(confirmed.payment_method_id)
        })
    }

    fn create_payment_method(&self, card: &CardDetails) -> BoxFuture<'static, ProviderResult<String>> {
        let provider = self.clone();
        let card = card.clone();
        Box::pin(async move {
            let body = CreatePaymentMethodBody {
                r#type: "card",
                card: &card,
            };
            let created: CreatedPaymentMethod = provider
                .post("create_payment_method", "payment_methods", &body)
                .await?;
            Ok(created.id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decline_body_parses() {
        let body: ProviderErrorBody = serde_json::from_str(
            r#"{"error":{"code":"card_declined","message":"Your card was declined."}}"#,
        )
        .unwrap();
        assert_eq!(body.error.code.as_deref(), Some("card_declined"));
        assert_eq!(body.error.message, "Your card was declined.");
    }

    #[test]
    fn payment_method_body_uses_type_field() {
        let card = CardDetails {
            number: "4242424242424242".into(),
            exp_month: 1,
            exp_year: 2031,
            cvc: "123".into(),
            postal_code: None,
        };
        let json = serde_json::to_value(CreatePaymentMethodBody {
            r#type: "card",
            card: &card,
        })
        .unwrap();
        assert_eq!(json["type"], "card");
        assert_eq!(json["card"]["exp_year"], 2031);
    }
}
