//! Error types shared by the payment provider client.

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`ProviderError`] failures.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failures that can occur while talking to the payment provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected the request (declined card, expired session, ...).
    ///
    /// The message is shown to the user verbatim.
    #[error("{message}")]
    Declined {
        /// Provider decline code, e.g. `card_declined`.
        code: Option<String>,
        /// Provider copy for the user.
        message: String,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build payment provider client")]
    ClientBuilder {
        /// Underlying builder error.
        #[source]
        source: reqwest::Error,
    },
    /// A request to the provider could not be sent.
    #[error("failed to reach payment provider during `{operation}`")]
    RequestSend {
        /// Provider operation being performed.
        operation: &'static str,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The provider answered with an unexpected status and no usable error body.
    #[error("unexpected payment provider status {status} during `{operation}`")]
    RequestStatus {
        /// Provider operation being performed.
        operation: &'static str,
        /// Status the provider answered with.
        status: StatusCode,
    },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode payment provider response during `{operation}`")]
    DecodeResponse {
        /// Provider operation being performed.
        operation: &'static str,
        /// Decoding error.
        #[source]
        source: reqwest::Error,
    },
    /// The provider did not answer within the configured time budget.
    #[error("payment provider timed out during `{operation}`")]
    Timeout {
        /// Provider operation being performed.
        operation: &'static str,
    },
}

impl ProviderError {
    /// Whether the failure came from the network rather than a provider decision.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProviderError::RequestSend { .. } | ProviderError::Timeout { .. }
        )
    }
}
