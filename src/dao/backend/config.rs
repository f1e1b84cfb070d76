use std::time::Duration;

/// Runtime configuration describing how to reach the booking backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL every backend path is joined to.
    pub base_url: String,
    /// Per-request timeout of the HTTP client.
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Construct a configuration from an explicit base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
