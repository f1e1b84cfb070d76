use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::{
    dto::{format_instant, health::HealthResponse},
    state::SharedState,
};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Check the booking backend and report open sessions, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let backend_reachable = match timeout(HEALTH_CHECK_TIMEOUT, state.backend().health_check()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(error = %err, "booking backend health check failed");
            false
        }
        Err(_) => {
            warn!("booking backend health check timed out");
            false
        }
    };

    HealthResponse::new(
        backend_reachable,
        state.session_count(),
        format_instant(state.clock().now()),
    )
}
