use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether the booking backend answered its liveness check.
    pub backend_reachable: bool,
    /// Number of open user sessions.
    pub sessions: usize,
    /// Server time (RFC 3339).
    pub checked_at: String,
}

impl HealthResponse {
    /// Build a response, degraded when the backend is unreachable.
    pub fn new(backend_reachable: bool, sessions: usize, checked_at: String) -> Self {
        let status = if backend_reachable { "ok" } else { "degraded" };
        Self {
            status: status.to_string(),
            backend_reachable,
            sessions,
            checked_at,
        }
    }
}
