use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dto::booking::BookingCountdown, services::sync_service::SyncPhase};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Serialise `payload` into the data field of a named event.
    pub fn json<T>(event: &str, payload: &T) -> serde_json::Result<Self>
    where
        T: Serialize,
    {
        Ok(Self {
            event: Some(event.to_owned()),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First event sent to a client subscribing to a session stream.
pub struct Handshake {
    pub session_id: Uuid,
    /// Sync phase at subscription time.
    pub sync: SyncPhase,
}

#[derive(Debug, Serialize, ToSchema)]
/// Emitted once per countdown tick with the values of every tracked booking.
pub struct CountdownTickEvent {
    pub tick: u64,
    /// Instant the values were computed at (RFC 3339).
    pub computed_at: String,
    pub bookings: Vec<BookingCountdown>,
}
