use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;

use crate::{
    dto::{
        booking::{BookingCountdown, BookingView},
        format_instant,
        sse::{CountdownTickEvent, Handshake, ServerEvent},
    },
    services::sync_service::SyncPhase,
    state::session::{BookingRecord, UserSession},
};

const EVENT_HANDSHAKE: &str = "session.handshake";
const EVENT_BOOKING_UPDATED: &str = "booking.updated";
const EVENT_COUNTDOWN_TICK: &str = "countdown.tick";
const EVENT_SYNC_PHASE: &str = "sync.phase";

/// Publish the current view of each listed booking.
pub async fn publish_bookings(session: &UserSession, booking_ids: &[String]) {
    if booking_ids.is_empty() {
        return;
    }

    let now = session.now();
    for id in booking_ids {
        if let Some(record) = session.booking(id).await {
            send_event(session, EVENT_BOOKING_UPDATED, &BookingView::from_record(record, now));
        }
    }
}

/// Publish the countdown of every tracked booking.
pub fn publish_countdown_tick(
    session: &UserSession,
    tick: u64,
    records: &[BookingRecord],
    now: OffsetDateTime,
) {
    let payload = CountdownTickEvent {
        tick,
        computed_at: format_instant(now),
        bookings: records
            .iter()
            .map(|record| BookingCountdown::from_record(record, now))
            .collect(),
    };
    send_event(session, EVENT_COUNTDOWN_TICK, &payload);
}

/// Publish a sync phase change.
pub fn publish_sync_phase(session: &UserSession, phase: SyncPhase) {
    send_event(session, EVENT_SYNC_PHASE, &phase);
}

/// Greet a freshly subscribed client.
pub fn publish_handshake(session: &UserSession) {
    let payload = Handshake {
        session_id: session.id(),
        sync: session.sync().phase(),
    };
    send_event(session, EVENT_HANDSHAKE, &payload);
}

fn send_event(session: &UserSession, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(event, payload) {
        Ok(event) => session.events().publish(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}
