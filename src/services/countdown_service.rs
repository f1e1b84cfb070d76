//! Per-session countdown ticker: local auto-completion and live countdown events.

use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    services::sse_events::{publish_bookings, publish_countdown_tick},
    state::{session::UserSession, ticker::Ticker},
};

/// Start the ticker of `session`. The ticker only holds a weak reference to the session.
pub fn start(session: &Arc<UserSession>, period: Duration) -> Ticker {
    let session = Arc::downgrade(session);
    Ticker::start(period, move |tick| {
        let session = session.clone();
        async move {
            if let Some(session) = session.upgrade() {
                on_tick(&session, tick).await;
            }
        }
    })
}

/// One tick: complete what is due, then push countdowns to subscribers.
pub async fn on_tick(session: &UserSession, tick: u64) {
    match session.try_auto_complete().await {
        Some(completed) => publish_bookings(session, &completed).await,
        None => debug!(session_id = %session.id(), tick, "transition in progress; auto-completion deferred"),
    }

    if session.events().subscriber_count() == 0 {
        return;
    }

    let now = session.now();
    let records = session.bookings().await;
    publish_countdown_tick(session, tick, &records, now);
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{
        dao::{backend::AccessToken, models::BookingStatus},
        services::sync_service::{SyncClient, SyncPolicy, SyncSnapshot},
        state::{clock::ManualClock, events::EventHub},
        test_support::{FakeBackend, booking, dinner},
    };

    async fn session_with(status: BookingStatus, clock: Arc<ManualClock>) -> Arc<UserSession> {
        let token = AccessToken::new("t");
        let sync = SyncClient::new(Arc::new(FakeBackend::default()), token.clone(), SyncPolicy::default());
        let session = Arc::new(UserSession::new(
            "u1".into(),
            token,
            sync,
            EventHub::new(16),
            Duration::from_secs(5),
            clock,
        ));
        session
            .apply_snapshot(&SyncSnapshot {
                dinners: vec![dinner("d1", "2025-03-10T19:00:00Z")],
                bookings: vec![booking("b1", "d1", status)],
                bookings_degraded: false,
            })
            .await;
        session
    }

    #[tokio::test]
    async fn tick_auto_completes_and_publishes() {
        let clock = Arc::new(ManualClock::new(datetime!(2025-03-10 20:45 UTC)));
        let session = session_with(BookingStatus::Attended, clock).await;
        let mut events = session.events().subscribe();

        on_tick(&session, 1).await;

        let updated = events.recv().await.unwrap();
        assert_eq!(updated.event.as_deref(), Some("booking.updated"));
        assert!(updated.data.contains(r#""status":"completed""#));

        let tick = events.recv().await.unwrap();
        assert_eq!(tick.event.as_deref(), Some("countdown.tick"));
        assert!(tick.data.contains(r#""tick":1"#));
    }

    #[tokio::test]
    async fn tick_before_window_end_changes_nothing() {
        let clock = Arc::new(ManualClock::new(datetime!(2025-03-10 19:45 UTC)));
        let session = session_with(BookingStatus::Attended, clock).await;

        on_tick(&session, 1).await;
        assert_eq!(
            session.booking("b1").await.unwrap().status(),
            BookingStatus::Attended
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_runs_until_stopped() {
        let clock = Arc::new(ManualClock::new(datetime!(2025-03-10 18:00 UTC)));
        let session = session_with(BookingStatus::Assigned, clock).await;
        let mut events = session.events().subscribe();

        session.install_ticker(start(&session, Duration::from_secs(1))).await;
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(session.ticker_running().await);

        let mut ticks = 0;
        while let Ok(event) = events.try_recv() {
            if event.event.as_deref() == Some("countdown.tick") {
                ticks += 1;
            }
        }
        assert_eq!(ticks, 2);

        session.shutdown().await;
        assert!(!session.ticker_running().await);
    }
}
