use std::{future::Future, sync::Arc};

use futures::TryFutureExt;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        backend::{
            AccessToken,
            error::{ApiError, ApiResult},
        },
        models::{BookingEntity, BookingStatus, DinnerStatus},
    },
    dto::{
        booking::{BookingView, CountdownResponse, DinnerView, GroupMemberView, ReserveRequest},
        payment::PaymentSelection,
        session::{OpenSessionRequest, SessionResponse},
    },
    error::ServiceError,
    services::{
        countdown_service,
        sse_events::publish_bookings,
        sse_service,
        sync_service::{self, RefreshMode, SyncClient, refresh_session},
    },
    state::{
        SharedState,
        booking::BookingEvent,
        events::EventHub,
        session::{BookingRecord, TransitionOutcome, UserSession},
    },
};

/// Open a session, load its data once and start its countdown and refresh tickers.
///
/// A failing initial load is logged; the session still opens with an empty ledger and the
/// scheduled refresh fills it in later.
pub async fn open_session(
    state: &SharedState,
    request: OpenSessionRequest,
) -> Result<SessionResponse, ServiceError> {
    let config = state.config();
    let token = AccessToken::new(&request.access_token);
    let sync = SyncClient::new(state.backend().clone(), token.clone(), config.sync_policy());
    let session = Arc::new(UserSession::new(
        request.user_id.clone(),
        token,
        sync,
        EventHub::new(config.event_capacity),
        config.transition_timeout,
        state.clock(),
    ));

    session.track(sse_service::spawn_phase_forwarder(&session)).await;
    if let Err(err) = refresh_session(&session, RefreshMode::Forced).await {
        warn!(session_id = %session.id(), error = %err, "initial refresh failed");
    }
    session
        .install_ticker(countdown_service::start(&session, config.countdown_tick))
        .await;
    let poll_interval = session.sync().policy().poll_interval;
    if !poll_interval.is_zero() {
        session
            .install_poller(sync_service::start_polling(&session, poll_interval))
            .await;
    }

    state.insert_session(session.clone());
    info!(session_id = %session.id(), user_id = %request.user_id, "session opened");

    Ok(SessionResponse {
        session_id: session.id(),
        user_id: request.user_id,
    })
}

/// Tear a session down: stop its timers and drop the user's pending authorization.
pub async fn close_session(state: &SharedState, session_id: Uuid) -> Result<(), ServiceError> {
    let session = state
        .remove_session(session_id)
        .ok_or_else(|| ServiceError::NotFound(format!("session {session_id}")))?;

    session.shutdown().await;
    if !state.user_has_session(session.user_id()) {
        state
            .holds()
            .release_pending_authorization(session.user_id())
            .await;
    }
    Ok(())
}

/// Close every live session; used on server shutdown.
pub async fn close_all_sessions(state: &SharedState) -> usize {
    let mut closed = 0;
    for session_id in state.session_ids() {
        if close_session(state, session_id).await.is_ok() {
            closed += 1;
        }
    }
    closed
}

/// Dinners from the last refresh.
pub async fn list_dinners(session: &UserSession) -> Vec<DinnerView> {
    session.dinners().await.into_iter().map(Into::into).collect()
}

/// Every tracked booking with its countdown.
pub async fn list_bookings(session: &UserSession) -> Vec<BookingView> {
    let now = session.now();
    session
        .bookings()
        .await
        .into_iter()
        .map(|record| BookingView::from_record(record, now))
        .collect()
}

/// Countdown of one booking.
pub async fn countdown(
    session: &UserSession,
    booking_id: &str,
) -> Result<CountdownResponse, ServiceError> {
    let record = require_booking(session, booking_id).await?;
    Ok(CountdownResponse::new(&record, session.now()))
}

/// Reserve a seat: resolve the payment method, place the hold and book in one call.
pub async fn reserve(
    state: &SharedState,
    session: &UserSession,
    request: ReserveRequest,
) -> Result<BookingView, ServiceError> {
    let dinner_id = request.dinner_id.trim().to_owned();

    if let Some(dinner) = session.dinner(&dinner_id).await {
        if dinner.status != DinnerStatus::Open {
            return Err(ServiceError::InvalidState(format!(
                "dinner {dinner_id} is not open for signups"
            )));
        }
        if !dinner.has_capacity() {
            return Err(ServiceError::InvalidState(format!("dinner {dinner_id} is full")));
        }
    }

    let already_booked = session
        .bookings()
        .await
        .iter()
        .any(|record| {
            record.entity.dinner_id == dinner_id && record.status() != BookingStatus::Cancelled
        });
    if already_booked {
        return Err(ServiceError::InvalidState(format!(
            "a booking already exists for dinner {dinner_id}"
        )));
    }

    let selection = PaymentSelection::from(request.payment);
    let holds = state.holds();
    let booked = async {
        let method = holds
            .acquire_payment_method(session.user_id(), &selection)
            .await?;
        holds
            .place_hold_and_book(session.token(), &dinner_id, &method, selection.saves_method())
            .await
    }
    .await;
    holds.release_pending_authorization(session.user_id()).await;

    let booking = booked?;
    let booking_id = booking.id.clone();
    session.merge_booking(booking).await;
    publish_bookings(session, std::slice::from_ref(&booking_id)).await;

    view(session, &booking_id).await
}

/// Check in to an assigned booking inside its check-in window.
pub async fn check_in(
    state: &SharedState,
    session: &UserSession,
    booking_id: &str,
) -> Result<BookingView, ServiceError> {
    let backend = state.backend().clone();
    let outcome = session
        .run_transition(booking_id, BookingEvent::CheckIn, || {
            backend
                .mark_attended(session.token(), booking_id)
                .map_err(ServiceError::from_mutation)
        })
        .await?;

    finish_transition(session, booking_id, outcome).await
}

/// Cancel a pending or assigned booking.
pub async fn cancel_booking(
    state: &SharedState,
    session: &UserSession,
    booking_id: &str,
) -> Result<BookingView, ServiceError> {
    let backend = state.backend().clone();
    let outcome = session
        .run_transition(booking_id, BookingEvent::Cancel, || {
            backend
                .cancel_booking(session.token(), booking_id)
                .map_err(ServiceError::from_mutation)
        })
        .await?;

    finish_transition(session, booking_id, outcome).await
}

/// Pull one booking from the backend and reconcile it (push-style reference).
pub async fn sync_booking(
    state: &SharedState,
    session: &UserSession,
    booking_id: &str,
) -> Result<BookingView, ServiceError> {
    let entity = bounded(
        session,
        "booking",
        state.backend().booking(session.token(), booking_id),
    )
    .await?;

    if session.merge_booking(entity).await {
        publish_bookings(session, &[booking_id.to_owned()]).await;
    }
    view(session, booking_id).await
}

/// Members of the group a booking was matched to.
pub async fn group_members(
    state: &SharedState,
    session: &UserSession,
    booking_id: &str,
) -> Result<Vec<GroupMemberView>, ServiceError> {
    let record = require_booking(session, booking_id).await?;
    let group = record.entity.dinner_group.ok_or_else(|| {
        ServiceError::InvalidState(format!("booking {booking_id} has not been matched to a group yet"))
    })?;

    let members = bounded(
        session,
        "dinner-group/members",
        state.backend().group_members(session.token(), &group.id),
    )
    .await?;
    Ok(members.into_iter().map(Into::into).collect())
}

async fn finish_transition(
    session: &UserSession,
    booking_id: &str,
    outcome: TransitionOutcome<BookingEntity>,
) -> Result<BookingView, ServiceError> {
    if let TransitionOutcome::Applied { value, .. } = outcome {
        session.merge_booking(value).await;
        publish_bookings(session, &[booking_id.to_owned()]).await;
    }
    view(session, booking_id).await
}

async fn require_booking(
    session: &UserSession,
    booking_id: &str,
) -> Result<BookingRecord, ServiceError> {
    session
        .booking(booking_id)
        .await
        .ok_or_else(|| ServiceError::NotFound(format!("booking {booking_id}")))
}

async fn view(session: &UserSession, booking_id: &str) -> Result<BookingView, ServiceError> {
    let record = require_booking(session, booking_id).await?;
    Ok(BookingView::from_record(record, session.now()))
}

/// Bound a backend call by the session's request timeout.
pub(crate) async fn bounded<T>(
    session: &UserSession,
    path: &'static str,
    call: impl Future<Output = ApiResult<T>>,
) -> Result<T, ServiceError> {
    let value = timeout(session.sync().policy().request_timeout, call)
        .await
        .map_err(|_| ApiError::timeout(path))??;
    Ok(value)
}

/// Like [`bounded`], for calls that change backend state.
pub(crate) async fn bounded_mutation<T>(
    session: &UserSession,
    path: &'static str,
    call: impl Future<Output = ApiResult<T>>,
) -> Result<T, ServiceError> {
    timeout(session.sync().policy().request_timeout, call)
        .await
        .map_err(|_| ApiError::timeout(path))?
        .map_err(ServiceError::from_mutation)
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use reqwest::StatusCode;
    use tokio::sync::broadcast::error::RecvError;
    use time::macros::datetime;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::models::{DinnerGroupEntity, GroupMemberEntity, RestaurantEntity},
        error::AppError,
        dto::payment::PaymentSelectionInput,
        state::{AppState, clock::ManualClock},
        test_support::{self, AcceptingProvider, FakeBackend},
    };

    struct Harness {
        state: SharedState,
        backend: Arc<FakeBackend>,
        clock: Arc<ManualClock>,
    }

    fn harness(backend: FakeBackend, now: time::OffsetDateTime) -> Harness {
        let backend = Arc::new(backend);
        let clock = Arc::new(ManualClock::new(now));
        let state = AppState::with_clock(
            AppConfig::default(),
            backend.clone(),
            Arc::new(AcceptingProvider::default()),
            clock.clone(),
        );
        Harness {
            state,
            backend,
            clock,
        }
    }

    fn assigned_at_seven() -> FakeBackend {
        FakeBackend::with(
            vec![test_support::dinner("d1", "2025-03-10T19:00:00Z")],
            vec![test_support::booking("b1", "d1", BookingStatus::Assigned)],
        )
    }

    async fn open(harness: &Harness) -> Arc<UserSession> {
        let response = open_session(
            &harness.state,
            OpenSessionRequest {
                user_id: "u1".into(),
                access_token: "token".into(),
            },
        )
        .await
        .unwrap();
        harness.state.session(response.session_id).unwrap()
    }

    fn reserve_request(dinner_id: &str, save: bool) -> ReserveRequest {
        ReserveRequest {
            dinner_id: dinner_id.into(),
            payment: PaymentSelectionInput {
                use_saved_method: false,
                selected_method_id: None,
                card: Some(test_support::card()),
                save,
            },
        }
    }

    #[tokio::test]
    async fn open_session_loads_ledger_and_close_stops_ticker() {
        let harness = harness(assigned_at_seven(), datetime!(2025-03-10 12:00 UTC));
        let session = open(&harness).await;

        assert_eq!(harness.state.session_count(), 1);
        assert_eq!(list_dinners(&session).await.len(), 1);
        let bookings = list_bookings(&session).await;
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].status, BookingStatus::Assigned);
        assert!(session.ticker_running().await);
        assert!(session.poller_running().await);

        close_session(&harness.state, session.id()).await.unwrap();
        assert_eq!(harness.state.session_count(), 0);
        assert!(!session.ticker_running().await);
        assert!(!session.poller_running().await);

        let err = close_session(&harness.state, session.id()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let harness = harness(assigned_at_seven(), datetime!(2025-03-10 12:00 UTC));
        let first = open(&harness).await;
        let second = open(&harness).await;

        assert_eq!(close_all_sessions(&harness.state).await, 2);
        assert_eq!(harness.state.session_count(), 0);
        assert!(!first.ticker_running().await);
        assert!(!second.ticker_running().await);
    }

    #[tokio::test]
    async fn check_in_inside_window_marks_attended() {
        let harness = harness(assigned_at_seven(), datetime!(2025-03-10 19:05 UTC));
        let session = open(&harness).await;

        let view = check_in(&harness.state, &session, "b1").await.unwrap();
        assert_eq!(view.status, BookingStatus::Attended);
        assert!(!view.actions.check_in);

        // Repeating the check-in is a no-op and does not call the backend again.
        let calls = harness.backend.calls();
        let view = check_in(&harness.state, &session, "b1").await.unwrap();
        assert_eq!(view.status, BookingStatus::Attended);
        assert_eq!(harness.backend.calls(), calls);
    }

    #[tokio::test]
    async fn check_in_before_dinner_is_rejected_without_network() {
        let harness = harness(assigned_at_seven(), datetime!(2025-03-10 18:30 UTC));
        let session = open(&harness).await;
        let calls = harness.backend.calls();

        let err = check_in(&harness.state, &session, "b1").await.unwrap_err();
        assert!(matches!(err, ServiceError::GuardViolation(_)));
        assert_eq!(harness.backend.calls(), calls);
        assert_eq!(
            session.booking("b1").await.unwrap().status(),
            BookingStatus::Assigned
        );
    }

    #[tokio::test]
    async fn failed_cancel_keeps_status() {
        let harness = harness(assigned_at_seven(), datetime!(2025-03-09 12:00 UTC));
        let session = open(&harness).await;
        *harness.backend.fail_mutations.lock().unwrap() = Some(StatusCode::INTERNAL_SERVER_ERROR);

        let err = cancel_booking(&harness.state, &session, "b1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Backend(_)));
        assert_eq!(
            session.booking("b1").await.unwrap().status(),
            BookingStatus::Assigned
        );

        *harness.backend.fail_mutations.lock().unwrap() = None;
        let view = cancel_booking(&harness.state, &session, "b1").await.unwrap();
        assert_eq!(view.status, BookingStatus::Cancelled);
        assert!(!view.actions.cancel);
    }

    #[tokio::test]
    async fn reserve_with_saved_card_books_and_releases_intent() {
        let backend = FakeBackend::with(vec![test_support::dinner("d1", "2025-03-10T19:00:00Z")], Vec::new());
        let harness = harness(backend, datetime!(2025-03-09 12:00 UTC));
        let session = open(&harness).await;

        let view = reserve(&harness.state, &session, reserve_request("d1", true))
            .await
            .unwrap();
        assert_eq!(view.status, BookingStatus::Pending);
        assert_eq!(view.payment_method_id.as_deref(), Some("pm_saved_card"));
        assert!(!harness.state.holds().has_pending_authorization("u1"));

        let created = harness.backend.created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        assert!(created[0].save_payment_method);
        assert_eq!(created[0].payment_method_id, "pm_saved_card");
    }

    #[tokio::test]
    async fn reserve_rejects_duplicate_and_full_dinners() {
        let mut full = test_support::dinner("d2", "2025-03-11T19:00:00Z");
        full.current_signups = full.max_signups;
        let backend = FakeBackend::with(
            vec![test_support::dinner("d1", "2025-03-10T19:00:00Z"), full],
            vec![test_support::booking("b1", "d1", BookingStatus::Pending)],
        );
        let harness = harness(backend, datetime!(2025-03-09 12:00 UTC));
        let session = open(&harness).await;

        let err = reserve(&harness.state, &session, reserve_request("d1", false))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let err = reserve(&harness.state, &session, reserve_request("d2", false))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert!(harness.backend.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_booking_still_releases_intent() {
        let backend = FakeBackend::with(vec![test_support::dinner("d1", "2025-03-10T19:00:00Z")], Vec::new());
        let harness = harness(backend, datetime!(2025-03-09 12:00 UTC));
        let session = open(&harness).await;
        *harness.backend.fail_mutations.lock().unwrap() = Some(StatusCode::CONFLICT);

        let err = reserve(&harness.state, &session, reserve_request("d1", true))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Rejected(_)));
        assert!(!harness.state.holds().has_pending_authorization("u1"));
        assert!(list_bookings(&session).await.is_empty());
    }

    #[tokio::test]
    async fn rejected_reservation_shows_the_backend_reason() {
        let backend = FakeBackend::with(vec![test_support::dinner("d1", "2025-03-10T19:00:00Z")], Vec::new());
        let harness = harness(backend, datetime!(2025-03-09 12:00 UTC));
        let session = open(&harness).await;
        *harness.backend.reject_mutations.lock().unwrap() =
            Some("This dinner filled up while you were paying".into());

        let err: AppError = reserve(&harness.state, &session, reserve_request("d1", false))
            .await
            .unwrap_err()
            .into();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "This dinner filled up while you were paying");
        assert!(list_bookings(&session).await.is_empty());
    }

    #[tokio::test]
    async fn sync_booking_picks_up_server_change() {
        let harness = harness(assigned_at_seven(), datetime!(2025-03-10 19:10 UTC));
        let session = open(&harness).await;
        let mut events = session.events().subscribe();

        harness.backend.set_status("b1", BookingStatus::Attended);
        let view = sync_booking(&harness.state, &session, "b1").await.unwrap();
        assert_eq!(view.status, BookingStatus::Attended);

        // Late sync phase notifications may be interleaved.
        loop {
            let event = events.recv().await.unwrap();
            if event.event.as_deref() == Some("booking.updated") {
                assert!(event.data.contains("\"attended\""));
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_refresh_picks_up_a_match_without_being_asked() {
        let backend = FakeBackend::with(
            vec![test_support::dinner("d1", "2025-03-10T19:00:00Z")],
            vec![test_support::booking("b1", "d1", BookingStatus::Pending)],
        );
        let harness = harness(backend, datetime!(2025-03-09 12:00 UTC));
        let session = open(&harness).await;
        let mut events = session.events().subscribe();

        harness.backend.set_status("b1", BookingStatus::Assigned);
        let poll_interval = session.sync().policy().poll_interval;
        tokio::time::sleep(poll_interval + Duration::from_secs(1)).await;

        assert_eq!(
            session.booking("b1").await.unwrap().status(),
            BookingStatus::Assigned
        );
        loop {
            match events.recv().await {
                Ok(event) if event.event.as_deref() == Some("booking.updated") => {
                    assert!(event.data.contains("\"assigned\""));
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(err) => panic!("event stream closed: {err}"),
            }
        }
    }

    #[tokio::test]
    async fn countdown_follows_clock() {
        let harness = harness(assigned_at_seven(), datetime!(2025-03-10 18:00 UTC));
        let session = open(&harness).await;

        let response = countdown(&session, "b1").await.unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["booking_id"], "b1");
        assert_eq!(json["countdown"]["hours"], 1);

        harness.clock.set(datetime!(2025-03-10 19:05 UTC));
        let response = countdown(&session, "b1").await.unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["countdown"]["check_in_eligible"], true);

        let err = countdown(&session, "missing").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn group_members_require_a_match() {
        let mut matched = test_support::booking("b2", "d1", BookingStatus::Assigned);
        matched.dinner_group = Some(DinnerGroupEntity {
            id: "g1".into(),
            restaurant: RestaurantEntity {
                name: "Chez Nous".into(),
                address: None,
                cuisine: None,
            },
            table_name: Some("Table 4".into()),
            member_count: Some(2),
        });
        let backend = FakeBackend::with(
            vec![test_support::dinner("d1", "2025-03-10T19:00:00Z")],
            vec![test_support::booking("b1", "d1", BookingStatus::Pending), matched],
        );
        *backend.members.lock().unwrap() = vec![GroupMemberEntity {
            user_id: "u2".into(),
            first_name: "Ada".into(),
            occupation: None,
        }];
        let harness = harness(backend, datetime!(2025-03-09 12:00 UTC));
        let session = open(&harness).await;

        let err = group_members(&harness.state, &session, "b1").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let members = group_members(&harness.state, &session, "b2").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].first_name, "Ada");
        assert!(harness.backend.calls.load(Ordering::SeqCst) > 0);
    }
}
