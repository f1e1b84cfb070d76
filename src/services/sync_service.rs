//! Throttled, de-duplicated and backoff-aware refresh of dinners and bookings.

use std::{future::Future, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{Mutex, Notify, watch},
    time::{Instant, sleep, timeout},
};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::{
    dao::{
        backend::{
            AccessToken, BookingBackend,
            error::{ApiError, ApiResult},
        },
        models::{BookingEntity, DinnerEntity},
    },
    error::ServiceError,
    services::sse_events::publish_bookings,
    state::{session::UserSession, ticker::Ticker},
};

/// Throttle, retry and timeout knobs of a [`SyncClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Minimum spacing between the starts of two non-forced fetches.
    pub min_interval: Duration,
    /// How many times a rate-limited fetch is retried before giving up.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub base_delay: Duration,
    /// Cap on the retry delay.
    pub max_delay: Duration,
    /// Upper bound on every individual backend call.
    pub request_timeout: Duration,
    /// Period of the scheduled background refresh. Zero disables it.
    pub poll_interval: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            max_retries: 3,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Delay before retry number `attempt` (zero based): `min(2^attempt * base, max)`.
pub fn backoff_delay(policy: &SyncPolicy, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    policy
        .base_delay
        .checked_mul(factor)
        .unwrap_or(policy.max_delay)
        .min(policy.max_delay)
}

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Periodic or implicit refresh, subject to the throttle.
    Scheduled,
    /// User-initiated refresh: bypasses the throttle and cancels a pending retry.
    Forced,
}

/// Phase of the current fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncPhase {
    /// No cycle running.
    Idle,
    /// A fetch is on the wire.
    Fetching {
        /// Zero for the first try, then one per retry.
        attempt: u32,
    },
    /// Rate limited; waiting before the next attempt.
    RetryScheduled {
        /// Attempt that will run after the delay.
        attempt: u32,
        /// Backoff delay in milliseconds.
        delay_ms: u64,
    },
    /// The last fetch succeeded.
    Succeeded,
    /// The last fetch failed for good.
    Failed,
}

/// Server-authoritative data gathered by one successful cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    /// Dinners open for signup.
    pub dinners: Vec<DinnerEntity>,
    /// Bookings of the session user.
    pub bookings: Vec<BookingEntity>,
    /// Bookings could not be fetched this cycle and `bookings` is empty as a fallback.
    pub bookings_degraded: bool,
}

/// What happened to a refresh request.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// A cycle ran and produced a snapshot.
    Refreshed(SyncSnapshot),
    /// Dropped: the previous fetch started less than the minimum interval ago.
    Throttled,
    /// Dropped: another fetch is still running.
    AlreadyInFlight,
    /// Cancelled while waiting for a retry because a forced refresh took over.
    Superseded,
}

#[derive(Debug, Default)]
struct FetchState {
    last_success_start: Option<Instant>,
}

/// Resets the published phase to idle however the cycle ends.
struct PhaseGuard<'a>(&'a watch::Sender<SyncPhase>);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(SyncPhase::Idle);
    }
}

/// Pulls dinners and the user's bookings from the backend for one session.
pub struct SyncClient {
    backend: Arc<dyn BookingBackend>,
    token: AccessToken,
    policy: SyncPolicy,
    // Held for the whole cycle; `try_lock` failing means a fetch is in flight.
    state: Mutex<FetchState>,
    supersede: Notify,
    phase: watch::Sender<SyncPhase>,
}

impl SyncClient {
    /// Client pulling data for the user behind `token`.
    pub fn new(backend: Arc<dyn BookingBackend>, token: AccessToken, policy: SyncPolicy) -> Self {
        let (phase, _rx) = watch::channel(SyncPhase::Idle);
        Self {
            backend,
            token,
            policy,
            state: Mutex::new(FetchState::default()),
            supersede: Notify::new(),
            phase,
        }
    }

    /// Policy this client runs with.
    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Current phase of the fetch cycle.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Subscribe to phase changes.
    pub fn phases(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Run one fetch cycle unless throttled or already running.
    pub async fn refresh(&self, mode: RefreshMode) -> Result<RefreshOutcome, ServiceError> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(_) if mode == RefreshMode::Forced && self.supersede_pending_retry() => {
                self.state.lock().await
            }
            Err(_) => {
                debug!(?mode, "refresh dropped: a fetch is already in flight");
                return Ok(RefreshOutcome::AlreadyInFlight);
            }
        };

        if mode == RefreshMode::Scheduled {
            if let Some(last) = state.last_success_start {
                if last.elapsed() < self.policy.min_interval {
                    debug!(since_last = ?last.elapsed(), "refresh dropped by throttle");
                    return Ok(RefreshOutcome::Throttled);
                }
            }
        }

        let _phase = PhaseGuard(&self.phase);
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            self.phase.send_replace(SyncPhase::Fetching { attempt });

            match self.fetch_once().await {
                Ok(snapshot) => {
                    state.last_success_start = Some(started);
                    self.phase.send_replace(SyncPhase::Succeeded);
                    info!(
                        attempt,
                        dinners = snapshot.dinners.len(),
                        bookings = snapshot.bookings.len(),
                        bookings_degraded = snapshot.bookings_degraded,
                        "sync cycle succeeded"
                    );
                    return Ok(RefreshOutcome::Refreshed(snapshot));
                }
                Err(err) if err.is_rate_limited() && attempt < self.policy.max_retries => {
                    let delay = backoff_delay(&self.policy, attempt);
                    attempt += 1;

                    let superseded = self.supersede.notified();
                    tokio::pin!(superseded);
                    superseded.as_mut().enable();
                    self.phase.send_replace(SyncPhase::RetryScheduled {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    warn!(attempt, ?delay, "rate limited by backend; retry scheduled");

                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = &mut superseded => {
                            info!(attempt, "scheduled retry superseded by a forced refresh");
                            return Ok(RefreshOutcome::Superseded);
                        }
                    }
                }
                Err(err) => {
                    self.phase.send_replace(SyncPhase::Failed);
                    warn!(attempt, error = %err, status = ?err.status, "sync cycle failed");
                    return Err(err.into());
                }
            }
        }
    }

    /// Wake a cycle sleeping before a retry. Returns false when there is none.
    fn supersede_pending_retry(&self) -> bool {
        if !matches!(self.phase(), SyncPhase::RetryScheduled { .. }) {
            return false;
        }
        self.supersede.notify_waiters();
        true
    }

    /// Fetch dinners and bookings concurrently; only the dinners failure fails the cycle.
    async fn fetch_once(&self) -> ApiResult<SyncSnapshot> {
        let dinners = self.bounded("available-dinners", self.backend.available_dinners(&self.token));
        let bookings = self.bounded("my-signups", self.backend.my_signups(&self.token));
        let (dinners, bookings) = tokio::join!(dinners, bookings);

        let dinners = dinners?;
        let (bookings, bookings_degraded) = match bookings {
            Ok(bookings) => (bookings, false),
            Err(err) => {
                warn!(error = %err, "failed to fetch bookings; continuing with an empty list");
                (Vec::new(), true)
            }
        };

        Ok(SyncSnapshot {
            dinners,
            bookings,
            bookings_degraded,
        })
    }

    async fn bounded<T>(
        &self,
        path: &'static str,
        call: impl Future<Output = ApiResult<T>>,
    ) -> ApiResult<T> {
        timeout(self.policy.request_timeout, call)
            .await
            .map_err(|_| ApiError::timeout(path))?
    }
}

/// Refresh `session` and fold a successful snapshot into its ledger.
pub async fn refresh_session(
    session: &UserSession,
    mode: RefreshMode,
) -> Result<RefreshOutcome, ServiceError> {
    let outcome = session.sync().refresh(mode).await?;
    if let RefreshOutcome::Refreshed(snapshot) = &outcome {
        let changed = session.apply_snapshot(snapshot).await;
        publish_bookings(session, &changed).await;
    }
    Ok(outcome)
}

/// Start the scheduled refresh of `session`. Like the countdown ticker, it only holds a weak
/// reference to the session.
pub fn start_polling(session: &Arc<UserSession>, period: Duration) -> Ticker {
    let session = Arc::downgrade(session);
    Ticker::start(period, move |tick| {
        let session = session.clone();
        async move {
            let Some(session) = session.upgrade() else {
                return;
            };
            match refresh_session(&session, RefreshMode::Scheduled).await {
                Ok(RefreshOutcome::Refreshed(_)) => {}
                Ok(outcome) => debug!(session_id = %session.id(), tick, ?outcome, "scheduled refresh skipped"),
                Err(err) => warn!(session_id = %session.id(), tick, error = %err, "scheduled refresh failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::{
        dao::models::BookingStatus,
        test_support::{FakeBackend, booking, dinner},
    };

    fn backend() -> Arc<FakeBackend> {
        Arc::new(FakeBackend::with(
            vec![dinner("d1", "2025-03-10T19:00:00Z")],
            vec![booking("b1", "d1", BookingStatus::Pending)],
        ))
    }

    fn failing(statuses: &[StatusCode]) -> Arc<FakeBackend> {
        let backend = backend();
        backend.script_dinner_failures(statuses);
        backend
    }

    fn client(backend: Arc<FakeBackend>) -> Arc<SyncClient> {
        Arc::new(SyncClient::new(backend, AccessToken::new("token"), SyncPolicy::default()))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = SyncPolicy::default();
        let delays: Vec<_> = (0..6).map(|attempt| backoff_delay(&policy, attempt)).collect();
        assert_eq!(
            delays,
            [3, 6, 12, 24, 30, 30].map(Duration::from_secs).to_vec()
        );
        assert_eq!(backoff_delay(&policy, 40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn second_refresh_within_interval_is_throttled() {
        let backend = backend();
        let client = client(backend.clone());

        let first = client.refresh(RefreshMode::Scheduled).await.unwrap();
        assert!(matches!(first, RefreshOutcome::Refreshed(_)));

        sleep(Duration::from_secs(1)).await;
        let second = client.refresh(RefreshMode::Scheduled).await.unwrap();
        assert_eq!(second, RefreshOutcome::Throttled);
        assert_eq!(backend.calls(), 1);

        let forced = client.refresh(RefreshMode::Forced).await.unwrap();
        assert!(matches!(forced, RefreshOutcome::Refreshed(_)));
        assert_eq!(backend.calls(), 2);

        sleep(Duration::from_secs(2)).await;
        let later = client.refresh(RefreshMode::Scheduled).await.unwrap();
        assert!(matches!(later, RefreshOutcome::Refreshed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refresh_is_dropped() {
        let backend = backend();
        backend.set_latency(Duration::from_secs(1));
        let client = client(backend.clone());

        let running = tokio::spawn({
            let client = client.clone();
            async move { client.refresh(RefreshMode::Scheduled).await }
        });
        tokio::task::yield_now().await;

        assert_eq!(
            client.refresh(RefreshMode::Forced).await.unwrap(),
            RefreshOutcome::AlreadyInFlight
        );
        assert!(matches!(
            running.await.unwrap().unwrap(),
            RefreshOutcome::Refreshed(_)
        ));
        assert_eq!(backend.calls(), 1);
        assert_eq!(client.phase(), SyncPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_with_backoff_then_fails() {
        let backend = failing(&[StatusCode::TOO_MANY_REQUESTS; 4]);
        let client = client(backend.clone());

        let err = client.refresh(RefreshMode::Forced).await.unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited(_)));
        assert_eq!(backend.calls(), 4);

        let times = backend.dinner_calls.lock().unwrap().clone();
        let gaps: Vec<_> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, [3, 6, 12].map(Duration::from_secs).to_vec());
        assert_eq!(client.phase(), SyncPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_recovers_after_retry() {
        let backend = failing(&[StatusCode::TOO_MANY_REQUESTS]);
        let client = client(backend.clone());

        let outcome = client.refresh(RefreshMode::Scheduled).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let backend = failing(&[StatusCode::NOT_FOUND]);
        let client = client(backend.clone());

        let err = client.refresh(RefreshMode::Scheduled).await.unwrap_err();
        assert!(matches!(err, ServiceError::Backend(_)));
        assert_eq!(err.user_message(), "Service not found.");
        assert_eq!(backend.calls(), 1);

        // A failed cycle does not arm the throttle.
        let again = client.refresh(RefreshMode::Scheduled).await.unwrap();
        assert!(matches!(again, RefreshOutcome::Refreshed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn bookings_failure_degrades_to_empty_list() {
        let backend = backend();
        *backend.bookings_failure.lock().unwrap() = Some(StatusCode::INTERNAL_SERVER_ERROR);
        let client = client(backend);

        let RefreshOutcome::Refreshed(snapshot) = client.refresh(RefreshMode::Scheduled).await.unwrap() else {
            panic!("expected a refreshed snapshot");
        };
        assert_eq!(snapshot.dinners.len(), 1);
        assert!(snapshot.bookings.is_empty());
        assert!(snapshot.bookings_degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let backend = backend();
        backend.set_latency(Duration::from_secs(60));
        let client = client(backend);

        let err = client.refresh(RefreshMode::Scheduled).await.unwrap_err();
        assert!(matches!(err, ServiceError::Network(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn forced_refresh_supersedes_scheduled_retry() {
        let backend = failing(&[StatusCode::TOO_MANY_REQUESTS]);
        let client = client(backend.clone());
        let mut phases = client.phases();

        let waiting = tokio::spawn({
            let client = client.clone();
            async move { client.refresh(RefreshMode::Scheduled).await }
        });
        phases
            .wait_for(|phase| matches!(phase, SyncPhase::RetryScheduled { .. }))
            .await
            .unwrap();

        let forced = client.refresh(RefreshMode::Forced).await.unwrap();
        assert!(matches!(forced, RefreshOutcome::Refreshed(_)));
        assert_eq!(waiting.await.unwrap().unwrap(), RefreshOutcome::Superseded);
        assert_eq!(backend.calls(), 2);
    }
}
