use std::{future::Future, sync::Arc, time::Duration};

use indexmap::IndexMap;
use time::OffsetDateTime;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        backend::AccessToken,
        models::{BookingEntity, BookingStatus, DinnerEntity},
    },
    error::ServiceError,
    services::sync_service::{SyncClient, SyncSnapshot},
    state::{
        booking::{BookingEvent, BookingStateMachine, PlanId, Planned, TransitionContext},
        clock::Clock,
        countdown::{self, CountdownState},
        events::EventHub,
        ticker::Ticker,
    },
};

/// A booking as tracked by a session: last server payload plus the local state machine.
#[derive(Debug, Clone)]
pub struct BookingRecord {
    /// Last payload received from the backend.
    pub entity: BookingEntity,
    /// Slot details, from the booking payload or the dinners list.
    pub dinner: Option<DinnerEntity>,
    /// Owner of the canonical status.
    pub machine: BookingStateMachine,
}

impl BookingRecord {
    fn new(entity: BookingEntity, dinner: Option<DinnerEntity>) -> Self {
        let machine = BookingStateMachine::new(entity.status);
        Self {
            entity,
            dinner,
            machine,
        }
    }

    /// Canonical status, owned by the state machine.
    pub fn status(&self) -> BookingStatus {
        self.machine.status()
    }

    /// Scheduled start of the dinner, when known and parseable.
    pub fn dinner_at(&self) -> Option<OffsetDateTime> {
        self.dinner.as_ref().and_then(DinnerEntity::scheduled_at)
    }

    /// Countdown for this booking at `now`.
    pub fn countdown(&self, now: OffsetDateTime) -> CountdownState {
        countdown::compute(now, self.dinner_at(), self.status())
    }
}

/// Result of [`UserSession::run_transition`].
#[derive(Debug)]
pub enum TransitionOutcome<T> {
    /// The event had already been applied; no work ran.
    Unchanged(BookingStatus),
    /// The work succeeded and the transition was committed.
    Applied {
        /// What the work returned.
        value: T,
        /// Status after the commit.
        status: BookingStatus,
    },
}

/// Everything the service keeps for one signed-in user.
pub struct UserSession {
    id: Uuid,
    user_id: String,
    token: AccessToken,
    ledger: RwLock<IndexMap<String, BookingRecord>>,
    dinners: RwLock<IndexMap<String, DinnerEntity>>,
    sync: SyncClient,
    events: EventHub,
    ticker: Mutex<Option<Ticker>>,
    poller: Mutex<Option<Ticker>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    transition_gate: Mutex<()>,
    transition_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl UserSession {
    /// Empty session; data arrives with the first refresh.
    pub fn new(
        user_id: String,
        token: AccessToken,
        sync: SyncClient,
        events: EventHub,
        transition_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token,
            ledger: RwLock::new(IndexMap::new()),
            dinners: RwLock::new(IndexMap::new()),
            sync,
            events,
            ticker: Mutex::new(None),
            poller: Mutex::new(None),
            background: Mutex::new(Vec::new()),
            transition_gate: Mutex::new(()),
            transition_timeout,
            clock,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Signed-in user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Credential used for backend calls.
    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Sync client of this session.
    pub fn sync(&self) -> &SyncClient {
        &self.sync
    }

    /// Event hub feeding the SSE stream.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Current wall-clock time as seen by guards and countdowns.
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Dinners from the last successful refresh, in backend order.
    pub async fn dinners(&self) -> Vec<DinnerEntity> {
        self.dinners.read().await.values().cloned().collect()
    }

    /// One dinner from the last refresh.
    pub async fn dinner(&self, dinner_id: &str) -> Option<DinnerEntity> {
        self.dinners.read().await.get(dinner_id).cloned()
    }

    /// All tracked bookings, in the order they were first seen.
    pub async fn bookings(&self) -> Vec<BookingRecord> {
        self.ledger.read().await.values().cloned().collect()
    }

    /// One tracked booking.
    pub async fn booking(&self, booking_id: &str) -> Option<BookingRecord> {
        self.ledger.read().await.get(booking_id).cloned()
    }

    /// Plan `event` on one booking, run `work`, then commit or abort the plan.
    ///
    /// The gate is held from planning to commit so a timer tick cannot interleave. `work` is
    /// bounded by the transition timeout; on error or timeout the plan is aborted and the
    /// booking keeps its status. Dropping the returned future mid-work aborts the plan as well.
    pub async fn run_transition<F, Fut, T>(
        &self,
        booking_id: &str,
        event: BookingEvent,
        work: F,
    ) -> Result<TransitionOutcome<T>, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let _gate = self.transition_gate.lock().await;
        let now = self.now();

        let planned = {
            let mut ledger = self.ledger.write().await;
            let record = ledger
                .get_mut(booking_id)
                .ok_or_else(|| ServiceError::NotFound(format!("booking {booking_id}")))?;
            discard_orphaned_plan(booking_id, record);
            let ctx = TransitionContext::local(now, record.dinner_at());
            record.machine.plan(event, &ctx).inspect_err(|err| {
                warn!(booking_id, ?event, error = %err, "transition rejected");
            })?
        };

        let plan = match planned {
            Planned::AlreadyApplied(status) => {
                debug!(booking_id, ?event, ?status, "transition already applied");
                return Ok(TransitionOutcome::Unchanged(status));
            }
            Planned::Transition(plan) => plan,
        };
        let mut pending = PendingPlan {
            ledger: &self.ledger,
            booking_id,
            plan_id: plan.id,
            armed: true,
        };

        let outcome = match timeout(self.transition_timeout, work()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        };

        let mut ledger = self.ledger.write().await;
        pending.armed = false;
        let Some(record) = ledger.get_mut(booking_id) else {
            return Err(ServiceError::NotFound(format!("booking {booking_id}")));
        };

        match outcome {
            Ok(value) => {
                let status = record.machine.apply(plan.id)?;
                info!(booking_id, ?event, from = ?plan.from, to = ?status, "transition applied");
                Ok(TransitionOutcome::Applied { value, status })
            }
            Err(err) => {
                if let Err(abort_err) = record.machine.abort(plan.id) {
                    warn!(
                        booking_id,
                        plan_id = %plan.id,
                        error = %abort_err,
                        "failed to abort transition after work error"
                    );
                }
                warn!(booking_id, ?event, error = %err, "transition aborted");
                Err(err)
            }
        }
    }

    /// Fold a server booking payload into the ledger. Returns whether the status changed.
    pub async fn merge_booking(&self, entity: BookingEntity) -> bool {
        let _gate = self.transition_gate.lock().await;
        let dinners = self.dinners.read().await;
        let mut ledger = self.ledger.write().await;
        merge_entity(&mut ledger, &dinners, entity, self.now())
    }

    /// Fold a sync snapshot into the session, returning the ids of bookings whose status changed
    /// or that appeared for the first time.
    ///
    /// When the bookings list is degraded, only dinners are updated.
    pub async fn apply_snapshot(&self, snapshot: &SyncSnapshot) -> Vec<String> {
        let _gate = self.transition_gate.lock().await;
        let now = self.now();

        let mut dinners = self.dinners.write().await;
        *dinners = snapshot
            .dinners
            .iter()
            .map(|dinner| (dinner.id.clone(), dinner.clone()))
            .collect();

        let mut ledger = self.ledger.write().await;
        for record in ledger.values_mut() {
            if let Some(dinner) = dinners.get(&record.entity.dinner_id) {
                record.dinner = Some(dinner.clone());
            }
        }

        if snapshot.bookings_degraded {
            debug!(session_id = %self.id, "bookings degraded this cycle; ledger kept as is");
            return Vec::new();
        }

        let mut changed = Vec::new();
        for entity in &snapshot.bookings {
            let id = entity.id.clone();
            if merge_entity(&mut ledger, &dinners, entity.clone(), now) {
                changed.push(id);
            }
        }

        ledger.retain(|id, _| {
            let present = snapshot.bookings.iter().any(|entity| &entity.id == id);
            if !present {
                info!(booking_id = %id, "booking no longer reported by backend; dropping");
            }
            present
        });

        changed
    }

    /// Complete every attended booking whose check-in window has elapsed.
    ///
    /// Returns `None` without touching anything when a transition is in progress.
    pub async fn try_auto_complete(&self) -> Option<Vec<String>> {
        let _gate = self.transition_gate.try_lock().ok()?;
        let now = self.now();

        let mut ledger = self.ledger.write().await;
        let mut completed = Vec::new();
        for (id, record) in ledger.iter_mut() {
            discard_orphaned_plan(id, record);
            if !record.countdown(now).auto_complete_eligible() {
                continue;
            }
            let ctx = TransitionContext::local(now, record.dinner_at());
            match record.machine.fire(BookingEvent::Complete, &ctx) {
                Ok(status) => {
                    info!(booking_id = %id, ?status, "booking auto-completed");
                    completed.push(id.clone());
                }
                Err(err) => warn!(booking_id = %id, error = %err, "auto-completion rejected"),
            }
        }
        Some(completed)
    }

    /// Install the countdown ticker, stopping any previous one.
    pub async fn install_ticker(&self, ticker: Ticker) {
        replace_ticker(&self.ticker, ticker).await;
    }

    /// Install the scheduled refresh ticker, stopping any previous one.
    pub async fn install_poller(&self, poller: Ticker) {
        replace_ticker(&self.poller, poller).await;
    }

    /// Whether the countdown ticker is alive.
    pub async fn ticker_running(&self) -> bool {
        is_running(&self.ticker).await
    }

    /// Whether the scheduled refresh is alive.
    pub async fn poller_running(&self) -> bool {
        is_running(&self.poller).await
    }

    /// Keep a background task alive until the session shuts down.
    pub async fn track(&self, handle: JoinHandle<()>) {
        let mut background = self.background.lock().await;
        background.retain(|task| !task.is_finished());
        background.push(handle);
    }

    /// Stop both tickers and every background task.
    pub async fn shutdown(&self) {
        for slot in [&self.ticker, &self.poller] {
            if let Some(ticker) = slot.lock().await.take() {
                ticker.stop().await;
            }
        }
        for task in self.background.lock().await.drain(..) {
            task.abort();
        }
        info!(session_id = %self.id, user_id = %self.user_id, "session shut down");
    }
}

async fn replace_ticker(slot: &Mutex<Option<Ticker>>, ticker: Ticker) {
    let previous = slot.lock().await.replace(ticker);
    if let Some(previous) = previous {
        previous.stop().await;
    }
}

async fn is_running(slot: &Mutex<Option<Ticker>>) -> bool {
    slot.lock().await.as_ref().is_some_and(Ticker::is_running)
}

/// Aborts a plan when `run_transition` is dropped between planning and commit.
struct PendingPlan<'a> {
    ledger: &'a RwLock<IndexMap<String, BookingRecord>>,
    booking_id: &'a str,
    plan_id: PlanId,
    armed: bool,
}

impl Drop for PendingPlan<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // A reader may hold the ledger right now; the next gate holder sweeps the plan then.
        let Ok(mut ledger) = self.ledger.try_write() else {
            warn!(
                booking_id = self.booking_id,
                plan_id = %self.plan_id,
                "ledger busy while dropping transition; plan left for the next gate holder"
            );
            return;
        };
        let Some(record) = ledger.get_mut(self.booking_id) else {
            return;
        };
        if record.machine.abort(self.plan_id).is_ok() {
            warn!(booking_id = self.booking_id, plan_id = %self.plan_id, "transition dropped mid-work; plan aborted");
        }
    }
}

/// Drop a plan no caller will ever commit.
///
/// Must only run under the transition gate: no transition is in flight then, so anything
/// pending was left by a cancelled `run_transition`.
fn discard_orphaned_plan(booking_id: &str, record: &mut BookingRecord) {
    if let Some(stale) = record.machine.discard_pending() {
        warn!(booking_id, plan_id = %stale.id, to = ?stale.to, "discarding orphaned transition plan");
    }
}

/// Insert or reconcile one booking. Returns whether the status changed or the booking is new.
fn merge_entity(
    ledger: &mut IndexMap<String, BookingRecord>,
    dinners: &IndexMap<String, DinnerEntity>,
    entity: BookingEntity,
    now: OffsetDateTime,
) -> bool {
    let dinner = entity
        .dinner
        .clone()
        .or_else(|| dinners.get(&entity.dinner_id).cloned());

    let Some(record) = ledger.get_mut(&entity.id) else {
        debug!(booking_id = %entity.id, status = ?entity.status, "tracking new booking");
        ledger.insert(entity.id.clone(), BookingRecord::new(entity, dinner));
        return true;
    };

    if dinner.is_some() {
        record.dinner = dinner;
    }
    discard_orphaned_plan(&entity.id, record);

    let ctx = TransitionContext::server(now, record.dinner_at());
    let changed = match record.machine.reconcile(entity.status, &ctx) {
        Ok(steps) => {
            if !steps.is_empty() {
                info!(booking_id = %entity.id, ?steps, "reconciled with server status");
            }
            !steps.is_empty()
        }
        Err(err) => {
            warn!(
                booking_id = %entity.id,
                local = ?record.status(),
                server = ?entity.status,
                error = %err,
                "ignoring server status that cannot be reached"
            );
            false
        }
    };
    record.entity = entity;
    changed
}
