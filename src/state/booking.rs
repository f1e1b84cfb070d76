use std::time::Instant;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    dao::models::BookingStatus,
    state::countdown::{self, CountdownState},
};

/// Triggers that can move a booking along its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookingEvent {
    /// The matching service placed the booking in a group.
    Assigned,
    /// The user checked in at the restaurant.
    CheckIn,
    /// The dinner is over (auto-completion tick or explicit completion event).
    Complete,
    /// The user or the operations team cancelled the booking.
    Cancel,
}

impl BookingEvent {
    /// Status reached once this event has been applied.
    pub fn target(self) -> BookingStatus {
        match self {
            BookingEvent::Assigned => BookingStatus::Assigned,
            BookingEvent::CheckIn => BookingStatus::Attended,
            BookingEvent::Complete => BookingStatus::Completed,
            BookingEvent::Cancel => BookingStatus::Cancelled,
        }
    }

    /// Event that moves a booking one step forward from `from`, if any.
    fn forward_from(from: BookingStatus) -> Option<Self> {
        match from {
            BookingStatus::Pending => Some(BookingEvent::Assigned),
            BookingStatus::Assigned => Some(BookingEvent::CheckIn),
            BookingStatus::Attended => Some(BookingEvent::Complete),
            BookingStatus::Completed | BookingStatus::Cancelled => None,
        }
    }
}

/// Who is asking for a transition.
///
/// Local triggers are subject to the wall-clock guards; server snapshots are authoritative and
/// only have to respect the transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// A user action or timer tick; guards apply.
    Local,
    /// A backend snapshot; only the graph applies.
    Server,
}

/// Wall-clock facts the guards are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    /// Wall-clock time the event is evaluated at.
    pub now: OffsetDateTime,
    /// Scheduled dinner start, if known.
    pub dinner_at: Option<OffsetDateTime>,
    /// Origin of the event.
    pub authority: Authority,
}

impl TransitionContext {
    /// Context for a user action or timer tick evaluated at `now`.
    pub fn local(now: OffsetDateTime, dinner_at: Option<OffsetDateTime>) -> Self {
        Self {
            now,
            dinner_at,
            authority: Authority::Local,
        }
    }

    /// Context for applying a server snapshot.
    pub fn server(now: OffsetDateTime, dinner_at: Option<OffsetDateTime>) -> Self {
        Self {
            now,
            dinner_at,
            authority: Authority::Server,
        }
    }
}

/// Error returned when an event is not allowed from the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Status the booking was in.
    pub from: BookingStatus,
    /// Rejected event.
    pub event: BookingEvent,
}

/// Error returned when an event is allowed by the graph but its time window is closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{event:?} is not eligible yet: {reason}")]
pub struct GuardViolation {
    /// Event whose guard failed.
    pub event: BookingEvent,
    /// User-facing reason the window is closed.
    pub reason: &'static str,
}

/// Errors that can occur when planning a booking transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    #[error("a transition is already pending")]
    AlreadyPending,
    /// The booking reached a terminal status.
    #[error("booking is {0:?} and accepts no further transitions")]
    Terminal(BookingStatus),
    /// The requested transition is not on the graph.
    #[error(transparent)]
    InvalidTransition(InvalidTransition),
    /// The transition is on the graph but its guard is false.
    #[error(transparent)]
    GuardViolation(GuardViolation),
}

/// Errors that can occur when applying a planned booking transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// No transition is currently pending.
    #[error("no transition is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("pending transition does not match")]
    IdMismatch {
        /// Id of the plan currently pending.
        expected: PlanId,
        /// Id that was passed in.
        got: PlanId,
    },
    /// Status changed since the plan was created.
    #[error("status changed during transition (expected {expected:?}, got {actual:?})")]
    StatusMismatch {
        /// Status the plan was created from.
        expected: BookingStatus,
        /// Status found at commit time.
        actual: BookingStatus,
    },
    /// Version changed since the plan was created.
    #[error("version mismatch during transition (expected {expected}, got {actual})")]
    VersionMismatch {
        /// Version the plan would produce.
        expected: usize,
        /// Version the commit would produce instead.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned booking transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortError {
    /// No transition is currently pending.
    #[error("no transition is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("transition plan does not match")]
    IdMismatch {
        /// Id of the plan currently pending.
        expected: PlanId,
        /// Id that was passed in.
        got: PlanId,
    },
}

/// Errors from a one-shot plan-and-apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Planning failed; nothing changed.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// The plan could not be committed.
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A validated transition that has not been committed yet.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Handle for [`BookingStateMachine::apply`] and [`BookingStateMachine::abort`].
    pub id: PlanId,
    /// Status before the transition.
    pub from: BookingStatus,
    /// Status after the transition.
    pub to: BookingStatus,
    /// Event that produced the plan.
    pub event: BookingEvent,
    /// Version the machine reaches once the plan is applied.
    pub version_next: usize,
    /// When the plan was recorded.
    pub pending_since: Instant,
}

/// Outcome of planning an event.
#[derive(Debug, Clone)]
pub enum Planned {
    /// The event was already applied; the booking stays in this status.
    AlreadyApplied(BookingStatus),
    /// A new transition is pending and must be applied or aborted.
    Transition(Plan),
}

/// Snapshot of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Committed status.
    pub status: BookingStatus,
    /// Number of transitions applied so far.
    pub version: usize,
    /// Target of the pending plan, if any.
    pub pending: Option<BookingStatus>,
}

/// State machine owning the canonical status of one booking.
#[derive(Debug, Clone)]
pub struct BookingStateMachine {
    status: BookingStatus,
    version: usize,
    pending: Option<Plan>,
}

impl BookingStateMachine {
    /// Start tracking a booking that is currently in `status`.
    pub fn new(status: BookingStatus) -> Self {
        Self {
            status,
            version: 0,
            pending: None,
        }
    }

    /// Inspect the current status.
    pub fn status(&self) -> BookingStatus {
        self.status
    }

    /// Whether a plan is waiting to be applied or aborted.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Create a snapshot of the current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Validate `event` against the graph and its guard, recording a pending plan.
    ///
    /// Re-delivering an event whose target is the current status, or a status the booking has
    /// already moved past on the happy path, is a no-op.
    pub fn plan(&mut self, event: BookingEvent, ctx: &TransitionContext) -> Result<Planned, PlanError> {
        let passed = matches!(
            (event.target().rank(), self.status.rank()),
            (Some(target), Some(current)) if target < current
        );
        if event.target() == self.status || passed {
            return Ok(Planned::AlreadyApplied(self.status));
        }

        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self.compute_transition(event, ctx)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.status,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };
        self.pending = Some(plan.clone());

        Ok(Planned::Transition(plan))
    }

    /// Commit a planned transition, returning the new status.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<BookingStatus, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.status != plan.from {
            return Err(ApplyError::StatusMismatch {
                expected: plan.from,
                actual: self.status,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.status = plan.to;
        self.version = plan.version_next;

        Ok(self.status)
    }

    /// Drop a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Drop whatever plan is pending, returning it.
    ///
    /// Only for callers that know no transition can be in flight, such as a holder of the
    /// session's transition gate cleaning up after a cancelled one.
    pub fn discard_pending(&mut self) -> Option<Plan> {
        self.pending.take()
    }

    /// Plan and immediately apply `event`, for transitions with no external work attached.
    pub fn fire(&mut self, event: BookingEvent, ctx: &TransitionContext) -> Result<BookingStatus, TransitionError> {
        match self.plan(event, ctx)? {
            Planned::AlreadyApplied(status) => Ok(status),
            Planned::Transition(plan) => Ok(self.apply(plan.id)?),
        }
    }

    /// Move towards a server-reported status one graph step at a time.
    ///
    /// Returns the statuses passed through. Stale snapshots (behind the local status) are
    /// ignored and yield an empty list.
    pub fn reconcile(
        &mut self,
        server: BookingStatus,
        ctx: &TransitionContext,
    ) -> Result<Vec<BookingStatus>, TransitionError> {
        let mut steps = Vec::new();
        if server == self.status {
            return Ok(steps);
        }

        if server == BookingStatus::Cancelled {
            self.fire(BookingEvent::Cancel, ctx)?;
            steps.push(self.status);
            return Ok(steps);
        }

        let (Some(target), Some(current)) = (server.rank(), self.status.rank()) else {
            // Local status is cancelled while the server still reports progress.
            return Err(PlanError::Terminal(self.status).into());
        };

        if target < current {
            return Ok(steps);
        }

        while self.status != server {
            let Some(event) = BookingEvent::forward_from(self.status) else {
                return Err(PlanError::Terminal(self.status).into());
            };
            self.fire(event, ctx)?;
            steps.push(self.status);
        }

        Ok(steps)
    }

    fn compute_transition(&self, event: BookingEvent, ctx: &TransitionContext) -> Result<BookingStatus, PlanError> {
        if self.status.is_terminal() {
            return Err(PlanError::Terminal(self.status));
        }

        let next = match (self.status, event) {
            (BookingStatus::Pending, BookingEvent::Assigned) => BookingStatus::Assigned,
            (BookingStatus::Assigned, BookingEvent::CheckIn) => {
                self.guard(event, ctx, CountdownState::check_in_eligible)?;
                BookingStatus::Attended
            }
            (BookingStatus::Attended, BookingEvent::Complete) => {
                self.guard(event, ctx, CountdownState::auto_complete_eligible)?;
                BookingStatus::Completed
            }
            (BookingStatus::Pending | BookingStatus::Assigned, BookingEvent::Cancel) => {
                BookingStatus::Cancelled
            }
            (from, event) => {
                return Err(PlanError::InvalidTransition(InvalidTransition { from, event }));
            }
        };

        Ok(next)
    }

    fn guard(
        &self,
        event: BookingEvent,
        ctx: &TransitionContext,
        eligible: fn(&CountdownState) -> bool,
    ) -> Result<(), PlanError> {
        if ctx.authority == Authority::Server {
            return Ok(());
        }

        let state = countdown::compute(ctx.now, ctx.dinner_at, self.status);
        if eligible(&state) {
            return Ok(());
        }

        let reason = match (state, event) {
            (CountdownState::Unknown, _) => "dinner time is unknown",
            (CountdownState::Known(c), BookingEvent::CheckIn) if c.elapsed_since_dinner.is_negative() => {
                "check-in opens when the dinner starts"
            }
            (CountdownState::Known(_), BookingEvent::CheckIn) => "check-in window has closed",
            _ => "check-in window has not elapsed",
        };

        Err(PlanError::GuardViolation(GuardViolation { event, reason }))
    }
}
