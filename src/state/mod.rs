/// Booking lifecycle state machine.
pub mod booking;
/// Wall-clock abstraction.
pub mod clock;
/// Countdown and time-window math.
pub mod countdown;
/// Per-session event broadcast.
pub mod events;
/// Per-user session state.
pub mod session;
/// Periodic background task handle.
pub mod ticker;

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{backend::BookingBackend, payment::PaymentProvider},
    error::ServiceError,
    services::hold_service::HoldCoordinator,
};

use self::{
    clock::{Clock, SystemClock},
    session::UserSession,
};

/// State handle shared by every handler.
pub type SharedState = Arc<AppState>;

/// Central application state: upstream clients, the hold coordinator and live sessions.
pub struct AppState {
    config: AppConfig,
    backend: Arc<dyn BookingBackend>,
    holds: HoldCoordinator,
    sessions: DashMap<Uuid, Arc<UserSession>>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn BookingBackend>,
        provider: Arc<dyn PaymentProvider>,
    ) -> SharedState {
        Self::with_clock(config, backend, provider, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an explicit time source.
    pub fn with_clock(
        config: AppConfig,
        backend: Arc<dyn BookingBackend>,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
    ) -> SharedState {
        let holds = HoldCoordinator::new(provider, backend.clone(), config.payment.request_timeout);
        Arc::new(Self {
            config,
            backend,
            holds,
            sessions: DashMap::new(),
            clock,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Booking backend client.
    pub fn backend(&self) -> &Arc<dyn BookingBackend> {
        &self.backend
    }

    /// Setup-intent and hold coordinator.
    pub fn holds(&self) -> &HoldCoordinator {
        &self.holds
    }

    /// Clock shared with every session.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Look up a live session.
    pub fn session(&self, id: Uuid) -> Result<Arc<UserSession>, ServiceError> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::NotFound(format!("session {id}")))
    }

    /// Register a live session.
    pub fn insert_session(&self, session: Arc<UserSession>) {
        self.sessions.insert(session.id(), session);
    }

    /// Unregister a session, returning it if it was live.
    pub fn remove_session(&self, id: Uuid) -> Option<Arc<UserSession>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Whether another live session still belongs to `user_id`.
    pub fn user_has_session(&self, user_id: &str) -> bool {
        self.sessions
            .iter()
            .any(|entry| entry.value().user_id() == user_id)
    }

    /// Identifiers of every live session.
    pub fn session_ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
