//! Time-window arithmetic for a single dinner.
//!
//! Everything here is a pure function of `now`, the scheduled instant and the booking status, so
//! callers can recompute on every tick without keeping any state around.

use time::{Duration, OffsetDateTime};

use crate::dao::models::BookingStatus;

/// Length of the pre-dinner window tracked by [`Countdown::window_progress`].
pub const PRE_DINNER_WINDOW: Duration = Duration::hours(24);
/// How long after the scheduled start a check-in is accepted.
pub const CHECK_IN_WINDOW: Duration = Duration::minutes(90);
/// How long before the scheduled start the attendance actions become relevant.
pub const STATUS_BUTTONS_LEAD: Duration = Duration::hours(2);

/// Time left until the dinner, floored to whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemainingTime {
    /// Total whole hours (not wrapped at 24).
    pub hours: u64,
    /// Minutes within the hour.
    pub minutes: u8,
    /// Seconds within the minute.
    pub seconds: u8,
}

impl RemainingTime {
    fn from_duration(remaining: Duration) -> Self {
        if remaining <= Duration::ZERO {
            return Self::default();
        }

        let total = remaining.whole_seconds() as u64;
        Self {
            hours: total / 3_600,
            minutes: ((total % 3_600) / 60) as u8,
            seconds: (total % 60) as u8,
        }
    }

    /// Whether the countdown reached zero.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Derived time-window values for one booking at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Countdown {
    /// Time left until the dinner starts, zero once it has.
    pub remaining: RemainingTime,
    /// Linear progress through the 24 hours preceding the dinner, in `[0, 1]`.
    pub window_progress: f64,
    /// Signed time since the scheduled start; negative before the dinner.
    pub elapsed_since_dinner: Duration,
    /// Inside the check-in window of an assigned booking.
    pub check_in_eligible: bool,
    /// Attended and past the check-in window.
    pub auto_complete_eligible: bool,
    /// Close enough to the dinner to show status actions.
    pub status_buttons_visible: bool,
}

/// Result of a countdown computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CountdownState {
    /// The dinner instant is known and the values are meaningful.
    Known(Countdown),
    /// The dinner instant is missing or could not be parsed.
    Unknown,
}

impl CountdownState {
    /// Borrow the countdown when known.
    pub fn known(&self) -> Option<&Countdown> {
        match self {
            CountdownState::Known(countdown) => Some(countdown),
            CountdownState::Unknown => None,
        }
    }

    /// Check-in eligibility, false when the instant is unknown.
    pub fn check_in_eligible(&self) -> bool {
        self.known().is_some_and(|c| c.check_in_eligible)
    }

    /// Auto-completion eligibility, false when the instant is unknown.
    pub fn auto_complete_eligible(&self) -> bool {
        self.known().is_some_and(|c| c.auto_complete_eligible)
    }
}

/// Compute the countdown for a booking in `status` whose dinner starts at `dinner_at`.
pub fn compute(
    now: OffsetDateTime,
    dinner_at: Option<OffsetDateTime>,
    status: BookingStatus,
) -> CountdownState {
    let Some(dinner_at) = dinner_at else {
        return CountdownState::Unknown;
    };

    let until_dinner = dinner_at - now;
    let elapsed = now - dinner_at;

    CountdownState::Known(Countdown {
        remaining: RemainingTime::from_duration(until_dinner),
        window_progress: window_progress(now, dinner_at),
        elapsed_since_dinner: elapsed,
        check_in_eligible: status == BookingStatus::Assigned
            && elapsed >= Duration::ZERO
            && elapsed < CHECK_IN_WINDOW,
        auto_complete_eligible: status == BookingStatus::Attended && elapsed >= CHECK_IN_WINDOW,
        status_buttons_visible: until_dinner <= STATUS_BUTTONS_LEAD,
    })
}

/// Progress through the pre-dinner window: 0 at `dinner_at - 24h`, 1 at `dinner_at`.
pub fn window_progress(now: OffsetDateTime, dinner_at: OffsetDateTime) -> f64 {
    let window_start = dinner_at - PRE_DINNER_WINDOW;
    if now <= window_start {
        return 0.0;
    }
    if now >= dinner_at {
        return 1.0;
    }

    let progressed = (now - window_start).as_seconds_f64() / PRE_DINNER_WINDOW.as_seconds_f64();
    progressed.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const DINNER: OffsetDateTime = datetime!(2025-03-10 19:00 UTC);

    fn known(now: OffsetDateTime, status: BookingStatus) -> Countdown {
        *compute(now, Some(DINNER), status).known().unwrap()
    }

    #[test]
    fn check_in_open_five_minutes_after_start() {
        let countdown = known(datetime!(2025-03-10 19:05 UTC), BookingStatus::Assigned);
        assert!(countdown.check_in_eligible);
        assert!(!countdown.auto_complete_eligible);
        assert!(countdown.remaining.is_zero());
        assert_eq!(countdown.window_progress, 1.0);
    }

    #[test]
    fn auto_completion_after_check_in_window() {
        let countdown = known(datetime!(2025-03-10 20:45 UTC), BookingStatus::Attended);
        assert!(countdown.auto_complete_eligible);
        assert!(!countdown.check_in_eligible);
    }

    #[test]
    fn check_in_window_is_half_open() {
        assert!(!known(datetime!(2025-03-10 18:59:59 UTC), BookingStatus::Assigned).check_in_eligible);
        assert!(known(DINNER, BookingStatus::Assigned).check_in_eligible);
        assert!(known(datetime!(2025-03-10 20:29:59 UTC), BookingStatus::Assigned).check_in_eligible);
        assert!(!known(datetime!(2025-03-10 20:30 UTC), BookingStatus::Assigned).check_in_eligible);
    }

    #[test]
    fn check_in_requires_assigned_status() {
        let now = datetime!(2025-03-10 19:10 UTC);
        for status in [
            BookingStatus::Pending,
            BookingStatus::Attended,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert!(!known(now, status).check_in_eligible, "{status:?}");
        }
    }

    #[test]
    fn auto_completion_starts_exactly_at_window_end() {
        assert!(!known(datetime!(2025-03-10 20:29:59 UTC), BookingStatus::Attended).auto_complete_eligible);
        assert!(known(datetime!(2025-03-10 20:30 UTC), BookingStatus::Attended).auto_complete_eligible);
        assert!(!known(datetime!(2025-03-10 21:00 UTC), BookingStatus::Assigned).auto_complete_eligible);
    }

    #[test]
    fn remaining_time_is_floored_total_hours() {
        let countdown = known(datetime!(2025-03-08 16:29:30.75 UTC), BookingStatus::Pending);
        assert_eq!(
            countdown.remaining,
            RemainingTime {
                hours: 50,
                minutes: 30,
                seconds: 29,
            }
        );
        assert!(!countdown.status_buttons_visible);
    }

    #[test]
    fn status_buttons_show_two_hours_before() {
        assert!(!known(datetime!(2025-03-10 16:59:59 UTC), BookingStatus::Assigned).status_buttons_visible);
        assert!(known(datetime!(2025-03-10 17:00 UTC), BookingStatus::Assigned).status_buttons_visible);
        assert!(known(datetime!(2025-03-11 02:00 UTC), BookingStatus::Assigned).status_buttons_visible);
    }

    #[test]
    fn window_progress_bounds() {
        assert_eq!(window_progress(datetime!(2025-03-08 19:00 UTC), DINNER), 0.0);
        assert_eq!(window_progress(datetime!(2025-03-09 19:00 UTC), DINNER), 0.0);
        assert_eq!(window_progress(datetime!(2025-03-10 07:00 UTC), DINNER), 0.5);
        assert_eq!(window_progress(DINNER, DINNER), 1.0);
        assert_eq!(window_progress(datetime!(2025-03-12 00:00 UTC), DINNER), 1.0);
    }

    #[test]
    fn window_progress_is_monotonic() {
        let mut now = datetime!(2025-03-09 12:00 UTC);
        let mut previous = 0.0;
        while now <= datetime!(2025-03-10 21:00 UTC) {
            let progress = window_progress(now, DINNER);
            assert!(progress >= previous, "progress went backwards at {now}");
            assert!((0.0..=1.0).contains(&progress));
            previous = progress;
            now += Duration::minutes(7);
        }
    }

    #[test]
    fn unknown_instant_yields_sentinel() {
        let state = compute(DINNER, None, BookingStatus::Assigned);
        assert_eq!(state, CountdownState::Unknown);
        assert!(!state.check_in_eligible());
        assert!(!state.auto_complete_eligible());
    }
}
