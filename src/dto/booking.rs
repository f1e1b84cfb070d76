use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dao::models::{
        BookingStatus, DinnerEntity, DinnerGroupEntity, DinnerStatus, DinnerType,
        GroupMemberEntity,
    },
    dto::{format_instant, payment::PaymentSelectionInput},
    state::{
        countdown::CountdownState,
        session::BookingRecord,
    },
};

/// Dinner slot as exposed to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct DinnerView {
    pub id: String,
    /// Raw scheduled instant as received from the backend.
    pub datetime: Option<String>,
    pub max_signups: u32,
    pub current_signups: u32,
    pub status: DinnerStatus,
    pub dinner_type: Option<DinnerType>,
    pub has_capacity: bool,
}

impl From<DinnerEntity> for DinnerView {
    fn from(entity: DinnerEntity) -> Self {
        let has_capacity = entity.has_capacity();
        Self {
            id: entity.id,
            datetime: entity.datetime,
            max_signups: entity.max_signups,
            current_signups: entity.current_signups,
            status: entity.status,
            dinner_type: entity.dinner_type,
            has_capacity,
        }
    }
}

/// Restaurant and table a booking was matched to.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupView {
    pub id: String,
    pub restaurant_name: String,
    pub restaurant_address: Option<String>,
    pub cuisine: Option<String>,
    pub table_name: Option<String>,
    pub member_count: Option<u32>,
}

impl From<DinnerGroupEntity> for GroupView {
    fn from(group: DinnerGroupEntity) -> Self {
        Self {
            id: group.id,
            restaurant_name: group.restaurant.name,
            restaurant_address: group.restaurant.address,
            cuisine: group.restaurant.cuisine,
            table_name: group.table_name,
            member_count: group.member_count,
        }
    }
}

/// Fellow diner in a matched group.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupMemberView {
    pub user_id: String,
    pub first_name: String,
    pub occupation: Option<String>,
}

impl From<GroupMemberEntity> for GroupMemberView {
    fn from(member: GroupMemberEntity) -> Self {
        Self {
            user_id: member.user_id,
            first_name: member.first_name,
            occupation: member.occupation,
        }
    }
}

/// Countdown values for one booking, or `unknown` when the dinner time is unavailable.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CountdownView {
    Known {
        hours: u64,
        minutes: u8,
        seconds: u8,
        window_progress: f64,
        /// Seconds since the scheduled start; negative before the dinner.
        elapsed_since_dinner_secs: i64,
        check_in_eligible: bool,
        auto_complete_eligible: bool,
        status_buttons_visible: bool,
    },
    Unknown,
}

impl From<CountdownState> for CountdownView {
    fn from(state: CountdownState) -> Self {
        match state {
            CountdownState::Known(c) => CountdownView::Known {
                hours: c.remaining.hours,
                minutes: c.remaining.minutes,
                seconds: c.remaining.seconds,
                window_progress: c.window_progress,
                elapsed_since_dinner_secs: c.elapsed_since_dinner.whole_seconds(),
                check_in_eligible: c.check_in_eligible,
                auto_complete_eligible: c.auto_complete_eligible,
                status_buttons_visible: c.status_buttons_visible,
            },
            CountdownState::Unknown => CountdownView::Unknown,
        }
    }
}

/// Actions the client may offer for a booking right now.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct BookingActions {
    pub check_in: bool,
    pub cancel: bool,
}

/// Booking with its derived countdown and available actions.
#[derive(Debug, Serialize, ToSchema)]
pub struct BookingView {
    pub id: String,
    pub dinner_id: String,
    pub status: BookingStatus,
    pub payment_method_id: Option<String>,
    pub dinner: Option<DinnerView>,
    pub group: Option<GroupView>,
    pub countdown: CountdownView,
    pub actions: BookingActions,
}

impl BookingView {
    /// Project a tracked booking at `now`.
    pub fn from_record(record: BookingRecord, now: OffsetDateTime) -> Self {
        let countdown = record.countdown(now);
        let status = record.status();
        let actions = BookingActions {
            check_in: countdown.check_in_eligible(),
            cancel: matches!(status, BookingStatus::Pending | BookingStatus::Assigned),
        };

        Self {
            id: record.entity.id,
            dinner_id: record.entity.dinner_id,
            status,
            payment_method_id: record.entity.payment_method_id,
            dinner: record.dinner.map(Into::into),
            group: record.entity.dinner_group.map(Into::into),
            countdown: countdown.into(),
            actions,
        }
    }
}

/// Countdown entry carried by the periodic tick event.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BookingCountdown {
    pub booking_id: String,
    pub status: BookingStatus,
    pub countdown: CountdownView,
}

impl BookingCountdown {
    pub fn from_record(record: &BookingRecord, now: OffsetDateTime) -> Self {
        Self {
            booking_id: record.entity.id.clone(),
            status: record.status(),
            countdown: record.countdown(now).into(),
        }
    }
}

/// Response of the single-booking countdown endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct CountdownResponse {
    /// Instant the values were computed at (RFC 3339).
    pub computed_at: String,
    #[serde(flatten)]
    pub booking: BookingCountdown,
}

impl CountdownResponse {
    pub fn new(record: &BookingRecord, now: OffsetDateTime) -> Self {
        Self {
            computed_at: format_instant(now),
            booking: BookingCountdown::from_record(record, now),
        }
    }
}

/// Request body to reserve a seat at a dinner.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReserveRequest {
    pub dinner_id: String,
    pub payment: PaymentSelectionInput,
}

impl Validate for ReserveRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.dinner_id.trim().is_empty() {
            let mut err = ValidationError::new("dinner_id_empty");
            err.message = Some("Please pick a dinner".into());
            errors.add("dinner_id", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::state::booking::BookingStateMachine;

    fn record(status: BookingStatus, datetime: Option<&str>) -> BookingRecord {
        let mut entity = crate::test_support::booking("b1", "d1", status);
        entity.dinner = datetime.map(|raw| crate::test_support::dinner("d1", raw));
        BookingRecord {
            dinner: entity.dinner.clone(),
            machine: BookingStateMachine::new(status),
            entity,
        }
    }

    #[test]
    fn view_exposes_check_in_inside_window() {
        let view = BookingView::from_record(
            record(BookingStatus::Assigned, Some("2025-03-10T19:00:00Z")),
            datetime!(2025-03-10 19:05 UTC),
        );
        assert!(view.actions.check_in);
        assert!(view.actions.cancel);
        assert!(matches!(
            view.countdown,
            CountdownView::Known {
                check_in_eligible: true,
                elapsed_since_dinner_secs: 300,
                ..
            }
        ));
    }

    #[test]
    fn unknown_time_serializes_as_sentinel() {
        let view = BookingView::from_record(
            record(BookingStatus::Assigned, None),
            datetime!(2025-03-10 19:05 UTC),
        );
        assert!(!view.actions.check_in);
        let json = serde_json::to_value(&view.countdown).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "unknown" }));
    }

    #[test]
    fn attended_booking_cannot_be_cancelled() {
        let view = BookingView::from_record(
            record(BookingStatus::Attended, Some("2025-03-10T19:00:00Z")),
            datetime!(2025-03-10 19:30 UTC),
        );
        assert!(!view.actions.cancel);
    }

    #[test]
    fn reserve_requires_dinner_id() {
        let request: ReserveRequest = serde_json::from_str(
            r#"{"dinner_id":" ","payment":{"use_saved_method":true,"selected_method_id":"pm_1"}}"#,
        )
        .unwrap();
        assert!(request.validate().is_err());
    }
}
