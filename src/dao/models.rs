use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use utoipa::ToSchema;

/// Dinner time slot as published by the booking backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DinnerEntity {
    /// Stable identifier of the slot.
    pub id: String,
    /// Scheduled start, kept as the raw RFC 3339 string received on the wire.
    #[serde(default)]
    pub datetime: Option<String>,
    /// Maximum number of signups accepted for the slot.
    pub max_signups: u32,
    /// Number of signups already taken.
    pub current_signups: u32,
    /// Whether the slot accepts signups.
    pub status: DinnerStatus,
    /// Kind of dinner, when the backend distinguishes them.
    #[serde(default)]
    pub dinner_type: Option<DinnerType>,
}

impl DinnerEntity {
    /// Parse the scheduled instant, returning `None` when missing or malformed.
    pub fn scheduled_at(&self) -> Option<OffsetDateTime> {
        parse_instant(self.datetime.as_deref())
    }

    /// Whether a new booking can still be placed on this slot.
    pub fn has_capacity(&self) -> bool {
        self.current_signups < self.max_signups
    }
}

/// Parse an optional RFC 3339 instant.
pub fn parse_instant(raw: Option<&str>) -> Option<OffsetDateTime> {
    raw.and_then(|value| OffsetDateTime::parse(value.trim(), &Rfc3339).ok())
}

/// Availability of a dinner slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DinnerStatus {
    /// Signups are accepted.
    Open,
    /// Signups are closed.
    Closed,
    /// Any status this service does not know about.
    #[serde(other)]
    Other,
}

/// Audience of a dinner slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DinnerType {
    /// Regular mixed dinner.
    Regular,
    /// Singles-only dinner.
    Singles,
}

/// Lifecycle status of a reservation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Seat reserved, waiting for the group matching result.
    Pending,
    /// Matched into a group at a restaurant.
    Assigned,
    /// User checked in at the dinner.
    Attended,
    /// Dinner finished.
    Completed,
    /// Reservation cancelled by the user or the operations team.
    Cancelled,
}

impl BookingStatus {
    /// Completed and cancelled bookings accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Position along the forward path `pending -> assigned -> attended -> completed`.
    ///
    /// `Cancelled` sits outside the path and has no rank.
    pub fn rank(self) -> Option<u8> {
        match self {
            BookingStatus::Pending => Some(0),
            BookingStatus::Assigned => Some(1),
            BookingStatus::Attended => Some(2),
            BookingStatus::Completed => Some(3),
            BookingStatus::Cancelled => None,
        }
    }
}

/// Reservation record returned by the booking backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingEntity {
    /// Stable identifier of the booking.
    pub id: String,
    /// Slot this booking belongs to.
    pub dinner_id: String,
    /// Owner of the booking.
    pub user_id: String,
    /// Server-side status.
    pub status: BookingStatus,
    /// Payment method the hold was placed against.
    #[serde(default)]
    pub payment_method_id: Option<String>,
    /// Group and restaurant, populated once the booking is assigned.
    #[serde(default)]
    pub dinner_group: Option<DinnerGroupEntity>,
    /// Slot details when the backend joins them into the booking payload.
    #[serde(default)]
    pub dinner: Option<DinnerEntity>,
}

/// Matched dinner group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DinnerGroupEntity {
    /// Stable identifier of the group.
    pub id: String,
    /// Where the group meets.
    pub restaurant: RestaurantEntity,
    /// Table reserved for the group, once known.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Number of diners in the group.
    #[serde(default)]
    pub member_count: Option<u32>,
}

/// Restaurant hosting a dinner group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestaurantEntity {
    /// Display name.
    pub name: String,
    /// Street address.
    #[serde(default)]
    pub address: Option<String>,
    /// Kind of food served.
    #[serde(default)]
    pub cuisine: Option<String>,
}

/// Member of a dinner group as exposed to the other members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMemberEntity {
    /// Backend user identifier.
    pub user_id: String,
    /// Only the first name is shared with other members.
    pub first_name: String,
    /// Self-described occupation, if shared.
    #[serde(default)]
    pub occupation: Option<String>,
}

/// Saved payment method owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodEntity {
    /// Provider identifier of the method.
    pub id: String,
    /// Card network, e.g. `visa`.
    pub brand: String,
    /// Last four digits of the card.
    pub last4: String,
    /// Whether this method is preselected at checkout.
    #[serde(default)]
    pub is_default: bool,
}

/// Body of the atomic "hold and book" request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    /// Slot to book.
    pub dinner_id: String,
    /// Provider method the hold is placed on.
    pub payment_method_id: String,
    /// Keep the method on file after booking.
    pub save_payment_method: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn dinner_parses_scheduled_instant() {
        let dinner: DinnerEntity = serde_json::from_str(
            r#"{"id":"d1","datetime":"2025-03-10T19:00:00Z","max_signups":6,"current_signups":2,"status":"open","dinner_type":"singles"}"#,
        )
        .unwrap();

        assert_eq!(dinner.scheduled_at(), Some(datetime!(2025-03-10 19:00 UTC)));
        assert_eq!(dinner.dinner_type, Some(DinnerType::Singles));
        assert!(dinner.has_capacity());
    }

    #[test]
    fn malformed_datetime_is_none() {
        assert_eq!(parse_instant(Some("next tuesday")), None);
        assert_eq!(parse_instant(None), None);
    }

    #[test]
    fn unknown_dinner_status_collapses_to_other() {
        let status: DinnerStatus = serde_json::from_str(r#""archived""#).unwrap();
        assert_eq!(status, DinnerStatus::Other);
    }

    #[test]
    fn cancelled_has_no_rank() {
        assert_eq!(BookingStatus::Cancelled.rank(), None);
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(!BookingStatus::Attended.is_terminal());
    }
}
