use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod booking;
pub mod health;
pub mod payment;
pub mod session;
pub mod sse;
pub mod validation;

/// Render an instant as RFC 3339.
pub(crate) fn format_instant(instant: OffsetDateTime) -> String {
    instant
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
