/// Session lifecycle, reservations and booking transitions.
pub mod booking_service;
/// Countdown ticker driving auto-completion and tick events.
pub mod countdown_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Setup-intent coordination and the hold-and-book call.
pub mod hold_service;
/// Saved payment method management.
pub mod payment_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Throttled, retrying refresh of dinners and bookings.
pub mod sync_service;
