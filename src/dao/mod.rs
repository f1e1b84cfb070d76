/// Booking backend client and transport errors.
pub mod backend;
/// Wire models shared with the booking backend.
pub mod models;
/// Payment provider client and errors.
pub mod payment;
