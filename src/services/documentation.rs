use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Shared Table Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::open_session,
        crate::routes::sessions::close_session,
        crate::routes::sessions::refresh,
        crate::routes::sessions::list_dinners,
        crate::routes::bookings::list_bookings,
        crate::routes::bookings::reserve,
        crate::routes::bookings::countdown,
        crate::routes::bookings::check_in,
        crate::routes::bookings::cancel,
        crate::routes::bookings::sync,
        crate::routes::bookings::group,
        crate::routes::payment::list_payment_methods,
        crate::routes::payment::add_payment_method,
        crate::routes::payment::remove_payment_method,
        crate::routes::payment::set_default_payment_method,
        crate::routes::payment::release_authorization,
        crate::routes::sse::session_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::OpenSessionRequest,
            crate::dto::session::SessionResponse,
            crate::dto::session::RefreshRequest,
            crate::dto::session::RefreshResponse,
            crate::dto::booking::DinnerView,
            crate::dto::booking::BookingView,
            crate::dto::booking::CountdownResponse,
            crate::dto::booking::GroupMemberView,
            crate::dto::booking::ReserveRequest,
            crate::dto::payment::PaymentSelectionInput,
            crate::dto::payment::PaymentMethodRefResponse,
            crate::dto::payment::PaymentMethodView,
            crate::dto::sse::Handshake,
            crate::dto::sse::CountdownTickEvent,
            crate::services::sync_service::SyncPhase,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session lifecycle and data refresh"),
        (name = "bookings", description = "Reservations, check-in and countdowns"),
        (name = "payment", description = "Payment methods and pending authorizations"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
/// OpenAPI document of the REST and SSE surface.
pub struct ApiDoc;
