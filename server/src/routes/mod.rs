use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{bookings, events, health_check, loyalty, payments, tickets};
use crate::state::AppState;

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(events::list_events))
        .route("/events/:id", get(events::get_event))
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/quote", post(bookings::quote))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/selection", put(bookings::update_selection))
        .route("/bookings/:id/promotions", post(bookings::apply_promotions))
        .route("/bookings/:id/back", post(bookings::back_to_select))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/tickets/book", post(tickets::book_ticket))
        .route("/tickets/:id", get(tickets::get_ticket))
        .route("/tickets/:id/qr", get(tickets::ticket_qr))
        .route("/tickets/:id/mark-paid", post(tickets::mark_paid))
        .route("/Payment/process", post(payments::process_payment))
        .route("/Payment/session-status/:id", get(payments::session_status))
        .route("/users/:id/loyalty", get(loyalty::loyalty_balance))
        .route("/organizer/events/:id/report", get(events::sales_report))
}

pub fn create_routes(state: AppState) -> Router {
    let security = create_security_headers_layer(state.config.production);
    let cors = create_cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(security)
        .layer(cors)
}
