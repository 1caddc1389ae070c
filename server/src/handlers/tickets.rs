use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::json_body;
use crate::models::BookTicketRequest;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn book_ticket(
    State(state): State<AppState>,
    body: Result<Json<BookTicketRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request = json_body(body)?;
    let booked = state.bookings.book_ticket(request.booking_id).await?;
    Ok(success(booked, "Ticket booked, awaiting payment"))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ticket = state.bookings.get_ticket(id).await?;
    Ok(success(ticket, "Ticket retrieved"))
}

/// Payload the client renders as the ticket QR image.
pub async fn ticket_qr(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let payload = state.bookings.qr_payload(id).await?;
    let encoded = serde_json::to_string(&payload)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    Ok(success(encoded, "QR payload generated"))
}

pub async fn mark_paid(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    if !state.config.enable_debug_endpoints {
        return Err(AppError::Forbidden(
            "Manual payment is disabled on this server".to_string(),
        ));
    }
    let result = state.bookings.mark_paid(id).await?;
    Ok(success(result, "Ticket marked as paid"))
}
