use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::json_body;
use crate::models::{ApplyPromotionsRequest, BookingRequest, UpdateSelectionRequest};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};
use crate::utils::IDEMPOTENCY_KEY_HEADER;

pub async fn quote(
    State(state): State<AppState>,
    body: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request = json_body(body)?;
    let summary = state.bookings.quote(&request).await?;
    Ok(success(summary, "Booking quoted"))
}

pub async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request = json_body(body)?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value.to_str().map(str::to_string).map_err(|_| {
                AppError::ValidationError("Idempotency-Key must be visible ASCII".to_string())
            })
        })
        .transpose()?;

    let result = state
        .bookings
        .create_booking(&request, idempotency_key)
        .await?;
    if result.created {
        Ok(created(result.booking, "Booking created"))
    } else {
        Ok(success(result.booking, "Booking already exists"))
    }
}

pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let booking = state.bookings.get_booking(id).await?;
    Ok(success(booking, "Booking retrieved"))
}

pub async fn update_selection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateSelectionRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request = json_body(body)?;
    let booking = state.bookings.update_selection(id, request.quantity).await?;
    Ok(success(booking, "Selection updated"))
}

pub async fn apply_promotions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Result<Json<ApplyPromotionsRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request = json_body(body)?;
    let booking = state.bookings.apply_promotions(id, &request).await?;
    Ok(success(booking, "Promotions applied"))
}

pub async fn back_to_select(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let booking = state.bookings.back_to_select(id).await?;
    Ok(success(booking, "Returned to ticket selection"))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let booking = state.bookings.cancel(id).await?;
    Ok(success(booking, "Booking cancelled"))
}
