use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::json_body;
use crate::models::ProcessPaymentRequest;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

/// A declined charge is still a 200: the payment record says `failed` and the
/// client offers a retry.
pub async fn process_payment(
    State(state): State<AppState>,
    body: Result<Json<ProcessPaymentRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request = json_body(body)?;
    let result = state.bookings.process_payment(&request).await?;
    let message = if result.succeeded() {
        "Payment succeeded"
    } else {
        "Payment declined"
    };
    Ok(success(result, message))
}

pub async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let status = state.bookings.session_status(id).await?;
    Ok(success(status, "Payment status retrieved"))
}
