use axum::extract::{Path, State};
use axum::response::Response;
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn loyalty_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let account = state.bookings.loyalty_account(user_id).await?;
    Ok(success(account, "Loyalty balance retrieved"))
}
