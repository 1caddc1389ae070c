use axum::extract::{Path, State};
use axum::response::Response;
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn list_events(State(state): State<AppState>) -> Result<Response, AppError> {
    let events = state.events.list_events().await?;
    Ok(success(events, "Events retrieved"))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let detail = state.events.event_detail(id).await?;
    Ok(success(detail, "Event retrieved"))
}

pub async fn sales_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let report = state.events.sales_report(id).await?;
    Ok(success(report, "Sales report generated"))
}
