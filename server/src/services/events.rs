use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Event, EventDetail};
use crate::store::Store;
use crate::utils::AppError;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TierSales {
    pub event_price_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub paid_tickets: usize,
    pub quantity_sold: i64,
    /// Seats held by tickets that are booked but not paid yet.
    pub quantity_pending: i64,
    pub revenue: Decimal,
    pub loyalty_points_redeemed: i64,
    pub available_quantity: i32,
    pub total_quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesReport {
    pub event_id: Uuid,
    pub title: String,
    pub tiers: Vec<TierSales>,
    pub quantity_sold: i64,
    pub revenue: Decimal,
    pub loyalty_points_redeemed: i64,
}

/// Event listing and organizer reporting.
pub struct EventService {
    store: Arc<dyn Store>,
}

impl EventService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list_events(&self) -> Result<Vec<Event>, AppError> {
        Ok(self.store.list_events().await?)
    }

    pub async fn event_detail(&self, id: Uuid) -> Result<EventDetail, AppError> {
        let event = self.load_event(id).await?;
        let prices = self.store.list_event_prices(id).await?;
        Ok(EventDetail { event, prices })
    }

    /// Per-tier sales of an event. Revenue counts paid tickets only.
    pub async fn sales_report(&self, event_id: Uuid) -> Result<SalesReport, AppError> {
        let event = self.load_event(event_id).await?;
        let prices = self.store.list_event_prices(event_id).await?;
        let tickets = self.store.list_event_tickets(event_id).await?;

        let tiers: Vec<TierSales> = prices
            .into_iter()
            .map(|price| {
                let mut tier = TierSales {
                    event_price_id: price.id,
                    name: price.name,
                    unit_price: price.price,
                    paid_tickets: 0,
                    quantity_sold: 0,
                    quantity_pending: 0,
                    revenue: Decimal::ZERO,
                    loyalty_points_redeemed: 0,
                    available_quantity: price.available_quantity,
                    total_quantity: price.total_quantity,
                };
                for ticket in tickets.iter().filter(|t| t.event_price_id == price.id) {
                    if ticket.is_paid {
                        tier.paid_tickets += 1;
                        tier.quantity_sold += i64::from(ticket.quantity);
                        tier.revenue += ticket.total_amount;
                        tier.loyalty_points_redeemed += ticket.loyalty_points_used;
                    } else {
                        tier.quantity_pending += i64::from(ticket.quantity);
                    }
                }
                tier
            })
            .collect();

        Ok(SalesReport {
            event_id: event.id,
            title: event.title,
            quantity_sold: tiers.iter().map(|t| t.quantity_sold).sum(),
            revenue: tiers.iter().map(|t| t.revenue).sum(),
            loyalty_points_redeemed: tiers.iter().map(|t| t.loyalty_points_redeemed).sum(),
            tiers,
        })
    }

    async fn load_event(&self, id: Uuid) -> Result<Event, AppError> {
        self.store
            .get_event(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event '{}' was not found", id)))
    }
}
