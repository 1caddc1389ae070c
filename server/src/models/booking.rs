use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::{BookingStep, Wizard};
use crate::pricing::{BookingSummary, Redemption};

/// Booking request as sent by the event page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub event_price_id: Uuid,
    pub quantity: i32,
    #[serde(default)]
    pub discount_code: Option<String>,
    #[serde(default)]
    pub use_loyalty_points: bool,
    /// Points the buyer wants to redeem. `None` redeems as many as allowed.
    #[serde(default)]
    pub loyalty_points: Option<i64>,
}

impl BookingRequest {
    pub fn redemption(&self) -> Redemption {
        redemption_for(self.use_loyalty_points, self.loyalty_points)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSelectionRequest {
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPromotionsRequest {
    #[serde(default)]
    pub discount_code: Option<String>,
    #[serde(default)]
    pub use_loyalty_points: bool,
    #[serde(default)]
    pub loyalty_points: Option<i64>,
}

impl ApplyPromotionsRequest {
    pub fn redemption(&self) -> Redemption {
        redemption_for(self.use_loyalty_points, self.loyalty_points)
    }
}

/// Server-held state of one booking wizard run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub event_price_id: Uuid,
    pub quantity: i32,
    pub discount_code: Option<String>,
    pub use_loyalty_points: bool,
    pub loyalty_points_requested: Option<i64>,
    #[serde(flatten)]
    pub wizard: Wizard,
    pub summary: BookingSummary,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingSession {
    pub fn new(
        request: &BookingRequest,
        discount_code: Option<String>,
        summary: BookingSummary,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            event_id: request.event_id,
            event_price_id: request.event_price_id,
            quantity: request.quantity,
            discount_code,
            use_loyalty_points: request.use_loyalty_points,
            loyalty_points_requested: request.loyalty_points,
            wizard: Wizard::new(),
            summary,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step(&self) -> BookingStep {
        self.wizard.step()
    }

    pub fn redemption(&self) -> Redemption {
        redemption_for(self.use_loyalty_points, self.loyalty_points_requested)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn redemption_for(use_points: bool, requested: Option<i64>) -> Redemption {
    match (use_points, requested) {
        (false, _) => Redemption::None,
        (true, Some(points)) => Redemption::UpTo(points),
        (true, None) => Redemption::Max,
    }
}
