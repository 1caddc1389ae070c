use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub event_price_id: Uuid,
    pub quantity: i32,
    /// Human readable code printed under the QR image.
    pub code: String,
    pub is_paid: bool,
    pub total_amount: Decimal,
    pub discount_code: Option<String>,
    pub loyalty_points_used: i64,
    pub loyalty_points_earned: i64,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn generate_code(id: &Uuid) -> String {
        let simple = id.simple().to_string().to_uppercase();
        format!("TKT-{}", &simple[..10])
    }

    pub fn qr_payload(&self) -> QrPayload {
        QrPayload {
            ticket_id: self.id,
            code: self.code.clone(),
            event_id: self.event_id,
            event_price_id: self.event_price_id,
            quantity: self.quantity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicketRequest {
    pub booking_id: Uuid,
}

/// Data encoded into the ticket QR image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub ticket_id: Uuid,
    pub code: String,
    pub event_id: Uuid,
    pub event_price_id: Uuid,
    pub quantity: i32,
}
