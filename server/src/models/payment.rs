use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    /// Charged, then returned because the ticket could not be settled.
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub status: PaymentStatus,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn pending(
        ticket_id: Uuid,
        booking_id: Uuid,
        amount: Decimal,
        currency: &str,
        method: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            booking_id,
            amount,
            currency: currency.to_string(),
            method: method.to_string(),
            status: PaymentStatus::Pending,
            gateway_reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn succeed(&mut self, reference: String) {
        self.status = PaymentStatus::Succeeded;
        self.gateway_reference = Some(reference);
        self.failure_reason = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, reason: String) {
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason);
        self.updated_at = Utc::now();
    }

    pub fn refund(&mut self, reference: String, reason: String) {
        self.status = PaymentStatus::Refunded;
        self.gateway_reference = Some(reference);
        self.failure_reason = Some(reason);
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentRequest {
    pub ticket_id: Uuid,
    /// Opaque token handed to the gateway (card token, wallet id).
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSessionStatus {
    pub payment_id: Uuid,
    pub ticket_id: Uuid,
    pub booking_id: Uuid,
    pub status: PaymentStatus,
    pub is_paid: bool,
    pub amount: Decimal,
    pub currency: String,
    pub failure_reason: Option<String>,
}
