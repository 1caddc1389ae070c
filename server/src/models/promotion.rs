use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::pricing::Discount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "promotion_kind", rename_all = "snake_case")]
pub enum PromotionKind {
    Percentage,
    FixedAmount,
}

/// A discount code.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub id: Uuid,
    pub code: String,
    pub kind: PromotionKind,
    pub value: Decimal,
    pub min_purchase: Decimal,
    /// Restricts the code to one event when set.
    pub event_id: Option<Uuid>,
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromotionError {
    #[error("discount code '{0}' is not active")]
    Inactive(String),

    #[error("discount code '{0}' has expired")]
    Expired(String),

    #[error("discount code '{0}' has reached its usage limit")]
    Exhausted(String),

    #[error("discount code '{0}' does not apply to this event")]
    WrongEvent(String),

    #[error("discount code '{code}' requires a minimum purchase of {min_purchase}")]
    BelowMinimum { code: String, min_purchase: Decimal },
}

impl Promotion {
    /// Checks the code against a booking and returns the discount to apply.
    pub fn resolve(
        &self,
        event_id: Uuid,
        subtotal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Discount, PromotionError> {
        if !self.is_active {
            return Err(PromotionError::Inactive(self.code.clone()));
        }
        if self.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(PromotionError::Expired(self.code.clone()));
        }
        if self
            .max_uses
            .is_some_and(|max_uses| self.current_uses >= max_uses)
        {
            return Err(PromotionError::Exhausted(self.code.clone()));
        }
        if self.event_id.is_some_and(|scoped| scoped != event_id) {
            return Err(PromotionError::WrongEvent(self.code.clone()));
        }
        if subtotal < self.min_purchase {
            return Err(PromotionError::BelowMinimum {
                code: self.code.clone(),
                min_purchase: self.min_purchase,
            });
        }

        Ok(match self.kind {
            PromotionKind::Percentage => Discount::Percentage(self.value),
            PromotionKind::FixedAmount => Discount::FixedAmount(self.value),
        })
    }

    /// Codes are matched case-insensitively.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }
}
