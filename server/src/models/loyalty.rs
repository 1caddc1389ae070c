use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Point balance of a user. One point is worth one unit of currency.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyAccount {
    pub user_id: Uuid,
    pub balance: i64,
    pub lifetime_earned: i64,
    pub lifetime_redeemed: i64,
    pub updated_at: DateTime<Utc>,
}

impl LoyaltyAccount {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance: 0,
            lifetime_earned: 0,
            lifetime_redeemed: 0,
            updated_at: Utc::now(),
        }
    }
}
