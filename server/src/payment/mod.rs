//! Card/wallet processing behind a trait so the booking flow does not depend
//! on a particular provider.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("payment gateway rejected the request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { reference: String },
    Declined { reason: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, GatewayError>;

    /// Returns an approved charge in full.
    async fn refund(&self, reference: &str, amount: Decimal) -> Result<(), GatewayError>;
}

/// Token prefix the simulated gateway declines.
pub const DECLINE_TOKEN_PREFIX: &str = "tok_decline";

/// Token prefix the simulated gateway treats as a provider outage.
pub const UNAVAILABLE_TOKEN_PREFIX: &str = "tok_unavailable";

/// Gateway used in development and tests. Approves every charge except the
/// test tokens above.
#[derive(Debug, Default, Clone)]
pub struct SimulatedGateway;

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        if request.payment_method.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "payment method is required".to_string(),
            ));
        }
        if request.amount.is_sign_negative() && !request.amount.is_zero() {
            return Err(GatewayError::InvalidRequest(format!(
                "amount must be non-negative, got {}",
                request.amount
            )));
        }
        if request.payment_method.starts_with(UNAVAILABLE_TOKEN_PREFIX) {
            return Err(GatewayError::Unavailable("simulated outage".to_string()));
        }
        if request.payment_method.starts_with(DECLINE_TOKEN_PREFIX) {
            tracing::info!(payment_id = %request.payment_id, "Simulated gateway declined charge");
            return Ok(ChargeOutcome::Declined {
                reason: "card declined".to_string(),
            });
        }

        tracing::info!(
            payment_id = %request.payment_id,
            amount = %request.amount,
            currency = %request.currency,
            "Simulated gateway approved charge"
        );
        Ok(ChargeOutcome::Approved {
            reference: format!("sim_{}", request.payment_id.simple()),
        })
    }

    async fn refund(&self, reference: &str, amount: Decimal) -> Result<(), GatewayError> {
        if !reference.starts_with("sim_") {
            return Err(GatewayError::InvalidRequest(format!(
                "unknown charge reference '{}'",
                reference
            )));
        }
        tracing::info!(%reference, %amount, "Simulated gateway refunded charge");
        Ok(())
    }
}
