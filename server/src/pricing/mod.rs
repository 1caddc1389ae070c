//! Booking price and loyalty calculation.
//!
//! All arithmetic is done with `Decimal`. Loyalty points are whole units where
//! one point is worth one unit of currency.
//!
//! The order of deductions is fixed: the promotion discount is taken off the
//! subtotal first, and loyalty points are then redeemed against the discounted
//! amount. The redemption cap is a ratio of that discounted amount.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Currency values are kept to two decimal places.
const DECIMAL_PLACES: u32 = 2;

/// Upper bound for a single unit price.
const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(u32),

    #[error("unit price must be non-negative, got {0}")]
    NegativeUnitPrice(Decimal),

    #[error("unit price exceeds maximum allowed, got {0}")]
    UnitPriceTooLarge(Decimal),

    #[error("loyalty points must be non-negative, got {0}")]
    NegativePoints(i64),

    #[error("redeeming {requested} points exceeds the cap of {cap}")]
    RedemptionExceedsCap { requested: i64, cap: i64 },

    #[error("invalid loyalty policy: {0}")]
    InvalidPolicy(String),
}

/// Earn and redemption ratios applied to every booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoyaltyPolicy {
    earn_rate: Decimal,
    max_redemption_ratio: Decimal,
}

impl LoyaltyPolicy {
    pub fn new(earn_rate: Decimal, max_redemption_ratio: Decimal) -> Result<Self, PricingError> {
        let unit = Decimal::ZERO..=Decimal::ONE;
        if !unit.contains(&earn_rate) {
            return Err(PricingError::InvalidPolicy(format!(
                "earn rate must be between 0 and 1, got {}",
                earn_rate
            )));
        }
        if !unit.contains(&max_redemption_ratio) {
            return Err(PricingError::InvalidPolicy(format!(
                "max redemption ratio must be between 0 and 1, got {}",
                max_redemption_ratio
            )));
        }
        Ok(Self {
            earn_rate,
            max_redemption_ratio,
        })
    }

    pub fn earn_rate(&self) -> Decimal {
        self.earn_rate
    }

    pub fn max_redemption_ratio(&self) -> Decimal {
        self.max_redemption_ratio
    }

    /// Largest number of points that may be redeemed against `amount`.
    pub fn redemption_cap(&self, amount: Decimal) -> i64 {
        floor_points(amount * self.max_redemption_ratio)
    }

    /// Points earned for an amount actually paid.
    pub fn points_earned(&self, amount_paid: Decimal) -> i64 {
        floor_points(amount_paid * self.earn_rate)
    }
}

impl Default for LoyaltyPolicy {
    /// 10% earned on the amount paid, at most 50% of the amount redeemable.
    fn default() -> Self {
        Self {
            earn_rate: Decimal::new(10, 2),
            max_redemption_ratio: Decimal::new(50, 2),
        }
    }
}

/// A resolved promotion discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Discount {
    /// Percentage of the subtotal, `0..=100`.
    Percentage(Decimal),
    FixedAmount(Decimal),
}

impl Discount {
    /// Amount taken off `subtotal`, never more than the subtotal itself.
    pub fn amount_off(&self, subtotal: Decimal) -> Decimal {
        let raw = match *self {
            Discount::Percentage(percent) => {
                let percent = percent.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
                subtotal * percent / Decimal::ONE_HUNDRED
            }
            Discount::FixedAmount(amount) => amount.max(Decimal::ZERO),
        };
        round_money(raw.min(subtotal))
    }
}

/// How many loyalty points the buyer wants to put towards the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    None,
    /// Redeem up to this many points.
    UpTo(i64),
    /// Redeem as many as the balance and cap allow.
    Max,
}

/// Everything needed to price a booking.
#[derive(Debug, Clone, Copy)]
pub struct QuoteInput {
    pub quantity: u32,
    pub unit_price: Decimal,
    pub discount: Option<Discount>,
    pub redemption: Redemption,
    pub available_points: i64,
}

/// Derived price breakdown for a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSummary {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub loyalty_points_used: i64,
    /// Projection for the quoted total. The credited value is recomputed on
    /// the amount actually paid.
    pub loyalty_points_earned: i64,
    pub total: Decimal,
}

/// Calculator bound to a loyalty policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingCalculator {
    policy: LoyaltyPolicy,
}

impl BookingCalculator {
    pub fn new(policy: LoyaltyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LoyaltyPolicy {
        &self.policy
    }

    /// `quantity × unit_price`, exact.
    pub fn subtotal(&self, quantity: u32, unit_price: Decimal) -> Result<Decimal, PricingError> {
        if quantity == 0 {
            return Err(PricingError::InvalidQuantity(quantity));
        }
        if unit_price.is_sign_negative() && !unit_price.is_zero() {
            return Err(PricingError::NegativeUnitPrice(unit_price));
        }
        if unit_price > MAX_UNIT_PRICE {
            return Err(PricingError::UnitPriceTooLarge(unit_price));
        }
        Ok(unit_price * Decimal::from(quantity))
    }

    /// Deducts `points` from `amount`, rejecting redemptions above the cap.
    pub fn apply_loyalty(&self, amount: Decimal, points: i64) -> Result<Decimal, PricingError> {
        if points < 0 {
            return Err(PricingError::NegativePoints(points));
        }
        let cap = self.policy.redemption_cap(amount);
        if points > cap {
            return Err(PricingError::RedemptionExceedsCap {
                requested: points,
                cap,
            });
        }
        Ok((amount - Decimal::from(points)).max(Decimal::ZERO))
    }

    /// Number of points actually redeemed for a request, after clamping to the
    /// balance and the cap.
    pub fn clamp_redemption(&self, amount: Decimal, redemption: Redemption, available: i64) -> i64 {
        let cap = self.policy.redemption_cap(amount).min(available.max(0));
        match redemption {
            Redemption::None => 0,
            Redemption::UpTo(requested) => requested.clamp(0, cap),
            Redemption::Max => cap,
        }
    }

    /// Prices a booking: discount first, then loyalty redemption.
    pub fn quote(&self, input: &QuoteInput) -> Result<BookingSummary, PricingError> {
        let subtotal = self.subtotal(input.quantity, input.unit_price)?;
        let discount = input
            .discount
            .map(|d| d.amount_off(subtotal))
            .unwrap_or(Decimal::ZERO);
        let discounted = subtotal - discount;

        let points = self.clamp_redemption(discounted, input.redemption, input.available_points);
        let total = self.apply_loyalty(discounted, points)?;

        Ok(BookingSummary {
            subtotal,
            discount,
            loyalty_points_used: points,
            loyalty_points_earned: self.policy.points_earned(total),
            total,
        })
    }
}

/// Rounds a monetary value to two places, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

fn floor_points(value: Decimal) -> i64 {
    value.floor().to_i64().unwrap_or(0).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn calculator() -> BookingCalculator {
        BookingCalculator::default()
    }

    #[test]
    fn test_subtotal_is_exact() {
        let calc = calculator();
        assert_eq!(calc.subtotal(3, dec("19.99")).unwrap(), dec("59.97"));
        assert_eq!(calc.subtotal(1, Decimal::ZERO).unwrap(), Decimal::ZERO);
        assert_eq!(calc.subtotal(7, dec("0.10")).unwrap(), dec("0.70"));
    }

    #[test]
    fn test_subtotal_rejects_zero_quantity_and_negative_price() {
        let calc = calculator();
        assert_eq!(
            calc.subtotal(0, dec("10")),
            Err(PricingError::InvalidQuantity(0))
        );
        assert_eq!(
            calc.subtotal(1, dec("-1")),
            Err(PricingError::NegativeUnitPrice(dec("-1")))
        );
    }

    #[test]
    fn test_reference_booking() {
        let summary = calculator()
            .quote(&QuoteInput {
                quantity: 2,
                unit_price: dec("4465"),
                discount: None,
                redemption: Redemption::UpTo(2000),
                available_points: 5000,
            })
            .unwrap();

        assert_eq!(summary.subtotal, dec("8930"));
        assert_eq!(summary.discount, Decimal::ZERO);
        assert_eq!(summary.loyalty_points_used, 2000);
        assert_eq!(summary.total, dec("6930"));
        assert_eq!(summary.loyalty_points_earned, 693);
    }

    #[test]
    fn test_apply_loyalty_rejects_over_cap() {
        let calc = calculator();
        assert_eq!(calc.apply_loyalty(dec("100"), 50).unwrap(), dec("50"));
        assert_eq!(
            calc.apply_loyalty(dec("100"), 51),
            Err(PricingError::RedemptionExceedsCap {
                requested: 51,
                cap: 50
            })
        );
        assert_eq!(
            calc.apply_loyalty(dec("100"), -1),
            Err(PricingError::NegativePoints(-1))
        );
    }

    #[test]
    fn test_quote_clamps_to_cap_and_balance() {
        let calc = calculator();
        let base = QuoteInput {
            quantity: 1,
            unit_price: dec("1000"),
            discount: None,
            redemption: Redemption::UpTo(900),
            available_points: 10_000,
        };
        assert_eq!(calc.quote(&base).unwrap().loyalty_points_used, 500);

        let low_balance = QuoteInput {
            available_points: 120,
            ..base
        };
        let summary = calc.quote(&low_balance).unwrap();
        assert_eq!(summary.loyalty_points_used, 120);
        assert_eq!(summary.total, dec("880"));

        let max = QuoteInput {
            redemption: Redemption::Max,
            available_points: 10_000,
            ..base
        };
        assert_eq!(calc.quote(&max).unwrap().loyalty_points_used, 500);
    }

    #[test]
    fn test_discount_applies_before_loyalty() {
        let summary = calculator()
            .quote(&QuoteInput {
                quantity: 2,
                unit_price: dec("500"),
                discount: Some(Discount::Percentage(dec("20"))),
                redemption: Redemption::Max,
                available_points: 10_000,
            })
            .unwrap();

        assert_eq!(summary.subtotal, dec("1000"));
        assert_eq!(summary.discount, dec("200"));
        // cap is 50% of the discounted 800
        assert_eq!(summary.loyalty_points_used, 400);
        assert_eq!(summary.total, dec("400"));
        assert_eq!(summary.loyalty_points_earned, 40);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_subtotal() {
        let summary = calculator()
            .quote(&QuoteInput {
                quantity: 1,
                unit_price: dec("300"),
                discount: Some(Discount::FixedAmount(dec("500"))),
                redemption: Redemption::Max,
                available_points: 100,
            })
            .unwrap();

        assert_eq!(summary.discount, dec("300"));
        assert_eq!(summary.loyalty_points_used, 0);
        assert_eq!(summary.total, Decimal::ZERO);
        assert_eq!(summary.loyalty_points_earned, 0);
    }

    #[test]
    fn test_percentage_discount_rounds_to_cents() {
        let off = Discount::Percentage(dec("15")).amount_off(dec("33.33"));
        assert_eq!(off, dec("5.00"));
    }

    #[test]
    fn test_points_earned_floors_and_never_negative() {
        let policy = LoyaltyPolicy::default();
        assert_eq!(policy.points_earned(dec("6930")), 693);
        assert_eq!(policy.points_earned(dec("99.99")), 9);
        assert_eq!(policy.points_earned(dec("9.99")), 0);
        assert_eq!(policy.points_earned(Decimal::ZERO), 0);
    }

    #[test]
    fn test_total_properties_over_a_grid() {
        let calc = calculator();
        for quantity in 1..=6u32 {
            for price in ["0", "1", "9.50", "125.25", "4465"] {
                let unit_price = dec(price);
                let subtotal = calc.subtotal(quantity, unit_price).unwrap();
                let cap = calc.policy().redemption_cap(subtotal);
                for points in [0, cap / 2, cap] {
                    let total = calc.apply_loyalty(subtotal, points).unwrap();
                    assert_eq!(total, subtotal - Decimal::from(points));
                    assert!(total >= Decimal::ZERO);

                    let earned = calc.policy().points_earned(total);
                    assert!(earned >= 0);
                    assert!(Decimal::from(earned) <= total * dec("0.10"));
                    assert!(total * dec("0.10") - Decimal::from(earned) < Decimal::ONE);
                }
            }
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(LoyaltyPolicy::new(dec("0.1"), dec("0.5")).is_ok());
        assert!(matches!(
            LoyaltyPolicy::new(dec("1.5"), dec("0.5")),
            Err(PricingError::InvalidPolicy(_))
        ));
        assert!(matches!(
            LoyaltyPolicy::new(dec("0.1"), dec("-0.5")),
            Err(PricingError::InvalidPolicy(_))
        ));
    }
}
