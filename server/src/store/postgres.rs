use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Settlement, Store, StoreError};
use crate::booking::{BookingStep, Wizard};
use crate::models::{BookingSession, Event, EventPrice, LoyaltyAccount, Payment, Promotion, Ticket};
use crate::pricing::BookingSummary;

/// Postgres SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and applies pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!("Successfully connected to database");

        sqlx::migrate!().run(&pool).await?;
        tracing::info!("Migrations run successfully");

        Ok(Self::new(pool))
    }
}

#[derive(FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    event_id: Uuid,
    event_price_id: Uuid,
    quantity: i32,
    discount_code: Option<String>,
    use_loyalty_points: bool,
    loyalty_points_requested: Option<i64>,
    step: BookingStep,
    ticket_id: Option<Uuid>,
    payment_intent_id: Option<Uuid>,
    subtotal: Decimal,
    discount: Decimal,
    loyalty_points_used: i64,
    loyalty_points_earned: i64,
    total: Decimal,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BookingRow> for BookingSession {
    fn from(row: BookingRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            event_price_id: row.event_price_id,
            quantity: row.quantity,
            discount_code: row.discount_code,
            use_loyalty_points: row.use_loyalty_points,
            loyalty_points_requested: row.loyalty_points_requested,
            wizard: Wizard::restore(row.step, row.ticket_id, row.payment_intent_id),
            summary: BookingSummary {
                subtotal: row.subtotal,
                discount: row.discount,
                loyalty_points_used: row.loyalty_points_used,
                loyalty_points_earned: row.loyalty_points_earned,
                total: row.total,
            },
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

#[async_trait]
impl Store for PgStore {
    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let events = sqlx::query_as::<_, Event>("SELECT * FROM events ORDER BY start_time")
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    async fn list_event_prices(&self, event_id: Uuid) -> Result<Vec<EventPrice>, StoreError> {
        let prices = sqlx::query_as::<_, EventPrice>(
            "SELECT * FROM event_prices WHERE event_id = $1 ORDER BY price DESC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(prices)
    }

    async fn get_event_price(&self, id: Uuid) -> Result<Option<EventPrice>, StoreError> {
        let price = sqlx::query_as::<_, EventPrice>("SELECT * FROM event_prices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(price)
    }

    async fn find_promotion(&self, code: &str) -> Result<Option<Promotion>, StoreError> {
        let promotion = sqlx::query_as::<_, Promotion>("SELECT * FROM promotions WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(promotion)
    }

    async fn loyalty_account(&self, user_id: Uuid) -> Result<LoyaltyAccount, StoreError> {
        let account = sqlx::query_as::<_, LoyaltyAccount>(
            "SELECT * FROM loyalty_accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account.unwrap_or_else(|| LoyaltyAccount::empty(user_id)))
    }

    async fn insert_booking(&self, booking: &BookingSession) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO bookings (
                id, user_id, event_id, event_price_id, quantity, discount_code,
                use_loyalty_points, loyalty_points_requested, step, ticket_id,
                payment_intent_id, subtotal, discount, loyalty_points_used,
                loyalty_points_earned, total, idempotency_key, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.event_id)
        .bind(booking.event_price_id)
        .bind(booking.quantity)
        .bind(&booking.discount_code)
        .bind(booking.use_loyalty_points)
        .bind(booking.loyalty_points_requested)
        .bind(booking.wizard.step())
        .bind(booking.wizard.ticket_id())
        .bind(booking.wizard.payment_intent_id())
        .bind(booking.summary.subtotal)
        .bind(booking.summary.discount)
        .bind(booking.summary.loyalty_points_used)
        .bind(booking.summary.loyalty_points_earned)
        .bind(booking.summary.total)
        .bind(&booking.idempotency_key)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict(
                "idempotency key already used".to_string(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<BookingSession>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(BookingSession::from))
    }

    async fn find_booking_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<BookingSession>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(
            "SELECT * FROM bookings WHERE user_id = $1 AND idempotency_key = $2",
        )
        .bind(user_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(BookingSession::from))
    }

    async fn update_booking(
        &self,
        booking: &BookingSession,
        expected: BookingStep,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings SET
                quantity = $2, discount_code = $3, use_loyalty_points = $4,
                loyalty_points_requested = $5, step = $6, ticket_id = $7,
                payment_intent_id = $8, subtotal = $9, discount = $10,
                loyalty_points_used = $11, loyalty_points_earned = $12, total = $13,
                updated_at = $14
            WHERE id = $1 AND step = $15
            "#,
        )
        .bind(booking.id)
        .bind(booking.quantity)
        .bind(&booking.discount_code)
        .bind(booking.use_loyalty_points)
        .bind(booking.loyalty_points_requested)
        .bind(booking.wizard.step())
        .bind(booking.wizard.ticket_id())
        .bind(booking.wizard.payment_intent_id())
        .bind(booking.summary.subtotal)
        .bind(booking.summary.discount)
        .bind(booking.summary.loyalty_points_used)
        .bind(booking.summary.loyalty_points_earned)
        .bind(booking.summary.total)
        .bind(booking.updated_at)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current: Option<BookingStep> =
                sqlx::query_scalar("SELECT step FROM bookings WHERE id = $1")
                    .bind(booking.id)
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match current {
                Some(step) => {
                    StoreError::Conflict(format!("booking {} moved to '{}'", booking.id, step))
                }
                None => StoreError::NotFound(format!("booking {}", booking.id)),
            });
        }
        Ok(())
    }

    async fn reserve_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let reserved = sqlx::query(
            r#"
            UPDATE event_prices
            SET available_quantity = available_quantity - $2, updated_at = NOW()
            WHERE id = $1 AND available_quantity >= $2
            "#,
        )
        .bind(ticket.event_price_id)
        .bind(ticket.quantity)
        .execute(&mut *tx)
        .await?;

        if reserved.rows_affected() == 0 {
            let available: Option<i32> =
                sqlx::query_scalar("SELECT available_quantity FROM event_prices WHERE id = $1")
                    .bind(ticket.event_price_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return match available {
                Some(available) => Err(StoreError::InsufficientStock {
                    available,
                    requested: ticket.quantity,
                }),
                None => Err(StoreError::NotFound(format!(
                    "event price {}",
                    ticket.event_price_id
                ))),
            };
        }

        if let Some(code) = &ticket.discount_code {
            let counted = sqlx::query(
                r#"
                UPDATE promotions SET current_uses = current_uses + 1
                WHERE code = $1 AND (max_uses IS NULL OR current_uses < max_uses)
                "#,
            )
            .bind(code)
            .execute(&mut *tx)
            .await?;
            if counted.rows_affected() == 0 {
                return Err(StoreError::PromotionExhausted(code.clone()));
            }
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO tickets (
                id, booking_id, user_id, event_id, event_price_id, quantity, code,
                is_paid, total_amount, discount_code, loyalty_points_used,
                loyalty_points_earned, paid_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.booking_id)
        .bind(ticket.user_id)
        .bind(ticket.event_id)
        .bind(ticket.event_price_id)
        .bind(ticket.quantity)
        .bind(&ticket.code)
        .bind(ticket.is_paid)
        .bind(ticket.total_amount)
        .bind(&ticket.discount_code)
        .bind(ticket.loyalty_points_used)
        .bind(ticket.loyalty_points_earned)
        .bind(ticket.paid_at)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // dropping the transaction rolls the stock back
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::Conflict(format!(
                    "booking {} already has a ticket",
                    ticket.booking_id
                )));
            }
            Err(err) => return Err(err.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ticket)
    }

    async fn list_event_tickets(&self, event_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let tickets = sqlx::query_as::<_, Ticket>(
            "SELECT * FROM tickets WHERE event_id = $1 ORDER BY created_at",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }

    async fn claim_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let paid: Option<bool> =
            sqlx::query_scalar("SELECT is_paid FROM tickets WHERE id = $1 FOR UPDATE")
                .bind(payment.ticket_id)
                .fetch_optional(&mut *tx)
                .await?;
        match paid {
            None => {
                return Err(StoreError::NotFound(format!(
                    "ticket {}",
                    payment.ticket_id
                )))
            }
            Some(true) => return Err(StoreError::AlreadyPaid(payment.ticket_id)),
            Some(false) => {}
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (
                id, ticket_id, booking_id, amount, currency, method, status,
                gateway_reference, failure_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(payment.id)
        .bind(payment.ticket_id)
        .bind(payment.booking_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.method)
        .bind(payment.status)
        .bind(&payment.gateway_reference)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // idx_payments_one_pending
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::Conflict(format!(
                    "ticket {} already has a payment in progress",
                    payment.ticket_id
                )));
            }
            Err(err) => return Err(err.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, gateway_reference = $3, failure_reason = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status)
        .bind(&payment.gateway_reference)
        .bind(&payment.failure_reason)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("payment {}", payment.id)));
        }
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    async fn settle_ticket(&self, settlement: &Settlement) -> Result<Ticket, StoreError> {
        let mut tx = self.pool.begin().await?;

        let ticket = sqlx::query_as::<_, Ticket>(
            r#"
            UPDATE tickets
            SET is_paid = TRUE, loyalty_points_used = $2, loyalty_points_earned = $3,
                paid_at = $4, updated_at = $4
            WHERE id = $1 AND is_paid = FALSE
            RETURNING *
            "#,
        )
        .bind(settlement.ticket_id)
        .bind(settlement.points_redeemed)
        .bind(settlement.points_earned)
        .bind(settlement.paid_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(ticket) = ticket else {
            let exists: Option<bool> =
                sqlx::query_scalar("SELECT is_paid FROM tickets WHERE id = $1")
                    .bind(settlement.ticket_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return match exists {
                Some(_) => Err(StoreError::AlreadyPaid(settlement.ticket_id)),
                None => Err(StoreError::NotFound(format!(
                    "ticket {}",
                    settlement.ticket_id
                ))),
            };
        };

        if settlement.points_redeemed > 0 {
            let debited = sqlx::query(
                r#"
                UPDATE loyalty_accounts
                SET balance = balance - $2, lifetime_redeemed = lifetime_redeemed + $2,
                    updated_at = $3
                WHERE user_id = $1 AND balance >= $2
                "#,
            )
            .bind(settlement.user_id)
            .bind(settlement.points_redeemed)
            .bind(settlement.paid_at)
            .execute(&mut *tx)
            .await?;

            if debited.rows_affected() == 0 {
                let balance: Option<i64> =
                    sqlx::query_scalar("SELECT balance FROM loyalty_accounts WHERE user_id = $1")
                        .bind(settlement.user_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(StoreError::InsufficientPoints {
                    balance: balance.unwrap_or(0),
                    requested: settlement.points_redeemed,
                });
            }
        }

        if settlement.points_earned > 0 {
            sqlx::query(
                r#"
                INSERT INTO loyalty_accounts (user_id, balance, lifetime_earned, lifetime_redeemed, updated_at)
                VALUES ($1, $2, $2, 0, $3)
                ON CONFLICT (user_id) DO UPDATE
                SET balance = loyalty_accounts.balance + EXCLUDED.balance,
                    lifetime_earned = loyalty_accounts.lifetime_earned + EXCLUDED.lifetime_earned,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(settlement.user_id)
            .bind(settlement.points_earned)
            .bind(settlement.paid_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ticket)
    }
}
