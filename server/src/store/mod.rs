//! Persistence for events, bookings, tickets, payments and loyalty balances.
//!
//! Stock reservation, payment claims and ticket settlement must be atomic in
//! every implementation. Two bookings racing for the last seats (or the last
//! use of a discount code) may not both win, a ticket has at most one
//! pending payment, and a ticket is settled at most once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::booking::BookingStep;
use crate::models::{
    BookingSession, Event, EventPrice, LoyaltyAccount, Payment, Promotion, Ticket,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("only {available} ticket(s) left, {requested} requested")]
    InsufficientStock { available: i32, requested: i32 },

    #[error("loyalty balance of {balance} is below the {requested} points to redeem")]
    InsufficientPoints { balance: i64, requested: i64 },

    #[error("ticket {0} is already paid")]
    AlreadyPaid(Uuid),

    #[error("discount code '{0}' has reached its usage limit")]
    PromotionExhausted(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Everything that changes when a ticket is paid.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub points_redeemed: i64,
    pub points_earned: i64,
    pub paid_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_events(&self) -> Result<Vec<Event>, StoreError>;

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    async fn list_event_prices(&self, event_id: Uuid) -> Result<Vec<EventPrice>, StoreError>;

    async fn get_event_price(&self, id: Uuid) -> Result<Option<EventPrice>, StoreError>;

    /// Looks a promotion up by its normalized code.
    async fn find_promotion(&self, code: &str) -> Result<Option<Promotion>, StoreError>;

    /// Returns an empty account for users that never earned points.
    async fn loyalty_account(&self, user_id: Uuid) -> Result<LoyaltyAccount, StoreError>;

    /// Fails with `Conflict` when the user already used the idempotency key.
    async fn insert_booking(&self, booking: &BookingSession) -> Result<(), StoreError>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<BookingSession>, StoreError>;

    async fn find_booking_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<BookingSession>, StoreError>;

    /// Writes the booking only if it is still at `expected` in the store,
    /// failing with `Conflict` otherwise.
    async fn update_booking(
        &self,
        booking: &BookingSession,
        expected: BookingStep,
    ) -> Result<(), StoreError>;

    /// Takes `ticket.quantity` seats from the tier, counts one use of the
    /// ticket's discount code and stores the unpaid ticket. Fails with
    /// `Conflict` when the booking already has a ticket and with
    /// `PromotionExhausted` when the code has no uses left.
    async fn reserve_ticket(&self, ticket: &Ticket) -> Result<(), StoreError>;

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError>;

    async fn list_event_tickets(&self, event_id: Uuid) -> Result<Vec<Ticket>, StoreError>;

    /// Stores a pending payment, claiming its ticket for one charge. Fails with
    /// `AlreadyPaid` for a paid ticket and `Conflict` while another payment
    /// for the ticket is still pending.
    async fn claim_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    /// Marks the ticket paid, debits redeemed points and credits earned points.
    async fn settle_ticket(&self, settlement: &Settlement) -> Result<Ticket, StoreError>;
}
