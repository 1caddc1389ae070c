use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Settlement, Store, StoreError};
use crate::booking::BookingStep;
use crate::models::{
    BookingSession, Event, EventPrice, LoyaltyAccount, Payment, PaymentStatus, Promotion,
    PromotionKind, Ticket,
};

#[derive(Default)]
struct Inner {
    events: HashMap<Uuid, Event>,
    prices: HashMap<Uuid, EventPrice>,
    promotions: HashMap<String, Promotion>,
    loyalty: HashMap<Uuid, LoyaltyAccount>,
    bookings: HashMap<Uuid, BookingSession>,
    tickets: HashMap<Uuid, Ticket>,
    payments: HashMap<Uuid, Payment>,
}

/// Process-local store. Every operation runs under one lock, which makes
/// reservation and settlement atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_event(&self, event: Event, prices: Vec<EventPrice>) {
        let mut inner = self.inner.lock().await;
        for price in prices {
            inner.prices.insert(price.id, price);
        }
        inner.events.insert(event.id, event);
    }

    pub async fn insert_promotion(&self, promotion: Promotion) {
        let mut inner = self.inner.lock().await;
        let code = Promotion::normalize_code(&promotion.code);
        inner.promotions.insert(code, promotion);
    }

    pub async fn set_loyalty_balance(&self, user_id: Uuid, balance: i64) {
        let mut inner = self.inner.lock().await;
        let account = inner
            .loyalty
            .entry(user_id)
            .or_insert_with(|| LoyaltyAccount::empty(user_id));
        account.balance = balance;
        account.updated_at = Utc::now();
    }

    /// Store preloaded with one event, two tiers, a promotion and a member
    /// holding loyalty points. Used when no database is configured.
    pub async fn with_demo_data() -> Self {
        let store = Self::new();
        let now = Utc::now();

        let event = Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            title: "Colombo Music Festival".to_string(),
            description: Some("Open air concert".to_string()),
            location: "Galle Face Green, Colombo".to_string(),
            start_time: now + Duration::days(30),
            end_time: Some(now + Duration::days(30) + Duration::hours(6)),
            created_at: now,
            updated_at: now,
        };
        let tier = |name: &str, price: i64, quantity: i32| EventPrice {
            id: Uuid::new_v4(),
            event_id: event.id,
            name: name.to_string(),
            description: None,
            price: Decimal::new(price, 0),
            total_quantity: quantity,
            available_quantity: quantity,
            created_at: now,
            updated_at: now,
        };
        let prices = vec![tier("VIP", 4465, 50), tier("General", 1500, 500)];
        let event_id = event.id;
        store.insert_event(event, prices).await;

        store
            .insert_promotion(Promotion {
                id: Uuid::new_v4(),
                code: "WELCOME10".to_string(),
                kind: PromotionKind::Percentage,
                value: Decimal::new(10, 0),
                min_purchase: Decimal::ZERO,
                event_id: Some(event_id),
                max_uses: Some(100),
                current_uses: 0,
                expires_at: None,
                is_active: true,
                created_at: now,
            })
            .await;

        let member = Uuid::new_v4();
        store.set_loyalty_balance(member, 2500).await;
        tracing::info!(%event_id, %member, "Seeded in-memory store with demo data");

        store
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.lock().await;
        let mut events: Vec<Event> = inner.events.values().cloned().collect();
        events.sort_by_key(|e| e.start_time);
        Ok(events)
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.inner.lock().await.events.get(&id).cloned())
    }

    async fn list_event_prices(&self, event_id: Uuid) -> Result<Vec<EventPrice>, StoreError> {
        let inner = self.inner.lock().await;
        let mut prices: Vec<EventPrice> = inner
            .prices
            .values()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect();
        prices.sort_by(|a, b| b.price.cmp(&a.price));
        Ok(prices)
    }

    async fn get_event_price(&self, id: Uuid) -> Result<Option<EventPrice>, StoreError> {
        Ok(self.inner.lock().await.prices.get(&id).cloned())
    }

    async fn find_promotion(&self, code: &str) -> Result<Option<Promotion>, StoreError> {
        Ok(self.inner.lock().await.promotions.get(code).cloned())
    }

    async fn loyalty_account(&self, user_id: Uuid) -> Result<LoyaltyAccount, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .loyalty
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| LoyaltyAccount::empty(user_id)))
    }

    async fn insert_booking(&self, booking: &BookingSession) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(key) = &booking.idempotency_key {
            let taken = inner.bookings.values().any(|b| {
                b.user_id == booking.user_id && b.idempotency_key.as_deref() == Some(key.as_str())
            });
            if taken {
                return Err(StoreError::Conflict(format!(
                    "idempotency key '{}' already used",
                    key
                )));
            }
        }
        inner.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<BookingSession>, StoreError> {
        Ok(self.inner.lock().await.bookings.get(&id).cloned())
    }

    async fn find_booking_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<BookingSession>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .bookings
            .values()
            .find(|b| b.user_id == user_id && b.idempotency_key.as_deref() == Some(idempotency_key))
            .cloned())
    }

    async fn update_booking(
        &self,
        booking: &BookingSession,
        expected: BookingStep,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.bookings.get_mut(&booking.id) {
            Some(stored) if stored.step() != expected => Err(StoreError::Conflict(format!(
                "booking {} moved to '{}'",
                booking.id,
                stored.step()
            ))),
            Some(stored) => {
                *stored = booking.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("booking {}", booking.id))),
        }
    }

    async fn reserve_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner
            .tickets
            .values()
            .any(|t| t.booking_id == ticket.booking_id)
        {
            return Err(StoreError::Conflict(format!(
                "booking {} already has a ticket",
                ticket.booking_id
            )));
        }

        if let Some(code) = &ticket.discount_code {
            let exhausted = inner.promotions.get(code).map_or(true, |p| {
                p.max_uses.is_some_and(|max_uses| p.current_uses >= max_uses)
            });
            if exhausted {
                return Err(StoreError::PromotionExhausted(code.clone()));
            }
        }

        let price = inner
            .prices
            .get_mut(&ticket.event_price_id)
            .ok_or_else(|| StoreError::NotFound(format!("event price {}", ticket.event_price_id)))?;
        if price.available_quantity < ticket.quantity {
            return Err(StoreError::InsufficientStock {
                available: price.available_quantity,
                requested: ticket.quantity,
            });
        }
        price.available_quantity -= ticket.quantity;
        price.updated_at = Utc::now();

        if let Some(promotion) = ticket
            .discount_code
            .as_ref()
            .and_then(|code| inner.promotions.get_mut(code))
        {
            promotion.current_uses += 1;
        }

        inner.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        Ok(self.inner.lock().await.tickets.get(&id).cloned())
    }

    async fn list_event_tickets(&self, event_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn claim_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.tickets.get(&payment.ticket_id) {
            None => {
                return Err(StoreError::NotFound(format!(
                    "ticket {}",
                    payment.ticket_id
                )))
            }
            Some(ticket) if ticket.is_paid => return Err(StoreError::AlreadyPaid(ticket.id)),
            Some(_) => {}
        }
        if inner
            .payments
            .values()
            .any(|p| p.ticket_id == payment.ticket_id && p.status == PaymentStatus::Pending)
        {
            return Err(StoreError::Conflict(format!(
                "ticket {} already has a payment in progress",
                payment.ticket_id
            )));
        }
        inner.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.payments.get_mut(&payment.id) {
            Some(stored) => {
                *stored = payment.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("payment {}", payment.id))),
        }
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.inner.lock().await.payments.get(&id).cloned())
    }

    async fn settle_ticket(&self, settlement: &Settlement) -> Result<Ticket, StoreError> {
        let mut inner = self.inner.lock().await;

        match inner.tickets.get(&settlement.ticket_id) {
            None => {
                return Err(StoreError::NotFound(format!(
                    "ticket {}",
                    settlement.ticket_id
                )))
            }
            Some(ticket) if ticket.is_paid => {
                return Err(StoreError::AlreadyPaid(ticket.id));
            }
            Some(_) => {}
        }

        let balance = inner
            .loyalty
            .get(&settlement.user_id)
            .map(|a| a.balance)
            .unwrap_or(0);
        if balance < settlement.points_redeemed {
            return Err(StoreError::InsufficientPoints {
                balance,
                requested: settlement.points_redeemed,
            });
        }

        let account = inner
            .loyalty
            .entry(settlement.user_id)
            .or_insert_with(|| LoyaltyAccount::empty(settlement.user_id));
        account.balance += settlement.points_earned - settlement.points_redeemed;
        account.lifetime_earned += settlement.points_earned;
        account.lifetime_redeemed += settlement.points_redeemed;
        account.updated_at = settlement.paid_at;

        let ticket = inner
            .tickets
            .get_mut(&settlement.ticket_id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", settlement.ticket_id)))?;
        ticket.is_paid = true;
        ticket.loyalty_points_used = settlement.points_redeemed;
        ticket.loyalty_points_earned = settlement.points_earned;
        ticket.paid_at = Some(settlement.paid_at);
        ticket.updated_at = settlement.paid_at;
        Ok(ticket.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookingRequest;
    use crate::pricing::BookingSummary;

    async fn store_with_tier(available: i32) -> (MemoryStore, EventPrice) {
        let store = MemoryStore::new();
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            title: "Test".to_string(),
            description: None,
            location: "Kandy".to_string(),
            start_time: now,
            end_time: None,
            created_at: now,
            updated_at: now,
        };
        let price = EventPrice {
            id: Uuid::new_v4(),
            event_id: event.id,
            name: "General".to_string(),
            description: None,
            price: Decimal::new(100, 0),
            total_quantity: available,
            available_quantity: available,
            created_at: now,
            updated_at: now,
        };
        store.insert_event(event, vec![price.clone()]).await;
        (store, price)
    }

    fn ticket_for(price: &EventPrice, user_id: Uuid, quantity: i32) -> Ticket {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Ticket {
            id,
            booking_id: Uuid::new_v4(),
            user_id,
            event_id: price.event_id,
            event_price_id: price.id,
            quantity,
            code: Ticket::generate_code(&id),
            is_paid: false,
            total_amount: price.price * Decimal::from(quantity),
            discount_code: None,
            loyalty_points_used: 0,
            loyalty_points_earned: 0,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_reserve_ticket_takes_stock() {
        let (store, price) = store_with_tier(3).await;
        let user = Uuid::new_v4();

        store.reserve_ticket(&ticket_for(&price, user, 2)).await.unwrap();
        let err = store
            .reserve_ticket(&ticket_for(&price, user, 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock {
                available: 1,
                requested: 2
            }
        ));

        let left = store.get_event_price(price.id).await.unwrap().unwrap();
        assert_eq!(left.available_quantity, 1);
    }

    #[tokio::test]
    async fn test_reserve_ticket_once_per_booking() {
        let (store, price) = store_with_tier(10).await;
        let first = ticket_for(&price, Uuid::new_v4(), 1);
        let mut second = ticket_for(&price, first.user_id, 1);
        second.booking_id = first.booking_id;

        store.reserve_ticket(&first).await.unwrap();
        assert!(matches!(
            store.reserve_ticket(&second).await,
            Err(StoreError::Conflict(_))
        ));
        let left = store.get_event_price(price.id).await.unwrap().unwrap();
        assert_eq!(left.available_quantity, 9);
    }

    #[tokio::test]
    async fn test_settle_moves_points_once() {
        let (store, price) = store_with_tier(10).await;
        let user = Uuid::new_v4();
        store.set_loyalty_balance(user, 300).await;
        let ticket = ticket_for(&price, user, 1);
        store.reserve_ticket(&ticket).await.unwrap();

        let settlement = Settlement {
            ticket_id: ticket.id,
            user_id: user,
            points_redeemed: 50,
            points_earned: 5,
            paid_at: Utc::now(),
        };
        let paid = store.settle_ticket(&settlement).await.unwrap();
        assert!(paid.is_paid);
        assert_eq!(paid.loyalty_points_earned, 5);

        let account = store.loyalty_account(user).await.unwrap();
        assert_eq!(account.balance, 255);
        assert_eq!(account.lifetime_redeemed, 50);

        assert!(matches!(
            store.settle_ticket(&settlement).await,
            Err(StoreError::AlreadyPaid(_))
        ));
        assert_eq!(store.loyalty_account(user).await.unwrap().balance, 255);
    }

    #[tokio::test]
    async fn test_settle_rejects_insufficient_points() {
        let (store, price) = store_with_tier(10).await;
        let user = Uuid::new_v4();
        store.set_loyalty_balance(user, 10).await;
        let ticket = ticket_for(&price, user, 1);
        store.reserve_ticket(&ticket).await.unwrap();

        let result = store
            .settle_ticket(&Settlement {
                ticket_id: ticket.id,
                user_id: user,
                points_redeemed: 40,
                points_earned: 6,
                paid_at: Utc::now(),
            })
            .await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientPoints {
                balance: 10,
                requested: 40
            })
        ));
        assert!(!store.get_ticket(ticket.id).await.unwrap().unwrap().is_paid);
    }

    #[tokio::test]
    async fn test_idempotency_key_is_unique_per_user() {
        let (store, price) = store_with_tier(10).await;
        let request = BookingRequest {
            user_id: Uuid::new_v4(),
            event_id: price.event_id,
            event_price_id: price.id,
            quantity: 1,
            discount_code: None,
            use_loyalty_points: false,
            loyalty_points: None,
        };
        let summary = BookingSummary {
            subtotal: price.price,
            discount: Decimal::ZERO,
            loyalty_points_used: 0,
            loyalty_points_earned: 10,
            total: price.price,
        };
        let key = Some("checkout-1".to_string());

        let first = BookingSession::new(&request, None, summary, key.clone());
        store.insert_booking(&first).await.unwrap();
        let again = BookingSession::new(&request, None, summary, key.clone());
        assert!(matches!(
            store.insert_booking(&again).await,
            Err(StoreError::Conflict(_))
        ));

        let other_user = BookingRequest {
            user_id: Uuid::new_v4(),
            ..request.clone()
        };
        let other = BookingSession::new(&other_user, None, summary, key);
        store.insert_booking(&other).await.unwrap();

        let found = store
            .find_booking_by_key(request.user_id, "checkout-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_reserve_ticket_respects_promotion_limit() {
        let (store, price) = store_with_tier(10).await;
        store
            .insert_promotion(Promotion {
                id: Uuid::new_v4(),
                code: "ONCE".to_string(),
                kind: PromotionKind::FixedAmount,
                value: Decimal::new(10, 0),
                min_purchase: Decimal::ZERO,
                event_id: None,
                max_uses: Some(1),
                current_uses: 0,
                expires_at: None,
                is_active: true,
                created_at: Utc::now(),
            })
            .await;

        let user = Uuid::new_v4();
        let mut first = ticket_for(&price, user, 1);
        first.discount_code = Some("ONCE".to_string());
        let mut second = ticket_for(&price, user, 2);
        second.discount_code = Some("ONCE".to_string());

        store.reserve_ticket(&first).await.unwrap();
        assert!(matches!(
            store.reserve_ticket(&second).await,
            Err(StoreError::PromotionExhausted(code)) if code == "ONCE"
        ));

        // the rejected ticket took neither seats nor a use
        let left = store.get_event_price(price.id).await.unwrap().unwrap();
        assert_eq!(left.available_quantity, 9);
        assert!(store.get_ticket(second.id).await.unwrap().is_none());

        store
            .settle_ticket(&Settlement {
                ticket_id: first.id,
                user_id: user,
                points_redeemed: 0,
                points_earned: 9,
                paid_at: Utc::now(),
            })
            .await
            .unwrap();
        let promotion = store.find_promotion("ONCE").await.unwrap().unwrap();
        assert_eq!(promotion.current_uses, 1);
    }

    #[tokio::test]
    async fn test_claim_payment_allows_one_pending_charge() {
        let (store, price) = store_with_tier(10).await;
        let ticket = ticket_for(&price, Uuid::new_v4(), 1);
        store.reserve_ticket(&ticket).await.unwrap();

        let pending = |method: &str| {
            Payment::pending(ticket.id, ticket.booking_id, ticket.total_amount, "LKR", method)
        };

        let mut first = pending("tok_visa");
        store.claim_payment(&first).await.unwrap();
        assert!(matches!(
            store.claim_payment(&pending("tok_visa")).await,
            Err(StoreError::Conflict(_))
        ));

        // a declined charge frees the ticket for a retry
        first.fail("card declined".to_string());
        store.update_payment(&first).await.unwrap();
        store.claim_payment(&pending("tok_visa")).await.unwrap();

        store
            .settle_ticket(&Settlement {
                ticket_id: ticket.id,
                user_id: ticket.user_id,
                points_redeemed: 0,
                points_earned: 10,
                paid_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(
            store.claim_payment(&pending("tok_visa")).await,
            Err(StoreError::AlreadyPaid(_))
        ));
    }

    #[tokio::test]
    async fn test_update_booking_rejects_stale_step() {
        let (store, price) = store_with_tier(10).await;
        let request = BookingRequest {
            user_id: Uuid::new_v4(),
            event_id: price.event_id,
            event_price_id: price.id,
            quantity: 1,
            discount_code: None,
            use_loyalty_points: false,
            loyalty_points: None,
        };
        let summary = BookingSummary {
            subtotal: price.price,
            discount: Decimal::ZERO,
            loyalty_points_used: 0,
            loyalty_points_earned: 10,
            total: price.price,
        };
        let booking = BookingSession::new(&request, None, summary, None);
        store.insert_booking(&booking).await.unwrap();

        let mut moved = booking.clone();
        moved.wizard.enter_promotions().unwrap();
        store
            .update_booking(&moved, BookingStep::Select)
            .await
            .unwrap();

        // a copy read before the move must not overwrite it
        let mut stale = booking.clone();
        stale.quantity = 3;
        assert!(matches!(
            store.update_booking(&stale, BookingStep::Select).await,
            Err(StoreError::Conflict(_))
        ));
        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.step(), BookingStep::Promotions);
        assert_eq!(stored.quantity, 1);
    }
}
