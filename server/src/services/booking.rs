use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::booking::BookingStep;
use crate::models::{
    ApplyPromotionsRequest, BookingRequest, BookingSession, EventPrice, LoyaltyAccount, Payment,
    PaymentSessionStatus, PaymentStatus, ProcessPaymentRequest, Promotion, QrPayload, Ticket,
};
use crate::payment::{ChargeOutcome, ChargeRequest, PaymentGateway};
use crate::pricing::{BookingCalculator, BookingSummary, QuoteInput, Redemption};
use crate::store::{Settlement, Store, StoreError};
use crate::utils::AppError;

/// Payment method recorded for debug settlements.
const MANUAL_METHOD: &str = "manual";

/// Reference recorded when nothing had to be charged.
const NO_CHARGE_REFERENCE: &str = "no_charge";

/// Outcome of a create-booking call.
#[derive(Debug, Clone)]
pub struct CreatedBooking {
    pub booking: BookingSession,
    /// False when an earlier booking with the same idempotency key was returned.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookedTicket {
    pub booking: BookingSession,
    pub ticket: Ticket,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub payment: Payment,
    pub ticket: Ticket,
    pub booking: BookingSession,
}

impl PaymentResult {
    pub fn succeeded(&self) -> bool {
        self.payment.status == PaymentStatus::Succeeded
    }
}

struct PricedSelection {
    discount_code: Option<String>,
    summary: BookingSummary,
}

/// Drives a booking from selection to confirmation.
pub struct BookingService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    calculator: BookingCalculator,
    currency: String,
    max_tickets_per_booking: i32,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        calculator: BookingCalculator,
        currency: impl Into<String>,
        max_tickets_per_booking: i32,
    ) -> Self {
        Self {
            store,
            gateway,
            calculator,
            currency: currency.into(),
            max_tickets_per_booking,
        }
    }

    /// Prices a request without creating anything.
    pub async fn quote(&self, request: &BookingRequest) -> Result<BookingSummary, AppError> {
        let priced = self
            .price_selection(
                request.user_id,
                request.event_id,
                request.event_price_id,
                request.quantity,
                request.discount_code.as_deref(),
                request.redemption(),
            )
            .await?;
        Ok(priced.summary)
    }

    pub async fn create_booking(
        &self,
        request: &BookingRequest,
        idempotency_key: Option<String>,
    ) -> Result<CreatedBooking, AppError> {
        let idempotency_key = idempotency_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.store.find_booking_by_key(request.user_id, key).await? {
                info!(booking_id = %existing.id, "Returning booking for repeated idempotency key");
                return Ok(CreatedBooking {
                    booking: existing,
                    created: false,
                });
            }
        }

        let priced = self
            .price_selection(
                request.user_id,
                request.event_id,
                request.event_price_id,
                request.quantity,
                request.discount_code.as_deref(),
                request.redemption(),
            )
            .await?;

        let booking = BookingSession::new(
            request,
            priced.discount_code,
            priced.summary,
            idempotency_key.clone(),
        );

        match self.store.insert_booking(&booking).await {
            Ok(()) => {
                info!(
                    booking_id = %booking.id,
                    user_id = %booking.user_id,
                    quantity = booking.quantity,
                    total = %booking.summary.total,
                    "Booking created"
                );
                Ok(CreatedBooking {
                    booking,
                    created: true,
                })
            }
            // lost a race against a submission with the same key
            Err(StoreError::Conflict(_)) if idempotency_key.is_some() => {
                let key = idempotency_key.unwrap_or_default();
                let existing = self
                    .store
                    .find_booking_by_key(request.user_id, &key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Conflict("Booking with this idempotency key is in flight".to_string())
                    })?;
                Ok(CreatedBooking {
                    booking: existing,
                    created: false,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_booking(&self, id: Uuid) -> Result<BookingSession, AppError> {
        self.store
            .get_booking(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking '{}' was not found", id)))
    }

    /// Changes the quantity. Only possible in the select step.
    pub async fn update_selection(&self, id: Uuid, quantity: i32) -> Result<BookingSession, AppError> {
        let mut booking = self.get_booking(id).await?;
        let from = booking.step();
        booking.wizard.ensure_selection_editable()?;

        let priced = self
            .price_selection(
                booking.user_id,
                booking.event_id,
                booking.event_price_id,
                quantity,
                booking.discount_code.as_deref(),
                booking.redemption(),
            )
            .await?;

        booking.quantity = quantity;
        booking.summary = priced.summary;
        self.save(&mut booking, from).await?;
        Ok(booking)
    }

    /// Enters (or re-enters) the promotions step with a new code and loyalty
    /// choice.
    pub async fn apply_promotions(
        &self,
        id: Uuid,
        request: &ApplyPromotionsRequest,
    ) -> Result<BookingSession, AppError> {
        let mut booking = self.get_booking(id).await?;
        let from = booking.step();
        let mut wizard = booking.wizard.clone();
        wizard.enter_promotions()?;

        let priced = self
            .price_selection(
                booking.user_id,
                booking.event_id,
                booking.event_price_id,
                booking.quantity,
                request.discount_code.as_deref(),
                request.redemption(),
            )
            .await?;

        booking.wizard = wizard;
        booking.discount_code = priced.discount_code;
        booking.use_loyalty_points = request.use_loyalty_points;
        booking.loyalty_points_requested = request.loyalty_points;
        booking.summary = priced.summary;
        self.save(&mut booking, from).await?;
        Ok(booking)
    }

    pub async fn back_to_select(&self, id: Uuid) -> Result<BookingSession, AppError> {
        let mut booking = self.get_booking(id).await?;
        let from = booking.step();
        booking.wizard.back_to_select()?;
        self.save(&mut booking, from).await?;
        Ok(booking)
    }

    pub async fn cancel(&self, id: Uuid) -> Result<BookingSession, AppError> {
        let mut booking = self.get_booking(id).await?;
        let from = booking.step();
        booking.wizard.cancel()?;
        self.save(&mut booking, from).await?;
        info!(booking_id = %booking.id, "Booking cancelled");
        Ok(booking)
    }

    /// Reserves stock and creates the unpaid ticket, moving the booking to the
    /// payment step. Repeated calls return the ticket created first.
    pub async fn book_ticket(&self, booking_id: Uuid) -> Result<BookedTicket, AppError> {
        let mut booking = self.get_booking(booking_id).await?;
        if let Some(ticket_id) = booking.wizard.ticket_id() {
            info!(%booking_id, %ticket_id, "Booking already has a ticket");
            let ticket = self.get_ticket(ticket_id).await?;
            return Ok(BookedTicket { booking, ticket });
        }

        let ticket_id = Uuid::new_v4();
        let from = booking.step();
        let mut wizard = booking.wizard.clone();
        wizard.begin_payment(ticket_id)?;

        // prices and balances may have moved since the promotions step
        let priced = self
            .price_selection(
                booking.user_id,
                booking.event_id,
                booking.event_price_id,
                booking.quantity,
                booking.discount_code.as_deref(),
                booking.redemption(),
            )
            .await?;

        let now = Utc::now();
        let ticket = Ticket {
            id: ticket_id,
            booking_id: booking.id,
            user_id: booking.user_id,
            event_id: booking.event_id,
            event_price_id: booking.event_price_id,
            quantity: booking.quantity,
            code: Ticket::generate_code(&ticket_id),
            is_paid: false,
            total_amount: priced.summary.total,
            discount_code: priced.discount_code.clone(),
            loyalty_points_used: priced.summary.loyalty_points_used,
            loyalty_points_earned: 0,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        match self.store.reserve_ticket(&ticket).await {
            Ok(()) => {}
            Err(StoreError::Conflict(reason)) => {
                warn!(%booking_id, %reason, "Concurrent ticket booking detected");
                let booking = self.get_booking(booking_id).await?;
                return match booking.wizard.ticket_id() {
                    Some(existing) => {
                        let ticket = self.get_ticket(existing).await?;
                        Ok(BookedTicket { booking, ticket })
                    }
                    None => Err(AppError::Conflict(
                        "Ticket for this booking is being created, try again".to_string(),
                    )),
                };
            }
            Err(err) => return Err(err.into()),
        }

        booking.wizard = wizard;
        booking.discount_code = priced.discount_code;
        booking.summary = priced.summary;
        self.save(&mut booking, from).await?;

        info!(
            %booking_id,
            ticket_id = %ticket.id,
            quantity = ticket.quantity,
            total = %ticket.total_amount,
            "Ticket booked, awaiting payment"
        );
        Ok(BookedTicket { booking, ticket })
    }

    /// Charges the ticket amount. A declined charge leaves the ticket unpaid
    /// and the booking at the payment step so it can be retried. Concurrent
    /// submissions for one ticket get `Conflict` before anything is charged.
    pub async fn process_payment(
        &self,
        request: &ProcessPaymentRequest,
    ) -> Result<PaymentResult, AppError> {
        let (ticket, mut booking) = self.payable_ticket(request.ticket_id).await?;

        let mut payment = Payment::pending(
            ticket.id,
            booking.id,
            ticket.total_amount,
            &self.currency,
            &request.payment_method,
        );
        self.start_payment(&mut booking, &payment).await?;

        let charged = !ticket.total_amount.is_zero();
        let outcome = if !charged {
            Ok(ChargeOutcome::Approved {
                reference: NO_CHARGE_REFERENCE.to_string(),
            })
        } else {
            self.gateway
                .charge(&ChargeRequest {
                    payment_id: payment.id,
                    amount: ticket.total_amount,
                    currency: self.currency.clone(),
                    payment_method: request.payment_method.clone(),
                })
                .await
        };

        match outcome {
            Ok(ChargeOutcome::Approved { reference }) => {
                self.settle(ticket, booking, payment, reference, charged)
                    .await
            }
            Ok(ChargeOutcome::Declined { reason }) => {
                warn!(ticket_id = %ticket.id, payment_id = %payment.id, %reason, "Payment declined");
                payment.fail(reason);
                self.store.update_payment(&payment).await?;
                Ok(PaymentResult {
                    payment,
                    ticket,
                    booking,
                })
            }
            Err(err) => {
                payment.fail(err.to_string());
                self.store.update_payment(&payment).await?;
                Err(err.into())
            }
        }
    }

    /// Settles an unpaid ticket without going through the gateway.
    pub async fn mark_paid(&self, ticket_id: Uuid) -> Result<PaymentResult, AppError> {
        let (ticket, mut booking) = self.payable_ticket(ticket_id).await?;
        let payment = Payment::pending(
            ticket.id,
            booking.id,
            ticket.total_amount,
            &self.currency,
            MANUAL_METHOD,
        );
        self.start_payment(&mut booking, &payment).await?;
        warn!(%ticket_id, "Ticket marked paid manually");
        self.settle(ticket, booking, payment, MANUAL_METHOD.to_string(), false)
            .await
    }

    pub async fn session_status(&self, payment_id: Uuid) -> Result<PaymentSessionStatus, AppError> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment '{}' was not found", payment_id)))?;
        let ticket = self.get_ticket(payment.ticket_id).await?;

        Ok(PaymentSessionStatus {
            payment_id: payment.id,
            ticket_id: payment.ticket_id,
            booking_id: payment.booking_id,
            status: payment.status,
            is_paid: ticket.is_paid,
            amount: payment.amount,
            currency: payment.currency,
            failure_reason: payment.failure_reason,
        })
    }

    pub async fn get_ticket(&self, id: Uuid) -> Result<Ticket, AppError> {
        self.store
            .get_ticket(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket '{}' was not found", id)))
    }

    /// QR data for a paid ticket.
    pub async fn qr_payload(&self, ticket_id: Uuid) -> Result<QrPayload, AppError> {
        let ticket = self.get_ticket(ticket_id).await?;
        if !ticket.is_paid {
            return Err(AppError::Conflict(
                "QR code is available once the ticket is paid".to_string(),
            ));
        }
        Ok(ticket.qr_payload())
    }

    pub async fn loyalty_account(&self, user_id: Uuid) -> Result<LoyaltyAccount, AppError> {
        Ok(self.store.loyalty_account(user_id).await?)
    }

    async fn payable_ticket(&self, ticket_id: Uuid) -> Result<(Ticket, BookingSession), AppError> {
        let ticket = self.get_ticket(ticket_id).await?;
        if ticket.is_paid {
            return Err(AppError::Conflict(format!(
                "Ticket '{}' is already paid",
                ticket_id
            )));
        }

        let booking = self.get_booking(ticket.booking_id).await?;
        let balance = self.store.loyalty_account(ticket.user_id).await?.balance;
        if balance < ticket.loyalty_points_used {
            return Err(AppError::Conflict(format!(
                "Loyalty balance of {} no longer covers the {} points on this ticket",
                balance, ticket.loyalty_points_used
            )));
        }
        Ok((ticket, booking))
    }

    /// Claims the ticket with the pending payment and attaches it to the
    /// booking as the current payment intent.
    async fn start_payment(
        &self,
        booking: &mut BookingSession,
        payment: &Payment,
    ) -> Result<(), AppError> {
        let from = booking.step();
        booking.wizard.attach_payment_intent(payment.id)?;
        self.store.claim_payment(payment).await?;

        if let Err(err) = self.save(booking, from).await {
            let mut released = payment.clone();
            released.fail("booking changed before the charge".to_string());
            self.store.update_payment(&released).await?;
            return Err(err);
        }
        Ok(())
    }

    async fn settle(
        &self,
        ticket: Ticket,
        mut booking: BookingSession,
        mut payment: Payment,
        reference: String,
        charged: bool,
    ) -> Result<PaymentResult, AppError> {
        let points_earned = self.calculator.policy().points_earned(ticket.total_amount);
        let settlement = Settlement {
            ticket_id: ticket.id,
            user_id: ticket.user_id,
            points_redeemed: ticket.loyalty_points_used,
            points_earned,
            paid_at: Utc::now(),
        };

        let ticket = match self.store.settle_ticket(&settlement).await {
            Ok(ticket) => ticket,
            Err(err) => {
                error!(
                    ticket_id = %ticket.id,
                    payment_id = %payment.id,
                    %reference,
                    error = %err,
                    "Charge approved but ticket settlement failed"
                );
                let reason = format!("settlement failed: {}", err);
                if charged {
                    self.refund(&mut payment, reference, reason).await;
                } else {
                    payment.fail(reason);
                }
                self.store.update_payment(&payment).await?;
                return Err(err.into());
            }
        };

        payment.succeed(reference);
        self.store.update_payment(&payment).await?;

        let from = booking.step();
        booking.wizard.confirm()?;
        booking.summary.loyalty_points_earned = points_earned;
        self.save(&mut booking, from).await?;

        info!(
            ticket_id = %ticket.id,
            payment_id = %payment.id,
            amount = %payment.amount,
            points_redeemed = ticket.loyalty_points_used,
            points_earned,
            "Payment succeeded, booking confirmed"
        );
        Ok(PaymentResult {
            payment,
            ticket,
            booking,
        })
    }

    /// Returns an approved charge whose ticket could not be settled.
    async fn refund(&self, payment: &mut Payment, reference: String, reason: String) {
        match self.gateway.refund(&reference, payment.amount).await {
            Ok(()) => {
                warn!(payment_id = %payment.id, %reference, "Charge refunded after failed settlement");
                payment.refund(reference, reason);
            }
            Err(err) => {
                error!(
                    payment_id = %payment.id,
                    %reference,
                    error = %err,
                    "Refund failed, charge needs manual reversal"
                );
                payment.gateway_reference = Some(reference);
                payment.fail(format!("{}; refund failed: {}", reason, err));
            }
        }
    }

    /// Persists the booking unless another request moved it away from `from`.
    async fn save(&self, booking: &mut BookingSession, from: BookingStep) -> Result<(), AppError> {
        booking.touch();
        self.store.update_booking(booking, from).await?;
        Ok(())
    }

    async fn price_selection(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        event_price_id: Uuid,
        quantity: i32,
        discount_code: Option<&str>,
        redemption: Redemption,
    ) -> Result<PricedSelection, AppError> {
        let price = self.load_price(event_id, event_price_id).await?;
        let quantity = self.validate_quantity(quantity, &price)?;
        let subtotal = self.calculator.subtotal(quantity, price.price)?;

        let code = discount_code
            .map(Promotion::normalize_code)
            .filter(|c| !c.is_empty());
        let discount = match &code {
            Some(code) => {
                let promotion = self.store.find_promotion(code).await?.ok_or_else(|| {
                    AppError::ValidationError(format!("Discount code '{}' is not valid", code))
                })?;
                Some(promotion.resolve(event_id, subtotal, Utc::now())?)
            }
            None => None,
        };

        if let Redemption::UpTo(points) = redemption {
            if points < 0 {
                return Err(AppError::ValidationError(
                    "Loyalty points to redeem must be non-negative".to_string(),
                ));
            }
        }
        let available_points = match redemption {
            Redemption::None => 0,
            _ => self.store.loyalty_account(user_id).await?.balance,
        };

        let summary = self.calculator.quote(&QuoteInput {
            quantity,
            unit_price: price.price,
            discount,
            redemption,
            available_points,
        })?;

        Ok(PricedSelection {
            discount_code: code,
            summary,
        })
    }

    async fn load_price(&self, event_id: Uuid, event_price_id: Uuid) -> Result<EventPrice, AppError> {
        if self.store.get_event(event_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Event '{}' was not found", event_id)));
        }
        let price = self
            .store
            .get_event_price(event_price_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Ticket tier '{}' was not found", event_price_id))
            })?;
        if price.event_id != event_id {
            return Err(AppError::ValidationError(format!(
                "Ticket tier '{}' does not belong to event '{}'",
                event_price_id, event_id
            )));
        }
        Ok(price)
    }

    fn validate_quantity(&self, quantity: i32, price: &EventPrice) -> Result<u32, AppError> {
        if quantity < 1 {
            return Err(AppError::ValidationError(format!(
                "Quantity must be at least 1, got {}",
                quantity
            )));
        }
        if quantity > self.max_tickets_per_booking {
            return Err(AppError::ValidationError(format!(
                "At most {} tickets can be booked at once",
                self.max_tickets_per_booking
            )));
        }
        if price.is_sold_out() {
            return Err(AppError::Conflict(format!("'{}' is sold out", price.name)));
        }
        if quantity > price.available_quantity {
            return Err(AppError::ValidationError(format!(
                "Only {} '{}' ticket(s) left",
                price.available_quantity, price.name
            )));
        }
        u32::try_from(quantity)
            .map_err(|_| AppError::ValidationError(format!("Invalid quantity {}", quantity)))
    }
}
