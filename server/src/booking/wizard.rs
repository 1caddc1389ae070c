use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Steps of the booking wizard, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "booking_step", rename_all = "snake_case")]
pub enum BookingStep {
    Select,
    Promotions,
    Payment,
    Confirmation,
    Cancelled,
}

impl BookingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStep::Select => "select",
            BookingStep::Promotions => "promotions",
            BookingStep::Payment => "payment",
            BookingStep::Confirmation => "confirmation",
            BookingStep::Cancelled => "cancelled",
        }
    }

    /// Cancellation is only possible before the payment step begins.
    pub fn can_cancel(&self) -> bool {
        matches!(self, BookingStep::Select | BookingStep::Promotions)
    }
}

impl fmt::Display for BookingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WizardError {
    #[error("cannot move booking from '{from}' to '{to}'")]
    InvalidTransition { from: BookingStep, to: BookingStep },

    #[error("booking cannot be cancelled once it reached '{0}'")]
    CancelNotAllowed(BookingStep),

    #[error("the selection can only be changed in the 'select' step, booking is at '{0}'")]
    SelectionLocked(BookingStep),

    #[error("booking has no payment intent yet")]
    MissingPaymentIntent,
}

/// Position of a booking in the wizard plus the ids attached on the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wizard {
    step: BookingStep,
    ticket_id: Option<Uuid>,
    payment_intent_id: Option<Uuid>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new()
    }
}

impl Wizard {
    pub fn new() -> Self {
        Self {
            step: BookingStep::Select,
            ticket_id: None,
            payment_intent_id: None,
        }
    }

    /// Rebuilds a wizard from persisted parts.
    pub fn restore(
        step: BookingStep,
        ticket_id: Option<Uuid>,
        payment_intent_id: Option<Uuid>,
    ) -> Self {
        Self {
            step,
            ticket_id,
            payment_intent_id,
        }
    }

    pub fn step(&self) -> BookingStep {
        self.step
    }

    pub fn ticket_id(&self) -> Option<Uuid> {
        self.ticket_id
    }

    pub fn payment_intent_id(&self) -> Option<Uuid> {
        self.payment_intent_id
    }

    pub fn ensure_selection_editable(&self) -> Result<(), WizardError> {
        if self.step != BookingStep::Select {
            return Err(WizardError::SelectionLocked(self.step));
        }
        Ok(())
    }

    /// `select → promotions`. Re-entering promotions is allowed so the code or
    /// points can be changed.
    pub fn enter_promotions(&mut self) -> Result<(), WizardError> {
        self.transition(
            &[BookingStep::Select, BookingStep::Promotions],
            BookingStep::Promotions,
        )
    }

    /// `promotions → select`.
    pub fn back_to_select(&mut self) -> Result<(), WizardError> {
        self.transition(&[BookingStep::Promotions], BookingStep::Select)
    }

    /// `promotions → payment`, once the ticket has been created.
    pub fn begin_payment(&mut self, ticket_id: Uuid) -> Result<(), WizardError> {
        self.transition(&[BookingStep::Promotions], BookingStep::Payment)?;
        self.ticket_id = Some(ticket_id);
        Ok(())
    }

    /// Records the pending payment created for the ticket. A retry after a
    /// declined payment replaces the previous intent.
    pub fn attach_payment_intent(&mut self, payment_id: Uuid) -> Result<(), WizardError> {
        if self.step != BookingStep::Payment {
            return Err(WizardError::InvalidTransition {
                from: self.step,
                to: BookingStep::Payment,
            });
        }
        self.payment_intent_id = Some(payment_id);
        Ok(())
    }

    /// `payment → confirmation`.
    pub fn confirm(&mut self) -> Result<(), WizardError> {
        if self.step == BookingStep::Payment && self.payment_intent_id.is_none() {
            return Err(WizardError::MissingPaymentIntent);
        }
        self.transition(&[BookingStep::Payment], BookingStep::Confirmation)
    }

    pub fn cancel(&mut self) -> Result<(), WizardError> {
        if !self.step.can_cancel() {
            return Err(WizardError::CancelNotAllowed(self.step));
        }
        self.step = BookingStep::Cancelled;
        Ok(())
    }

    fn transition(&mut self, allowed: &[BookingStep], to: BookingStep) -> Result<(), WizardError> {
        if !allowed.contains(&self.step) {
            return Err(WizardError::InvalidTransition {
                from: self.step,
                to,
            });
        }
        tracing::debug!(from = %self.step, to = %to, "Booking wizard transition");
        self.step = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_payment() -> Wizard {
        let mut wizard = Wizard::new();
        wizard.enter_promotions().unwrap();
        wizard.begin_payment(Uuid::new_v4()).unwrap();
        wizard
    }

    #[test]
    fn test_linear_happy_path() {
        let mut wizard = Wizard::new();
        assert_eq!(wizard.step(), BookingStep::Select);

        wizard.enter_promotions().unwrap();
        let ticket_id = Uuid::new_v4();
        wizard.begin_payment(ticket_id).unwrap();
        assert_eq!(wizard.ticket_id(), Some(ticket_id));

        let payment_id = Uuid::new_v4();
        wizard.attach_payment_intent(payment_id).unwrap();
        wizard.confirm().unwrap();

        assert_eq!(wizard.step(), BookingStep::Confirmation);
        assert_eq!(wizard.payment_intent_id(), Some(payment_id));
    }

    #[test]
    fn test_cannot_skip_promotions() {
        let mut wizard = Wizard::new();
        assert_eq!(
            wizard.begin_payment(Uuid::new_v4()),
            Err(WizardError::InvalidTransition {
                from: BookingStep::Select,
                to: BookingStep::Payment
            })
        );
    }

    #[test]
    fn test_back_from_promotions_only() {
        let mut wizard = Wizard::new();
        assert!(wizard.back_to_select().is_err());

        wizard.enter_promotions().unwrap();
        wizard.enter_promotions().unwrap();
        wizard.back_to_select().unwrap();
        assert_eq!(wizard.step(), BookingStep::Select);
        assert!(wizard.ensure_selection_editable().is_ok());
    }

    #[test]
    fn test_no_backward_transition_from_payment() {
        let mut wizard = at_payment();
        wizard.attach_payment_intent(Uuid::new_v4()).unwrap();

        assert!(wizard.back_to_select().is_err());
        assert!(wizard.enter_promotions().is_err());
        assert_eq!(
            wizard.ensure_selection_editable(),
            Err(WizardError::SelectionLocked(BookingStep::Payment))
        );
        assert_eq!(wizard.step(), BookingStep::Payment);
    }

    #[test]
    fn test_cancel_only_before_payment() {
        let mut wizard = Wizard::new();
        wizard.cancel().unwrap();
        assert_eq!(wizard.step(), BookingStep::Cancelled);
        assert!(wizard.enter_promotions().is_err());

        let mut wizard = Wizard::new();
        wizard.enter_promotions().unwrap();
        wizard.cancel().unwrap();

        let mut wizard = at_payment();
        assert_eq!(
            wizard.cancel(),
            Err(WizardError::CancelNotAllowed(BookingStep::Payment))
        );
    }

    #[test]
    fn test_confirm_requires_payment_intent() {
        let mut wizard = at_payment();
        assert_eq!(wizard.confirm(), Err(WizardError::MissingPaymentIntent));

        wizard.attach_payment_intent(Uuid::new_v4()).unwrap();
        // retry after a decline swaps the intent
        let retry = Uuid::new_v4();
        wizard.attach_payment_intent(retry).unwrap();
        assert_eq!(wizard.payment_intent_id(), Some(retry));
        wizard.confirm().unwrap();
        assert!(wizard.attach_payment_intent(Uuid::new_v4()).is_err());
    }
}
