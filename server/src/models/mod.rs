pub mod booking;
pub mod event;
pub mod loyalty;
pub mod payment;
pub mod promotion;
pub mod ticket;

pub use booking::{ApplyPromotionsRequest, BookingRequest, BookingSession, UpdateSelectionRequest};
pub use event::{Event, EventDetail, EventPrice};
pub use loyalty::LoyaltyAccount;
pub use payment::{Payment, PaymentSessionStatus, PaymentStatus, ProcessPaymentRequest};
pub use promotion::{Promotion, PromotionError, PromotionKind};
pub use ticket::{BookTicketRequest, QrPayload, Ticket};
