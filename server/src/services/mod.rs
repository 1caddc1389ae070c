pub mod booking;
pub mod events;

pub use booking::{BookedTicket, BookingService, CreatedBooking, PaymentResult};
pub use events::{EventService, SalesReport, TierSales};
